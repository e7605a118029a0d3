//! Cooperative query cancellation.
//!
//! Each running query owns a [`CancellationToken`] that slice tasks poll at
//! segment boundaries and periodically while collecting. The engine keeps
//! tokens in a [`QueryRegistry`] so an external handler can cancel a query
//! by its identifier.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{PhalanxError, Result};

const NOT_CANCELLED: u8 = 0;
const CANCEL_REQUESTED: u8 = 1;
const CANCEL_TIMEOUT: u8 = 2;

/// Why a query was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// Cancelled through [`QueryRegistry::cancel`].
    Requested,
    /// The query ran past its deadline.
    Timeout,
}

impl CancelReason {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            CANCEL_REQUESTED => Some(CancelReason::Requested),
            CANCEL_TIMEOUT => Some(CancelReason::Timeout),
            _ => None,
        }
    }

    fn code(self) -> u8 {
        match self {
            CancelReason::Requested => CANCEL_REQUESTED,
            CancelReason::Timeout => CANCEL_TIMEOUT,
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => write!(f, "cancel requested"),
            CancelReason::Timeout => write!(f, "timed out"),
        }
    }
}

#[derive(Debug)]
struct TokenInner {
    query_id: String,
    reason: AtomicU8,
    deadline: Option<Instant>,
}

/// Shared cancellation flag of one query. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Create a token without a deadline.
    pub fn new<S: Into<String>>(query_id: S) -> Self {
        Self::with_deadline(query_id, None)
    }

    /// Create a token that cancels itself once `timeout` elapsed.
    pub fn with_timeout<S: Into<String>>(query_id: S, timeout: Option<Duration>) -> Self {
        Self::with_deadline(query_id, timeout.map(|t| Instant::now() + t))
    }

    fn with_deadline<S: Into<String>>(query_id: S, deadline: Option<Instant>) -> Self {
        CancellationToken {
            inner: Arc::new(TokenInner {
                query_id: query_id.into(),
                reason: AtomicU8::new(NOT_CANCELLED),
                deadline,
            }),
        }
    }

    /// Identifier of the query this token belongs to.
    pub fn query_id(&self) -> &str {
        &self.inner.query_id
    }

    /// Signal cancellation. Returns `false` if the token was already
    /// cancelled; the first reason wins.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.inner
            .reason
            .compare_exchange(
                NOT_CANCELLED,
                reason.code(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Whether the query was cancelled or ran past its deadline.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.reason.load(Ordering::Acquire) != NOT_CANCELLED {
            return true;
        }
        if self.inner.deadline.is_some_and(|d| Instant::now() >= d) {
            if self.cancel(CancelReason::Timeout) {
                debug!("Query {} timed out", self.inner.query_id);
            }
            return true;
        }
        false
    }

    /// The cancellation reason, if cancelled.
    pub fn reason(&self) -> Option<CancelReason> {
        if self.is_cancelled() {
            CancelReason::from_code(self.inner.reason.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// The reason of an explicit cancellation or of a timeout some task
    /// already observed. Unlike [`CancellationToken::reason`], this does not
    /// consult the deadline.
    pub fn signalled_reason(&self) -> Option<CancelReason> {
        CancelReason::from_code(self.inner.reason.load(Ordering::Acquire))
    }

    /// Fail with [`PhalanxError::OperationCancelled`] if cancelled.
    pub fn check(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(PhalanxError::cancelled(format!(
                "query {} {reason}",
                self.inner.query_id
            ))),
            None => Ok(()),
        }
    }
}

/// Running queries by identifier.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: RwLock<AHashMap<String, CancellationToken>>,
}

impl QueryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query. The query stays registered until the returned
    /// guard is dropped.
    pub fn register(
        self: &Arc<Self>,
        query_id: &str,
        timeout: Option<Duration>,
    ) -> Result<QueryRegistration> {
        let mut queries = self.queries.write();
        if queries.contains_key(query_id) {
            return Err(PhalanxError::invalid_argument(format!(
                "query {query_id} is already running"
            )));
        }
        let token = CancellationToken::with_timeout(query_id, timeout);
        queries.insert(query_id.to_string(), token.clone());
        Ok(QueryRegistration {
            registry: Arc::clone(self),
            token,
        })
    }

    /// Cancel the running query `query_id`. Returns whether a running,
    /// not yet cancelled query was found.
    pub fn cancel(&self, query_id: &str) -> Result<bool> {
        if query_id.is_empty() {
            return Err(PhalanxError::invalid_argument("query id must not be empty"));
        }
        let cancelled = self
            .queries
            .read()
            .get(query_id)
            .is_some_and(|token| token.cancel(CancelReason::Requested));
        if cancelled {
            info!("Cancelled query {query_id}");
        } else {
            debug!("No running query {query_id} to cancel");
        }
        Ok(cancelled)
    }

    /// Token of the running query `query_id`.
    pub fn lookup(&self, query_id: &str) -> Option<CancellationToken> {
        self.queries.read().get(query_id).cloned()
    }

    /// Identifiers of all running queries, sorted.
    pub fn running_queries(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.queries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of running queries.
    pub fn len(&self) -> usize {
        self.queries.read().len()
    }

    /// Whether no query is running.
    pub fn is_empty(&self) -> bool {
        self.queries.read().is_empty()
    }
}

/// Keeps a query registered while alive.
#[derive(Debug)]
pub struct QueryRegistration {
    registry: Arc<QueryRegistry>,
    token: CancellationToken,
}

impl QueryRegistration {
    /// The query's token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for QueryRegistration {
    fn drop(&mut self) {
        self.registry.queries.write().remove(self.token.query_id());
    }
}
