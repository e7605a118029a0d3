//! Segment capability consumed by the execution engine.
//!
//! A segment is an immutable, independently searchable partition of an
//! index. The engine only borrows segments for the lifetime of a query: it
//! reads their document counts and doc bases to build slices, and asks them
//! for per-field value columns while collecting.

use std::fmt::Debug;
use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{PhalanxError, Result};
use crate::query::sort::{Sort, SortFieldType, SortValue};

/// Segment-local document id.
pub type DocId = u32;

/// Shared handle to a segment.
pub type SegmentRef = Arc<dyn Segment>;

/// Number of global document ids; every doc range must fit below it.
pub const DOC_ID_SPACE: u64 = u32::MAX as u64 + 1;

/// Per-field value access for one segment.
pub trait DocValues: Send + Sync + Debug {
    /// The type of values stored in this column.
    fn value_type(&self) -> SortFieldType;

    /// Value of `doc`, or `None` if the document has no value.
    fn value(&self, doc: DocId) -> Option<SortValue>;

    /// Iterate `(doc, value)` pairs in ascending doc order, skipping
    /// documents without a value.
    fn iter(&self) -> Box<dyn Iterator<Item = (DocId, SortValue)> + '_>;
}

/// An independently searchable partition of an index.
pub trait Segment: Send + Sync + Debug {
    /// Identifier of the segment, used in logs and errors.
    fn id(&self) -> &str;

    /// Number of documents in the segment. Local doc ids are `0..doc_count`.
    fn doc_count(&self) -> u32;

    /// First global document id owned by this segment.
    fn doc_base(&self) -> u32;

    /// Sort the documents of this segment are physically ordered by.
    fn index_sort(&self) -> Option<&Sort> {
        None
    }

    /// Value column for `field`, if the segment has one.
    fn doc_values(&self, field: &str) -> Option<Arc<dyn DocValues>>;
}

/// A dense in-memory value column.
#[derive(Debug, Clone)]
pub struct ColumnValues {
    value_type: SortFieldType,
    values: Vec<Option<SortValue>>,
}

impl ColumnValues {
    fn new(value_type: SortFieldType, doc_count: usize) -> Self {
        ColumnValues {
            value_type,
            values: vec![None; doc_count],
        }
    }
}

impl DocValues for ColumnValues {
    fn value_type(&self) -> SortFieldType {
        self.value_type
    }

    fn value(&self, doc: DocId) -> Option<SortValue> {
        self.values.get(doc as usize).cloned().flatten()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (DocId, SortValue)> + '_> {
        Box::new(
            self.values
                .iter()
                .enumerate()
                .filter_map(|(doc, value)| value.clone().map(|v| (doc as DocId, v))),
        )
    }
}

/// An in-memory segment, mainly used for tests, benchmarks and the CLI.
#[derive(Debug, Clone)]
pub struct MemorySegment {
    id: String,
    doc_base: u32,
    doc_count: u32,
    index_sort: Option<Sort>,
    columns: AHashMap<String, Arc<ColumnValues>>,
}

impl MemorySegment {
    /// Create a segment of `doc_count` documents without any value columns.
    pub fn with_doc_count<S: Into<String>>(id: S, doc_count: u32) -> Self {
        MemorySegment {
            id: id.into(),
            doc_base: 0,
            doc_count,
            index_sort: None,
            columns: AHashMap::new(),
        }
    }

    /// Start building a segment from documents.
    pub fn builder<S: Into<String>>(id: S) -> MemorySegmentBuilder {
        MemorySegmentBuilder::new(id)
    }

    /// Set the first global document id of this segment.
    pub fn set_doc_base(&mut self, doc_base: u32) {
        self.doc_base = doc_base;
    }

    /// Builder-style variant of [`MemorySegment::set_doc_base`].
    pub fn with_doc_base(mut self, doc_base: u32) -> Self {
        self.doc_base = doc_base;
        self
    }

    /// Names of the value columns in this segment.
    pub fn fields(&self) -> Vec<&str> {
        self.columns.keys().map(|k| k.as_str()).collect()
    }
}

impl Segment for MemorySegment {
    fn id(&self) -> &str {
        &self.id
    }

    fn doc_count(&self) -> u32 {
        self.doc_count
    }

    fn doc_base(&self) -> u32 {
        self.doc_base
    }

    fn index_sort(&self) -> Option<&Sort> {
        self.index_sort.as_ref()
    }

    fn doc_values(&self, field: &str) -> Option<Arc<dyn DocValues>> {
        self.columns
            .get(field)
            .map(|c| Arc::clone(c) as Arc<dyn DocValues>)
    }
}

/// Builder for [`MemorySegment`].
///
/// When an index sort is configured the documents are physically reordered
/// by it at build time, ties keeping insertion order.
#[derive(Debug)]
pub struct MemorySegmentBuilder {
    id: String,
    doc_base: u32,
    index_sort: Option<Sort>,
    documents: Vec<AHashMap<String, SortValue>>,
}

impl MemorySegmentBuilder {
    /// Create an empty builder.
    pub fn new<S: Into<String>>(id: S) -> Self {
        MemorySegmentBuilder {
            id: id.into(),
            doc_base: 0,
            index_sort: None,
            documents: Vec::new(),
        }
    }

    /// Set the doc base of the segment.
    pub fn doc_base(mut self, doc_base: u32) -> Self {
        self.doc_base = doc_base;
        self
    }

    /// Physically order documents by `sort`.
    pub fn index_sort(mut self, sort: Sort) -> Self {
        self.index_sort = Some(sort);
        self
    }

    /// Add a document given as `(field, value)` pairs.
    pub fn add_document<I, K>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, SortValue)>,
        K: Into<String>,
    {
        self.push_document(fields);
        self
    }

    /// Non-consuming variant of [`MemorySegmentBuilder::add_document`].
    pub fn push_document<I, K>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (K, SortValue)>,
        K: Into<String>,
    {
        let document = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .filter(|(_, v)| !v.is_null())
            .collect();
        self.documents.push(document);
    }

    /// Number of documents added so far.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether no documents were added.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Build the segment.
    pub fn build(mut self) -> Result<MemorySegment> {
        let doc_count = u32::try_from(self.documents.len()).map_err(|_| {
            PhalanxError::segment(format!("segment {} has too many documents", self.id))
        })?;

        if let Some(sort) = &self.index_sort {
            sort.validate()?;
            if sort.fields().iter().any(|f| !f.field_type().is_field_backed()) {
                return Err(PhalanxError::segment(format!(
                    "segment {}: index sort may only use long, double or text fields",
                    self.id
                )));
            }
            let keys: Vec<Vec<SortValue>> = self
                .documents
                .iter()
                .map(|doc| index_sort_key(sort, doc))
                .collect();
            let mut order: Vec<usize> = (0..self.documents.len()).collect();
            // Stable, so ties keep insertion order.
            order.sort_by(|&a, &b| sort.compare_values(&keys[a], &keys[b]));
            let mut slots: Vec<Option<AHashMap<String, SortValue>>> =
                self.documents.into_iter().map(Some).collect();
            self.documents = order
                .into_iter()
                .filter_map(|position| slots[position].take())
                .collect();
        }

        let mut columns: AHashMap<String, ColumnValues> = AHashMap::new();
        for (doc, document) in self.documents.into_iter().enumerate() {
            for (field, value) in document {
                let value_type = value.field_type().ok_or_else(|| {
                    PhalanxError::internal("null values are filtered when documents are added")
                })?;
                if !value_type.is_field_backed() {
                    return Err(PhalanxError::segment(format!(
                        "segment {}: field '{field}' must hold long, double or text values",
                        self.id
                    )));
                }
                let column = columns
                    .entry(field.clone())
                    .or_insert_with(|| ColumnValues::new(value_type, doc_count as usize));
                if column.value_type != value_type {
                    return Err(PhalanxError::segment(format!(
                        "segment {}: field '{field}' mixes {:?} and {:?} values",
                        self.id, column.value_type, value_type
                    )));
                }
                column.values[doc] = Some(value);
            }
        }

        Ok(MemorySegment {
            id: self.id,
            doc_base: self.doc_base,
            doc_count,
            index_sort: self.index_sort,
            columns: columns
                .into_iter()
                .map(|(field, column)| (field, Arc::new(column)))
                .collect(),
        })
    }
}

fn index_sort_key(sort: &Sort, document: &AHashMap<String, SortValue>) -> Vec<SortValue> {
    sort.fields()
        .iter()
        .map(|field| {
            field
                .field()
                .and_then(|name| document.get(name).cloned())
                .unwrap_or(SortValue::Null)
        })
        .collect()
}

/// Assign consecutive doc bases to `segments` in order and return the total
/// document count.
///
/// Fails without touching any segment when the documents do not fit in the
/// global doc id space.
pub fn assign_doc_bases(segments: &mut [MemorySegment]) -> Result<u64> {
    let total: u64 = segments.iter().map(|s| s.doc_count() as u64).sum();
    if total > DOC_ID_SPACE {
        return Err(PhalanxError::segment(format!(
            "{total} documents exceed the doc id space of {DOC_ID_SPACE}"
        )));
    }

    let mut next: u64 = 0;
    for segment in segments.iter_mut() {
        // Only an empty trailing segment can start at DOC_ID_SPACE.
        segment.set_doc_base(u32::try_from(next).unwrap_or(u32::MAX));
        next += segment.doc_count() as u64;
    }
    Ok(next)
}

/// Check that the doc range of `segment` lies inside the doc id space.
pub fn check_doc_range(segment: &dyn Segment) -> Result<()> {
    let end = segment.doc_base() as u64 + segment.doc_count() as u64;
    if end > DOC_ID_SPACE {
        return Err(PhalanxError::segment(format!(
            "segment {}: docs {}..{end} exceed the doc id space",
            segment.id(),
            segment.doc_base()
        )));
    }
    Ok(())
}
