//! Sort specifications, sort values and the comparator chain used by
//! collectors, shared checkers and the result merger.
//!
//! Comparisons return [`Ordering::Less`] when the left-hand side ranks
//! *before* the right-hand side in the final result list.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PhalanxError, Result};

/// The type of a sort field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortFieldType {
    /// Relevance score, best (highest) first.
    Score,
    /// Global document id, lowest first.
    Doc,
    /// 64-bit signed integer field values.
    Long,
    /// 64-bit floating point field values.
    Double,
    /// UTF-8 string field values, compared lexicographically.
    Text,
}

impl SortFieldType {
    /// Whether this type reads values from a segment column.
    pub fn is_field_backed(&self) -> bool {
        matches!(
            self,
            SortFieldType::Long | SortFieldType::Double | SortFieldType::Text
        )
    }

    fn as_str(&self) -> &'static str {
        match self {
            SortFieldType::Score => "score",
            SortFieldType::Doc => "doc",
            SortFieldType::Long => "long",
            SortFieldType::Double => "double",
            SortFieldType::Text => "text",
        }
    }
}

/// A single value a document carries for one sort field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortValue {
    /// The document has no value for the field.
    Null,
    /// Integer value.
    Long(i64),
    /// Floating point value.
    Double(f64),
    /// String value.
    Text(String),
    /// Relevance score.
    Score(f32),
    /// Global document id.
    Doc(u32),
}

impl SortValue {
    fn rank(&self) -> u8 {
        match self {
            SortValue::Null => 0,
            SortValue::Long(_) => 1,
            SortValue::Double(_) => 2,
            SortValue::Text(_) => 3,
            SortValue::Score(_) => 4,
            SortValue::Doc(_) => 5,
        }
    }

    /// Total ascending order over values. Missing values sort before any
    /// present value; floats use IEEE total ordering.
    pub fn cmp_natural(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Long(a), SortValue::Long(b)) => a.cmp(b),
            (SortValue::Double(a), SortValue::Double(b)) => a.total_cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            (SortValue::Score(a), SortValue::Score(b)) => a.total_cmp(b),
            (SortValue::Doc(a), SortValue::Doc(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SortValue::Long(v) => Some(*v as f64),
            SortValue::Double(v) => Some(*v),
            SortValue::Score(v) => Some(*v as f64),
            SortValue::Doc(v) => Some(*v as f64),
            SortValue::Null | SortValue::Text(_) => None,
        }
    }

    /// The sort field type that can carry this value.
    pub fn field_type(&self) -> Option<SortFieldType> {
        match self {
            SortValue::Null => None,
            SortValue::Long(_) => Some(SortFieldType::Long),
            SortValue::Double(_) => Some(SortFieldType::Double),
            SortValue::Text(_) => Some(SortFieldType::Text),
            SortValue::Score(_) => Some(SortFieldType::Score),
            SortValue::Doc(_) => Some(SortFieldType::Doc),
        }
    }

    /// Whether the value is [`SortValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, SortValue::Null)
    }
}

impl PartialEq for SortValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_natural(other) == Ordering::Equal
    }
}

impl fmt::Display for SortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortValue::Null => write!(f, "null"),
            SortValue::Long(v) => write!(f, "{v}"),
            SortValue::Double(v) => write!(f, "{v}"),
            SortValue::Text(v) => write!(f, "{v}"),
            SortValue::Score(v) => write!(f, "{v}"),
            SortValue::Doc(v) => write!(f, "#{v}"),
        }
    }
}

/// One component of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortField {
    /// Field name; `None` for score and doc sorts.
    field: Option<String>,
    /// Value type of the field.
    field_type: SortFieldType,
    /// Reverse the natural order of the type.
    reverse: bool,
}

impl SortField {
    /// Sort a field by its values in ascending order.
    pub fn new<S: Into<String>>(field: S, field_type: SortFieldType) -> Self {
        SortField {
            field: Some(field.into()),
            field_type,
            reverse: false,
        }
    }

    /// Sort by relevance score, highest first.
    pub fn score() -> Self {
        SortField {
            field: None,
            field_type: SortFieldType::Score,
            reverse: false,
        }
    }

    /// Sort by global document id, lowest first.
    pub fn doc() -> Self {
        SortField {
            field: None,
            field_type: SortFieldType::Doc,
            reverse: false,
        }
    }

    /// Set whether the natural order is reversed.
    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Reverse the natural order.
    pub fn reversed(self) -> Self {
        self.with_reverse(true)
    }

    /// The field name, if any.
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// The field type.
    pub fn field_type(&self) -> SortFieldType {
        self.field_type
    }

    /// Whether the natural order is reversed.
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Compare two values of this field. `Less` means `a` ranks first.
    pub fn compare(&self, a: &SortValue, b: &SortValue) -> Ordering {
        let natural = a.cmp_natural(b);
        // Scores rank highest first.
        let ordering = if self.field_type == SortFieldType::Score {
            natural.reverse()
        } else {
            natural
        };
        if self.reverse {
            ordering.reverse()
        } else {
            ordering
        }
    }

    fn validate(&self) -> Result<()> {
        match (self.field_type.is_field_backed(), &self.field) {
            (true, None) => Err(PhalanxError::query(format!(
                "sort field of type {} requires a field name",
                self.field_type.as_str()
            ))),
            (true, Some(name)) if name.is_empty() => {
                Err(PhalanxError::query("sort field name must not be empty"))
            }
            (false, Some(name)) => Err(PhalanxError::query(format!(
                "sort field of type {} must not name a field (got '{name}')",
                self.field_type.as_str()
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(name) => write!(f, "{name}:{}", self.field_type.as_str())?,
            None => write!(f, "{}", self.field_type.as_str())?,
        }
        if self.reverse {
            write!(f, ":desc")?;
        }
        Ok(())
    }
}

impl FromStr for SortField {
    type Err = PhalanxError;

    /// Parses `score`, `doc`, `name:type` and `name:type:asc|desc`
    /// (`score:desc`/`doc:desc` reverse the special sorts).
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let parse_direction = |d: &str| match d {
            "asc" => Ok(false),
            "desc" => Ok(true),
            other => Err(PhalanxError::query(format!(
                "unknown sort direction '{other}'"
            ))),
        };

        let field = match parts.as_slice() {
            ["score"] => SortField::score(),
            ["doc"] => SortField::doc(),
            ["score", dir] => SortField::score().with_reverse(parse_direction(dir)?),
            ["doc", dir] => SortField::doc().with_reverse(parse_direction(dir)?),
            [name, ty] => SortField::new(*name, parse_field_type(ty)?),
            [name, ty, dir] => {
                SortField::new(*name, parse_field_type(ty)?).with_reverse(parse_direction(dir)?)
            }
            _ => return Err(PhalanxError::query(format!("malformed sort field '{s}'"))),
        };
        field.validate()?;
        Ok(field)
    }
}

fn parse_field_type(ty: &str) -> Result<SortFieldType> {
    match ty {
        "long" => Ok(SortFieldType::Long),
        "double" => Ok(SortFieldType::Double),
        "text" => Ok(SortFieldType::Text),
        other => Err(PhalanxError::query(format!(
            "unknown sort field type '{other}'"
        ))),
    }
}

/// An ordered list of sort fields. Ties after the last field are broken by
/// ascending global document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sort {
    fields: Vec<SortField>,
}

impl Sort {
    /// Create a sort from its fields.
    pub fn new(fields: Vec<SortField>) -> Self {
        Sort { fields }
    }

    /// Sort by relevance score.
    pub fn relevance() -> Self {
        Sort::new(vec![SortField::score()])
    }

    /// Sort by natural document order.
    pub fn index_order() -> Self {
        Sort::new(vec![SortField::doc()])
    }

    /// The sort fields.
    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    /// Whether this is the plain relevance sort.
    pub fn is_relevance(&self) -> bool {
        self.fields.len() == 1
            && self.fields[0].field_type == SortFieldType::Score
            && !self.fields[0].reverse
    }

    /// Whether this is the plain natural document order.
    pub fn is_index_order(&self) -> bool {
        self.fields.len() == 1
            && self.fields[0].field_type == SortFieldType::Doc
            && !self.fields[0].reverse
    }

    /// Reject empty or malformed sort specifications.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(PhalanxError::query("sort must have at least one field"));
        }
        for field in &self.fields {
            field.validate()?;
        }
        Ok(())
    }

    /// Compare two value tuples field by field.
    pub fn compare_values(&self, a: &[SortValue], b: &[SortValue]) -> Ordering {
        for ((field, va), vb) in self.fields.iter().zip(a).zip(b) {
            let ordering = field.compare(va, vb);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Compare two ranked documents: sort values first, then ascending doc id.
    pub fn compare_ranked(
        &self,
        a_values: &[SortValue],
        a_doc: u32,
        b_values: &[SortValue],
        b_doc: u32,
    ) -> Ordering {
        self.compare_values(a_values, b_values)
            .then_with(|| a_doc.cmp(&b_doc))
    }

    /// Whether every field of `self` matches `other` at the same position
    /// (same name, type and direction).
    pub fn is_prefix_of(&self, other: &Sort) -> bool {
        self.fields.len() <= other.fields.len()
            && self.fields.iter().zip(&other.fields).all(|(a, b)| a == b)
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.fields.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for Sort {
    type Err = PhalanxError;

    /// Parses a comma separated list of [`SortField`] specs.
    fn from_str(s: &str) -> Result<Self> {
        let fields = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(SortField::from_str)
            .collect::<Result<Vec<_>>>()?;
        let sort = Sort::new(fields);
        sort.validate()?;
        Ok(sort)
    }
}

/// Whether documents of a segment sorted by `index_sort` are guaranteed to
/// arrive in an order compatible with early termination for `search_sort`.
///
/// Natural document order always qualifies; otherwise the search sort must
/// be a prefix of the index sort.
pub fn can_early_terminate(search_sort: &Sort, index_sort: Option<&Sort>) -> bool {
    if search_sort.is_index_order() {
        return true;
    }
    match index_sort {
        Some(index_sort) => search_sort.is_prefix_of(index_sort),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long(name: &str) -> SortField {
        SortField::new(name, SortFieldType::Long)
    }

    fn text(name: &str) -> SortField {
        SortField::new(name, SortFieldType::Text)
    }

    #[test]
    fn test_can_early_terminate_on_doc_id() {
        let doc = Sort::index_order();
        assert!(can_early_terminate(&doc, Some(&Sort::index_order())));
        assert!(can_early_terminate(&doc, None));
        assert!(!can_early_terminate(
            &Sort::new(vec![long("a")]),
            Some(&Sort::new(vec![long("a").reversed()]))
        ));
        assert!(!can_early_terminate(
            &Sort::new(vec![long("a")]),
            Some(&Sort::new(vec![long("b")]))
        ));
        assert!(can_early_terminate(&doc, Some(&Sort::new(vec![long("b")]))));
        assert!(can_early_terminate(
            &doc,
            Some(&Sort::new(vec![long("b"), SortField::doc()]))
        ));
        assert!(!can_early_terminate(
            &Sort::new(vec![long("a")]),
            Some(&Sort::index_order())
        ));
        assert!(!can_early_terminate(
            &Sort::new(vec![long("a"), SortField::doc()]),
            Some(&Sort::index_order())
        ));
    }

    #[test]
    fn test_can_early_terminate_on_prefix() {
        let a_b = Sort::new(vec![long("a"), text("b")]);
        assert!(can_early_terminate(
            &Sort::new(vec![long("a")]),
            Some(&Sort::new(vec![long("a")]))
        ));
        assert!(can_early_terminate(&a_b, Some(&a_b)));
        assert!(can_early_terminate(&Sort::new(vec![long("a")]), Some(&a_b)));
        assert!(!can_early_terminate(
            &Sort::new(vec![long("a").reversed()]),
            Some(&Sort::new(vec![long("a")]))
        ));
        assert!(!can_early_terminate(&a_b, Some(&Sort::new(vec![long("a")]))));
        assert!(!can_early_terminate(
            &a_b,
            Some(&Sort::new(vec![long("a"), text("c")]))
        ));
        assert!(!can_early_terminate(
            &a_b,
            Some(&Sort::new(vec![long("c"), text("b")]))
        ));
        assert!(!can_early_terminate(&Sort::new(vec![long("a")]), None));
    }

    #[test]
    fn test_type_mismatch_is_not_a_prefix() {
        let search = Sort::new(vec![SortField::new("a", SortFieldType::Double)]);
        let index = Sort::new(vec![long("a")]);
        assert!(!can_early_terminate(&search, Some(&index)));
    }

    #[test]
    fn test_field_comparisons() {
        let score = SortField::score();
        assert_eq!(
            score.compare(&SortValue::Score(2.0), &SortValue::Score(1.0)),
            Ordering::Less
        );

        let asc = long("price");
        assert_eq!(
            asc.compare(&SortValue::Long(1), &SortValue::Long(2)),
            Ordering::Less
        );
        let desc = long("price").reversed();
        assert_eq!(
            desc.compare(&SortValue::Long(1), &SortValue::Long(2)),
            Ordering::Greater
        );
        assert_eq!(
            asc.compare(&SortValue::Null, &SortValue::Long(i64::MIN)),
            Ordering::Less
        );
    }

    #[test]
    fn test_compare_ranked_breaks_ties_by_doc() {
        let sort = Sort::new(vec![long("a")]);
        let values = vec![SortValue::Long(7)];
        assert_eq!(
            sort.compare_ranked(&values, 3, &values, 9),
            Ordering::Less
        );
        assert_eq!(
            sort.compare_ranked(&values, 9, &values, 3),
            Ordering::Greater
        );
    }

    #[test]
    fn test_parse_sort() {
        let sort: Sort = "category:text,price:long:desc,score".parse().unwrap();
        assert_eq!(sort.fields().len(), 3);
        assert_eq!(sort.fields()[0], text("category"));
        assert_eq!(sort.fields()[1], long("price").reversed());
        assert_eq!(sort.fields()[2], SortField::score());
        assert_eq!(sort.to_string(), "category:text,price:long:desc,score");

        assert!("".parse::<Sort>().is_err());
        assert!("price:float".parse::<Sort>().is_err());
        assert!("price:long:sideways".parse::<Sort>().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(Sort::new(vec![]).validate().is_err());
        assert!(
            Sort::new(vec![SortField::new("", SortFieldType::Long)])
                .validate()
                .is_err()
        );
        assert!(Sort::relevance().validate().is_ok());
        assert!(Sort::relevance().is_relevance());
        assert!(Sort::index_order().is_index_order());
        assert!(!Sort::new(vec![SortField::score().reversed()]).is_relevance());
    }
}
