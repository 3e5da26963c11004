//! Index descriptions and index value domains.

use crate::document::{Document, ValueType};
use crate::query::Selector;

/// Describes the index a predicate is dissected against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// What the index covers.
    pub selector: Selector,
    /// The kind of value the index holds.
    pub value_type: ValueType,
    /// Sparse indexes do not contain rows whose value is null or absent.
    pub sparse: bool,
}

impl IndexSpec {
    /// Creates an index spec.
    pub fn new(selector: Selector, value_type: ValueType, sparse: bool) -> Self {
        Self {
            selector,
            value_type,
            sparse,
        }
    }

    /// The integer row-key index used for shard routing.
    pub fn row_key() -> Self {
        Self::new(Selector::Key, ValueType::Integer, true)
    }
}

/// A value that can live in an index domain.
///
/// Index values must be totally ordered and convertible from a document of
/// the matching [`ValueType`].
pub trait IndexValue: Clone + Ord + std::fmt::Debug {
    /// The document kind this value is taken from.
    fn value_type() -> ValueType;

    /// Extracts the value, or `None` if the document is of another kind.
    fn from_document(doc: &Document) -> Option<Self>;
}

impl IndexValue for i64 {
    fn value_type() -> ValueType {
        ValueType::Integer
    }

    fn from_document(doc: &Document) -> Option<Self> {
        doc.as_integer()
    }
}

impl IndexValue for String {
    fn value_type() -> ValueType {
        ValueType::Text
    }

    fn from_document(doc: &Document) -> Option<Self> {
        doc.as_text().map(str::to_string)
    }
}

impl IndexValue for bool {
    fn value_type() -> ValueType {
        ValueType::Bool
    }

    fn from_document(doc: &Document) -> Option<Self> {
        match doc {
            Document::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl IndexValue for Vec<u8> {
    fn value_type() -> ValueType {
        ValueType::Bytes
    }

    fn from_document(doc: &Document) -> Option<Self> {
        match doc {
            Document::Bytes(b) => Some(b.clone()),
            _ => None,
        }
    }
}
