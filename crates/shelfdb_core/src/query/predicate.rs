//! Compiled predicates.

use crate::document::Document;
use crate::types::RowKey;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

/// What part of a row a predicate looks at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// The row key.
    Key,
    /// A dotted path into the document.
    Field(String),
}

impl Selector {
    /// Creates a field selector.
    pub fn field(path: impl Into<String>) -> Self {
        Selector::Field(path.into())
    }

    /// Resolves the selector against a row. `None` means the field is absent.
    pub fn resolve<'a>(&self, key: &RowKey, doc: &'a Document) -> Option<Resolved<'a>> {
        match self {
            Selector::Key => Some(Resolved::Owned(Document::from(key))),
            Selector::Field(path) => doc.get_path(path).map(Resolved::Borrowed),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Key => f.write_str("$key"),
            Selector::Field(path) => f.write_str(path),
        }
    }
}

/// A value produced by [`Selector::resolve`].
#[derive(Debug)]
pub enum Resolved<'a> {
    /// Borrowed from the document.
    Borrowed(&'a Document),
    /// Materialized from the row key.
    Owned(Document),
}

impl std::ops::Deref for Resolved<'_> {
    type Target = Document;

    fn deref(&self) -> &Document {
        match self {
            Resolved::Borrowed(doc) => doc,
            Resolved::Owned(doc) => doc,
        }
    }
}

impl From<&RowKey> for Document {
    fn from(key: &RowKey) -> Self {
        match key {
            RowKey::Int(v) => Document::Integer(*v),
            RowKey::Text(s) => Document::Text(s.clone()),
        }
    }
}

/// A compiled predicate over a row.
///
/// Ordering comparisons only hold between values of the same kind; an absent
/// field compares equal to `Null` and to nothing else.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Matches every row.
    All,
    /// Selected value equals the operand.
    Eq(Selector, Document),
    /// Selected value differs from the operand.
    Ne(Selector, Document),
    /// Selected value is less than the operand.
    Lt(Selector, Document),
    /// Selected value is at most the operand.
    Lte(Selector, Document),
    /// Selected value is greater than the operand.
    Gt(Selector, Document),
    /// Selected value is at least the operand.
    Gte(Selector, Document),
    /// Every child matches.
    And(Vec<Predicate>),
    /// At least one child matches.
    Or(Vec<Predicate>),
    /// The child does not match.
    Not(Box<Predicate>),
    /// The selected field is present.
    Exists(Selector),
    /// The selected text matches the regular expression.
    Matches(Selector, Regex),
    /// The selected value (or any element of a selected array) is one of
    /// the operands.
    Any(Selector, Vec<Document>),
}

impl Predicate {
    /// `selector == value`
    pub fn eq(selector: Selector, value: impl Into<Document>) -> Self {
        Predicate::Eq(selector, value.into())
    }

    /// `selector != value`
    pub fn ne(selector: Selector, value: impl Into<Document>) -> Self {
        Predicate::Ne(selector, value.into())
    }

    /// `selector < value`
    pub fn lt(selector: Selector, value: impl Into<Document>) -> Self {
        Predicate::Lt(selector, value.into())
    }

    /// `selector <= value`
    pub fn lte(selector: Selector, value: impl Into<Document>) -> Self {
        Predicate::Lte(selector, value.into())
    }

    /// `selector > value`
    pub fn gt(selector: Selector, value: impl Into<Document>) -> Self {
        Predicate::Gt(selector, value.into())
    }

    /// `selector >= value`
    pub fn gte(selector: Selector, value: impl Into<Document>) -> Self {
        Predicate::Gte(selector, value.into())
    }

    /// Negates a predicate.
    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Predicate) -> Self {
        Predicate::Not(Box::new(inner))
    }

    /// Evaluates the predicate against a row.
    pub fn matches(&self, key: &RowKey, doc: &Document) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq(sel, value) => equals(sel.resolve(key, doc).as_deref(), value),
            Predicate::Ne(sel, value) => !equals(sel.resolve(key, doc).as_deref(), value),
            Predicate::Lt(sel, value) => compare(sel, key, doc, value, Ordering::is_lt),
            Predicate::Lte(sel, value) => compare(sel, key, doc, value, Ordering::is_le),
            Predicate::Gt(sel, value) => compare(sel, key, doc, value, Ordering::is_gt),
            Predicate::Gte(sel, value) => compare(sel, key, doc, value, Ordering::is_ge),
            Predicate::And(children) => children.iter().all(|p| p.matches(key, doc)),
            Predicate::Or(children) => children.iter().any(|p| p.matches(key, doc)),
            Predicate::Not(inner) => !inner.matches(key, doc),
            Predicate::Exists(sel) => sel.resolve(key, doc).is_some(),
            Predicate::Matches(sel, regex) => sel
                .resolve(key, doc)
                .and_then(|v| v.as_text().map(|s| regex.is_match(s)))
                .unwrap_or(false),
            Predicate::Any(sel, values) => match sel.resolve(key, doc) {
                Some(resolved) => match &*resolved {
                    Document::Array(items) => items.iter().any(|item| values.contains(item)),
                    other => values.contains(other),
                },
                None => false,
            },
        }
    }
}

fn equals(resolved: Option<&Document>, value: &Document) -> bool {
    match resolved {
        Some(found) => found == value,
        None => value.is_null(),
    }
}

fn compare(
    sel: &Selector,
    key: &RowKey,
    doc: &Document,
    value: &Document,
    holds: fn(Ordering) -> bool,
) -> bool {
    match sel.resolve(key, doc) {
        Some(found) if found.value_type() == value.value_type() => holds((*found).cmp(value)),
        _ => false,
    }
}
