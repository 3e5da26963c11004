//! Compiled document updates.

use crate::document::Document;

/// A mutation applied to a copy of a row's document.
///
/// `apply` returns `true` only if the document changed; unchanged rows are
/// not rewritten.
pub trait DocumentUpdate: Send + Sync {
    /// Applies the update in place.
    fn apply(&self, doc: &mut Document) -> bool;
}

impl<F> DocumentUpdate for F
where
    F: Fn(&mut Document) -> bool + Send + Sync,
{
    fn apply(&self, doc: &mut Document) -> bool {
        self(doc)
    }
}

/// Built-in update operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Sets a dotted path to a value.
    Set(String, Document),
    /// Removes a dotted path.
    Unset(String),
    /// Adds to an integer field; a missing field starts at zero.
    Increment(String, i64),
    /// Applies every update in order.
    Batch(Vec<Update>),
}

impl Update {
    /// Creates a set update.
    pub fn set(path: impl Into<String>, value: impl Into<Document>) -> Self {
        Update::Set(path.into(), value.into())
    }

    /// Creates an unset update.
    pub fn unset(path: impl Into<String>) -> Self {
        Update::Unset(path.into())
    }

    /// Creates an increment update.
    pub fn increment(path: impl Into<String>, delta: i64) -> Self {
        Update::Increment(path.into(), delta)
    }
}

impl DocumentUpdate for Update {
    fn apply(&self, doc: &mut Document) -> bool {
        match self {
            Update::Set(path, value) => doc.set_path(path, value.clone()),
            Update::Unset(path) => doc.remove_path(path).is_some(),
            Update::Increment(path, delta) => {
                let next = match doc.get_path(path) {
                    Some(Document::Integer(n)) => n.saturating_add(*delta),
                    Some(_) => return false,
                    None => *delta,
                };
                doc.set_path(path, Document::Integer(next))
            }
            Update::Batch(updates) => updates
                .iter()
                .fold(false, |changed, update| update.apply(doc) || changed),
        }
    }
}
