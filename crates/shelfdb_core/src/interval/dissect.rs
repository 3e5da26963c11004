//! Lowering predicates to interval sets over an index domain.

use super::{Interval, IntervalSet};
use crate::document::Document;
use crate::error::{CoreError, CoreResult};
use crate::query::{IndexSpec, IndexValue, Predicate};

/// Lowers `predicate` to the set of index values a matching row can have.
///
/// The result over-approximates: every row the predicate matches has its
/// index value in the set, but not every value in the set matches. Parts
/// of the predicate that do not constrain the index yield the whole domain.
///
/// # Errors
///
/// Returns [`CoreError::InvalidQuery`] if the predicate compares the
/// indexed selector against a value of another kind.
pub fn dissect<T: IndexValue>(predicate: &Predicate, index: &IndexSpec) -> CoreResult<IntervalSet<T>> {
    let set = match predicate {
        Predicate::All => IntervalSet::all(),
        Predicate::Eq(sel, value) if *sel == index.selector => {
            if value.is_null() {
                if index.sparse {
                    IntervalSet::none()
                } else {
                    IntervalSet::all()
                }
            } else {
                IntervalSet::of(Interval::point(operand::<T>(value, index)?))
            }
        }
        Predicate::Ne(sel, value) if *sel == index.selector => {
            if value.is_null() {
                IntervalSet::all()
            } else {
                IntervalSet::complement_of_point(operand::<T>(value, index)?)
            }
        }
        Predicate::Lt(sel, value) if *sel == index.selector => {
            range(value, index, false, Interval::less_than)?
        }
        Predicate::Lte(sel, value) if *sel == index.selector => {
            range(value, index, true, Interval::at_most)?
        }
        Predicate::Gt(sel, value) if *sel == index.selector => {
            range(value, index, false, Interval::greater_than)?
        }
        Predicate::Gte(sel, value) if *sel == index.selector => {
            range(value, index, true, Interval::at_least)?
        }
        Predicate::And(children) => {
            let mut acc = IntervalSet::all();
            for child in children {
                acc = acc.intersection(&dissect(child, index)?);
            }
            acc
        }
        Predicate::Or(children) => {
            let mut acc = IntervalSet::none();
            for child in children {
                acc = acc.union(&dissect(child, index)?);
            }
            acc
        }
        _ => IntervalSet::all(),
    };
    Ok(set)
}

fn range<T: IndexValue>(
    value: &Document,
    index: &IndexSpec,
    inclusive: bool,
    make: fn(T) -> Interval<T>,
) -> CoreResult<IntervalSet<T>> {
    // Only null compares to null, and only as equal. Non-sparse indexes place
    // null rows anywhere in the domain.
    if value.is_null() {
        return Ok(if inclusive && !index.sparse {
            IntervalSet::all()
        } else {
            IntervalSet::none()
        });
    }
    Ok(IntervalSet::of(make(operand::<T>(value, index)?)))
}

fn operand<T: IndexValue>(value: &Document, index: &IndexSpec) -> CoreResult<T> {
    if index.value_type != T::value_type() {
        return Err(CoreError::invalid_query(format!(
            "index on {} holds {} values, dissected as {}",
            index.selector,
            index.value_type,
            T::value_type()
        )));
    }
    T::from_document(value).ok_or_else(|| {
        CoreError::invalid_query(format!(
            "cannot compare {} index on {} with {} value {}",
            index.value_type,
            index.selector,
            value.value_type(),
            value
        ))
    })
}
