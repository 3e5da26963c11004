//! Canonical unions of intervals.

use super::range::{cmp_begin, cmp_end, extend, joins, Interval};
use std::cmp::Ordering;
use std::fmt;

/// A union of intervals in canonical form.
///
/// Members are sorted by lower bound, non-empty, and neither overlap nor
/// touch. Every operation returns a new canonical set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntervalSet<T> {
    intervals: Vec<Interval<T>>,
}

impl<T: Ord + Clone> IntervalSet<T> {
    /// The empty set.
    pub fn none() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }

    /// The whole domain.
    pub fn all() -> Self {
        Self {
            intervals: vec![Interval::all()],
        }
    }

    /// A set holding a single interval.
    pub fn of(interval: Interval<T>) -> Self {
        Self::from_intervals(vec![interval])
    }

    /// Canonicalizes an arbitrary list of intervals.
    pub fn from_intervals(intervals: Vec<Interval<T>>) -> Self {
        let mut sorted: Vec<Interval<T>> =
            intervals.into_iter().filter(|iv| !iv.is_empty()).collect();
        sorted.sort_by(cmp_begin);

        let mut merged: Vec<Interval<T>> = Vec::with_capacity(sorted.len());
        for next in sorted {
            match merged.last_mut() {
                Some(current) if joins(current, &next) => extend(current, &next),
                _ => merged.push(next),
            }
        }
        Self { intervals: merged }
    }

    /// Everything except one value: `(-∞, v) ∪ (v, +∞)`.
    pub fn complement_of_point(value: T) -> Self {
        Self {
            intervals: vec![
                Interval::less_than(value.clone()),
                Interval::greater_than(value),
            ],
        }
    }

    /// The members, sorted by lower bound.
    pub fn intervals(&self) -> &[Interval<T>] {
        &self.intervals
    }

    /// Returns true if the set holds no value.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Returns true if the set is the whole domain.
    pub fn is_all(&self) -> bool {
        matches!(self.intervals.as_slice(), [only] if only.begin().is_none() && only.end().is_none())
    }

    /// Returns true if some member contains `value`.
    pub fn contains(&self, value: &T) -> bool {
        self.intervals.iter().any(|iv| iv.contains(value))
    }

    /// Set union.
    pub fn union(&self, other: &Self) -> Self {
        let mut all = self.intervals.clone();
        all.extend(other.intervals.iter().cloned());
        Self::from_intervals(all)
    }

    /// Set intersection.
    pub fn intersection(&self, other: &Self) -> Self {
        let (a, b) = (&self.intervals, &other.intervals);
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            let overlap = a[i].intersection(&b[j]);
            if !overlap.is_empty() {
                out.push(overlap);
            }
            match cmp_end(&a[i], &b[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
            }
        }
        Self { intervals: out }
    }

    /// Returns true if some member overlaps `interval`.
    pub fn intersects(&self, interval: &Interval<T>) -> bool {
        self.intervals.iter().any(|iv| iv.overlaps(interval))
    }

    /// Returns true if the two sets share at least one value.
    pub fn intersects_set(&self, other: &Self) -> bool {
        other.intervals.iter().any(|iv| self.intersects(iv))
    }
}

impl<T: fmt::Display> fmt::Display for IntervalSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.intervals.is_empty() {
            return f.write_str("∅");
        }
        for (i, iv) in self.intervals.iter().enumerate() {
            if i > 0 {
                f.write_str(" ∪ ")?;
            }
            write!(f, "{iv}")?;
        }
        Ok(())
    }
}
