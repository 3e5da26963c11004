//! Single intervals.

use std::cmp::Ordering;
use std::fmt;

/// A contiguous range of values with independently inclusive or exclusive
/// bounds.
///
/// A missing `begin` means −∞ and a missing `end` means +∞; the inclusive
/// flag of a missing bound is always `false`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interval<T> {
    begin: Option<T>,
    begin_inclusive: bool,
    end: Option<T>,
    end_inclusive: bool,
}

impl<T: Ord + Clone> Interval<T> {
    /// Creates an interval from raw bounds.
    pub fn new(begin: Option<T>, begin_inclusive: bool, end: Option<T>, end_inclusive: bool) -> Self {
        Self {
            begin_inclusive: begin_inclusive && begin.is_some(),
            end_inclusive: end_inclusive && end.is_some(),
            begin,
            end,
        }
    }

    /// `(-∞, +∞)`
    pub fn all() -> Self {
        Self::new(None, false, None, false)
    }

    /// `[v, v]`
    pub fn point(value: T) -> Self {
        Self::new(Some(value.clone()), true, Some(value), true)
    }

    /// `[begin, end]`
    pub fn closed(begin: T, end: T) -> Self {
        Self::new(Some(begin), true, Some(end), true)
    }

    /// `[begin, end)`
    pub fn closed_open(begin: T, end: T) -> Self {
        Self::new(Some(begin), true, Some(end), false)
    }

    /// `[begin, +∞)`
    pub fn at_least(begin: T) -> Self {
        Self::new(Some(begin), true, None, false)
    }

    /// `(begin, +∞)`
    pub fn greater_than(begin: T) -> Self {
        Self::new(Some(begin), false, None, false)
    }

    /// `(-∞, end]`
    pub fn at_most(end: T) -> Self {
        Self::new(None, false, Some(end), true)
    }

    /// `(-∞, end)`
    pub fn less_than(end: T) -> Self {
        Self::new(None, false, Some(end), false)
    }

    /// Lower bound, `None` for −∞.
    pub fn begin(&self) -> Option<&T> {
        self.begin.as_ref()
    }

    /// Whether the lower bound is included.
    pub fn begin_inclusive(&self) -> bool {
        self.begin_inclusive
    }

    /// Upper bound, `None` for +∞.
    pub fn end(&self) -> Option<&T> {
        self.end.as_ref()
    }

    /// Whether the upper bound is included.
    pub fn end_inclusive(&self) -> bool {
        self.end_inclusive
    }

    /// Returns true if no value lies in the interval.
    pub fn is_empty(&self) -> bool {
        match (&self.begin, &self.end) {
            (Some(b), Some(e)) => match b.cmp(e) {
                Ordering::Greater => true,
                Ordering::Equal => !(self.begin_inclusive && self.end_inclusive),
                Ordering::Less => false,
            },
            _ => false,
        }
    }

    /// Returns true if `value` lies in the interval.
    pub fn contains(&self, value: &T) -> bool {
        let above_begin = match &self.begin {
            None => true,
            Some(b) if self.begin_inclusive => value >= b,
            Some(b) => value > b,
        };
        let below_end = match &self.end {
            None => true,
            Some(e) if self.end_inclusive => value <= e,
            Some(e) => value < e,
        };
        above_begin && below_end
    }

    /// Returns the overlap of two intervals (possibly empty).
    pub fn intersection(&self, other: &Self) -> Self {
        let (begin, begin_inclusive) = if cmp_begin(self, other) == Ordering::Less {
            (other.begin.clone(), other.begin_inclusive)
        } else {
            (self.begin.clone(), self.begin_inclusive)
        };
        let (end, end_inclusive) = if cmp_end(self, other) == Ordering::Greater {
            (other.end.clone(), other.end_inclusive)
        } else {
            (self.end.clone(), self.end_inclusive)
        };
        Self::new(begin, begin_inclusive, end, end_inclusive)
    }

    /// Returns true if the two intervals share at least one value.
    pub fn overlaps(&self, other: &Self) -> bool {
        !self.intersection(other).is_empty()
    }
}

/// Orders lower bounds: −∞ first; at equal values an inclusive bound starts
/// earlier than an exclusive one.
pub(crate) fn cmp_begin<T: Ord>(a: &Interval<T>, b: &Interval<T>) -> Ordering {
    match (&a.begin, &b.begin) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x
            .cmp(y)
            .then_with(|| b.begin_inclusive.cmp(&a.begin_inclusive)),
    }
}

/// Orders upper bounds: +∞ last; at equal values an inclusive bound ends
/// later than an exclusive one.
pub(crate) fn cmp_end<T: Ord>(a: &Interval<T>, b: &Interval<T>) -> Ordering {
    match (&a.end, &b.end) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(y).then_with(|| a.end_inclusive.cmp(&b.end_inclusive)),
    }
}

/// Returns true if `later` (whose begin is not before `earlier`'s) overlaps
/// or touches `earlier`, so their union is one interval.
pub(crate) fn joins<T: Ord>(earlier: &Interval<T>, later: &Interval<T>) -> bool {
    match (&earlier.end, &later.begin) {
        (None, _) | (_, None) => true,
        (Some(end), Some(begin)) => match begin.cmp(end) {
            Ordering::Less => true,
            Ordering::Equal => earlier.end_inclusive || later.begin_inclusive,
            Ordering::Greater => false,
        },
    }
}

/// Extends `earlier` so its end is the larger of the two ends.
pub(crate) fn extend<T: Ord + Clone>(earlier: &mut Interval<T>, later: &Interval<T>) {
    if cmp_end(later, earlier) == Ordering::Greater {
        earlier.end = later.end.clone();
        earlier.end_inclusive = later.end_inclusive;
    }
}

impl<T: fmt::Display> fmt::Display for Interval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.begin {
            Some(b) if self.begin_inclusive => write!(f, "[{b}")?,
            Some(b) => write!(f, "({b}")?,
            None => f.write_str("(-∞")?,
        }
        f.write_str(", ")?;
        match &self.end {
            Some(e) if self.end_inclusive => write!(f, "{e}]"),
            Some(e) => write!(f, "{e})"),
            None => f.write_str("+∞)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_respects_inclusivity() {
        let iv = Interval::closed_open(200, 300);
        assert!(iv.contains(&200));
        assert!(iv.contains(&299));
        assert!(!iv.contains(&300));
        assert!(!iv.contains(&199));

        assert!(Interval::greater_than(5).contains(&6));
        assert!(!Interval::greater_than(5).contains(&5));
        assert!(Interval::at_most(5).contains(&i64::MIN));
        assert!(Interval::<i64>::all().contains(&0));
    }

    #[test]
    fn emptiness() {
        assert!(!Interval::point(1).is_empty());
        assert!(Interval::closed_open(1, 1).is_empty());
        assert!(Interval::closed(2, 1).is_empty());
        assert!(!Interval::<i64>::less_than(0).is_empty());
    }

    #[test]
    fn unbounded_sides_are_never_inclusive() {
        let iv: Interval<i64> = Interval::new(None, true, None, true);
        assert!(!iv.begin_inclusive());
        assert!(!iv.end_inclusive());
    }

    #[test]
    fn pairwise_intersection() {
        let a = Interval::closed_open(0, 100);
        let b = Interval::closed(50, 150);
        assert_eq!(a.intersection(&b), Interval::closed_open(50, 100));

        assert!(!Interval::closed_open(0, 10).overlaps(&Interval::closed_open(10, 20)));
        assert!(Interval::closed(0, 10).overlaps(&Interval::closed_open(10, 20)));
    }

    #[test]
    fn bound_ordering() {
        assert_eq!(cmp_begin(&Interval::at_least(1), &Interval::greater_than(1)), Ordering::Less);
        assert_eq!(cmp_begin(&Interval::at_most(1), &Interval::at_least(-100)), Ordering::Less);
        assert_eq!(cmp_end(&Interval::at_most(1), &Interval::less_than(1)), Ordering::Greater);
        assert_eq!(cmp_end(&Interval::at_least(1), &Interval::at_most(100)), Ordering::Greater);
    }

    #[test]
    fn display() {
        assert_eq!(Interval::closed_open(200, 300).to_string(), "[200, 300)");
        assert_eq!(Interval::greater_than(5).to_string(), "(5, +∞)");
        assert_eq!(Interval::<i64>::all().to_string(), "(-∞, +∞)");
    }
}
