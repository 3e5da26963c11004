//! Fixed-width shard intervals.

use crate::interval::Interval;

/// Maps integer keys onto consecutive half-open intervals of one width,
/// aligned to `base`: `[base + k·width, base + (k + 1)·width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalProvider {
    base: i64,
    width: i64,
}

impl IntervalProvider {
    /// Creates a provider. Returns `None` unless `width` is positive.
    pub fn new(base: i64, width: i64) -> Option<Self> {
        (width > 0).then_some(Self { base, width })
    }

    /// Alignment origin.
    pub fn base(&self) -> i64 {
        self.base
    }

    /// Interval width.
    pub fn width(&self) -> i64 {
        self.width
    }

    /// Begin of the interval owning `value`.
    pub fn begin_for(&self, value: i64) -> i64 {
        clamp(self.aligned_begin(i128::from(value)))
    }

    /// The interval owning `value`.
    pub fn interval_for(&self, value: i64) -> Interval<i64> {
        self.interval_wide(i128::from(value))
    }

    /// Returns true if `begin` is the begin of one of this provider's
    /// intervals.
    pub fn is_aligned(&self, begin: i64) -> bool {
        self.begin_for(begin) == begin
    }

    /// The interval `offset` widths away from `interval`.
    pub fn next_interval(&self, interval: &Interval<i64>, offset: i64) -> Interval<i64> {
        let begin = interval.begin().map_or(i128::from(i64::MIN), |b| i128::from(*b));
        let shifted = self.aligned_begin(begin) + i128::from(offset) * i128::from(self.width);
        self.interval_wide(shifted)
    }

    fn aligned_begin(&self, value: i128) -> i128 {
        let (base, width) = (i128::from(self.base), i128::from(self.width));
        base + (value - base).div_euclid(width) * width
    }

    // Intervals at either end of the key range are cut at i64::MIN / i64::MAX.
    fn interval_wide(&self, value: i128) -> Interval<i64> {
        let value = value.clamp(i128::from(i64::MIN), i128::from(i64::MAX));
        let begin = self.aligned_begin(value);
        match i64::try_from(begin + i128::from(self.width)) {
            Ok(end) => Interval::closed_open(clamp(begin), end),
            Err(_) => Interval::at_least(clamp(begin)),
        }
    }
}

fn clamp(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}
