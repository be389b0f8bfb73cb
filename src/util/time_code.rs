//! Time ordinates for value queries.

use std::cmp::Ordering;
use std::fmt;

/// A time at which to evaluate an attribute.
///
/// The `Default` time (NaN internally) addresses the non-animated default
/// value and sorts before every numeric time. A pre-time `t` asks for the
/// left-hand limit approaching `t` and sorts just before `t`.
#[derive(Clone, Copy)]
pub struct TimeCode {
    value: f64,
    pre_time: bool,
}

impl TimeCode {
    /// A numeric time.
    #[inline]
    pub const fn new(value: f64) -> Self {
        Self { value, pre_time: false }
    }

    /// The default time.
    #[inline]
    pub const fn default_time() -> Self {
        Self {
            value: f64::NAN,
            pre_time: false,
        }
    }

    /// The earliest representable time.
    #[inline]
    pub const fn earliest_time() -> Self {
        Self::new(f64::MIN)
    }

    /// Left-hand limit approaching `value`.
    #[inline]
    pub const fn pre_time(value: f64) -> Self {
        Self { value, pre_time: true }
    }

    /// Smallest step that stays distinguishable for times up to
    /// `max_value` scaled by up to `max_compression`.
    #[inline]
    pub fn safe_step(max_value: f64, max_compression: f64) -> f64 {
        f64::EPSILON * max_value * max_compression * 2.0
    }

    /// Safe step for typical production ranges (1e6 frames, 10x compression).
    #[inline]
    pub fn default_safe_step() -> f64 {
        Self::safe_step(1.0e6, 10.0)
    }

    /// Check if this is the default time.
    #[inline]
    pub fn is_default(&self) -> bool {
        self.value.is_nan()
    }

    /// Check if this is the earliest time.
    #[inline]
    pub fn is_earliest_time(&self) -> bool {
        self.value == f64::MIN
    }

    /// Check if this is a pre-time query.
    #[inline]
    pub fn is_pre_time(&self) -> bool {
        self.pre_time && !self.is_default()
    }

    /// Check if this is a numeric time.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        !self.is_default()
    }

    /// Numeric time value (NaN for default).
    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Same pre-time flag at a different time value.
    #[inline]
    pub fn with_value(&self, value: f64) -> Self {
        Self {
            value,
            pre_time: self.pre_time,
        }
    }

    fn sort_key(&self) -> (bool, f64, bool) {
        (!self.is_default(), if self.is_default() { 0.0 } else { self.value }, !self.is_pre_time())
    }
}

impl Default for TimeCode {
    fn default() -> Self {
        Self::default_time()
    }
}

impl From<f64> for TimeCode {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl PartialEq for TimeCode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeCode {}

impl PartialOrd for TimeCode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeCode {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a0, a1, a2) = self.sort_key();
        let (b0, b1, b2) = other.sort_key();
        a0.cmp(&b0).then(a1.total_cmp(&b1)).then(a2.cmp(&b2))
    }
}

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            f.write_str("DEFAULT")
        } else if self.is_pre_time() {
            write!(f, "PRE_TIME {}", self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}

impl fmt::Debug for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeCode({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sorts_first() {
        let d = TimeCode::default_time();
        assert!(d < TimeCode::earliest_time());
        assert!(d < TimeCode::new(-1.0e9));
        assert_eq!(d, TimeCode::default());
        assert!(d.is_default());
    }

    #[test]
    fn test_pre_time_ordering() {
        assert!(TimeCode::pre_time(2.0) < TimeCode::new(2.0));
        assert!(TimeCode::new(1.999) < TimeCode::pre_time(2.0));
        assert_ne!(TimeCode::pre_time(2.0), TimeCode::new(2.0));
        assert!(TimeCode::pre_time(2.0).is_pre_time());
    }

    #[test]
    fn test_with_value_keeps_pre_time_flag() {
        let moved = TimeCode::pre_time(2.0).with_value(5.0);
        assert_eq!(moved, TimeCode::pre_time(5.0));
        assert_eq!(moved.value(), 5.0);
        assert!(!TimeCode::new(2.0).with_value(5.0).is_pre_time());
    }

    #[test]
    fn test_safe_step_survives_offset() {
        let step = TimeCode::default_safe_step();
        for base in [0.0, 1.0, 1000.0, 1.0e6] {
            let a = base + 1.0e6;
            let b = base + step + 1.0e6;
            assert_ne!(a, b, "step lost at base {base}");
            // compressed by the maximum factor
            assert_ne!(a * 10.0, b * 10.0);
        }
    }
}
