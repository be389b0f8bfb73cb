//! Time sample lookup and interpolation.

use crate::sdf::TimeSamples;
use crate::util::{InterpolationType, Value};

/// Value of `samples` at layer time `time`.
///
/// Before the first sample and after the last one the boundary sample is
/// held. With `pre_time` the left-hand limit approaching `time` is
/// returned. A blocked sample yields `None`; a blocked upper neighbour
/// holds the lower sample.
pub(crate) fn sample_at(
    samples: &TimeSamples,
    time: f64,
    pre_time: bool,
    interpolation: InterpolationType,
) -> Option<Value> {
    let Some(lo) = samples.floor_index(time, pre_time) else {
        let (_, first) = samples.at(0)?;
        return unblocked(first);
    };
    let (lo_time, lo_value) = samples.at(lo)?;
    if lo_time == time {
        return unblocked(lo_value);
    }
    let Some((hi_time, hi_value)) = samples.at(lo + 1) else {
        return unblocked(lo_value);
    };
    if lo_value.is_value_block() {
        return None;
    }
    if interpolation.is_held() || hi_value.is_value_block() || !lo_value.is_interpolatable() {
        return Some(lo_value.clone());
    }
    let alpha = (time - lo_time) / (hi_time - lo_time);
    Some(Value::lerp(lo_value, hi_value, alpha).unwrap_or_else(|| lo_value.clone()))
}

fn unblocked(value: &Value) -> Option<Value> {
    (!value.is_value_block()).then(|| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> TimeSamples {
        TimeSamples::from_pairs([
            (0.0, Value::Double(0.0)),
            (10.0, Value::Double(100.0)),
            (20.0, Value::ValueBlock),
            (30.0, Value::Double(300.0)),
        ])
    }

    #[test]
    fn test_linear_and_held() {
        let s = samples();
        assert_eq!(sample_at(&s, 5.0, false, InterpolationType::Linear), Some(Value::Double(50.0)));
        assert_eq!(sample_at(&s, 5.0, false, InterpolationType::Held), Some(Value::Double(0.0)));
        assert_eq!(sample_at(&s, -5.0, false, InterpolationType::Linear), Some(Value::Double(0.0)));
        assert_eq!(sample_at(&s, 50.0, false, InterpolationType::Linear), Some(Value::Double(300.0)));
    }

    #[test]
    fn test_blocked_samples() {
        let s = samples();
        // upper neighbour blocked: hold
        assert_eq!(sample_at(&s, 15.0, false, InterpolationType::Linear), Some(Value::Double(100.0)));
        assert_eq!(sample_at(&s, 20.0, false, InterpolationType::Linear), None);
        assert_eq!(sample_at(&s, 25.0, false, InterpolationType::Linear), None);
    }

    #[test]
    fn test_pre_time_is_left_limit() {
        let s = samples();
        assert_eq!(sample_at(&s, 10.0, true, InterpolationType::Linear), Some(Value::Double(100.0)));
        assert_eq!(sample_at(&s, 10.0, true, InterpolationType::Held), Some(Value::Double(0.0)));
        assert_eq!(sample_at(&s, 30.0, true, InterpolationType::Linear), None);
        assert_eq!(sample_at(&s, 0.0, true, InterpolationType::Linear), Some(Value::Double(0.0)));
    }

    #[test]
    fn test_non_interpolatable_holds() {
        let s = TimeSamples::from_pairs([(0.0, Value::Int(1)), (10.0, Value::Int(2))]);
        assert_eq!(sample_at(&s, 9.0, false, InterpolationType::Linear), Some(Value::Int(1)));
    }
}
