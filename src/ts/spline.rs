//! Spline evaluation.
//!
//! Segments are right-continuous: evaluating exactly at a knot time uses the
//! segment that starts there, while the `Pre*` modes use the segment that
//! ends there. Outside the knot range the pre/post [`Extrapolation`] applies.

use super::{CurveType, Interpolation, Knot};
use crate::sdf::LayerOffset;

/// What to evaluate at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EvalMode {
    /// Left-hand limit of the value.
    PreValue,
    /// Value.
    Value,
    /// Left-hand limit of the first derivative.
    PreDerivative,
    /// First derivative.
    Derivative,
    /// Left-hand limit of the value with every segment treated as held.
    PreValueHeld,
    /// Value with every segment treated as held.
    Held,
}

impl EvalMode {
    /// Check if this mode evaluates a left-hand limit.
    #[inline]
    pub fn is_pre(&self) -> bool {
        matches!(self, Self::PreValue | Self::PreDerivative | Self::PreValueHeld)
    }

    /// Check if this mode evaluates a derivative.
    #[inline]
    pub fn is_derivative(&self) -> bool {
        matches!(self, Self::PreDerivative | Self::Derivative)
    }

    /// Check if this mode evaluates held values.
    #[inline]
    pub fn is_held(&self) -> bool {
        matches!(self, Self::PreValueHeld | Self::Held)
    }

    fn toggled_side(self) -> Self {
        match self {
            Self::PreValue => Self::Value,
            Self::Value => Self::PreValue,
            Self::PreDerivative => Self::Derivative,
            Self::Derivative => Self::PreDerivative,
            Self::PreValueHeld => Self::Held,
            Self::Held => Self::PreValueHeld,
        }
    }
}

/// Extrapolation behavior before the first or after the last knot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ExtrapolationMode {
    /// No value outside the knot range.
    ValueBlock,
    /// Hold the boundary value.
    #[default]
    Held,
    /// Continue with the boundary segment's slope.
    Linear,
    /// Continue with an explicit slope.
    Sloped,
    /// Repeat the knot range, offsetting each cycle by the range's value change.
    LoopRepeat,
    /// Repeat the knot range without offset.
    LoopReset,
    /// Alternate forward and mirrored copies of the knot range.
    LoopOscillate,
}

impl ExtrapolationMode {
    /// Check if this mode loops the knot range.
    #[inline]
    pub fn is_looping(&self) -> bool {
        matches!(self, Self::LoopRepeat | Self::LoopReset | Self::LoopOscillate)
    }
}

/// Extrapolation mode plus the slope used by [`ExtrapolationMode::Sloped`].
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Extrapolation {
    pub mode: ExtrapolationMode,
    pub slope: f64,
}

impl Extrapolation {
    /// Extrapolation with the given mode.
    pub const fn new(mode: ExtrapolationMode) -> Self {
        Self { mode, slope: 0.0 }
    }

    /// Sloped extrapolation.
    pub const fn sloped(slope: f64) -> Self {
        Self {
            mode: ExtrapolationMode::Sloped,
            slope,
        }
    }
}

/// A scalar animation curve.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Spline {
    curve_type: CurveType,
    knots: Vec<Knot>,
    pre_extrapolation: Extrapolation,
    post_extrapolation: Extrapolation,
}

#[derive(Clone, Copy, PartialEq)]
enum Side {
    Pre,
    Post,
}

impl Spline {
    /// Empty Bezier spline with held extrapolation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spline from knots (any order).
    pub fn from_knots(knots: impl IntoIterator<Item = Knot>) -> Self {
        let mut spline = Self::new();
        for knot in knots {
            spline.set_knot(knot);
        }
        spline
    }

    // ========================================================================
    // Knots and parameters
    // ========================================================================

    /// Insert a knot, replacing any knot at the same time.
    pub fn set_knot(&mut self, knot: Knot) {
        match self.knots.binary_search_by(|k| k.time.total_cmp(&knot.time)) {
            Ok(i) => self.knots[i] = knot,
            Err(i) => self.knots.insert(i, knot),
        }
    }

    /// Remove the knot at `time`, returning it.
    pub fn remove_knot(&mut self, time: f64) -> Option<Knot> {
        let i = self.knots.iter().position(|k| k.time == time)?;
        Some(self.knots.remove(i))
    }

    /// Knots in time order.
    #[inline]
    pub fn knots(&self) -> &[Knot] {
        &self.knots
    }

    /// Check if the spline has no knots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    /// Knot times in order.
    pub fn knot_times(&self) -> Vec<f64> {
        self.knots.iter().map(|k| k.time).collect()
    }

    #[inline]
    pub fn curve_type(&self) -> CurveType {
        self.curve_type
    }

    pub fn set_curve_type(&mut self, curve_type: CurveType) {
        self.curve_type = curve_type;
    }

    #[inline]
    pub fn pre_extrapolation(&self) -> Extrapolation {
        self.pre_extrapolation
    }

    #[inline]
    pub fn post_extrapolation(&self) -> Extrapolation {
        self.post_extrapolation
    }

    pub fn set_pre_extrapolation(&mut self, extrapolation: Extrapolation) {
        self.pre_extrapolation = extrapolation;
    }

    pub fn set_post_extrapolation(&mut self, extrapolation: Extrapolation) {
        self.post_extrapolation = extrapolation;
    }

    /// Check if evaluation can vary over time.
    pub fn is_time_varying(&self) -> bool {
        !self.knots.is_empty()
    }

    /// Copy of this spline with knot times mapped through `offset`.
    ///
    /// Tangent widths scale with time; slopes scale inversely.
    pub fn with_offset(&self, offset: &LayerOffset) -> Self {
        if offset.is_identity() {
            return self.clone();
        }
        let scale = offset.scale();
        let slope = |s: f64| if scale != 0.0 { s / scale } else { s };
        let mut mapped = self.clone();
        for knot in &mut mapped.knots {
            knot.time = offset.apply(knot.time);
            knot.pre_tangent.width *= scale.abs();
            knot.post_tangent.width *= scale.abs();
            knot.pre_tangent.slope = slope(knot.pre_tangent.slope);
            knot.post_tangent.slope = slope(knot.post_tangent.slope);
        }
        mapped.pre_extrapolation.slope = slope(mapped.pre_extrapolation.slope);
        mapped.post_extrapolation.slope = slope(mapped.post_extrapolation.slope);
        mapped.knots.sort_by(|a, b| a.time.total_cmp(&b.time));
        mapped
    }

    // ========================================================================
    // Evaluation entry points
    // ========================================================================

    /// Value at `time`.
    pub fn eval(&self, time: f64) -> Option<f64> {
        self.evaluate(time, EvalMode::Value)
    }

    /// Left-hand limit of the value at `time`.
    pub fn eval_pre_value(&self, time: f64) -> Option<f64> {
        self.evaluate(time, EvalMode::PreValue)
    }

    /// Derivative at `time`.
    pub fn eval_derivative(&self, time: f64) -> Option<f64> {
        self.evaluate(time, EvalMode::Derivative)
    }

    /// Left-hand limit of the derivative at `time`.
    pub fn eval_pre_derivative(&self, time: f64) -> Option<f64> {
        self.evaluate(time, EvalMode::PreDerivative)
    }

    /// Held value at `time`.
    pub fn eval_held(&self, time: f64) -> Option<f64> {
        self.evaluate(time, EvalMode::Held)
    }

    /// Left-hand limit of the held value at `time`.
    pub fn eval_pre_value_held(&self, time: f64) -> Option<f64> {
        self.evaluate(time, EvalMode::PreValueHeld)
    }

    /// Evaluate in any mode. `None` means the spline has no value there.
    pub fn evaluate(&self, time: f64, mode: EvalMode) -> Option<f64> {
        let first = self.knots.first()?;
        let last = self.knots.last()?;
        let pre = mode.is_pre();

        if time < first.time || (time == first.time && pre) {
            return self.extrapolate(Side::Pre, time, mode);
        }
        if time > last.time || (time == last.time && !pre) {
            return self.extrapolate(Side::Post, time, mode);
        }

        // pre modes take the segment ending at a knot time
        let index = if pre {
            self.knots.iter().rposition(|k| k.time < time)?
        } else {
            self.knots.iter().rposition(|k| k.time <= time)?
        };
        let next = self.knots.get(index + 1)?;
        self.eval_segment(&self.knots[index], next, time, mode)
    }

    // ========================================================================
    // Segments
    // ========================================================================

    fn eval_segment(&self, k0: &Knot, k1: &Knot, time: f64, mode: EvalMode) -> Option<f64> {
        match k0.next_interp {
            Interpolation::ValueBlock => None,
            _ if mode.is_held() => Some(k0.value),
            Interpolation::Held => Some(if mode.is_derivative() { 0.0 } else { k0.value }),
            Interpolation::Linear => {
                let slope = linear_slope(k0, k1);
                Some(if mode.is_derivative() {
                    slope
                } else {
                    k0.value + slope * (time - k0.time)
                })
            }
            Interpolation::Curve => Some(self.eval_curve(k0, k1, time, mode.is_derivative())),
        }
    }

    fn eval_curve(&self, k0: &Knot, k1: &Knot, time: f64, derivative: bool) -> f64 {
        let dt = k1.time - k0.time;
        let (mut w0, mut w1) = match self.curve_type {
            CurveType::Bezier => (k0.post_tangent.width.max(0.0), k1.pre_tangent.width.max(0.0)),
            CurveType::Hermite => (dt / 3.0, dt / 3.0),
        };
        if w0 + w1 > dt {
            let shrink = dt / (w0 + w1);
            w0 *= shrink;
            w1 *= shrink;
        }
        let (s0, s1) = (k0.post_tangent.slope, k1.pre_tangent.slope);
        let v1 = k1.left_value();
        let times = [k0.time, k0.time + w0, k1.time - w1, k1.time];
        let values = [k0.value, k0.value + w0 * s0, v1 - w1 * s1, v1];

        if time <= k0.time {
            return if derivative { s0 } else { k0.value };
        }
        if time >= k1.time {
            return if derivative { s1 } else { v1 };
        }

        let u = solve_bezier_param(&times, time);
        if !derivative {
            return bezier(&values, u);
        }
        let dtdu = bezier_derivative(&times, u);
        if dtdu.abs() < f64::MIN_POSITIVE {
            return if u < 0.5 { s0 } else { s1 };
        }
        bezier_derivative(&values, u) / dtdu
    }

    // ========================================================================
    // Extrapolation
    // ========================================================================

    fn extrapolate(&self, side: Side, time: f64, mode: EvalMode) -> Option<f64> {
        let extrapolation = match side {
            Side::Pre => self.pre_extrapolation,
            Side::Post => self.post_extrapolation,
        };
        if extrapolation.mode.is_looping() && self.knots.len() > 1 {
            return self.eval_looped(extrapolation.mode, time, mode);
        }

        let (first, last) = (self.knots.first()?, self.knots.last()?);
        let (anchor_time, anchor_value) = match side {
            Side::Pre => (first.time, first.left_value()),
            Side::Post => (last.time, last.value),
        };
        let slope = match extrapolation.mode {
            ExtrapolationMode::ValueBlock => return None,
            ExtrapolationMode::Linear => self.boundary_slope(side),
            ExtrapolationMode::Sloped => extrapolation.slope,
            _ => 0.0,
        };
        Some(if mode.is_held() {
            anchor_value
        } else if mode.is_derivative() {
            slope
        } else {
            anchor_value + slope * (time - anchor_time)
        })
    }

    /// Slope continuing the boundary segment. Zero for blocked or held
    /// segments and for single-knot splines.
    fn boundary_slope(&self, side: Side) -> f64 {
        let n = self.knots.len();
        if n < 2 {
            return 0.0;
        }
        let (k0, k1) = match side {
            Side::Pre => (&self.knots[0], &self.knots[1]),
            Side::Post => (&self.knots[n - 2], &self.knots[n - 1]),
        };
        match k0.next_interp {
            Interpolation::ValueBlock | Interpolation::Held => 0.0,
            Interpolation::Linear => linear_slope(k0, k1),
            Interpolation::Curve => match side {
                Side::Pre => k0.pre_tangent.slope,
                Side::Post => k1.post_tangent.slope,
            },
        }
    }

    fn eval_looped(&self, extrap: ExtrapolationMode, time: f64, mode: EvalMode) -> Option<f64> {
        let (first, last) = (self.knots.first()?, self.knots.last()?);
        let period = last.time - first.time;
        if period <= 0.0 {
            return None;
        }
        let mut cycle = ((time - first.time) / period).floor();
        let mut local = time - cycle * period;
        let mut mode = mode;
        if mode.is_pre() && local <= first.time {
            local = last.time;
            cycle -= 1.0;
        }

        let mut sign = 1.0;
        if extrap == ExtrapolationMode::LoopOscillate && (cycle as i64).rem_euclid(2) == 1 {
            local = first.time + (last.time - local);
            mode = mode.toggled_side();
            sign = -1.0;
            if local >= last.time && !mode.is_pre() {
                mode = mode.toggled_side();
            } else if local <= first.time && mode.is_pre() {
                mode = mode.toggled_side();
            }
        }

        let value = self.evaluate_inside(local, mode)?;
        Some(match (extrap, mode.is_derivative()) {
            (ExtrapolationMode::LoopRepeat, false) => value + cycle * (last.value - first.value),
            (_, true) => value * sign,
            _ => value,
        })
    }

    /// Evaluate at a time known to lie within the knot range.
    fn evaluate_inside(&self, time: f64, mode: EvalMode) -> Option<f64> {
        let last = self.knots.last()?;
        if time >= last.time && !mode.is_pre() {
            // end of the loop range continues from the last segment
            return self.evaluate(time, mode.toggled_side());
        }
        self.evaluate(time, mode)
    }
}

fn linear_slope(k0: &Knot, k1: &Knot) -> f64 {
    let dt = k1.time - k0.time;
    if dt <= 0.0 {
        0.0
    } else {
        (k1.left_value() - k0.value) / dt
    }
}

fn bezier(p: &[f64; 4], u: f64) -> f64 {
    let v = 1.0 - u;
    p[0] * v * v * v + 3.0 * p[1] * u * v * v + 3.0 * p[2] * u * u * v + p[3] * u * u * u
}

fn bezier_derivative(p: &[f64; 4], u: f64) -> f64 {
    let v = 1.0 - u;
    3.0 * ((p[1] - p[0]) * v * v + 2.0 * (p[2] - p[1]) * u * v + (p[3] - p[2]) * u * u)
}

/// Find `u` with `bezier(times, u) == time`; `times` is monotonic.
fn solve_bezier_param(times: &[f64; 4], time: f64) -> f64 {
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    for _ in 0..80 {
        let mid = 0.5 * (lo + hi);
        if bezier(times, mid) < time {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    type Row = (f64, Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>);

    fn close(a: Option<f64>, b: Option<f64>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => (a - b).abs() < 1e-9,
            (None, None) => true,
            _ => false,
        }
    }

    fn check(spline: &Spline, rows: &[Row]) {
        for &(t, pv, v, pd, d, ph, h) in rows {
            let got = [
                spline.eval_pre_value(t),
                spline.eval(t),
                spline.eval_pre_derivative(t),
                spline.eval_derivative(t),
                spline.eval_pre_value_held(t),
                spline.eval_held(t),
            ];
            let want = [pv, v, pd, d, ph, h];
            for (i, (g, w)) in got.iter().zip(want.iter()).enumerate() {
                assert!(close(*g, *w), "t={t} column {i}: got {g:?}, want {w:?}");
            }
        }
    }

    #[test]
    fn test_value_blocked_segments() {
        let mut spline = Spline::from_knots([
            Knot::new(1.0, 1.0).with_interp(Interpolation::Linear),
            Knot::new(2.0, 2.0).with_interp(Interpolation::ValueBlock),
            Knot::new(3.0, 3.0).with_interp(Interpolation::Held),
            Knot::new(4.0, 4.0).with_interp(Interpolation::Held),
        ]);
        spline.set_pre_extrapolation(Extrapolation::new(ExtrapolationMode::ValueBlock));
        spline.set_post_extrapolation(Extrapolation::new(ExtrapolationMode::ValueBlock));

        check(
            &spline,
            &[
                (0.0, None, None, None, None, None, None),
                (1.0, None, Some(1.0), None, Some(1.0), None, Some(1.0)),
                (1.5, Some(1.5), Some(1.5), Some(1.0), Some(1.0), Some(1.0), Some(1.0)),
                (2.0, Some(2.0), None, Some(1.0), None, Some(1.0), None),
                (2.5, None, None, None, None, None, None),
                (3.0, None, Some(3.0), None, Some(0.0), None, Some(3.0)),
                (3.5, Some(3.0), Some(3.0), Some(0.0), Some(0.0), Some(3.0), Some(3.0)),
                (4.0, Some(3.0), None, Some(0.0), None, Some(3.0), None),
                (5.0, None, None, None, None, None, None),
            ],
        );
    }

    #[test]
    fn test_linear_extrapolation_slope_zero_next_to_blocks() {
        let mut spline = Spline::from_knots([
            Knot::new(1.0, 1.0)
                .with_interp(Interpolation::ValueBlock)
                .with_post_tangent(0.0, -1.0),
            Knot::new(2.0, 2.0).with_interp(Interpolation::Linear),
            Knot::new(3.0, 3.0).with_interp(Interpolation::ValueBlock),
            Knot::new(4.0, 4.0)
                .with_interp(Interpolation::Held)
                .with_pre_tangent(0.0, -1.0),
        ]);
        spline.set_pre_extrapolation(Extrapolation::new(ExtrapolationMode::Linear));
        spline.set_post_extrapolation(Extrapolation::new(ExtrapolationMode::Linear));

        check(
            &spline,
            &[
                (0.0, Some(1.0), Some(1.0), Some(0.0), Some(0.0), Some(1.0), Some(1.0)),
                (1.0, Some(1.0), None, Some(0.0), None, Some(1.0), None),
                (1.5, None, None, None, None, None, None),
                (2.0, None, Some(2.0), None, Some(1.0), None, Some(2.0)),
                (2.5, Some(2.5), Some(2.5), Some(1.0), Some(1.0), Some(2.0), Some(2.0)),
                (3.0, Some(3.0), None, Some(1.0), None, Some(2.0), None),
                (3.5, None, None, None, None, None, None),
                (4.0, None, Some(4.0), None, Some(0.0), None, Some(4.0)),
                (5.0, Some(4.0), Some(4.0), Some(0.0), Some(0.0), Some(4.0), Some(4.0)),
            ],
        );
    }

    fn mixed_spline() -> Spline {
        Spline::from_knots([
            Knot::new(0.0, 10.0)
                .with_interp(Interpolation::Held)
                .with_pre_value(5.0)
                .with_pre_tangent(1.0, 1.0)
                .with_post_tangent(1.0, -1.0),
            Knot::new(4.0, 6.0)
                .with_interp(Interpolation::ValueBlock)
                .with_pre_value(3.0)
                .with_pre_tangent(1.0, 1.0)
                .with_post_tangent(1.0, -1.0),
            Knot::new(8.0, 8.0)
                .with_interp(Interpolation::Linear)
                .with_pre_value(8.0)
                .with_pre_tangent(1.0, 1.0)
                .with_post_tangent(1.0, -2.0),
            Knot::new(12.0, 4.0)
                .with_interp(Interpolation::Curve)
                .with_pre_value(0.0)
                .with_pre_tangent(1.0, 1.0)
                .with_post_tangent(2.0, 1.0),
            Knot::new(16.0, 10.0)
                .with_interp(Interpolation::Linear)
                .with_pre_value(8.0)
                .with_pre_tangent(2.0, 0.0)
                .with_post_tangent(1.0, -1.0),
        ])
    }

    const NON_CURVED: &[Row] = &[
        (0.0, Some(5.0), Some(10.0), Some(0.0), Some(0.0), Some(5.0), Some(10.0)),
        (2.0, Some(10.0), Some(10.0), Some(0.0), Some(0.0), Some(10.0), Some(10.0)),
        (4.0, Some(10.0), None, Some(0.0), None, Some(10.0), None),
        (6.0, None, None, None, None, None, None),
        (8.0, None, Some(8.0), None, Some(-2.0), None, Some(8.0)),
        (10.0, Some(4.0), Some(4.0), Some(-2.0), Some(-2.0), Some(8.0), Some(8.0)),
        (12.0, Some(0.0), Some(4.0), Some(-2.0), Some(1.0), Some(8.0), Some(4.0)),
    ];

    #[test]
    fn test_bezier_segment() {
        let spline = mixed_spline();
        assert_eq!(spline.curve_type(), CurveType::Bezier);
        check(&spline, NON_CURVED);
        check(
            &spline,
            &[
                (13.0, Some(5.195309037843946), Some(5.195309037843946),
                 Some(1.4154939577019203), Some(1.4154939577019203), Some(4.0), Some(4.0)),
                (14.0, Some(6.75), Some(6.75), Some(1.5), Some(1.5), Some(4.0), Some(4.0)),
                (15.0, Some(7.771738865743875), Some(7.771738865743875),
                 Some(0.5358790778895212), Some(0.5358790778895212), Some(4.0), Some(4.0)),
                (16.0, Some(8.0), Some(10.0), Some(0.0), Some(0.0), Some(4.0), Some(10.0)),
            ],
        );
    }

    #[test]
    fn test_hermite_segment() {
        let mut spline = mixed_spline();
        spline.set_curve_type(CurveType::Hermite);
        check(&spline, NON_CURVED);
        check(
            &spline,
            &[
                (13.0, Some(5.1875), Some(5.1875), Some(1.3125), Some(1.3125), Some(4.0), Some(4.0)),
                (14.0, Some(6.5), Some(6.5), Some(1.25), Some(1.25), Some(4.0), Some(4.0)),
                (15.0, Some(7.5625), Some(7.5625), Some(0.8125), Some(0.8125), Some(4.0), Some(4.0)),
                (16.0, Some(8.0), Some(10.0), Some(0.0), Some(0.0), Some(4.0), Some(10.0)),
            ],
        );
    }

    #[test]
    fn test_loop_extrapolation() {
        let mut spline = Spline::from_knots([
            Knot::new(0.0, 0.0).with_interp(Interpolation::Linear),
            Knot::new(10.0, 5.0).with_interp(Interpolation::Linear),
        ]);
        spline.set_post_extrapolation(Extrapolation::new(ExtrapolationMode::LoopRepeat));
        assert!(close(spline.eval(12.0), Some(6.0)));
        assert!(close(spline.eval(20.0), Some(10.0)));

        spline.set_post_extrapolation(Extrapolation::new(ExtrapolationMode::LoopReset));
        assert!(close(spline.eval(12.0), Some(1.0)));
        assert!(close(spline.eval_pre_value(20.0), Some(5.0)));

        spline.set_post_extrapolation(Extrapolation::new(ExtrapolationMode::LoopOscillate));
        assert!(close(spline.eval(12.0), Some(4.0)));
        assert!(close(spline.eval_derivative(12.0), Some(-0.5)));
    }

    #[test]
    fn test_sloped_and_offset() {
        let mut spline = Spline::from_knots([Knot::new(1.0, 2.0)]);
        spline.set_post_extrapolation(Extrapolation::sloped(2.0));
        assert!(close(spline.eval(3.0), Some(6.0)));
        assert!(close(spline.eval(0.0), Some(2.0)));

        let offset = LayerOffset::new(5.0, 2.0);
        let moved = spline.with_offset(&offset);
        assert_eq!(moved.knot_times(), vec![7.0]);
        assert!(close(moved.eval(offset.apply(3.0)), spline.eval(3.0)));
    }

    #[test]
    fn test_empty_spline_has_no_value() {
        let spline = Spline::new();
        assert!(spline.is_empty());
        assert_eq!(spline.eval(0.0), None);
        assert!(!spline.is_time_varying());
    }
}
