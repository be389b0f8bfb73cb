//! Spline knots.

/// Interpolation used for the segment that starts at a knot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Interpolation {
    /// Segment has no value.
    ValueBlock,
    /// Value holds flat until the next knot.
    Held,
    /// Straight line to the next knot.
    Linear,
    /// Cubic curve shaped by the knot tangents.
    #[default]
    Curve,
}

impl Interpolation {
    /// Check if this segment is value blocked.
    #[inline]
    pub fn is_value_block(&self) -> bool {
        matches!(self, Self::ValueBlock)
    }
}

/// Cubic form used for curved segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CurveType {
    /// Tangent widths shape the curve.
    #[default]
    Bezier,
    /// Tangent widths are ignored; slopes only.
    Hermite,
}

/// One side of a knot's tangent.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Tangent {
    /// Width in time units.
    pub width: f64,
    /// Slope in value per time unit.
    pub slope: f64,
}

impl Tangent {
    /// Create a tangent.
    pub const fn new(width: f64, slope: f64) -> Self {
        Self { width, slope }
    }
}

/// A spline control point.
///
/// A knot may be dual-valued: `pre_value` is the limit approaching from the
/// left, `value` applies at and after the knot.
#[derive(Clone, Debug, PartialEq)]
pub struct Knot {
    pub time: f64,
    pub value: f64,
    pub pre_value: Option<f64>,
    pub next_interp: Interpolation,
    pub pre_tangent: Tangent,
    pub post_tangent: Tangent,
}

impl Knot {
    /// Create a knot with curve interpolation and flat zero-width tangents.
    pub fn new(time: f64, value: f64) -> Self {
        Self {
            time,
            value,
            pre_value: None,
            next_interp: Interpolation::Curve,
            pre_tangent: Tangent::default(),
            post_tangent: Tangent::default(),
        }
    }

    /// Builder: set the next-segment interpolation.
    pub fn with_interp(mut self, interp: Interpolation) -> Self {
        self.next_interp = interp;
        self
    }

    /// Builder: make the knot dual-valued.
    pub fn with_pre_value(mut self, pre_value: f64) -> Self {
        self.pre_value = Some(pre_value);
        self
    }

    /// Builder: set the pre-tangent.
    pub fn with_pre_tangent(mut self, width: f64, slope: f64) -> Self {
        self.pre_tangent = Tangent::new(width, slope);
        self
    }

    /// Builder: set the post-tangent.
    pub fn with_post_tangent(mut self, width: f64, slope: f64) -> Self {
        self.post_tangent = Tangent::new(width, slope);
        self
    }

    /// Check if the knot has a separate pre-value.
    #[inline]
    pub fn is_dual_valued(&self) -> bool {
        self.pre_value.is_some()
    }

    /// Value approaching from the left.
    #[inline]
    pub fn left_value(&self) -> f64 {
        self.pre_value.unwrap_or(self.value)
    }
}
