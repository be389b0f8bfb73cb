//! Animation splines.
//!
//! A [`Spline`] is an ordered set of [`Knot`]s with per-segment
//! interpolation and configurable extrapolation on both ends.

mod knot;
mod spline;

pub use knot::*;
pub use spline::*;
