//! Layer offsets and reference/payload arcs.

use std::fmt;

use crate::util::Path;

/// Affine time mapping `t -> t * scale + offset`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerOffset {
    offset: f64,
    scale: f64,
}

impl Default for LayerOffset {
    fn default() -> Self {
        Self::identity()
    }
}

impl LayerOffset {
    /// Create an offset.
    #[inline]
    pub const fn new(offset: f64, scale: f64) -> Self {
        Self { offset, scale }
    }

    /// The identity mapping.
    #[inline]
    pub const fn identity() -> Self {
        Self::new(0.0, 1.0)
    }

    #[inline]
    pub fn offset(&self) -> f64 {
        self.offset
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Check if this is the identity mapping.
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.offset == 0.0 && self.scale == 1.0
    }

    /// Check that both terms are finite and the scale is non-zero.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.offset.is_finite() && self.scale.is_finite() && self.scale != 0.0
    }

    /// Map a time forward.
    #[inline]
    pub fn apply(&self, time: f64) -> f64 {
        time * self.scale + self.offset
    }

    /// Map a time backward.
    #[inline]
    pub fn apply_inverse(&self, time: f64) -> f64 {
        (time - self.offset) / self.scale
    }

    /// The inverse mapping. Identity if this offset is not invertible.
    pub fn inverse(&self) -> Self {
        if self.is_identity() || !self.is_valid() {
            return Self::identity();
        }
        Self::new(-self.offset / self.scale, 1.0 / self.scale)
    }

    /// `self ∘ inner`: apply `inner`, then `self`.
    pub fn compose(&self, inner: &LayerOffset) -> Self {
        Self::new(self.scale * inner.offset + self.offset, self.scale * inner.scale)
    }
}

impl fmt::Display for LayerOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(offset={}, scale={})", self.offset, self.scale)
    }
}

/// A reference or payload arc: an external (or internal) prim to compose.
///
/// An empty `asset_path` targets the referencing layer stack itself; an
/// empty `prim_path` targets the target layer's default prim.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Reference {
    pub asset_path: String,
    pub prim_path: Path,
    pub layer_offset: LayerOffset,
}

/// Payloads share the reference layout.
pub type Payload = Reference;

impl Reference {
    /// Reference to `prim_path` in `asset_path`.
    pub fn new(asset_path: impl Into<String>, prim_path: Path) -> Self {
        Self {
            asset_path: asset_path.into(),
            prim_path,
            layer_offset: LayerOffset::identity(),
        }
    }

    /// Internal reference to `prim_path` in the same layer stack.
    pub fn internal(prim_path: Path) -> Self {
        Self::new(String::new(), prim_path)
    }

    /// Builder: set the layer offset.
    pub fn with_offset(mut self, offset: LayerOffset) -> Self {
        self.layer_offset = offset;
        self
    }

    /// Check if this targets the referencing layer stack.
    #[inline]
    pub fn is_internal(&self) -> bool {
        self.asset_path.is_empty()
    }

    /// Copy with a different target prim path.
    pub fn with_prim_path(&self, prim_path: Path) -> Self {
        Self {
            prim_path,
            ..self.clone()
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.asset_path.is_empty() {
            write!(f, "@{}@", self.asset_path)?;
        }
        if !self.prim_path.is_empty() {
            write!(f, "<{}>", self.prim_path)?;
        }
        if !self.layer_offset.is_identity() {
            write!(f, " {}", self.layer_offset)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_apply_and_inverse() {
        let o = LayerOffset::new(10.0, 2.0);
        assert_eq!(o.apply(1.0), 12.0);
        assert_eq!(o.apply_inverse(12.0), 1.0);
        assert_eq!(o.inverse().apply(12.0), 1.0);
        assert!(LayerOffset::identity().is_identity());
        assert!(!LayerOffset::new(0.0, 0.0).is_valid());
    }

    #[test]
    fn test_offset_compose() {
        let outer = LayerOffset::new(10.0, 2.0);
        let inner = LayerOffset::new(3.0, 0.5);
        let both = outer.compose(&inner);
        for t in [-4.0, 0.0, 1.5, 100.0] {
            assert_eq!(both.apply(t), outer.apply(inner.apply(t)));
        }
    }

    #[test]
    fn test_reference_display() {
        let r = Reference::new("model.usda", Path::parse("/Model").expect("path"));
        assert_eq!(r.to_string(), "@model.usda@</Model>");
        let internal = Reference::internal(Path::parse("/Class").expect("path"));
        assert!(internal.is_internal());
        assert_eq!(internal.to_string(), "</Class>");
    }
}
