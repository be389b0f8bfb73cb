//! Attribute and metadata values.

use glam::{DVec3, Vec3};
use half::f16;
use std::collections::BTreeMap;
use std::fmt;

/// A typed value stored in a layer field.
///
/// `ValueBlock` and `AnimationBlock` are sentinels: the first blocks every
/// weaker opinion for an attribute, the second blocks only time-varying ones.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Int64(i64),
    /// Half precision float.
    Half(f16),
    /// Single precision float.
    Float(f32),
    /// Double precision float.
    Double(f64),
    /// String value.
    String(String),
    /// Token (interned identifier string).
    Token(String),
    /// Asset path.
    Asset(String),
    /// Single precision 3-vector.
    Float3(Vec3),
    /// Double precision 3-vector.
    Double3(DVec3),
    /// Array of integers.
    IntArray(Vec<i32>),
    /// Array of floats.
    FloatArray(Vec<f32>),
    /// Array of doubles.
    DoubleArray(Vec<f64>),
    /// Array of strings.
    StringArray(Vec<String>),
    /// Array of tokens.
    TokenArray(Vec<String>),
    /// Array of single precision 3-vectors.
    Float3Array(Vec<Vec3>),
    /// Array of double precision 3-vectors.
    Double3Array(Vec<DVec3>),
    /// Nested dictionary.
    Dictionary(BTreeMap<String, Value>),
    /// Blocks all weaker opinions.
    ValueBlock,
    /// Blocks weaker time samples and splines only.
    AnimationBlock,
}

impl Value {
    /// Type name, following scene description spelling.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Int64(_) => "int64",
            Self::Half(_) => "half",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Token(_) => "token",
            Self::Asset(_) => "asset",
            Self::Float3(_) => "float3",
            Self::Double3(_) => "double3",
            Self::IntArray(_) => "int[]",
            Self::FloatArray(_) => "float[]",
            Self::DoubleArray(_) => "double[]",
            Self::StringArray(_) => "string[]",
            Self::TokenArray(_) => "token[]",
            Self::Float3Array(_) => "float3[]",
            Self::Double3Array(_) => "double3[]",
            Self::Dictionary(_) => "dictionary",
            Self::ValueBlock => "ValueBlock",
            Self::AnimationBlock => "AnimationBlock",
        }
    }

    /// Check if this is the value block sentinel.
    #[inline]
    pub fn is_value_block(&self) -> bool {
        matches!(self, Self::ValueBlock)
    }

    /// Check if this is the animation block sentinel.
    #[inline]
    pub fn is_animation_block(&self) -> bool {
        matches!(self, Self::AnimationBlock)
    }

    /// Check if values of this type interpolate linearly between samples.
    pub fn is_interpolatable(&self) -> bool {
        matches!(
            self,
            Self::Half(_)
                | Self::Float(_)
                | Self::Double(_)
                | Self::Float3(_)
                | Self::Double3(_)
                | Self::FloatArray(_)
                | Self::DoubleArray(_)
                | Self::Float3Array(_)
                | Self::Double3Array(_)
        )
    }

    /// Array length, `None` for scalars.
    pub fn array_len(&self) -> Option<usize> {
        match self {
            Self::IntArray(v) => Some(v.len()),
            Self::FloatArray(v) => Some(v.len()),
            Self::DoubleArray(v) => Some(v.len()),
            Self::StringArray(v) | Self::TokenArray(v) => Some(v.len()),
            Self::Float3Array(v) => Some(v.len()),
            Self::Double3Array(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Linear interpolation `a + (b - a) * alpha`.
    ///
    /// Returns `None` when the pair cannot be interpolated (different types,
    /// non-floating types, or arrays of different length).
    pub fn lerp(a: &Value, b: &Value, alpha: f64) -> Option<Value> {
        let mix = |x: f64, y: f64| x + (y - x) * alpha;
        match (a, b) {
            (Self::Half(x), Self::Half(y)) => {
                Some(Self::Half(f16::from_f64(mix(x.to_f64(), y.to_f64()))))
            }
            (Self::Float(x), Self::Float(y)) => Some(Self::Float(mix(*x as f64, *y as f64) as f32)),
            (Self::Double(x), Self::Double(y)) => Some(Self::Double(mix(*x, *y))),
            (Self::Float3(x), Self::Float3(y)) => Some(Self::Float3(x.lerp(*y, alpha as f32))),
            (Self::Double3(x), Self::Double3(y)) => Some(Self::Double3(x.lerp(*y, alpha))),
            (Self::FloatArray(x), Self::FloatArray(y)) if x.len() == y.len() => Some(Self::FloatArray(
                x.iter()
                    .zip(y)
                    .map(|(x, y)| mix(*x as f64, *y as f64) as f32)
                    .collect(),
            )),
            (Self::DoubleArray(x), Self::DoubleArray(y)) if x.len() == y.len() => Some(
                Self::DoubleArray(x.iter().zip(y).map(|(x, y)| mix(*x, *y)).collect()),
            ),
            (Self::Float3Array(x), Self::Float3Array(y)) if x.len() == y.len() => Some(
                Self::Float3Array(x.iter().zip(y).map(|(x, y)| x.lerp(*y, alpha as f32)).collect()),
            ),
            (Self::Double3Array(x), Self::Double3Array(y)) if x.len() == y.len() => Some(
                Self::Double3Array(x.iter().zip(y).map(|(x, y)| x.lerp(*y, alpha)).collect()),
            ),
            _ => None,
        }
    }

    /// Scalar numeric value as `f64`, if this is a numeric scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            Self::Half(v) => Some(v.to_f64()),
            Self::Float(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as string slice for string-like values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Token(s) | Self::Asset(s) => Some(s),
            _ => None,
        }
    }

    /// Get as bool if possible.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as double 3-vector if possible.
    pub fn as_dvec3(&self) -> Option<DVec3> {
        match self {
            Self::Double3(v) => Some(*v),
            Self::Float3(v) => Some(v.as_dvec3()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Half(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Token(v) => f.write_str(v),
            Self::Asset(v) => write!(f, "@{v}@"),
            Self::Float3(v) => write!(f, "({}, {}, {})", v.x, v.y, v.z),
            Self::Double3(v) => write!(f, "({}, {}, {})", v.x, v.y, v.z),
            Self::ValueBlock | Self::AnimationBlock => f.write_str(self.type_name()),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

macro_rules! impl_from {
    ($t:ty => $variant:ident) => {
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Self::$variant(v)
            }
        }
    };
}

impl_from!(bool => Bool);
impl_from!(i32 => Int);
impl_from!(i64 => Int64);
impl_from!(f16 => Half);
impl_from!(f32 => Float);
impl_from!(f64 => Double);
impl_from!(String => String);
impl_from!(Vec3 => Float3);
impl_from!(DVec3 => Double3);
impl_from!(Vec<i32> => IntArray);
impl_from!(Vec<f32> => FloatArray);
impl_from!(Vec<f64> => DoubleArray);
impl_from!(Vec<Vec3> => Float3Array);
impl_from!(Vec<DVec3> => Double3Array);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp_scalars_and_vectors() {
        assert_eq!(Value::lerp(&Value::Double(1.0), &Value::Double(3.0), 0.5), Some(Value::Double(2.0)));
        assert_eq!(Value::lerp(&Value::Float(0.0), &Value::Float(4.0), 0.25), Some(Value::Float(1.0)));
        let a = Value::Double3(DVec3::ZERO);
        let b = Value::Double3(DVec3::new(2.0, 4.0, 6.0));
        assert_eq!(Value::lerp(&a, &b, 0.5), Some(Value::Double3(DVec3::new(1.0, 2.0, 3.0))));
        let h = Value::lerp(&Value::Half(f16::from_f32(0.0)), &Value::Half(f16::from_f32(2.0)), 0.5);
        assert_eq!(h, Some(Value::Half(f16::from_f32(1.0))));
    }

    #[test]
    fn test_lerp_rejects_mismatch() {
        assert_eq!(Value::lerp(&Value::Int(0), &Value::Int(10), 0.5), None);
        assert_eq!(Value::lerp(&Value::Double(0.0), &Value::Float(1.0), 0.5), None);
        let a = Value::DoubleArray(vec![0.0, 1.0]);
        let b = Value::DoubleArray(vec![1.0]);
        assert_eq!(Value::lerp(&a, &b, 0.5), None);
    }

    #[test]
    fn test_sentinels() {
        assert!(Value::ValueBlock.is_value_block());
        assert!(Value::AnimationBlock.is_animation_block());
        assert!(!Value::Double(1.0).is_value_block());
        assert!(Value::Double(1.0).is_interpolatable());
        assert!(!Value::Token("x".into()).is_interpolatable());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(2.5f64).as_f64(), Some(2.5));
        assert_eq!(Value::from(7).as_f64(), Some(7.0));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(true).type_name(), "bool");
    }
}
