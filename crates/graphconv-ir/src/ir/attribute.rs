//! Typed node attributes
//!
//! Attributes are shared by the canonical IR and by the foreign graphs front-ends
//! produce, so decoding happens once per source format.

use core::fmt;
use std::collections::BTreeMap;

use serde::Serialize;

use super::{ElementType, TensorData};

/// Attribute map keyed by name, iterated in key order.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// The type of an attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttributeValue {
    Bool(bool),
    Float32(f32),
    Float32s(Vec<f32>),
    Float64(f64),
    Int64(i64),
    Int64s(Vec<i64>),
    String(String),
    Strings(Vec<String>),
    ElementType(ElementType),
    Tensor(TensorData),
}

impl AttributeValue {
    /// Numeric value as `f32`, accepting any scalar numeric encoding.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            AttributeValue::Float32(v) => Some(*v),
            AttributeValue::Float64(v) => Some(*v as f32),
            AttributeValue::Int64(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int64(v) => Some(*v),
            AttributeValue::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(v) => Some(*v),
            AttributeValue::Int64(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64s(&self) -> Option<&[i64]> {
        match self {
            AttributeValue::Int64s(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&TensorData> {
        match self {
            AttributeValue::Tensor(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_element_type(&self) -> Option<ElementType> {
        match self {
            AttributeValue::ElementType(v) => Some(*v),
            _ => None,
        }
    }

    /// Equality with a relative tolerance on floating point payloads.
    pub fn approx_eq(&self, other: &AttributeValue, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance * (1.0 + b.abs());

        match (self, other) {
            (AttributeValue::Float32(a), AttributeValue::Float32(b)) => {
                close(*a as f64, *b as f64)
            }
            (AttributeValue::Float64(a), AttributeValue::Float64(b)) => close(*a, *b),
            (AttributeValue::Float32s(a), AttributeValue::Float32s(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| close(*a as f64, *b as f64))
            }
            (AttributeValue::Tensor(a), AttributeValue::Tensor(b)) => a.approx_eq(b, tolerance),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{v}"),
            AttributeValue::Float32(v) => write!(f, "{v}"),
            AttributeValue::Float64(v) => write!(f, "{v}"),
            AttributeValue::Int64(v) => write!(f, "{v}"),
            AttributeValue::Float32s(v) => write!(f, "{v:?}"),
            AttributeValue::Int64s(v) => write!(f, "{v:?}"),
            AttributeValue::String(v) => write!(f, "{v:?}"),
            AttributeValue::Strings(v) => write!(f, "{v:?}"),
            AttributeValue::ElementType(v) => write!(f, "{v}"),
            AttributeValue::Tensor(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_accessors_coerce_scalars() {
        assert_eq!(AttributeValue::Int64(2).as_f32(), Some(2.0));
        assert_eq!(AttributeValue::Float64(0.5).as_f32(), Some(0.5));
        assert_eq!(AttributeValue::Int64(0).as_bool(), Some(false));
        assert_eq!(AttributeValue::String("x".into()).as_f32(), None);
    }

    #[test]
    fn approx_eq_tolerates_float_noise() {
        let a = AttributeValue::Float32(0.1);
        let b = AttributeValue::Float32(0.100_000_01);
        assert!(a.approx_eq(&b, 1e-6));
        assert!(!a.approx_eq(&AttributeValue::Float64(0.1), 1e-6));
        assert!(!a.approx_eq(&AttributeValue::Float32(0.2), 1e-6));
    }
}
