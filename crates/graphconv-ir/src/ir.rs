use core::fmt;
use std::fmt::Formatter;

use half::{bf16, f16};
use serde::Serialize;
use strum::{Display, EnumString};

mod attribute;
mod node;

pub use attribute::*;
pub use node::*;

/// Element type of a tensor.
///
/// Parses from both the short form (`f32`) and the long form (`float32`) used by
/// source frameworks; displays as the short form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
pub enum ElementType {
    #[strum(to_string = "boolean", serialize = "bool")]
    Bool,
    #[strum(to_string = "f16", serialize = "float16")]
    Float16,
    #[strum(to_string = "bf16", serialize = "bfloat16")]
    BFloat16,
    #[strum(to_string = "f32", serialize = "float32", serialize = "float")]
    Float32,
    #[strum(to_string = "f64", serialize = "float64", serialize = "double")]
    Float64,
    #[strum(to_string = "i8", serialize = "int8")]
    Int8,
    #[strum(to_string = "i16", serialize = "int16")]
    Int16,
    #[strum(to_string = "i32", serialize = "int32")]
    Int32,
    #[strum(to_string = "i64", serialize = "int64")]
    Int64,
    #[strum(to_string = "u8", serialize = "uint8")]
    Uint8,
    #[strum(to_string = "u16", serialize = "uint16")]
    Uint16,
    #[strum(to_string = "u32", serialize = "uint32")]
    Uint32,
    #[strum(to_string = "u64", serialize = "uint64")]
    Uint64,
}

impl ElementType {
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64
        )
    }
}

/// One dimension of a tensor shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Dim {
    Static(usize),
    /// Unbound until runtime.
    Dynamic,
}

impl Dim {
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }
}

impl From<usize> for Dim {
    fn from(value: usize) -> Self {
        Self::Static(value)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(size) => write!(f, "{size}"),
            Dim::Dynamic => f.write_str("?"),
        }
    }
}

/// A possibly partially dynamic tensor shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Shape {
    Ranked(Vec<Dim>),
    /// Neither the rank nor any dimension is known.
    Unranked,
}

impl Shape {
    /// A fully static shape.
    pub fn fixed<I: IntoIterator<Item = usize>>(dims: I) -> Self {
        Self::Ranked(dims.into_iter().map(Dim::Static).collect())
    }

    /// A ranked shape with every dimension dynamic.
    pub fn dynamic(rank: usize) -> Self {
        Self::Ranked(vec![Dim::Dynamic; rank])
    }

    /// Builds a shape from the signed convention used by source frameworks,
    /// where any negative entry marks a dynamic dimension.
    pub fn from_signed(dims: &[i64]) -> Self {
        Self::Ranked(
            dims.iter()
                .map(|&d| {
                    if d < 0 {
                        Dim::Dynamic
                    } else {
                        Dim::Static(d as usize)
                    }
                })
                .collect(),
        )
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Ranked(dims) => Some(dims.len()),
            Shape::Unranked => None,
        }
    }

    pub fn dims(&self) -> Option<&[Dim]> {
        match self {
            Shape::Ranked(dims) => Some(dims),
            Shape::Unranked => None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.dims()
            .is_some_and(|dims| dims.iter().all(Dim::is_static))
    }

    /// Concrete dimensions when every dimension is static.
    pub fn to_static(&self) -> Option<Vec<usize>> {
        self.dims()?
            .iter()
            .map(|d| match d {
                Dim::Static(size) => Some(*size),
                Dim::Dynamic => None,
            })
            .collect()
    }

    /// Numpy-style broadcast of two shapes.
    ///
    /// Returns `None` when two static dimensions are incompatible.
    pub fn broadcast(&self, other: &Shape) -> Option<Shape> {
        let (Some(lhs), Some(rhs)) = (self.dims(), other.dims()) else {
            return Some(Shape::Unranked);
        };

        let rank = lhs.len().max(rhs.len());
        let mut dims = Vec::with_capacity(rank);

        for i in 0..rank {
            let a = Self::dim_from_end(lhs, rank - 1 - i);
            let b = Self::dim_from_end(rhs, rank - 1 - i);

            let dim = match (a, b) {
                (Dim::Static(a), Dim::Static(b)) if a == b => Dim::Static(a),
                (Dim::Static(1), other) | (other, Dim::Static(1)) => other,
                (Dim::Static(_), Dim::Static(_)) => return None,
                (Dim::Dynamic, Dim::Static(size)) | (Dim::Static(size), Dim::Dynamic) => {
                    Dim::Static(size)
                }
                (Dim::Dynamic, Dim::Dynamic) => Dim::Dynamic,
            };
            dims.push(dim);
        }

        Some(Shape::Ranked(dims))
    }

    /// Fills dynamic dimensions from `hint` when both shapes have the same rank.
    pub fn refine(&self, hint: &Shape) -> Shape {
        match (self, hint) {
            (Shape::Ranked(dims), Shape::Ranked(hint_dims)) if dims.len() == hint_dims.len() => {
                Shape::Ranked(
                    dims.iter()
                        .zip(hint_dims)
                        .map(|(d, h)| if d.is_static() { *d } else { *h })
                        .collect(),
                )
            }
            (Shape::Unranked, _) => hint.clone(),
            _ => self.clone(),
        }
    }

    // Dimension `offset` positions from the right, padding with 1.
    fn dim_from_end(dims: &[Dim], offset: usize) -> Dim {
        if offset < dims.len() {
            dims[dims.len() - 1 - offset]
        } else {
            Dim::Static(1)
        }
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::fixed(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::fixed(dims)
    }
}

impl From<Vec<Dim>> for Shape {
    fn from(dims: Vec<Dim>) -> Self {
        Self::Ranked(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Ranked(dims) => {
                f.write_str("[")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{dim}")?;
                }
                f.write_str("]")
            }
            Shape::Unranked => f.write_str("[...]"),
        }
    }
}

/// Element type and shape carried by an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TensorType {
    pub elem_type: ElementType,
    pub shape: Shape,
}

impl TensorType {
    pub fn new(elem_type: ElementType, shape: impl Into<Shape>) -> Self {
        Self {
            elem_type,
            shape: shape.into(),
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.elem_type, self.shape)
    }
}

/// Conversions shared by every element storage type.
trait Scalar: Copy + Sized {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
    fn from_le_slice(bytes: &[u8]) -> Option<Vec<Self>>;
}

macro_rules! impl_pod_scalar {
    ($($ty:ty),*) => {
        $(
            impl Scalar for $ty {
                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(value: f64) -> Self {
                    value as $ty
                }

                fn from_le_slice(bytes: &[u8]) -> Option<Vec<Self>> {
                    if bytes.len() % core::mem::size_of::<$ty>() != 0 {
                        return None;
                    }
                    Some(bytemuck::pod_collect_to_vec(bytes))
                }
            }
        )*
    };
}

impl_pod_scalar!(f32, f64, i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! impl_half_scalar {
    ($($ty:ty),*) => {
        $(
            impl Scalar for $ty {
                fn to_f64(self) -> f64 {
                    <$ty>::to_f64(self)
                }

                fn from_f64(value: f64) -> Self {
                    <$ty>::from_f64(value)
                }

                fn from_le_slice(bytes: &[u8]) -> Option<Vec<Self>> {
                    if bytes.len() % 2 != 0 {
                        return None;
                    }
                    Some(bytemuck::pod_collect_to_vec(bytes))
                }
            }
        )*
    };
}

impl_half_scalar!(f16, bf16);

impl Scalar for bool {
    fn to_f64(self) -> f64 {
        if self { 1.0 } else { 0.0 }
    }

    fn from_f64(value: f64) -> Self {
        value != 0.0
    }

    fn from_le_slice(bytes: &[u8]) -> Option<Vec<Self>> {
        Some(bytes.iter().map(|b| *b != 0).collect())
    }
}

macro_rules! tensor_values {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Typed element storage of a [`TensorData`].
        #[derive(Clone, PartialEq, Serialize)]
        pub enum TensorValues {
            $($variant(Vec<$ty>)),*
        }

        impl TensorValues {
            pub fn elem_type(&self) -> ElementType {
                match self {
                    $(Self::$variant(_) => ElementType::$variant),*
                }
            }

            pub fn len(&self) -> usize {
                match self {
                    $(Self::$variant(values) => values.len()),*
                }
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            fn render(&self) -> String {
                match self {
                    $(Self::$variant(values) => trunc(values)),*
                }
            }

            /// Every element widened to `f64`.
            pub fn to_f64_vec(&self) -> Vec<f64> {
                match self {
                    $(Self::$variant(values) => values.iter().map(|v| Scalar::to_f64(*v)).collect()),*
                }
            }

            /// Storage of `elem_type` holding `values` narrowed to that type.
            pub fn from_f64(elem_type: ElementType, values: &[f64]) -> Self {
                match elem_type {
                    $(ElementType::$variant => {
                        Self::$variant(values.iter().map(|v| <$ty as Scalar>::from_f64(*v)).collect())
                    }),*
                }
            }

            /// Decodes little-endian packed elements.
            ///
            /// Returns `None` when the byte length is not a multiple of the element size.
            pub fn from_le_bytes(elem_type: ElementType, bytes: &[u8]) -> Option<Self> {
                match elem_type {
                    $(ElementType::$variant => <$ty as Scalar>::from_le_slice(bytes).map(Self::$variant)),*
                }
            }
        }

        $(
            impl From<Vec<$ty>> for TensorValues {
                fn from(values: Vec<$ty>) -> Self {
                    Self::$variant(values)
                }
            }
        )*
    };
}

tensor_values! {
    Bool(bool),
    Float16(f16),
    BFloat16(bf16),
    Float32(f32),
    Float64(f64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
}

/// Constant tensor payload.
#[derive(Clone, PartialEq, Serialize)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub values: TensorValues,
}

impl TensorData {
    pub fn new(values: impl Into<TensorValues>, shape: Vec<usize>) -> Self {
        Self {
            shape,
            values: values.into(),
        }
    }

    /// A rank-0 tensor of `elem_type` holding `value`.
    pub fn scalar(elem_type: ElementType, value: f64) -> Self {
        Self::from_f64(elem_type, &[value], Vec::new())
    }

    pub fn from_f64(elem_type: ElementType, values: &[f64], shape: Vec<usize>) -> Self {
        Self {
            shape,
            values: TensorValues::from_f64(elem_type, values),
        }
    }

    pub fn from_le_bytes(elem_type: ElementType, bytes: &[u8], shape: Vec<usize>) -> Option<Self> {
        let values = TensorValues::from_le_bytes(elem_type, bytes)?;
        Some(Self { shape, values })
    }

    pub fn elem_type(&self) -> ElementType {
        self.values.elem_type()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements implied by the shape, `None` when it overflows `usize`.
    pub fn num_elements(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |count, &dim| count.checked_mul(dim))
    }

    /// Whether the stored element count agrees with the shape.
    pub fn is_consistent(&self) -> bool {
        self.num_elements() == Some(self.values.len())
    }

    pub fn tensor_type(&self) -> TensorType {
        TensorType::new(self.elem_type(), self.shape.clone())
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.values.to_f64_vec()
    }

    /// The value of a single-element tensor.
    pub fn scalar_f64(&self) -> Option<f64> {
        match self.values.len() {
            1 => self.values.to_f64_vec().first().copied(),
            _ => None,
        }
    }

    /// Equality with a relative tolerance on floating point elements.
    pub fn approx_eq(&self, other: &TensorData, tolerance: f64) -> bool {
        if self.elem_type() != other.elem_type() || self.shape != other.shape {
            return false;
        }

        if !self.elem_type().is_float() {
            return self.values == other.values;
        }

        let lhs = self.to_f64_vec();
        let rhs = other.to_f64_vec();
        lhs.len() == rhs.len()
            && lhs.iter().zip(&rhs).all(|(a, b)| {
                (a.is_nan() && b.is_nan()) || (a - b).abs() <= tolerance * (1.0 + b.abs())
            })
    }
}

/// Shows at most this many elements.
const MAX_DISPLAYED_VALUES: usize = 8;

fn trunc<T: fmt::Display>(values: &[T]) -> String {
    let shown: Vec<String> = values
        .iter()
        .take(MAX_DISPLAYED_VALUES)
        .map(|v| v.to_string())
        .collect();

    if values.len() > MAX_DISPLAYED_VALUES {
        format!("[{}, ...]", shown.join(", "))
    } else {
        format!("[{}]", shown.join(", "))
    }
}

impl fmt::Debug for TensorData {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorData")
            .field("elem_type", &self.elem_type())
            .field("shape", &self.shape)
            .field("values", &self.values.render())
            .finish()
    }
}

impl fmt::Debug for TensorValues {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.elem_type(), self.render())
    }
}

impl fmt::Display for TensorData {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {}",
            self.elem_type(),
            Shape::fixed(self.shape.iter().copied()),
            self.values.render()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[test]
    fn element_type_parses_framework_names() {
        assert_eq!(ElementType::from_str("float32").unwrap(), ElementType::Float32);
        assert_eq!(ElementType::from_str("f32").unwrap(), ElementType::Float32);
        assert_eq!(ElementType::from_str("int32").unwrap(), ElementType::Int32);
        assert_eq!(ElementType::from_str("bool").unwrap(), ElementType::Bool);
        assert!(ElementType::from_str("complex64").is_err());
        assert_eq!(ElementType::Float16.to_string(), "f16");
    }

    #[test]
    fn broadcast_aligns_from_the_right() {
        let lhs = Shape::fixed([2, 3, 4]);
        let rhs = Shape::fixed([1]);
        assert_eq!(lhs.broadcast(&rhs), Some(Shape::fixed([2, 3, 4])));

        let rhs = Shape::Ranked(vec![Dim::Dynamic, Dim::Static(1)]);
        assert_eq!(
            lhs.broadcast(&rhs),
            Some(Shape::Ranked(vec![
                Dim::Static(2),
                Dim::Static(3),
                Dim::Static(4)
            ]))
        );
    }

    #[rstest]
    #[case::fixed(&[2, 3, 4], "[2,3,4]")]
    #[case::dynamic_batch(&[-1, 8], "[?,8]")]
    #[case::scalar(&[], "[]")]
    fn signed_dims_display(#[case] dims: &[i64], #[case] expected: &str) {
        assert_eq!(Shape::from_signed(dims).to_string(), expected);
    }

    #[test]
    fn broadcast_rejects_incompatible_dims() {
        assert_eq!(Shape::fixed([2, 3]).broadcast(&Shape::fixed([4])), None);
    }

    #[test]
    fn broadcast_with_unranked_is_unranked() {
        assert_eq!(
            Shape::fixed([2]).broadcast(&Shape::Unranked),
            Some(Shape::Unranked)
        );
    }

    #[test]
    fn signed_dims_mark_dynamic() {
        let shape = Shape::from_signed(&[-1, 3]);
        assert_eq!(shape.to_string(), "[?,3]");
        assert!(!shape.is_static());
        assert_eq!(shape.refine(&Shape::fixed([5, 3])), Shape::fixed([5, 3]));
    }

    #[test]
    fn refine_keeps_static_dims_and_ignores_rank_mismatch() {
        let shape = Shape::fixed([2, 3]);
        assert_eq!(shape.refine(&Shape::fixed([7, 7])), shape);
        assert_eq!(shape.refine(&Shape::fixed([7])), shape);
        assert_eq!(Shape::Unranked.refine(&shape), shape);
    }

    #[test]
    fn decodes_little_endian_payload() {
        let bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let data = TensorData::from_le_bytes(ElementType::Float32, &bytes, vec![2]).unwrap();
        assert_eq!(data.values, TensorValues::Float32(vec![1.5, -2.0]));
        assert!(data.is_consistent());

        assert!(TensorData::from_le_bytes(ElementType::Int32, &bytes[..3], vec![1]).is_none());
    }

    #[test]
    fn scalar_narrows_to_element_type() {
        let data = TensorData::scalar(ElementType::Float16, 0.1);
        assert_eq!(data.values, TensorValues::Float16(vec![f16::from_f64(0.1)]));
        assert!(data.shape.is_empty());
        assert_eq!(data.num_elements(), Some(1));
    }

    #[test]
    fn element_count_overflow_is_not_consistent() {
        let data = TensorData::new(Vec::<f32>::new(), vec![1 << 62, 4]);
        assert_eq!(data.num_elements(), None);
        assert!(!data.is_consistent());
    }

    #[test]
    fn approx_eq_uses_tolerance_for_floats_only() {
        let a = TensorData::new(vec![0.1f32, 0.2], vec![2]);
        let b = TensorData::new(vec![0.1f32 + 1e-9, 0.2], vec![2]);
        assert!(a.approx_eq(&b, 1e-6));

        let c = TensorData::new(vec![1i64, 2], vec![2]);
        let d = TensorData::new(vec![1i64, 3], vec![2]);
        assert!(!c.approx_eq(&d, 1e-6));
        assert!(!a.approx_eq(&c, 1e-6));
    }

    #[test]
    fn display_truncates_long_payloads() {
        let data = TensorData::new((0..10).map(|v| v as i32).collect::<Vec<_>>(), vec![10]);
        assert_eq!(
            data.to_string(),
            "i32[10] [0, 1, 2, 3, 4, 5, 6, 7, ...]"
        );
    }
}
