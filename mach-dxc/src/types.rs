//! Semantic types of the HLSL subset.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Int64,
    Uint64,
    Half,
    Float,
    Double,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::Uint => "uint",
            ScalarKind::Int64 => "int64_t",
            ScalarKind::Uint64 => "uint64_t",
            ScalarKind::Half => "half",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarKind::Half | ScalarKind::Float | ScalarKind::Double)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarKind::Int | ScalarKind::Uint | ScalarKind::Int64 | ScalarKind::Uint64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(self, ScalarKind::Int | ScalarKind::Int64) || self.is_float()
    }

    /// Result kind of an arithmetic operation between `self` and `other`.
    pub fn promote(self, other: ScalarKind) -> ScalarKind {
        let kind = self.max(other);
        if kind == ScalarKind::Bool {
            ScalarKind::Int
        } else {
            kind
        }
    }

    pub fn bit_width(self) -> u32 {
        match self {
            ScalarKind::Bool => 1,
            ScalarKind::Half => 16,
            ScalarKind::Int | ScalarKind::Uint | ScalarKind::Float => 32,
            ScalarKind::Int64 | ScalarKind::Uint64 | ScalarKind::Double => 64,
        }
    }
}

const SCALAR_NAMES: &[(&str, ScalarKind)] = &[
    ("bool", ScalarKind::Bool),
    ("int", ScalarKind::Int),
    ("int32_t", ScalarKind::Int),
    ("dword", ScalarKind::Uint),
    ("uint", ScalarKind::Uint),
    ("uint32_t", ScalarKind::Uint),
    ("int64_t", ScalarKind::Int64),
    ("uint64_t", ScalarKind::Uint64),
    ("half", ScalarKind::Half),
    ("float16_t", ScalarKind::Half),
    ("min16float", ScalarKind::Half),
    ("min16int", ScalarKind::Int),
    ("min16uint", ScalarKind::Uint),
    ("float", ScalarKind::Float),
    ("float32_t", ScalarKind::Float),
    ("double", ScalarKind::Double),
    ("float64_t", ScalarKind::Double),
];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture1D,
    Texture2D,
    Texture3D,
    TextureCube,
    Texture2DArray,
    RWTexture1D,
    RWTexture2D,
    RWTexture3D,
    Buffer,
    RWBuffer,
    StructuredBuffer,
    RWStructuredBuffer,
    ByteAddressBuffer,
    RWByteAddressBuffer,
}

const RESOURCE_NAMES: &[(&str, ResourceKind)] = &[
    ("Texture1D", ResourceKind::Texture1D),
    ("Texture2D", ResourceKind::Texture2D),
    ("Texture3D", ResourceKind::Texture3D),
    ("TextureCube", ResourceKind::TextureCube),
    ("Texture2DArray", ResourceKind::Texture2DArray),
    ("RWTexture1D", ResourceKind::RWTexture1D),
    ("RWTexture2D", ResourceKind::RWTexture2D),
    ("RWTexture3D", ResourceKind::RWTexture3D),
    ("Buffer", ResourceKind::Buffer),
    ("RWBuffer", ResourceKind::RWBuffer),
    ("StructuredBuffer", ResourceKind::StructuredBuffer),
    ("RWStructuredBuffer", ResourceKind::RWStructuredBuffer),
    ("ByteAddressBuffer", ResourceKind::ByteAddressBuffer),
    ("RWByteAddressBuffer", ResourceKind::RWByteAddressBuffer),
];

impl ResourceKind {
    pub fn from_name(name: &str) -> Option<ResourceKind> {
        RESOURCE_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, kind)| *kind)
    }

    pub fn name(self) -> &'static str {
        RESOURCE_NAMES
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(n, _)| *n)
            .unwrap_or("resource")
    }

    pub fn is_writable(self) -> bool {
        matches!(
            self,
            ResourceKind::RWTexture1D
                | ResourceKind::RWTexture2D
                | ResourceKind::RWTexture3D
                | ResourceKind::RWBuffer
                | ResourceKind::RWStructuredBuffer
                | ResourceKind::RWByteAddressBuffer
        )
    }

    pub fn is_texture(self) -> bool {
        matches!(
            self,
            ResourceKind::Texture1D
                | ResourceKind::Texture2D
                | ResourceKind::Texture3D
                | ResourceKind::TextureCube
                | ResourceKind::Texture2DArray
                | ResourceKind::RWTexture1D
                | ResourceKind::RWTexture2D
                | ResourceKind::RWTexture3D
        )
    }

    /// Components in a texture coordinate, not counting the mip level.
    pub fn coordinate_dims(self) -> u8 {
        match self {
            ResourceKind::Texture1D | ResourceKind::RWTexture1D => 1,
            ResourceKind::Texture2D | ResourceKind::RWTexture2D => 2,
            ResourceKind::Texture3D
            | ResourceKind::RWTexture3D
            | ResourceKind::TextureCube
            | ResourceKind::Texture2DArray => 3,
            _ => 1,
        }
    }

    /// Whether the element type is fixed and cannot be given as a template argument.
    pub fn is_raw(self) -> bool {
        matches!(
            self,
            ResourceKind::ByteAddressBuffer | ResourceKind::RWByteAddressBuffer
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<StructField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
    pub semantic: Option<String>,
}

impl StructType {
    pub fn field(&self, name: &str) -> Option<(usize, &StructField)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Void,
    Scalar(ScalarKind),
    Vector(ScalarKind, u8),
    Matrix(ScalarKind, u8, u8),
    Struct(Arc<StructType>),
    Resource(ResourceKind, Box<Type>),
    Sampler { comparison: bool },
    Array(Box<Type>, u32),
    /// Produced after an error has been reported; never reported on again.
    Error,
}

impl Type {
    pub const BOOL: Type = Type::Scalar(ScalarKind::Bool);
    pub const INT: Type = Type::Scalar(ScalarKind::Int);
    pub const UINT: Type = Type::Scalar(ScalarKind::Uint);
    pub const FLOAT: Type = Type::Scalar(ScalarKind::Float);

    /// Looks up a built-in numeric type such as `float`, `uint3` or `float4x4`.
    pub fn builtin(name: &str) -> Option<Type> {
        if name == "void" {
            return Some(Type::Void);
        }
        if name == "vector" {
            return Some(Type::Vector(ScalarKind::Float, 4));
        }
        if name == "matrix" {
            return Some(Type::Matrix(ScalarKind::Float, 4, 4));
        }

        for (scalar, kind) in SCALAR_NAMES {
            let Some(rest) = name.strip_prefix(scalar) else {
                continue;
            };
            let dims = rest.as_bytes();
            let dim = |b: u8| (b'1'..=b'4').contains(&b).then(|| b - b'0');
            match dims {
                [] => return Some(Type::Scalar(*kind)),
                [n] => {
                    if let Some(n) = dim(*n) {
                        return Some(Type::Vector(*kind, n));
                    }
                }
                [r, b'x', c] => {
                    if let (Some(r), Some(c)) = (dim(*r), dim(*c)) {
                        return Some(Type::Matrix(*kind, r, c));
                    }
                }
                _ => {}
            }
        }
        None
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Scalar(_) | Type::Vector(..) | Type::Matrix(..))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar(_))
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Type::Scalar(kind) | Type::Vector(kind, _) | Type::Matrix(kind, _, _) => Some(*kind),
            _ => None,
        }
    }

    /// Number of scalar components, or 0 for non-numeric types.
    pub fn component_count(&self) -> u32 {
        match self {
            Type::Scalar(_) => 1,
            Type::Vector(_, n) => u32::from(*n),
            Type::Matrix(_, r, c) => u32::from(*r) * u32::from(*c),
            _ => 0,
        }
    }

    /// The same shape with a different component kind.
    pub fn with_kind(&self, kind: ScalarKind) -> Type {
        match self {
            Type::Scalar(_) => Type::Scalar(kind),
            Type::Vector(_, n) => Type::Vector(kind, *n),
            Type::Matrix(_, r, c) => Type::Matrix(kind, *r, *c),
            other => other.clone(),
        }
    }

    /// `float` for `n == 1`, otherwise `floatN`.
    pub fn vector_of(kind: ScalarKind, n: u8) -> Type {
        if n == 1 {
            Type::Scalar(kind)
        } else {
            Type::Vector(kind, n)
        }
    }

    /// Whether values of this type may be stored in a local or passed by value.
    pub fn is_value(&self) -> bool {
        match self {
            Type::Void | Type::Error => false,
            Type::Array(element, _) => element.is_value(),
            _ => true,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Scalar(kind) => f.write_str(kind.name()),
            Type::Vector(kind, n) => write!(f, "{}{}", kind.name(), n),
            Type::Matrix(kind, r, c) => write!(f, "{}{}x{}", kind.name(), r, c),
            Type::Struct(s) => f.write_str(&s.name),
            Type::Resource(kind, _) if kind.is_raw() => f.write_str(kind.name()),
            Type::Resource(kind, element) => write!(f, "{}<{}>", kind.name(), element),
            Type::Sampler { comparison: false } => f.write_str("SamplerState"),
            Type::Sampler { comparison: true } => f.write_str("SamplerComparisonState"),
            Type::Array(element, len) => write!(f, "{}[{}]", element, len),
            Type::Error => f.write_str("<error type>"),
        }
    }
}

/// How a value of one type becomes a value of another without a cast.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Conversion {
    Identity,
    Implicit,
    /// Allowed, with the `implicit truncation of vector type` warning.
    Truncation,
    Invalid,
}

pub fn conversion(from: &Type, to: &Type) -> Conversion {
    if from == to || from.is_error() || to.is_error() {
        return Conversion::Identity;
    }

    match (from, to) {
        (Type::Scalar(_), Type::Scalar(_) | Type::Vector(..) | Type::Matrix(..)) => {
            Conversion::Implicit
        }
        (Type::Vector(_, 1), Type::Scalar(_) | Type::Vector(..)) => Conversion::Implicit,
        (Type::Vector(..), Type::Scalar(_)) => Conversion::Truncation,
        (Type::Vector(_, n), Type::Vector(_, m)) => match n.cmp(m) {
            std::cmp::Ordering::Equal => Conversion::Implicit,
            std::cmp::Ordering::Greater => Conversion::Truncation,
            std::cmp::Ordering::Less => Conversion::Invalid,
        },
        (Type::Matrix(_, 1, 1), Type::Scalar(_)) => Conversion::Implicit,
        (Type::Matrix(..), Type::Scalar(_)) => Conversion::Truncation,
        (Type::Matrix(_, r, c), Type::Matrix(_, r2, c2)) => {
            if r == r2 && c == c2 {
                Conversion::Implicit
            } else if r >= r2 && c >= c2 {
                Conversion::Truncation
            } else {
                Conversion::Invalid
            }
        }
        (Type::Vector(_, n), Type::Matrix(_, r, c)) | (Type::Matrix(_, r, c), Type::Vector(_, n))
            if u32::from(*n) == u32::from(*r) * u32::from(*c) =>
        {
            Conversion::Implicit
        }
        (Type::Array(a, n), Type::Array(b, m)) if n == m => match conversion(a, b) {
            Conversion::Identity => Conversion::Identity,
            _ => Conversion::Invalid,
        },
        _ => Conversion::Invalid,
    }
}

/// Whether an explicit cast `(to)from` is accepted.
pub fn cast_allowed(from: &Type, to: &Type) -> bool {
    match conversion(from, to) {
        Conversion::Invalid => {
            // Explicit casts may also narrow a vector to a smaller matrix shape and back.
            from.is_numeric() && to.is_numeric() && from.component_count() >= to.component_count()
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names() {
        assert_eq!(Type::builtin("float"), Some(Type::FLOAT));
        assert_eq!(Type::builtin("uint3"), Some(Type::Vector(ScalarKind::Uint, 3)));
        assert_eq!(
            Type::builtin("float4x4"),
            Some(Type::Matrix(ScalarKind::Float, 4, 4))
        );
        assert_eq!(Type::builtin("min16float2"), Some(Type::Vector(ScalarKind::Half, 2)));
        assert_eq!(Type::builtin("float5"), None);
        assert_eq!(Type::builtin("floaty"), None);
        assert_eq!(Type::builtin("Texture2D"), None);
    }

    #[test]
    fn display() {
        let texture = Type::Resource(ResourceKind::Texture2D, Box::new(Type::Vector(ScalarKind::Float, 4)));
        assert_eq!(texture.to_string(), "Texture2D<float4>");
        assert_eq!(Type::Matrix(ScalarKind::Float, 3, 4).to_string(), "float3x4");
        assert_eq!(Type::Array(Box::new(Type::INT), 8).to_string(), "int[8]");
    }

    #[test]
    fn vector_conversions() {
        let f4 = Type::Vector(ScalarKind::Float, 4);
        let f3 = Type::Vector(ScalarKind::Float, 3);
        assert_eq!(conversion(&f4, &f3), Conversion::Truncation);
        assert_eq!(conversion(&f3, &f4), Conversion::Invalid);
        assert_eq!(conversion(&Type::FLOAT, &f4), Conversion::Implicit);
        assert_eq!(conversion(&f4, &Type::FLOAT), Conversion::Truncation);
        assert_eq!(conversion(&f4, &f4), Conversion::Identity);
        assert_eq!(
            conversion(&Type::Vector(ScalarKind::Int, 4), &f4),
            Conversion::Implicit
        );
    }

    #[test]
    fn error_type_converts_silently() {
        assert_eq!(conversion(&Type::Error, &Type::FLOAT), Conversion::Identity);
        assert_eq!(conversion(&Type::Void, &Type::FLOAT), Conversion::Invalid);
    }

    #[test]
    fn promotion() {
        assert_eq!(ScalarKind::Int.promote(ScalarKind::Float), ScalarKind::Float);
        assert_eq!(ScalarKind::Bool.promote(ScalarKind::Bool), ScalarKind::Int);
        assert_eq!(ScalarKind::Uint.promote(ScalarKind::Int), ScalarKind::Uint);
    }
}
