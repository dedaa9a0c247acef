//! The built-in function table shared by every compiler instance.

use crate::types::{ScalarKind, Type};
use std::collections::HashMap;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Intrinsic {
    Abs,
    Acos,
    All,
    Any,
    Asfloat,
    Asin,
    Asint,
    Asuint,
    Atan,
    Atan2,
    Ceil,
    Clamp,
    Clip,
    Cos,
    Cosh,
    Countbits,
    Cross,
    Ddx,
    Ddy,
    Degrees,
    Determinant,
    Distance,
    Dot,
    Exp,
    Exp2,
    Firstbithigh,
    Firstbitlow,
    Floor,
    Fmod,
    Frac,
    Isinf,
    Isnan,
    Length,
    Lerp,
    Log,
    Log2,
    Mad,
    Max,
    Min,
    Mul,
    Normalize,
    Pow,
    Radians,
    Rcp,
    Reflect,
    Reversebits,
    Round,
    Rsqrt,
    Saturate,
    Sign,
    Sin,
    Sinh,
    Smoothstep,
    Sqrt,
    Step,
    Tan,
    Tanh,
    Transpose,
    Trunc,
    AllMemoryBarrier,
    AllMemoryBarrierWithGroupSync,
    DeviceMemoryBarrier,
    DeviceMemoryBarrierWithGroupSync,
    GroupMemoryBarrier,
    GroupMemoryBarrierWithGroupSync,
}

/// Which component kinds an intrinsic accepts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operands {
    /// Integer arguments are converted to `float`.
    Float,
    Numeric,
    /// Only `int`/`uint` family arguments.
    Integer,
    None,
}

/// How the result type is derived from the unified argument type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Returns {
    Same,
    /// A scalar of the argument component kind.
    Scalar,
    /// `bool` with the argument shape.
    BoolShape,
    BoolScalar,
    /// The argument shape with a fixed component kind.
    Shape(ScalarKind),
    Float3,
    Void,
    /// `mul` and `transpose` compute their own shapes.
    Special,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrinsicInfo {
    pub name: &'static str,
    pub intrinsic: Intrinsic,
    pub arity: usize,
    pub operands: Operands,
    pub returns: Returns,
    /// Whether the call has an effect beyond its value.
    pub side_effects: bool,
}

const fn info(
    name: &'static str,
    intrinsic: Intrinsic,
    arity: usize,
    operands: Operands,
    returns: Returns,
) -> IntrinsicInfo {
    IntrinsicInfo {
        name,
        intrinsic,
        arity,
        operands,
        returns,
        side_effects: intrinsic.has_side_effects(),
    }
}

use Intrinsic as I;
use Operands as O;
use Returns as R;

const INTRINSICS: &[IntrinsicInfo] = &[
    info("abs", I::Abs, 1, O::Numeric, R::Same),
    info("acos", I::Acos, 1, O::Float, R::Same),
    info("all", I::All, 1, O::Numeric, R::BoolScalar),
    info("any", I::Any, 1, O::Numeric, R::BoolScalar),
    info("asfloat", I::Asfloat, 1, O::Numeric, R::Shape(ScalarKind::Float)),
    info("asin", I::Asin, 1, O::Float, R::Same),
    info("asint", I::Asint, 1, O::Numeric, R::Shape(ScalarKind::Int)),
    info("asuint", I::Asuint, 1, O::Numeric, R::Shape(ScalarKind::Uint)),
    info("atan", I::Atan, 1, O::Float, R::Same),
    info("atan2", I::Atan2, 2, O::Float, R::Same),
    info("ceil", I::Ceil, 1, O::Float, R::Same),
    info("clamp", I::Clamp, 3, O::Numeric, R::Same),
    info("clip", I::Clip, 1, O::Float, R::Void),
    info("cos", I::Cos, 1, O::Float, R::Same),
    info("cosh", I::Cosh, 1, O::Float, R::Same),
    info("countbits", I::Countbits, 1, O::Integer, R::Shape(ScalarKind::Uint)),
    info("cross", I::Cross, 2, O::Float, R::Float3),
    info("ddx", I::Ddx, 1, O::Float, R::Same),
    info("ddy", I::Ddy, 1, O::Float, R::Same),
    info("degrees", I::Degrees, 1, O::Float, R::Same),
    info("determinant", I::Determinant, 1, O::Float, R::Scalar),
    info("distance", I::Distance, 2, O::Float, R::Scalar),
    info("dot", I::Dot, 2, O::Numeric, R::Scalar),
    info("exp", I::Exp, 1, O::Float, R::Same),
    info("exp2", I::Exp2, 1, O::Float, R::Same),
    info("firstbithigh", I::Firstbithigh, 1, O::Integer, R::Shape(ScalarKind::Uint)),
    info("firstbitlow", I::Firstbitlow, 1, O::Integer, R::Shape(ScalarKind::Uint)),
    info("floor", I::Floor, 1, O::Float, R::Same),
    info("fmod", I::Fmod, 2, O::Float, R::Same),
    info("frac", I::Frac, 1, O::Float, R::Same),
    info("isinf", I::Isinf, 1, O::Float, R::BoolShape),
    info("isnan", I::Isnan, 1, O::Float, R::BoolShape),
    info("length", I::Length, 1, O::Float, R::Scalar),
    info("lerp", I::Lerp, 3, O::Float, R::Same),
    info("log", I::Log, 1, O::Float, R::Same),
    info("log2", I::Log2, 1, O::Float, R::Same),
    info("mad", I::Mad, 3, O::Numeric, R::Same),
    info("max", I::Max, 2, O::Numeric, R::Same),
    info("min", I::Min, 2, O::Numeric, R::Same),
    info("mul", I::Mul, 2, O::Numeric, R::Special),
    info("normalize", I::Normalize, 1, O::Float, R::Same),
    info("pow", I::Pow, 2, O::Float, R::Same),
    info("radians", I::Radians, 1, O::Float, R::Same),
    info("rcp", I::Rcp, 1, O::Float, R::Same),
    info("reflect", I::Reflect, 2, O::Float, R::Same),
    info("reversebits", I::Reversebits, 1, O::Integer, R::Shape(ScalarKind::Uint)),
    info("round", I::Round, 1, O::Float, R::Same),
    info("rsqrt", I::Rsqrt, 1, O::Float, R::Same),
    info("saturate", I::Saturate, 1, O::Float, R::Same),
    info("sign", I::Sign, 1, O::Numeric, R::Shape(ScalarKind::Int)),
    info("sin", I::Sin, 1, O::Float, R::Same),
    info("sinh", I::Sinh, 1, O::Float, R::Same),
    info("smoothstep", I::Smoothstep, 3, O::Float, R::Same),
    info("sqrt", I::Sqrt, 1, O::Float, R::Same),
    info("step", I::Step, 2, O::Float, R::Same),
    info("tan", I::Tan, 1, O::Float, R::Same),
    info("tanh", I::Tanh, 1, O::Float, R::Same),
    info("transpose", I::Transpose, 1, O::Numeric, R::Special),
    info("trunc", I::Trunc, 1, O::Float, R::Same),
    info("AllMemoryBarrier", I::AllMemoryBarrier, 0, O::None, R::Void),
    info(
        "AllMemoryBarrierWithGroupSync",
        I::AllMemoryBarrierWithGroupSync,
        0,
        O::None,
        R::Void,
    ),
    info("DeviceMemoryBarrier", I::DeviceMemoryBarrier, 0, O::None, R::Void),
    info(
        "DeviceMemoryBarrierWithGroupSync",
        I::DeviceMemoryBarrierWithGroupSync,
        0,
        O::None,
        R::Void,
    ),
    info("GroupMemoryBarrier", I::GroupMemoryBarrier, 0, O::None, R::Void),
    info(
        "GroupMemoryBarrierWithGroupSync",
        I::GroupMemoryBarrierWithGroupSync,
        0,
        O::None,
        R::Void,
    ),
];

/// Name lookup over the intrinsic table.
#[derive(Debug)]
pub struct Intrinsics {
    by_name: HashMap<&'static str, &'static IntrinsicInfo>,
}

impl Intrinsics {
    pub fn new() -> Intrinsics {
        let by_name = INTRINSICS.iter().map(|info| (info.name, info)).collect();
        Intrinsics { by_name }
    }

    pub fn lookup(&self, name: &str) -> Option<&'static IntrinsicInfo> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        Intrinsics::new()
    }
}

impl Intrinsic {
    /// Stable numbering used in the object encoding.
    pub fn opcode(self) -> u16 {
        self as u16
    }

    pub const fn has_side_effects(self) -> bool {
        matches!(
            self,
            Intrinsic::Clip
                | Intrinsic::AllMemoryBarrier
                | Intrinsic::AllMemoryBarrierWithGroupSync
                | Intrinsic::DeviceMemoryBarrier
                | Intrinsic::DeviceMemoryBarrierWithGroupSync
                | Intrinsic::GroupMemoryBarrier
                | Intrinsic::GroupMemoryBarrierWithGroupSync
        )
    }
}

/// Result type of `mul(a, b)`, or `None` when the shapes do not line up.
pub fn mul_result(a: &Type, b: &Type) -> Option<Type> {
    let kind = a.scalar_kind()?.promote(b.scalar_kind()?);
    let ty = match (a, b) {
        (Type::Scalar(_), other) | (other, Type::Scalar(_)) => other.with_kind(kind),
        (Type::Vector(_, n), Type::Vector(_, m)) if n == m => Type::Scalar(kind),
        (Type::Vector(_, n), Type::Matrix(_, r, c)) if n == r => Type::vector_of(kind, *c),
        (Type::Matrix(_, r, c), Type::Vector(_, n)) if c == n => Type::vector_of(kind, *r),
        (Type::Matrix(_, r, k), Type::Matrix(_, k2, c)) if k == k2 => Type::Matrix(kind, *r, *c),
        _ => return None,
    };
    Some(ty)
}
