//! Typed, block-structured intermediate representation handed from the front end to the
//! backend.
//!
//! Each function owns a list of local slots and a list of basic blocks. Every instruction
//! defines exactly one value (void for stores and other effects), and values are only used
//! inside the function that defines them.

use crate::enums::{ShaderKind, TargetProfile};
use crate::intrinsics::Intrinsic;
use crate::types::{ScalarKind, Type};

macro_rules! id_type {
    ($($name:ident),*) => {
        $(
            #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);

            impl $name {
                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

id_type!(ValueId, LocalId, BlockId, GlobalId, FunctionId);

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Constant {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl Constant {
    pub fn kind(self) -> ScalarKind {
        match self {
            Constant::Bool(_) => ScalarKind::Bool,
            Constant::Int(_) => ScalarKind::Int,
            Constant::Uint(_) => ScalarKind::Uint,
            Constant::Float(_) => ScalarKind::Float,
        }
    }

    /// Converts to a scalar of `kind` with HLSL conversion rules.
    pub fn convert(self, kind: ScalarKind) -> Constant {
        match kind {
            ScalarKind::Bool => Constant::Bool(self.truthy()),
            ScalarKind::Int | ScalarKind::Int64 => Constant::Int(match self {
                Constant::Bool(b) => i64::from(b),
                Constant::Int(i) => i,
                Constant::Uint(u) => u as i64,
                Constant::Float(f) => f as i64,
            }),
            ScalarKind::Uint | ScalarKind::Uint64 => Constant::Uint(match self {
                Constant::Bool(b) => u64::from(b),
                Constant::Int(i) => i as u64,
                Constant::Uint(u) => u,
                Constant::Float(f) => f as u64,
            }),
            ScalarKind::Half | ScalarKind::Float | ScalarKind::Double => {
                Constant::Float(self.as_f64())
            }
        }
    }

    pub fn truthy(self) -> bool {
        match self {
            Constant::Bool(b) => b,
            Constant::Int(i) => i != 0,
            Constant::Uint(u) => u != 0,
            Constant::Float(f) => f != 0.0,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Constant::Bool(b) => f64::from(u8::from(b)),
            Constant::Int(i) => i as f64,
            Constant::Uint(u) => u as f64,
            Constant::Float(f) => f,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    /// Logical not, producing `bool` components.
    Not,
    BitNot,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    /// Component-wise and non-short-circuiting on `bool` operands.
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceOp {
    /// `(texture, sampler, coord)`
    Sample,
    /// `(texture, sampler, coord, lod)`
    SampleLevel,
    /// `(texture, sampler, coord, bias)`
    SampleBias,
    /// `(resource, address)`
    Load,
    /// `(resource, address, value)`
    Store,
}

impl ResourceOp {
    pub fn has_side_effects(self) -> bool {
        self == ResourceOp::Store
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Const(Constant),
    /// Value of the parameter at this position, on entry to the function.
    Param(u32),
    /// Signature element read by the entry point.
    Input(u32),
    /// Signature element written by the entry point.
    Output(u32, ValueId),
    Load(LocalId),
    Store(LocalId, ValueId),
    LoadGlobal(GlobalId),
    StoreGlobal(GlobalId, ValueId),
    Unary(UnaryOp, ValueId),
    Binary(BinaryOp, ValueId, ValueId),
    /// Component-wise conversion to the instruction's type.
    Convert(ValueId),
    /// Broadcasts a scalar to every component of the instruction's type.
    Splat(ValueId),
    /// Builds a vector, matrix, struct or array from its elements in order.
    Construct(Vec<ValueId>),
    /// Struct field, array element, or vector/matrix component. Matrix components are
    /// numbered row-major.
    Extract(ValueId, u32),
    Insert(ValueId, u32, ValueId),
    /// Picks components by row-major index; a single index yields a scalar.
    Shuffle(ValueId, Vec<u8>),
    /// Array element, vector component or matrix row selected at run time.
    ExtractDynamic(ValueId, ValueId),
    InsertDynamic(ValueId, ValueId, ValueId),
    Select(ValueId, ValueId, ValueId),
    Call(FunctionId, Vec<ValueId>),
    /// Final value of the `out`/`inout` parameter at this position after a call.
    CallOutput(ValueId, u32),
    Intrinsic(Intrinsic, Vec<ValueId>),
    Resource(ResourceOp, Vec<ValueId>),
}

impl Op {
    /// Values read by this instruction, in operand order.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Op::Const(_)
            | Op::Param(_)
            | Op::Input(_)
            | Op::Load(_)
            | Op::LoadGlobal(_) => Vec::new(),
            Op::Output(_, v)
            | Op::Store(_, v)
            | Op::StoreGlobal(_, v)
            | Op::Unary(_, v)
            | Op::Convert(v)
            | Op::Splat(v)
            | Op::Extract(v, _)
            | Op::Shuffle(v, _)
            | Op::CallOutput(v, _) => vec![*v],
            Op::Binary(_, a, b)
            | Op::Insert(a, _, b)
            | Op::ExtractDynamic(a, b) => vec![*a, *b],
            Op::InsertDynamic(a, b, c) | Op::Select(a, b, c) => vec![*a, *b, *c],
            Op::Construct(values)
            | Op::Call(_, values)
            | Op::Intrinsic(_, values)
            | Op::Resource(_, values) => values.clone(),
        }
    }

    /// Rewrites every operand in place.
    pub fn map_operands(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        match self {
            Op::Const(_)
            | Op::Param(_)
            | Op::Input(_)
            | Op::Load(_)
            | Op::LoadGlobal(_) => {}
            Op::Output(_, v)
            | Op::Store(_, v)
            | Op::StoreGlobal(_, v)
            | Op::Unary(_, v)
            | Op::Convert(v)
            | Op::Splat(v)
            | Op::Extract(v, _)
            | Op::Shuffle(v, _)
            | Op::CallOutput(v, _) => *v = f(*v),
            Op::Binary(_, a, b) | Op::Insert(a, _, b) | Op::ExtractDynamic(a, b) => {
                *a = f(*a);
                *b = f(*b);
            }
            Op::InsertDynamic(a, b, c) | Op::Select(a, b, c) => {
                *a = f(*a);
                *b = f(*b);
                *c = f(*c);
            }
            Op::Construct(values)
            | Op::Call(_, values)
            | Op::Intrinsic(_, values)
            | Op::Resource(_, values) => values.iter_mut().for_each(|v| *v = f(*v)),
        }
    }

    pub fn has_side_effects(&self) -> bool {
        match self {
            Op::Output(..) | Op::Store(..) | Op::StoreGlobal(..) | Op::Call(..) => true,
            Op::Intrinsic(intrinsic, _) => intrinsic.has_side_effects(),
            Op::Resource(op, _) => op.has_side_effects(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub result: ValueId,
    pub ty: Type,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Return(Option<ValueId>),
    Jump(BlockId),
    Branch {
        cond: ValueId,
        then: BlockId,
        otherwise: BlockId,
    },
    /// Pixel shader `discard`.
    Discard,
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(target) => vec![*target],
            Terminator::Branch {
                then, otherwise, ..
            } => vec![*then, *otherwise],
            _ => Vec::new(),
        }
    }

    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Terminator::Return(Some(value)) => vec![*value],
            Terminator::Branch { cond, .. } => vec![*cond],
            _ => Vec::new(),
        }
    }

    pub fn map_operands(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        match self {
            Terminator::Return(Some(value)) => *value = f(*value),
            Terminator::Branch { cond, .. } => *cond = f(*cond),
            _ => {}
        }
    }

    pub fn map_successors(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            Terminator::Jump(target) => *target = f(*target),
            Terminator::Branch {
                then, otherwise, ..
            } => {
                *then = f(*then);
                *otherwise = f(*otherwise);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub insts: Vec<Inst>,
    pub terminator: Terminator,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: Type,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Parameter `i` lives in local slot `i`; `out` and `inout` parameters hand back the
    /// slot's value when the function returns.
    pub params: Vec<Parameter>,
    pub return_type: Type,
    pub locals: Vec<Local>,
    /// Empty for a declaration without a body. Execution starts at block 0.
    pub blocks: Vec<Block>,
    /// Values defined so far; new instructions take the next id.
    pub value_count: u32,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<Parameter>, return_type: Type) -> Self {
        Function {
            name: name.into(),
            params,
            return_type,
            locals: Vec::new(),
            blocks: Vec::new(),
            value_count: 0,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn add_local(&mut self, name: impl Into<String>, ty: Type) -> LocalId {
        self.locals.push(Local {
            name: name.into(),
            ty,
        });
        LocalId(self.locals.len() as u32 - 1)
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(Block {
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
        });
        BlockId(self.blocks.len() as u32 - 1)
    }

    pub fn push(&mut self, block: BlockId, ty: Type, op: Op) -> ValueId {
        let result = ValueId(self.value_count);
        self.value_count += 1;
        self.blocks[block.index()].insts.push(Inst { result, ty, op });
        result
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Inst> {
        self.blocks.iter().flat_map(|block| block.insts.iter())
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|block| block.insts.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalKind {
    /// Texture, buffer or sampler bound to a register.
    Resource { register: Option<String> },
    /// Member of a constant buffer. Implicit uniforms live in `$Globals`.
    Constant { buffer: String, register: Option<String> },
    Static,
    GroupShared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub kind: GlobalKind,
}

/// Semantic attached to an entry point input or output.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SystemValue {
    Undefined,
    Position,
    ClipDistance,
    CullDistance,
    VertexId,
    InstanceId,
    PrimitiveId,
    IsFrontFace,
    SampleIndex,
    Target,
    Depth,
    Coverage,
    DispatchThreadId,
    GroupId,
    GroupThreadId,
    GroupIndex,
}

impl SystemValue {
    /// Classifies a semantic such as `SV_Target1` or `TEXCOORD`. Unknown `SV_` names are `None`.
    pub fn from_semantic(semantic: &str) -> Option<SystemValue> {
        let (name, _) = SignatureElement::split_semantic(semantic);
        let lower = name.to_ascii_lowercase();
        let value = match lower.as_str() {
            "sv_position" => SystemValue::Position,
            "sv_clipdistance" => SystemValue::ClipDistance,
            "sv_culldistance" => SystemValue::CullDistance,
            "sv_vertexid" => SystemValue::VertexId,
            "sv_instanceid" => SystemValue::InstanceId,
            "sv_primitiveid" => SystemValue::PrimitiveId,
            "sv_isfrontface" => SystemValue::IsFrontFace,
            "sv_sampleindex" => SystemValue::SampleIndex,
            "sv_target" => SystemValue::Target,
            "sv_depth" => SystemValue::Depth,
            "sv_coverage" => SystemValue::Coverage,
            "sv_dispatchthreadid" => SystemValue::DispatchThreadId,
            "sv_groupid" => SystemValue::GroupId,
            "sv_groupthreadid" => SystemValue::GroupThreadId,
            "sv_groupindex" => SystemValue::GroupIndex,
            _ if lower.starts_with("sv_") => return None,
            _ => SystemValue::Undefined,
        };
        Some(value)
    }

    /// `D3D_NAME` code written into signature parts.
    pub fn code(self) -> u32 {
        match self {
            SystemValue::Undefined => 0,
            SystemValue::Position => 1,
            SystemValue::ClipDistance => 2,
            SystemValue::CullDistance => 3,
            SystemValue::VertexId => 6,
            SystemValue::PrimitiveId => 7,
            SystemValue::InstanceId => 8,
            SystemValue::IsFrontFace => 9,
            SystemValue::SampleIndex => 10,
            SystemValue::Target => 64,
            SystemValue::Depth => 65,
            SystemValue::Coverage => 66,
            SystemValue::DispatchThreadId => 20,
            SystemValue::GroupId => 21,
            SystemValue::GroupThreadId => 22,
            SystemValue::GroupIndex => 23,
        }
    }

    /// Compute thread ids are not part of the I/O signature.
    pub fn in_signature(self) -> bool {
        !matches!(
            self,
            SystemValue::DispatchThreadId
                | SystemValue::GroupId
                | SystemValue::GroupThreadId
                | SystemValue::GroupIndex
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignatureElement {
    /// Semantic name without its trailing index, e.g. `TEXCOORD`.
    pub semantic: String,
    pub index: u32,
    pub system_value: SystemValue,
    pub ty: Type,
    pub register: u32,
}

impl SignatureElement {
    /// Splits `TEXCOORD3` into `TEXCOORD` and 3.
    pub fn split_semantic(semantic: &str) -> (&str, u32) {
        let digits = semantic
            .bytes()
            .rev()
            .take_while(u8::is_ascii_digit)
            .count();
        let (name, index) = semantic.split_at(semantic.len() - digits);
        (name, index.parse().unwrap_or(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryPoint {
    pub function: FunctionId,
    pub stage: ShaderKind,
    pub inputs: Vec<SignatureElement>,
    pub outputs: Vec<SignatureElement>,
    pub thread_group: Option<[u32; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub profile: TargetProfile,
    pub source_name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
    /// `None` for library profiles.
    pub entry: Option<EntryPoint>,
}

impl Module {
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn entry_function(&self) -> Option<&Function> {
        self.entry.as_ref().map(|entry| self.function(entry.function))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_index_split() {
        assert_eq!(SignatureElement::split_semantic("TEXCOORD3"), ("TEXCOORD", 3));
        assert_eq!(SignatureElement::split_semantic("SV_Target"), ("SV_Target", 0));
        assert_eq!(SignatureElement::split_semantic("COLOR12"), ("COLOR", 12));
    }

    #[test]
    fn system_values() {
        assert_eq!(SystemValue::from_semantic("SV_POSITION"), Some(SystemValue::Position));
        assert_eq!(SystemValue::from_semantic("TEXCOORD"), Some(SystemValue::Undefined));
        assert_eq!(SystemValue::from_semantic("SV_Bogus"), None);
        assert_eq!(SystemValue::from_semantic("SV_Target3"), Some(SystemValue::Target));
        assert!(!SystemValue::DispatchThreadId.in_signature());
    }

    #[test]
    fn constant_conversion() {
        assert_eq!(Constant::Float(2.75).convert(ScalarKind::Int), Constant::Int(2));
        assert_eq!(Constant::Int(-1).convert(ScalarKind::Bool), Constant::Bool(true));
        assert_eq!(Constant::Bool(true).convert(ScalarKind::Float), Constant::Float(1.0));
    }

    #[test]
    fn values_are_numbered_in_order() {
        let mut function = Function::new("f", Vec::new(), Type::Void);
        let entry = function.add_block();
        let a = function.push(entry, Type::INT, Op::Const(Constant::Int(1)));
        let b = function.push(entry, Type::INT, Op::Binary(BinaryOp::Add, a, a));
        assert_eq!((a, b), (ValueId(0), ValueId(1)));
        assert_eq!(function.instruction_count(), 2);
        assert_eq!(function.blocks[0].insts[1].op.operands(), vec![a, a]);
    }
}
