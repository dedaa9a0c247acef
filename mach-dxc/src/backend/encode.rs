//! Deterministic little-endian encoding of an IR module.
//!
//! The encoding is a flat preorder walk: every list is prefixed with its `u32` length and
//! every string with its `u32` byte length. Nothing is emitted from hash-ordered tables, so
//! the same module always encodes to the same bytes.

use crate::ir::{
    Block, Constant, Direction, Function, Global, GlobalKind, Inst, Module, Op, Terminator,
    ValueId,
};
use crate::types::Type;

/// Leading magic of the encoded module.
pub const MODULE_MAGIC: [u8; 4] = *b"MDIR";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn u16(&mut self, value: u16) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn u64(&mut self, value: u64) {
        self.bytes(&value.to_le_bytes());
    }

    pub fn str(&mut self, value: &str) {
        self.u32(value.len() as u32);
        self.bytes(value.as_bytes());
    }

    /// Pads with zeros up to a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        let padded = self.bytes.len().next_multiple_of(alignment);
        self.bytes.resize(padded, 0);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Knobs for [`encode_module`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Keep parameter and local names. Without them names are written empty.
    pub debug_names: bool,
}

pub fn encode_module(module: &Module, options: EncodeOptions) -> Vec<u8> {
    let mut w = Writer::new();
    w.bytes(&MODULE_MAGIC);
    w.u32(FORMAT_VERSION);
    w.u32(module.profile.program_version());

    w.u32(module.globals.len() as u32);
    for global in &module.globals {
        encode_global(&mut w, global);
    }

    w.u32(module.functions.len() as u32);
    for function in &module.functions {
        encode_function(&mut w, function, options);
    }

    match &module.entry {
        Some(entry) => {
            w.u8(1);
            w.u32(entry.function.0);
            w.u32(entry.stage.program_kind());
            for size in entry.thread_group.unwrap_or([0; 3]) {
                w.u32(size);
            }
        }
        None => w.u8(0),
    }
    w.into_bytes()
}

pub fn encode_type(w: &mut Writer, ty: &Type) {
    match ty {
        Type::Void => w.u8(0),
        Type::Scalar(kind) => {
            w.u8(1);
            w.u8(*kind as u8);
        }
        Type::Vector(kind, n) => {
            w.u8(2);
            w.u8(*kind as u8);
            w.u8(*n);
        }
        Type::Matrix(kind, rows, columns) => {
            w.u8(3);
            w.u8(*kind as u8);
            w.u8(*rows);
            w.u8(*columns);
        }
        Type::Struct(def) => {
            w.u8(4);
            w.str(&def.name);
            w.u32(def.fields.len() as u32);
            for field in &def.fields {
                w.str(&field.name);
                encode_type(w, &field.ty);
            }
        }
        Type::Resource(kind, element) => {
            w.u8(5);
            w.u8(*kind as u8);
            encode_type(w, element);
        }
        Type::Sampler { comparison } => {
            w.u8(6);
            w.u8(u8::from(*comparison));
        }
        Type::Array(element, len) => {
            w.u8(7);
            w.u32(*len);
            encode_type(w, element);
        }
        Type::Error => w.u8(0xff),
    }
}

fn encode_optional_str(w: &mut Writer, value: Option<&str>) {
    match value {
        Some(value) => {
            w.u8(1);
            w.str(value);
        }
        None => w.u8(0),
    }
}

pub fn encode_global(w: &mut Writer, global: &Global) {
    w.str(&global.name);
    encode_type(w, &global.ty);
    match &global.kind {
        GlobalKind::Resource { register } => {
            w.u8(0);
            encode_optional_str(w, register.as_deref());
        }
        GlobalKind::Constant { buffer, register } => {
            w.u8(1);
            w.str(buffer);
            encode_optional_str(w, register.as_deref());
        }
        GlobalKind::Static => w.u8(2),
        GlobalKind::GroupShared => w.u8(3),
    }
}

fn encode_function(w: &mut Writer, function: &Function, options: EncodeOptions) {
    let name = |name: &str| if options.debug_names { name.to_owned() } else { String::new() };

    w.str(&function.name);
    w.u32(function.params.len() as u32);
    for param in &function.params {
        w.str(&name(&param.name));
        encode_type(w, &param.ty);
        w.u8(match param.direction {
            Direction::In => 0,
            Direction::Out => 1,
            Direction::InOut => 2,
        });
    }
    encode_type(w, &function.return_type);

    w.u32(function.locals.len() as u32);
    for local in &function.locals {
        w.str(&name(&local.name));
        encode_type(w, &local.ty);
    }

    w.u32(function.value_count);
    w.u32(function.blocks.len() as u32);
    for block in &function.blocks {
        encode_block(w, block);
    }
}

fn encode_block(w: &mut Writer, block: &Block) {
    w.u32(block.insts.len() as u32);
    for inst in &block.insts {
        encode_inst(w, inst);
    }

    match &block.terminator {
        Terminator::Return(None) => w.u8(0),
        Terminator::Return(Some(value)) => {
            w.u8(1);
            w.u32(value.0);
        }
        Terminator::Jump(target) => {
            w.u8(2);
            w.u32(target.0);
        }
        Terminator::Branch {
            cond,
            then,
            otherwise,
        } => {
            w.u8(3);
            w.u32(cond.0);
            w.u32(then.0);
            w.u32(otherwise.0);
        }
        Terminator::Discard => w.u8(4),
        Terminator::Unreachable => w.u8(5),
    }
}

fn values(w: &mut Writer, values: &[ValueId]) {
    w.u32(values.len() as u32);
    for value in values {
        w.u32(value.0);
    }
}

fn encode_constant(w: &mut Writer, constant: Constant) {
    match constant {
        Constant::Bool(value) => {
            w.u8(0);
            w.u8(u8::from(value));
        }
        Constant::Int(value) => {
            w.u8(1);
            w.u64(value as u64);
        }
        Constant::Uint(value) => {
            w.u8(2);
            w.u64(value);
        }
        Constant::Float(value) => {
            w.u8(3);
            w.u64(value.to_bits());
        }
    }
}

fn encode_inst(w: &mut Writer, inst: &Inst) {
    w.u32(inst.result.0);
    encode_type(w, &inst.ty);
    match &inst.op {
        Op::Const(constant) => {
            w.u8(0);
            encode_constant(w, *constant);
        }
        Op::Param(index) => {
            w.u8(1);
            w.u32(*index);
        }
        Op::Input(register) => {
            w.u8(2);
            w.u32(*register);
        }
        Op::Output(register, value) => {
            w.u8(3);
            w.u32(*register);
            w.u32(value.0);
        }
        Op::Load(local) => {
            w.u8(4);
            w.u32(local.0);
        }
        Op::Store(local, value) => {
            w.u8(5);
            w.u32(local.0);
            w.u32(value.0);
        }
        Op::LoadGlobal(global) => {
            w.u8(6);
            w.u32(global.0);
        }
        Op::StoreGlobal(global, value) => {
            w.u8(7);
            w.u32(global.0);
            w.u32(value.0);
        }
        Op::Unary(op, value) => {
            w.u8(8);
            w.u8(*op as u8);
            w.u32(value.0);
        }
        Op::Binary(op, a, b) => {
            w.u8(9);
            w.u8(*op as u8);
            w.u32(a.0);
            w.u32(b.0);
        }
        Op::Convert(value) => {
            w.u8(10);
            w.u32(value.0);
        }
        Op::Splat(value) => {
            w.u8(11);
            w.u32(value.0);
        }
        Op::Construct(elements) => {
            w.u8(12);
            values(w, elements);
        }
        Op::Extract(value, index) => {
            w.u8(13);
            w.u32(value.0);
            w.u32(*index);
        }
        Op::Insert(aggregate, index, value) => {
            w.u8(14);
            w.u32(aggregate.0);
            w.u32(*index);
            w.u32(value.0);
        }
        Op::Shuffle(value, components) => {
            w.u8(15);
            w.u32(value.0);
            w.u8(components.len() as u8);
            w.bytes(components);
        }
        Op::ExtractDynamic(aggregate, index) => {
            w.u8(16);
            w.u32(aggregate.0);
            w.u32(index.0);
        }
        Op::InsertDynamic(aggregate, index, value) => {
            w.u8(17);
            w.u32(aggregate.0);
            w.u32(index.0);
            w.u32(value.0);
        }
        Op::Select(cond, then, otherwise) => {
            w.u8(18);
            w.u32(cond.0);
            w.u32(then.0);
            w.u32(otherwise.0);
        }
        Op::Call(function, args) => {
            w.u8(19);
            w.u32(function.0);
            values(w, args);
        }
        Op::CallOutput(call, index) => {
            w.u8(20);
            w.u32(call.0);
            w.u32(*index);
        }
        Op::Intrinsic(intrinsic, args) => {
            w.u8(21);
            w.u16(intrinsic.opcode());
            values(w, args);
        }
        Op::Resource(op, args) => {
            w.u8(22);
            w.u8(*op as u8);
            values(w, args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{ShaderKind, ShaderModel, TargetProfile};
    use crate::ir::{BinaryOp, Parameter};

    fn module(param_name: &str) -> Module {
        let mut function = Function::new(
            "scale",
            vec![Parameter {
                name: param_name.into(),
                ty: Type::FLOAT,
                direction: Direction::In,
            }],
            Type::FLOAT,
        );
        let entry = function.add_block();
        let x = function.push(entry, Type::FLOAT, Op::Param(0));
        let two = function.push(entry, Type::FLOAT, Op::Const(Constant::Float(2.0)));
        let product = function.push(entry, Type::FLOAT, Op::Binary(BinaryOp::Mul, x, two));
        function.blocks[0].terminator = Terminator::Return(Some(product));

        Module {
            profile: TargetProfile::new(ShaderKind::Library, ShaderModel { major: 6, minor: 3 }),
            source_name: "test.hlsl".into(),
            functions: vec![function],
            globals: vec![Global {
                name: "tint".into(),
                ty: Type::Vector(crate::types::ScalarKind::Float, 4),
                kind: GlobalKind::Constant {
                    buffer: "$Globals".into(),
                    register: None,
                },
            }],
            entry: None,
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let first = encode_module(&module("x"), EncodeOptions::default());
        let second = encode_module(&module("x"), EncodeOptions::default());
        assert_eq!(first, second);
        assert_eq!(&first[..4], b"MDIR");
        assert_eq!(first[4..8], FORMAT_VERSION.to_le_bytes());
    }

    #[test]
    fn names_only_with_debug_info() {
        let stripped = encode_module(&module("x"), EncodeOptions::default());
        let renamed = encode_module(&module("y"), EncodeOptions::default());
        assert_eq!(stripped, renamed);

        let debug = EncodeOptions { debug_names: true };
        assert_ne!(encode_module(&module("x"), debug), encode_module(&module("y"), debug));
        assert_eq!(encode_module(&module("x"), debug).len(), stripped.len() + 1);
    }

    #[test]
    fn writer_alignment() {
        let mut w = Writer::new();
        w.u8(7);
        w.align(4);
        assert_eq!(w.len(), 4);
        w.align(4);
        assert_eq!(w.into_bytes(), [7, 0, 0, 0]);
    }
}
