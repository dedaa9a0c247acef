//! Contents of the individual container parts.

use super::encode::{encode_global, encode_type, Writer};
use crate::enums::{CompileFlags, ShaderKind, TargetProfile};
use crate::ir::{Module, SignatureElement};
use crate::types::{ScalarKind, Type};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::mem::size_of;

bitflags! {
    /// Optional device features a program relies on, stored in `SFI0`.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
    pub struct ShaderFeatures: u64 {
        const DOUBLES = 0x1;
        const UAVS_AT_EVERY_STAGE = 0x4;
        const MINIMUM_PRECISION = 0x10;
        const INT64_OPS = 0x8000;
        const NATIVE_LOW_PRECISION = 0x80_0000;
    }
}

impl ShaderFeatures {
    pub fn of(module: &Module, flags: CompileFlags) -> ShaderFeatures {
        let mut features = ShaderFeatures::empty();
        let mut visit = |ty: &Type| features |= type_features(ty, flags);

        for global in &module.globals {
            visit(&global.ty);
        }
        for function in &module.functions {
            function.params.iter().for_each(|p| visit(&p.ty));
            function.locals.iter().for_each(|l| visit(&l.ty));
            function.instructions().for_each(|inst| visit(&inst.ty));
            visit(&function.return_type);
        }

        let writes_resources = module.globals.iter().any(|global| {
            matches!(&global.ty, Type::Resource(kind, _) if kind.is_writable())
        });
        if writes_resources
            && !matches!(module.profile.kind, ShaderKind::Compute | ShaderKind::Pixel)
        {
            features |= ShaderFeatures::UAVS_AT_EVERY_STAGE;
        }
        features
    }
}

fn type_features(ty: &Type, flags: CompileFlags) -> ShaderFeatures {
    match ty {
        Type::Struct(def) => def
            .fields
            .iter()
            .fold(ShaderFeatures::empty(), |acc, field| acc | type_features(&field.ty, flags)),
        Type::Array(element, _) | Type::Resource(_, element) => type_features(element, flags),
        _ => match ty.scalar_kind() {
            Some(ScalarKind::Double) => ShaderFeatures::DOUBLES,
            Some(ScalarKind::Int64 | ScalarKind::Uint64) => ShaderFeatures::INT64_OPS,
            Some(ScalarKind::Half) if flags.contains(CompileFlags::ENABLE_16BIT_TYPES) => {
                ShaderFeatures::NATIVE_LOW_PRECISION
            }
            Some(ScalarKind::Half) => ShaderFeatures::MINIMUM_PRECISION,
            _ => ShaderFeatures::empty(),
        },
    }
}

pub fn feature_info(features: ShaderFeatures) -> Vec<u8> {
    features.bits().to_le_bytes().to_vec()
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct SignatureHeader {
    element_count: u32,
    element_offset: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct SignatureRecord {
    stream: u32,
    name_offset: u32,
    semantic_index: u32,
    system_value: u32,
    component_type: u32,
    register: u32,
    mask: u8,
    rw_mask: u8,
    pad: [u8; 2],
    min_precision: u32,
}

/// `D3D_REGISTER_COMPONENT_TYPE` of a signature element.
fn component_type(ty: &Type) -> u32 {
    match ty.scalar_kind() {
        Some(ScalarKind::Bool | ScalarKind::Uint) => 1,
        Some(ScalarKind::Int) => 2,
        Some(ScalarKind::Float) => 3,
        Some(ScalarKind::Half) => 6,
        Some(ScalarKind::Uint64) => 7,
        Some(ScalarKind::Int64) => 8,
        Some(ScalarKind::Double) => 9,
        None => 0,
    }
}

fn component_mask(ty: &Type) -> u8 {
    let columns = match ty {
        Type::Matrix(_, _, columns) => u32::from(*columns),
        _ => ty.component_count().min(4),
    };
    ((1u32 << columns) - 1) as u8
}

/// `ISG1` or `OSG1` contents. Elements that are not part of the I/O signature, such as
/// compute thread ids, are left out.
pub fn signature(elements: &[SignatureElement], input: bool) -> Vec<u8> {
    let elements: Vec<&SignatureElement> = elements
        .iter()
        .filter(|element| element.system_value.in_signature())
        .collect();

    let records_start = size_of::<SignatureHeader>();
    let names_start = records_start + elements.len() * size_of::<SignatureRecord>();

    let mut names = Writer::new();
    let mut name_offsets: HashMap<&str, u32> = HashMap::new();
    let mut records = Vec::with_capacity(elements.len());
    for element in &elements {
        let name_offset = *name_offsets
            .entry(element.semantic.as_str())
            .or_insert_with(|| {
                let offset = (names_start + names.len()) as u32;
                names.bytes(element.semantic.as_bytes());
                names.u8(0);
                offset
            });
        let mask = component_mask(&element.ty);
        records.push(SignatureRecord {
            stream: 0,
            name_offset: name_offset.to_le(),
            semantic_index: element.index.to_le(),
            system_value: element.system_value.code().to_le(),
            component_type: component_type(&element.ty).to_le(),
            register: element.register.to_le(),
            mask,
            rw_mask: if input { mask } else { 0 },
            pad: [0; 2],
            min_precision: 0,
        });
    }
    names.align(4);

    let header = SignatureHeader {
        element_count: (elements.len() as u32).to_le(),
        element_offset: (records_start as u32).to_le(),
    };
    let mut data = bytemuck::bytes_of(&header).to_vec();
    data.extend_from_slice(bytemuck::cast_slice(&records));
    data.extend_from_slice(&names.into_bytes());
    data
}

/// `STAT` contents: the module's resources, constants and entry point layout.
pub fn statistics(module: &Module) -> Vec<u8> {
    let mut w = Writer::new();
    w.str(&module.profile.to_string());
    w.u32(module.globals.len() as u32);
    for global in &module.globals {
        encode_global(&mut w, global);
    }
    if let Some(entry) = &module.entry {
        w.str(&module.function(entry.function).name);
        for elements in [&entry.inputs, &entry.outputs] {
            w.u32(elements.len() as u32);
            for element in elements {
                w.str(&element.semantic);
                w.u32(element.index);
                encode_type(&mut w, &element.ty);
            }
        }
        for size in entry.thread_group.unwrap_or([0; 3]) {
            w.u32(size);
        }
    }
    w.into_bytes()
}

/// `ILDN` contents: flags, name length and the NUL-terminated name.
pub fn debug_name(name: &str) -> Vec<u8> {
    let mut w = Writer::new();
    w.u16(0);
    w.u16(name.len() as u16);
    w.bytes(name.as_bytes());
    w.u8(0);
    w.align(4);
    w.into_bytes()
}

/// Name of the debug file paired with a program: the hex MD5 of the program part.
pub fn debug_file_name(program: &[u8]) -> String {
    let digest = mach_siegbert_vogt_dxcsa::Md5::digest(program);
    let mut name: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    name.push_str(".pdb");
    name
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct ProgramHeader {
    pub program_version: u32,
    /// Size of the whole part in 32-bit words.
    pub size_in_words: u32,
    pub magic: [u8; 4],
    pub dxil_version: u32,
    /// Offset of the body from `magic`.
    pub body_offset: u32,
    pub body_size: u32,
}

pub const PROGRAM_MAGIC: [u8; 4] = *b"DXIL";

/// `DXIL` contents: the program header followed by the encoded module.
pub fn program(profile: &TargetProfile, body: &[u8]) -> Vec<u8> {
    let body_size = body.len().next_multiple_of(4);
    let total = size_of::<ProgramHeader>() + body_size;
    let header = ProgramHeader {
        program_version: profile.program_version().to_le(),
        size_in_words: ((total / 4) as u32).to_le(),
        magic: PROGRAM_MAGIC,
        dxil_version: ((1u32 << 8) | u32::from(profile.model.minor)).to_le(),
        body_offset: 16u32.to_le(),
        body_size: (body_size as u32).to_le(),
    };

    let mut data = Vec::with_capacity(total);
    data.extend_from_slice(bytemuck::bytes_of(&header));
    data.extend_from_slice(body);
    data.resize(total, 0);
    data
}
