//! The built-in backend: IR passes, validation and DXBC container serialization.

pub mod container;
pub mod encode;
pub mod parts;
pub mod passes;

use crate::config::CompileOptions;
use crate::enums::CompileFlags;
use crate::ir::{Module, SignatureElement};
use crate::logger::DiagnosticLog;
use crate::pipeline::Backend;
use crate::types::Type;
use container::ContainerBuilder;
use encode::EncodeOptions;
use parts::ShaderFeatures;

/// Signature registers available to each of the input and output signatures.
pub const MAX_SIGNATURE_REGISTERS: u32 = 32;

/// Serializes modules into DXBC containers holding the encoded program.
#[derive(Debug, Default, Copy, Clone)]
pub struct DxilBackend;

impl Backend for DxilBackend {
    fn emit(
        &self,
        mut module: Module,
        options: &CompileOptions,
        diags: &mut DiagnosticLog,
    ) -> Option<Vec<u8>> {
        if options.optimizations_enabled() {
            let stats = passes::optimize(&mut module);
            log::trace!(
                "optimized {}: folded {}, removed {} blocks and {} values",
                module.source_name,
                stats.folded,
                stats.removed_blocks,
                stats.removed_stores + stats.removed_values
            );
        } else {
            log::debug!("skipping optimizations for {}", module.source_name);
        }

        if !options.flags.contains(CompileFlags::SKIP_VALIDATION) {
            validate(&module, diags);
            if diags.has_errors() {
                return None;
            }
        }

        Some(serialize(&module, options.flags))
    }
}

/// Number of signature registers a value of `ty` occupies.
fn register_rows(ty: &Type) -> u32 {
    match ty {
        Type::Matrix(_, rows, _) => u32::from(*rows),
        Type::Array(element, len) => register_rows(element).saturating_mul(*len),
        _ => 1,
    }
}

fn signature_rows(elements: &[SignatureElement]) -> u32 {
    elements
        .iter()
        .filter(|element| element.system_value.in_signature())
        .map(|element| register_rows(&element.ty))
        .fold(0, u32::saturating_add)
}

/// Checks the limits the container format imposes on a checked module.
fn validate(module: &Module, diags: &mut DiagnosticLog) {
    let Some(entry) = &module.entry else {
        return;
    };
    for (elements, kind) in [(&entry.inputs, "input"), (&entry.outputs, "output")] {
        let rows = signature_rows(elements);
        if rows > MAX_SIGNATURE_REGISTERS {
            diags.report(
                crate::diagnostic::Severity::Error,
                None,
                format!(
                    "{kind} signature of '{}' needs {rows} registers, more than the {MAX_SIGNATURE_REGISTERS} available",
                    module.function(entry.function).name
                ),
            );
        }
    }
}

/// Writes the signed container for a validated module.
pub fn serialize(module: &Module, flags: CompileFlags) -> Vec<u8> {
    let debug_info = flags.contains(CompileFlags::DEBUG_INFO);
    let encoded = encode::encode_module(
        module,
        EncodeOptions {
            debug_names: debug_info && !flags.contains(CompileFlags::STRIP_DEBUG),
        },
    );
    let program = parts::program(&module.profile, &encoded);

    let mut builder = ContainerBuilder::new();
    builder.add_part(
        container::FEATURE_INFO,
        parts::feature_info(ShaderFeatures::of(module, flags)),
    );
    if let Some(entry) = &module.entry {
        builder
            .add_part(container::INPUT_SIGNATURE, parts::signature(&entry.inputs, true))
            .add_part(container::OUTPUT_SIGNATURE, parts::signature(&entry.outputs, false));
    }
    if !flags.contains(CompileFlags::STRIP_REFLECTION) {
        builder.add_part(container::STATISTICS, parts::statistics(module));
    }
    if debug_info && !flags.contains(CompileFlags::STRIP_DEBUG) {
        let name = parts::debug_file_name(&program);
        builder.add_part(container::DEBUG_NAME, parts::debug_name(&name));
    }
    builder.add_part(container::PROGRAM, program);

    log::debug!(
        "serialized {} for {} with {} parts",
        module.source_name,
        module.profile,
        builder.part_count()
    );
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::HlslFrontend;
    use crate::include::NoIncludeHandler;
    use crate::pipeline::Frontend;
    use crate::source::TranslationUnit;
    use std::sync::Arc;

    fn emit(text: &str, args: &[&str]) -> (Option<Vec<u8>>, Vec<String>) {
        let mut diags = DiagnosticLog::new();
        let options = CompileOptions::from_args(args, &mut diags);
        let unit = TranslationUnit {
            name: Arc::from(options.source_name.as_str()),
            text: text.to_owned(),
        };
        let module = HlslFrontend::default()
            .compile(&unit, &options, &mut NoIncludeHandler, &mut diags)
            .expect("module");
        let object = DxilBackend.emit(module, &options, &mut diags);
        let messages = diags
            .finish()
            .map(|d| d.iter().map(|d| d.to_string()).collect())
            .unwrap_or_default();
        (object, messages)
    }

    fn fourccs(blob: &[u8]) -> Vec<[u8; 4]> {
        container::parts(blob)
            .expect("container")
            .iter()
            .map(|part| part.fourcc)
            .collect()
    }

    const TEXTURED: &str = include_str!("../../test/textured.hlsl");

    #[test]
    fn default_parts() {
        let (object, _) = emit(TEXTURED, &["-T", "ps_6_0"]);
        let object = object.expect("object");
        assert!(mach_siegbert_vogt_dxcsa::verify(&object));
        assert_eq!(
            fourccs(&object),
            [*b"SFI0", *b"ISG1", *b"OSG1", *b"STAT", *b"DXIL"]
        );
    }

    #[test]
    fn debug_and_strip_flags() {
        let (object, _) = emit(TEXTURED, &["-T", "ps_6_0", "-Zi"]);
        assert!(fourccs(&object.expect("object")).contains(b"ILDN"));

        let (object, _) = emit(
            TEXTURED,
            &["-T", "ps_6_0", "-Zi", "-Qstrip_debug", "-Qstrip_reflect"],
        );
        assert_eq!(fourccs(&object.expect("object")), [*b"SFI0", *b"ISG1", *b"OSG1", *b"DXIL"]);
    }

    #[test]
    fn deterministic_output() {
        let (first, _) = emit(TEXTURED, &["-T", "ps_6_0"]);
        let (second, _) = emit(TEXTURED, &["-T", "ps_6_0"]);
        assert_eq!(first, second);
    }

    #[test]
    fn optimizations_shrink_the_program() {
        let source = "float4 main() : SV_Target { float a = 2.0 * 3.0; float b = a + 1.0; return float4(b, b, b, 1); }";
        let program = |args: &[&str]| {
            let (object, _) = emit(source, args);
            let object = object.expect("object");
            container::find_part(&object, container::PROGRAM)
                .expect("program")
                .len()
        };
        assert!(program(&["-T", "ps_6_0"]) < program(&["-T", "ps_6_0", "-Od"]));
    }

    #[test]
    fn compute_thread_ids_stay_out_of_the_signature() {
        let (object, _) = emit(include_str!("../../test/compute.hlsl"), &["-T", "cs_6_0"]);
        let object = object.expect("object");
        let inputs = container::find_part(&object, container::INPUT_SIGNATURE).expect("ISG1");
        assert_eq!(&inputs[..4], &0u32.to_le_bytes());
    }

    #[test]
    fn library_has_no_signatures() {
        let (object, _) = emit("float twice(float x) { return x * 2; }", &["-T", "lib_6_3"]);
        assert_eq!(fourccs(&object.expect("object")), [*b"SFI0", *b"STAT", *b"DXIL"]);
    }

    #[test]
    fn oversized_signature_is_rejected() {
        let fields: String = (b'A'..=b'I')
            .map(|name| format!("float4x4 {0} : {0}; ", name as char))
            .collect();
        let source = format!(
            "struct Wide {{ {fields}}};\nfloat4 main(Wide wide) : SV_Target {{ return 1; }}"
        );
        let (object, messages) = emit(&source, &["-T", "ps_6_0"]);
        assert!(object.is_none());
        assert_eq!(
            messages,
            ["error: input signature of 'main' needs 36 registers, more than the 32 available"]
        );

        let (object, _) = emit(&source, &["-T", "ps_6_0", "-Vd"]);
        assert!(object.is_some());
    }
}
