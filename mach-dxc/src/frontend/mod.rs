//! The built-in HLSL front end: preprocess, lex, parse, check and lower.

pub mod ast;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod preprocessor;
pub mod sema;

use crate::config::CompileOptions;
use crate::include::IncludeHandler;
use crate::ir::Module;
use crate::logger::DiagnosticLog;
use crate::pipeline::Frontend;
use crate::registry::Registry;
use crate::source::TranslationUnit;
use std::sync::Arc;

/// Stack reserved for parsing, checking and lowering. All three recurse over the syntax
/// tree, whose depth the parser bounds.
const SYNTAX_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Runs the syntax stages on a thread with a [`SYNTAX_STACK_SIZE`] stack, or inline if no
/// such thread can be started. Panics are resumed on the calling thread.
fn on_syntax_stack(run: impl FnOnce() -> Option<Module> + Send) -> Option<Module> {
    let mut pending = Some(run);
    let joined = std::thread::scope(|scope| {
        let spawned = std::thread::Builder::new()
            .name("mach-dxc-syntax".to_owned())
            .stack_size(SYNTAX_STACK_SIZE)
            .spawn_scoped(scope, || pending.take().and_then(|run| run()));
        match spawned {
            Ok(handle) => handle.join(),
            Err(e) => {
                log::warn!("[mach-dxc] running the syntax stages inline: {}", e);
                Ok(None)
            }
        }
    });
    match joined {
        Ok(module) => module.or_else(|| pending.take().and_then(|run| run())),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Front end for the supported HLSL subset.
#[derive(Debug, Clone)]
pub struct HlslFrontend {
    registry: Arc<Registry>,
}

impl HlslFrontend {
    pub fn new(registry: Arc<Registry>) -> Self {
        HlslFrontend { registry }
    }
}

impl Default for HlslFrontend {
    fn default() -> Self {
        HlslFrontend::new(Registry::acquire())
    }
}

impl Frontend for HlslFrontend {
    fn compile(
        &self,
        unit: &TranslationUnit,
        options: &CompileOptions,
        includes: &mut dyn IncludeHandler,
        diags: &mut DiagnosticLog,
    ) -> Option<Module> {
        let preprocessed = preprocessor::preprocess(unit, options, includes, diags);
        log::debug!(
            "preprocessed {} into {} tokens from {} files",
            unit.name,
            preprocessed.tokens.len(),
            preprocessed.files.len()
        );
        if diags.has_fatal() {
            return None;
        }

        let tokens = preprocessed.tokens;
        let registry = &self.registry;
        on_syntax_stack(move || {
            let ast = parser::parse(tokens, diags);
            if diags.has_errors() {
                log::debug!("not checking {}: {} errors so far", unit.name, diags.error_count());
                return None;
            }

            let analysis = sema::analyze(&ast, options, registry.intrinsics(), diags);
            if diags.has_errors() {
                return None;
            }

            lower::lower(&ast, &analysis, options)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::include::{MemoryIncludeHandler, NoIncludeHandler};
    use crate::ir::Op;
    use parser::{MAX_EXPRESSION_HEIGHT, MAX_NESTING};

    fn run(
        text: &str,
        args: &[&str],
        includes: &mut dyn IncludeHandler,
    ) -> (Option<Module>, Vec<String>) {
        let mut diags = DiagnosticLog::new();
        let options = CompileOptions::from_args(args, &mut diags);
        let unit = TranslationUnit {
            name: Arc::from(options.source_name.as_str()),
            text: text.to_owned(),
        };
        let module = HlslFrontend::default().compile(&unit, &options, includes, &mut diags);
        let messages = diags
            .finish()
            .map(|d| d.iter().map(|d| d.to_string()).collect())
            .unwrap_or_default();
        (module, messages)
    }

    #[test]
    fn included_helpers_are_visible() {
        let mut includes =
            MemoryIncludeHandler::new().with_file("lighting.hlsli", include_str!("../../test/lighting.hlsli"));
        let (module, messages) = run(
            include_str!("../../test/lit.hlsl"),
            &["-T", "ps_6_0"],
            &mut includes,
        );
        assert!(messages.is_empty(), "{:?}", messages);
        let module = module.expect("module");
        assert!(module.functions.iter().any(|f| f.name == "lambert"));
    }

    #[test]
    fn missing_include_stops_before_parsing() {
        let (module, messages) = run(
            "#include \"missing.h\"\nfloat4 main() : SV_Target { return undeclared; }",
            &["-T", "ps_6_0"],
            &mut NoIncludeHandler,
        );
        assert!(module.is_none());
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("'missing.h' file not found"));
    }

    #[test]
    fn syntax_errors_skip_checking() {
        let (module, messages) = run(
            "float4 main() : SV_Target { return undeclared }",
            &["-T", "ps_6_0"],
            &mut NoIncludeHandler,
        );
        assert!(module.is_none());
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("expected ';'"));
    }

    #[test]
    fn defines_reach_the_source() {
        let source = "#ifdef MYDEFINE\nfloat4 main() : SV_Target { return 1; }\n#endif\n";
        let (with, _) = run(source, &["-T", "ps_6_0", "-D", "MYDEFINE=1"], &mut NoIncludeHandler);
        let (without, messages) = run(source, &["-T", "ps_6_0"], &mut NoIncludeHandler);
        assert!(with.is_some());
        assert!(without.is_none());
        assert_eq!(messages, ["error: missing entry point definition"]);
    }

    #[test]
    fn entry_wrapper_writes_outputs() {
        let (module, _) = run(
            "float4 main() : SV_Target { return float4(0, 0, 0, 0); }",
            &["-E", "main", "-T", "ps_6_0"],
            &mut NoIncludeHandler,
        );
        let module = module.expect("module");
        let wrapper = module.entry_function().expect("entry");
        assert!(wrapper
            .instructions()
            .any(|inst| matches!(inst.op, Op::Output(0, _))));
    }

    fn nested_return(depth: usize) -> String {
        format!(
            "float4 main() : SV_Target {{ return {}1{}; }}",
            "(".repeat(depth),
            ")".repeat(depth)
        )
    }

    #[test]
    fn nesting_up_to_the_limit_compiles() {
        // The function body counts as one level.
        let (module, messages) =
            run(&nested_return(MAX_NESTING - 1), &["-T", "ps_6_0"], &mut NoIncludeHandler);
        assert!(messages.is_empty(), "{:?}", messages);
        assert!(module.is_some());
    }

    #[test]
    fn nesting_past_the_limit_is_fatal() {
        let (module, messages) =
            run(&nested_return(MAX_NESTING), &["-T", "ps_6_0"], &mut NoIncludeHandler);
        assert!(module.is_none());
        assert_eq!(messages.len(), 1, "{:?}", messages);
        assert!(
            messages[0].ends_with("fatal error: bracket nesting level exceeded maximum of 256"),
            "{}",
            messages[0]
        );

        let (module, messages) = run(&nested_return(4000), &["-T", "ps_6_0"], &mut NoIncludeHandler);
        assert!(module.is_none());
        assert_eq!(messages.len(), 1, "{:?}", messages);
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        let chain = |terms: usize| {
            format!(
                "float4 main() : SV_Target {{ float x = 1; return x{}; }}",
                " + x".repeat(terms - 1)
            )
        };

        let (module, messages) = run(&chain(500), &["-T", "ps_6_0"], &mut NoIncludeHandler);
        assert!(messages.is_empty(), "{:?}", messages);
        assert!(module.is_some());

        let (module, messages) = run(
            &chain(MAX_EXPRESSION_HEIGHT as usize + 2),
            &["-T", "ps_6_0"],
            &mut NoIncludeHandler,
        );
        assert!(module.is_none());
        assert_eq!(messages.len(), 1, "{:?}", messages);
        assert!(messages[0].contains("fatal error: expression is too deeply nested"));
    }

    #[test]
    fn unary_chains_count_as_nesting() {
        let source = format!(
            "float4 main() : SV_Target {{ return {}1; }}",
            "- ".repeat(MAX_NESTING * 4)
        );
        let (module, messages) = run(&source, &["-T", "ps_6_0"], &mut NoIncludeHandler);
        assert!(module.is_none());
        assert!(messages[0].contains("bracket nesting level exceeded"), "{:?}", messages);
    }
}
