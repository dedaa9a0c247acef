use crate::backend::DxilBackend;
use crate::config::CompileOptions;
use crate::diagnostic::{Location, Severity};
use crate::enums::CompileFlags;
use crate::error::CompilerError;
use crate::frontend::HlslFrontend;
use crate::include::{FileSystemIncludeHandler, IncludeHandler};
use crate::logger::DiagnosticLog;
use crate::object::Object;
use crate::pipeline::Pipeline;
use crate::registry::Registry;
use crate::result::CompileResult;
use crate::source::{SourceBuffer, TranslationUnit};
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

/// A compiler instance bound to one pipeline.
///
/// Instances may move between threads but are not `Sync`; [`compile`](Compiler::compile)
/// takes `&mut self`, so at most one compile runs on an instance at a time. Independent
/// instances compile concurrently.
#[derive(Debug)]
pub struct Compiler {
    pipeline: Pipeline,
    registry: Arc<Registry>,
    _not_sync: PhantomData<Cell<()>>,
}

impl Compiler {
    /// Creates a compiler running the built-in HLSL front end and DXIL backend.
    pub fn new() -> Result<Compiler, CompilerError> {
        let registry = acquire_registry()?;
        let pipeline = Pipeline::new(HlslFrontend::new(Arc::clone(&registry)), DxilBackend);
        Ok(Compiler {
            pipeline,
            registry,
            _not_sync: PhantomData,
        })
    }

    /// Creates a compiler running a caller-supplied pipeline.
    pub fn with_pipeline(pipeline: Pipeline) -> Result<Compiler, CompilerError> {
        Ok(Compiler {
            pipeline,
            registry: acquire_registry()?,
            _not_sync: PhantomData,
        })
    }

    /// Compiles one source buffer.
    ///
    /// `args` uses the dxc command line vocabulary, in order. Without an include handler,
    /// includes are read from disk relative to the including file and the `-I` directories.
    ///
    /// Every problem, from bad arguments to backend faults, is reported through the
    /// returned result; this never fails outright.
    pub fn compile<'a, S: AsRef<str>>(
        &mut self,
        source: impl Into<SourceBuffer<'a>>,
        args: &[S],
        includes: Option<&mut dyn IncludeHandler>,
    ) -> CompileResult {
        let source = source.into();
        let mut diags = DiagnosticLog::new();
        let object = self.run(&source, args, includes, &mut diags);
        let diagnostics = diags.finish();
        log::debug!(
            "[mach-dxc] compile finished: {} bytes of object, {} diagnostics",
            object.as_ref().map_or(0, |object| object.len()),
            diagnostics.as_ref().map_or(0, |d| d.len())
        );
        CompileResult::new(diagnostics, object)
    }

    fn run<S: AsRef<str>>(
        &mut self,
        source: &SourceBuffer<'_>,
        args: &[S],
        includes: Option<&mut dyn IncludeHandler>,
        diags: &mut DiagnosticLog,
    ) -> Option<Object> {
        let options = CompileOptions::from_args(args, diags);
        diags.configure(
            options.flags.contains(CompileFlags::WARNINGS_AS_ERRORS),
            options.flags.contains(CompileFlags::NO_WARNINGS),
        );
        if diags.has_errors() {
            log::debug!("[mach-dxc] stopping before the front end: bad arguments");
            return None;
        }

        let name: Arc<str> = Arc::from(options.source_name.as_str());
        let text = match source.decode() {
            Ok(text) => text,
            Err(failure) => {
                let location = Location::new(&name, failure.line, failure.column);
                diags.fatal(&location, failure.message);
                return None;
            }
        };
        let unit = TranslationUnit { name, text };

        let mut filesystem: FileSystemIncludeHandler;
        let includes: &mut dyn IncludeHandler = match includes {
            Some(handler) => handler,
            None => {
                filesystem = FileSystemIncludeHandler::new(options.include_dirs.iter().cloned());
                &mut filesystem
            }
        };

        log::debug!(
            "[mach-dxc] compiling {} ({} bytes) for {}",
            unit.name,
            unit.text.len(),
            options.profile.as_ref().map_or_else(String::new, ToString::to_string)
        );
        let module = self
            .pipeline
            .frontend
            .compile(&unit, &options, includes, diags);
        let module = match module {
            Some(module) if !diags.has_errors() => module,
            Some(_) => return None,
            None => {
                if !diags.has_errors() {
                    fault(diags, "front end produced no module");
                }
                return None;
            }
        };

        let bytes = self.pipeline.backend.emit(module, &options, diags);
        if diags.has_errors() {
            return None;
        }
        match bytes.map(Object::new) {
            Some(Some(object)) => Some(object),
            Some(None) => {
                fault(diags, "backend produced an empty object");
                None
            }
            None => {
                fault(diags, "backend produced no object");
                None
            }
        }
    }

    /// Counts how many times the process-wide tables have been built, including the ones
    /// this compiler holds.
    pub fn registry_generation(&self) -> u64 {
        self.registry.generation()
    }
}

fn acquire_registry() -> Result<Arc<Registry>, CompilerError> {
    let registry = Registry::acquire();
    if registry.intrinsics().is_empty() {
        return Err(CompilerError::InitializationFailed(String::from(
            "the intrinsic table is empty",
        )));
    }
    Ok(registry)
}

fn fault(diags: &mut DiagnosticLog, message: &str) {
    log::warn!("[mach-dxc] pipeline fault: {}", message);
    diags.report(Severity::Error, None, format!("internal compiler error: {message}"));
}
