//! The two stages a compile session drives.

use crate::config::CompileOptions;
use crate::include::IncludeHandler;
use crate::ir::Module;
use crate::logger::DiagnosticLog;
use crate::source::TranslationUnit;

/// Turns source text into a checked IR module.
///
/// Implementations report every problem through `diags`. Returning `None` means no module
/// could be produced; the session never runs the backend in that case.
pub trait Frontend: Send {
    fn compile(
        &self,
        unit: &TranslationUnit,
        options: &CompileOptions,
        includes: &mut dyn IncludeHandler,
        diags: &mut DiagnosticLog,
    ) -> Option<Module>;
}

/// Turns a checked IR module into a serialized object.
pub trait Backend: Send {
    fn emit(
        &self,
        module: Module,
        options: &CompileOptions,
        diags: &mut DiagnosticLog,
    ) -> Option<Vec<u8>>;
}

/// A front end paired with a backend.
pub struct Pipeline {
    pub frontend: Box<dyn Frontend>,
    pub backend: Box<dyn Backend>,
}

impl Pipeline {
    pub fn new(frontend: impl Frontend + 'static, backend: impl Backend + 'static) -> Self {
        Pipeline {
            frontend: Box::new(frontend),
            backend: Box::new(backend),
        }
    }
}

impl Default for Pipeline {
    /// The built-in HLSL front end and DXIL container backend.
    fn default() -> Self {
        Pipeline::new(
            crate::frontend::HlslFrontend::default(),
            crate::backend::DxilBackend,
        )
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}
