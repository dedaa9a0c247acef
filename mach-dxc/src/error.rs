use crate::diagnostic::Diagnostics;
use thiserror::Error;

#[derive(Debug, Error)]
/// Error type for creating a compiler.
pub enum CompilerError {
    /// The process-wide tables the pipeline needs could not be built.
    #[error("Failed to initialize the compiler: {0}.")]
    InitializationFailed(String),
}

#[derive(Debug, Error)]
/// Error type for a compile that produced no object.
pub enum CompileError {
    /// Compilation stopped with errors. The bundle also holds any warnings and notes.
    #[error("Compilation failed with {count} error(s):\n{0}", count = .0.error_count())]
    Failed(Diagnostics),
    /// The pipeline finished without reporting an error but produced no object.
    #[error("The pipeline produced no object.")]
    NoObject,
}

impl CompileError {
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            CompileError::Failed(diagnostics) => Some(diagnostics),
            CompileError::NoObject => None,
        }
    }
}
