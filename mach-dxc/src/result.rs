use crate::diagnostic::Diagnostics;
use crate::error::CompileError;
use crate::object::Object;

/// Outcome of one compile: the diagnostics reported and, if it succeeded, the object.
///
/// Both halves are independent. A successful compile may still carry warnings, and a failed
/// one never carries an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileResult {
    diagnostics: Option<Diagnostics>,
    object: Option<Object>,
}

impl CompileResult {
    pub(crate) fn new(diagnostics: Option<Diagnostics>, object: Option<Object>) -> Self {
        debug_assert!(
            object.is_none() || !diagnostics.as_ref().is_some_and(Diagnostics::has_errors),
            "an object was produced alongside errors"
        );
        Self {
            diagnostics,
            object,
        }
    }

    /// Everything reported during the compile, warnings included. `None` for a clean compile.
    pub fn error(&self) -> Option<&Diagnostics> {
        self.diagnostics.as_ref()
    }

    /// Moves the diagnostics out; later calls return `None`.
    pub fn take_error(&mut self) -> Option<Diagnostics> {
        self.diagnostics.take()
    }

    pub fn object(&self) -> Option<&Object> {
        self.object.as_ref()
    }

    /// Moves the object out; later calls return `None`.
    pub fn take_object(&mut self) -> Option<Object> {
        self.object.take()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.as_ref().is_some_and(Diagnostics::has_errors)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.as_ref().map_or(0, Diagnostics::error_count)
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics.as_ref().map_or(0, Diagnostics::warning_count)
    }

    /// The object, or the diagnostics explaining why there is none. Warnings attached to a
    /// successful compile are dropped.
    pub fn into_result(self) -> Result<Object, CompileError> {
        match (self.object, self.diagnostics) {
            (Some(object), _) => Ok(object),
            (None, Some(diagnostics)) => Err(CompileError::Failed(diagnostics)),
            (None, None) => Err(CompileError::NoObject),
        }
    }
}
