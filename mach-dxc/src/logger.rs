use crate::diagnostic::{Diagnostic, Diagnostics, Location, Severity};

/// Collects the diagnostics of one compile session.
///
/// Every stage of the pipeline reports through the same log, so the resulting bundle is in
/// emission order. Messages are also forwarded to the `log` facade.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
    warnings_as_errors: bool,
    suppress_warnings: bool,
    dropping_notes: bool,
}

impl DiagnosticLog {
    pub fn new() -> DiagnosticLog {
        DiagnosticLog::default()
    }

    /// Applies `-WX` / `-no-warnings` to everything reported from now on.
    pub fn configure(&mut self, warnings_as_errors: bool, suppress_warnings: bool) {
        self.warnings_as_errors = warnings_as_errors;
        self.suppress_warnings = suppress_warnings;
    }

    pub fn report(
        &mut self,
        severity: Severity,
        location: Option<Location>,
        message: impl Into<String>,
    ) {
        let mut message = message.into();
        let mut severity = severity;

        match severity {
            Severity::Note if self.dropping_notes => return,
            Severity::Note => {}
            Severity::Warning if self.suppress_warnings => {
                self.dropping_notes = true;
                return;
            }
            Severity::Warning if self.warnings_as_errors => {
                severity = Severity::Error;
                message.push_str(" [-Werror]");
                self.dropping_notes = false;
            }
            _ => self.dropping_notes = false,
        }

        let diagnostic = Diagnostic {
            severity,
            message,
            location,
        };

        log::debug!("[mach-dxc] {}", diagnostic);

        self.entries.push(diagnostic);
    }

    pub fn error(&mut self, location: &Location, message: impl Into<String>) {
        self.report(Severity::Error, Some(location.clone()), message)
    }

    pub fn warning(&mut self, location: &Location, message: impl Into<String>) {
        self.report(Severity::Warning, Some(location.clone()), message)
    }

    pub fn note(&mut self, location: &Location, message: impl Into<String>) {
        self.report(Severity::Note, Some(location.clone()), message)
    }

    pub fn fatal(&mut self, location: &Location, message: impl Into<String>) {
        self.report(Severity::Fatal, Some(location.clone()), message)
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity.is_error())
    }

    pub fn has_fatal(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Fatal)
    }

    pub fn error_count(&self) -> usize {
        self.entries.iter().filter(|d| d.severity.is_error()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the log into a bundle, or `None` if nothing was reported.
    pub fn finish(self) -> Option<Diagnostics> {
        if self.entries.is_empty() {
            None
        } else {
            Some(Diagnostics::new(self.entries))
        }
    }
}
