use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// How serious a diagnostic is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Note,
    Warning,
    Error,
    /// An error after which the front end stops processing the translation unit.
    Fatal,
}

impl Severity {
    /// Errors and fatal errors.
    pub fn is_error(self) -> bool {
        matches!(self, Severity::Error | Severity::Fatal)
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Note => f.write_str("note"),
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
            Severity::Fatal => f.write_str("fatal error"),
        }
    }
}

/// A position in a source file, 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: &Arc<str>, line: u32, column: u32) -> Self {
        Self {
            file: Arc::clone(file),
            line,
            column,
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A single compiler message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}: {}", location, self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Every diagnostic emitted by one compile, in emission order.
///
/// The rendered text is what the C ABI hands out; the individual entries back the
/// severity-aware accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    text: String,
}

impl Diagnostics {
    pub(crate) fn new(entries: Vec<Diagnostic>) -> Self {
        let mut text = String::new();
        for entry in &entries {
            text.push_str(&entry.to_string());
            text.push('\n');
        }

        Self { entries, text }
    }

    /// The full diagnostic text, one message per line.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.entries.iter()
    }

    pub fn error_count(&self) -> usize {
        self.entries.iter().filter(|d| d.severity.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    /// True if any entry is an error, as opposed to only warnings and notes.
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity.is_error())
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for Diagnostics {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_clang_style() {
        let file: Arc<str> = Arc::from("hlsl.hlsl");
        let diag = Diagnostic {
            severity: Severity::Error,
            message: "use of undeclared identifier 'x'".into(),
            location: Some(Location::new(&file, 3, 12)),
        };
        assert_eq!(
            diag.to_string(),
            "hlsl.hlsl:3:12: error: use of undeclared identifier 'x'"
        );

        let bare = Diagnostic {
            severity: Severity::Fatal,
            message: "boom".into(),
            location: None,
        };
        assert_eq!(bare.to_string(), "fatal error: boom");
    }

    #[test]
    fn bundle_keeps_emission_order() {
        let bundle = Diagnostics::new(vec![
            Diagnostic {
                severity: Severity::Warning,
                message: "first".into(),
                location: None,
            },
            Diagnostic {
                severity: Severity::Error,
                message: "second".into(),
                location: None,
            },
        ]);

        assert_eq!(bundle.as_str(), "warning: first\nerror: second\n");
        assert_eq!(bundle.error_count(), 1);
        assert_eq!(bundle.warning_count(), 1);
        assert!(bundle.has_errors());
    }
}
