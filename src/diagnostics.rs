use serde::Serialize;
use std::fmt;

use crate::tokenizer::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single compile-time finding. Diagnostics are collected over a whole
/// pass and surfaced together rather than raised at the point of discovery.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub position: Option<Position>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            file: None,
            position: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{tag}: {}", self.message)?;
        if let Some(file) = &self.file {
            write!(f, " [{file}")?;
            if let Some(pos) = &self.position {
                write!(f, ":{}:{}", pos.line, pos.column)?;
            }
            write!(f, "]")?;
        } else if let Some(pos) = &self.position {
            write!(f, " [{}:{}]", pos.line, pos.column)?;
        }
        Ok(())
    }
}

/// Severity-bucketed diagnostic accumulator shared by the lexer, parser and
/// checker of one compilation.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn all(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity == severity)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.with_severity(Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.with_severity(Severity::Warning)
    }

    pub fn extend(&mut self, other: DiagnosticBag) {
        self.diagnostics.extend(other.diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_errors() {
        let mut bag = DiagnosticBag::new();
        bag.report(Diagnostic::warning("shadowed flag"));
        bag.report(Diagnostic::error("unresolved name `foo`"));
        bag.report(Diagnostic::info("compiled"));
        bag.report(Diagnostic::error("duplicate subroutine"));
        assert_eq!(bag.error_count(), 2);
        assert_eq!(bag.len(), 4);
        assert!(bag.has_errors());
    }

    #[test]
    fn formats_with_file_and_position() {
        let diagnostic = Diagnostic::error("unexpected token")
            .in_file("boot.nss")
            .at(Position {
                line: 3,
                column: 9,
                offset: 41,
            });
        assert_eq!(
            diagnostic.to_string(),
            "error: unexpected token [boot.nss:3:9]"
        );
    }
}
