//! Diagnostics: the fatal [`ParseError`] type and the warning side channel.
//!
//! Every fatal error aborts the parse and carries the position it was raised
//! at. Warnings (non-equivalent macro redefinition, `#warning`, invalid token
//! paste) never abort: they are rendered to stderr in `file:line:col:
//! warning: message` form and counted, so callers and tests can inspect them
//! after the fact.

use thiserror::Error;

use crate::common::source::LineInfo;

/// A fatal syntax, directive, or evaluation error.
///
/// `message` is the final rendered text; when the `line_no_in_error_message`
/// option is set it already carries the ` (line:column)` suffix.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
    /// Byte offset of the start of the line the error is on.
    pub line_start: usize,
    /// Byte offset of the end of the line the error is on.
    pub line_end: usize,
    pub file_name: Option<String>,
}

impl ParseError {
    pub fn new(
        message: impl Into<String>,
        info: LineInfo,
        file_name: Option<String>,
        with_position: bool,
    ) -> Self {
        let mut message = message.into();
        if with_position {
            message.push_str(&format!(" ({}:{})", info.line, info.column));
        }
        Self {
            message,
            line: info.line,
            column: info.column,
            line_start: info.line_start,
            line_end: info.line_end,
            file_name,
        }
    }
}

/// A single non-fatal diagnostic with its source position. Fatal problems
/// become [`ParseError`]s instead; only warnings flow through the engine.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Collects warnings emitted during a parse.
///
/// Diagnostics are printed to stderr immediately on emit and retained so
/// that callers can query them after the parse completes.
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    file_name: Option<String>,
    /// Suppresses stderr rendering; diagnostics are still retained.
    quiet: bool,
}

impl DiagnosticEngine {
    pub fn new(file_name: Option<String>) -> Self {
        Self { diagnostics: Vec::new(), file_name, quiet: false }
    }

    /// Disable stderr output (used by tests).
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    /// Emit a warning at the given position.
    pub fn warning(&mut self, message: impl Into<String>, line: u32, column: u32) {
        let diag = Diagnostic { message: message.into(), line, column };
        if !self.quiet {
            let file = self.file_name.as_deref().unwrap_or("<input>");
            eprintln!("{}:{}:{}: warning: {}", file, diag.line, diag.column, diag.message);
        }
        self.diagnostics.push(diag);
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::line_info;

    #[test]
    fn error_message_position_suffix() {
        let src = "var x =\nbad";
        let err = ParseError::new("Unexpected token", line_info(src, 8), None, true);
        assert_eq!(err.message, "Unexpected token (2:0)");
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 0);
    }

    #[test]
    fn engine_counts_warnings() {
        let mut engine = DiagnosticEngine::new(None);
        engine.set_quiet(true);
        engine.warning("macro redefined", 3, 1);
        engine.warning("pasting formed an invalid token", 7, 2);
        assert_eq!(engine.warning_count(), 2);
        assert_eq!(engine.diagnostics()[0].line, 3);
    }
}
