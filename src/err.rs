//! Diagnostics for the assembler and simulator.
//!
//! This module consists of:
//! - [`SourceLocation`]: a (file, line, column) triple attached to tokens and diagnostics.
//! - [`Diagnostic`]: a single assembly error or warning with its location.
//! - [`ErrorList`]: the accumulating list of diagnostics produced by an assembly run.
//!
//! The assembler does not stop at the first error. Diagnostics are collected into an
//! [`ErrorList`] until a configurable limit is reached, at which point assembly aborts
//! and the partial list is surfaced.

use std::sync::Arc;

/// The default maximum number of errors accumulated before assembly aborts.
pub const DEFAULT_ERROR_LIMIT: usize = 200;

/// A position in assembly source code: filename, line index, and column index.
///
/// Both indices are zero-based internally; [`std::fmt::Display`] renders them
/// one-based the way editors count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    /// Name of the source file.
    pub filename: Arc<str>,
    /// Zero-based line index within the file.
    pub line: usize,
    /// Zero-based column index within the line.
    pub column: usize,
}

impl SourceLocation {
    /// Creates a new source location.
    pub fn new(filename: Arc<str>, line: usize, column: usize) -> Self {
        Self { filename, line, column }
    }

    /// A location representing "nowhere", for diagnostics not tied to source text.
    pub fn unknown() -> Self {
        Self { filename: Arc::from(""), line: 0, column: 0 }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} line {} column {}", self.filename, self.line + 1, self.column + 1)
    }
}

/// A single assembly diagnostic: an error or a warning, with a location and message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Where in the source the diagnostic points. `None` for file-level problems
    /// (such as an unreadable include).
    pub location: Option<SourceLocation>,
    /// Human-readable description of the problem.
    pub message: String,
    /// Whether this diagnostic is a warning rather than an error.
    pub is_warning: bool,
}

impl Diagnostic {
    /// Creates an error diagnostic at the given location.
    pub fn error(location: SourceLocation, message: impl Into<String>) -> Self {
        Self { location: Some(location), message: message.into(), is_warning: false }
    }

    /// Creates a warning diagnostic at the given location.
    pub fn warning(location: SourceLocation, message: impl Into<String>) -> Self {
        Self { location: Some(location), message: message.into(), is_warning: true }
    }

    /// Creates an error diagnostic with no source location.
    pub fn error_nowhere(message: impl Into<String>) -> Self {
        Self { location: None, message: message.into(), is_warning: false }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_warning { "Warning" } else { "Error" };
        match &self.location {
            Some(loc) if !loc.filename.is_empty() => write!(f, "{kind} in {loc}: {}", self.message),
            _ => write!(f, "{kind}: {}", self.message),
        }
    }
}

impl std::error::Error for Diagnostic {}

/// An accumulating list of assembly diagnostics.
///
/// The list enforces an error limit: once [`ErrorList::has_exceeded_limit`] is true,
/// further errors are dropped (a single "limit exceeded" entry is recorded) and the
/// assembler is expected to abort at its next checkpoint.
#[derive(Debug)]
pub struct ErrorList {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
    limit: usize,
    limit_exceeded: bool,
}

impl ErrorList {
    /// Creates an empty error list with the default error limit.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_ERROR_LIMIT)
    }

    /// Creates an empty error list with the given error limit.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            diagnostics: Vec::new(),
            error_count: 0,
            warning_count: 0,
            limit,
            limit_exceeded: false,
        }
    }

    /// Adds a diagnostic to the list, subject to the error limit.
    pub fn add(&mut self, diagnostic: Diagnostic) {
        if self.limit_exceeded {
            return;
        }
        if diagnostic.is_warning {
            self.warning_count += 1;
            self.diagnostics.push(diagnostic);
            return;
        }
        self.error_count += 1;
        self.diagnostics.push(diagnostic);
        if self.error_count >= self.limit {
            self.limit_exceeded = true;
            self.diagnostics.push(Diagnostic::error_nowhere(format!(
                "error limit of {} exceeded; reporting stopped",
                self.limit
            )));
        }
    }

    /// Number of errors recorded so far.
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// Number of warnings recorded so far.
    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// Whether any errors (not warnings) have been recorded.
    pub fn errors_occurred(&self) -> bool {
        self.error_count > 0
    }

    /// Whether any warnings have been recorded.
    pub fn warnings_occurred(&self) -> bool {
        self.warning_count > 0
    }

    /// Whether the error limit has been reached.
    pub fn has_exceeded_limit(&self) -> bool {
        self.limit_exceeded
    }

    /// Whether this list should fail the build, given the warnings-are-errors flag.
    pub fn is_fatal(&self, warnings_are_errors: bool) -> bool {
        self.errors_occurred() || (warnings_are_errors && self.warnings_occurred())
    }

    /// Iterates over the recorded diagnostics in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Whether no diagnostics have been recorded at all.
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

impl Default for ErrorList {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ErrorList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for diagnostic in &self.diagnostics {
            writeln!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::new(Arc::from("test.asm"), 4, 2)
    }

    #[test]
    fn test_counts() {
        let mut errors = ErrorList::new();
        errors.add(Diagnostic::error(loc(), "bad"));
        errors.add(Diagnostic::warning(loc(), "iffy"));
        errors.add(Diagnostic::error(loc(), "worse"));

        assert_eq!(errors.error_count(), 2);
        assert_eq!(errors.warning_count(), 1);
        assert!(errors.errors_occurred());
        assert!(errors.warnings_occurred());
        assert!(!errors.has_exceeded_limit());
    }

    #[test]
    fn test_warnings_are_errors() {
        let mut errors = ErrorList::new();
        errors.add(Diagnostic::warning(loc(), "iffy"));

        assert!(!errors.is_fatal(false));
        assert!(errors.is_fatal(true));
    }

    #[test]
    fn test_limit() {
        let mut errors = ErrorList::with_limit(3);
        for _ in 0..10 {
            errors.add(Diagnostic::error(loc(), "bad"));
        }

        assert!(errors.has_exceeded_limit());
        assert_eq!(errors.error_count(), 3);
        // 3 errors plus the "limit exceeded" notice.
        assert_eq!(errors.iter().count(), 4);
    }

    #[test]
    fn test_display_is_one_based() {
        let d = Diagnostic::error(loc(), "bad things");
        assert_eq!(d.to_string(), "Error in test.asm line 5 column 3: bad things");
    }
}
