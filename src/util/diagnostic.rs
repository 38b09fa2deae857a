//! User-facing diagnostics: a short error line, a classification tag, and
//! contextual suggestions.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

/// Common suggestion messages for consistent error handling.
pub mod suggestions {
    /// Suggestion for network failures.
    pub const NETWORK: &str = "help: retry with `--offline` to use only cached artifacts";

    /// Suggestion for permission failures.
    pub const PERMISSION: &str = "help: check ownership of the pantry cache and data directories";

    /// Suggestion for disk-space failures.
    pub const DISK: &str = "help: run `pantry cache prune` to reclaim space";

    /// Suggestion for version conflicts.
    pub const CONFLICT: &str = "help: run `pantry tree` to see which packages require what";

    /// Suggestion for integrity failures.
    pub const INTEGRITY: &str = "help: run `pantry cache clean` to drop the corrupted entry and refetch";

    /// Suggestion for a stale lockfile under --frozen.
    pub const FROZEN: &str = "help: run `pantry install` without --frozen to refresh pantry.lock";
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
    Help,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
            Severity::Help => write!(f, "help"),
        }
    }
}

/// A diagnostic message with optional suggestions.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Primary message
    pub message: String,
    /// Classification tag (the error kind, e.g. `IntegrityMismatch`)
    pub tag: Option<String>,
    /// Severity level
    pub severity: Severity,
    /// Additional context lines
    pub context: Vec<String>,
    /// Suggested fixes
    pub suggestions: Vec<String>,
    /// Related location (file path)
    pub location: Option<PathBuf>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            tag: None,
            severity: Severity::Error,
            context: Vec::new(),
            suggestions: Vec::new(),
            location: None,
        }
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            tag: None,
            severity: Severity::Warning,
            context: Vec::new(),
            suggestions: Vec::new(),
            location: None,
        }
    }

    /// Set the classification tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Add context to the diagnostic.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// Add a suggestion for fixing the issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add a file location.
    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = String::new();

        let severity_str = if color {
            match self.severity {
                Severity::Error => "\x1b[1;31merror\x1b[0m",
                Severity::Warning => "\x1b[1;33mwarning\x1b[0m",
                Severity::Note => "\x1b[1;36mnote\x1b[0m",
                Severity::Help => "\x1b[1;32mhelp\x1b[0m",
            }
        } else {
            match self.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Note => "note",
                Severity::Help => "help",
            }
        };

        match &self.tag {
            Some(tag) => output.push_str(&format!("{}[{}]: {}\n", severity_str, tag, self.message)),
            None => output.push_str(&format!("{}: {}\n", severity_str, self.message)),
        }

        if let Some(ref path) = self.location {
            output.push_str(&format!("  --> {}\n", path.display()));
        }

        for ctx in &self.context {
            output.push_str(&format!("  | {}\n", ctx));
        }

        for suggestion in &self.suggestions {
            output.push_str(&format!("  {}\n", suggestion));
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Version conflict with both requesters, for rich terminal rendering.
#[derive(Debug, Error, MietteDiagnostic)]
#[error("version conflict for `{package}`")]
#[diagnostic(
    code(pantry::resolve::version_conflict),
    help("Run `pantry tree` to see which packages require `{package}`")
)]
pub struct VersionConflictReport {
    pub package: String,
    pub requirements: Vec<String>,
}

/// Integrity mismatch between the registry's hash and the received bytes.
#[derive(Debug, Error, MietteDiagnostic)]
#[error("integrity mismatch for `{package}@{version}`")]
#[diagnostic(
    code(pantry::fetch::integrity_mismatch),
    help("Run `pantry cache clean` and retry; if it persists, the registry entry is bad")
)]
pub struct IntegrityMismatchReport {
    pub package: String,
    pub version: String,
    pub expected: String,
    pub got: String,
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}
