//! Error taxonomy for pantry operations.
//!
//! Every failure mode is a typed variant; the surrounding CLI maps kinds
//! onto exit codes and renders a diagnostic with a contextual suggestion.

use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

/// Error during pantry operations.
#[derive(Debug, Error)]
pub enum PantryError {
    #[error("failed to parse manifest: {reason}")]
    ManifestParse { reason: String },

    #[error("unrecognized dependency declaration for `{name}`")]
    UnknownDependencyFormat { name: String },

    #[error("version conflict for `{name}`")]
    VersionConflict {
        name: String,
        /// First requester and its constraint
        a: String,
        /// Second requester and its constraint
        b: String,
    },

    #[error("no version of `{name}` satisfies `{constraint}`")]
    UnresolvableConstraint { name: String, constraint: String },

    #[error("failed to fetch registry metadata for `{name}`: {cause}")]
    RegistryFetchFailed { name: String, cause: String },

    #[error("integrity mismatch for `{name}@{version}`")]
    IntegrityMismatch {
        name: String,
        version: String,
        expected: String,
        got: String,
    },

    #[error("dependency cycle among non-peer edges: {cycle}")]
    CycleAmongNonPeerEdges { cycle: String },

    #[error("artifact cache is corrupt: {reason}")]
    CacheCorrupt { reason: String },

    #[error("disk full while writing {path}")]
    DiskFull { path: String },

    #[error("permission denied: {path}")]
    Permission { path: String },

    #[error("transient network failure: {cause}")]
    NetworkTransient { cause: String },

    #[error("network failure: {cause}")]
    NetworkFatal { cause: String },

    #[error("`{name}@{version}` is not in the artifact cache and offline mode is on")]
    OfflineCacheMiss { name: String, version: String },

    #[error("lockfile version {found} is newer than supported version {supported}")]
    LockfileVersionMismatch { found: u32, supported: u32 },

    #[error("pantry.lock is out of date and --frozen is set")]
    LockfileOutOfDate,

    #[error("script `{name}` failed with exit code {code}")]
    LifecycleScriptFailed { name: String, code: i32 },

    #[error("operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid concurrency limit: {value}")]
    ConcurrencyLimitInvalid { value: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PantryError {
    /// Exit code for the surrounding CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            PantryError::VersionConflict { .. }
            | PantryError::UnresolvableConstraint { .. }
            | PantryError::CycleAmongNonPeerEdges { .. } => 2,
            PantryError::IntegrityMismatch { .. } => 3,
            PantryError::LockfileOutOfDate => 4,
            PantryError::OfflineCacheMiss { .. } => 5,
            PantryError::LifecycleScriptFailed { .. } => 6,
            _ => 1,
        }
    }

    /// Short classification tag for the diagnostic line.
    pub fn tag(&self) -> &'static str {
        match self {
            PantryError::ManifestParse { .. } => "ManifestParse",
            PantryError::UnknownDependencyFormat { .. } => "UnknownDependencyFormat",
            PantryError::VersionConflict { .. } => "VersionConflict",
            PantryError::UnresolvableConstraint { .. } => "UnresolvableConstraint",
            PantryError::RegistryFetchFailed { .. } => "RegistryFetchFailed",
            PantryError::IntegrityMismatch { .. } => "IntegrityMismatch",
            PantryError::CycleAmongNonPeerEdges { .. } => "CycleAmongNonPeerEdges",
            PantryError::CacheCorrupt { .. } => "CacheCorrupt",
            PantryError::DiskFull { .. } => "DiskFull",
            PantryError::Permission { .. } => "Permission",
            PantryError::NetworkTransient { .. } => "NetworkTransient",
            PantryError::NetworkFatal { .. } => "NetworkFatal",
            PantryError::OfflineCacheMiss { .. } => "OfflineCacheMiss",
            PantryError::LockfileVersionMismatch { .. } => "LockfileVersionMismatch",
            PantryError::LockfileOutOfDate => "LockfileOutOfDate",
            PantryError::LifecycleScriptFailed { .. } => "LifecycleScriptFailed",
            PantryError::Timeout { .. } => "Timeout",
            PantryError::Cancelled => "Cancelled",
            PantryError::ConcurrencyLimitInvalid { .. } => "ConcurrencyLimitInvalid",
            PantryError::Other(_) => "Error",
        }
    }

    /// Convert to a user-facing diagnostic with a contextual suggestion.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::error(self.to_string()).with_tag(self.tag());

        match self {
            PantryError::VersionConflict { name, a, b } => {
                diag = diag
                    .with_context(format!("{} requires `{}`", a, name))
                    .with_context(format!("{} requires `{}`", b, name))
                    .with_suggestion(suggestions::CONFLICT);
            }
            PantryError::UnresolvableConstraint { .. } => {
                diag = diag.with_suggestion(suggestions::CONFLICT);
            }
            PantryError::IntegrityMismatch { expected, got, .. } => {
                diag = diag
                    .with_context(format!("expected sha256 {}", expected))
                    .with_context(format!("received sha256 {}", got))
                    .with_suggestion(suggestions::INTEGRITY);
            }
            PantryError::CacheCorrupt { .. } => {
                diag = diag.with_suggestion(suggestions::INTEGRITY);
            }
            PantryError::NetworkTransient { .. }
            | PantryError::NetworkFatal { .. }
            | PantryError::RegistryFetchFailed { .. } => {
                diag = diag.with_suggestion(suggestions::NETWORK);
            }
            PantryError::Permission { .. } => {
                diag = diag.with_suggestion(suggestions::PERMISSION);
            }
            PantryError::DiskFull { .. } => {
                diag = diag.with_suggestion(suggestions::DISK);
            }
            PantryError::LockfileOutOfDate => {
                diag = diag.with_suggestion(suggestions::FROZEN);
            }
            PantryError::OfflineCacheMiss { .. } => {
                diag = diag
                    .with_suggestion("help: unset PANTRY_OFFLINE or drop --offline to fetch");
            }
            _ => {}
        }

        diag
    }
}

/// Convenience alias used across the crate.
pub type PantryResult<T> = std::result::Result<T, PantryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let conflict = PantryError::VersionConflict {
            name: "a".into(),
            a: ">=1, <2".into(),
            b: ">=2".into(),
        };
        assert_eq!(conflict.exit_code(), 2);

        let integrity = PantryError::IntegrityMismatch {
            name: "a".into(),
            version: "1.0.0".into(),
            expected: "aa".into(),
            got: "bb".into(),
        };
        assert_eq!(integrity.exit_code(), 3);

        assert_eq!(PantryError::LockfileOutOfDate.exit_code(), 4);
        assert_eq!(
            PantryError::OfflineCacheMiss {
                name: "a".into(),
                version: "1.0.0".into()
            }
            .exit_code(),
            5
        );
        assert_eq!(
            PantryError::LifecycleScriptFailed {
                name: "postinstall".into(),
                code: 7
            }
            .exit_code(),
            6
        );
        assert_eq!(PantryError::Cancelled.exit_code(), 1);
    }

    #[test]
    fn test_conflict_diagnostic_names_both_requesters() {
        let err = PantryError::VersionConflict {
            name: "a".into(),
            a: "root (>=1, <2)".into(),
            b: "b@2.0.0 (>=2)".into(),
        };

        let output = err.to_diagnostic().format(false);
        assert!(output.contains("VersionConflict"));
        assert!(output.contains("root (>=1, <2)"));
        assert!(output.contains("b@2.0.0 (>=2)"));
        assert!(output.contains("pantry tree"));
    }

    #[test]
    fn test_offline_diagnostic() {
        let err = PantryError::OfflineCacheMiss {
            name: "curl.se".into(),
            version: "8.5.0".into(),
        };
        let output = err.to_diagnostic().format(false);
        assert!(output.contains("OfflineCacheMiss"));
        assert!(output.contains("PANTRY_OFFLINE"));
    }
}
