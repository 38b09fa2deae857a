//! Dependency edges and the declaration shapes that produce them.
//!
//! A manifest may declare dependencies as a map of name to version string,
//! a map of name to detailed object, a bare array of names, or a single
//! whitespace-separated string. All four normalize into [`DependencyEdge`].

use std::fmt;

use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::error::PantryError;
use crate::util::PackageName;

/// The relationship a dependency edge expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepKind {
    /// Required at runtime.
    Normal,
    /// Required for development only.
    Dev,
    /// A compatibility expectation; installed only under `peer = true`.
    Peer,
    /// Tolerates resolution failure.
    Optional,
}

impl DepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepKind::Normal => "normal",
            DepKind::Dev => "dev",
            DepKind::Peer => "peer",
            DepKind::Optional => "optional",
        }
    }
}

impl fmt::Display for DepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a package comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The configured package registry (default).
    Registry,
    /// A GitHub repository, materialized as an archive tarball.
    Github,
    /// An npm-style registry.
    Npm,
    /// A direct tarball URL.
    Http,
    /// A git URL, materialized as an archive tarball.
    Git,
    /// A workspace-local package; never downloaded.
    Local,
}

impl Default for SourceKind {
    fn default() -> Self {
        SourceKind::Registry
    }
}

/// A single edge in the dependency graph.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyEdge {
    /// Package name (dotted or scoped identifier)
    pub name: PackageName,

    /// Version constraint
    pub constraint: VersionReq,

    /// Edge kind
    pub kind: DepKind,

    /// Source selector
    pub source: SourceKind,

    /// Direct tarball URL for `http` sources
    pub url: Option<String>,

    /// `owner/repo` for github/git sources
    pub repo: Option<String>,

    /// Branch, tag, or ref for github/git sources
    pub git_ref: Option<String>,

    /// Registry URL override
    pub registry: Option<String>,

    /// OS override (edge only applies on this platform)
    pub platform: Option<String>,

    /// Architecture override
    pub arch: Option<String>,
}

impl DependencyEdge {
    /// A registry dependency with the given constraint.
    pub fn new(name: impl Into<PackageName>, constraint: VersionReq, kind: DepKind) -> Self {
        DependencyEdge {
            name: name.into(),
            constraint,
            kind,
            source: SourceKind::Registry,
            url: None,
            repo: None,
            git_ref: None,
            registry: None,
            platform: None,
            arch: None,
        }
    }

    pub fn with_source(mut self, source: SourceKind) -> Self {
        self.source = source;
        self
    }

    pub fn with_repo(mut self, repo: impl Into<String>, git_ref: Option<String>) -> Self {
        self.repo = Some(repo.into());
        self.git_ref = git_ref;
        self
    }

    /// Whether this edge participates in topological ordering.
    pub fn orders(&self) -> bool {
        matches!(self.kind, DepKind::Normal | DepKind::Dev)
    }
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.constraint != VersionReq::STAR {
            write!(f, " {}", self.constraint)?;
        }
        Ok(())
    }
}

/// A dependency value as written in the manifest (map entry form).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyValue {
    /// `"node": "^20"`
    Simple(String),

    /// `"node": { "version": "^20", "source": "github", ... }`
    Detailed(DetailedDependencyValue),
}

/// Detailed dependency declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailedDependencyValue {
    pub version: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub registry: Option<String>,
    pub platform: Option<String>,
    pub arch: Option<String>,
    pub global: Option<bool>,
}

/// Parse a constraint string; `latest`, `*`, and empty all mean any version.
pub fn parse_constraint(name: &str, raw: &str) -> Result<VersionReq, PantryError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "latest" || trimmed == "*" {
        return Ok(VersionReq::STAR);
    }
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    trimmed
        .parse()
        .map_err(|_| PantryError::UnknownDependencyFormat {
            name: format!("{name} ({raw})"),
        })
}

/// Recognize GitHub URL shapes and extract `owner/repo` plus an optional ref.
///
/// Accepted: `https://github.com/o/r`, `https://github.com/o/r.git`,
/// `https://github.com/o/r#ref`, `https://github.com/o/r/tree/ref`,
/// `github:o/r#ref`.
pub fn detect_github(value: &str) -> Option<(String, Option<String>)> {
    let rest = if let Some(rest) = value.strip_prefix("github:") {
        rest
    } else if let Some(rest) = value.strip_prefix("https://github.com/") {
        rest
    } else if let Some(rest) = value.strip_prefix("http://github.com/") {
        rest
    } else {
        return None;
    };

    let (rest, fragment_ref) = match rest.split_once('#') {
        Some((head, frag)) => (head, Some(frag.to_string())),
        None => (rest, None),
    };

    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let mut segments = rest.split('/');
    let owner = segments.next()?;
    let repo = segments.next()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }

    // `/tree/<ref>` in the path wins over no fragment
    let path_ref = match (segments.next(), segments.next()) {
        (Some("tree"), Some(r)) if !r.is_empty() => Some(r.to_string()),
        _ => None,
    };

    Some((format!("{owner}/{repo}"), fragment_ref.or(path_ref)))
}

/// Normalize one map entry into an edge.
pub fn edge_from_value(
    name: &str,
    value: &DependencyValue,
    kind: DepKind,
) -> Result<DependencyEdge, PantryError> {
    match value {
        DependencyValue::Simple(raw) => {
            if let Some((repo, git_ref)) = detect_github(raw) {
                return Ok(DependencyEdge::new(name, VersionReq::STAR, kind)
                    .with_source(SourceKind::Github)
                    .with_repo(repo, git_ref));
            }
            Ok(DependencyEdge::new(name, parse_constraint(name, raw)?, kind))
        }
        DependencyValue::Detailed(detail) => {
            let constraint = match &detail.version {
                Some(v) => parse_constraint(name, v)?,
                None => VersionReq::STAR,
            };

            let mut edge = DependencyEdge::new(name, constraint, kind);
            edge.registry = detail.registry.clone();
            edge.platform = detail.platform.clone();
            edge.arch = detail.arch.clone();
            edge.git_ref = detail.branch.clone().or_else(|| detail.tag.clone());

            if let Some(url) = &detail.url {
                if let Some((repo, git_ref)) = detect_github(url) {
                    edge.source = SourceKind::Github;
                    edge.repo = Some(repo);
                    edge.git_ref = edge.git_ref.or(git_ref);
                } else {
                    edge.source = SourceKind::Http;
                    edge.url = Some(url.clone());
                }
            } else if let Some(repo) = &detail.repo {
                edge.source = SourceKind::Github;
                edge.repo = Some(repo.clone());
            } else if let Some(source) = &detail.source {
                edge.source = match source.as_str() {
                    "registry" => SourceKind::Registry,
                    "github" => SourceKind::Github,
                    "npm" => SourceKind::Npm,
                    "http" => SourceKind::Http,
                    "git" => SourceKind::Git,
                    "local" => SourceKind::Local,
                    _ => {
                        return Err(PantryError::UnknownDependencyFormat {
                            name: format!("{name} (source `{source}`)"),
                        })
                    }
                };
            }

            Ok(edge)
        }
    }
}

/// Normalize a bare entry (`"node"` or `"node@^20"`) into an edge.
pub fn edge_from_bare(entry: &str, kind: DepKind) -> Result<DependencyEdge, PantryError> {
    let entry = entry.trim();
    if entry.is_empty() {
        return Err(PantryError::UnknownDependencyFormat {
            name: "(empty)".to_string(),
        });
    }

    if let Some((repo, git_ref)) = detect_github(entry) {
        let name = repo.rsplit('/').next().unwrap_or(&repo).to_string();
        return Ok(DependencyEdge::new(name, VersionReq::STAR, kind)
            .with_source(SourceKind::Github)
            .with_repo(repo, git_ref));
    }

    // Split on the last '@' so scoped names keep their prefix
    match entry.rsplit_once('@') {
        Some((name, constraint)) if !name.is_empty() => Ok(DependencyEdge::new(
            name,
            parse_constraint(name, constraint)?,
            kind,
        )),
        _ => Ok(DependencyEdge::new(entry, VersionReq::STAR, kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_version_value() {
        let edge = edge_from_value(
            "node",
            &DependencyValue::Simple("^20.1".to_string()),
            DepKind::Normal,
        )
        .unwrap();

        assert_eq!(edge.name.as_str(), "node");
        assert_eq!(edge.source, SourceKind::Registry);
        assert!(edge.constraint.matches(&"20.1.3".parse().unwrap()));
        assert!(!edge.constraint.matches(&"21.0.0".parse().unwrap()));
    }

    #[test]
    fn test_latest_means_any() {
        let edge = edge_from_value(
            "zlib",
            &DependencyValue::Simple("latest".to_string()),
            DepKind::Normal,
        )
        .unwrap();
        assert_eq!(edge.constraint, VersionReq::STAR);
    }

    #[test]
    fn test_github_url_value() {
        let edge = edge_from_value(
            "ripgrep",
            &DependencyValue::Simple("https://github.com/BurntSushi/ripgrep#14.1.0".to_string()),
            DepKind::Normal,
        )
        .unwrap();

        assert_eq!(edge.source, SourceKind::Github);
        assert_eq!(edge.repo.as_deref(), Some("BurntSushi/ripgrep"));
        assert_eq!(edge.git_ref.as_deref(), Some("14.1.0"));
    }

    #[test]
    fn test_detect_github_shapes() {
        assert_eq!(
            detect_github("https://github.com/o/r.git"),
            Some(("o/r".to_string(), None))
        );
        assert_eq!(
            detect_github("https://github.com/o/r/tree/main"),
            Some(("o/r".to_string(), Some("main".to_string())))
        );
        assert_eq!(
            detect_github("github:o/r#v2"),
            Some(("o/r".to_string(), Some("v2".to_string())))
        );
        assert_eq!(detect_github("https://example.com/o/r"), None);
        assert_eq!(detect_github("^1.2.3"), None);
    }

    #[test]
    fn test_detailed_value() {
        let detail = DetailedDependencyValue {
            version: Some("^3".to_string()),
            registry: Some("https://registry.internal".to_string()),
            platform: Some("linux".to_string()),
            ..Default::default()
        };
        let edge = edge_from_value(
            "sqlite.org",
            &DependencyValue::Detailed(detail),
            DepKind::Dev,
        )
        .unwrap();

        assert_eq!(edge.kind, DepKind::Dev);
        assert_eq!(edge.registry.as_deref(), Some("https://registry.internal"));
        assert_eq!(edge.platform.as_deref(), Some("linux"));
    }

    #[test]
    fn test_detailed_unknown_source_rejected() {
        let detail = DetailedDependencyValue {
            source: Some("carrier-pigeon".to_string()),
            ..Default::default()
        };
        let result = edge_from_value("x", &DependencyValue::Detailed(detail), DepKind::Normal);
        assert!(matches!(
            result,
            Err(PantryError::UnknownDependencyFormat { .. })
        ));
    }

    #[test]
    fn test_bare_entries() {
        let plain = edge_from_bare("python.org", DepKind::Normal).unwrap();
        assert_eq!(plain.constraint, VersionReq::STAR);

        let pinned = edge_from_bare("node@^20", DepKind::Normal).unwrap();
        assert_eq!(pinned.name.as_str(), "node");
        assert!(pinned.constraint.matches(&"20.9.0".parse().unwrap()));

        let scoped = edge_from_bare("@scope/tool@1.2.3", DepKind::Normal).unwrap();
        assert_eq!(scoped.name.as_str(), "@scope/tool");
    }

    #[test]
    fn test_peer_and_optional_do_not_order() {
        let peer = DependencyEdge::new("a", VersionReq::STAR, DepKind::Peer);
        let opt = DependencyEdge::new("b", VersionReq::STAR, DepKind::Optional);
        let normal = DependencyEdge::new("c", VersionReq::STAR, DepKind::Normal);

        assert!(!peer.orders());
        assert!(!opt.orders());
        assert!(normal.orders());
    }
}
