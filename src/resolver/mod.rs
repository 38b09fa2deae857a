//! Dependency resolution.
//!
//! The resolver expands the manifest's direct dependencies breadth-first,
//! fetching registry metadata per name and choosing the lockfile-pinned
//! version when it still satisfies every collected constraint, otherwise
//! the highest satisfying version. When a later path adds a constraint
//! the chosen version no longer meets, the pass restarts with the
//! accumulated constraint set; constraints only grow, so the loop reaches
//! a fixpoint or reports a conflict naming both requesters.

pub mod graph;

use std::collections::{BTreeMap, HashMap, VecDeque};

use semver::{Version, VersionReq};

use crate::core::dependency::parse_constraint;
use crate::core::manifest::{self, NormalizedManifest};
use crate::core::{DepKind, DependencyEdge, InstallSettings, PackageId, SourceKind};
use crate::error::PantryError;
use crate::lockfile::Lockfile;
use crate::registry::http::github_archive_url;
use crate::registry::{PackageMetadata, RegistryClient};
use crate::util::PackageName;

pub use graph::{ResolvedGraph, ResolvedPackage};

const MAX_PASSES: usize = 64;

/// Policy knobs for one resolution.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Include dev dependencies
    pub include_dev: bool,

    /// Include optional dependencies
    pub include_optional: bool,

    /// Install peer dependencies instead of warning
    pub install_peers: bool,

    /// Candidate versions younger than this many seconds are excluded
    pub minimum_release_age: u64,

    /// Names exempt from the release-age policy
    pub release_age_excludes: Vec<String>,

    /// Clock override for tests; defaults to the wall clock
    pub now: Option<u64>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            include_dev: true,
            include_optional: true,
            install_peers: false,
            minimum_release_age: 0,
            release_age_excludes: Vec::new(),
            now: None,
        }
    }
}

impl ResolveOptions {
    /// Derive options from installer settings and the manifest's policy.
    pub fn from_settings(settings: &InstallSettings, manifest: &NormalizedManifest) -> Self {
        ResolveOptions {
            include_dev: settings.include_dev(),
            include_optional: settings.optional,
            install_peers: settings.peer,
            minimum_release_age: manifest.minimum_release_age,
            release_age_excludes: manifest.minimum_release_age_excludes.clone(),
            now: None,
        }
    }

    fn now(&self) -> u64 {
        self.now.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        })
    }
}

/// Resolution output: the graph plus non-fatal notices.
#[derive(Debug)]
pub struct Resolution {
    pub graph: ResolvedGraph,

    /// Peer edges seen but not installed
    pub peer_hints: Vec<String>,

    /// Optional edges that were dropped
    pub warnings: Vec<String>,
}

/// One collected requirement on a package name.
#[derive(Debug, Clone)]
struct Requirement {
    requester: String,
    req: VersionReq,
}

#[derive(Debug)]
struct QueueItem {
    parent: Option<PackageId>,
    requester: String,
    edge: DependencyEdge,
}

enum PassOutcome {
    Done(Resolution),
    /// A later constraint invalidated an earlier choice; retry with the
    /// full constraint set.
    Retry,
}

/// The resolver.
pub struct Resolver<'a> {
    registry: &'a dyn RegistryClient,
    lockfile: Option<&'a Lockfile>,
    options: ResolveOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(
        registry: &'a dyn RegistryClient,
        lockfile: Option<&'a Lockfile>,
        options: ResolveOptions,
    ) -> Self {
        Resolver {
            registry,
            lockfile,
            options,
        }
    }

    /// Resolve a manifest into a graph in dependency order.
    pub fn resolve(&self, manifest: &NormalizedManifest) -> Result<Resolution, PantryError> {
        let workspace = self.expand_workspaces(manifest)?;
        let mut sticky: HashMap<PackageName, Vec<Requirement>> = HashMap::new();
        let mut metadata_cache: HashMap<PackageName, PackageMetadata> = HashMap::new();

        for _ in 0..MAX_PASSES {
            match self.pass(manifest, &workspace, &mut sticky, &mut metadata_cache)? {
                PassOutcome::Done(resolution) => {
                    // A cycle among normal/dev edges is fatal
                    resolution.graph.topological_order()?;
                    return Ok(resolution);
                }
                PassOutcome::Retry => continue,
            }
        }

        Err(PantryError::Other(anyhow::anyhow!(
            "resolution did not converge after {MAX_PASSES} passes"
        )))
    }

    fn pass(
        &self,
        manifest: &NormalizedManifest,
        workspace: &HashMap<PackageName, NormalizedManifest>,
        sticky: &mut HashMap<PackageName, Vec<Requirement>>,
        metadata_cache: &mut HashMap<PackageName, PackageMetadata>,
    ) -> Result<PassOutcome, PantryError> {
        let mut graph = ResolvedGraph::new();
        let mut chosen: HashMap<PackageName, PackageId> = HashMap::new();
        let mut constraints = sticky.clone();
        let mut peer_hints = Vec::new();
        let mut warnings = Vec::new();
        let mut queue: VecDeque<QueueItem> = VecDeque::new();

        self.seed(
            manifest,
            None,
            "root",
            &mut queue,
            &mut peer_hints,
        );

        while let Some(item) = queue.pop_front() {
            let edge = &item.edge;
            let name = edge.name;

            if !platform_matches(edge) {
                tracing::debug!("skipping `{}`: platform/arch filter", name);
                continue;
            }

            // Workspace members are local: no constraint solving, no download
            if let Some(member) = workspace.get(&name) {
                let id = match chosen.get(&name) {
                    Some(&id) => id,
                    None => {
                        let id = PackageId::new(
                            name,
                            member.version.clone().unwrap_or_else(|| Version::new(0, 0, 0)),
                        );
                        graph.add_package(ResolvedPackage {
                            id,
                            source: SourceKind::Local,
                            resolved_url: None,
                            integrity: None,
                            direct_deps: BTreeMap::new(),
                            binaries: Vec::new(),
                            env: BTreeMap::new(),
                            local_path: Some(member.dir().to_path_buf()),
                        });
                        chosen.insert(name, id);
                        self.seed(member, Some(id), &id.key(), &mut queue, &mut peer_hints);
                        id
                    }
                };
                if let Some(parent) = item.parent {
                    graph.add_edge(parent, id, edge.kind);
                }
                continue;
            }

            record_requirement(&mut constraints, name, &item.requester, &edge.constraint);

            if let Some(&existing) = chosen.get(&name) {
                if edge.constraint.matches(existing.version()) {
                    if let Some(parent) = item.parent {
                        graph.add_edge(parent, existing, edge.kind);
                    }
                    continue;
                }

                // Pinned sources (github/http/local) cannot be re-picked
                let existing_source = graph
                    .package(existing)
                    .map(|p| p.source)
                    .unwrap_or(SourceKind::Registry);
                if !matches!(existing_source, SourceKind::Registry | SourceKind::Npm) {
                    return Err(PantryError::VersionConflict {
                        name: name.to_string(),
                        a: format!("{} (pinned by {:?} source)", existing.version(), existing_source),
                        b: format!("{} (required by {})", edge.constraint, item.requester),
                    });
                }

                // The earlier choice no longer satisfies the merged set
                match self.reconcile(name, &constraints[&name], metadata_cache) {
                    Ok(()) => {
                        // A satisfying candidate exists; rerun with the
                        // grown constraint set
                        *sticky = constraints;
                        return Ok(PassOutcome::Retry);
                    }
                    Err(err) if edge.kind == DepKind::Optional => {
                        tracing::warn!("dropping optional dependency `{}`: {}", name, err);
                        warnings.push(format!("optional dependency `{name}` dropped: {err}"));
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            match self.choose(
                name,
                edge,
                &constraints[&name],
                metadata_cache,
            ) {
                Ok((package, transitive)) => {
                    let id = package.id;
                    graph.add_package(package);
                    chosen.insert(name, id);
                    if let Some(parent) = item.parent {
                        graph.add_edge(parent, id, edge.kind);
                    }
                    for dep in transitive {
                        queue.push_back(QueueItem {
                            parent: Some(id),
                            requester: id.key(),
                            edge: dep,
                        });
                    }
                }
                Err(err) if edge.kind == DepKind::Optional => {
                    tracing::warn!("dropping optional dependency `{}`: {}", name, err);
                    warnings.push(format!("optional dependency `{name}` dropped: {err}"));
                }
                Err(err) => return Err(err),
            }
        }

        Ok(PassOutcome::Done(Resolution {
            graph,
            peer_hints,
            warnings,
        }))
    }

    /// Queue the relevant edges of a manifest under the configured policy.
    fn seed(
        &self,
        manifest: &NormalizedManifest,
        parent: Option<PackageId>,
        requester: &str,
        queue: &mut VecDeque<QueueItem>,
        peer_hints: &mut Vec<String>,
    ) {
        for edge in &manifest.dependencies {
            match edge.kind {
                DepKind::Dev if !self.options.include_dev => continue,
                DepKind::Optional if !self.options.include_optional => continue,
                DepKind::Peer if !self.options.install_peers => {
                    let hint = format!(
                        "peer dependency `{} {}` expected by {}",
                        edge.name, edge.constraint, requester
                    );
                    tracing::warn!("{hint}");
                    peer_hints.push(hint);
                    continue;
                }
                _ => {}
            }
            queue.push_back(QueueItem {
                parent,
                requester: requester.to_string(),
                edge: edge.clone(),
            });
        }
    }

    /// Choose a version for a name seen for the first time this pass.
    /// Returns the package and its transitive edges.
    fn choose(
        &self,
        name: PackageName,
        edge: &DependencyEdge,
        requirements: &[Requirement],
        metadata_cache: &mut HashMap<PackageName, PackageMetadata>,
    ) -> Result<(ResolvedPackage, Vec<DependencyEdge>), PantryError> {
        match edge.source {
            SourceKind::Github | SourceKind::Git => {
                let repo = edge.repo.clone().unwrap_or_else(|| name.to_string());
                let version = edge
                    .git_ref
                    .as_deref()
                    .and_then(|r| r.trim_start_matches('v').parse::<Version>().ok())
                    .unwrap_or_else(|| Version::new(0, 0, 0));

                Ok((
                    ResolvedPackage {
                        id: PackageId::new(name, version),
                        source: edge.source,
                        resolved_url: Some(github_archive_url(&repo, edge.git_ref.as_deref())),
                        integrity: None,
                        direct_deps: BTreeMap::new(),
                        binaries: Vec::new(),
                        env: BTreeMap::new(),
                        local_path: None,
                    },
                    Vec::new(),
                ))
            }
            SourceKind::Http => {
                let url = edge.url.clone().ok_or_else(|| {
                    PantryError::UnknownDependencyFormat {
                        name: name.to_string(),
                    }
                })?;
                let version = exact_version(&edge.constraint).unwrap_or_else(|| Version::new(0, 0, 0));

                Ok((
                    ResolvedPackage {
                        id: PackageId::new(name, version),
                        source: SourceKind::Http,
                        resolved_url: Some(url),
                        integrity: None,
                        direct_deps: BTreeMap::new(),
                        binaries: Vec::new(),
                        env: BTreeMap::new(),
                        local_path: None,
                    },
                    Vec::new(),
                ))
            }
            SourceKind::Local => Err(PantryError::UnknownDependencyFormat {
                name: format!("{name} (local source outside the workspace)"),
            }),
            SourceKind::Registry | SourceKind::Npm => {
                let metadata = self.metadata_for(name, metadata_cache)?;

                let candidates = self.candidates(metadata, requirements, name.as_str());
                let Some(version) = self.pick(name, &candidates) else {
                    return Err(self.constraint_failure(name, requirements, metadata));
                };

                let info = metadata
                    .version(&version)
                    .expect("candidate came from this metadata");

                let mut transitive = Vec::new();
                for (dep_name, dep_constraint) in &info.dependencies {
                    transitive.push(DependencyEdge::new(
                        dep_name.as_str(),
                        parse_constraint(dep_name, dep_constraint)?,
                        DepKind::Normal,
                    ));
                }

                Ok((
                    ResolvedPackage {
                        id: PackageId::new(name, version),
                        source: edge.source,
                        resolved_url: info.url.clone(),
                        integrity: info.integrity,
                        direct_deps: BTreeMap::new(),
                        binaries: info.binaries.clone(),
                        env: info.env.clone(),
                        local_path: None,
                    },
                    transitive,
                ))
            }
        }
    }

    /// A previously chosen version failed a new constraint. Either a
    /// candidate satisfying the merged set exists (retry) or the set is
    /// unsatisfiable (error naming both requesters).
    fn reconcile(
        &self,
        name: PackageName,
        requirements: &[Requirement],
        metadata_cache: &mut HashMap<PackageName, PackageMetadata>,
    ) -> Result<(), PantryError> {
        let metadata = self.metadata_for(name, metadata_cache)?;
        let candidates = self.candidates(metadata, requirements, name.as_str());

        if candidates.is_empty() {
            Err(self.constraint_failure(name, requirements, metadata))
        } else {
            Ok(())
        }
    }

    fn metadata_for<'m>(
        &self,
        name: PackageName,
        cache: &'m mut HashMap<PackageName, PackageMetadata>,
    ) -> Result<&'m PackageMetadata, PantryError> {
        if !cache.contains_key(&name) {
            let metadata = self.registry.metadata(name.as_str())?;
            cache.insert(name, metadata);
        }
        Ok(&cache[&name])
    }

    /// Versions satisfying every requirement, after the release-age filter.
    fn candidates(
        &self,
        metadata: &PackageMetadata,
        requirements: &[Requirement],
        name: &str,
    ) -> Vec<Version> {
        let min_age = self.options.minimum_release_age;
        let exempt = self
            .options
            .release_age_excludes
            .iter()
            .any(|n| n == name);
        let now = self.options.now();

        metadata
            .versions
            .iter()
            .filter(|v| {
                if min_age > 0 && !exempt {
                    if let Some(published) = v.published_at {
                        if now.saturating_sub(published) < min_age {
                            return false;
                        }
                    }
                }
                requirements.iter().all(|r| r.req.matches(&v.version))
            })
            .map(|v| v.version.clone())
            .collect()
    }

    /// Lockfile pin when it still satisfies, otherwise highest candidate.
    fn pick(&self, name: PackageName, candidates: &[Version]) -> Option<Version> {
        if let Some(lockfile) = self.lockfile {
            if let Some(pinned) = lockfile.pinned_version(name.as_str()) {
                if candidates.contains(&pinned) {
                    return Some(pinned);
                }
            }
        }
        candidates.iter().max().cloned()
    }

    /// Build the right failure for an empty candidate set.
    fn constraint_failure(
        &self,
        name: PackageName,
        requirements: &[Requirement],
        metadata: &PackageMetadata,
    ) -> PantryError {
        let satisfying = |req: &VersionReq| {
            metadata
                .versions
                .iter()
                .any(|v| req.matches(&v.version))
        };

        // A requirement nothing satisfies on its own is unresolvable
        for requirement in requirements {
            if !satisfying(&requirement.req) {
                return PantryError::UnresolvableConstraint {
                    name: name.to_string(),
                    constraint: requirement.req.to_string(),
                };
            }
        }

        // Each is individually satisfiable: find a pair with an empty
        // intersection and report both requesters
        for (i, a) in requirements.iter().enumerate() {
            for b in &requirements[i + 1..] {
                let jointly = metadata
                    .versions
                    .iter()
                    .any(|v| a.req.matches(&v.version) && b.req.matches(&v.version));
                if !jointly {
                    return PantryError::VersionConflict {
                        name: name.to_string(),
                        a: format!("{} (required by {})", a.req, a.requester),
                        b: format!("{} (required by {})", b.req, b.requester),
                    };
                }
            }
        }

        // The set as a whole is empty (e.g. release-age filtering)
        PantryError::UnresolvableConstraint {
            name: name.to_string(),
            constraint: requirements
                .iter()
                .map(|r| r.req.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Expand workspace globs into member manifests keyed by name.
    fn expand_workspaces(
        &self,
        manifest: &NormalizedManifest,
    ) -> Result<HashMap<PackageName, NormalizedManifest>, PantryError> {
        let mut members = HashMap::new();

        for pattern in &manifest.workspaces {
            let full = manifest.dir().join(pattern);
            let Some(pattern_str) = full.to_str() else {
                continue;
            };
            let paths = glob::glob(pattern_str).map_err(|e| PantryError::ManifestParse {
                reason: format!("invalid workspace pattern `{pattern}`: {e}"),
            })?;

            for entry in paths.filter_map(Result::ok) {
                if !entry.is_dir() {
                    continue;
                }
                if manifest::manifest_in(&entry).is_none() {
                    continue;
                }
                let member = manifest::load(&entry)?;
                members.insert(PackageName::new(&member.name), member);
            }
        }

        Ok(members)
    }
}

/// Rebuild a graph from a lockfile without any registry access. Used in
/// offline mode: every pin is trusted as-is, and binaries are discovered
/// from the extracted trees at link time.
pub fn graph_from_lockfile(lockfile: &Lockfile) -> Result<ResolvedGraph, PantryError> {
    let mut graph = ResolvedGraph::new();

    for (key, entry) in &lockfile.packages {
        let id = PackageId::parse_key(key).ok_or_else(|| PantryError::ManifestParse {
            reason: format!("invalid lockfile key `{key}`"),
        })?;
        graph.add_package(ResolvedPackage {
            id,
            source: entry.source,
            resolved_url: entry.resolved.clone().or_else(|| entry.url.clone()),
            integrity: entry.integrity,
            direct_deps: BTreeMap::new(),
            binaries: Vec::new(),
            env: BTreeMap::new(),
            local_path: None,
        });
    }

    for (key, entry) in &lockfile.packages {
        let from = PackageId::parse_key(key).expect("validated above");
        for (dep_name, dep_version) in &entry.dependencies {
            let to = PackageId::parse_key(&format!("{dep_name}@{dep_version}"))
                .ok_or_else(|| PantryError::ManifestParse {
                    reason: format!("invalid dependency pin `{dep_name}@{dep_version}`"),
                })?;
            graph.add_edge(from, to, DepKind::Normal);
        }
    }

    Ok(graph)
}

fn record_requirement(
    constraints: &mut HashMap<PackageName, Vec<Requirement>>,
    name: PackageName,
    requester: &str,
    req: &VersionReq,
) {
    let list = constraints.entry(name).or_default();
    let duplicate = list
        .iter()
        .any(|r| r.requester == requester && r.req == *req);
    if !duplicate {
        list.push(Requirement {
            requester: requester.to_string(),
            req: req.clone(),
        });
    }
}

fn platform_matches(edge: &DependencyEdge) -> bool {
    if let Some(platform) = &edge.platform {
        if platform != std::env::consts::OS {
            return false;
        }
    }
    if let Some(arch) = &edge.arch {
        if arch != std::env::consts::ARCH {
            return false;
        }
    }
    true
}

/// The single exact version a requirement like `=1.2.3` pins, if any.
fn exact_version(req: &VersionReq) -> Option<Version> {
    if req.comparators.len() != 1 {
        return None;
    }
    let c = &req.comparators[0];
    if c.op == semver::Op::Exact {
        if let (major, Some(minor), Some(patch)) = (c.major, c.minor, c.patch) {
            return Some(Version::new(major, minor, patch));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::parse as parse_manifest;
    use crate::test_support::MockRegistry;
    use tempfile::TempDir;

    fn manifest_from(json: &str) -> NormalizedManifest {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pantry.json");
        std::fs::write(&path, json).unwrap();
        parse_manifest(json, &path).unwrap()
    }

    fn resolve_with(
        registry: &MockRegistry,
        json: &str,
        options: ResolveOptions,
    ) -> Result<Resolution, PantryError> {
        let manifest = manifest_from(json);
        Resolver::new(registry, None, options).resolve(&manifest)
    }

    #[test]
    fn test_empty_manifest_resolves_empty() {
        let registry = MockRegistry::new();
        let resolution =
            resolve_with(&registry, r#"{"name":"p"}"#, ResolveOptions::default()).unwrap();
        assert!(resolution.graph.is_empty());
    }

    #[test]
    fn test_simple_install_shape() {
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[]);

        let resolution = resolve_with(
            &registry,
            r#"{"name":"p","version":"1.0.0","dependencies":{"a":"=1.0.0"}}"#,
            ResolveOptions::default(),
        )
        .unwrap();

        assert_eq!(resolution.graph.len(), 1);
        let id = resolution
            .graph
            .by_name(PackageName::new("a"))
            .unwrap();
        let package = resolution.graph.package(id).unwrap();
        assert_eq!(package.version(), &Version::new(1, 0, 0));
        assert!(package.integrity.is_some());
        assert!(package.resolved_url.is_some());
    }

    #[test]
    fn test_transitive_dependencies_expand() {
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[("b", "^2")]);
        registry.publish("b", "2.3.0", &[]);

        let resolution = resolve_with(
            &registry,
            r#"{"name":"p","dependencies":{"a":"^1"}}"#,
            ResolveOptions::default(),
        )
        .unwrap();

        assert_eq!(resolution.graph.len(), 2);
        let order = resolution.graph.topological_order().unwrap();
        assert_eq!(order[0].name().as_str(), "b");
        assert_eq!(order[1].name().as_str(), "a");
    }

    #[test]
    fn test_highest_satisfying_version_wins() {
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[]);
        registry.publish("a", "1.5.0", &[]);
        registry.publish("a", "2.0.0", &[]);

        let resolution = resolve_with(
            &registry,
            r#"{"name":"p","dependencies":{"a":"^1"}}"#,
            ResolveOptions::default(),
        )
        .unwrap();

        let id = resolution.graph.by_name(PackageName::new("a")).unwrap();
        assert_eq!(id.version(), &Version::new(1, 5, 0));
    }

    #[test]
    fn test_lockfile_pin_preferred() {
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[]);
        registry.publish("a", "1.5.0", &[]);

        let manifest = manifest_from(r#"{"name":"p","dependencies":{"a":"^1"}}"#);

        let mut pinned = Lockfile::new(None);
        pinned.packages.insert(
            "a@1.0.0".to_string(),
            crate::lockfile::LockfileEntry {
                dependencies: BTreeMap::new(),
                integrity: None,
                name: "a".to_string(),
                resolved: None,
                source: SourceKind::Registry,
                url: None,
                version: "1.0.0".to_string(),
                extra: BTreeMap::new(),
            },
        );

        let resolution = Resolver::new(&registry, Some(&pinned), ResolveOptions::default())
            .resolve(&manifest)
            .unwrap();

        let id = resolution.graph.by_name(PackageName::new("a")).unwrap();
        assert_eq!(id.version(), &Version::new(1, 0, 0));
    }

    #[test]
    fn test_version_conflict_names_both_requesters() {
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[]);
        registry.publish("a", "1.9.0", &[]);
        registry.publish("a", "2.0.0", &[]);
        registry.publish("b", "1.0.0", &[("a", ">=2")]);

        let result = resolve_with(
            &registry,
            r#"{"name":"p","dependencies":{"a":">=1, <2","b":"=1.0.0"}}"#,
            ResolveOptions::default(),
        );

        match result {
            Err(PantryError::VersionConflict { name, a, b }) => {
                assert_eq!(name, "a");
                let pair = format!("{a} | {b}");
                assert!(pair.contains("root"));
                assert!(pair.contains("b@1.0.0"));
            }
            other => panic!("expected VersionConflict, got {other:?}"),
        }
    }

    #[test]
    fn test_shared_constraint_re_picks_lower_version() {
        let registry = MockRegistry::new();
        registry.publish("a", "1.4.0", &[]);
        registry.publish("a", "2.0.0", &[]);
        registry.publish("b", "1.0.0", &[("a", "^1")]);

        // Root wants any `a` (resolver would pick 2.0.0 first); `b`
        // narrows it to ^1 and the retry settles on 1.4.0
        let resolution = resolve_with(
            &registry,
            r#"{"name":"p","dependencies":{"a":"*","b":"=1.0.0"}}"#,
            ResolveOptions::default(),
        )
        .unwrap();

        let id = resolution.graph.by_name(PackageName::new("a")).unwrap();
        assert_eq!(id.version(), &Version::new(1, 4, 0));
    }

    #[test]
    fn test_unresolvable_constraint() {
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[]);

        let result = resolve_with(
            &registry,
            r#"{"name":"p","dependencies":{"a":"^9"}}"#,
            ResolveOptions::default(),
        );

        assert!(matches!(
            result,
            Err(PantryError::UnresolvableConstraint { name, .. }) if name == "a"
        ));
    }

    #[test]
    fn test_optional_failure_is_dropped_with_warning() {
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[]);

        let resolution = resolve_with(
            &registry,
            r#"{"name":"p","dependencies":{"a":"^1"},"optionalDependencies":{"ghost":"^1"}}"#,
            ResolveOptions::default(),
        )
        .unwrap();

        assert_eq!(resolution.graph.len(), 1);
        assert_eq!(resolution.warnings.len(), 1);
        assert!(resolution.warnings[0].contains("ghost"));
    }

    #[test]
    fn test_peer_warns_by_default_and_installs_on_opt_in() {
        let registry = MockRegistry::new();
        registry.publish("host", "1.0.0", &[]);

        let json = r#"{"name":"p","peerDependencies":{"host":"^1"}}"#;

        let warned = resolve_with(&registry, json, ResolveOptions::default()).unwrap();
        assert!(warned.graph.is_empty());
        assert_eq!(warned.peer_hints.len(), 1);

        let installed = resolve_with(
            &registry,
            json,
            ResolveOptions {
                install_peers: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(installed.graph.len(), 1);
        assert!(installed.peer_hints.is_empty());
    }

    #[test]
    fn test_dev_excluded_in_production() {
        let registry = MockRegistry::new();
        registry.publish("devtool", "1.0.0", &[]);

        let json = r#"{"name":"p","devDependencies":{"devtool":"^1"}}"#;

        let with_dev = resolve_with(&registry, json, ResolveOptions::default()).unwrap();
        assert_eq!(with_dev.graph.len(), 1);

        let production = resolve_with(
            &registry,
            json,
            ResolveOptions {
                include_dev: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(production.graph.is_empty());
    }

    #[test]
    fn test_release_age_excludes_young_versions() {
        let now = 1_700_000_000;
        let registry = MockRegistry::new();
        registry.publish_at("a", "1.0.0", &[], now - 1_000_000);
        registry.publish_at("a", "1.1.0", &[], now - 60);

        let resolution = resolve_with(
            &registry,
            r#"{"name":"p","dependencies":{"a":"^1"}}"#,
            ResolveOptions {
                minimum_release_age: 86_400,
                now: Some(now),
                ..Default::default()
            },
        )
        .unwrap();

        let id = resolution.graph.by_name(PackageName::new("a")).unwrap();
        assert_eq!(id.version(), &Version::new(1, 0, 0));
    }

    #[test]
    fn test_release_age_exempt_names() {
        let now = 1_700_000_000;
        let registry = MockRegistry::new();
        registry.publish_at("a", "1.0.0", &[], now - 1_000_000);
        registry.publish_at("a", "1.1.0", &[], now - 60);

        let resolution = resolve_with(
            &registry,
            r#"{"name":"p","dependencies":{"a":"^1"}}"#,
            ResolveOptions {
                minimum_release_age: 86_400,
                release_age_excludes: vec!["a".to_string()],
                now: Some(now),
                ..Default::default()
            },
        )
        .unwrap();

        let id = resolution.graph.by_name(PackageName::new("a")).unwrap();
        assert_eq!(id.version(), &Version::new(1, 1, 0));
    }

    #[test]
    fn test_cycle_is_fatal() {
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[("b", "^1")]);
        registry.publish("b", "1.0.0", &[("a", "^1")]);

        let result = resolve_with(
            &registry,
            r#"{"name":"p","dependencies":{"a":"^1"}}"#,
            ResolveOptions::default(),
        );

        assert!(matches!(
            result,
            Err(PantryError::CycleAmongNonPeerEdges { .. })
        ));
    }

    #[test]
    fn test_github_source_skips_registry() {
        let registry = MockRegistry::new();

        let resolution = resolve_with(
            &registry,
            r#"{"name":"p","dependencies":{"rg":"https://github.com/BurntSushi/ripgrep#v14.1.0"}}"#,
            ResolveOptions::default(),
        )
        .unwrap();

        assert_eq!(registry.metadata_requests(), 0);
        let id = resolution.graph.by_name(PackageName::new("rg")).unwrap();
        let package = resolution.graph.package(id).unwrap();
        assert_eq!(package.source, SourceKind::Github);
        assert_eq!(id.version(), &Version::new(14, 1, 0));
        assert!(package
            .resolved_url
            .as_deref()
            .unwrap()
            .contains("codeload.github.com/BurntSushi/ripgrep"));
    }

    #[test]
    fn test_workspace_member_is_local() {
        let tmp = TempDir::new().unwrap();
        let member_dir = tmp.path().join("packages").join("lib-a");
        std::fs::create_dir_all(&member_dir).unwrap();
        std::fs::write(
            member_dir.join("pantry.json"),
            r#"{"name":"lib-a","version":"0.2.0"}"#,
        )
        .unwrap();

        let root_json = r#"{"name":"p","workspaces":["packages/*"],"dependencies":{"lib-a":"*"}}"#;
        let root_path = tmp.path().join("pantry.json");
        std::fs::write(&root_path, root_json).unwrap();
        let manifest = parse_manifest(root_json, &root_path).unwrap();

        let registry = MockRegistry::new();
        let resolution = Resolver::new(&registry, None, ResolveOptions::default())
            .resolve(&manifest)
            .unwrap();

        assert_eq!(registry.metadata_requests(), 0);
        let id = resolution
            .graph
            .by_name(PackageName::new("lib-a"))
            .unwrap();
        let package = resolution.graph.package(id).unwrap();
        assert_eq!(package.source, SourceKind::Local);
        assert_eq!(package.local_path.as_deref(), Some(member_dir.as_path()));
        assert!(package.resolved_url.is_none());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[("shared", "^1")]);
        registry.publish("b", "1.0.0", &[("shared", "^1")]);
        registry.publish("shared", "1.2.0", &[]);

        let json = r#"{"name":"p","dependencies":{"b":"^1","a":"^1"}}"#;

        let first = resolve_with(&registry, json, ResolveOptions::default()).unwrap();
        let second = resolve_with(&registry, json, ResolveOptions::default()).unwrap();

        let order_a: Vec<String> = first
            .graph
            .topological_order()
            .unwrap()
            .iter()
            .map(|id| id.key())
            .collect();
        let order_b: Vec<String> = second
            .graph
            .topological_order()
            .unwrap()
            .iter()
            .map(|id| id.key())
            .collect();
        assert_eq!(order_a, order_b);

        // Lockfiles are byte-identical modulo the generation timestamp
        let mut lock_a = first.graph.to_lockfile(None);
        let mut lock_b = second.graph.to_lockfile(None);
        lock_a.generated_at = 0;
        lock_b.generated_at = 0;
        assert_eq!(lock_a.serialize(), lock_b.serialize());
    }
}
