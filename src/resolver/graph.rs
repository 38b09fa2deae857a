//! The resolved dependency graph.
//!
//! Nodes are id-indexed; edges carry their kind. Peer edges are stored
//! but never participate in topological ordering, so peer cycles are
//! harmless while a cycle among normal or dev edges is fatal.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use semver::Version;

use crate::core::{DepKind, PackageId, SourceKind};
use crate::error::PantryError;
use crate::lockfile::{Lockfile, LockfileEntry};
use crate::util::{Integrity, PackageName};

/// One resolved package.
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    /// Identity
    pub id: PackageId,

    /// Where it comes from
    pub source: SourceKind,

    /// Artifact URL; present unless the package is workspace-local
    pub resolved_url: Option<String>,

    /// SHA-256 over the artifact; supplied by the registry or computed
    /// after download
    pub integrity: Option<Integrity>,

    /// Direct dependencies: name to exact version
    pub direct_deps: BTreeMap<PackageName, Version>,

    /// Declared binary entries (paths under the package root)
    pub binaries: Vec<String>,

    /// Environment variables the package publishes
    pub env: BTreeMap<String, String>,

    /// Directory of a workspace-local package
    pub local_path: Option<PathBuf>,
}

impl ResolvedPackage {
    pub fn name(&self) -> PackageName {
        self.id.name()
    }

    pub fn version(&self) -> &Version {
        self.id.version()
    }
}

/// The resolved graph: a DAG over normal and dev edges, with peer edges
/// carried as annotations.
#[derive(Debug, Default, Clone)]
pub struct ResolvedGraph {
    graph: DiGraph<PackageId, DepKind>,
    node_of: HashMap<PackageId, NodeIndex>,
    by_name: HashMap<PackageName, PackageId>,
    packages: HashMap<PackageId, ResolvedPackage>,
}

impl ResolvedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package node. A second version under the same name is a
    /// caller bug; the resolver guarantees one version per name.
    pub fn add_package(&mut self, package: ResolvedPackage) {
        let id = package.id;
        if self.node_of.contains_key(&id) {
            return;
        }

        let node = self.graph.add_node(id);
        self.node_of.insert(id, node);
        self.by_name.insert(id.name(), id);
        self.packages.insert(id, package);
    }

    /// Add a dependency edge `from -> to` of the given kind.
    pub fn add_edge(&mut self, from: PackageId, to: PackageId, kind: DepKind) {
        let (Some(&from_node), Some(&to_node)) =
            (self.node_of.get(&from), self.node_of.get(&to))
        else {
            return;
        };

        if !self.graph.contains_edge(from_node, to_node) {
            self.graph.add_edge(from_node, to_node, kind);
        }

        if matches!(kind, DepKind::Normal | DepKind::Dev) {
            if let Some(parent) = self.packages.get_mut(&from) {
                parent
                    .direct_deps
                    .insert(to.name(), to.version().clone());
            }
        }
    }

    pub fn package(&self, id: PackageId) -> Option<&ResolvedPackage> {
        self.packages.get(&id)
    }

    pub fn by_name(&self, name: PackageName) -> Option<PackageId> {
        self.by_name.get(&name).copied()
    }

    pub fn contains(&self, id: PackageId) -> bool {
        self.node_of.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// All package ids, sorted by name then version.
    pub fn sorted_ids(&self) -> Vec<PackageId> {
        let mut ids: Vec<PackageId> = self.packages.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Direct dependencies reachable over ordering (normal/dev) edges.
    pub fn ordering_deps(&self, id: PackageId) -> Vec<PackageId> {
        let Some(&node) = self.node_of.get(&id) else {
            return Vec::new();
        };
        let mut deps: Vec<PackageId> = self
            .graph
            .edges(node)
            .filter(|e| matches!(e.weight(), DepKind::Normal | DepKind::Dev))
            .map(|e| self.graph[e.target()])
            .collect();
        deps.sort();
        deps
    }

    /// Packages that depend on `id` over ordering edges.
    pub fn dependents(&self, id: PackageId) -> Vec<PackageId> {
        let Some(&node) = self.node_of.get(&id) else {
            return Vec::new();
        };
        let mut out: Vec<PackageId> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .filter(|e| matches!(e.weight(), DepKind::Normal | DepKind::Dev))
            .map(|e| self.graph[e.source()])
            .collect();
        out.sort();
        out
    }

    /// Topological order: dependencies before dependents, ties broken by
    /// name for determinism. Peer edges are ignored. A cycle among
    /// normal/dev edges is fatal.
    pub fn topological_order(&self) -> Result<Vec<PackageId>, PantryError> {
        let levels = self.topological_levels()?;
        Ok(levels.into_iter().flatten().collect())
    }

    /// Kahn layering over ordering edges: each level only depends on
    /// earlier levels, so a level can install as one parallel wave.
    /// Within a level, ids are sorted by name.
    pub fn topological_levels(&self) -> Result<Vec<Vec<PackageId>>, PantryError> {
        // remaining[u] = number of unsatisfied ordering dependencies of u
        let mut remaining: HashMap<PackageId, usize> = HashMap::new();
        for (&id, _) in &self.packages {
            remaining.insert(id, self.ordering_deps(id).len());
        }

        let mut ready: Vec<PackageId> = remaining
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&id, _)| id)
            .collect();
        ready.sort();

        let mut levels = Vec::new();
        let mut placed = 0usize;

        while !ready.is_empty() {
            let level = std::mem::take(&mut ready);
            placed += level.len();

            for &id in &level {
                for dependent in self.dependents(id) {
                    let count = remaining
                        .get_mut(&dependent)
                        .expect("dependent is a known node");
                    *count -= 1;
                    if *count == 0 {
                        ready.push(dependent);
                    }
                }
            }
            ready.sort();
            levels.push(level);
        }

        if placed < self.packages.len() {
            let mut stuck: Vec<String> = remaining
                .iter()
                .filter(|(_, &count)| count > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            stuck.sort();
            return Err(PantryError::CycleAmongNonPeerEdges {
                cycle: stuck.join(" -> "),
            });
        }

        Ok(levels)
    }

    /// Build the lockfile for this graph.
    pub fn to_lockfile(&self, project_version: Option<String>) -> Lockfile {
        let mut lockfile = Lockfile::new(project_version);

        for id in self.sorted_ids() {
            let package = &self.packages[&id];
            let dependencies = package
                .direct_deps
                .iter()
                .map(|(name, version)| (name.to_string(), version.to_string()))
                .collect();

            lockfile.packages.insert(
                id.key(),
                LockfileEntry {
                    dependencies,
                    integrity: package.integrity,
                    name: id.name().to_string(),
                    resolved: package.resolved_url.clone(),
                    source: package.source,
                    url: package.resolved_url.clone(),
                    version: id.version().to_string(),
                    extra: BTreeMap::new(),
                },
            );
        }

        lockfile
    }
}
