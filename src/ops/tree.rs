//! Textual rendering of the resolved graph, used by `pantry tree` and
//! pointed to by conflict diagnostics.

use std::collections::HashSet;

use crate::core::PackageId;
use crate::resolver::ResolvedGraph;

/// Render the graph as an indented tree, deterministic across runs.
/// Shared subtrees print once; repeats are marked with `(*)`.
pub fn render_tree(graph: &ResolvedGraph) -> String {
    let mut out = String::new();
    let mut seen = HashSet::new();

    // Roots: packages nothing depends on
    let roots: Vec<PackageId> = graph
        .sorted_ids()
        .into_iter()
        .filter(|&id| graph.dependents(id).is_empty())
        .collect();

    for root in roots {
        render_node(graph, root, 0, &mut seen, &mut out);
    }
    out
}

fn render_node(
    graph: &ResolvedGraph,
    id: PackageId,
    depth: usize,
    seen: &mut HashSet<PackageId>,
    out: &mut String,
) {
    for _ in 0..depth {
        out.push_str("  ");
    }

    if !seen.insert(id) {
        out.push_str(&format!("{id} (*)\n"));
        return;
    }
    out.push_str(&format!("{id}\n"));

    for dep in graph.ordering_deps(id) {
        render_node(graph, dep, depth + 1, seen, out);
    }
}
