//! Reachability pruning
//!
//! Forward reachability from the program entry over every edge kind except
//! `PerformReturn`, which is only meaningful once the matching call has been
//! entered. Unreachable nodes are removed from the active graph and reported
//! as info diagnostics; they stay available in the returned side list.

use crate::cfg::{EdgeKind, FlowGraph, Node, NodeKind, ProgramGraph};
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Result of the pruning stage
pub struct PruneResult {
    /// Fresh graph holding only reachable nodes
    pub program: ProgramGraph,
    /// Removed nodes, in stable-id order
    pub unreachable: Vec<Node>,
}

/// Find all nodes reachable from the program entry
pub fn find_reachable(program: &ProgramGraph) -> BTreeSet<NodeIndex> {
    let index = crate::cfg::index_by_id(&program.graph);
    let Some(&entry) = index.get(&program.entry) else {
        return BTreeSet::new();
    };

    let mut reachable = BTreeSet::new();
    traverse(&program.graph, entry, &mut reachable);
    reachable
}

/// Reachability used by the pruner: a section with any reachable node keeps
/// its entry delimiter alive, so a section entered only through a
/// cross-section goto still structures from its top
pub fn find_live(program: &ProgramGraph) -> BTreeSet<NodeIndex> {
    let index = crate::cfg::index_by_id(&program.graph);
    let mut reachable = find_reachable(program);
    loop {
        let mut changed = false;
        for section in &program.sections {
            let Some(&entry) = index.get(&section.entry) else {
                continue;
            };
            if reachable.contains(&entry) {
                continue;
            }
            let owns_reachable = program
                .graph
                .node_indices()
                .any(|ni| program.graph[ni].section == section.id && reachable.contains(&ni));
            if owns_reachable {
                traverse(&program.graph, entry, &mut reachable);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    reachable
}

/// Forward BFS over every edge kind except `PerformReturn`
fn traverse(graph: &FlowGraph, start: NodeIndex, reachable: &mut BTreeSet<NodeIndex>) {
    let mut worklist = VecDeque::new();
    worklist.push_back(start);
    while let Some(node) = worklist.pop_front() {
        if !reachable.insert(node) {
            continue;
        }
        for edge in graph.edges(node) {
            if *edge.weight() == EdgeKind::PerformReturn {
                continue;
            }
            if !reachable.contains(&edge.target()) {
                worklist.push_back(edge.target());
            }
        }
    }
}

/// Find all nodes unreachable from the program entry
pub fn find_unreachable(program: &ProgramGraph) -> Vec<NodeIndex> {
    let reachable = find_reachable(program);
    program
        .graph
        .node_indices()
        .filter(|n| !reachable.contains(n))
        .collect()
}

/// Produce the reachable subgraph and report what was dropped
pub fn prune_unreachable(program: &ProgramGraph, diags: &mut Diagnostics) -> PruneResult {
    let reachable = find_live(program);

    let mut graph = FlowGraph::new();
    let mut mapping: BTreeMap<NodeIndex, NodeIndex> = BTreeMap::new();
    for ni in program.graph.node_indices() {
        if reachable.contains(&ni) {
            let new = graph.add_node(program.graph[ni].clone());
            mapping.insert(ni, new);
        }
    }
    for edge in program.graph.edge_references() {
        if let (Some(&from), Some(&to)) =
            (mapping.get(&edge.source()), mapping.get(&edge.target()))
        {
            graph.add_edge(from, to, *edge.weight());
        }
    }

    let unreachable: Vec<Node> = program
        .graph
        .node_indices()
        .filter(|n| !reachable.contains(n))
        .map(|n| program.graph[n].clone())
        .collect();

    // Whole sections first, then stray statements in surviving sections
    let index = crate::cfg::index_by_id(&program.graph);
    let mut dead_sections = BTreeSet::new();
    let mut sections = Vec::new();
    for section in &program.sections {
        let entry_alive = index
            .get(&section.entry)
            .is_some_and(|ni| reachable.contains(ni));
        if entry_alive {
            sections.push(section.clone());
        } else {
            dead_sections.insert(section.id);
            diags.push(
                DiagnosticKind::UnreachableCode,
                format!("section '{}' is never reached", section.name),
                Some(section.location.clone()),
            );
        }
    }
    for node in &unreachable {
        if dead_sections.contains(&node.section) {
            continue;
        }
        if let NodeKind::Statements(stmts) = &node.kind {
            for stmt in stmts {
                diags.push(
                    DiagnosticKind::UnreachableCode,
                    format!("unreachable statement '{}'", stmt.text),
                    Some(stmt.location.clone()),
                );
            }
        }
    }

    let alive_ids: BTreeSet<_> = graph.node_indices().map(|ni| graph[ni].id).collect();
    let perform_returns = program
        .perform_returns
        .iter()
        .filter(|(call, ret)| alive_ids.contains(call) && alive_ids.contains(ret))
        .map(|(&call, &ret)| (call, ret))
        .collect();
    let paragraph_anchors = program
        .paragraph_anchors
        .iter()
        .filter(|(id, _)| alive_ids.contains(id))
        .map(|(&id, name)| (id, name.clone()))
        .collect();

    tracing::debug!(
        kept = graph.node_count(),
        dropped = unreachable.len(),
        "reachability pruning done"
    );

    PruneResult {
        program: ProgramGraph {
            graph,
            entry: program.entry,
            sections,
            perform_returns,
            paragraph_anchors,
        },
        unreachable,
    }
}
