//! Basic-block collapse
//!
//! Merges maximal linear chains of statement nodes into single composite
//! blocks carrying the concatenated statement list. A chain never crosses a
//! branch, join, section delimiter, or perform: perform statements keep
//! their own node so call and return edges stay anchored to the exact call
//! site. The surviving node keeps the chain head's stable id.

use crate::cfg::{EdgeKind, FlowGraph, NodeId, NodeKind, ProgramGraph};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet};

/// Collapse straight-line statement runs across the whole program graph
pub fn collapse_blocks(program: &ProgramGraph) -> ProgramGraph {
    let graph = &program.graph;

    // u chains into v when u's only flow out is a fall to v and v has no
    // other way in
    let mut merge_next: BTreeMap<NodeIndex, NodeIndex> = BTreeMap::new();
    for u in graph.node_indices() {
        if !is_plain_block(graph, u) {
            continue;
        }
        let out: Vec<_> = graph.edges(u).collect();
        let [edge] = out.as_slice() else { continue };
        if *edge.weight() != EdgeKind::Fall {
            continue;
        }
        let v = edge.target();
        if !is_plain_block(graph, v) {
            continue;
        }
        if graph[u].section != graph[v].section {
            continue;
        }
        if entering_degree(graph, v) == 1 {
            merge_next.insert(u, v);
        }
    }
    let merged_targets: BTreeSet<NodeIndex> = merge_next.values().copied().collect();

    // Representative (chain head) for every node
    let mut rep: BTreeMap<NodeIndex, NodeIndex> = BTreeMap::new();
    for ni in graph.node_indices() {
        if merged_targets.contains(&ni) {
            continue;
        }
        let mut cursor = ni;
        rep.insert(cursor, ni);
        while let Some(&next) = merge_next.get(&cursor) {
            rep.insert(next, ni);
            cursor = next;
        }
    }

    let mut collapsed = FlowGraph::new();
    let mut mapping: BTreeMap<NodeIndex, NodeIndex> = BTreeMap::new();
    for ni in graph.node_indices() {
        if merged_targets.contains(&ni) {
            continue;
        }
        let node = if let NodeKind::Statements(_) = &graph[ni].kind {
            let mut stmts = Vec::new();
            let mut cursor = ni;
            loop {
                if let NodeKind::Statements(s) = &graph[cursor].kind {
                    stmts.extend(s.iter().cloned());
                }
                match merge_next.get(&cursor) {
                    Some(&next) => cursor = next,
                    None => break,
                }
            }
            crate::cfg::Node {
                id: graph[ni].id,
                section: graph[ni].section,
                kind: NodeKind::Statements(stmts),
            }
        } else {
            graph[ni].clone()
        };
        mapping.insert(ni, collapsed.add_node(node));
    }

    // Interior fall edges disappear; everything else re-targets the heads
    let mut seen: BTreeSet<(NodeIndex, NodeIndex, EdgeKind)> = BTreeSet::new();
    for edge in graph.edge_references() {
        let (a, b) = (edge.source(), edge.target());
        if merge_next.get(&a) == Some(&b) && *edge.weight() == EdgeKind::Fall {
            continue;
        }
        let from = mapping[&rep[&a]];
        let to = mapping[&rep[&b]];
        if seen.insert((from, to, *edge.weight())) {
            collapsed.add_edge(from, to, *edge.weight());
        }
    }

    tracing::debug!(
        before = graph.node_count(),
        after = collapsed.node_count(),
        "blocks collapsed"
    );

    let surviving: BTreeSet<NodeId> = collapsed.node_indices().map(|ni| collapsed[ni].id).collect();
    ProgramGraph {
        graph: collapsed,
        entry: program.entry,
        sections: program.sections.clone(),
        perform_returns: program.perform_returns.clone(),
        paragraph_anchors: program
            .paragraph_anchors
            .iter()
            .filter(|(id, _)| surviving.contains(id))
            .map(|(&id, name)| (id, name.clone()))
            .collect(),
    }
}

/// Statement node that is not a perform call site
fn is_plain_block(graph: &FlowGraph, node: NodeIndex) -> bool {
    matches!(graph[node].kind, NodeKind::Statements(_))
        && !graph
            .edges(node)
            .any(|e| *e.weight() == EdgeKind::PerformCall)
}

/// In-degree over every kind that can enter a block mid-flow
///
/// `PerformReturn` is excluded: a return site's only flow predecessor is the
/// perform itself, which never chains forward.
fn entering_degree(graph: &FlowGraph, node: NodeIndex) -> usize {
    graph
        .edges_directed(node, petgraph::Direction::Incoming)
        .filter(|e| *e.weight() != EdgeKind::PerformReturn)
        .count()
}
