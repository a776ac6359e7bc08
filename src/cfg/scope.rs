//! Loop scope computation
//!
//! For each recovered loop: its scope is the node set it owns (the natural
//! loop body plus its own and nested loops' markers); its exit set is every
//! edge leaving the scope. Exit edges are rewritten onto terminal
//! [`NodeKind::BreakMarker`]s and the distinct continuation targets are
//! recorded on the loop. An edge leaving several nested scopes at once
//! belongs to the outermost loop that contains its origin but not its
//! target, so a single labeled break expresses the whole escape.
//!
//! A goto statement whose node sits just outside the scope is a pure
//! trampoline: exit targets resolve through such nodes to the real
//! continuation. When the trampoline lands on a continue or goto marker the
//! edge is left alone; the flattener already emits the right terminal for
//! it (a `go to` onto an outer loop's start is a labeled continue, not a
//! break).
//!
//! Scopes also decide the loop's shape: a single exit leaving from the
//! header branch whose other arm stays in scope flattens to `while`;
//! everything else stays a `forever` with explicit breaks.

use crate::cfg::loops::AcyclicSection;
use crate::cfg::{
    next_node_id, EdgeKind, FlowGraph, Loop, LoopKind, Node, NodeId, NodeKind, SectionRef,
};
use crate::cobol::StatementKind;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet};

/// One section's DAG with loop scopes delimited
#[derive(Debug, Clone)]
pub struct ScopedSection {
    pub section: SectionRef,
    pub graph: FlowGraph,
    pub entry: NodeId,
    pub loops: Vec<Loop>,
    /// Nodes degraded to goto-only blocks, with their labels
    pub unstructured: BTreeMap<NodeId, String>,
    /// Nodes outside the degraded regions that goto edges land on
    pub label_targets: BTreeMap<NodeId, String>,
    /// Paragraph names for this section's anchor nodes
    pub anchors: BTreeMap<NodeId, String>,
}

/// Compute loop scopes and rewrite exit edges to break markers
pub fn build_scopes(acyclic: &AcyclicSection) -> ScopedSection {
    let graph = &acyclic.graph;
    let index = crate::cfg::index_by_id(graph);
    let mut loops = acyclic.loops.clone();

    // Scope: body plus the loop's own markers and every nested loop's markers
    let mut scopes: Vec<BTreeSet<NodeId>> = loops
        .iter()
        .map(|l| {
            let mut scope = l.body.clone();
            scope.insert(l.header_marker);
            scope.insert(l.continue_marker);
            scope
        })
        .collect();
    for inner in &loops {
        let mut ancestor = inner.parent;
        while let Some(a) = ancestor {
            scopes[a].insert(inner.header_marker);
            scopes[a].insert(inner.continue_marker);
            ancestor = loops[a].parent;
        }
    }

    // Classify every edge once, in deterministic order
    let mut edges: Vec<(NodeId, NodeId, EdgeKind)> = graph
        .edge_references()
        .map(|e| (graph[e.source()].id, graph[e.target()].id, *e.weight()))
        .collect();
    edges.sort_by_key(|&(u, v, kind)| (u, kind as u8, v));

    struct ExitEdge {
        from: NodeId,
        orig_target: NodeId,
        resolved: NodeId,
        kind: EdgeKind,
        loop_id: usize,
    }
    let mut exit_edges: Vec<ExitEdge> = Vec::new();
    for &(u, v, kind) in &edges {
        if is_final_marker(graph, index[&v]) {
            continue;
        }
        let escaping = loops
            .iter()
            .filter(|l| scopes[l.id].contains(&u) && !scopes[l.id].contains(&v))
            .max_by_key(|l| (scopes[l.id].len(), l.id));
        let Some(l) = escaping else { continue };
        let resolved = resolve_trampolines(graph, &index, v);
        if is_final_marker(graph, index[&resolved]) {
            continue;
        }
        exit_edges.push(ExitEdge {
            from: u,
            orig_target: v,
            resolved,
            kind,
            loop_id: l.id,
        });
    }

    // Distinct continuation targets per loop, earliest textual position first
    for l in &mut loops {
        let mut targets: Vec<NodeId> = exit_edges
            .iter()
            .filter(|e| e.loop_id == l.id)
            .map(|e| e.resolved)
            .collect();
        targets.sort_by_key(|id| {
            let line = graph[index[id]]
                .location()
                .map(|loc| loc.start_line)
                .unwrap_or(usize::MAX);
            (line, *id)
        });
        let mut seen = BTreeSet::new();
        targets.retain(|id| seen.insert(*id));
        l.exits = targets;
    }

    // Rewrite: copy nodes, route exit edges through break markers
    let mut fresh = FlowGraph::new();
    let mut mapping: BTreeMap<NodeId, NodeIndex> = BTreeMap::new();
    for ni in graph.node_indices() {
        mapping.insert(graph[ni].id, fresh.add_node(graph[ni].clone()));
    }
    let mut next_id = next_node_id(graph);
    let mut break_markers: BTreeMap<(usize, usize), NodeIndex> = BTreeMap::new();
    let exit_lookup: BTreeMap<(NodeId, NodeId, u8), usize> = exit_edges
        .iter()
        .map(|e| ((e.from, e.orig_target, e.kind as u8), e.loop_id))
        .collect();
    let resolved_lookup: BTreeMap<(NodeId, NodeId, u8), NodeId> = exit_edges
        .iter()
        .map(|e| ((e.from, e.orig_target, e.kind as u8), e.resolved))
        .collect();

    for &(u, v, kind) in &edges {
        let from = mapping[&u];
        let key = (u, v, kind as u8);
        if let Some(&loop_id) = exit_lookup.get(&key) {
            let resolved = resolved_lookup[&key];
            let exit_id = loops[loop_id]
                .exits
                .iter()
                .position(|&t| t == resolved)
                .expect("exit target recorded");
            let marker = *break_markers.entry((loop_id, exit_id)).or_insert_with(|| {
                let id = next_id;
                next_id += 1;
                fresh.add_node(Node {
                    id,
                    section: acyclic.section.id,
                    kind: NodeKind::BreakMarker { loop_id, exit_id },
                })
            });
            fresh.add_edge(from, marker, kind);
        } else {
            fresh.add_edge(from, mapping[&v], kind);
        }
    }

    // Shape: single exit through the header branch, other arm in scope
    for l in &mut loops {
        if l.exits.len() != 1 {
            continue;
        }
        let own_exits: Vec<&ExitEdge> = exit_edges
            .iter()
            .filter(|e| e.loop_id == l.id)
            .collect();
        let [only] = own_exits.as_slice() else { continue };
        if only.from != l.header {
            continue;
        }
        let header = index[&l.header];
        if !matches!(graph[header].kind, NodeKind::Branch { .. }) {
            continue;
        }
        let other_kind = match only.kind {
            EdgeKind::True => EdgeKind::False,
            _ => EdgeKind::True,
        };
        let stays = crate::cfg::successor(graph, header, other_kind)
            .map(|ni| graph[ni].id)
            .is_some_and(|id| scopes[l.id].contains(&id));
        if stays {
            l.kind = LoopKind::While {
                branch: l.header,
                exit_on_true: only.kind == EdgeKind::True,
            };
        }
    }

    tracing::debug!(
        section = %acyclic.section.name,
        loops = loops.len(),
        breaks = break_markers.len(),
        "loop scopes delimited"
    );

    ScopedSection {
        section: acyclic.section.clone(),
        graph: fresh,
        entry: acyclic.entry,
        loops,
        unstructured: acyclic.unstructured.clone(),
        label_targets: acyclic.label_targets.clone(),
        anchors: acyclic.anchors.clone(),
    }
}

/// Continue and goto markers are already the right terminal for a jump
fn is_final_marker(graph: &FlowGraph, node: NodeIndex) -> bool {
    matches!(
        graph[node].kind,
        NodeKind::ContinueMarker { .. } | NodeKind::GotoMarker { .. }
    )
}

/// Follow chains of pure `go to` nodes to the continuation they reach
///
/// A trampoline is a block holding a single goto statement with a single
/// outgoing jump. The graph is acyclic here, so the walk terminates.
fn resolve_trampolines(
    graph: &FlowGraph,
    index: &BTreeMap<NodeId, NodeIndex>,
    start: NodeId,
) -> NodeId {
    let mut current = start;
    loop {
        let ni = index[&current];
        let is_trampoline = matches!(
            &graph[ni].kind,
            NodeKind::Statements(stmts)
                if matches!(stmts.as_slice(), [one] if matches!(one.kind, StatementKind::GoTo { .. }))
        );
        if !is_trampoline || crate::cfg::out_degree(graph, ni) != 1 {
            return current;
        }
        let Some(edge) = graph.edges(ni).next() else {
            return current;
        };
        current = graph[edge.target()].id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{
        build_acyclic, build_statement_graph, collapse_blocks, prune_unreachable,
        section_subgraph,
    };
    use crate::cobol::parse_source;
    use crate::diagnostics::Diagnostics;

    fn scoped(text: &str) -> ScopedSection {
        let program = parse_source("test.cbl", text);
        let mut diags = Diagnostics::new();
        let pg = build_statement_graph(&program, &mut diags).expect("build failed");
        let pruned = prune_unreachable(&pg, &mut diags);
        let collapsed = collapse_blocks(&pruned.program);
        let section = section_subgraph(&collapsed, &collapsed.sections[0]);
        let acyclic = build_acyclic(&section, &mut diags);
        build_scopes(&acyclic)
    }

    #[test]
    fn test_while_shape_recovered() {
        let result = scoped(
            "main section.\n\
             top.\n\
             \x20   if a = 0 go to done.\n\
             \x20   move 1 to b.\n\
             \x20   go to top.\n\
             done.\n\
             \x20   exit.\n",
        );
        assert_eq!(result.loops.len(), 1);
        let lp = &result.loops[0];
        assert_eq!(lp.exits.len(), 1);
        assert!(matches!(
            lp.kind,
            LoopKind::While {
                exit_on_true: true,
                ..
            }
        ));

        // The continuation resolved through the goto trampoline to the
        // `done` paragraph's block
        let idx = crate::cfg::index_by_id(&result.graph);
        let target = &result.graph[idx[&lp.exits[0]]];
        assert!(matches!(
            &target.kind,
            NodeKind::Statements(stmts) if stmts[0].text == "exit"
        ));
    }

    #[test]
    fn test_mid_loop_exit_stays_forever() {
        let result = scoped(
            "main section.\n\
             top.\n\
             \x20   move 1 to b.\n\
             \x20   if a = 0 go to done.\n\
             \x20   go to top.\n\
             done.\n\
             \x20   exit.\n",
        );
        assert_eq!(result.loops.len(), 1);
        let lp = &result.loops[0];
        assert_eq!(lp.exits.len(), 1);
        assert_eq!(lp.kind, LoopKind::Forever);

        // The exit edge now lands on a break marker
        let has_break = result.graph.node_indices().any(|ni| {
            matches!(
                result.graph[ni].kind,
                NodeKind::BreakMarker {
                    loop_id: 0,
                    exit_id: 0
                }
            )
        });
        assert!(has_break);
    }

    #[test]
    fn test_infinite_loop_has_no_exits() {
        let result = scoped(
            "main section.\n\
             top.\n\
             \x20   move 1 to b.\n\
             \x20   go to top.\n",
        );
        assert_eq!(result.loops.len(), 1);
        assert!(result.loops[0].exits.is_empty());
        assert_eq!(result.loops[0].kind, LoopKind::Forever);
    }

    #[test]
    fn test_escape_from_nested_loops_belongs_to_outer() {
        // Both `go to way-out` jumps leave the nesting entirely; they share
        // one resolved continuation and belong to the outer loop
        let result = scoped(
            "main section.\n\
             outer.\n\
             \x20   if a = 0 go to way-out.\n\
             inner.\n\
             \x20   if b = 0 go to way-out.\n\
             \x20   if c = 0 go to inner.\n\
             \x20   go to outer.\n\
             way-out.\n\
             \x20   exit.\n",
        );
        assert_eq!(result.loops.len(), 2);
        let outer = &result.loops[0];
        let inner = &result.loops[1];
        assert_eq!(inner.parent, Some(outer.id));

        assert_eq!(outer.exits.len(), 1);
        // The inner loop's only routes out are the shared escape (an outer
        // exit) and the jump onto the outer continue marker
        assert!(inner.exits.is_empty());
    }
}
