//! Natural loop recovery and acyclic rewrite
//!
//! Back edges are found with dominance analysis: an edge `u -> v` where `v`
//! dominates `u`. Each distinct target forms one natural loop (back edges
//! sharing a header merge). The rewrite then produces a fresh graph where
//! forward entries are routed through a synthetic [`NodeKind::LoopHeader`]
//! and every back edge lands on a terminal [`NodeKind::ContinueMarker`], so
//! the result is a DAG per section.
//!
//! Cycles that are not natural loops (a body node not dominated by the
//! header, or a strongly connected component without any back-edge target)
//! are irreducible: their nodes are cut out of structured flow, every edge
//! touching them becomes a [`NodeKind::GotoMarker`], and the flattener emits
//! them as a flat run of labeled blocks.

use crate::cfg::{
    next_node_id, EdgeKind, FlowGraph, LoopId, Node, NodeId, NodeKind, SectionGraph, SectionRef,
};
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use petgraph::algo::{is_cyclic_directed, kosaraju_scc};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A recovered loop
#[derive(Debug, Clone)]
pub struct Loop {
    /// Ids are assigned in preorder of headers (textual position)
    pub id: LoopId,
    /// Original header node (the back-edge target)
    pub header: NodeId,
    /// Synthetic header delimiter inserted before `header`
    pub header_marker: NodeId,
    /// Terminal marker every back edge now lands on
    pub continue_marker: NodeId,
    /// Loop scope: the nodes the loop owns, header included
    pub body: BTreeSet<NodeId>,
    /// Back-edge origins in textual order
    pub back_edge_origins: Vec<NodeId>,
    /// Innermost enclosing loop, if any
    pub parent: Option<LoopId>,
    /// Distinct exit targets in deterministic order; filled by the scope
    /// stage
    pub exits: Vec<NodeId>,
    /// Recovered shape; refined by the scope stage
    pub kind: LoopKind,
}

/// Shape a loop flattens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// `loop { ... }` with explicit breaks
    Forever,
    /// Condition test at the loop head; the loop's sole exit
    While {
        /// The branch node carrying the condition
        branch: NodeId,
        /// True when the `True` arm leaves the loop
        exit_on_true: bool,
    },
}

/// One section's DAG after loop recovery
#[derive(Debug, Clone)]
pub struct AcyclicSection {
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

/// Recover loops in one section and rewrite its graph into a DAG
pub fn build_acyclic(section: &SectionGraph, diags: &mut Diagnostics) -> AcyclicSection {
    let graph = &section.graph;
    let index = crate::cfg::index_by_id(graph);
    let entry = index[&section.entry];

    let mut irreducible: BTreeSet<NodeId> = BTreeSet::new();
    let mut result;
    loop {
        let candidates = find_natural_loops(graph, entry, &mut irreducible);
        let retained: Vec<LoopInfo> = candidates
            .into_iter()
            .filter(|l| l.body.is_disjoint(&irreducible))
            .collect();
        result = rewrite(section, &retained, &irreducible);

        if !is_cyclic_directed(&result.graph) {
            break;
        }
        // A cycle survived the rewrite; degrade its nodes and go again
        let before = irreducible.len();
        for scc in kosaraju_scc(&result.graph) {
            if scc.len() > 1 {
                for ni in scc {
                    let id = result.graph[ni].id;
                    if original_node(graph, id) {
                        irreducible.insert(id);
                    }
                }
            }
        }
        // Every cycle carries at least one original node; bail rather than
        // spin if that ever stops holding
        if irreducible.len() == before {
            debug_assert!(false, "cycle without original nodes survived rewrite");
            break;
        }
    }

    if !result.unstructured.is_empty() {
        let first = result.unstructured.keys().next().copied();
        let location = first
            .and_then(|id| index.get(&id))
            .and_then(|&ni| graph[ni].location().cloned());
        diags.push(
            DiagnosticKind::IrreducibleControlFlow,
            format!(
                "section '{}': {} block(s) form irreducible control flow, emitted as labeled gotos",
                section.section.name,
                result.unstructured.len()
            ),
            location,
        );
    }

    tracing::debug!(
        section = %section.section.name,
        loops = result.loops.len(),
        unstructured = result.unstructured.len(),
        "acyclic rewrite done"
    );
    result
}

struct LoopInfo {
    header: NodeId,
    body: BTreeSet<NodeId>,
    back_edge_origins: Vec<NodeId>,
}

fn original_node(graph: &FlowGraph, id: NodeId) -> bool {
    graph.node_indices().any(|ni| graph[ni].id == id)
}

/// Detect natural loops; bodies with a node the header does not dominate are
/// marked irreducible instead of being returned
fn find_natural_loops(
    graph: &FlowGraph,
    entry: NodeIndex,
    irreducible: &mut BTreeSet<NodeId>,
) -> Vec<LoopInfo> {
    let dom = crate::cfg::DominatorTree::new(graph, entry);

    // Back edges in textual order: target dominates origin
    let mut back_edges: Vec<(NodeIndex, NodeIndex)> = graph
        .edge_references()
        .filter(|e| dom.is_reachable(e.source()) && dom.dominates(e.target(), e.source()))
        .map(|e| (e.source(), e.target()))
        .collect();
    back_edges.sort_by_key(|&(u, v)| (graph[u].id, graph[v].id));

    let mut by_header: BTreeMap<NodeId, Vec<NodeIndex>> = BTreeMap::new();
    for (u, v) in &back_edges {
        by_header.entry(graph[*v].id).or_default().push(*u);
    }

    let index = crate::cfg::index_by_id(graph);
    let mut loops = Vec::new();
    for (header_id, origins) in by_header {
        let header = index[&header_id];
        let mut body = BTreeSet::new();
        for &origin in &origins {
            collect_loop_body(graph, header, origin, &mut body);
        }
        body.insert(header_id);

        // A body node the header does not dominate means a second entry:
        // not a natural loop
        let reducible = body
            .iter()
            .all(|id| dom.dominates(header, index[id]));
        if reducible {
            loops.push(LoopInfo {
                header: header_id,
                body,
                back_edge_origins: origins.iter().map(|&ni| graph[ni].id).collect(),
            });
        } else {
            irreducible.extend(body);
        }
    }

    // SCCs containing no loop header are cycles with no single entry
    let headers: BTreeSet<NodeId> = loops.iter().map(|l| l.header).collect();
    for scc in kosaraju_scc(graph) {
        let is_cycle = scc.len() > 1
            || (scc.len() == 1 && graph.find_edge(scc[0], scc[0]).is_some());
        if !is_cycle {
            continue;
        }
        if !scc.iter().any(|&ni| headers.contains(&graph[ni].id)) {
            irreducible.extend(scc.iter().map(|&ni| graph[ni].id));
        }
    }

    loops
}

/// The body of a natural loop: the header plus every node that reaches the
/// back-edge origin without passing through the header
fn collect_loop_body(
    graph: &FlowGraph,
    header: NodeIndex,
    origin: NodeIndex,
    body: &mut BTreeSet<NodeId>,
) {
    let mut worklist = VecDeque::new();
    worklist.push_back(origin);
    while let Some(node) = worklist.pop_front() {
        if node == header {
            continue;
        }
        if !body.insert(graph[node].id) {
            continue;
        }
        for pred in graph.neighbors_directed(node, petgraph::Direction::Incoming) {
            if pred != header && !body.contains(&graph[pred].id) {
                worklist.push_back(pred);
            }
        }
    }
}

/// Build the rewritten DAG: loop headers inserted, back edges replaced by
/// continue markers, irreducible regions fenced off behind goto markers
fn rewrite(
    section: &SectionGraph,
    retained: &[LoopInfo],
    irreducible: &BTreeSet<NodeId>,
) -> AcyclicSection {
    let graph = &section.graph;
    let index = crate::cfg::index_by_id(graph);

    // Preorder ids: textual position of the header, then stable id
    let mut order: Vec<usize> = (0..retained.len()).collect();
    order.sort_by_key(|&i| {
        let header = index[&retained[i].header];
        let line = graph[header]
            .location()
            .map(|l| l.start_line)
            .unwrap_or(usize::MAX);
        (line, retained[i].header)
    });

    let mut fresh = FlowGraph::new();
    let mut mapping: BTreeMap<NodeId, NodeIndex> = BTreeMap::new();
    for ni in graph.node_indices() {
        let node = &graph[ni];
        mapping.insert(node.id, fresh.add_node(node.clone()));
    }

    let mut next_id = next_node_id(graph);
    let sid = section.section.id;
    let mut loops: Vec<Loop> = Vec::new();
    let mut header_to_loop: BTreeMap<NodeId, usize> = BTreeMap::new();
    for (loop_id, &i) in order.iter().enumerate() {
        let info = &retained[i];
        let header_marker = next_id;
        let continue_marker = next_id + 1;
        next_id += 2;
        let hm = fresh.add_node(Node {
            id: header_marker,
            section: sid,
            kind: NodeKind::LoopHeader { loop_id },
        });
        fresh.add_node(Node {
            id: continue_marker,
            section: sid,
            kind: NodeKind::ContinueMarker { loop_id },
        });
        fresh.add_edge(hm, mapping[&info.header], EdgeKind::Fall);
        header_to_loop.insert(info.header, loop_id);
        loops.push(Loop {
            id: loop_id,
            header: info.header,
            header_marker,
            continue_marker,
            body: info.body.clone(),
            back_edge_origins: info.back_edge_origins.clone(),
            parent: None,
            exits: Vec::new(),
            kind: LoopKind::Forever,
        });
    }
    let marker_index = crate::cfg::index_by_id(&fresh);

    // Innermost enclosing loop: the smallest other body containing the header
    for i in 0..loops.len() {
        let parent = loops
            .iter()
            .filter(|other| other.id != loops[i].id && other.body.contains(&loops[i].header))
            .min_by_key(|other| (other.body.len(), other.id))
            .map(|other| other.id);
        loops[i].parent = parent;
    }

    // Labels for degraded nodes and for the targets their gotos land on
    let mut unstructured: BTreeMap<NodeId, String> = BTreeMap::new();
    for &id in irreducible {
        unstructured.insert(id, crate::cfg::label_for(&section.anchors, id));
    }
    let mut label_targets: BTreeMap<NodeId, String> = BTreeMap::new();

    let mut edges: Vec<(NodeId, NodeId, EdgeKind)> = graph
        .edge_references()
        .map(|e| (graph[e.source()].id, graph[e.target()].id, *e.weight()))
        .collect();
    edges.sort_by_key(|&(u, v, kind)| (u, kind as u8, v));

    let mut goto_markers: BTreeMap<String, NodeIndex> = BTreeMap::new();
    let mut add_goto = |fresh: &mut FlowGraph, next_id: &mut NodeId, label: String| {
        *goto_markers.entry(label.clone()).or_insert_with(|| {
            let id = *next_id;
            *next_id += 1;
            fresh.add_node(Node {
                id,
                section: sid,
                kind: NodeKind::GotoMarker { label },
            })
        })
    };

    for (u, v, kind) in edges {
        let from = mapping[&u];
        if irreducible.contains(&v) {
            let label = crate::cfg::label_for(&section.anchors, v);
            let marker = add_goto(&mut fresh, &mut next_id, label);
            fresh.add_edge(from, marker, kind);
        } else if irreducible.contains(&u) {
            // Region nodes hand control back through explicit gotos only
            let label = crate::cfg::label_for(&section.anchors, v);
            label_targets.insert(v, label.clone());
            let marker = add_goto(&mut fresh, &mut next_id, label);
            fresh.add_edge(from, marker, kind);
        } else if let Some(&loop_id) = header_to_loop.get(&v) {
            let lp = &loops[loop_id];
            if lp.body.contains(&u) {
                fresh.add_edge(from, marker_index[&lp.continue_marker], kind);
            } else {
                fresh.add_edge(from, marker_index[&lp.header_marker], kind);
            }
        } else {
            fresh.add_edge(from, mapping[&v], kind);
        }
    }

    AcyclicSection {
        section: section.section.clone(),
        graph: fresh,
        entry: section.entry,
        loops,
        unstructured,
        label_targets,
        anchors: section.anchors.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{
        build_statement_graph, collapse_blocks, prune_unreachable, section_subgraph,
    };
    use crate::cobol::parse_source;

    fn acyclic(text: &str) -> (AcyclicSection, Diagnostics) {
        let program = parse_source("test.cbl", text);
        let mut diags = Diagnostics::new();
        let pg = build_statement_graph(&program, &mut diags).expect("build failed");
        let pruned = prune_unreachable(&pg, &mut diags);
        let collapsed = collapse_blocks(&pruned.program);
        let section = section_subgraph(&collapsed, &collapsed.sections[0]);
        let result = build_acyclic(&section, &mut diags);
        (result, diags)
    }

    #[test]
    fn test_straight_line_has_no_loops() {
        let (result, _) = acyclic(
            "main section.\n\
             \x20   move 1 to a.\n\
             \x20   stop run.\n",
        );
        assert!(result.loops.is_empty());
        assert!(result.unstructured.is_empty());
        assert!(!is_cyclic_directed(&result.graph));
    }

    #[test]
    fn test_self_loop_recovered() {
        let (result, _) = acyclic(
            "main section.\n\
             again.\n\
             \x20   move 1 to a.\n\
             \x20   go to again.\n",
        );
        assert_eq!(result.loops.len(), 1);
        let lp = &result.loops[0];
        assert_eq!(lp.back_edge_origins.len(), 1);
        assert!(lp.body.contains(&lp.header));
        assert!(!is_cyclic_directed(&result.graph));

        // Back edge now lands on the continue marker
        let idx = crate::cfg::index_by_id(&result.graph);
        let marker = idx[&lp.continue_marker];
        assert!(matches!(
            result.graph[marker].kind,
            NodeKind::ContinueMarker { loop_id: 0 }
        ));
        let incoming = result
            .graph
            .neighbors_directed(marker, petgraph::Direction::Incoming)
            .count();
        assert_eq!(incoming, 1);
    }

    #[test]
    fn test_nested_loops_have_parent_links() {
        let (result, _) = acyclic(
            "main section.\n\
             outer.\n\
             \x20   if a = 0 go to done.\n\
             inner.\n\
             \x20   if b = 0 go to outer.\n\
             \x20   go to inner.\n\
             done.\n\
             \x20   exit.\n",
        );
        assert_eq!(result.loops.len(), 2);
        let outer = &result.loops[0];
        let inner = &result.loops[1];
        assert_eq!(outer.parent, None);
        assert_eq!(inner.parent, Some(outer.id));
        assert!(outer.body.contains(&inner.header));
        assert!(!is_cyclic_directed(&result.graph));
    }

    #[test]
    fn test_two_back_edges_one_header_merge() {
        let (result, _) = acyclic(
            "main section.\n\
             top.\n\
             \x20   if a = 1 go to top.\n\
             \x20   if a = 2 go to top.\n\
             \x20   stop run.\n",
        );
        assert_eq!(result.loops.len(), 1);
        assert_eq!(result.loops[0].back_edge_origins.len(), 2);
    }

    #[test]
    fn test_irreducible_cross_jumps_degrade() {
        let (result, diags) = acyclic(
            "main section.\n\
             \x20   if a = 'x' go to l-side.\n\
             \x20   go to r-side.\n\
             l-side.\n\
             \x20   move 1 to b.\n\
             \x20   go to r-side.\n\
             r-side.\n\
             \x20   move 2 to b.\n\
             \x20   go to l-side.\n",
        );
        assert!(result.loops.is_empty());
        assert!(!result.unstructured.is_empty());
        assert!(!is_cyclic_directed(&result.graph));
        assert_eq!(
            diags
                .of_kind(DiagnosticKind::IrreducibleControlFlow)
                .count(),
            1
        );
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let (result, _) = acyclic(
            "main section.\n\
             again.\n\
             \x20   move 1 to a.\n\
             \x20   go to again.\n",
        );
        let section = SectionGraph {
            section: result.section.clone(),
            graph: result.graph.clone(),
            entry: result.entry,
            anchors: result.anchors.clone(),
        };
        let mut diags = Diagnostics::new();
        let second = build_acyclic(&section, &mut diags);
        assert!(second.loops.is_empty());
        assert_eq!(second.graph.node_count(), result.graph.node_count());
    }
}
