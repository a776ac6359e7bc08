// Flow-graph data structures shared by all pipeline stages

pub mod analysis;
pub mod builder;
pub mod collapse;
pub mod dominators;
pub mod export;
pub mod loops;
pub mod post_dominators;
pub mod reachability;
pub mod scope;

pub use analysis::{find_terminals, out_degree};
pub use builder::build_statement_graph;
pub use collapse::collapse_blocks;
pub use dominators::DominatorTree;
pub use export::{export_dot, export_section_dot};
pub use loops::{build_acyclic, Loop, LoopKind};
pub use post_dominators::PostDominatorTree;
pub use reachability::prune_unreachable;
pub use scope::build_scopes;

use crate::cobol::{SectionId, SourceLocation, Statement, StatementKind};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flow graph for one program or one section
///
/// Node weights carry a [`NodeId`] that is assigned once by the statement
/// graph builder and preserved verbatim by every later stage; each stage
/// returns a fresh graph, so `NodeIndex` values are only meaningful within
/// one graph while `NodeId` is the cross-stage identity.
pub type FlowGraph = DiGraph<Node, EdgeKind>;

/// Stable node identity across pipeline stages
pub type NodeId = usize;

/// Identity of a recovered loop, assigned in preorder of headers
pub type LoopId = usize;

/// A flow-graph node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub section: SectionId,
    pub kind: NodeKind,
}

/// Node shapes, from raw statements through recovery markers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    /// One statement from the builder; a maximal linear block after collapse
    Statements(Vec<Statement>),
    /// Two-way conditional with `True`/`False` out-edges
    Branch {
        condition: String,
        location: SourceLocation,
    },
    /// Explicit merge point where both if-arms reunite
    Join,
    /// Synthetic section delimiter with a single `Fall` out-edge
    SectionEntry { name: String },
    /// Synthetic terminal delimiter; `PerformReturn` edges depart from here
    SectionExit { name: String },
    /// Single entry of a recovered loop
    LoopHeader { loop_id: LoopId },
    /// Terminal stand-in for a replaced back edge
    ContinueMarker { loop_id: LoopId },
    /// Terminal stand-in for an edge leaving a loop scope
    BreakMarker { loop_id: LoopId, exit_id: usize },
    /// Residual unstructured jump
    GotoMarker { label: String },
}

impl Node {
    /// True for marker and delimiter kinds that never emit statements
    pub fn is_synthetic(&self) -> bool {
        !matches!(self.kind, NodeKind::Statements(_) | NodeKind::Branch { .. })
    }

    /// Source location of the node's first statement, if any
    pub fn location(&self) -> Option<&SourceLocation> {
        match &self.kind {
            NodeKind::Statements(stmts) => stmts.first().map(|s| &s.location),
            NodeKind::Branch { location, .. } => Some(location),
            _ => None,
        }
    }

    /// Short label for graph exports
    pub fn summary(&self) -> String {
        match &self.kind {
            NodeKind::Statements(stmts) => match stmts.as_slice() {
                [] => "empty".to_string(),
                [only] => only.text.clone(),
                [first, ..] => format!("{} (+{})", first.text, stmts.len() - 1),
            },
            NodeKind::Branch { condition, .. } => format!("if {}", condition),
            NodeKind::Join => "join".to_string(),
            NodeKind::SectionEntry { name } => format!("entry {}", name),
            NodeKind::SectionExit { name } => format!("exit {}", name),
            NodeKind::LoopHeader { loop_id } => format!("loop_{}", loop_id),
            NodeKind::ContinueMarker { loop_id } => format!("continue loop_{}", loop_id),
            NodeKind::BreakMarker { loop_id, exit_id } => {
                format!("break loop_{} ({})", loop_id, exit_id)
            }
            NodeKind::GotoMarker { label } => format!("goto {}", label),
        }
    }
}

/// Edge classification; a node has at most one out-edge per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Sequential fallthrough
    Fall,
    /// Conditional branch taken
    True,
    /// Conditional branch not taken
    False,
    /// Call edge to a performed section or paragraph
    PerformCall,
    /// Return edge from a performed unit's terminator to the return site
    PerformReturn,
    /// `go to` / `next sentence` jump
    Jump,
}

impl EdgeKind {
    /// Edges followed when structuring a single section
    pub fn is_local_flow(self) -> bool {
        matches!(
            self,
            EdgeKind::Fall | EdgeKind::True | EdgeKind::False | EdgeKind::Jump
        )
    }

    /// Color for DOT visualization
    pub fn dot_color(self) -> &'static str {
        match self {
            EdgeKind::True => "green",
            EdgeKind::False => "red",
            EdgeKind::Fall => "black",
            EdgeKind::Jump => "blue",
            EdgeKind::PerformCall => "gray",
            EdgeKind::PerformReturn => "darkgray",
        }
    }

    /// Label for DOT visualization
    pub fn dot_label(self) -> &'static str {
        match self {
            EdgeKind::True => "T",
            EdgeKind::False => "F",
            EdgeKind::Fall => "",
            EdgeKind::Jump => "goto",
            EdgeKind::PerformCall => "perform",
            EdgeKind::PerformReturn => "return",
        }
    }
}

/// Whole-program graph produced by the builder and transformed by the
/// pruner and the block collapser
#[derive(Debug, Clone)]
pub struct ProgramGraph {
    pub graph: FlowGraph,
    /// Program entry node (the first section's entry delimiter)
    pub entry: NodeId,
    /// Sections still present, in textual order
    pub sections: Vec<SectionRef>,
    /// Call-site node to return-site node, so returns from different call
    /// sites of the same unit are never confused
    pub perform_returns: BTreeMap<NodeId, NodeId>,
    /// First statement node of each named paragraph (first occurrence wins);
    /// used to give residual labels their source names
    pub paragraph_anchors: BTreeMap<NodeId, String>,
}

/// Per-section handle into a [`ProgramGraph`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionRef {
    pub id: SectionId,
    pub name: String,
    pub entry: NodeId,
    pub exit: NodeId,
    pub location: SourceLocation,
}

/// One section's private flow graph, input to the loop and scope stages
#[derive(Debug, Clone)]
pub struct SectionGraph {
    pub section: SectionRef,
    pub graph: FlowGraph,
    pub entry: NodeId,
    /// Paragraph names for this section's anchor nodes
    pub anchors: BTreeMap<NodeId, String>,
}

/// Source-derived label for a node: its paragraph name when it starts one,
/// else a stable synthetic name
pub fn label_for(anchors: &BTreeMap<NodeId, String>, id: NodeId) -> String {
    anchors
        .get(&id)
        .cloned()
        .unwrap_or_else(|| format!("b{}", id))
}

/// Map stable ids to indices within one graph
pub fn index_by_id(graph: &FlowGraph) -> BTreeMap<NodeId, NodeIndex> {
    graph.node_indices().map(|ni| (graph[ni].id, ni)).collect()
}

/// The unique successor reached over an edge of the given kind
pub fn successor(graph: &FlowGraph, node: NodeIndex, kind: EdgeKind) -> Option<NodeIndex> {
    graph
        .edges(node)
        .find(|e| *e.weight() == kind)
        .map(|e| e.target())
}

/// All out-edges in deterministic order (by kind, then target id)
pub fn out_edges(graph: &FlowGraph, node: NodeIndex) -> Vec<(EdgeKind, NodeIndex)> {
    let mut edges: Vec<(EdgeKind, NodeIndex)> = graph
        .edges(node)
        .map(|e| (*e.weight(), e.target()))
        .collect();
    edges.sort_by_key(|(kind, target)| (*kind as u8, graph[*target].id));
    edges
}

/// First unused stable id in a graph
pub fn next_node_id(graph: &FlowGraph) -> NodeId {
    graph
        .node_indices()
        .map(|ni| graph[ni].id + 1)
        .max()
        .unwrap_or(0)
}

/// Extract one section's flow graph from the program graph
///
/// Keeps the section's nodes and the local-flow edges among them. A `Jump`
/// edge leaving the section (a cross-section `go to`, already warned about by
/// the builder) is rewritten to a terminal [`NodeKind::GotoMarker`] naming
/// the target, so the section structures on its own. `PerformCall` and
/// `PerformReturn` edges are dropped here: within a section a perform is an
/// opaque call statement.
pub fn section_subgraph(program: &ProgramGraph, section: &SectionRef) -> SectionGraph {
    let mut graph = FlowGraph::new();
    let mut mapping: BTreeMap<NodeId, NodeIndex> = BTreeMap::new();

    for ni in program.graph.node_indices() {
        let node = &program.graph[ni];
        if node.section == section.id {
            let new = graph.add_node(node.clone());
            mapping.insert(node.id, new);
        }
    }

    let mut next_id = next_node_id(&program.graph);
    let mut goto_markers: BTreeMap<String, NodeIndex> = BTreeMap::new();

    for ni in program.graph.node_indices() {
        let node = &program.graph[ni];
        if node.section != section.id {
            continue;
        }
        let from = mapping[&node.id];
        for (kind, target) in out_edges(&program.graph, ni) {
            if !kind.is_local_flow() {
                continue;
            }
            let target_node = &program.graph[target];
            if target_node.section == section.id {
                graph.add_edge(from, mapping[&target_node.id], kind);
            } else {
                let label = jump_label(node).unwrap_or_else(|| format!("b{}", target_node.id));
                let marker = *goto_markers.entry(label.clone()).or_insert_with(|| {
                    let id = next_id;
                    next_id += 1;
                    graph.add_node(Node {
                        id,
                        section: section.id,
                        kind: NodeKind::GotoMarker { label },
                    })
                });
                graph.add_edge(from, marker, kind);
            }
        }
    }

    let anchors = program
        .paragraph_anchors
        .iter()
        .filter(|(id, _)| mapping.contains_key(id))
        .map(|(&id, name)| (id, name.clone()))
        .collect();

    SectionGraph {
        section: section.clone(),
        graph,
        entry: section.entry,
        anchors,
    }
}

/// Label of the `go to` carried by a node's trailing statement
fn jump_label(node: &Node) -> Option<String> {
    match &node.kind {
        NodeKind::Statements(stmts) => match stmts.last().map(|s| &s.kind) {
            Some(StatementKind::GoTo { target }) => Some(target.clone()),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Small graph constructors shared by stage tests

    use super::*;
    use crate::cobol::SourceLocation;

    pub fn stmt(text: &str, line: usize) -> Statement {
        let kind = if let Some(target) = text.strip_prefix("go to ") {
            StatementKind::GoTo {
                target: target.to_string(),
            }
        } else if text == "exit" {
            StatementKind::ExitSection
        } else if text == "stop run" {
            StatementKind::ExitProgram
        } else if let Some(target) = text.strip_prefix("perform ") {
            StatementKind::Perform {
                target: target.to_string(),
                thru: None,
            }
        } else {
            StatementKind::Move
        };
        Statement {
            kind,
            text: text.to_string(),
            location: SourceLocation::point("test.cbl", line, 1),
        }
    }

    pub fn stmt_node(id: NodeId, text: &str) -> Node {
        Node {
            id,
            section: 0,
            kind: NodeKind::Statements(vec![stmt(text, id + 1)]),
        }
    }

    pub fn branch_node(id: NodeId, condition: &str) -> Node {
        Node {
            id,
            section: 0,
            kind: NodeKind::Branch {
                condition: condition.to_string(),
                location: SourceLocation::point("test.cbl", id + 1, 1),
            },
        }
    }

    pub fn entry_node(id: NodeId) -> Node {
        Node {
            id,
            section: 0,
            kind: NodeKind::SectionEntry {
                name: "test".to_string(),
            },
        }
    }

    pub fn exit_node(id: NodeId) -> Node {
        Node {
            id,
            section: 0,
            kind: NodeKind::SectionExit {
                name: "test".to_string(),
            },
        }
    }
}
