//! Flow-graph export to Graphviz DOT
//!
//! Every pipeline stage can be rendered: whole-program graphs as one
//! digraph, per-section graphs as one digraph with a cluster per section.
//! The final IR's machine-readable form is the serde serialization of
//! `ProgramIr`, not a graph snapshot, so there is no JSON here.

use crate::cfg::{EdgeKind, FlowGraph, NodeKind};
use petgraph::visit::EdgeRef;
use std::fmt::Write;

/// Export one graph to DOT for Graphviz
pub fn export_dot(graph: &FlowGraph, title: &str) -> String {
    let mut dot = format!("digraph \"{}\" {{\n", escape(title));
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=rounded];\n\n");
    write_nodes(graph, "", &mut dot);
    dot.push('\n');
    write_edges(graph, "", &mut dot);
    dot.push_str("}\n");
    dot
}

/// Export several per-section graphs as one DOT file with a cluster per
/// section
pub fn export_section_dot(sections: &[(String, &FlowGraph)]) -> String {
    let mut dot = String::from("digraph sections {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=rounded];\n\n");
    for (i, (name, graph)) in sections.iter().enumerate() {
        writeln!(dot, "  subgraph cluster_{} {{", i).ok();
        writeln!(dot, "    label=\"{}\";", escape(name)).ok();
        let prefix = format!("s{}_", i);
        write_nodes(graph, &prefix, &mut dot);
        write_edges(graph, &prefix, &mut dot);
        dot.push_str("  }\n");
    }
    dot.push_str("}\n");
    dot
}

fn write_nodes(graph: &FlowGraph, prefix: &str, dot: &mut String) {
    for ni in graph.node_indices() {
        let node = &graph[ni];
        let label = escape(&format!("b{}\\n{}", node.id, node.summary()));
        let style = match &node.kind {
            NodeKind::SectionEntry { .. } => ", fillcolor=lightgreen, style=filled",
            NodeKind::SectionExit { .. } => ", fillcolor=lightcoral, style=filled",
            NodeKind::Branch { .. } => ", shape=diamond",
            NodeKind::LoopHeader { .. } => ", fillcolor=lightblue, style=filled",
            NodeKind::ContinueMarker { .. } | NodeKind::BreakMarker { .. } => {
                ", fillcolor=lightyellow, style=filled"
            }
            NodeKind::GotoMarker { .. } => ", fillcolor=orange, style=filled",
            NodeKind::Join => ", shape=point",
            NodeKind::Statements(_) => "",
        };
        writeln!(
            dot,
            "  \"{}{}\" [label=\"{}\"{}];",
            prefix,
            node.id,
            label,
            style
        )
        .ok();
    }
}

fn write_edges(graph: &FlowGraph, prefix: &str, dot: &mut String) {
    for edge in graph.edge_references() {
        let kind = *edge.weight();
        let label = kind.dot_label();
        let label_attr = if label.is_empty() {
            String::new()
        } else {
            format!(", label=\"{}\"", label)
        };
        writeln!(
            dot,
            "  \"{}{}\" -> \"{}{}\" [color={}, style={}{}];",
            prefix,
            graph[edge.source()].id,
            prefix,
            graph[edge.target()].id,
            kind.dot_color(),
            if kind == EdgeKind::Fall { "solid" } else { "dashed" },
            label_attr
        )
        .ok();
    }
}

fn escape(s: &str) -> String {
    s.replace('"', "\\\"")
}
