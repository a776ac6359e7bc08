//! Flow-graph queries shared across the pipeline stages

use crate::cfg::FlowGraph;
use petgraph::graph::NodeIndex;

/// Count outgoing edges from a node
pub fn out_degree(graph: &FlowGraph, node: NodeIndex) -> usize {
    graph
        .neighbors_directed(node, petgraph::Direction::Outgoing)
        .count()
}

/// All terminal nodes (no outgoing edges), in insertion order
///
/// After marker insertion a section routinely has several: the section
/// exit, continue/break markers, residual gotos, and `stop run` blocks.
pub fn find_terminals(graph: &FlowGraph) -> Vec<NodeIndex> {
    graph
        .node_indices()
        .filter(|&n| out_degree(graph, n) == 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::testutil::*;
    use crate::cfg::EdgeKind;

    #[test]
    fn test_out_degree_and_terminals() {
        let mut g = FlowGraph::new();
        let a = g.add_node(branch_node(0, "a = 1"));
        let b = g.add_node(stmt_node(1, "x"));
        let c = g.add_node(stmt_node(2, "y"));
        let d = g.add_node(exit_node(3));
        g.add_edge(a, b, EdgeKind::True);
        g.add_edge(a, c, EdgeKind::False);
        g.add_edge(b, d, EdgeKind::Fall);

        assert_eq!(out_degree(&g, a), 2);
        assert_eq!(out_degree(&g, b), 1);
        assert_eq!(out_degree(&g, d), 0);
        // Both the exit and the dead-ended arm are terminals
        assert_eq!(find_terminals(&g), vec![c, d]);
    }
}
