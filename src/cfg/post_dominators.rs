//! Post-dominator tree construction and queries
//!
//! A node d post-dominates node n if every path from n to an exit must go
//! through d. Computed by running the dominance algorithm on a reversed
//! graph. Sections routinely have several terminals (section exit, `stop
//! run`, continue/break markers, residual gotos), so the reversal is rooted
//! at a virtual sink that every terminal feeds; the sink never leaks out of
//! this module.

use crate::cfg::analysis::find_terminals;
use crate::cfg::dominators::DominatorTree;
use crate::cfg::{EdgeKind, FlowGraph, Node, NodeKind};
use petgraph::algo::dominators::simple_fast;
use petgraph::graph::NodeIndex;
use petgraph::visit::Reversed;
use std::collections::HashMap;

/// Post-dominator tree for one section's flow graph
#[derive(Debug, Clone)]
pub struct PostDominatorTree {
    /// Dominator tree on the reversed, sink-augmented graph
    inner: DominatorTree,
    /// The virtual sink; filtered out of every query result
    sink: NodeIndex,
}

impl PostDominatorTree {
    /// Compute post-dominators over a graph with any number of terminals
    pub fn new(graph: &FlowGraph) -> Self {
        // Augment a scratch copy with a virtual sink fed by every terminal
        let mut augmented = graph.clone();
        let sink = augmented.add_node(Node {
            id: usize::MAX,
            section: 0,
            kind: NodeKind::Join,
        });
        for terminal in find_terminals(graph) {
            augmented.add_edge(terminal, sink, EdgeKind::Fall);
        }

        let dominators = simple_fast(Reversed(&augmented), sink);

        let mut immediate_dominator = HashMap::new();
        let mut children: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for node in augmented.node_indices() {
            if node != sink && dominators.immediate_dominator(node).is_none() {
                continue;
            }
            let idom = dominators.immediate_dominator(node);
            immediate_dominator.insert(node, idom);
            if let Some(parent) = idom {
                children.entry(parent).or_default().push(node);
            }
        }

        let inner = DominatorTree::from_parts(sink, immediate_dominator, children);
        Self { inner, sink }
    }

    /// Immediate post-dominator of a node
    ///
    /// `None` when the node's arms never reconverge before a terminal (its
    /// only post-dominator is the virtual sink) or the node cannot reach an
    /// exit at all.
    pub fn immediate_post_dominator(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.inner
            .immediate_dominator(node)
            .filter(|&n| n != self.sink)
    }

    /// Check if `a` post-dominates `b`
    pub fn post_dominates(&self, a: NodeIndex, b: NodeIndex) -> bool {
        self.inner.dominates(a, b)
    }

    /// Check if `a` strictly post-dominates `b`
    pub fn strictly_post_dominates(&self, a: NodeIndex, b: NodeIndex) -> bool {
        self.inner.strictly_dominates(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::testutil::*;

    #[test]
    fn test_diamond_join_is_post_dominator() {
        let mut g = FlowGraph::new();
        let b0 = g.add_node(branch_node(0, "a = 1"));
        let b1 = g.add_node(stmt_node(1, "x"));
        let b2 = g.add_node(stmt_node(2, "y"));
        let b3 = g.add_node(exit_node(3));
        g.add_edge(b0, b1, EdgeKind::True);
        g.add_edge(b0, b2, EdgeKind::False);
        g.add_edge(b1, b3, EdgeKind::Fall);
        g.add_edge(b2, b3, EdgeKind::Fall);

        let tree = PostDominatorTree::new(&g);
        assert_eq!(tree.immediate_post_dominator(b0), Some(b3));
        assert_eq!(tree.immediate_post_dominator(b1), Some(b3));
        assert!(tree.post_dominates(b3, b0));
        assert!(!tree.post_dominates(b1, b0));
        // The exit's only post-dominator is the hidden sink
        assert_eq!(tree.immediate_post_dominator(b3), None);
    }

    #[test]
    fn test_branch_with_two_terminals_has_no_join() {
        // Both arms end in their own terminal; nothing reconverges
        let mut g = FlowGraph::new();
        let b0 = g.add_node(branch_node(0, "a = 1"));
        let b1 = g.add_node(stmt_node(1, "stop run"));
        let b2 = g.add_node(exit_node(2));
        g.add_edge(b0, b1, EdgeKind::True);
        g.add_edge(b0, b2, EdgeKind::False);

        let tree = PostDominatorTree::new(&g);
        assert_eq!(tree.immediate_post_dominator(b0), None);
    }

    #[test]
    fn test_one_arm_rejoins() {
        // 0 -T-> 1 -> 3, 0 -F-> 3; the fallthrough is the join
        let mut g = FlowGraph::new();
        let b0 = g.add_node(branch_node(0, "a = 1"));
        let b1 = g.add_node(stmt_node(1, "x"));
        let b3 = g.add_node(exit_node(3));
        g.add_edge(b0, b1, EdgeKind::True);
        g.add_edge(b0, b3, EdgeKind::False);
        g.add_edge(b1, b3, EdgeKind::Fall);

        let tree = PostDominatorTree::new(&g);
        assert_eq!(tree.immediate_post_dominator(b0), Some(b3));
    }
}
