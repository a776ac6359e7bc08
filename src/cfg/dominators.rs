//! Dominator tree construction and queries
//!
//! A node d dominates node n if every path from the entry node to n must go
//! through d. The immediate dominator of a node is its unique closest strict
//! dominator. Back-edge detection and loop recovery are built on these
//! queries; petgraph's dominance algorithm does the heavy lifting.

use crate::cfg::FlowGraph;
use petgraph::algo::dominators::simple_fast;
use petgraph::graph::NodeIndex;
use std::collections::HashMap;

/// Dominator tree for one section's flow graph
///
/// Provides cached dominance queries including immediate dominators,
/// dominance checks, and dominator tree traversal.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Root node (the entry)
    root: NodeIndex,
    /// Immediate dominator for each node; `None` marks the root
    /// (unreachable nodes are not in the map at all)
    immediate_dominator: HashMap<NodeIndex, Option<NodeIndex>>,
    /// Children in the dominator tree
    children: HashMap<NodeIndex, Vec<NodeIndex>>,
}

impl DominatorTree {
    /// Compute the dominator tree rooted at `entry` using the Cooper et al.
    /// algorithm
    ///
    /// Time: O(|V|²) worst case, faster in practice for typical flow graphs.
    pub fn new(graph: &FlowGraph, entry: NodeIndex) -> Self {
        let dominators = simple_fast(graph, entry);

        let mut immediate_dominator = HashMap::new();
        let mut children: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();

        for node in graph.node_indices() {
            if node != entry && dominators.immediate_dominator(node).is_none() {
                // Not reachable from the entry
                continue;
            }
            let idom = dominators.immediate_dominator(node);
            immediate_dominator.insert(node, idom);
            if let Some(parent) = idom {
                children.entry(parent).or_default().push(node);
            }
        }

        Self {
            root: entry,
            immediate_dominator,
            children,
        }
    }

    /// Root of the dominator tree (the entry node)
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Immediate dominator of a node; `None` for the root and for nodes not
    /// reachable from it
    pub fn immediate_dominator(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.immediate_dominator.get(&node).copied().flatten()
    }

    /// True when the node was reachable when the tree was built
    pub fn is_reachable(&self, node: NodeIndex) -> bool {
        self.immediate_dominator.contains_key(&node)
    }

    /// Check if `a` dominates `b`
    ///
    /// Every node dominates itself.
    pub fn dominates(&self, a: NodeIndex, b: NodeIndex) -> bool {
        if a == b {
            return true;
        }
        // Walk up b's dominator chain looking for a
        let mut current = b;
        while let Some(idom) = self.immediate_dominator(current) {
            if idom == a {
                return true;
            }
            current = idom;
        }
        false
    }

    /// Check if `a` strictly dominates `b`
    pub fn strictly_dominates(&self, a: NodeIndex, b: NodeIndex) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Nodes immediately dominated by `node`
    pub fn children(&self, node: NodeIndex) -> &[NodeIndex] {
        self.children.get(&node).map_or(&[], |v| v.as_slice())
    }

    /// Iterator over a node's dominators, from the node up to the root
    pub fn dominators(&self, node: NodeIndex) -> Dominators<'_> {
        Dominators {
            tree: self,
            current: Some(node),
        }
    }

    /// Depth in the dominator tree; the root has depth 0
    pub fn depth(&self, node: NodeIndex) -> usize {
        let mut depth = 0;
        let mut current = node;
        while let Some(idom) = self.immediate_dominator(current) {
            depth += 1;
            current = idom;
        }
        depth
    }

    /// Build a tree from pre-computed parts; used by the post-dominator
    /// construction on a reversed graph
    pub(crate) fn from_parts(
        root: NodeIndex,
        immediate_dominator: HashMap<NodeIndex, Option<NodeIndex>>,
        children: HashMap<NodeIndex, Vec<NodeIndex>>,
    ) -> Self {
        Self {
            root,
            immediate_dominator,
            children,
        }
    }
}

/// Iterator over a node's dominators (from the node up to the root)
pub struct Dominators<'a> {
    tree: &'a DominatorTree,
    current: Option<NodeIndex>,
}

impl<'a> Iterator for Dominators<'a> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;
        self.current = self.tree.immediate_dominator(node);
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::testutil::*;
    use crate::cfg::EdgeKind;

    /// Diamond:
    ///     0 (entry)
    ///    / \
    ///   1   2
    ///    \ /
    ///     3 (exit)
    fn diamond() -> (FlowGraph, Vec<NodeIndex>) {
        let mut g = FlowGraph::new();
        let b0 = g.add_node(branch_node(0, "a = 1"));
        let b1 = g.add_node(stmt_node(1, "move 1 to b"));
        let b2 = g.add_node(stmt_node(2, "move 2 to b"));
        let b3 = g.add_node(exit_node(3));
        g.add_edge(b0, b1, EdgeKind::True);
        g.add_edge(b0, b2, EdgeKind::False);
        g.add_edge(b1, b3, EdgeKind::Fall);
        g.add_edge(b2, b3, EdgeKind::Fall);
        (g, vec![b0, b1, b2, b3])
    }

    #[test]
    fn test_diamond_immediate_dominators() {
        let (g, n) = diamond();
        let tree = DominatorTree::new(&g, n[0]);

        assert_eq!(tree.root(), n[0]);
        assert_eq!(tree.immediate_dominator(n[0]), None);
        assert_eq!(tree.immediate_dominator(n[1]), Some(n[0]));
        assert_eq!(tree.immediate_dominator(n[2]), Some(n[0]));
        // The join is dominated by the branch, not by either arm
        assert_eq!(tree.immediate_dominator(n[3]), Some(n[0]));
    }

    #[test]
    fn test_dominates() {
        let (g, n) = diamond();
        let tree = DominatorTree::new(&g, n[0]);

        assert!(tree.dominates(n[0], n[3]));
        assert!(tree.dominates(n[1], n[1]));
        assert!(!tree.dominates(n[1], n[3]));
        assert!(!tree.dominates(n[1], n[0]));
        assert!(tree.strictly_dominates(n[0], n[1]));
        assert!(!tree.strictly_dominates(n[0], n[0]));
    }

    #[test]
    fn test_linear_chain() {
        let mut g = FlowGraph::new();
        let a = g.add_node(stmt_node(0, "one"));
        let b = g.add_node(stmt_node(1, "two"));
        let c = g.add_node(stmt_node(2, "three"));
        g.add_edge(a, b, EdgeKind::Fall);
        g.add_edge(b, c, EdgeKind::Fall);

        let tree = DominatorTree::new(&g, a);
        assert_eq!(tree.immediate_dominator(b), Some(a));
        assert_eq!(tree.immediate_dominator(c), Some(b));
        assert_eq!(tree.depth(c), 2);
        let doms: Vec<_> = tree.dominators(c).collect();
        assert_eq!(doms, vec![c, b, a]);
    }

    #[test]
    fn test_unreachable_node_not_in_tree() {
        let mut g = FlowGraph::new();
        let a = g.add_node(stmt_node(0, "one"));
        let b = g.add_node(stmt_node(1, "two"));
        let stray = g.add_node(stmt_node(2, "stray"));
        g.add_edge(a, b, EdgeKind::Fall);

        let tree = DominatorTree::new(&g, a);
        assert!(tree.is_reachable(b));
        assert!(!tree.is_reachable(stray));
        assert_eq!(tree.immediate_dominator(stray), None);
    }
}
