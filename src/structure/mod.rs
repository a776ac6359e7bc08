// Structured tree IR: the flattener's output, consumed by renderers

pub mod flatten;
pub mod render;

pub use flatten::flatten_section;
pub use render::{render_program, render_section};

use crate::cobol::{SectionId, SourceLocation};
use crate::cfg::LoopId;
use serde::{Deserialize, Serialize};

/// Tunable knobs for the flattener's join heuristic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureConfig {
    /// Fixed cost charged for introducing a label
    pub goto_overhead: u32,
    /// Weight applied to duplicated subtree size
    pub dup_multiplier: u32,
    /// Emit decision-rationale comments into the tree
    pub annotate: bool,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            goto_overhead: 3,
            dup_multiplier: 1,
            annotate: false,
        }
    }
}

/// The final nested-block IR
///
/// Leaves back-reference the original COBOL source; structural nodes derive
/// their range from their children via [`StructuredTree::source_range`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructuredTree {
    Seq(Vec<StructuredTree>),
    If {
        condition: String,
        location: Option<SourceLocation>,
        then_branch: Box<StructuredTree>,
        else_branch: Option<Box<StructuredTree>>,
    },
    Forever {
        loop_id: LoopId,
        body: Box<StructuredTree>,
    },
    While {
        loop_id: LoopId,
        condition: String,
        body: Box<StructuredTree>,
    },
    Break {
        loop_id: LoopId,
    },
    Continue {
        loop_id: LoopId,
    },
    Label {
        name: String,
        body: Box<StructuredTree>,
    },
    Goto {
        label: String,
    },
    Leaf {
        text: String,
        location: SourceLocation,
    },
    PerformCall {
        target: String,
        location: SourceLocation,
    },
    Return,
    Comment {
        text: String,
    },
}

impl StructuredTree {
    pub fn seq(items: Vec<StructuredTree>) -> StructuredTree {
        StructuredTree::Seq(items)
    }

    /// Direct children, in source order
    pub fn children(&self) -> Vec<&StructuredTree> {
        match self {
            StructuredTree::Seq(items) => items.iter().collect(),
            StructuredTree::If {
                then_branch,
                else_branch,
                ..
            } => {
                let mut out = vec![then_branch.as_ref()];
                if let Some(e) = else_branch {
                    out.push(e.as_ref());
                }
                out
            }
            StructuredTree::Forever { body, .. }
            | StructuredTree::While { body, .. }
            | StructuredTree::Label { body, .. } => vec![body.as_ref()],
            _ => vec![],
        }
    }

    /// Depth-first visit of the whole tree, this node included
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a StructuredTree)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Smallest source span covering every leaf under this node
    pub fn source_range(&self) -> Option<SourceLocation> {
        let mut range: Option<SourceLocation> = None;
        self.visit(&mut |node| {
            let loc = match node {
                StructuredTree::Leaf { location, .. }
                | StructuredTree::PerformCall { location, .. } => Some(location),
                StructuredTree::If { location, .. } => location.as_ref(),
                _ => None,
            };
            if let Some(loc) = loc {
                range = Some(match &range {
                    Some(r) => r.merge(loc),
                    None => loc.clone(),
                });
            }
        });
        range
    }

    /// Texts of every statement leaf, in emission order
    pub fn leaf_texts(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            if let StructuredTree::Leaf { text, .. } = node {
                out.push(text.clone());
            }
        });
        out
    }

    /// Count of residual `Goto` nodes under this tree
    pub fn goto_count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |node| {
            if matches!(node, StructuredTree::Goto { .. }) {
                count += 1;
            }
        });
        count
    }

    /// Count of `Continue` nodes referring to the given loop
    pub fn continue_count(&self, loop_id: LoopId) -> usize {
        let mut count = 0;
        self.visit(&mut |node| {
            if matches!(node, StructuredTree::Continue { loop_id: l } if *l == loop_id) {
                count += 1;
            }
        });
        count
    }
}

/// One structured section, function-shaped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionIr {
    pub id: SectionId,
    pub name: String,
    pub tree: StructuredTree,
    pub location: SourceLocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(text: &str, line: usize) -> StructuredTree {
        StructuredTree::Leaf {
            text: text.to_string(),
            location: SourceLocation::point("t.cbl", line, 1),
        }
    }

    #[test]
    fn test_source_range_spans_leaves() {
        let tree = StructuredTree::Seq(vec![
            leaf("move 1 to a", 3),
            StructuredTree::If {
                condition: "a = 1".into(),
                location: None,
                then_branch: Box::new(leaf("move 2 to b", 7)),
                else_branch: None,
            },
            StructuredTree::Return,
        ]);
        let range = tree.source_range().unwrap();
        assert_eq!(range.start_line, 3);
        assert_eq!(range.end_line, 7);
    }

    #[test]
    fn test_counters() {
        let tree = StructuredTree::Seq(vec![
            StructuredTree::Forever {
                loop_id: 0,
                body: Box::new(StructuredTree::Seq(vec![
                    leaf("move 1 to a", 1),
                    StructuredTree::Continue { loop_id: 0 },
                ])),
            },
            StructuredTree::Goto {
                label: "b9".into(),
            },
        ]);
        assert_eq!(tree.goto_count(), 1);
        assert_eq!(tree.continue_count(0), 1);
        assert_eq!(tree.leaf_texts(), vec!["move 1 to a"]);
    }
}
