//! Flattener: walks one section's scoped DAG and emits the structured tree
//!
//! The walk follows flow edges from the section entry. A branch structures
//! its arms up to the branch's immediate post-dominator (the join) and
//! resumes there; arms that never reconverge run to their terminals and the
//! sequence ends with them. A loop header emits `while` or `forever` per the
//! scope stage's verdict and resumes at the loop's primary continuation.
//!
//! Joins with several live predecessors are where duplication happens: the
//! walk would structure the post-join subtree once per entry. A dry pass
//! first counts how often each node gets structured; nodes shared more than
//! once are then either duplicated or turned into a `Label`/`Goto` pair,
//! whichever the configured cost favors (ties prefer the goto). Degraded
//! irreducible regions and loop continuations that only breaks can reach are
//! appended after the main flow as labeled trailing blocks.

use crate::cfg::scope::ScopedSection;
use crate::cfg::{
    out_edges, successor, EdgeKind, FlowGraph, Loop, LoopKind, NodeId, NodeKind,
    PostDominatorTree,
};
use crate::cobol::StatementKind;
use crate::structure::{SectionIr, StructureConfig, StructuredTree};
use petgraph::graph::NodeIndex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Flatten one section's scoped DAG into a structured tree
pub fn flatten_section(scoped: &ScopedSection, config: &StructureConfig) -> SectionIr {
    let graph = &scoped.graph;
    let index = crate::cfg::index_by_id(graph);
    let ipdom = PostDominatorTree::new(graph);
    let entry = index.get(&scoped.entry).copied();

    // Labels that exist regardless of cost: targets the degraded regions
    // jump to, and loop continuations beyond the primary one
    let mut labels = scoped.label_targets.clone();
    for lp in &scoped.loops {
        for &target in lp.exits.iter().skip(1) {
            labels
                .entry(target)
                .or_insert_with(|| crate::cfg::label_for(&scoped.anchors, target));
        }
    }

    // Dry pass: count how often each node would be structured
    let mut dry = Flattener {
        graph,
        index: &index,
        ipdom: &ipdom,
        loops: &scoped.loops,
        labels: labels.clone(),
        rationale: BTreeMap::new(),
        annotate: false,
        mode: Mode::Dry,
        emitted: BTreeSet::new(),
        visits: BTreeMap::new(),
    };
    dry.walk(entry, None);

    // Local cost choice per shared node
    let mut rationale = BTreeMap::new();
    for (&id, &visits) in &dry.visits {
        if visits < 2 || labels.contains_key(&id) {
            continue;
        }
        let size = subtree_size(graph, &index, id);
        let cost_dup = config.dup_multiplier * (visits - 1) * size;
        let cost_goto = config.goto_overhead + (visits - 1);
        if cost_goto <= cost_dup {
            let name = crate::cfg::label_for(&scoped.anchors, id);
            rationale.insert(
                id,
                format!(
                    "join {}: goto cost {} beats duplication cost {}",
                    name, cost_goto, cost_dup
                ),
            );
            labels.insert(id, name);
        }
    }

    let mut emitter = Flattener {
        graph,
        index: &index,
        ipdom: &ipdom,
        loops: &scoped.loops,
        labels,
        rationale,
        annotate: config.annotate,
        mode: Mode::Emit,
        emitted: BTreeSet::new(),
        visits: BTreeMap::new(),
    };
    let mut body = emitter.walk(entry, None);

    // Trailing labeled blocks: degraded regions, then any label target the
    // main flow never reached (a continuation only breaks or gotos can hit)
    let mut trailing: Vec<(NodeId, String)> = scoped
        .unstructured
        .iter()
        .map(|(id, name)| (*id, name.clone()))
        .collect();
    for (id, name) in &emitter.labels.clone() {
        trailing.push((*id, name.clone()));
    }
    trailing.sort();
    trailing.dedup();
    for (id, name) in trailing {
        if !emitter.emitted.insert(id) {
            continue;
        }
        let block = emitter.walk_unlabeled(index[&id], None);
        body.push(StructuredTree::Label {
            name,
            body: Box::new(StructuredTree::Seq(block)),
        });
    }

    // Orphan paragraphs: code the section's own flow never reaches (entered
    // only by cross-section gotos); emitted last under the paragraph name so
    // the foreign goto has somewhere to land. Bypassed jump trampolines and
    // bare exit blocks emit nothing and are not worth a label.
    loop {
        let orphan = graph
            .node_indices()
            .find(|&ni| !emitter.emitted.contains(&graph[ni].id) && emits_code(graph, ni));
        let Some(ni) = orphan else { break };
        let id = graph[ni].id;
        emitter.emitted.insert(id);
        let block = emitter.walk_unlabeled(ni, None);
        body.push(StructuredTree::Label {
            name: crate::cfg::label_for(&scoped.anchors, id),
            body: Box::new(StructuredTree::Seq(block)),
        });
    }

    tracing::debug!(
        section = %scoped.section.name,
        labels = emitter.labels.len(),
        "section flattened"
    );

    SectionIr {
        id: scoped.section.id,
        name: scoped.section.name.clone(),
        tree: StructuredTree::Seq(body),
        location: scoped.section.location.clone(),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    /// Count visits without caring about output; shared nodes stop the walk
    /// so the pass stays linear
    Dry,
    /// Produce the tree; shared unlabeled nodes duplicate
    Emit,
}

struct Flattener<'a> {
    graph: &'a FlowGraph,
    index: &'a BTreeMap<NodeId, NodeIndex>,
    ipdom: &'a PostDominatorTree,
    loops: &'a [Loop],
    labels: BTreeMap<NodeId, String>,
    rationale: BTreeMap<NodeId, String>,
    annotate: bool,
    mode: Mode,
    emitted: BTreeSet<NodeId>,
    visits: BTreeMap<NodeId, u32>,
}

impl<'a> Flattener<'a> {
    fn walk(&mut self, start: Option<NodeIndex>, stop: Option<NodeIndex>) -> Vec<StructuredTree> {
        let mut out = Vec::new();
        let mut cur = start;
        while let Some(c) = cur {
            if Some(c) == stop {
                break;
            }
            let id = self.graph[c].id;
            let seen = self.emitted.contains(&id);
            *self.visits.entry(id).or_insert(0) += 1;

            if let Some(name) = self.labels.get(&id).cloned() {
                if seen {
                    out.push(StructuredTree::Goto { label: name });
                } else {
                    self.emitted.insert(id);
                    if self.annotate {
                        if let Some(why) = self.rationale.get(&id) {
                            out.push(StructuredTree::Comment { text: why.clone() });
                        }
                    }
                    let block = self.walk_unlabeled(c, stop);
                    out.push(StructuredTree::Label {
                        name,
                        body: Box::new(StructuredTree::Seq(block)),
                    });
                }
                break;
            }

            if self.mode == Mode::Dry && seen {
                // Already counted once; the shape past here is known
                break;
            }
            self.emitted.insert(id);
            cur = self.emit_node(c, stop, &mut out);
        }
        out
    }

    /// Emit a node and continue walking, ignoring the node's own label
    fn walk_unlabeled(
        &mut self,
        node: NodeIndex,
        stop: Option<NodeIndex>,
    ) -> Vec<StructuredTree> {
        let mut out = Vec::new();
        let next = self.emit_node(node, stop, &mut out);
        out.extend(self.walk(next, stop));
        out
    }

    /// Emit one node into `out`; returns where the walk resumes
    fn emit_node(
        &mut self,
        c: NodeIndex,
        stop: Option<NodeIndex>,
        out: &mut Vec<StructuredTree>,
    ) -> Option<NodeIndex> {
        match &self.graph[c].kind {
            NodeKind::Statements(stmts) => {
                for stmt in stmts {
                    match &stmt.kind {
                        StatementKind::Perform { target, .. } => {
                            out.push(StructuredTree::PerformCall {
                                target: target.clone(),
                                location: stmt.location.clone(),
                            });
                        }
                        StatementKind::ExitProgram => out.push(StructuredTree::Return),
                        // Transfers dissolve into the tree shape
                        StatementKind::GoTo { .. }
                        | StatementKind::NextSentence
                        | StatementKind::ExitSection
                        | StatementKind::Sentence => {}
                        _ => out.push(StructuredTree::Leaf {
                            text: stmt.text.clone(),
                            location: stmt.location.clone(),
                        }),
                    }
                }
                out_edges(self.graph, c).first().map(|&(_, target)| target)
            }
            NodeKind::Branch {
                condition,
                location,
            } => {
                let then_start = successor(self.graph, c, EdgeKind::True);
                let else_start = successor(self.graph, c, EdgeKind::False);
                let join = self.ipdom.immediate_post_dominator(c);
                let arm_stop = join.or(stop);

                let then_items = self.walk(then_start, arm_stop);
                let else_items = self.walk(else_start, arm_stop);
                let node = if then_items.is_empty() && !else_items.is_empty() {
                    StructuredTree::If {
                        condition: negate(condition),
                        location: Some(location.clone()),
                        then_branch: Box::new(StructuredTree::Seq(else_items)),
                        else_branch: None,
                    }
                } else {
                    StructuredTree::If {
                        condition: condition.clone(),
                        location: Some(location.clone()),
                        then_branch: Box::new(StructuredTree::Seq(then_items)),
                        else_branch: if else_items.is_empty() {
                            None
                        } else {
                            Some(Box::new(StructuredTree::Seq(else_items)))
                        },
                    }
                };
                out.push(node);
                join
            }
            NodeKind::LoopHeader { loop_id } => {
                let lp = &self.loops[*loop_id];
                if self.annotate {
                    out.push(StructuredTree::Comment {
                        text: match lp.kind {
                            LoopKind::While { .. } => {
                                format!("loop_{}: condition at head, single exit", lp.id)
                            }
                            LoopKind::Forever => {
                                format!("loop_{}: {} exit(s)", lp.id, lp.exits.len())
                            }
                        },
                    });
                }
                let tree = match lp.kind {
                    LoopKind::While {
                        branch,
                        exit_on_true,
                    } => {
                        let b = self.index[&branch];
                        let condition = match &self.graph[b].kind {
                            NodeKind::Branch { condition, .. } => condition.clone(),
                            _ => String::new(),
                        };
                        let condition = if exit_on_true {
                            negate(&condition)
                        } else {
                            condition
                        };
                        let stay = if exit_on_true {
                            EdgeKind::False
                        } else {
                            EdgeKind::True
                        };
                        *self.visits.entry(branch).or_insert(0) += 1;
                        self.emitted.insert(branch);
                        let body = self.walk(successor(self.graph, b, stay), None);
                        StructuredTree::While {
                            loop_id: lp.id,
                            condition,
                            body: Box::new(StructuredTree::Seq(body)),
                        }
                    }
                    LoopKind::Forever => {
                        let body = self.walk(successor(self.graph, c, EdgeKind::Fall), None);
                        StructuredTree::Forever {
                            loop_id: lp.id,
                            body: Box::new(StructuredTree::Seq(body)),
                        }
                    }
                };
                out.push(tree);
                lp.exits.first().map(|id| self.index[id])
            }
            NodeKind::Join | NodeKind::SectionEntry { .. } => {
                out_edges(self.graph, c).first().map(|&(_, target)| target)
            }
            NodeKind::SectionExit { .. } => {
                out.push(StructuredTree::Return);
                None
            }
            NodeKind::ContinueMarker { loop_id } => {
                out.push(StructuredTree::Continue { loop_id: *loop_id });
                None
            }
            NodeKind::BreakMarker { loop_id, exit_id } => {
                if *exit_id == 0 {
                    out.push(StructuredTree::Break { loop_id: *loop_id });
                } else {
                    // Secondary continuations are goto territory; the target
                    // carries a forced label
                    let target = self.loops[*loop_id].exits[*exit_id];
                    let label = self
                        .labels
                        .get(&target)
                        .cloned()
                        .unwrap_or_else(|| format!("b{}", target));
                    out.push(StructuredTree::Goto { label });
                }
                None
            }
            NodeKind::GotoMarker { label } => {
                out.push(StructuredTree::Goto {
                    label: label.clone(),
                });
                None
            }
        }
    }
}

/// True when structuring this node would produce visible output
fn emits_code(graph: &FlowGraph, node: NodeIndex) -> bool {
    match &graph[node].kind {
        NodeKind::Branch { .. } => true,
        NodeKind::Statements(stmts) => stmts.iter().any(|s| {
            matches!(
                s.kind,
                StatementKind::Move
                    | StatementKind::Other
                    | StatementKind::PerformInline
                    | StatementKind::Perform { .. }
                    | StatementKind::ExitProgram
            )
        }),
        _ => false,
    }
}

/// Toggle a condition's polarity at the source-text level
fn negate(condition: &str) -> String {
    if let Some(inner) = condition
        .strip_prefix("not (")
        .and_then(|s| s.strip_suffix(')'))
    {
        inner.to_string()
    } else {
        format!("not ({})", condition)
    }
}

/// Statement weight of everything reachable from a node; the duplication
/// cost of structuring it again
fn subtree_size(
    graph: &FlowGraph,
    index: &BTreeMap<NodeId, NodeIndex>,
    id: NodeId,
) -> u32 {
    let mut seen = BTreeSet::new();
    let mut total = 0u32;
    let mut worklist = VecDeque::new();
    worklist.push_back(index[&id]);
    while let Some(ni) = worklist.pop_front() {
        if !seen.insert(ni) {
            continue;
        }
        total += match &graph[ni].kind {
            NodeKind::Statements(stmts) => stmts.len() as u32,
            NodeKind::Branch { .. } => 1,
            _ => 0,
        };
        for (_, target) in out_edges(graph, ni) {
            worklist.push_back(target);
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{
        build_acyclic, build_scopes, build_statement_graph, collapse_blocks, prune_unreachable,
        section_subgraph,
    };
    use crate::cobol::parse_source;
    use crate::diagnostics::Diagnostics;

    fn flatten(text: &str) -> SectionIr {
        flatten_with(text, &StructureConfig::default())
    }

    fn flatten_with(text: &str, config: &StructureConfig) -> SectionIr {
        let program = parse_source("test.cbl", text);
        let mut diags = Diagnostics::new();
        let pg = build_statement_graph(&program, &mut diags).expect("build failed");
        let pruned = prune_unreachable(&pg, &mut diags);
        let collapsed = collapse_blocks(&pruned.program);
        let section = section_subgraph(&collapsed, &collapsed.sections[0]);
        let acyclic = build_acyclic(&section, &mut diags);
        let scoped = build_scopes(&acyclic);
        flatten_section(&scoped, config)
    }

    fn top_level(ir: &SectionIr) -> &[StructuredTree] {
        match &ir.tree {
            StructuredTree::Seq(items) => items,
            other => panic!("expected Seq at top level, got {:?}", other),
        }
    }

    #[test]
    fn test_straight_line() {
        let ir = flatten(
            "main section.\n\
             \x20   move 'x' to a.\n\
             \x20   perform sub.\n\
             \x20   exit program.\n\
             sub section.\n\
             \x20   move 'y' to b.\n",
        );
        let items = top_level(&ir);
        assert!(matches!(&items[0], StructuredTree::Leaf { text, .. } if text == "move 'x' to a"));
        assert!(
            matches!(&items[1], StructuredTree::PerformCall { target, .. } if target == "sub")
        );
        assert!(matches!(items[2], StructuredTree::Return));
        assert_eq!(ir.tree.goto_count(), 0);
    }

    #[test]
    fn test_goto_to_exit_absorbed_into_structure() {
        let ir = flatten(
            "sub section.\n\
             \x20   if a = 'x'\n\
             \x20       move 1 to b\n\
             \x20       go to sub-exit.\n\
             \x20   move 2 to b.\n\
             sub-exit.\n\
             \x20   exit.\n",
        );
        // No residual goto; both paths end in a return
        assert_eq!(ir.tree.goto_count(), 0);
        let texts = ir.tree.leaf_texts();
        assert!(texts.contains(&"move 1 to b".to_string()));
        assert!(texts.contains(&"move 2 to b".to_string()));
    }

    #[test]
    fn test_if_else_with_join() {
        let ir = flatten(
            "main section.\n\
             \x20   if a = 1 move 1 to b else move 2 to b.\n\
             \x20   move 3 to c.\n\
             \x20   stop run.\n",
        );
        let items = top_level(&ir);
        let StructuredTree::If {
            condition,
            then_branch,
            else_branch,
            ..
        } = &items[0]
        else {
            panic!("expected if, got {:?}", items[0]);
        };
        assert_eq!(condition, "a = 1");
        assert_eq!(then_branch.leaf_texts(), vec!["move 1 to b"]);
        assert_eq!(
            else_branch.as_ref().unwrap().leaf_texts(),
            vec!["move 2 to b"]
        );
        // The post-join code appears once, after the if
        assert!(matches!(&items[1], StructuredTree::Leaf { text, .. } if text == "move 3 to c"));
    }

    #[test]
    fn test_while_loop() {
        let ir = flatten(
            "main section.\n\
             top.\n\
             \x20   if a = 0 go to done.\n\
             \x20   move 1 to b.\n\
             \x20   go to top.\n\
             done.\n\
             \x20   exit.\n",
        );
        let items = top_level(&ir);
        let StructuredTree::While {
            loop_id,
            condition,
            body,
        } = &items[0]
        else {
            panic!("expected while, got {:?}", items[0]);
        };
        assert_eq!(*loop_id, 0);
        assert_eq!(condition, "not (a = 0)");
        assert_eq!(body.leaf_texts(), vec!["move 1 to b"]);
        assert_eq!(body.continue_count(0), 1);
        assert!(matches!(items[1], StructuredTree::Return));
        assert_eq!(ir.tree.goto_count(), 0);
    }

    #[test]
    fn test_forever_with_break() {
        let ir = flatten(
            "main section.\n\
             top.\n\
             \x20   move 1 to b.\n\
             \x20   if a = 0 go to done.\n\
             \x20   go to top.\n\
             done.\n\
             \x20   exit.\n",
        );
        let items = top_level(&ir);
        let StructuredTree::Forever { body, .. } = &items[0] else {
            panic!("expected forever, got {:?}", items[0]);
        };
        let mut breaks = 0;
        body.visit(&mut |n| {
            if matches!(n, StructuredTree::Break { loop_id: 0 }) {
                breaks += 1;
            }
        });
        assert_eq!(breaks, 1);
        assert_eq!(body.continue_count(0), 1);
        assert_eq!(ir.tree.goto_count(), 0);
    }

    #[test]
    fn test_irreducible_region_becomes_labeled_blocks() {
        let ir = flatten(
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
        assert!(ir.tree.goto_count() >= 2);
        let mut label_count = 0;
        ir.tree.visit(&mut |n| {
            if matches!(n, StructuredTree::Label { .. }) {
                label_count += 1;
            }
        });
        assert_eq!(label_count, 2);
        // Both region bodies survive as leaves
        let texts = ir.tree.leaf_texts();
        assert!(texts.contains(&"move 1 to b".to_string()));
        assert!(texts.contains(&"move 2 to b".to_string()));
    }

    #[test]
    fn test_shared_tail_duplicated_when_small() {
        // Two arms share a one-statement tail: duplication is cheaper than
        // a label at default costs
        let ir = flatten(
            "main section.\n\
             \x20   if a = 1\n\
             \x20       if b = 1 move 1 to x else go to shared\n\
             \x20   else\n\
             \x20       go to shared.\n\
             \x20   stop run.\n\
             shared.\n\
             \x20   move 9 to z.\n\
             \x20   stop run.\n",
        );
        assert_eq!(ir.tree.goto_count(), 0);
        let shared_copies = ir
            .tree
            .leaf_texts()
            .iter()
            .filter(|t| *t == "move 9 to z")
            .count();
        assert_eq!(shared_copies, 2);
    }

    #[test]
    fn test_shared_tail_labeled_when_duplication_costly() {
        let config = StructureConfig {
            goto_overhead: 0,
            dup_multiplier: 10,
            annotate: false,
        };
        let ir = flatten_with(
            "main section.\n\
             \x20   if a = 1\n\
             \x20       if b = 1 move 1 to x else go to shared\n\
             \x20   else\n\
             \x20       go to shared.\n\
             \x20   stop run.\n\
             shared.\n\
             \x20   move 9 to z.\n\
             \x20   stop run.\n",
            &config,
        );
        assert!(ir.tree.goto_count() >= 1);
        let shared_copies = ir
            .tree
            .leaf_texts()
            .iter()
            .filter(|t| *t == "move 9 to z")
            .count();
        assert_eq!(shared_copies, 1);
    }

    #[test]
    fn test_annotations_present_when_enabled() {
        let config = StructureConfig {
            annotate: true,
            ..StructureConfig::default()
        };
        let ir = flatten_with(
            "main section.\n\
             top.\n\
             \x20   move 1 to b.\n\
             \x20   go to top.\n",
            &config,
        );
        let mut comments = 0;
        ir.tree.visit(&mut |n| {
            if matches!(n, StructuredTree::Comment { .. }) {
                comments += 1;
            }
        });
        assert!(comments >= 1);
    }

    #[test]
    fn test_deterministic_output() {
        let text = "main section.\n\
                    top.\n\
                    \x20   if a = 0 go to done.\n\
                    \x20   perform sub.\n\
                    \x20   go to top.\n\
                    done.\n\
                    \x20   exit.\n\
                    sub section.\n\
                    \x20   move 1 to a.\n";
        let a = flatten(text);
        let b = flatten(text);
        assert_eq!(a.tree, b.tree);
    }
}
