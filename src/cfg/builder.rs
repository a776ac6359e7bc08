//! Statement graph builder
//!
//! Consumes the typed procedure-division tree and emits the whole-program
//! flow graph: one node per statement, edges for sequential fallthrough,
//! conditional branches, jumps, and perform call/return pairs, plus
//! synthetic entry/exit delimiters per section.
//!
//! Label resolution happens after all sections are laid out: a jump target
//! resolves to the first textual occurrence of the name in the enclosing
//! section, then to a section of that name, then to the first occurrence in
//! the whole program. Unresolved names are fatal; duplicate definitions and
//! cross-section jumps are warnings.

use crate::cfg::{EdgeKind, FlowGraph, Node, NodeId, NodeKind, ProgramGraph, SectionRef};
use crate::cobol::{
    ends_in_transfer, Program, SectionId, SourceLocation, Statement, StatementKind,
};
use crate::diagnostics::{DiagnosticKind, Diagnostics, RestructureError};
use petgraph::graph::NodeIndex;
use std::collections::BTreeMap;

/// Build the statement-level flow graph for a whole program
pub fn build_statement_graph(
    program: &Program,
    diags: &mut Diagnostics,
) -> Result<ProgramGraph, RestructureError> {
    let mut builder = Builder {
        graph: FlowGraph::new(),
        pending_jumps: Vec::new(),
        pending_performs: Vec::new(),
        section_anchors: Vec::new(),
        para_anchors: Vec::new(),
    };

    report_duplicate_names(program, diags);

    for (sid, section) in program.sections.iter().enumerate() {
        builder.wire_section(sid, section)?;
    }
    builder.resolve(diags)?;

    let sections = builder
        .section_anchors
        .iter()
        .map(|a| SectionRef {
            id: a.sid,
            name: a.name.clone(),
            entry: builder.graph[a.entry].id,
            exit: builder.graph[a.exit].id,
            location: a.location.clone(),
        })
        .collect::<Vec<_>>();

    let perform_returns = builder
        .pending_performs
        .iter()
        .map(|p| (builder.graph[p.from].id, builder.graph[p.return_site].id))
        .collect();

    let mut paragraph_anchors: BTreeMap<NodeId, String> = BTreeMap::new();
    let mut anchors: Vec<&ParaAnchor> = builder.para_anchors.iter().collect();
    anchors.sort_by_key(|a| (a.sid, a.index));
    for anchor in anchors {
        paragraph_anchors
            .entry(builder.graph[anchor.entry].id)
            .or_insert_with(|| anchor.name.clone());
    }

    let entry = sections.first().map(|s| s.entry).unwrap_or(0);
    tracing::debug!(
        nodes = builder.graph.node_count(),
        edges = builder.graph.edge_count(),
        sections = sections.len(),
        "statement graph built"
    );

    Ok(ProgramGraph {
        graph: builder.graph,
        entry,
        sections,
        perform_returns,
        paragraph_anchors,
    })
}

struct Builder {
    graph: FlowGraph,
    pending_jumps: Vec<PendingJump>,
    pending_performs: Vec<PendingPerform>,
    section_anchors: Vec<SectionAnchors>,
    para_anchors: Vec<ParaAnchor>,
}

struct PendingJump {
    from: NodeIndex,
    section: SectionId,
    target: String,
    location: SourceLocation,
}

struct PendingPerform {
    from: NodeIndex,
    section: SectionId,
    target: String,
    location: SourceLocation,
    return_site: NodeIndex,
}

struct SectionAnchors {
    sid: SectionId,
    name: String,
    entry: NodeIndex,
    exit: NodeIndex,
    first_stmt: NodeIndex,
    location: SourceLocation,
}

struct ParaAnchor {
    sid: SectionId,
    index: usize,
    name: String,
    entry: NodeIndex,
    tail: Option<NodeIndex>,
}

/// Per-statement wiring context
#[derive(Clone, Copy)]
struct WireCtx {
    section: SectionId,
    /// Target of `next sentence`: the following sentence in the paragraph,
    /// or the section exit when there is none
    next_sentence: NodeIndex,
    exit: NodeIndex,
}

impl Builder {
    fn add(&mut self, section: SectionId, kind: NodeKind) -> NodeIndex {
        let id = self.graph.node_count() as NodeId;
        self.graph.add_node(Node { id, section, kind })
    }

    fn wire_section(
        &mut self,
        sid: SectionId,
        section: &crate::cobol::Section,
    ) -> Result<(), RestructureError> {
        let entry = self.add(
            sid,
            NodeKind::SectionEntry {
                name: section.name.clone(),
            },
        );
        let exit = self.add(
            sid,
            NodeKind::SectionExit {
                name: section.name.clone(),
            },
        );

        // Paragraphs wire back-to-front so every statement already knows its
        // continuation when it is created
        let mut next = exit;
        for (pidx, para) in section.paragraphs.iter().enumerate().rev() {
            let mut tail = None;
            let mut sentence_entries: Vec<NodeIndex> = vec![next; para.sentences.len() + 1];
            for (i, sentence) in para.sentences.iter().enumerate().rev() {
                let ctx = WireCtx {
                    section: sid,
                    next_sentence: if i + 1 < para.sentences.len() {
                        sentence_entries[i + 1]
                    } else {
                        exit
                    },
                    exit,
                };
                let fall = sentence_entries[i + 1];
                let (sentence_entry, sentence_tail) =
                    self.wire_statements(&sentence.statements, fall, ctx)?;
                sentence_entries[i] = sentence_entry;
                if tail.is_none() {
                    tail = sentence_tail;
                }
            }
            let para_entry = sentence_entries[0];
            if let Some(name) = &para.name {
                self.para_anchors.push(ParaAnchor {
                    sid,
                    index: pidx,
                    name: name.clone(),
                    entry: para_entry,
                    tail,
                });
            }
            next = para_entry;
        }

        self.graph.add_edge(entry, next, EdgeKind::Fall);
        self.section_anchors.push(SectionAnchors {
            sid,
            name: section.name.clone(),
            entry,
            exit,
            first_stmt: next,
            location: section.location.clone(),
        });
        Ok(())
    }

    /// Wire a statement list; returns (entry, last top-level node)
    fn wire_statements(
        &mut self,
        stmts: &[Statement],
        cont: NodeIndex,
        ctx: WireCtx,
    ) -> Result<(NodeIndex, Option<NodeIndex>), RestructureError> {
        let mut next = cont;
        let mut tail = None;
        for stmt in stmts.iter().rev() {
            next = self.wire_statement(stmt, next, ctx)?;
            if tail.is_none() {
                tail = Some(next);
            }
        }
        Ok((next, tail))
    }

    fn wire_statement(
        &mut self,
        stmt: &Statement,
        next: NodeIndex,
        ctx: WireCtx,
    ) -> Result<NodeIndex, RestructureError> {
        let node = match &stmt.kind {
            StatementKind::If {
                condition,
                then_body,
                else_body,
            } => {
                let then_flows = !ends_in_transfer(then_body);
                let else_flows = !else_body.as_deref().is_some_and(ends_in_transfer);

                // Both arms reunite at an explicit join unless either arm
                // transfers away
                let arm_cont = if then_flows && else_flows && !then_body.is_empty() {
                    let join = self.add(ctx.section, NodeKind::Join);
                    self.graph.add_edge(join, next, EdgeKind::Fall);
                    join
                } else {
                    next
                };

                let (then_entry, _) = self.wire_statements(then_body, arm_cont, ctx)?;
                let else_entry = match else_body {
                    Some(body) => self.wire_statements(body, arm_cont, ctx)?.0,
                    None => arm_cont,
                };

                let branch = self.add(
                    ctx.section,
                    NodeKind::Branch {
                        condition: condition.clone(),
                        location: stmt.location.clone(),
                    },
                );
                self.graph.add_edge(branch, then_entry, EdgeKind::True);
                self.graph.add_edge(branch, else_entry, EdgeKind::False);
                branch
            }
            StatementKind::GoTo { target } => {
                let node = self.add(ctx.section, NodeKind::Statements(vec![stmt.clone()]));
                self.pending_jumps.push(PendingJump {
                    from: node,
                    section: ctx.section,
                    target: target.clone(),
                    location: stmt.location.clone(),
                });
                node
            }
            StatementKind::NextSentence => {
                let node = self.add(ctx.section, NodeKind::Statements(vec![stmt.clone()]));
                self.graph.add_edge(node, ctx.next_sentence, EdgeKind::Jump);
                node
            }
            StatementKind::ExitSection => {
                let node = self.add(ctx.section, NodeKind::Statements(vec![stmt.clone()]));
                self.graph.add_edge(node, ctx.exit, EdgeKind::Fall);
                node
            }
            StatementKind::ExitProgram => {
                // Terminal: no outgoing edge
                self.add(ctx.section, NodeKind::Statements(vec![stmt.clone()]))
            }
            StatementKind::Perform { target, thru } => {
                if let Some(thru) = thru {
                    return Err(RestructureError::UnsupportedPerformRange {
                        target: target.clone(),
                        thru: thru.clone(),
                        location: stmt.location.clone(),
                    });
                }
                let node = self.add(ctx.section, NodeKind::Statements(vec![stmt.clone()]));
                self.graph.add_edge(node, next, EdgeKind::Fall);
                self.pending_performs.push(PendingPerform {
                    from: node,
                    section: ctx.section,
                    target: target.clone(),
                    location: stmt.location.clone(),
                    return_site: next,
                });
                node
            }
            StatementKind::Move
            | StatementKind::PerformInline
            | StatementKind::Sentence
            | StatementKind::Other => {
                let node = self.add(ctx.section, NodeKind::Statements(vec![stmt.clone()]));
                self.graph.add_edge(node, next, EdgeKind::Fall);
                node
            }
        };
        Ok(node)
    }

    /// Resolve pending jump and perform targets against the anchor tables
    fn resolve(&mut self, diags: &mut Diagnostics) -> Result<(), RestructureError> {
        // First textual occurrence wins for duplicates
        let mut para_local: BTreeMap<(SectionId, &str), &ParaAnchor> = BTreeMap::new();
        let mut para_global: BTreeMap<&str, &ParaAnchor> = BTreeMap::new();
        let mut anchors: Vec<&ParaAnchor> = self.para_anchors.iter().collect();
        anchors.sort_by_key(|a| (a.sid, a.index));
        for anchor in anchors {
            para_local
                .entry((anchor.sid, anchor.name.as_str()))
                .or_insert(anchor);
            para_global.entry(anchor.name.as_str()).or_insert(anchor);
        }
        let mut sections: BTreeMap<&str, &SectionAnchors> = BTreeMap::new();
        for anchor in &self.section_anchors {
            sections.entry(anchor.name.as_str()).or_insert(anchor);
        }

        let mut jump_edges: Vec<(NodeIndex, NodeIndex)> = Vec::new();
        for jump in &self.pending_jumps {
            let target = para_local
                .get(&(jump.section, jump.target.as_str()))
                .map(|a| a.entry)
                .or_else(|| sections.get(jump.target.as_str()).map(|s| s.first_stmt))
                .or_else(|| para_global.get(jump.target.as_str()).map(|a| a.entry));
            let Some(target) = target else {
                return Err(RestructureError::UnresolvedLabel {
                    label: jump.target.clone(),
                    location: jump.location.clone(),
                });
            };
            if self.graph[target].section != jump.section {
                diags.push(
                    DiagnosticKind::CrossSectionGoto,
                    format!(
                        "go to '{}' crosses into section '{}'",
                        jump.target,
                        self.section_anchors[self.graph[target].section].name
                    ),
                    Some(jump.location.clone()),
                );
            }
            jump_edges.push((jump.from, target));
        }

        let mut perform_edges: Vec<(NodeIndex, NodeIndex, NodeIndex)> = Vec::new();
        for perform in &self.pending_performs {
            // Performs prefer the section of that name; a performed paragraph
            // returns from its last statement
            let resolved = sections
                .get(perform.target.as_str())
                .map(|s| (s.entry, s.exit))
                .or_else(|| {
                    para_local
                        .get(&(perform.section, perform.target.as_str()))
                        .or_else(|| para_global.get(perform.target.as_str()))
                        .map(|a| {
                            let terminator = a
                                .tail
                                .unwrap_or(self.section_anchors[a.sid].exit);
                            (a.entry, terminator)
                        })
                });
            let Some((callee_entry, callee_exit)) = resolved else {
                return Err(RestructureError::UnresolvedLabel {
                    label: perform.target.clone(),
                    location: perform.location.clone(),
                });
            };
            perform_edges.push((perform.from, callee_entry, callee_exit));
        }

        for (from, target) in jump_edges {
            self.graph.add_edge(from, target, EdgeKind::Jump);
        }
        for (from, callee_entry, callee_exit) in perform_edges {
            self.graph.add_edge(from, callee_entry, EdgeKind::PerformCall);
            let return_site = self
                .pending_performs
                .iter()
                .find(|p| p.from == from)
                .map(|p| p.return_site)
                .expect("perform edge without pending record");
            self.graph
                .add_edge(callee_exit, return_site, EdgeKind::PerformReturn);
        }
        Ok(())
    }
}

/// Warn once per repeated paragraph name (within a section) and repeated
/// section name; the first definition stays the jump target
fn report_duplicate_names(program: &Program, diags: &mut Diagnostics) {
    let mut seen_sections: BTreeMap<&str, ()> = BTreeMap::new();
    for section in &program.sections {
        if seen_sections.insert(&section.name, ()).is_some() {
            diags.push(
                DiagnosticKind::DuplicateName,
                format!("section '{}' is defined more than once", section.name),
                Some(section.location.clone()),
            );
        }
        let mut seen_paras: BTreeMap<&str, ()> = BTreeMap::new();
        for para in &section.paragraphs {
            if let Some(name) = &para.name {
                if seen_paras.insert(name, ()).is_some() {
                    diags.push(
                        DiagnosticKind::DuplicateName,
                        format!(
                            "paragraph '{}' is defined more than once in section '{}'",
                            name, section.name
                        ),
                        Some(para.location.clone()),
                    );
                }
            }
        }
    }
}
