//! Pipeline driver: parse tree in, structured IR out
//!
//! Runs the stages in order — statement graph, reachability pruning, block
//! collapse, then per section: loop recovery, scope delimitation,
//! flattening — and combines the per-section trees with the accumulated
//! diagnostics. Every stage boundary is also exposed on its own so the CLI
//! can serialize intermediate graphs.

use crate::cfg::loops::AcyclicSection;
use crate::cfg::scope::ScopedSection;
use crate::cfg::{
    build_acyclic, build_scopes, build_statement_graph, collapse_blocks, prune_unreachable,
    section_subgraph, ProgramGraph,
};
use crate::cobol::Program;
use crate::diagnostics::{Diagnostics, RestructureError};
use crate::structure::{flatten_section, render_program, SectionIr, StructureConfig};
use serde::Serialize;
use std::path::PathBuf;

/// The final program IR handed to renderers
#[derive(Debug, Clone, Serialize)]
pub struct ProgramIr {
    pub file: PathBuf,
    pub sections: Vec<SectionIr>,
    pub diagnostics: Diagnostics,
}

impl ProgramIr {
    /// Plain-text rendering of every section
    pub fn render_code(&self) -> String {
        render_program(&self.sections)
    }
}

/// Run the whole reconstruction pipeline
pub fn restructure(
    program: &Program,
    config: &StructureConfig,
) -> Result<ProgramIr, RestructureError> {
    let mut diags = Diagnostics::new();
    let statement_graph = build_statement_graph(program, &mut diags)?;
    let pruned = prune_unreachable(&statement_graph, &mut diags);
    let collapsed = collapse_blocks(&pruned.program);

    let mut sections = Vec::new();
    for section_ref in &collapsed.sections {
        let subgraph = section_subgraph(&collapsed, section_ref);
        let acyclic = build_acyclic(&subgraph, &mut diags);
        let scoped = build_scopes(&acyclic);
        sections.push(flatten_section(&scoped, config));
    }

    tracing::debug!(sections = sections.len(), diagnostics = diags.len(), "pipeline done");
    Ok(ProgramIr {
        file: program.file.clone(),
        sections,
        diagnostics: diags,
    })
}

// Stage taps for graph serialization; each returns the freshly built stage
// output plus the diagnostics accumulated so far.

/// Stage 1: the raw statement graph, nothing pruned
pub fn statement_graph(program: &Program) -> Result<(ProgramGraph, Diagnostics), RestructureError> {
    let mut diags = Diagnostics::new();
    let graph = build_statement_graph(program, &mut diags)?;
    Ok((graph, diags))
}

/// Stage 2: the reachable subgraph
pub fn pruned_graph(program: &Program) -> Result<(ProgramGraph, Diagnostics), RestructureError> {
    let mut diags = Diagnostics::new();
    let graph = build_statement_graph(program, &mut diags)?;
    let pruned = prune_unreachable(&graph, &mut diags);
    Ok((pruned.program, diags))
}

/// Stage 3: basic blocks collapsed
pub fn collapsed_graph(program: &Program) -> Result<(ProgramGraph, Diagnostics), RestructureError> {
    let (graph, diags) = pruned_graph(program)?;
    Ok((collapse_blocks(&graph), diags))
}

/// Stage 4: per-section acyclic graphs
pub fn acyclic_graphs(
    program: &Program,
) -> Result<(Vec<AcyclicSection>, Diagnostics), RestructureError> {
    let (collapsed, mut diags) = collapsed_graph(program)?;
    let sections = collapsed
        .sections
        .iter()
        .map(|s| build_acyclic(&section_subgraph(&collapsed, s), &mut diags))
        .collect();
    Ok((sections, diags))
}

/// Stage 5: per-section scope graphs
pub fn scoped_graphs(
    program: &Program,
) -> Result<(Vec<ScopedSection>, Diagnostics), RestructureError> {
    let (sections, diags) = acyclic_graphs(program)?;
    Ok((sections.iter().map(build_scopes).collect(), diags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cobol::parse_source;

    #[test]
    fn test_restructure_end_to_end() {
        let program = parse_source(
            "test.cbl",
            "main section.\n\
             \x20   move 'x' to a.\n\
             \x20   perform sub.\n\
             \x20   stop run.\n\
             sub section.\n\
             \x20   move 'y' to b.\n",
        );
        let ir = restructure(&program, &StructureConfig::default()).expect("pipeline failed");
        assert_eq!(ir.sections.len(), 2);
        assert_eq!(ir.sections[0].name, "main");
        assert_eq!(ir.sections[1].name, "sub");
        assert!(ir.diagnostics.is_empty());

        let code = ir.render_code();
        assert!(code.contains("section main:"));
        assert!(code.contains("perform sub"));
    }

    #[test]
    fn test_stage_taps_agree_on_node_counts() {
        let program = parse_source(
            "test.cbl",
            "main section.\n\
             \x20   move 1 to a.\n\
             \x20   move 2 to b.\n\
             \x20   stop run.\n",
        );
        let (full, _) = statement_graph(&program).unwrap();
        let (pruned, _) = pruned_graph(&program).unwrap();
        let (collapsed, _) = collapsed_graph(&program).unwrap();
        // Nothing unreachable here, so pruning keeps everything
        assert_eq!(full.graph.node_count(), pruned.graph.node_count());
        // Collapse merges the three statements into one block
        assert!(collapsed.graph.node_count() < pruned.graph.node_count());
    }

    #[test]
    fn test_fatal_error_propagates() {
        let program = parse_source("test.cbl", "main section.\n    go to nowhere.\n");
        let err = restructure(&program, &StructureConfig::default()).unwrap_err();
        assert!(matches!(err, RestructureError::UnresolvedLabel { .. }));
    }
}
