// CLI definition and command dispatch

use crate::cfg::{export_dot, export_section_dot};
use crate::diagnostics::Severity;
use crate::output::JsonResponse;
use crate::pipeline;
use crate::structure::StructureConfig;
use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// recobol - structured control flow for legacy COBOL
///
/// Reads a goto-heavy COBOL procedure division and re-presents it as nested
/// block structure (if/else, loops, early exits), minimizing residual gotos.
/// Intermediate pipeline graphs can be dumped as Graphviz DOT.
#[derive(Parser, Debug, Clone)]
#[command(name = "recobol")]
#[command(author, version, about)]
pub struct Cli {
    /// COBOL source file
    pub source: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Code, env = "RECOBOL_FORMAT")]
    pub format: Format,

    /// Fixed cost charged for a label/goto pair at a shared join
    #[arg(long, default_value_t = 3)]
    pub goto_overhead: u32,

    /// Weight applied to duplicated statements at a shared join
    #[arg(long, default_value_t = 1)]
    pub dup_multiplier: u32,

    /// Emit decision-rationale comments into the output
    #[arg(long)]
    pub annotate: bool,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Structured pseudo-code (default)
    Code,
    /// DOT of the statement graph before pruning
    FullStmtGraph,
    /// DOT of the statement graph after reachability pruning
    StmtGraph,
    /// DOT of the collapsed basic-block graph
    CobolGraph,
    /// DOT of the per-section acyclic graphs
    AcyclicGraph,
    /// DOT of the per-section scope graphs
    ScopeGraph,
    /// Structured IR plus diagnostics as JSON
    Json,
}

impl Cli {
    pub fn structure_config(&self) -> StructureConfig {
        StructureConfig {
            goto_overhead: self.goto_overhead,
            dup_multiplier: self.dup_multiplier,
            annotate: self.annotate,
        }
    }
}

/// Run the selected command; prints to stdout, diagnostics to stderr
pub fn run(cli: &Cli) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&cli.source)
        .with_context(|| format!("cannot read {}", cli.source.display()))?;
    let program = crate::cobol::parse_source(&cli.source, &text);
    let config = cli.structure_config();

    match cli.format {
        Format::Code => {
            let ir = pipeline::restructure(&program, &config)?;
            report_diagnostics(&ir.diagnostics);
            print!("{}", ir.render_code());
        }
        Format::Json => {
            let ir = pipeline::restructure(&program, &config)?;
            println!("{}", JsonResponse::new(&ir).to_pretty_json());
        }
        Format::FullStmtGraph => {
            let (graph, _) = pipeline::statement_graph(&program)?;
            print!("{}", export_dot(&graph.graph, "statement graph"));
        }
        Format::StmtGraph => {
            let (graph, _) = pipeline::pruned_graph(&program)?;
            print!("{}", export_dot(&graph.graph, "pruned statement graph"));
        }
        Format::CobolGraph => {
            let (graph, _) = pipeline::collapsed_graph(&program)?;
            print!("{}", export_dot(&graph.graph, "cobol structure graph"));
        }
        Format::AcyclicGraph => {
            let (sections, _) = pipeline::acyclic_graphs(&program)?;
            let named: Vec<(String, &crate::cfg::FlowGraph)> = sections
                .iter()
                .map(|s| (s.section.name.clone(), &s.graph))
                .collect();
            print!("{}", export_section_dot(&named));
        }
        Format::ScopeGraph => {
            let (sections, _) = pipeline::scoped_graphs(&program)?;
            let named: Vec<(String, &crate::cfg::FlowGraph)> = sections
                .iter()
                .map(|s| (s.section.name.clone(), &s.graph))
                .collect();
            print!("{}", export_section_dot(&named));
        }
    }
    Ok(())
}

fn report_diagnostics(diags: &crate::diagnostics::Diagnostics) {
    for diag in diags.iter() {
        let place = diag
            .location
            .as_ref()
            .map(|l| format!(" at {}", l))
            .unwrap_or_default();
        match diag.severity {
            Severity::Warning => crate::output::warn(&format!("{}{}", diag.message, place)),
            Severity::Info => crate::output::info(&format!("{}{}", diag.message, place)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["recobol", "prog.cbl"]);
        assert_eq!(cli.format, Format::Code);
        assert_eq!(cli.goto_overhead, 3);
        assert_eq!(cli.dup_multiplier, 1);
        assert!(!cli.annotate);
    }

    #[test]
    fn test_cli_format_flag() {
        let cli = Cli::parse_from(["recobol", "prog.cbl", "--format", "scope-graph"]);
        assert_eq!(cli.format, Format::ScopeGraph);
    }

    #[test]
    fn test_structure_config_mapping() {
        let cli = Cli::parse_from([
            "recobol",
            "prog.cbl",
            "--goto-overhead",
            "7",
            "--dup-multiplier",
            "2",
            "--annotate",
        ]);
        let config = cli.structure_config();
        assert_eq!(config.goto_overhead, 7);
        assert_eq!(config.dup_multiplier, 2);
        assert!(config.annotate);
    }
}
