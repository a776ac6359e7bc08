//! Plain-text rendering of structured trees
//!
//! Indentation-based pseudo-code, one section per function-shaped block.
//! This is the `code` output format; richer renderers (HTML) consume the
//! tree through the JSON export instead.

use crate::structure::{SectionIr, StructuredTree};
use std::fmt::Write;

/// Render all sections in order
pub fn render_program(sections: &[SectionIr]) -> String {
    let mut out = String::new();
    for (i, section) in sections.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&render_section(section));
    }
    out
}

/// Render one section
pub fn render_section(section: &SectionIr) -> String {
    let mut out = String::new();
    writeln!(out, "section {}:", section.name).ok();
    render_tree(&section.tree, 1, &mut out);
    out
}

fn render_tree(tree: &StructuredTree, depth: usize, out: &mut String) {
    let pad = "    ".repeat(depth);
    match tree {
        StructuredTree::Seq(items) => {
            for item in items {
                render_tree(item, depth, out);
            }
        }
        StructuredTree::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            writeln!(out, "{}if {}:", pad, condition).ok();
            render_body(then_branch, depth + 1, out);
            if let Some(els) = else_branch {
                writeln!(out, "{}else:", pad).ok();
                render_body(els, depth + 1, out);
            }
        }
        StructuredTree::While {
            loop_id,
            condition,
            body,
        } => {
            writeln!(out, "{}while {} [loop_{}]:", pad, condition, loop_id).ok();
            render_body(body, depth + 1, out);
        }
        StructuredTree::Forever { loop_id, body } => {
            writeln!(out, "{}forever [loop_{}]:", pad, loop_id).ok();
            render_body(body, depth + 1, out);
        }
        StructuredTree::Break { loop_id } => {
            writeln!(out, "{}break loop_{}", pad, loop_id).ok();
        }
        StructuredTree::Continue { loop_id } => {
            writeln!(out, "{}continue loop_{}", pad, loop_id).ok();
        }
        StructuredTree::Label { name, body } => {
            writeln!(out, "{}{}:", pad, name).ok();
            render_body(body, depth + 1, out);
        }
        StructuredTree::Goto { label } => {
            writeln!(out, "{}go to {}", pad, label).ok();
        }
        StructuredTree::Leaf { text, .. } => {
            writeln!(out, "{}{}", pad, text).ok();
        }
        StructuredTree::PerformCall { target, .. } => {
            writeln!(out, "{}perform {}", pad, target).ok();
        }
        StructuredTree::Return => {
            writeln!(out, "{}return", pad).ok();
        }
        StructuredTree::Comment { text } => {
            writeln!(out, "{}* {}", pad, text).ok();
        }
    }
}

/// A body renders at least a placeholder line so empty arms stay visible
fn render_body(body: &StructuredTree, depth: usize, out: &mut String) {
    if matches!(body, StructuredTree::Seq(items) if items.is_empty()) {
        let pad = "    ".repeat(depth);
        writeln!(out, "{}continue", pad).ok();
        return;
    }
    render_tree(body, depth, out);
}
