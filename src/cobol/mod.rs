//! Typed COBOL procedure-division tree
//!
//! The in-memory tree the pipeline consumes: a program owns sections, a
//! section owns paragraphs, a paragraph owns sentences (split at `.`), and a
//! sentence owns statements. Expressions are opaque source text; the pipeline
//! never interprets them.

pub mod reader;
pub mod source;

pub use reader::parse_source;
pub use source::SourceLocation;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Index of a section within [`Program::sections`]
pub type SectionId = usize;

/// A parsed COBOL program (procedure division only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    /// Source file the program was read from
    pub file: PathBuf,
    /// Sections in textual order; index is the [`SectionId`]
    pub sections: Vec<Section>,
}

/// A named region of the procedure division
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    /// True for the synthetic section wrapping statements that precede the
    /// first `SECTION` header
    pub synthetic: bool,
    pub paragraphs: Vec<Paragraph>,
    pub location: SourceLocation,
}

/// A paragraph; `name` is `None` for the unnamed run of sentences between a
/// section header and its first named paragraph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paragraph {
    pub name: Option<String>,
    pub sentences: Vec<Sentence>,
    pub location: SourceLocation,
}

/// A sentence: the statements between two periods
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentence {
    pub statements: Vec<Statement>,
    pub location: SourceLocation,
}

/// One COBOL statement, immutable after construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    /// Original source text, normalized to single spaces
    pub text: String,
    pub location: SourceLocation,
}

/// Closed set of statement shapes the pipeline distinguishes
///
/// Anything without control-flow meaning lands in `Move` or `Other` and is
/// carried as opaque text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    /// `move ... to ...`
    Move,
    /// `if <cond> <then> [else <else>]`; bodies are nested statements
    If {
        condition: String,
        then_body: Vec<Statement>,
        else_body: Option<Vec<Statement>>,
    },
    /// `go to <label>`
    GoTo { target: String },
    /// `perform <label> [thru <label>]`
    Perform {
        target: String,
        thru: Option<String>,
    },
    /// Inline `perform ... end-perform`; the body is kept as opaque text
    PerformInline,
    /// `exit` / `exit section`
    ExitSection,
    /// `exit program` / `stop run`
    ExitProgram,
    /// `next sentence`
    NextSentence,
    /// Sentence boundary marker retained from parse models that emit one
    Sentence,
    /// Any other verb, carried as opaque text
    Other,
}

impl Statement {
    /// True when control never falls through to the next statement
    pub fn is_transfer(&self) -> bool {
        match &self.kind {
            StatementKind::GoTo { .. }
            | StatementKind::NextSentence
            | StatementKind::ExitSection
            | StatementKind::ExitProgram => true,
            StatementKind::If {
                then_body,
                else_body,
                ..
            } => {
                // An if transfers only when both arms do; a missing arm falls
                // through by definition
                ends_in_transfer(then_body)
                    && else_body.as_deref().is_some_and(ends_in_transfer)
            }
            _ => false,
        }
    }
}

/// True when the last statement of `body` unconditionally leaves the
/// sequential flow
pub fn ends_in_transfer(body: &[Statement]) -> bool {
    body.last().is_some_and(Statement::is_transfer)
}

impl Section {
    /// First statement of the section in textual order
    pub fn first_statement(&self) -> Option<&Statement> {
        self.paragraphs
            .iter()
            .flat_map(|p| &p.sentences)
            .flat_map(|s| &s.statements)
            .next()
    }

    /// Total statement count (top level only, not nested if-bodies)
    pub fn statement_count(&self) -> usize {
        self.paragraphs
            .iter()
            .flat_map(|p| &p.sentences)
            .map(|s| s.statements.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(kind: StatementKind) -> Statement {
        Statement {
            kind,
            text: String::new(),
            location: SourceLocation::point("t.cbl", 1, 1),
        }
    }

    #[test]
    fn test_goto_is_transfer() {
        assert!(stmt(StatementKind::GoTo {
            target: "done".into()
        })
        .is_transfer());
        assert!(stmt(StatementKind::ExitProgram).is_transfer());
        assert!(!stmt(StatementKind::Move).is_transfer());
    }

    #[test]
    fn test_if_transfers_only_when_both_arms_do() {
        let goto = stmt(StatementKind::GoTo {
            target: "done".into(),
        });
        let mv = stmt(StatementKind::Move);

        let both = stmt(StatementKind::If {
            condition: "a = 1".into(),
            then_body: vec![goto.clone()],
            else_body: Some(vec![stmt(StatementKind::ExitSection)]),
        });
        assert!(both.is_transfer());

        let no_else = stmt(StatementKind::If {
            condition: "a = 1".into(),
            then_body: vec![goto.clone()],
            else_body: None,
        });
        assert!(!no_else.is_transfer());

        let falls = stmt(StatementKind::If {
            condition: "a = 1".into(),
            then_body: vec![goto],
            else_body: Some(vec![mv]),
        });
        assert!(!falls.is_transfer());
    }

    #[test]
    fn test_ends_in_transfer_empty_body() {
        assert!(!ends_in_transfer(&[]));
    }
}
