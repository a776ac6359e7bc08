//! Pipeline error and diagnostic types
//!
//! Builder-stage errors are fatal and abort the pipeline. Everything later
//! degrades instead of failing: warnings and infos accumulate on a
//! [`Diagnostics`] list that travels with the final IR so renderers can
//! surface them.

use crate::cobol::SourceLocation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal pipeline errors, all raised by the statement graph builder
#[derive(Debug, Clone, Error)]
pub enum RestructureError {
    /// A `go to` or `perform` targets a name that does not exist
    #[error("unresolved label '{label}' at {location}")]
    UnresolvedLabel {
        label: String,
        location: SourceLocation,
    },

    /// `perform A thru B` is outside the structured-COBOL subset
    #[error("perform range '{target} thru {thru}' is not supported at {location}")]
    UnsupportedPerformRange {
        target: String,
        thru: String,
        location: SourceLocation,
    },
}

/// Non-fatal finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
}

/// Non-fatal finding kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A `go to` crosses section boundaries; the jump degrades to a goto leaf
    CrossSectionGoto,
    /// Paragraph or section name repeated; first definition wins
    DuplicateName,
    /// A cycle that is not a natural loop; emitted as labeled gotos
    IrreducibleControlFlow,
    /// Statements not reachable from the program entry
    UnreachableCode,
}

impl DiagnosticKind {
    pub fn severity(self) -> Severity {
        match self {
            DiagnosticKind::UnreachableCode => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

/// One accumulated finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub location: Option<SourceLocation>,
}

/// Ordered list of findings for one program run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        kind: DiagnosticKind,
        message: impl Into<String>,
        location: Option<SourceLocation>,
    ) {
        let message = message.into();
        match kind.severity() {
            Severity::Warning => tracing::warn!(?kind, "{}", message),
            Severity::Info => tracing::debug!(?kind, "{}", message),
        }
        self.entries.push(Diagnostic {
            severity: kind.severity(),
            kind,
            message,
            location,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(
            DiagnosticKind::UnreachableCode.severity(),
            Severity::Info
        );
        assert_eq!(
            DiagnosticKind::CrossSectionGoto.severity(),
            Severity::Warning
        );
    }

    #[test]
    fn test_push_and_filter() {
        let mut diags = Diagnostics::new();
        diags.push(DiagnosticKind::DuplicateName, "duplicate 'sub-exit'", None);
        diags.push(DiagnosticKind::UnreachableCode, "section 'unused'", None);

        assert_eq!(diags.len(), 2);
        assert_eq!(diags.warnings().count(), 1);
        assert_eq!(diags.of_kind(DiagnosticKind::UnreachableCode).count(), 1);
    }

    #[test]
    fn test_error_display_carries_location() {
        let err = RestructureError::UnresolvedLabel {
            label: "missing".into(),
            location: SourceLocation::point("prog.cbl", 12, 5),
        };
        let msg = err.to_string();
        assert!(msg.contains("missing"));
        assert!(msg.contains("prog.cbl:12"));
    }
}
