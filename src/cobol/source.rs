//! Source location mapping for COBOL statements and graph nodes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Source location for a statement, paragraph, or section
///
/// Lines and columns are 1-indexed. Structured-tree nodes carry these back
/// to the original COBOL text so renderers can cross-link output lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// File path (relative to invocation directory or absolute)
    pub file: PathBuf,
    /// Line number (1-indexed)
    pub start_line: usize,
    /// Column number (1-indexed)
    pub start_column: usize,
    /// End line number
    pub end_line: usize,
    /// End column number (exclusive)
    pub end_column: usize,
}

impl SourceLocation {
    /// Create a new source location
    pub fn new(
        file: impl Into<PathBuf>,
        start_line: usize,
        start_column: usize,
        end_line: usize,
        end_column: usize,
    ) -> Self {
        Self {
            file: file.into(),
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Location of a single point (zero-width span)
    pub fn point(file: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        Self::new(file, line, column, line, column)
    }

    /// Smallest span covering both locations
    ///
    /// Assumes both locations come from the same file; keeps `self`'s path.
    pub fn merge(&self, other: &SourceLocation) -> SourceLocation {
        let (start_line, start_column) =
            if (other.start_line, other.start_column) < (self.start_line, self.start_column) {
                (other.start_line, other.start_column)
            } else {
                (self.start_line, self.start_column)
            };
        let (end_line, end_column) =
            if (other.end_line, other.end_column) > (self.end_line, self.end_column) {
                (other.end_line, other.end_column)
            } else {
                (self.end_line, self.end_column)
            };
        SourceLocation {
            file: self.file.clone(),
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}:{}",
            self.file.display(),
            self.start_line,
            self.start_column,
            self.end_line,
            self.end_column
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let loc = SourceLocation::new("prog.cbl", 5, 3, 5, 13);
        assert_eq!(loc.to_string(), "prog.cbl:5:3-5:13");
    }

    #[test]
    fn test_merge_orders_endpoints() {
        let a = SourceLocation::new("prog.cbl", 3, 8, 3, 20);
        let b = SourceLocation::new("prog.cbl", 5, 8, 6, 12);

        let merged = a.merge(&b);
        assert_eq!(merged.start_line, 3);
        assert_eq!(merged.start_column, 8);
        assert_eq!(merged.end_line, 6);
        assert_eq!(merged.end_column, 12);

        // Merge is symmetric on the span
        let merged_rev = b.merge(&a);
        assert_eq!(merged_rev.start_line, 3);
        assert_eq!(merged_rev.end_line, 6);
    }
}
