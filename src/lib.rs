// Recobol: structured control-flow reconstruction for legacy COBOL
//
// Takes a goto-heavy procedure division, builds a statement-level flow
// graph, recovers natural loops, and flattens the result into nested block
// structure with as few residual gotos as the cost model allows.

#![allow(dead_code)]

pub mod cfg;
pub mod cli;
pub mod cobol;
pub mod diagnostics;
pub mod output;
pub mod pipeline;
pub mod structure;

pub use diagnostics::{Diagnostics, RestructureError};
pub use pipeline::{restructure, ProgramIr};
pub use structure::{StructureConfig, StructuredTree};
