//! Console output
//!
//! `terminal` holds the color palette and ANSI helpers, `report` the
//! reporter implementations that narrate plan execution.

pub mod report;
pub mod terminal;

pub use report::{ConsoleReporter, MultiReporter, Reporter, SummaryCell, SummaryRow};
