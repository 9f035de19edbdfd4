//! Run statistics
//!
//! Counter types shared between the engine worker (which mutates them) and
//! controllers (which receive read-only snapshots).

pub mod totals;

pub use totals::{CycleScore, RunTotals};
