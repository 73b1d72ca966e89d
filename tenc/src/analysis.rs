//! Analyses over well-formed IR.
//!
//! Analyses are total: they never fail on IR that passed the verifier.

mod alias;
mod cfg;
mod lifetime;
mod stack;

pub use alias::{alias_analysis, AaResults};
pub use cfg::{control_flow_graph, ControlFlowGraph};
pub use lifetime::insert_lifetime_stops;
pub use stack::{set_stack_ptrs, StackMap};
