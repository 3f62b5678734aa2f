//! Lowering of memory nodes to machine-level sequences.
//!
//! - **Tool** (`tool.rs`): the lowering protocol and graph-side rewiring
//! - **Target** (`target.rs`): x64 / AArch64 expansions
//! - **Schedule** (`schedule.rs`): pluggable visiting orders
//! - **Phase** (`phase.rs`): the driver and its statistics

pub mod phase;
pub mod schedule;
pub mod target;
pub mod tool;

pub use phase::{lower_memory, LoweringPhase, LoweringStats};
pub use schedule::{schedule_for, ControlFlowOrder, CreationOrder, LoweringSchedule};
pub use target::TargetLowerer;
pub use tool::{LoweringTool, Replacement};
