//! Memory-operation layer of the Prism JIT's Sea-of-Nodes IR.
//!
//! Models memory side effects as explicit graph structure:
//! - Location identities partitioning memory for ordering purposes
//! - Fixed reads and writes carrying barrier selection metadata
//! - Atomic compare-and-swap
//! - A lowering protocol replacing these with machine-level sequences
//!
//! One graph is owned and mutated by one compilation thread; independent
//! compilations share nothing.
#![deny(unsafe_code)]
pub mod config;
pub mod ir;
pub mod lower;

pub use config::{BarrierSet, LoweringConfig, Platform, TraversalOrder};
