//! Sea-of-Nodes IR: the memory-operation layer.
//!
//! # Core Components
//!
//! - **Arena** (`arena.rs`): typed ids, node storage, side tables
//! - **Types** (`types.rs`): value kinds and stamps
//! - **Location** (`location.rs`): location identities and alias queries
//! - **Node** (`node.rs`): node kinds, slot layouts, node state
//! - **Graph** (`graph.rs`): node arena plus usage multimap
//! - **Access** (`access.rs`): reads, writes and compare-and-swap
//! - **Memory** (`memory.rs`): checkpoint/access capabilities, reordering
//! - **Error** (`error.rs`): consistency violations
//!
//! # Design Principles
//!
//! - **Arena allocation**: stable indices instead of reference cycles
//! - **Symmetric edges**: every input edge has its usage mirror, always
//! - **Closed node kinds**: capabilities answered by pattern matching
//! - **Explicit ordering**: last-location-access edges plus an alias oracle

pub mod access;
pub mod arena;
pub mod error;
pub mod graph;
pub mod location;
pub mod memory;
pub mod node;
pub mod types;

// Re-export commonly used types
pub use access::{
    AccessData, AtomicCasData, BarrierType, CasData, CasParams, CasStrategy, CasView, FenceKind,
    MemoryOrder, RawAccessData, ReadData, ReadParams, ReadView, WriteBarrierKind, WriteData,
    WriteParams, WriteView,
};
pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use error::{GraphError, GraphResult, Invariant};
pub use graph::{Graph, GraphId};
pub use location::{
    AliasOracle, AliasRelation, IdentityAliasOracle, LocationId, LocationIdentity, LocationUniverse,
};
pub use memory::{AccessKind, MemoryAccess, MemoryCheckpoint};
pub use node::{
    InputType, InputTypes, Node, NodeCost, NodeFlags, NodeId, NodeKind, NodeState, SlotInfo, CONTROL,
};
pub use types::{Stamp, ValueKind};
