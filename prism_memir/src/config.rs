//! Lowering configuration.
//!
//! The target machine and the collector's barrier set decide what a memory
//! node expands into; everything else about lowering is fixed.

// =============================================================================
// Target
// =============================================================================

/// Target machine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// x86-64: total store order, `lock`-prefixed atomics.
    X64,
    /// AArch64; `lse` enables the ARMv8.1 atomics (`casal`).
    AArch64 { lse: bool },
}

impl Platform {
    /// The platform this crate was compiled for, defaulting to x64.
    pub const fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Platform::AArch64 {
                lse: cfg!(target_feature = "lse"),
            }
        } else {
            Platform::X64
        }
    }

    /// Plain loads already have acquire and plain stores release semantics.
    #[inline]
    pub const fn is_tso(self) -> bool {
        matches!(self, Platform::X64)
    }
}

/// GC write-barrier scheme of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierSet {
    /// No barriers (e.g. an epsilon collector).
    None,
    /// Card marking after reference stores.
    CardTable,
    /// SATB pre-barrier plus card marking.
    G1,
}

impl BarrierSet {
    #[inline]
    pub const fn has_pre_barrier(self) -> bool {
        matches!(self, BarrierSet::G1)
    }

    #[inline]
    pub const fn has_post_barrier(self) -> bool {
        !matches!(self, BarrierSet::None)
    }
}

/// Order in which the lowering phase visits lowerable nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TraversalOrder {
    /// Reverse postorder over control successors from the start node.
    #[default]
    ControlFlow,
    /// Allocation order.
    Creation,
}

// =============================================================================
// Lowering Configuration
// =============================================================================

/// Configuration for memory-node lowering.
#[derive(Debug, Clone)]
pub struct LoweringConfig {
    /// Target machine.
    pub platform: Platform,

    /// Barrier scheme of the collector.
    pub barrier_set: BarrierSet,

    /// Skip pre-barriers on initializing writes (there is no previous value
    /// to log).
    pub elide_initializing_barriers: bool,

    /// Traversal order of the lowering phase.
    pub traversal: TraversalOrder,

    /// Run [`Graph::verify`](crate::ir::Graph::verify) after the phase.
    pub verify_after_lowering: bool,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            platform: Platform::host(),
            barrier_set: BarrierSet::CardTable,
            elide_initializing_barriers: true,
            traversal: TraversalOrder::ControlFlow,
            verify_after_lowering: cfg!(debug_assertions),
        }
    }
}

impl LoweringConfig {
    /// Deterministic configuration for tests: x64, G1 barriers, always
    /// verify.
    pub fn for_testing() -> Self {
        Self {
            platform: Platform::X64,
            barrier_set: BarrierSet::G1,
            verify_after_lowering: true,
            ..Default::default()
        }
    }

    /// AArch64 target with or without LSE atomics.
    pub fn aarch64(lse: bool) -> Self {
        Self {
            platform: Platform::AArch64 { lse },
            ..Self::for_testing()
        }
    }

    pub fn with_barrier_set(mut self, barrier_set: BarrierSet) -> Self {
        self.barrier_set = barrier_set;
        self
    }

    pub fn with_traversal(mut self, traversal: TraversalOrder) -> Self {
        self.traversal = traversal;
        self
    }
}
