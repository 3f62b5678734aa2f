//! Target lowering of reads, writes and compare-and-swap.
//!
//! # Expansions
//!
//! ```text
//! Write  ─▶ [NullCheck] [SatbPre] [Release] RawStore [CardMark] [Full]
//! Read   ─▶ [NullCheck] RawLoad [Acquire]
//! CAS    ─▶ x64:            AtomicCas(lock cmpxchg)
//!           AArch64 + LSE:  AtomicCas(casal)
//!           AArch64:        Release AtomicCas(ldaxr/stlxr) Full
//! ```
//!
//! Bracketed steps depend on the node's flags, its barrier tag, the barrier
//! set and the platform. The frame state after a write or CAS moves to the
//! raw store or atomic node. Release/acquire fences are only needed on weakly
//! ordered targets; volatile stores need the trailing full fence everywhere.

use smallvec::SmallVec;

use super::tool::{LoweringTool, Replacement};
use crate::config::{BarrierSet, LoweringConfig, Platform};
use crate::ir::access::{
    AtomicCasData, BarrierType, CasStrategy, FenceKind, MemoryOrder, RawAccessData, WriteBarrierKind,
};
use crate::ir::error::{violation, GraphError, GraphResult};
use crate::ir::graph::Graph;
use crate::ir::location::LocationId;
use crate::ir::node::{Node, NodeId, NodeKind};
use crate::ir::types::{Stamp, ValueKind};

// =============================================================================
// Expansion Builder
// =============================================================================

/// Appends fixed nodes to a control chain starting at the lowered node's
/// control predecessor.
struct Expansion<'g> {
    graph: &'g mut Graph,
    control: NodeId,
    nodes: SmallVec<[NodeId; 8]>,
}

impl<'g> Expansion<'g> {
    fn new(graph: &'g mut Graph, control: NodeId) -> Self {
        Expansion {
            graph,
            control,
            nodes: SmallVec::new(),
        }
    }

    /// Add a fixed node after the current tail. `rest` fills the slots after
    /// the control input.
    fn fixed(&mut self, kind: NodeKind, stamp: Stamp, rest: &[Option<NodeId>]) -> GraphResult<NodeId> {
        let mut inputs: SmallVec<[Option<NodeId>; 6]> = SmallVec::new();
        inputs.push(Some(self.control));
        inputs.extend_from_slice(rest);
        let id = self.graph.add(Node::with_inputs(kind, stamp, &inputs))?;
        self.control = id;
        self.nodes.push(id);
        Ok(id)
    }

    /// Add a floating node; it does not extend the control chain.
    fn floating(&mut self, id: GraphResult<NodeId>) -> GraphResult<NodeId> {
        let id = id?;
        self.nodes.push(id);
        Ok(id)
    }

    fn fence(&mut self, fence: FenceKind) -> GraphResult<NodeId> {
        self.fixed(NodeKind::MemoryBarrier(fence), Stamp::void(), &[])
    }

    fn finish(self, value: Option<NodeId>, memory: Option<NodeId>, guard: Option<NodeId>) -> Replacement {
        Replacement {
            control: Some(self.control),
            value,
            memory,
            guard,
            nodes: self.nodes,
        }
    }
}

// =============================================================================
// Target Lowerer
// =============================================================================

/// Concrete [`LoweringTool`] for the configured platform and barrier set.
#[derive(Debug, Clone)]
pub struct TargetLowerer {
    platform: Platform,
    barrier_set: BarrierSet,
    elide_initializing_barriers: bool,
}

impl TargetLowerer {
    pub fn new(config: &LoweringConfig) -> Self {
        Self {
            platform: config.platform,
            barrier_set: config.barrier_set,
            elide_initializing_barriers: config.elide_initializing_barriers,
        }
    }

    /// Pre-barrier for a store tagged `barrier`.
    pub fn pre_barrier(&self, barrier: BarrierType, initialization: bool) -> Option<WriteBarrierKind> {
        if initialization && self.elide_initializing_barriers {
            return None;
        }
        let needed = match barrier {
            BarrierType::PreWrite => self.barrier_set != BarrierSet::None,
            BarrierType::Field | BarrierType::Array => self.barrier_set.has_pre_barrier(),
            BarrierType::None | BarrierType::PostWrite => false,
        };
        needed.then_some(WriteBarrierKind::SatbPre)
    }

    /// Post-barrier for a store tagged `barrier`. Array stores mark the
    /// element's own card.
    pub fn post_barrier(&self, barrier: BarrierType) -> Option<WriteBarrierKind> {
        if !self.barrier_set.has_post_barrier() {
            return None;
        }
        match barrier {
            BarrierType::PostWrite | BarrierType::Field => Some(WriteBarrierKind::CardMark { precise: false }),
            BarrierType::Array => Some(WriteBarrierKind::CardMark { precise: true }),
            BarrierType::None | BarrierType::PreWrite => None,
        }
    }

    /// Atomic instruction for compare-and-swap on this platform.
    pub fn cas_strategy(&self) -> CasStrategy {
        match self.platform {
            Platform::X64 => CasStrategy::LockCmpxchg,
            Platform::AArch64 { lse: true } => CasStrategy::CasAcquireRelease,
            Platform::AArch64 { lse: false } => CasStrategy::LoadLinkedStoreConditional,
        }
    }

    fn raw_kind(graph: &Graph, location: LocationId) -> ValueKind {
        graph
            .locations()
            .get(location)
            .and_then(|identity| identity.value_kind())
            .unwrap_or(ValueKind::Long)
    }

    fn lower_write(&self, graph: &mut Graph, id: NodeId) -> GraphResult<Replacement> {
        let write = graph.as_write(id).ok_or_else(|| unexpected(&*graph, id, "Write"))?;
        let (control, address, value, location) =
            (write.control(), write.address(), write.value(), write.location());
        let (barrier, initialization, order) = (write.barrier(), write.is_initialization(), write.order());
        let (null_check, guard, last_access) = (write.null_check(), write.guard(), write.last_location_access());
        let state = write.state_after();
        let object = graph.input(address, 0);
        let kind = Self::raw_kind(graph, location);

        let mut ex = Expansion::new(graph, control);
        let check = if null_check {
            Some(ex.fixed(NodeKind::NullCheck, Stamp::void(), &[object])?)
        } else {
            None
        };
        if let Some(pre) = self.pre_barrier(barrier, initialization) {
            ex.fixed(NodeKind::WriteBarrier(pre), Stamp::void(), &[Some(address), None])?;
        }
        if order.is_volatile() && !self.platform.is_tso() {
            ex.fence(FenceKind::Release)?;
        }
        let store = ex.fixed(
            NodeKind::RawStore(RawAccessData { location, kind, order }),
            Stamp::void(),
            &[Some(address), Some(value), check.or(guard), last_access, state],
        )?;
        if let Some(post) = self.post_barrier(barrier) {
            ex.fixed(NodeKind::WriteBarrier(post), Stamp::void(), &[Some(address), Some(value)])?;
        }
        if order.is_volatile() {
            ex.fence(FenceKind::Full)?;
        }
        Ok(ex.finish(None, Some(store), check))
    }

    fn lower_read(&self, graph: &mut Graph, id: NodeId) -> GraphResult<Replacement> {
        let read = graph.as_read(id).ok_or_else(|| unexpected(&*graph, id, "Read"))?;
        let (control, address, location, order, stamp) =
            (read.control(), read.address(), read.location(), read.order(), read.stamp());
        let (null_check, guard, last_access) = (read.null_check(), read.guard(), read.last_location_access());
        let object = graph.input(address, 0);
        let kind = Self::raw_kind(graph, location);

        let mut ex = Expansion::new(graph, control);
        let check = if null_check {
            Some(ex.fixed(NodeKind::NullCheck, Stamp::void(), &[object])?)
        } else {
            None
        };
        let load = ex.fixed(
            NodeKind::RawLoad(RawAccessData { location, kind, order }),
            stamp,
            &[Some(address), check.or(guard), last_access],
        )?;
        if order == MemoryOrder::Volatile && !self.platform.is_tso() {
            ex.fence(FenceKind::Acquire)?;
        }
        Ok(ex.finish(Some(load), Some(load), check))
    }

    fn lower_compare_and_swap(&self, graph: &mut Graph, id: NodeId) -> GraphResult<Replacement> {
        let cas = graph
            .as_compare_and_swap(id)
            .ok_or_else(|| unexpected(&*graph, id, "CompareAndSwap"))?;
        let (control, object, offset) = (cas.control(), cas.object(), cas.offset());
        let (expected, new_value) = (cas.expected(), cas.new_value());
        let (value_kind, location, state) = (cas.value_kind(), cas.location(), cas.state_after());
        let strategy = self.cas_strategy();

        let mut ex = Expansion::new(graph, control);
        let address = {
            let address = ex.graph.offset_address(object, offset);
            ex.floating(address)?
        };
        let fenced = strategy == CasStrategy::LoadLinkedStoreConditional;
        if fenced {
            ex.fence(FenceKind::Release)?;
        }
        let atomic = ex.fixed(
            NodeKind::AtomicCas(AtomicCasData {
                value_kind,
                location,
                strategy,
            }),
            Stamp::boolean_result(),
            &[Some(address), Some(expected), Some(new_value), state],
        )?;
        if fenced {
            ex.fence(FenceKind::Full)?;
        }
        Ok(ex.finish(Some(atomic), Some(atomic), None))
    }
}

fn unexpected(graph: &Graph, node: NodeId, expected: &'static str) -> GraphError {
    violation(GraphError::UnexpectedKind {
        node,
        expected,
        found: graph.get(node).map_or("unknown", |n| n.kind().name()),
    })
}

impl LoweringTool for TargetLowerer {
    fn lower(&mut self, graph: &mut Graph, node: NodeId) -> GraphResult<Replacement> {
        let kind = graph.require_alive(node)?.kind().clone();
        match kind {
            NodeKind::Write(_) => self.lower_write(graph, node),
            NodeKind::Read(_) => self.lower_read(graph, node),
            NodeKind::CompareAndSwap(_) => self.lower_compare_and_swap(graph, node),
            other => Err(violation(GraphError::UnexpectedKind {
                node,
                expected: "lowerable node",
                found: other.name(),
            })),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
