//! Memory capabilities: checkpoints, accesses, and the reorder query.
//!
//! A **checkpoint** is a node with an observable memory side effect on one or
//! more location identities (it "kills" them). An **access** reads or writes
//! through an address and may name the last node known to touch the same
//! location. Both are answered by matching on the node kind; there is no
//! per-node capability object.
//!
//! Two memory nodes may exchange order only when nothing in the graph orders
//! them explicitly and the alias oracle proves every pair of touched
//! locations disjoint.

use smallvec::SmallVec;

use super::access::{MemoryOrder, RawAccessData, ReadData, WriteData};
use super::error::GraphResult;
use super::graph::Graph;
use super::location::{AliasOracle, LocationId, LocationUniverse};
use super::node::{NodeId, NodeKind};

// =============================================================================
// Memory Checkpoint
// =============================================================================

/// Location identities a node kills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryCheckpoint {
    Single(LocationId),
    Multi(SmallVec<[LocationId; 4]>),
}

impl MemoryCheckpoint {
    /// The killed locations.
    pub fn locations(&self) -> &[LocationId] {
        match self {
            MemoryCheckpoint::Single(location) => std::slice::from_ref(location),
            MemoryCheckpoint::Multi(locations) => locations,
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, MemoryCheckpoint::Single(_))
    }

    /// Whether this checkpoint definitely kills `location`: it names it or
    /// kills everything.
    pub fn covers(&self, universe: &LocationUniverse, location: LocationId) -> bool {
        self.locations()
            .iter()
            .any(|&killed| killed == location || universe.get(killed).is_some_and(|i| i.is_any()))
    }

    /// Whether this checkpoint may kill `location`, as far as `oracle` can
    /// tell.
    pub fn may_kill(&self, universe: &LocationUniverse, oracle: &dyn AliasOracle, location: LocationId) -> bool {
        self.locations()
            .iter()
            .any(|&killed| !oracle.can_reorder(universe, killed, location))
    }

    /// Union of two checkpoints. Anything joined with `ANY_LOCATION` is
    /// `ANY_LOCATION`.
    pub fn join(self, other: MemoryCheckpoint, universe: &LocationUniverse) -> MemoryCheckpoint {
        let any = universe.any();
        let mut locations: SmallVec<[LocationId; 4]> = SmallVec::new();
        for &location in self.locations().iter().chain(other.locations()) {
            if location == any {
                return MemoryCheckpoint::Single(any);
            }
            if !locations.contains(&location) {
                locations.push(location);
            }
        }
        match locations.as_slice() {
            [single] => MemoryCheckpoint::Single(*single),
            _ => MemoryCheckpoint::Multi(locations),
        }
    }
}

// =============================================================================
// Memory Access
// =============================================================================

/// Direction of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Load,
    Store,
}

/// Snapshot of a node's memory-access capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccess {
    pub node: NodeId,
    pub kind: AccessKind,
    pub location: LocationId,
    pub address: Option<NodeId>,
    /// The minimum ordering witness: the last node known to touch the same
    /// location on this path. `None` leaves the access constrained by
    /// control flow only.
    pub last_location_access: Option<NodeId>,
    pub order: MemoryOrder,
}

impl MemoryAccess {
    #[inline]
    pub fn is_load(&self) -> bool {
        self.kind == AccessKind::Load
    }
}

// =============================================================================
// Graph Queries
// =============================================================================

impl Graph {
    /// The checkpoint capability of `id`, if it kills any location.
    pub fn memory_checkpoint(&self, id: NodeId) -> Option<MemoryCheckpoint> {
        let node = self.get(id)?;
        let location = match node.kind() {
            NodeKind::Start | NodeKind::MemoryBarrier(_) => self.locations().any(),
            NodeKind::NewInstance { .. } => self.locations().init(),
            NodeKind::Write(data) => data.access.location,
            NodeKind::CompareAndSwap(data) => data.location,
            NodeKind::RawStore(data) => data.location,
            NodeKind::AtomicCas(data) => data.location,
            _ => return None,
        };
        Some(MemoryCheckpoint::Single(location))
    }

    /// The access capability of `id`, if it reads or writes through an
    /// address.
    pub fn memory_access(&self, id: NodeId) -> Option<MemoryAccess> {
        let node = self.get(id)?;
        let (kind, location, order, memory_slot) = match node.kind() {
            NodeKind::Read(data) => (
                AccessKind::Load,
                data.access.location,
                data.access.order,
                ReadData::LAST_LOCATION_ACCESS,
            ),
            NodeKind::Write(data) => (
                AccessKind::Store,
                data.access.location,
                data.access.order,
                WriteData::LAST_LOCATION_ACCESS,
            ),
            NodeKind::RawLoad(data) => (AccessKind::Load, data.location, data.order, RawAccessData::LOAD_MEMORY),
            NodeKind::RawStore(data) => (AccessKind::Store, data.location, data.order, RawAccessData::STORE_MEMORY),
            _ => return None,
        };
        Some(MemoryAccess {
            node: id,
            kind,
            location,
            address: node.input(RawAccessData::ADDRESS),
            last_location_access: node.input(memory_slot),
            order,
        })
    }

    /// Locations `id` reads or kills.
    fn memory_footprint(&self, id: NodeId) -> SmallVec<[LocationId; 4]> {
        let mut touched: SmallVec<[LocationId; 4]> = SmallVec::new();
        if let Some(checkpoint) = self.memory_checkpoint(id) {
            touched.extend_from_slice(checkpoint.locations());
        }
        if let Some(access) = self.memory_access(id) {
            if !touched.contains(&access.location) {
                touched.push(access.location);
            }
        }
        touched
    }

    /// Whether `a` and `b` may exchange order.
    ///
    /// - A direct last-location-access edge between them forbids it.
    /// - A volatile access keeps its order against every other memory node.
    /// - Otherwise every pair of touched locations must be provably
    ///   disjoint according to `oracle`. This holds for loads too: two
    ///   reads of the same location, or a read of an immutable location and
    ///   its initializing write, stay ordered.
    ///
    /// Nodes without memory effects are unconstrained by memory ordering.
    pub fn can_reorder(&self, a: NodeId, b: NodeId, oracle: &dyn AliasOracle) -> GraphResult<bool> {
        self.require_alive(a)?;
        self.require_alive(b)?;
        if a == b {
            return Ok(false);
        }

        let (touched_a, touched_b) = (self.memory_footprint(a), self.memory_footprint(b));
        if touched_a.is_empty() || touched_b.is_empty() {
            return Ok(true);
        }

        let (access_a, access_b) = (self.memory_access(a), self.memory_access(b));
        let witnessed = |access: Option<MemoryAccess>, other: NodeId| {
            access.is_some_and(|access| access.last_location_access == Some(other))
        };
        if witnessed(access_a, b) || witnessed(access_b, a) {
            return Ok(false);
        }
        let volatile = |access: Option<MemoryAccess>| access.is_some_and(|access| access.order.is_volatile());
        if volatile(access_a) || volatile(access_b) {
            return Ok(false);
        }

        let universe = self.locations();
        Ok(touched_a
            .iter()
            .all(|&la| touched_b.iter().all(|&lb| oracle.can_reorder(universe, la, lb))))
    }
}

// =============================================================================
// Tests
// =============================================================================
