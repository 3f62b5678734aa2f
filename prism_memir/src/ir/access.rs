//! Fixed access nodes: reads, writes and compare-and-swap.
//!
//! Accesses are fixed nodes: they sit at a control position, compute their
//! target through an `OffsetAddress`, and carry the location identity they
//! touch plus the barrier tag the heap model selected for them. This module
//! owns their payloads, the construction-time validation, typed read-only
//! views, and the setters for the optional edges passes rewire:
//!
//! - `state_after`: frame state for deoptimizing after the write
//! - `last_location_access`: the ordering witness on the same location
//! - `guard`: a condition that must hold before the access may execute
//!
//! All construction failures are reported before anything is allocated, so
//! an ill-formed access never becomes reachable from the graph.

use super::error::{violation, GraphError, GraphResult};
use super::graph::Graph;
use super::location::{LocationId, LocationIdentity};
use super::node::{Node, NodeId, NodeKind, CONTROL};
use super::types::{Stamp, ValueKind};

// =============================================================================
// Access Metadata
// =============================================================================

/// GC write-barrier selection for a store.
///
/// Chosen by the heap model at construction time; this crate only stores it
/// and lets lowering expand it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BarrierType {
    /// No barrier.
    #[default]
    None,
    /// Snapshot-at-the-beginning barrier before the store.
    PreWrite,
    /// Card-marking barrier after the store.
    PostWrite,
    /// Reference store into an array element.
    Array,
    /// Reference store into an object field.
    Field,
}

impl BarrierType {
    /// Default choice for storing a value of `kind`: only references need a
    /// barrier.
    pub const fn for_store(kind: ValueKind, array: bool) -> BarrierType {
        match (kind.is_reference(), array) {
            (false, _) => BarrierType::None,
            (true, true) => BarrierType::Array,
            (true, false) => BarrierType::Field,
        }
    }
}

/// Memory ordering of an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryOrder {
    #[default]
    Plain,
    /// Sequentially consistent (Java `volatile`).
    Volatile,
}

impl MemoryOrder {
    #[inline]
    pub const fn is_volatile(self) -> bool {
        matches!(self, MemoryOrder::Volatile)
    }
}

/// Attributes shared by every fixed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessData {
    pub location: LocationId,
    pub barrier: BarrierType,
    /// The access performs an implicit null check on its base.
    pub null_check: bool,
    pub order: MemoryOrder,
}

/// Payload of [`NodeKind::Read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadData {
    pub access: AccessData,
}

impl ReadData {
    pub const ADDRESS: usize = 1;
    pub const GUARD: usize = 2;
    pub const LAST_LOCATION_ACCESS: usize = 3;
}

/// Payload of [`NodeKind::Write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteData {
    pub access: AccessData,
    /// The location held no valid value before this store (freshly
    /// allocated or zeroed memory).
    pub initialization: bool,
}

impl WriteData {
    pub const ADDRESS: usize = 1;
    pub const VALUE: usize = 2;
    pub const GUARD: usize = 3;
    pub const STATE_AFTER: usize = 4;
    pub const LAST_LOCATION_ACCESS: usize = 5;
}

/// Payload of [`NodeKind::CompareAndSwap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CasData {
    pub value_kind: ValueKind,
    pub location: LocationId,
}

impl CasData {
    pub const OBJECT: usize = 1;
    pub const OFFSET: usize = 2;
    pub const EXPECTED: usize = 3;
    pub const NEW_VALUE: usize = 4;
    pub const STATE_AFTER: usize = 5;
}

/// Payload of the lowered [`NodeKind::RawLoad`] and [`NodeKind::RawStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawAccessData {
    pub location: LocationId,
    pub kind: ValueKind,
    pub order: MemoryOrder,
}

impl RawAccessData {
    pub const ADDRESS: usize = 1;
    pub const LOAD_GUARD: usize = 2;
    pub const LOAD_MEMORY: usize = 3;
    pub const STORE_VALUE: usize = 2;
    pub const STORE_GUARD: usize = 3;
    pub const STORE_MEMORY: usize = 4;
    pub const STORE_STATE_AFTER: usize = 5;
}

/// Machine strategy for an atomic compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CasStrategy {
    /// x86-64 `lock cmpxchg`; a full barrier by itself.
    LockCmpxchg,
    /// AArch64 `ldaxr`/`stlxr` retry loop.
    LoadLinkedStoreConditional,
    /// AArch64 LSE `casal`.
    CasAcquireRelease,
}

/// Payload of [`NodeKind::AtomicCas`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomicCasData {
    pub value_kind: ValueKind,
    pub location: LocationId,
    pub strategy: CasStrategy,
}

impl AtomicCasData {
    pub const ADDRESS: usize = 1;
    pub const EXPECTED: usize = 2;
    pub const NEW_VALUE: usize = 3;
    pub const STATE_AFTER: usize = 4;
}

/// Memory fence flavours emitted by lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FenceKind {
    Acquire,
    Release,
    /// StoreLoad and everything weaker.
    Full,
}

/// Concrete GC barrier emitted by lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteBarrierKind {
    /// Log the previous value before it is overwritten.
    SatbPre,
    /// Dirty the card covering the store; `precise` marks the card of the
    /// element itself rather than the object header.
    CardMark { precise: bool },
}

// =============================================================================
// Construction Parameters
// =============================================================================

/// Everything needed to build a write node.
#[derive(Debug, Clone)]
pub struct WriteParams {
    pub control: NodeId,
    pub address: NodeId,
    pub location: LocationId,
    pub value: NodeId,
    pub barrier: BarrierType,
    pub initialization: bool,
    pub guard: Option<NodeId>,
    pub state_after: Option<NodeId>,
    pub last_location_access: Option<NodeId>,
    pub null_check: bool,
    pub order: MemoryOrder,
}

impl WriteParams {
    /// A plain, non-initializing write.
    pub fn new(
        control: NodeId,
        address: NodeId,
        location: LocationId,
        value: NodeId,
        barrier: BarrierType,
    ) -> Self {
        WriteParams {
            control,
            address,
            location,
            value,
            barrier,
            initialization: false,
            guard: None,
            state_after: None,
            last_location_access: None,
            null_check: false,
            order: MemoryOrder::Plain,
        }
    }

    pub fn initialization(mut self, initialization: bool) -> Self {
        self.initialization = initialization;
        self
    }

    pub fn with_guard(mut self, guard: NodeId) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_state_after(mut self, state: NodeId) -> Self {
        self.state_after = Some(state);
        self
    }

    pub fn with_last_location_access(mut self, access: NodeId) -> Self {
        self.last_location_access = Some(access);
        self
    }

    pub fn null_checked(mut self) -> Self {
        self.null_check = true;
        self
    }

    pub fn volatile(mut self) -> Self {
        self.order = MemoryOrder::Volatile;
        self
    }
}

/// Everything needed to build a read node.
#[derive(Debug, Clone)]
pub struct ReadParams {
    pub control: NodeId,
    pub address: NodeId,
    pub location: LocationId,
    pub guard: Option<NodeId>,
    pub last_location_access: Option<NodeId>,
    pub null_check: bool,
    pub order: MemoryOrder,
}

impl ReadParams {
    pub fn new(control: NodeId, address: NodeId, location: LocationId) -> Self {
        ReadParams {
            control,
            address,
            location,
            guard: None,
            last_location_access: None,
            null_check: false,
            order: MemoryOrder::Plain,
        }
    }

    pub fn with_guard(mut self, guard: NodeId) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_last_location_access(mut self, access: NodeId) -> Self {
        self.last_location_access = Some(access);
        self
    }

    pub fn null_checked(mut self) -> Self {
        self.null_check = true;
        self
    }

    pub fn volatile(mut self) -> Self {
        self.order = MemoryOrder::Volatile;
        self
    }
}

/// Everything needed to build a compare-and-swap node.
#[derive(Debug, Clone)]
pub struct CasParams {
    pub control: NodeId,
    pub object: NodeId,
    pub offset: NodeId,
    pub expected: NodeId,
    pub new_value: NodeId,
    pub value_kind: ValueKind,
    pub location: LocationId,
    pub state_after: Option<NodeId>,
}

impl CasParams {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        control: NodeId,
        object: NodeId,
        offset: NodeId,
        expected: NodeId,
        new_value: NodeId,
        value_kind: ValueKind,
        location: LocationId,
    ) -> Self {
        CasParams {
            control,
            object,
            offset,
            expected,
            new_value,
            value_kind,
            location,
            state_after: None,
        }
    }

    pub fn with_state_after(mut self, state: NodeId) -> Self {
        self.state_after = Some(state);
        self
    }
}

// =============================================================================
// Construction
// =============================================================================

impl Graph {
    fn location_identity(&self, node: NodeId, location: LocationId) -> GraphResult<&LocationIdentity> {
        self.locations().get(location).ok_or_else(|| {
            violation(GraphError::AccessLayout {
                node,
                what: "access",
                stamp: Stamp::Illegal,
                location: self.locations().describe(location),
            })
        })
    }

    /// The address must be an address, and heap locations need a reference
    /// base.
    fn check_address(&self, address: NodeId, location: LocationId) -> GraphResult<()> {
        let identity = self.location_identity(address, location)?;
        let node = self.require_alive(address)?;
        let layout_error = |what, at, stamp| {
            violation(GraphError::AccessLayout {
                node: at,
                what,
                stamp,
                location: identity.to_string(),
            })
        };

        if node.stamp() != Stamp::Address {
            return Err(layout_error("address", address, node.stamp()));
        }
        if let (NodeKind::OffsetAddress, Some(base)) = (node.kind(), node.input(0)) {
            self.check_base(base, identity)?;
        }
        Ok(())
    }

    /// Heap locations are addressed relative to an object.
    fn check_base(&self, base: NodeId, identity: &LocationIdentity) -> GraphResult<()> {
        let heap = matches!(
            identity,
            LocationIdentity::Field { .. } | LocationIdentity::ArrayElement { .. } | LocationIdentity::Init
        );
        let stamp = self.require_alive(base)?.stamp();
        if heap && !stamp.is_object() {
            return Err(violation(GraphError::AccessLayout {
                node: base,
                what: "base",
                stamp,
                location: identity.to_string(),
            }));
        }
        Ok(())
    }

    /// The stored value must match the location's value kind, if it has one.
    fn check_value(&self, value: NodeId, location: LocationId) -> GraphResult<()> {
        let identity = self.location_identity(value, location)?;
        let stamp = self.require_alive(value)?.stamp();
        let fits = match identity.value_kind() {
            Some(kind) => stamp.is_compatible(Stamp::for_kind(kind.stack_kind())),
            None => stamp.is_value(),
        };
        if fits {
            Ok(())
        } else {
            Err(violation(GraphError::AccessLayout {
                node: value,
                what: "value",
                stamp,
                location: identity.to_string(),
            }))
        }
    }

    fn read_stamp(&self, location: LocationId) -> Stamp {
        let kind = self
            .locations()
            .get(location)
            .and_then(LocationIdentity::value_kind)
            .unwrap_or(ValueKind::Long);
        Stamp::for_kind(kind.stack_kind())
    }

    /// Build a read of `params.location` through `params.address`.
    pub fn add_read(&mut self, params: ReadParams) -> GraphResult<NodeId> {
        self.check_address(params.address, params.location)?;
        let data = ReadData {
            access: AccessData {
                location: params.location,
                barrier: BarrierType::None,
                null_check: params.null_check,
                order: params.order,
            },
        };
        let stamp = self.read_stamp(params.location);
        self.add(Node::with_inputs(
            NodeKind::Read(data),
            stamp,
            &[
                Some(params.control),
                Some(params.address),
                params.guard,
                params.last_location_access,
            ],
        ))
    }

    /// Build a write of `params.value` to `params.location`.
    pub fn add_write(&mut self, params: WriteParams) -> GraphResult<NodeId> {
        self.check_address(params.address, params.location)?;
        self.check_value(params.value, params.location)?;
        let data = WriteData {
            access: AccessData {
                location: params.location,
                barrier: params.barrier,
                null_check: params.null_check,
                order: params.order,
            },
            initialization: params.initialization,
        };
        let id = self.add(Node::with_inputs(
            NodeKind::Write(data),
            Stamp::void(),
            &[
                Some(params.control),
                Some(params.address),
                Some(params.value),
                params.guard,
                params.state_after,
                params.last_location_access,
            ],
        ))?;
        tracing::debug!(
            node = %id,
            location = %self.locations().describe(params.location),
            barrier = ?params.barrier,
            initialization = params.initialization,
            "write"
        );
        Ok(id)
    }

    /// Build an atomic compare-and-swap.
    ///
    /// `expected` and `new_value` must have compatible stamps, and both must
    /// fit `value_kind`, which in turn must fit the location. The object and
    /// offset follow the same layout rules as a write's address. Otherwise
    /// nothing is added.
    pub fn add_compare_and_swap(&mut self, params: CasParams) -> GraphResult<NodeId> {
        let expected = self.require_alive(params.expected)?.stamp();
        let new_value = self.require_alive(params.new_value)?.stamp();
        if !expected.is_compatible(new_value) {
            return Err(violation(GraphError::IncompatibleStamps { expected, new_value }));
        }
        if !expected.is_compatible(Stamp::for_kind(params.value_kind.stack_kind())) {
            return Err(violation(GraphError::AccessLayout {
                node: params.expected,
                what: "expected value",
                stamp: expected,
                location: self.locations().describe(params.location),
            }));
        }
        let identity = self.location_identity(params.object, params.location)?;
        let layout_error = |what, at, stamp| {
            violation(GraphError::AccessLayout {
                node: at,
                what,
                stamp,
                location: identity.to_string(),
            })
        };
        if let Some(kind) = identity.value_kind() {
            let declared = Stamp::for_kind(kind.stack_kind());
            if !declared.is_compatible(Stamp::for_kind(params.value_kind.stack_kind())) {
                return Err(layout_error("value kind", params.expected, expected));
            }
        }
        self.check_base(params.object, identity)?;
        let offset = self.require_alive(params.offset)?.stamp();
        if !matches!(offset, Stamp::Integer { .. }) {
            return Err(layout_error("offset", params.offset, offset));
        }

        let data = CasData {
            value_kind: params.value_kind,
            location: params.location,
        };
        self.add(Node::with_inputs(
            NodeKind::CompareAndSwap(data),
            Stamp::boolean_result(),
            &[
                Some(params.control),
                Some(params.object),
                Some(params.offset),
                Some(params.expected),
                Some(params.new_value),
                params.state_after,
            ],
        ))
    }

    // =========================================================================
    // Optional Edges
    // =========================================================================

    fn access_slot(
        &self,
        node: NodeId,
        expected: &'static str,
        slot_of: impl Fn(&NodeKind) -> Option<usize>,
    ) -> GraphResult<usize> {
        let kind = self.require_alive(node)?.kind();
        slot_of(kind).ok_or_else(|| {
            violation(GraphError::UnexpectedKind {
                node,
                expected,
                found: kind.name(),
            })
        })
    }

    /// Attach (or clear) the frame state describing the program point after
    /// `node`. The state must be an alive `FrameState` of this graph.
    pub fn set_state_after(&mut self, node: NodeId, state: Option<NodeId>) -> GraphResult<Option<NodeId>> {
        let slot = self.access_slot(node, "state split", |kind| match kind {
            NodeKind::Write(_) => Some(WriteData::STATE_AFTER),
            NodeKind::CompareAndSwap(_) => Some(CasData::STATE_AFTER),
            NodeKind::RawStore(_) => Some(RawAccessData::STORE_STATE_AFTER),
            NodeKind::AtomicCas(_) => Some(AtomicCasData::STATE_AFTER),
            _ => None,
        })?;
        self.set_input(node, slot, state)
    }

    /// Replace the last-location-access witness of a memory access.
    pub fn set_last_location_access(
        &mut self,
        node: NodeId,
        access: Option<NodeId>,
    ) -> GraphResult<Option<NodeId>> {
        let slot = self.access_slot(node, "memory access", |kind| match kind {
            NodeKind::Read(_) => Some(ReadData::LAST_LOCATION_ACCESS),
            NodeKind::Write(_) => Some(WriteData::LAST_LOCATION_ACCESS),
            NodeKind::RawLoad(_) => Some(RawAccessData::LOAD_MEMORY),
            NodeKind::RawStore(_) => Some(RawAccessData::STORE_MEMORY),
            _ => None,
        })?;
        self.set_input(node, slot, access)
    }

    pub fn set_guard(&mut self, node: NodeId, guard: Option<NodeId>) -> GraphResult<Option<NodeId>> {
        let slot = self.access_slot(node, "fixed access", |kind| match kind {
            NodeKind::Read(_) => Some(ReadData::GUARD),
            NodeKind::Write(_) => Some(WriteData::GUARD),
            NodeKind::RawLoad(_) => Some(RawAccessData::LOAD_GUARD),
            NodeKind::RawStore(_) => Some(RawAccessData::STORE_GUARD),
            _ => None,
        })?;
        self.set_input(node, slot, guard)
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub fn as_read(&self, id: NodeId) -> Option<ReadView<'_>> {
        let node = self.get(id).filter(|n| n.is_alive())?;
        let NodeKind::Read(data) = node.kind() else {
            return None;
        };
        Some(ReadView {
            id,
            node,
            data,
            control: node.input(CONTROL)?,
            address: node.input(ReadData::ADDRESS)?,
        })
    }

    pub fn as_write(&self, id: NodeId) -> Option<WriteView<'_>> {
        let node = self.get(id).filter(|n| n.is_alive())?;
        let NodeKind::Write(data) = node.kind() else {
            return None;
        };
        Some(WriteView {
            id,
            node,
            data,
            control: node.input(CONTROL)?,
            address: node.input(WriteData::ADDRESS)?,
            value: node.input(WriteData::VALUE)?,
        })
    }

    pub fn as_compare_and_swap(&self, id: NodeId) -> Option<CasView<'_>> {
        let node = self.get(id).filter(|n| n.is_alive())?;
        let NodeKind::CompareAndSwap(data) = node.kind() else {
            return None;
        };
        Some(CasView {
            id,
            node,
            data,
            control: node.input(CONTROL)?,
            object: node.input(CasData::OBJECT)?,
            offset: node.input(CasData::OFFSET)?,
            expected: node.input(CasData::EXPECTED)?,
            new_value: node.input(CasData::NEW_VALUE)?,
        })
    }
}

// =============================================================================
// Views
// =============================================================================

/// Read-only view of an alive read node.
#[derive(Debug, Clone, Copy)]
pub struct ReadView<'g> {
    pub id: NodeId,
    node: &'g Node,
    data: &'g ReadData,
    control: NodeId,
    address: NodeId,
}

impl ReadView<'_> {
    pub fn control(&self) -> NodeId {
        self.control
    }

    pub fn address(&self) -> NodeId {
        self.address
    }

    pub fn location(&self) -> LocationId {
        self.data.access.location
    }

    pub fn guard(&self) -> Option<NodeId> {
        self.node.input(ReadData::GUARD)
    }

    pub fn last_location_access(&self) -> Option<NodeId> {
        self.node.input(ReadData::LAST_LOCATION_ACCESS)
    }

    pub fn null_check(&self) -> bool {
        self.data.access.null_check
    }

    pub fn order(&self) -> MemoryOrder {
        self.data.access.order
    }

    pub fn stamp(&self) -> Stamp {
        self.node.stamp()
    }
}

/// Read-only view of an alive write node.
#[derive(Debug, Clone, Copy)]
pub struct WriteView<'g> {
    pub id: NodeId,
    node: &'g Node,
    data: &'g WriteData,
    control: NodeId,
    address: NodeId,
    value: NodeId,
}

impl WriteView<'_> {
    pub fn control(&self) -> NodeId {
        self.control
    }

    pub fn address(&self) -> NodeId {
        self.address
    }

    pub fn value(&self) -> NodeId {
        self.value
    }

    pub fn location(&self) -> LocationId {
        self.data.access.location
    }

    pub fn barrier(&self) -> BarrierType {
        self.data.access.barrier
    }

    /// If true, the old value of the location is uninitialized or zero.
    /// If false, it is guaranteed to hold a valid value or zero.
    pub fn is_initialization(&self) -> bool {
        self.data.initialization
    }

    /// Whether barrier and ordering logic must assume a previous value.
    pub fn requires_prior_value(&self) -> bool {
        !self.data.initialization
    }

    pub fn null_check(&self) -> bool {
        self.data.access.null_check
    }

    pub fn order(&self) -> MemoryOrder {
        self.data.access.order
    }

    pub fn guard(&self) -> Option<NodeId> {
        self.node.input(WriteData::GUARD)
    }

    pub fn state_after(&self) -> Option<NodeId> {
        self.node.input(WriteData::STATE_AFTER)
    }

    pub fn last_location_access(&self) -> Option<NodeId> {
        self.node.input(WriteData::LAST_LOCATION_ACCESS)
    }

    /// Always true.
    pub fn has_side_effect(&self) -> bool {
        self.node.has_side_effect()
    }
}

/// Read-only view of an alive compare-and-swap node.
#[derive(Debug, Clone, Copy)]
pub struct CasView<'g> {
    pub id: NodeId,
    node: &'g Node,
    data: &'g CasData,
    control: NodeId,
    object: NodeId,
    offset: NodeId,
    expected: NodeId,
    new_value: NodeId,
}

impl CasView<'_> {
    pub fn control(&self) -> NodeId {
        self.control
    }

    pub fn object(&self) -> NodeId {
        self.object
    }

    pub fn offset(&self) -> NodeId {
        self.offset
    }

    pub fn expected(&self) -> NodeId {
        self.expected
    }

    pub fn new_value(&self) -> NodeId {
        self.new_value
    }

    pub fn value_kind(&self) -> ValueKind {
        self.data.value_kind
    }

    pub fn location(&self) -> LocationId {
        self.data.location
    }

    pub fn state_after(&self) -> Option<NodeId> {
        self.node.input(CasData::STATE_AFTER)
    }

    pub fn stamp(&self) -> Stamp {
        self.node.stamp()
    }

    pub fn has_side_effect(&self) -> bool {
        self.node.has_side_effect()
    }
}

// =============================================================================
// Tests
// =============================================================================
