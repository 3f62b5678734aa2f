//! Node definitions for the memory layer of the Sea-of-Nodes IR.
//!
//! A node is a closed [`NodeKind`] plus an ordered list of input slots. Each
//! kind declares a fixed slot layout (name, input type, whether the slot may
//! be empty) and optionally a variadic tail. The graph uses the layout to
//! validate every edge it creates, and the kind to answer capability
//! questions (is it fixed, lowerable, a memory checkpoint, ...).
//!
//! # Node Categories
//!
//! - **Fixed nodes** take their control predecessor in slot 0 and are
//!   anchored at that position: start, allocation, guards, memory accesses,
//!   and everything lowering produces.
//! - **Floating nodes** (constants, parameters, addresses, frame states) have
//!   no control input.
//! - **Lowerable nodes** (`Read`, `Write`, `CompareAndSwap`) are replaced by
//!   machine-level sequences during lowering.

use smallvec::SmallVec;

use super::access::{
    AtomicCasData, CasData, FenceKind, RawAccessData, ReadData, WriteBarrierKind, WriteData,
};
use super::arena::Id;
use super::location::LocationId;
use super::types::Stamp;

/// Unique identifier for a node in its graph.
pub type NodeId = Id<Node>;

/// Slot index of the control input on every fixed node.
pub const CONTROL: usize = 0;

// =============================================================================
// Input Types
// =============================================================================

/// The role an input edge plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    /// A data value.
    Value,
    /// The control predecessor of a fixed node.
    Control,
    /// A memory ordering witness (last location access).
    Memory,
    /// A deoptimization frame state.
    State,
    /// A condition that must hold before the user may execute.
    Guard,
    /// A computed address.
    Address,
}

impl InputType {
    pub const fn as_flag(self) -> InputTypes {
        match self {
            InputType::Value => InputTypes::VALUE,
            InputType::Control => InputTypes::CONTROL,
            InputType::Memory => InputTypes::MEMORY,
            InputType::State => InputTypes::STATE,
            InputType::Guard => InputTypes::GUARD,
            InputType::Address => InputTypes::ADDRESS,
        }
    }

    pub const ALL: [InputType; 6] = [
        InputType::Value,
        InputType::Control,
        InputType::Memory,
        InputType::State,
        InputType::Guard,
        InputType::Address,
    ];
}

bitflags::bitflags! {
    /// Set of input types a node may be referenced as.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct InputTypes: u8 {
        const VALUE = 0b0000_0001;
        const CONTROL = 0b0000_0010;
        const MEMORY = 0b0000_0100;
        const STATE = 0b0000_1000;
        const GUARD = 0b0001_0000;
        const ADDRESS = 0b0010_0000;
    }
}

impl InputTypes {
    #[inline]
    pub const fn allows(self, ty: InputType) -> bool {
        self.contains(ty.as_flag())
    }
}

// =============================================================================
// Slot Layouts
// =============================================================================

/// Static description of one input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub name: &'static str,
    pub input_type: InputType,
    pub optional: bool,
}

impl SlotInfo {
    const fn required(name: &'static str, input_type: InputType) -> Self {
        SlotInfo {
            name,
            input_type,
            optional: false,
        }
    }

    const fn optional(name: &'static str, input_type: InputType) -> Self {
        SlotInfo {
            name,
            input_type,
            optional: true,
        }
    }
}

const CONTROL_SLOT: SlotInfo = SlotInfo::required("control", InputType::Control);
const ADDRESS_SLOT: SlotInfo = SlotInfo::required("address", InputType::Address);
const GUARD_SLOT: SlotInfo = SlotInfo::optional("guard", InputType::Guard);
const STATE_SLOT: SlotInfo = SlotInfo::optional("state_after", InputType::State);

const NO_INPUTS: &[SlotInfo] = &[];
const CONTROL_ONLY: &[SlotInfo] = &[CONTROL_SLOT];
const OFFSET_ADDRESS: &[SlotInfo] = &[
    SlotInfo::required("base", InputType::Value),
    SlotInfo::required("offset", InputType::Value),
];
const NULL_CHECK: &[SlotInfo] = &[CONTROL_SLOT, SlotInfo::required("object", InputType::Value)];
const READ: &[SlotInfo] = &[
    CONTROL_SLOT,
    ADDRESS_SLOT,
    GUARD_SLOT,
    SlotInfo::optional("last_location_access", InputType::Memory),
];
const WRITE: &[SlotInfo] = &[
    CONTROL_SLOT,
    ADDRESS_SLOT,
    SlotInfo::required("value", InputType::Value),
    GUARD_SLOT,
    STATE_SLOT,
    SlotInfo::optional("last_location_access", InputType::Memory),
];
const COMPARE_AND_SWAP: &[SlotInfo] = &[
    CONTROL_SLOT,
    SlotInfo::required("object", InputType::Value),
    SlotInfo::required("offset", InputType::Value),
    SlotInfo::required("expected", InputType::Value),
    SlotInfo::required("new_value", InputType::Value),
    STATE_SLOT,
];
const RAW_LOAD: &[SlotInfo] = &[
    CONTROL_SLOT,
    ADDRESS_SLOT,
    GUARD_SLOT,
    SlotInfo::optional("memory", InputType::Memory),
];
const RAW_STORE: &[SlotInfo] = &[
    CONTROL_SLOT,
    ADDRESS_SLOT,
    SlotInfo::required("value", InputType::Value),
    GUARD_SLOT,
    SlotInfo::optional("memory", InputType::Memory),
    STATE_SLOT,
];
const ATOMIC_CAS: &[SlotInfo] = &[
    CONTROL_SLOT,
    ADDRESS_SLOT,
    SlotInfo::required("expected", InputType::Value),
    SlotInfo::required("new_value", InputType::Value),
    STATE_SLOT,
];
const WRITE_BARRIER: &[SlotInfo] = &[
    CONTROL_SLOT,
    ADDRESS_SLOT,
    SlotInfo::optional("value", InputType::Value),
];
const RETURN: &[SlotInfo] = &[CONTROL_SLOT, SlotInfo::optional("result", InputType::Value)];

// =============================================================================
// Node Kind
// =============================================================================

/// Static cost estimate used by scheduling heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeCost {
    pub cycles: u8,
    pub size: u8,
}

impl NodeCost {
    const fn new(cycles: u8, size: u8) -> Self {
        NodeCost { cycles, size }
    }
}

/// What a node is. Closed set; capabilities are answered by matching on it.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Control entry; also the initial memory state on every location.
    Start,
    Parameter(u16),
    ConstInt(i64),
    ConstNull,
    /// Object allocation of `size` bytes. Checkpoints `INIT_LOCATION`.
    NewInstance { size: u32 },
    /// `base + offset`.
    OffsetAddress,
    /// Deoptimization state at `bci`; inputs are the live values.
    FrameState { bci: u32 },
    /// Explicit non-null guard on an object.
    NullCheckGuard,
    Read(ReadData),
    Write(WriteData),
    CompareAndSwap(CasData),

    // Lowered forms
    /// Implicit null check emitted by lowering.
    NullCheck,
    RawLoad(RawAccessData),
    RawStore(RawAccessData),
    AtomicCas(AtomicCasData),
    MemoryBarrier(FenceKind),
    WriteBarrier(WriteBarrierKind),

    Return,
}

impl NodeKind {
    pub const fn name(&self) -> &'static str {
        match self {
            NodeKind::Start => "Start",
            NodeKind::Parameter(_) => "Parameter",
            NodeKind::ConstInt(_) => "ConstInt",
            NodeKind::ConstNull => "ConstNull",
            NodeKind::NewInstance { .. } => "NewInstance",
            NodeKind::OffsetAddress => "OffsetAddress",
            NodeKind::FrameState { .. } => "FrameState",
            NodeKind::NullCheckGuard => "NullCheckGuard",
            NodeKind::Read(_) => "Read",
            NodeKind::Write(_) => "Write",
            NodeKind::CompareAndSwap(_) => "CompareAndSwap",
            NodeKind::NullCheck => "NullCheck",
            NodeKind::RawLoad(_) => "RawLoad",
            NodeKind::RawStore(_) => "RawStore",
            NodeKind::AtomicCas(_) => "AtomicCas",
            NodeKind::MemoryBarrier(_) => "MemoryBarrier",
            NodeKind::WriteBarrier(_) => "WriteBarrier",
            NodeKind::Return => "Return",
        }
    }

    /// Fixed input slots of this kind.
    pub const fn layout(&self) -> &'static [SlotInfo] {
        match self {
            NodeKind::Start
            | NodeKind::Parameter(_)
            | NodeKind::ConstInt(_)
            | NodeKind::ConstNull
            | NodeKind::FrameState { .. } => NO_INPUTS,
            NodeKind::NewInstance { .. } | NodeKind::MemoryBarrier(_) => CONTROL_ONLY,
            NodeKind::OffsetAddress => OFFSET_ADDRESS,
            NodeKind::NullCheckGuard | NodeKind::NullCheck => NULL_CHECK,
            NodeKind::Read(_) => READ,
            NodeKind::Write(_) => WRITE,
            NodeKind::CompareAndSwap(_) => COMPARE_AND_SWAP,
            NodeKind::RawLoad(_) => RAW_LOAD,
            NodeKind::RawStore(_) => RAW_STORE,
            NodeKind::AtomicCas(_) => ATOMIC_CAS,
            NodeKind::WriteBarrier(_) => WRITE_BARRIER,
            NodeKind::Return => RETURN,
        }
    }

    /// Input type of the variadic tail, for kinds that have one.
    pub const fn variadic(&self) -> Option<InputType> {
        match self {
            NodeKind::FrameState { .. } => Some(InputType::Value),
            _ => None,
        }
    }

    /// Anchored in control flow (takes a control input or is the start).
    pub const fn is_fixed(&self) -> bool {
        !matches!(
            self,
            NodeKind::Parameter(_)
                | NodeKind::ConstInt(_)
                | NodeKind::ConstNull
                | NodeKind::OffsetAddress
                | NodeKind::FrameState { .. }
        )
    }

    /// Replaced by a machine-level expansion during lowering.
    pub const fn is_lowerable(&self) -> bool {
        matches!(
            self,
            NodeKind::Read(_) | NodeKind::Write(_) | NodeKind::CompareAndSwap(_)
        )
    }

    /// Writes never count as side-effect free, whatever a pass believes
    /// about the stored value.
    pub const fn has_side_effect(&self) -> bool {
        matches!(
            self,
            NodeKind::Write(_)
                | NodeKind::CompareAndSwap(_)
                | NodeKind::RawStore(_)
                | NodeKind::AtomicCas(_)
                | NodeKind::MemoryBarrier(_)
                | NodeKind::WriteBarrier(_)
        )
    }

    /// Usage types other nodes may reference this node as.
    ///
    /// Accesses that perform an implicit null check may additionally serve
    /// as a guard for dependent nodes.
    pub const fn allowed_usages(&self) -> InputTypes {
        let fixed = InputTypes::CONTROL;
        match self {
            NodeKind::Start => fixed.union(InputTypes::MEMORY),
            NodeKind::Parameter(_) | NodeKind::ConstInt(_) | NodeKind::ConstNull => InputTypes::VALUE,
            NodeKind::NewInstance { .. } => fixed.union(InputTypes::VALUE).union(InputTypes::MEMORY),
            NodeKind::OffsetAddress => InputTypes::ADDRESS,
            NodeKind::FrameState { .. } => InputTypes::STATE,
            NodeKind::NullCheckGuard | NodeKind::NullCheck => fixed.union(InputTypes::GUARD),
            NodeKind::Read(data) => {
                let base = fixed.union(InputTypes::VALUE).union(InputTypes::MEMORY);
                if data.access.null_check {
                    base.union(InputTypes::GUARD)
                } else {
                    base
                }
            }
            NodeKind::Write(data) => {
                let base = fixed.union(InputTypes::MEMORY);
                if data.access.null_check {
                    base.union(InputTypes::GUARD)
                } else {
                    base
                }
            }
            NodeKind::CompareAndSwap(_) | NodeKind::RawLoad(_) | NodeKind::AtomicCas(_) => {
                fixed.union(InputTypes::VALUE).union(InputTypes::MEMORY)
            }
            NodeKind::RawStore(_) | NodeKind::MemoryBarrier(_) => fixed.union(InputTypes::MEMORY),
            NodeKind::WriteBarrier(_) => fixed,
            NodeKind::Return => InputTypes::empty(),
        }
    }

    /// The location identity this node reads or kills, if any.
    pub const fn location(&self) -> Option<LocationId> {
        match self {
            NodeKind::Read(data) => Some(data.access.location),
            NodeKind::Write(data) => Some(data.access.location),
            NodeKind::CompareAndSwap(data) => Some(data.location),
            NodeKind::RawLoad(data) | NodeKind::RawStore(data) => Some(data.location),
            NodeKind::AtomicCas(data) => Some(data.location),
            _ => None,
        }
    }

    pub const fn cost(&self) -> NodeCost {
        match self {
            NodeKind::Start
            | NodeKind::Parameter(_)
            | NodeKind::FrameState { .. }
            | NodeKind::OffsetAddress => NodeCost::new(0, 0),
            NodeKind::ConstInt(_) | NodeKind::ConstNull => NodeCost::new(1, 1),
            NodeKind::NewInstance { .. } => NodeCost::new(8, 8),
            NodeKind::NullCheckGuard | NodeKind::NullCheck => NodeCost::new(2, 2),
            NodeKind::Read(_) | NodeKind::RawLoad(_) => NodeCost::new(2, 1),
            NodeKind::Write(_) | NodeKind::RawStore(_) => NodeCost::new(3, 1),
            NodeKind::CompareAndSwap(_) | NodeKind::AtomicCas(_) => NodeCost::new(30, 8),
            NodeKind::MemoryBarrier(_) => NodeCost::new(20, 2),
            NodeKind::WriteBarrier(_) => NodeCost::new(4, 4),
            NodeKind::Return => NodeCost::new(2, 1),
        }
    }
}

// =============================================================================
// Node State
// =============================================================================

/// Graph membership of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Allocated but not yet inserted; holds no usage edges.
    Detached,
    /// Alive in the graph.
    Attached,
    /// Replaced (lowered or substituted); kept for diagnostics only.
    Replaced,
    /// Deleted.
    Deleted,
}

impl NodeState {
    #[inline]
    pub const fn is_alive(self) -> bool {
        matches!(self, NodeState::Attached)
    }
}

bitflags::bitflags! {
    /// Per-node marks set by passes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// Created by a lowering expansion.
        const LOWERED = 0b0000_0001;
        /// Must stay at its control position even if it could float.
        const PINNED = 0b0000_0010;
    }
}

// =============================================================================
// Node
// =============================================================================

/// A node of the memory-layer graph.
///
/// Input slots may only be changed through the graph, which keeps the usage
/// multimap in sync.
#[derive(Clone)]
pub struct Node {
    kind: NodeKind,
    stamp: Stamp,
    pub(crate) inputs: SmallVec<[Option<NodeId>; 6]>,
    pub(crate) state: NodeState,
    /// Bytecode index (for deoptimization and debugging).
    pub bci: u32,
    pub flags: NodeFlags,
}

impl Node {
    /// Create a detached node with every fixed slot empty.
    pub fn new(kind: NodeKind, stamp: Stamp) -> Self {
        let slots = kind.layout().len();
        Node {
            kind,
            stamp,
            inputs: SmallVec::from_elem(None, slots),
            state: NodeState::Detached,
            bci: 0,
            flags: NodeFlags::empty(),
        }
    }

    /// Create a detached node with the given slot contents.
    ///
    /// Entries past the fixed layout form the variadic tail.
    pub fn with_inputs(kind: NodeKind, stamp: Stamp, inputs: &[Option<NodeId>]) -> Self {
        let mut node = Node::new(kind, stamp);
        for (slot, input) in inputs.iter().enumerate() {
            if slot < node.inputs.len() {
                node.inputs[slot] = *input;
            } else {
                node.inputs.push(*input);
            }
        }
        node
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[inline]
    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    #[inline]
    pub fn state(&self) -> NodeState {
        self.state
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    /// Content of `slot`, `None` if empty or out of range.
    #[inline]
    pub fn input(&self, slot: usize) -> Option<NodeId> {
        self.inputs.get(slot).copied().flatten()
    }

    /// All slots, including empty optional ones.
    #[inline]
    pub fn input_slots(&self) -> &[Option<NodeId>] {
        &self.inputs
    }

    /// Present inputs in slot order.
    pub fn inputs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inputs.iter().filter_map(|slot| *slot)
    }

    /// Layout entry for `slot`, covering the variadic tail.
    pub fn slot_info(&self, slot: usize) -> Option<SlotInfo> {
        let layout = self.kind.layout();
        if let Some(info) = layout.get(slot) {
            return Some(*info);
        }
        match self.kind.variadic() {
            Some(input_type) if slot < self.inputs.len() => Some(SlotInfo {
                name: "values",
                input_type,
                optional: false,
            }),
            _ => None,
        }
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.kind.is_fixed()
    }

    #[inline]
    pub fn has_side_effect(&self) -> bool {
        self.kind.has_side_effect()
    }

    #[inline]
    pub fn location(&self) -> Option<LocationId> {
        self.kind.location()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind.name())?;
        if !self.inputs.is_empty() {
            write!(f, " [")?;
            for (i, slot) in self.inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match slot {
                    Some(id) => write!(f, "{id:?}")?,
                    None => write!(f, "-")?,
                }
            }
            write!(f, "]")?;
        }
        write!(f, " : {} ({:?})", self.stamp, self.state)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::access::{AccessData, BarrierType, MemoryOrder};
    use crate::ir::types::ValueKind;

    fn access(null_check: bool) -> AccessData {
        AccessData {
            location: LocationId::new(2),
            barrier: BarrierType::None,
            null_check,
            order: MemoryOrder::Plain,
        }
    }

    #[test]
    fn test_new_node_has_empty_slots() {
        let node = Node::new(
            NodeKind::Write(WriteData {
                access: access(false),
                initialization: false,
            }),
            Stamp::void(),
        );
        assert_eq!(node.input_slots().len(), 6);
        assert_eq!(node.inputs().count(), 0);
        assert_eq!(node.state(), NodeState::Detached);
        assert!(!node.is_alive());
    }

    #[test]
    fn test_with_inputs_fills_variadic_tail() {
        let values = [Some(NodeId::new(1)), Some(NodeId::new(2)), Some(NodeId::new(3))];
        let node = Node::with_inputs(NodeKind::FrameState { bci: 7 }, Stamp::State, &values);

        assert_eq!(node.input_slots().len(), 3);
        assert_eq!(node.input(2), Some(NodeId::new(3)));
        assert_eq!(node.slot_info(1).map(|s| s.input_type), Some(InputType::Value));
        assert_eq!(node.slot_info(3), None);
    }

    #[test]
    fn test_write_layout() {
        let kind = NodeKind::Write(WriteData {
            access: access(false),
            initialization: true,
        });
        let names: Vec<_> = kind.layout().iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            ["control", "address", "value", "guard", "state_after", "last_location_access"]
        );
        assert!(kind.layout()[4].optional);
        assert_eq!(kind.layout()[5].input_type, InputType::Memory);
    }

    #[test]
    fn test_write_guard_usage_requires_null_check() {
        let plain = NodeKind::Write(WriteData {
            access: access(false),
            initialization: false,
        });
        let checked = NodeKind::Write(WriteData {
            access: access(true),
            initialization: false,
        });

        assert!(!plain.allowed_usages().allows(InputType::Guard));
        assert!(checked.allowed_usages().allows(InputType::Guard));
        assert!(plain.allowed_usages().allows(InputType::Memory));
        assert!(!plain.allowed_usages().allows(InputType::Value));
    }

    #[test]
    fn test_capabilities() {
        let cas = NodeKind::CompareAndSwap(CasData {
            value_kind: ValueKind::Int,
            location: LocationId::new(3),
        });
        assert!(cas.is_lowerable());
        assert!(cas.has_side_effect());
        assert!(cas.is_fixed());
        assert_eq!(cas.cost(), NodeCost { cycles: 30, size: 8 });
        assert_eq!(cas.location(), Some(LocationId::new(3)));

        assert!(!NodeKind::OffsetAddress.is_fixed());
        assert!(!NodeKind::ConstNull.has_side_effect());
        assert!(!NodeKind::MemoryBarrier(FenceKind::Full).is_lowerable());
        assert!(NodeKind::Return.allowed_usages().is_empty());
    }

    #[test]
    fn test_debug_format() {
        let node = Node::with_inputs(
            NodeKind::OffsetAddress,
            Stamp::Address,
            &[Some(NodeId::new(4)), None],
        );
        assert_eq!(format!("{node:?}"), "OffsetAddress [#4, -] : address (Detached)");
    }
}
