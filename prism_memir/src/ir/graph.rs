//! The memory-layer graph: node arena plus usage multimap.
//!
//! The graph provides:
//! - **Arena-based storage**: nodes are addressed by stable [`NodeId`]s
//! - **Usage chains**: for each node, which nodes hold an input edge to it
//! - **Transactional edge updates**: every mutation validates first, then
//!   updates both sides, so input/usage symmetry holds whenever an operation
//!   returns (successfully or not)
//! - **Explicit node states**: detached, attached, replaced, deleted
//!
//! # Invariants
//!
//! - For every input edge `A -> B`, `B`'s usage set contains `A` once per slot.
//! - No alive node holds an edge to a node that is not alive.
//! - Mandatory slots of an attached node are never empty.
//! - Every target allows the input type of the slot it occupies.
//!
//! A violation is a bug in the calling pass and is reported as a
//! [`GraphError`]; see [`Graph::verify`] for the full-graph check.

use std::sync::atomic::{AtomicU32, Ordering};

use smallvec::SmallVec;

use super::arena::{Arena, SecondaryMap};
use super::error::{violation, GraphError, GraphResult};
use super::location::LocationUniverse;
use super::node::{InputType, Node, NodeId, NodeKind, NodeState, SlotInfo, CONTROL};
use super::types::{Stamp, ValueKind};

type UsageList = SmallVec<[NodeId; 4]>;

static NEXT_GRAPH_ID: AtomicU32 = AtomicU32::new(0);

/// Identity of a graph, for diagnostics across concurrent compilations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u32);

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "graph{}", self.0)
    }
}

// =============================================================================
// Graph Structure
// =============================================================================

/// A Sea-of-Nodes graph for one compilation unit.
///
/// Owns its nodes, the usage multimap, and the location universe the nodes'
/// location identities are interned in. Mutation requires `&mut`, so one
/// graph is only ever changed by one compilation thread.
pub struct Graph {
    id: GraphId,

    /// Arena for node storage.
    nodes: Arena<Node>,

    /// Usage chains: for each node, the nodes that use it (once per slot).
    usages: SecondaryMap<Node, UsageList>,

    /// Location identities of this compilation.
    locations: LocationUniverse,

    /// The start node (control entry and initial memory state).
    start: NodeId,

    /// Bytecode index stamped on new nodes.
    next_bci: u32,
}

impl Graph {
    /// Create a graph containing only the start node.
    pub fn new() -> Self {
        let mut nodes = Arena::with_capacity(64);
        let mut start = Node::new(NodeKind::Start, Stamp::Control);
        start.state = NodeState::Attached;
        let start = nodes.alloc(start);

        Graph {
            id: GraphId(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed)),
            nodes,
            usages: SecondaryMap::new(),
            locations: LocationUniverse::new(),
            start,
            next_bci: 0,
        }
    }

    pub fn with_capacity(node_capacity: usize) -> Self {
        let mut graph = Self::new();
        graph.nodes.reserve(node_capacity);
        graph
    }

    #[inline]
    pub fn id(&self) -> GraphId {
        self.id
    }

    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    #[inline]
    pub fn locations(&self) -> &LocationUniverse {
        &self.locations
    }

    #[inline]
    pub fn locations_mut(&mut self) -> &mut LocationUniverse {
        &mut self.locations
    }

    /// Set the bytecode index for nodes created from now on.
    pub fn set_bci(&mut self, bci: u32) {
        self.next_bci = bci;
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    /// Get a node. Panics if `id` is not from this graph.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Mutable access for per-node marks (`flags`, `bci`). Edges and state
    /// are only reachable through graph operations.
    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Number of nodes ever allocated, including replaced and deleted ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether only the start node exists.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn state(&self, id: NodeId) -> Option<NodeState> {
        self.nodes.get(id).map(Node::state)
    }

    #[inline]
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(Node::is_alive)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        self.nodes.ids()
    }

    /// Alive nodes in allocation order.
    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().filter(|(_, node)| node.is_alive())
    }

    pub fn live_count(&self) -> usize {
        self.live_nodes().count()
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn checked(&self, id: NodeId) -> GraphResult<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| violation(GraphError::UnknownNode(id)))
    }

    pub(crate) fn require_alive(&self, id: NodeId) -> GraphResult<&Node> {
        let node = self.checked(id)?;
        if node.is_alive() {
            Ok(node)
        } else {
            Err(violation(GraphError::NotAlive {
                node: id,
                state: node.state(),
            }))
        }
    }

    /// Check that `input` may occupy a slot described by `info` on `user`.
    fn check_input(&self, user: NodeId, kind: &NodeKind, info: SlotInfo, input: Option<NodeId>) -> GraphResult<()> {
        let Some(input) = input else {
            if info.optional {
                return Ok(());
            }
            return Err(violation(GraphError::MandatoryInputMissing {
                node: user,
                kind: kind.name(),
                slot: info.name,
            }));
        };
        let target = self.require_alive(input)?;
        if !target.kind().allowed_usages().allows(info.input_type) {
            return Err(violation(GraphError::DisallowedUsage {
                node: user,
                input,
                input_kind: target.kind().name(),
                input_type: info.input_type,
            }));
        }
        Ok(())
    }

    fn check_all_inputs(&self, user: NodeId, node: &Node) -> GraphResult<()> {
        for (slot, input) in node.input_slots().iter().enumerate() {
            let info = node.slot_info(slot).ok_or_else(|| {
                violation(GraphError::ArityViolation {
                    node: user,
                    kind: node.kind().name(),
                    slot,
                })
            })?;
            self.check_input(user, node.kind(), info, *input)?;
        }
        Ok(())
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Validate and insert a node. Nothing is allocated if validation fails.
    pub fn add(&mut self, mut node: Node) -> GraphResult<NodeId> {
        let id = self.nodes.next_id();
        self.check_all_inputs(id, &node)?;

        node.bci = self.next_bci;
        node.state = NodeState::Attached;
        let id = self.nodes.alloc(node);
        self.register_inputs(id);
        tracing::trace!(node = %id, kind = self.nodes[id].kind().name(), "attached");
        Ok(id)
    }

    /// Allocate a node without inserting it. It holds no usage edges and is
    /// not alive until [`Graph::attach`] succeeds.
    pub fn add_detached(&mut self, mut node: Node) -> NodeId {
        node.bci = self.next_bci;
        node.state = NodeState::Detached;
        self.nodes.alloc(node)
    }

    /// Insert a detached node, registering its input edges.
    pub fn attach(&mut self, id: NodeId) -> GraphResult<()> {
        let node = self.checked(id)?;
        if node.state() != NodeState::Detached {
            return Err(violation(GraphError::InvalidState {
                node: id,
                state: node.state(),
                expected: NodeState::Detached,
            }));
        }
        self.check_all_inputs(id, node)?;

        self.nodes[id].state = NodeState::Attached;
        self.register_inputs(id);
        tracing::trace!(node = %id, "attached detached node");
        Ok(())
    }

    /// Leaf nodes have no inputs and cannot fail validation.
    fn add_leaf(&mut self, kind: NodeKind, stamp: Stamp) -> NodeId {
        let mut node = Node::new(kind, stamp);
        node.bci = self.next_bci;
        node.state = NodeState::Attached;
        self.nodes.alloc(node)
    }

    pub fn parameter(&mut self, index: u16, stamp: Stamp) -> NodeId {
        self.add_leaf(NodeKind::Parameter(index), stamp)
    }

    /// Integer constant with the stack stamp of `kind`.
    pub fn const_int(&mut self, value: i64, kind: ValueKind) -> NodeId {
        self.add_leaf(NodeKind::ConstInt(value), Stamp::for_kind(kind.stack_kind()))
    }

    pub fn const_null(&mut self) -> NodeId {
        self.add_leaf(NodeKind::ConstNull, Stamp::for_kind(ValueKind::Object))
    }

    /// Allocate an object of `size` bytes after `control`.
    pub fn new_instance(&mut self, control: NodeId, size: u32) -> GraphResult<NodeId> {
        self.add(Node::with_inputs(
            NodeKind::NewInstance { size },
            Stamp::object_non_null(),
            &[Some(control)],
        ))
    }

    /// `base + offset`.
    pub fn offset_address(&mut self, base: NodeId, offset: NodeId) -> GraphResult<NodeId> {
        self.add(Node::with_inputs(
            NodeKind::OffsetAddress,
            Stamp::Address,
            &[Some(base), Some(offset)],
        ))
    }

    /// Frame state at `bci` capturing `values`.
    pub fn frame_state(&mut self, bci: u32, values: &[NodeId]) -> GraphResult<NodeId> {
        let inputs: SmallVec<[Option<NodeId>; 8]> = values.iter().copied().map(Some).collect();
        self.add(Node::with_inputs(NodeKind::FrameState { bci }, Stamp::State, &inputs))
    }

    /// Guard that `object` is non-null, anchored after `control`.
    pub fn null_check_guard(&mut self, control: NodeId, object: NodeId) -> GraphResult<NodeId> {
        self.add(Node::with_inputs(
            NodeKind::NullCheckGuard,
            Stamp::void(),
            &[Some(control), Some(object)],
        ))
    }

    pub fn return_value(&mut self, control: NodeId, value: Option<NodeId>) -> GraphResult<NodeId> {
        self.add(Node::with_inputs(NodeKind::Return, Stamp::Control, &[Some(control), value]))
    }

    // =========================================================================
    // Usage Chains
    // =========================================================================

    /// Nodes that use `id`, once per input slot referencing it.
    pub fn usages(&self, id: NodeId) -> &[NodeId] {
        self.usages.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn usage_count(&self, id: NodeId) -> usize {
        self.usages(id).len()
    }

    /// Distinct users of `id`, in first-use order.
    pub fn users(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut users: SmallVec<[NodeId; 4]> = SmallVec::new();
        for &user in self.usages(id) {
            if !users.contains(&user) {
                users.push(user);
            }
        }
        users
    }

    #[inline]
    pub fn input(&self, node: NodeId, slot: usize) -> Option<NodeId> {
        self.nodes.get(node).and_then(|n| n.input(slot))
    }

    fn add_usage(&mut self, def: NodeId, user: NodeId) {
        self.usages.entry(def).push(user);
    }

    fn remove_usage(&mut self, def: NodeId, user: NodeId) {
        let uses = self.usages.entry(def);
        if let Some(pos) = uses.iter().position(|&u| u == user) {
            uses.swap_remove(pos);
        }
    }

    fn register_inputs(&mut self, id: NodeId) {
        let inputs: SmallVec<[NodeId; 8]> = self.nodes[id].inputs().collect();
        for input in inputs {
            self.add_usage(input, id);
        }
    }

    /// Remove every input edge of `id` (both sides), leaving slots empty.
    fn sever_inputs(&mut self, id: NodeId) {
        let inputs: SmallVec<[NodeId; 8]> = self.nodes[id].inputs().collect();
        for input in inputs {
            self.remove_usage(input, id);
        }
        self.nodes[id].inputs.clear();
    }

    /// `(user, slot, info)` for every slot referencing `def`.
    pub(crate) fn usage_slots(&self, def: NodeId) -> SmallVec<[(NodeId, usize, SlotInfo); 4]> {
        let mut slots = SmallVec::new();
        for user in self.users(def) {
            let node = &self.nodes[user];
            for (slot, input) in node.input_slots().iter().enumerate() {
                if *input == Some(def) {
                    if let Some(info) = node.slot_info(slot) {
                        slots.push((user, slot, info));
                    }
                }
            }
        }
        slots
    }

    // =========================================================================
    // Edge Mutation
    // =========================================================================

    /// Set `slot` of `node` to `input`, returning the previous content.
    pub fn set_input(&mut self, node: NodeId, slot: usize, input: Option<NodeId>) -> GraphResult<Option<NodeId>> {
        let user = self.require_alive(node)?;
        let info = user.slot_info(slot).ok_or_else(|| {
            violation(GraphError::ArityViolation {
                node,
                kind: user.kind().name(),
                slot,
            })
        })?;
        self.check_input(node, user.kind(), info, input)?;

        let old = user.input(slot);
        if old == input {
            return Ok(old);
        }
        if let Some(old) = old {
            self.remove_usage(old, node);
        }
        self.nodes[node].inputs[slot] = input;
        if let Some(new) = input {
            self.add_usage(new, node);
        }
        tracing::trace!(node = %node, slot = info.name, ?old, new = ?input, "set input");
        Ok(old)
    }

    /// Append to the variadic tail of `node`.
    pub fn add_input(&mut self, node: NodeId, input: NodeId) -> GraphResult<()> {
        let user = self.require_alive(node)?;
        let slot = user.input_slots().len();
        let Some(input_type) = user.kind().variadic() else {
            return Err(violation(GraphError::ArityViolation {
                node,
                kind: user.kind().name(),
                slot,
            }));
        };
        let info = SlotInfo {
            name: "values",
            input_type,
            optional: false,
        };
        self.check_input(node, user.kind(), info, Some(input))?;

        self.nodes[node].inputs.push(Some(input));
        self.add_usage(input, node);
        Ok(())
    }

    /// Remove a slot of the variadic tail. Fixed slots are cleared with
    /// [`Graph::set_input`] instead.
    pub fn remove_input(&mut self, node: NodeId, slot: usize) -> GraphResult<NodeId> {
        let user = self.require_alive(node)?;
        let fixed = user.kind().layout().len();
        let removed = match user.input_slots().get(slot) {
            Some(Some(input)) if slot >= fixed => *input,
            _ => {
                return Err(violation(GraphError::ArityViolation {
                    node,
                    kind: user.kind().name(),
                    slot,
                }))
            }
        };

        self.nodes[node].inputs.remove(slot);
        self.remove_usage(removed, node);
        Ok(removed)
    }

    /// Replace every occurrence of `old` among `node`'s inputs with `new`.
    /// Returns the number of slots changed.
    pub fn replace_input(&mut self, node: NodeId, old: NodeId, new: NodeId) -> GraphResult<usize> {
        let user = self.require_alive(node)?;
        let slots: SmallVec<[(usize, SlotInfo); 4]> = user
            .input_slots()
            .iter()
            .enumerate()
            .filter(|(_, input)| **input == Some(old))
            .filter_map(|(slot, _)| user.slot_info(slot).map(|info| (slot, info)))
            .collect();
        for &(_, info) in &slots {
            self.check_input(node, user.kind(), info, Some(new))?;
        }

        for &(slot, _) in &slots {
            self.remove_usage(old, node);
            self.nodes[node].inputs[slot] = Some(new);
            self.add_usage(new, node);
        }
        Ok(slots.len())
    }

    /// Redirect every usage of `old` to `new`.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) -> GraphResult<()> {
        self.require_alive(old)?;
        let target = self.require_alive(new)?;
        let slots = self.usage_slots(old);
        for &(user, _, info) in &slots {
            if !target.kind().allowed_usages().allows(info.input_type) {
                return Err(violation(GraphError::DisallowedUsage {
                    node: user,
                    input: new,
                    input_kind: target.kind().name(),
                    input_type: info.input_type,
                }));
            }
        }

        for (user, slot, _) in slots {
            self.remove_usage(old, user);
            self.nodes[user].inputs[slot] = Some(new);
            self.add_usage(new, user);
        }
        Ok(())
    }

    /// Redirect the usages of `old` that reference it as `input_type`.
    ///
    /// With `new == None` the slots are cleared, which fails for mandatory
    /// slots. Returns the number of slots changed.
    pub fn replace_at_usages_of_type(
        &mut self,
        old: NodeId,
        input_type: InputType,
        new: Option<NodeId>,
    ) -> GraphResult<usize> {
        self.require_alive(old)?;
        let slots: SmallVec<[(NodeId, usize, SlotInfo); 4]> = self
            .usage_slots(old)
            .into_iter()
            .filter(|(_, _, info)| info.input_type == input_type)
            .collect();
        for &(user, _, info) in &slots {
            let kind = self.nodes[user].kind();
            self.check_input(user, kind, info, new)?;
        }

        for &(user, slot, _) in &slots {
            self.remove_usage(old, user);
            self.nodes[user].inputs[slot] = new;
            if let Some(new) = new {
                self.add_usage(new, user);
            }
        }
        Ok(slots.len())
    }

    /// Delete a node that nothing uses any more, severing its inputs.
    pub fn delete(&mut self, id: NodeId) -> GraphResult<()> {
        let node = self.checked(id)?;
        match node.state() {
            NodeState::Detached => {}
            NodeState::Attached => {
                let count = self.usage_count(id);
                if count > 0 {
                    return Err(violation(GraphError::DanglingUsages { node: id, count }));
                }
                self.sever_inputs(id);
            }
            state => {
                return Err(violation(GraphError::NotAlive { node: id, state }));
            }
        }
        let node = &mut self.nodes[id];
        node.inputs.clear();
        node.state = NodeState::Deleted;
        tracing::trace!(node = %id, "deleted");
        Ok(())
    }

    /// Mark an alive node replaced once all its usages are gone.
    pub(crate) fn retire(&mut self, id: NodeId) -> GraphResult<()> {
        self.require_alive(id)?;
        let count = self.usage_count(id);
        if count > 0 {
            return Err(violation(GraphError::DanglingUsages { node: id, count }));
        }
        self.sever_inputs(id);
        self.nodes[id].state = NodeState::Replaced;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether `id` may be referenced through an input of `input_type`.
    pub fn is_allowed_usage_type(&self, id: NodeId, input_type: InputType) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|n| n.kind().allowed_usages().allows(input_type))
    }

    /// Control predecessor of a fixed node.
    pub fn control_predecessor(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(id)?;
        if node.is_fixed() {
            node.input(CONTROL)
        } else {
            None
        }
    }

    /// Fixed nodes that take `id` as their control predecessor.
    pub fn control_successors(&self, id: NodeId) -> SmallVec<[NodeId; 2]> {
        self.users(id)
            .into_iter()
            .filter(|&user| {
                let node = &self.nodes[user];
                node.is_fixed() && node.input(CONTROL) == Some(id)
            })
            .collect()
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check every graph invariant, returning the first violation.
    pub fn verify(&self) -> GraphResult<()> {
        for (id, node) in self.iter() {
            match node.state() {
                NodeState::Attached => {
                    self.check_all_inputs(id, node)?;
                    for input in node.inputs() {
                        let edges = node.inputs().filter(|&i| i == input).count();
                        let mirrored = self.usages(input).iter().filter(|&&u| u == id).count();
                        if edges != mirrored {
                            return Err(violation(GraphError::AsymmetricEdge { user: id, input }));
                        }
                    }
                    for &user in self.usages(id) {
                        let holds_edge = self
                            .nodes
                            .get(user)
                            .is_some_and(|u| u.is_alive() && u.inputs().any(|i| i == id));
                        if !holds_edge {
                            return Err(violation(GraphError::AsymmetricEdge { user, input: id }));
                        }
                    }
                }
                NodeState::Detached => {
                    if self.usage_count(id) > 0 {
                        return Err(violation(GraphError::DanglingUsages {
                            node: id,
                            count: self.usage_count(id),
                        }));
                    }
                }
                NodeState::Replaced | NodeState::Deleted => {
                    let count = self.usage_count(id) + node.inputs().count();
                    if count > 0 {
                        return Err(violation(GraphError::DanglingUsages { node: id, count }));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} ({} nodes, {} alive):", self.id, self.nodes.len(), self.live_count())?;
        for (id, node) in self.live_nodes() {
            write!(f, "  {id:?}: {node:?}")?;
            if let Some(location) = node.location() {
                write!(f, " @ {}", self.locations.describe(location))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
