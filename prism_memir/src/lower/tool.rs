//! The lowering protocol.
//!
//! A [`LoweringTool`] builds the machine-level expansion of one lowerable
//! node and reports, per usage type, which expansion node takes over.
//! [`Graph::lower_node`] then does the bookkeeping: it checks that every
//! usage of the original has a legal target and that the expansion still
//! kills every location the original killed, rewires the usages, and
//! retires the original with all its edges severed.
//!
//! Nothing is rewired unless the whole replacement checks out. When the tool
//! or the checks fail, every node added since the call is deleted again, so
//! the graph is left as it was.

use smallvec::SmallVec;

use crate::ir::error::{violation, GraphError, GraphResult};
use crate::ir::graph::Graph;
use crate::ir::memory::MemoryCheckpoint;
use crate::ir::node::{InputType, NodeFlags, NodeId, SlotInfo};

/// Expansion of one lowered node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacement {
    /// Last fixed node of the expansion; takes over `Control` usages.
    pub control: Option<NodeId>,
    /// Takes over `Value` usages.
    pub value: Option<NodeId>,
    /// Takes over `Memory` usages (last-location-access witnesses).
    pub memory: Option<NodeId>,
    /// Takes over `Guard` usages.
    pub guard: Option<NodeId>,
    /// Every node the expansion created, fixed ones in control order.
    pub nodes: SmallVec<[NodeId; 8]>,
}

impl Replacement {
    /// The node standing in for usages of `input_type`.
    pub fn target(&self, input_type: InputType) -> Option<NodeId> {
        match input_type {
            InputType::Control => self.control,
            InputType::Value => self.value,
            InputType::Memory => self.memory,
            InputType::Guard => self.guard,
            InputType::State | InputType::Address => None,
        }
    }
}

/// Target-specific expansion logic.
///
/// `lower` is called exactly once per lowerable node. It may add nodes to
/// the graph but must not touch the usages of `node`; the graph rewires them
/// from the returned [`Replacement`].
pub trait LoweringTool {
    fn lower(&mut self, graph: &mut Graph, node: NodeId) -> GraphResult<Replacement>;
}

impl Graph {
    /// Replace the lowerable node `id` by the expansion `tool` builds.
    ///
    /// On success `id` is [`Replaced`](crate::ir::NodeState::Replaced) with
    /// no input and no usage edges, and every former user references the
    /// expansion instead.
    pub fn lower_node(&mut self, id: NodeId, tool: &mut dyn LoweringTool) -> GraphResult<Replacement> {
        let node = self.require_alive(id)?;
        let name = node.kind().name();
        if !node.kind().is_lowerable() {
            return Err(violation(GraphError::UnexpectedKind {
                node: id,
                expected: "lowerable node",
                found: name,
            }));
        }
        let checkpoint = self.memory_checkpoint(id);
        let mark = self.len();

        let replacement = match tool.lower(self, id) {
            Ok(replacement) => replacement,
            Err(err) => {
                self.discard_since(mark);
                return Err(err);
            }
        };
        let slots = self.usage_slots(id);
        if let Err(err) = self.check_replacement(id, checkpoint.as_ref(), &replacement, &slots) {
            self.discard_since(mark);
            return Err(err);
        }

        for input_type in InputType::ALL {
            let used = slots.iter().any(|(_, _, info)| info.input_type == input_type);
            if let (true, Some(target)) = (used, replacement.target(input_type)) {
                self.replace_at_usages_of_type(id, input_type, Some(target))?;
            }
        }
        self.retire(id)?;

        for &created in &replacement.nodes {
            if self.is_alive(created) {
                self.node_mut(created).flags |= NodeFlags::LOWERED;
            }
        }
        tracing::debug!(node = %id, kind = name, expansion = replacement.nodes.len(), "lowered");
        Ok(replacement)
    }

    /// Every usage of `id` needs a target that allows it, and the expansion
    /// must still kill every location `id` killed.
    fn check_replacement(
        &self,
        id: NodeId,
        checkpoint: Option<&MemoryCheckpoint>,
        replacement: &Replacement,
        slots: &[(NodeId, usize, SlotInfo)],
    ) -> GraphResult<()> {
        for &(user, _, info) in slots {
            let target = replacement.target(info.input_type).ok_or_else(|| {
                violation(GraphError::MissingReplacement {
                    node: id,
                    input_type: info.input_type,
                })
            })?;
            let target_kind = self.require_alive(target)?.kind();
            if !target_kind.allowed_usages().allows(info.input_type) {
                return Err(violation(GraphError::DisallowedUsage {
                    node: user,
                    input: target,
                    input_kind: target_kind.name(),
                    input_type: info.input_type,
                }));
            }
        }

        let Some(checkpoint) = checkpoint else {
            return Ok(());
        };
        let universe = self.locations();
        let expansion = replacement
            .nodes
            .iter()
            .filter_map(|&n| self.memory_checkpoint(n))
            .reduce(|a, b| a.join(b, universe));
        let covered = expansion.as_ref().is_some_and(|killed| {
            checkpoint
                .locations()
                .iter()
                .all(|&location| killed.covers(universe, location))
        });
        if covered {
            Ok(())
        } else {
            Err(violation(GraphError::MissingReplacement {
                node: id,
                input_type: InputType::Memory,
            }))
        }
    }

    /// Delete the nodes allocated since `mark`, newest first.
    fn discard_since(&mut self, mark: usize) {
        let created: SmallVec<[NodeId; 8]> = self.ids().skip(mark).collect();
        let mut discarded = 0;
        for &node in created.iter().rev() {
            if self.is_alive(node) && self.usage_count(node) == 0 && self.delete(node).is_ok() {
                discarded += 1;
            }
        }
        tracing::debug!(discarded, "discarded failed expansion");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::access::{BarrierType, FenceKind, MemoryOrder, RawAccessData, ReadParams, WriteParams};
    use crate::ir::error::Invariant;
    use crate::ir::location::LocationId;
    use crate::ir::node::{Node, NodeKind, NodeState, CONTROL};
    use crate::ir::types::{Stamp, ValueKind};

    /// Lowers a write to a bare raw store, optionally dropping parts of the
    /// replacement.
    struct StoreOnly {
        report_control: bool,
        keep_store: bool,
    }

    impl LoweringTool for StoreOnly {
        fn lower(&mut self, graph: &mut Graph, node: NodeId) -> GraphResult<Replacement> {
            let write = graph.as_write(node).ok_or(GraphError::UnknownNode(node))?;
            let (control, address, value, location) =
                (write.control(), write.address(), write.value(), write.location());
            let kind = if self.keep_store {
                NodeKind::RawStore(RawAccessData {
                    location,
                    kind: ValueKind::Int,
                    order: MemoryOrder::Plain,
                })
            } else {
                NodeKind::NullCheck
            };
            let inputs = if self.keep_store {
                vec![Some(control), Some(address), Some(value)]
            } else {
                vec![Some(control), graph.input(address, 0)]
            };
            let store = graph.add(Node::with_inputs(kind, Stamp::void(), &inputs))?;
            Ok(Replacement {
                control: self.report_control.then_some(store),
                memory: self.keep_store.then_some(store),
                nodes: SmallVec::from_slice(&[store]),
                ..Default::default()
            })
        }
    }

    fn write_then_read(g: &mut Graph) -> (NodeId, NodeId, LocationId) {
        let obj = g.new_instance(g.start(), 16).unwrap();
        let offset = g.const_int(8, ValueKind::Long);
        let address = g.offset_address(obj, offset).unwrap();
        let x = g.locations_mut().field("Point", "x", ValueKind::Int);
        let value = g.const_int(7, ValueKind::Int);
        let w = g
            .add_write(WriteParams::new(obj, address, x, value, BarrierType::None))
            .unwrap();
        let r = g
            .add_read(ReadParams::new(w, address, x).with_last_location_access(w))
            .unwrap();
        (w, r, x)
    }

    #[test]
    fn test_lower_node_rewires_by_usage_type() {
        let mut g = Graph::new();
        let (w, r, _) = write_then_read(&mut g);
        let mut tool = StoreOnly {
            report_control: true,
            keep_store: true,
        };

        let replacement = g.lower_node(w, &mut tool).unwrap();
        let store = replacement.control.unwrap();

        assert_eq!(g.state(w), Some(NodeState::Replaced));
        assert_eq!(g.usage_count(w), 0);
        assert_eq!(g.node(w).inputs().count(), 0);
        assert_eq!(g.node(r).input(CONTROL), Some(store));
        assert_eq!(g.memory_access(r).unwrap().last_location_access, Some(store));
        assert!(g.node(store).flags.contains(NodeFlags::LOWERED));
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_missing_replacement_leaves_original_alive() {
        let mut g = Graph::new();
        let (w, r, _) = write_then_read(&mut g);
        let obj = g.node(w).input(CONTROL).unwrap();
        let (live_before, successors_before) = (g.live_count(), g.control_successors(obj));
        let mut tool = StoreOnly {
            report_control: false,
            keep_store: true,
        };

        let err = g.lower_node(w, &mut tool).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingReplacement {
                node: w,
                input_type: InputType::Control
            }
        );
        assert!(g.is_alive(w));
        assert_eq!(g.node(r).input(CONTROL), Some(w));
        assert_eq!(g.live_count(), live_before);
        assert_eq!(g.control_successors(obj), successors_before);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_expansion_must_keep_memory_effect() {
        let mut g = Graph::new();
        let obj = g.new_instance(g.start(), 16).unwrap();
        let offset = g.const_int(8, ValueKind::Long);
        let address = g.offset_address(obj, offset).unwrap();
        let x = g.locations_mut().field("Point", "x", ValueKind::Int);
        let value = g.const_int(7, ValueKind::Int);
        let w = g
            .add_write(WriteParams::new(obj, address, x, value, BarrierType::None))
            .unwrap();
        let live_before = g.live_count();
        let mut tool = StoreOnly {
            report_control: true,
            keep_store: false,
        };

        let err = g.lower_node(w, &mut tool).unwrap_err();
        assert_eq!(err.invariant(), Invariant::NoDanglingUsages);
        assert!(g.is_alive(w));
        assert_eq!(g.live_count(), live_before);
        assert_eq!(g.control_successors(obj).as_slice(), &[w]);
    }

    /// Adds a fence behind the node, then gives up.
    struct FenceThenFail;

    impl LoweringTool for FenceThenFail {
        fn lower(&mut self, graph: &mut Graph, node: NodeId) -> GraphResult<Replacement> {
            let control = graph.input(node, CONTROL);
            let fence = graph.add(Node::with_inputs(
                NodeKind::MemoryBarrier(FenceKind::Full),
                Stamp::void(),
                &[control],
            ))?;
            Err(GraphError::UnexpectedKind {
                node: fence,
                expected: "nothing",
                found: "MemoryBarrier",
            })
        }
    }

    #[test]
    fn test_failing_tool_leaves_graph_unchanged() {
        let mut g = Graph::new();
        let (w, _, _) = write_then_read(&mut g);
        let obj = g.node(w).input(CONTROL).unwrap();
        let live_before = g.live_count();

        assert!(g.lower_node(w, &mut FenceThenFail).is_err());
        assert_eq!(g.live_count(), live_before);
        assert_eq!(g.control_successors(obj).as_slice(), &[w]);
        assert_eq!(g.state(NodeId::new(g.len() as u32 - 1)), Some(NodeState::Deleted));
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_only_lowerable_nodes() {
        let mut g = Graph::new();
        let obj = g.new_instance(g.start(), 16).unwrap();
        let mut tool = StoreOnly {
            report_control: true,
            keep_store: true,
        };

        let err = g.lower_node(obj, &mut tool).unwrap_err();
        assert!(matches!(err, GraphError::UnexpectedKind { .. }));

        let (w, _, _) = write_then_read(&mut g);
        g.lower_node(w, &mut tool).unwrap();
        let err = g.lower_node(w, &mut tool).unwrap_err();
        assert_eq!(err.invariant(), Invariant::Aliveness);
    }

    #[test]
    fn test_replacement_target() {
        let r = Replacement {
            control: Some(NodeId::new(1)),
            value: Some(NodeId::new(2)),
            ..Default::default()
        };
        assert_eq!(r.target(InputType::Control), Some(NodeId::new(1)));
        assert_eq!(r.target(InputType::Value), Some(NodeId::new(2)));
        assert_eq!(r.target(InputType::Memory), None);
        assert_eq!(r.target(InputType::State), None);
    }
}
