//! Visiting orders for the lowering phase.
//!
//! The order is computed once, before any node is lowered, so expansion
//! nodes are never visited and every original lowerable node is visited
//! exactly once.

use crate::config::TraversalOrder;
use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;

/// Strategy deciding the order in which lowerable nodes are lowered.
pub trait LoweringSchedule {
    fn name(&self) -> &'static str;

    /// Every alive lowerable node of `graph`, each exactly once.
    fn order(&self, graph: &Graph) -> Vec<NodeId>;
}

/// Schedule for a configured traversal order.
pub fn schedule_for(order: TraversalOrder) -> Box<dyn LoweringSchedule> {
    match order {
        TraversalOrder::ControlFlow => Box::new(ControlFlowOrder),
        TraversalOrder::Creation => Box::new(CreationOrder),
    }
}

fn is_lowerable(graph: &Graph, id: NodeId) -> bool {
    graph
        .get(id)
        .is_some_and(|node| node.is_alive() && node.kind().is_lowerable())
}

// =============================================================================
// Control Flow Order
// =============================================================================

/// Reverse postorder over control successors, starting at the start node.
///
/// A node's last-location-access predecessor on the same control path is
/// lowered before it. Lowerable nodes unreachable from the start follow in
/// allocation order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlFlowOrder;

impl LoweringSchedule for ControlFlowOrder {
    fn name(&self) -> &'static str {
        "control-flow"
    }

    fn order(&self, graph: &Graph) -> Vec<NodeId> {
        let mut visited = BitSet::with_capacity(graph.len());
        let mut postorder = Vec::new();
        let mut stack = vec![(graph.start(), graph.control_successors(graph.start()), 0usize)];
        visited.insert(graph.start().as_usize());

        while let Some((node, successors, next)) = stack.last_mut() {
            if let Some(&succ) = successors.get(*next) {
                *next += 1;
                if visited.insert(succ.as_usize()) {
                    let succs = graph.control_successors(succ);
                    stack.push((succ, succs, 0));
                }
            } else {
                postorder.push(*node);
                stack.pop();
            }
        }

        let mut order: Vec<NodeId> = postorder
            .into_iter()
            .rev()
            .filter(|&id| is_lowerable(graph, id))
            .collect();
        order.extend(
            graph
                .ids()
                .filter(|&id| !visited.contains(id.as_usize()) && is_lowerable(graph, id)),
        );
        order
    }
}

// =============================================================================
// Creation Order
// =============================================================================

/// Allocation order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreationOrder;

impl LoweringSchedule for CreationOrder {
    fn name(&self) -> &'static str {
        "creation"
    }

    fn order(&self, graph: &Graph) -> Vec<NodeId> {
        graph.ids().filter(|&id| is_lowerable(graph, id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::access::{BarrierType, ReadParams, WriteParams};
    use crate::ir::types::ValueKind;

    #[test]
    fn test_control_flow_order_follows_control_chain() {
        let mut g = Graph::new();
        let obj = g.new_instance(g.start(), 16).unwrap();
        let offset = g.const_int(8, ValueKind::Long);
        let address = g.offset_address(obj, offset).unwrap();
        let x = g.locations_mut().field("Point", "x", ValueKind::Int);
        let value = g.const_int(1, ValueKind::Int);

        // Allocated in reverse of control order.
        let w = g
            .add_write(WriteParams::new(obj, address, x, value, BarrierType::None))
            .unwrap();
        let r = g.add_read(ReadParams::new(w, address, x)).unwrap();
        let w2 = g
            .add_write(WriteParams::new(obj, address, x, value, BarrierType::None))
            .unwrap();
        // Re-anchor the first write after the second one.
        g.set_input(w, 0, Some(w2)).unwrap();

        assert_eq!(ControlFlowOrder.order(&g), vec![w2, w, r]);
        assert_eq!(CreationOrder.order(&g), vec![w, r, w2]);
    }

    #[test]
    fn test_unreachable_nodes_are_still_visited() {
        let mut g = Graph::new();
        let obj = g.new_instance(g.start(), 16).unwrap();
        let offset = g.const_int(8, ValueKind::Long);
        let address = g.offset_address(obj, offset).unwrap();
        let x = g.locations_mut().field("Point", "x", ValueKind::Int);
        let value = g.const_int(1, ValueKind::Int);
        let w = g
            .add_write(WriteParams::new(obj, address, x, value, BarrierType::None))
            .unwrap();
        let r = g.add_read(ReadParams::new(w, address, x)).unwrap();
        let tail = g.add_read(ReadParams::new(obj, address, x)).unwrap();
        // Close a control cycle that no longer hangs off the start node.
        g.set_input(w, 0, Some(r)).unwrap();

        assert_eq!(ControlFlowOrder.order(&g), vec![tail, w, r]);
        assert!(!is_lowerable(&g, obj));
    }

    #[test]
    fn test_schedule_for() {
        assert_eq!(schedule_for(TraversalOrder::ControlFlow).name(), "control-flow");
        assert_eq!(schedule_for(TraversalOrder::Creation).name(), "creation");
    }
}
