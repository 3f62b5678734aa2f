//! The lowering phase: visits lowerable nodes in schedule order and lowers
//! each one exactly once.

use std::time::{Duration, Instant};

use super::schedule::{schedule_for, LoweringSchedule};
use super::target::TargetLowerer;
use super::tool::LoweringTool;
use crate::config::LoweringConfig;
use crate::ir::error::GraphResult;
use crate::ir::graph::Graph;
use crate::ir::node::NodeKind;

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from one run of the lowering phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoweringStats {
    /// Reads lowered.
    pub reads: usize,
    /// Writes lowered.
    pub writes: usize,
    /// Compare-and-swap nodes lowered.
    pub compare_and_swaps: usize,
    /// Nodes created by expansions.
    pub nodes_created: usize,
    /// Memory fences emitted.
    pub fences: usize,
    /// GC write barriers emitted.
    pub barriers: usize,
    /// Alive nodes before the phase.
    pub initial_live: usize,
    /// Alive nodes after the phase.
    pub final_live: usize,
    /// Total time spent.
    pub time: Duration,
}

impl LoweringStats {
    pub fn lowered(&self) -> usize {
        self.reads + self.writes + self.compare_and_swaps
    }
}

// =============================================================================
// Lowering Phase
// =============================================================================

/// Drives a [`LoweringTool`] over a graph in the order of a
/// [`LoweringSchedule`].
pub struct LoweringPhase {
    config: LoweringConfig,
    schedule: Box<dyn LoweringSchedule>,
}

impl LoweringPhase {
    /// Phase using the configured traversal order.
    pub fn new(config: LoweringConfig) -> Self {
        let schedule = schedule_for(config.traversal);
        Self { config, schedule }
    }

    /// Phase with a custom schedule.
    pub fn with_schedule(config: LoweringConfig, schedule: Box<dyn LoweringSchedule>) -> Self {
        Self { config, schedule }
    }

    pub fn config(&self) -> &LoweringConfig {
        &self.config
    }

    /// Lower with the configured target.
    pub fn run(&mut self, graph: &mut Graph) -> GraphResult<LoweringStats> {
        let mut tool = TargetLowerer::new(&self.config);
        self.run_with(graph, &mut tool)
    }

    /// Lower with an arbitrary tool.
    pub fn run_with(&mut self, graph: &mut Graph, tool: &mut dyn LoweringTool) -> GraphResult<LoweringStats> {
        let start = Instant::now();
        let mut stats = LoweringStats {
            initial_live: graph.live_count(),
            ..Default::default()
        };

        let order = self.schedule.order(graph);
        tracing::debug!(
            graph = %graph.id(),
            schedule = self.schedule.name(),
            candidates = order.len(),
            "lowering memory nodes"
        );

        for id in order {
            match graph.node(id).kind() {
                NodeKind::Read(_) => stats.reads += 1,
                NodeKind::Write(_) => stats.writes += 1,
                NodeKind::CompareAndSwap(_) => stats.compare_and_swaps += 1,
                _ => {}
            }
            let replacement = graph.lower_node(id, tool)?;

            stats.nodes_created += replacement.nodes.len();
            for &created in &replacement.nodes {
                match graph.node(created).kind() {
                    NodeKind::MemoryBarrier(_) => stats.fences += 1,
                    NodeKind::WriteBarrier(_) => stats.barriers += 1,
                    _ => {}
                }
            }
        }

        if self.config.verify_after_lowering {
            graph.verify()?;
        }
        stats.final_live = graph.live_count();
        stats.time = start.elapsed();
        tracing::debug!(
            graph = %graph.id(),
            lowered = stats.lowered(),
            created = stats.nodes_created,
            fences = stats.fences,
            barriers = stats.barriers,
            "lowering done"
        );
        Ok(stats)
    }
}

/// Lower every memory node of `graph` with the default configuration.
pub fn lower_memory(graph: &mut Graph) -> GraphResult<LoweringStats> {
    LoweringPhase::new(LoweringConfig::default()).run(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BarrierSet, TraversalOrder};
    use crate::ir::access::{BarrierType, CasParams, ReadParams, WriteParams};
    use crate::ir::node::{NodeId, NodeState};
    use crate::ir::types::ValueKind;
    use crate::lower::tool::Replacement;

    fn sample(g: &mut Graph) -> Vec<NodeId> {
        let obj = g.new_instance(g.start(), 32).unwrap();
        let offset = g.const_int(16, ValueKind::Long);
        let address = g.offset_address(obj, offset).unwrap();
        let next = g.locations_mut().field("Node", "next", ValueKind::Object);
        let null = g.const_null();

        let w = g
            .add_write(WriteParams::new(obj, address, next, null, BarrierType::Field))
            .unwrap();
        let r = g
            .add_read(ReadParams::new(w, address, next).with_last_location_access(w))
            .unwrap();
        let cas = g
            .add_compare_and_swap(CasParams::new(r, obj, offset, r, null, ValueKind::Object, next))
            .unwrap();
        g.return_value(cas, Some(cas)).unwrap();
        vec![w, r, cas]
    }

    #[test]
    fn test_phase_lowers_everything_once() {
        let mut g = Graph::new();
        let originals = sample(&mut g);
        let mut phase = LoweringPhase::new(LoweringConfig::for_testing());

        let stats = phase.run(&mut g).unwrap();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.compare_and_swaps, 1);
        assert_eq!(stats.barriers, 2);
        assert_eq!(stats.fences, 0);
        for id in originals {
            assert_eq!(g.state(id), Some(NodeState::Replaced));
        }
        assert!(g.live_nodes().all(|(_, n)| !n.kind().is_lowerable()));

        // Nothing left to do.
        let again = phase.run(&mut g).unwrap();
        assert_eq!(again.lowered(), 0);
    }

    #[test]
    fn test_creation_order_gives_same_result() {
        let mut a = Graph::new();
        let mut b = Graph::new();
        sample(&mut a);
        sample(&mut b);

        let config = LoweringConfig::aarch64(false).with_barrier_set(BarrierSet::CardTable);
        let sa = LoweringPhase::new(config.clone()).run(&mut a).unwrap();
        let sb = LoweringPhase::new(config.with_traversal(TraversalOrder::Creation))
            .run(&mut b)
            .unwrap();

        assert_eq!(sa.lowered(), sb.lowered());
        assert_eq!(sa.nodes_created, sb.nodes_created);
        assert_eq!(sa.fences, 2);
        assert_eq!(sa.barriers, 1);
    }

    struct Failing;

    impl LoweringTool for Failing {
        fn lower(&mut self, _: &mut Graph, _: NodeId) -> GraphResult<Replacement> {
            Ok(Replacement::default())
        }
    }

    #[test]
    fn test_phase_stops_on_first_violation() {
        let mut g = Graph::new();
        let originals = sample(&mut g);

        let err = LoweringPhase::new(LoweringConfig::for_testing())
            .run_with(&mut g, &mut Failing)
            .unwrap_err();
        assert_eq!(err.node(), Some(originals[0]));
        assert!(g.verify().is_ok());
    }
}
