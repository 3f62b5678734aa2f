//! End-to-end lowering of an allocation, two disjoint field writes and a
//! compare-and-swap on a third field.

use prism_memir::ir::{
    AliasOracle, BarrierType, CasParams, CasStrategy, Graph, IdentityAliasOracle, LocationId,
    NodeId, NodeKind, NodeState, ValueKind, WriteParams,
};
use prism_memir::lower::LoweringPhase;
use prism_memir::{BarrierSet, LoweringConfig, Platform};
use tracing_subscriber::EnvFilter;

/// Route lowering logs to the test harness; `RUST_LOG=prism_memir=debug`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Scenario {
    graph: Graph,
    write_a: NodeId,
    write_b: NodeId,
    cas: NodeId,
    state: NodeId,
    ret: NodeId,
    field_a: LocationId,
    field_b: LocationId,
    field_c: LocationId,
}

fn scenario() -> Scenario {
    init_tracing();
    let mut g = Graph::new();
    let field_a = g.locations_mut().field("Pair", "a", ValueKind::Int);
    let field_b = g.locations_mut().field("Pair", "b", ValueKind::Int);
    let field_c = g.locations_mut().field("Pair", "lock", ValueKind::Int);

    g.set_bci(3);
    let obj = g.new_instance(g.start(), 24).unwrap();
    let off_a = g.const_int(12, ValueKind::Long);
    let off_b = g.const_int(16, ValueKind::Long);
    let off_c = g.const_int(20, ValueKind::Long);
    let addr_a = g.offset_address(obj, off_a).unwrap();
    let addr_b = g.offset_address(obj, off_b).unwrap();
    let one = g.const_int(1, ValueKind::Int);
    let two = g.const_int(2, ValueKind::Int);
    let zero = g.const_int(0, ValueKind::Int);

    g.set_bci(7);
    let write_a = g
        .add_write(WriteParams::new(obj, addr_a, field_a, one, BarrierType::None).initialization(true))
        .unwrap();
    let write_b = g
        .add_write(WriteParams::new(write_a, addr_b, field_b, two, BarrierType::None).initialization(true))
        .unwrap();

    g.set_bci(11);
    let state = g.frame_state(11, &[obj]).unwrap();
    let cas = g
        .add_compare_and_swap(
            CasParams::new(write_b, obj, off_c, zero, one, ValueKind::Int, field_c).with_state_after(state),
        )
        .unwrap();
    let ret = g.return_value(cas, Some(cas)).unwrap();
    assert!(g.verify().is_ok());

    Scenario {
        graph: g,
        write_a,
        write_b,
        cas,
        state,
        ret,
        field_a,
        field_b,
        field_c,
    }
}

/// Lower only compare-and-swap nodes; leave plain accesses to a later phase.
struct CasOnly;

impl prism_memir::lower::LoweringSchedule for CasOnly {
    fn name(&self) -> &'static str {
        "cas-only"
    }

    fn order(&self, graph: &Graph) -> Vec<NodeId> {
        graph
            .live_nodes()
            .filter(|(_, n)| matches!(n.kind(), NodeKind::CompareAndSwap(_)))
            .map(|(id, _)| id)
            .collect()
    }
}

#[test]
fn test_cas_lowering_leaves_unrelated_writes_untouched() {
    for platform in [Platform::X64, Platform::AArch64 { lse: false }, Platform::AArch64 { lse: true }] {
        let mut s = scenario();
        let before_a = format!("{:?}", s.graph.node(s.write_a));
        let before_b = format!("{:?}", s.graph.node(s.write_b));

        let config = LoweringConfig {
            platform,
            barrier_set: BarrierSet::G1,
            ..LoweringConfig::for_testing()
        };
        let stats = LoweringPhase::with_schedule(config, Box::new(CasOnly))
            .run(&mut s.graph)
            .unwrap();
        assert_eq!(stats.compare_and_swaps, 1);
        assert_eq!(stats.writes, 0);

        // The CAS is gone, edges and all.
        assert_eq!(s.graph.state(s.cas), Some(NodeState::Replaced));
        assert_eq!(s.graph.usage_count(s.cas), 0);
        assert_eq!(s.graph.node(s.cas).inputs().count(), 0);

        // Its user now reads the platform's atomic.
        let result = s.graph.node(s.ret).input(1).unwrap();
        let NodeKind::AtomicCas(data) = s.graph.node(result).kind() else {
            panic!("return does not consume an atomic CAS");
        };
        let expected = match platform {
            Platform::X64 => CasStrategy::LockCmpxchg,
            Platform::AArch64 { lse: true } => CasStrategy::CasAcquireRelease,
            Platform::AArch64 { lse: false } => CasStrategy::LoadLinkedStoreConditional,
        };
        assert_eq!(data.strategy, expected);
        assert_eq!(data.location, s.field_c);
        // The frame state after the CAS now follows the atomic.
        assert_eq!(s.graph.usages(s.state), &[result]);

        // The writes are structurally untouched.
        assert_eq!(format!("{:?}", s.graph.node(s.write_a)), before_a);
        assert_eq!(format!("{:?}", s.graph.node(s.write_b)), before_b);
        assert!(s.graph.is_alive(s.write_a));
        assert!(s.graph.is_alive(s.write_b));

        // And still disjoint.
        let oracle = IdentityAliasOracle;
        assert!(oracle.can_reorder(s.graph.locations(), s.field_a, s.field_b));
        assert!(s.graph.can_reorder(s.write_a, s.write_b, &oracle).unwrap());
        assert!(s.graph.verify().is_ok());
    }
}

#[test]
fn test_full_lowering_of_scenario() {
    let mut s = scenario();
    let stats = LoweringPhase::new(LoweringConfig::for_testing())
        .run(&mut s.graph)
        .unwrap();

    assert_eq!(stats.lowered(), 3);
    for id in [s.write_a, s.write_b, s.cas] {
        assert_eq!(s.graph.state(id), Some(NodeState::Replaced));
    }
    // Initializing primitive stores need no barriers.
    assert_eq!(stats.barriers, 0);
    assert!(s
        .graph
        .live_nodes()
        .all(|(_, n)| !n.kind().is_lowerable()));
    assert!(s.graph.verify().is_ok());
}

#[test]
fn test_graph_dump_names_locations() {
    let s = scenario();
    let dump = format!("{:?}", s.graph);
    assert!(dump.contains("Pair.a"));
    assert!(dump.contains("Pair.lock"));
    assert!(dump.contains("CompareAndSwap"));
}
