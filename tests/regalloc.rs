use std::collections::BTreeMap;

use proptest::prelude::*;

use yal_jvm::backend::regalloc::color;
use yal_jvm::backend::InterferenceGraph;
use yal_jvm::{allocate_registers, BackendError};

fn graphs_of(graph: InterferenceGraph) -> BTreeMap<String, InterferenceGraph> {
    let mut graphs = BTreeMap::new();
    graphs.insert("f".to_string(), graph);
    graphs
}

#[test]
fn a_triangle_needs_three_registers() {
    let mut g = InterferenceGraph::new();
    g.add_edge("a", "b");
    g.add_edge("b", "c");
    g.add_edge("a", "c");

    match allocate_registers(&graphs_of(g.clone()), 2) {
        Err(BackendError::Allocation {
            method,
            budget,
            min_budget,
        }) => {
            assert_eq!(method, "f");
            assert_eq!(budget, 2);
            assert_eq!(min_budget, 3);
        }
        other => panic!("expected an allocation failure, got {other:?}"),
    }

    let allocation = allocate_registers(&graphs_of(g), 3).expect("3 registers suffice");
    assert_eq!(allocation.methods["f"].register_count, 3);
}

#[test]
fn a_chain_fits_in_two_registers() {
    let mut g = InterferenceGraph::new();
    g.add_edge("a", "b");
    g.add_edge("b", "c");
    g.add_edge("c", "d");

    let allocation = allocate_registers(&graphs_of(g), 2).expect("2 registers suffice");
    let method = &allocation.methods["f"];
    assert_eq!(method.register_count, 2);
    assert_ne!(method.registers["a"], method.registers["b"]);
    assert_ne!(method.registers["b"], method.registers["c"]);
    assert_ne!(method.registers["c"], method.registers["d"]);
}

#[test]
fn mandatory_registers_are_honored_exactly() {
    let mut g = InterferenceGraph::new();
    g.add_edge("p0", "p1");
    g.add_edge("p1", "p2");
    g.add_edge("p0", "t");
    g.add_edge("p1", "t");
    g.add_edge("p2", "t");
    g.set_required("p0", 0);
    g.set_required("p1", 1);
    g.set_required("p2", 2);

    let allocation = allocate_registers(&graphs_of(g), 4).expect("4 registers suffice");
    let registers = &allocation.methods["f"].registers;
    assert_eq!(registers["p0"], 0);
    assert_eq!(registers["p1"], 1);
    assert_eq!(registers["p2"], 2);
    // t conflicts with all three parameters.
    assert_eq!(registers["t"], 3);
}

#[test]
fn a_pinned_triangle_fails_recoverably_not_fatally() {
    // The pinned node keeps interfering after simplification; the
    // attempt must come back as an allocation failure with the true
    // minimum, never as an internal error.
    let mut g = InterferenceGraph::new();
    g.add_edge("p", "a");
    g.add_edge("p", "b");
    g.add_edge("a", "b");
    g.set_required("p", 0);

    assert!(color(&g, 2).expect("coloring runs").is_none());
    match allocate_registers(&graphs_of(g.clone()), 2) {
        Err(BackendError::Allocation {
            method,
            budget,
            min_budget,
        }) => {
            assert_eq!(method, "f");
            assert_eq!(budget, 2);
            assert_eq!(min_budget, 3);
        }
        other => panic!("expected an allocation failure, got {other:?}"),
    }

    let allocation = allocate_registers(&graphs_of(g), 3).expect("3 registers suffice");
    assert_eq!(allocation.methods["f"].registers["p"], 0);
}

#[test]
fn budget_below_a_mandatory_slot_is_infeasible() {
    let mut g = InterferenceGraph::new();
    g.add_node("p1");
    g.set_required("p1", 1);

    assert!(color(&g, 1).expect("coloring runs").is_none());
    assert!(color(&g, 2).expect("coloring runs").is_some());
}

#[test]
fn coloring_is_deterministic() {
    let mut g = InterferenceGraph::new();
    g.add_edge("a", "b");
    g.add_edge("b", "c");
    g.add_edge("c", "a");
    g.add_edge("c", "d");
    assert_eq!(
        color(&g, 3).expect("coloring runs"),
        color(&g, 3).expect("coloring runs")
    );
}

// ── Properties ───────────────────────────────────────────────────────────

const NAMES: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];

/// Random graphs over eight names; the first `pinned` names carry
/// mandatory registers 0..pinned, like method parameters do.
fn arbitrary_graph() -> impl Strategy<Value = InterferenceGraph> {
    (
        proptest::collection::vec((0usize..8, 0usize..8), 0..24),
        0usize..4,
    )
        .prop_map(|(edges, pinned)| {
            let mut g = InterferenceGraph::new();
            for name in NAMES {
                g.add_node(name);
            }
            for (i, j) in edges {
                g.add_edge(NAMES[i], NAMES[j]);
            }
            for slot in 0..pinned {
                g.set_required(NAMES[slot], slot);
            }
            g
        })
}

proptest! {
    #[test]
    fn colorings_are_proper(graph in arbitrary_graph(), k in 1usize..9) {
        if let Some(registers) = color(&graph, k).unwrap() {
            for name in graph.names() {
                prop_assert!(registers[name] < k);
                let node = graph.node(name).unwrap();
                if let Some(required) = node.required {
                    prop_assert_eq!(registers[name], required);
                }
                for neighbor in &node.neighbors {
                    prop_assert_ne!(registers[name], registers[neighbor]);
                }
            }
        }
    }

    #[test]
    fn success_is_monotone_in_the_budget(graph in arbitrary_graph(), k in 1usize..8) {
        if color(&graph, k).unwrap().is_some() {
            prop_assert!(color(&graph, k + 1).unwrap().is_some());
        }
    }

    #[test]
    fn the_node_count_is_always_enough(graph in arbitrary_graph()) {
        prop_assert!(color(&graph, graph.len()).unwrap().is_some());
    }
}
