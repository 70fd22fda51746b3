//! Property tests for shadiness propagation and urgency scoring

use procurement_risk::graph::{Attributes, Node, OwnershipGraph, ProcurementFacts};
use procurement_risk::risk::{risk_scores_from, PropagationConfig, Propagator, UrgencyConfig, UrgencyScorer};
use procurement_types::{NodeKind, Relation, Roles};
use proptest::prelude::*;

/// One winner with `risks.len() - 1` shareholders; the winner's own risk
/// is `risks[0]`. Shareholders above 50% also control the winner.
fn star(risks: &[f64], stakes: &[f64]) -> OwnershipGraph {
    let mut graph = OwnershipGraph::new("GB");
    let p = graph.upsert_node(Node::new("proc-1", NodeKind::Procurement));
    let w = graph.upsert_node(
        Node::new("W", NodeKind::Company)
            .with_name(Some("Winner".into()))
            .with_roles(Roles::winner()),
    );
    graph.node_mut(w).risk_score = Some(risks[0]);
    graph.upsert_edge(p, w, Relation::Won, None, Attributes::new());

    for (i, (risk, stake)) in risks[1..].iter().zip(stakes).enumerate() {
        let s = graph.upsert_node(
            Node::new(format!("S{}", i), NodeKind::Company).with_roles(Roles::shareholder()),
        );
        graph.node_mut(s).risk_score = Some(*risk);
        graph.upsert_edge(s, w, Relation::Owns, Some(*stake), Attributes::new());
        if *stake > 50.0 {
            graph.upsert_edge(s, w, Relation::Controls, Some(*stake), Attributes::new());
        }
    }
    graph
}

fn shadiness(graph: OwnershipGraph) -> f64 {
    let scores = risk_scores_from(&graph);
    let (graph, _) = Propagator::new(PropagationConfig::default()).propagate(graph, &scores);
    graph.get("W").and_then(|w| w.shadiness).unwrap_or(-1.0)
}

proptest! {
    #[test]
    fn prop_shadiness_is_max_of_neighbourhood(
        risks in prop::collection::vec(0.0f64..=1.0, 1..8),
        stakes in prop::collection::vec(0.0f64..=100.0, 8),
    ) {
        let expected = risks.iter().copied().fold(0.0, f64::max);
        let got = shadiness(star(&risks, &stakes));
        prop_assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn prop_raising_a_risk_never_lowers_shadiness(
        risks in prop::collection::vec(0.0f64..=1.0, 2..8),
        stakes in prop::collection::vec(0.0f64..=100.0, 8),
        pick in any::<prop::sample::Index>(),
        bump in 0.0f64..=1.0,
    ) {
        let before = shadiness(star(&risks, &stakes));
        let mut raised = risks.clone();
        let i = pick.index(raised.len());
        raised[i] = (raised[i] + bump).min(1.0);
        let after = shadiness(star(&raised, &stakes));
        prop_assert!(after >= before);
    }

    #[test]
    fn prop_urgency_stays_in_unit_interval(
        values in prop::collection::vec(prop::option::of(0.0f64..1e10), 1..20),
        shadiness in prop::collection::vec(0.0f64..=1.0, 20),
    ) {
        let mut graph = OwnershipGraph::new("GB");
        for (i, value) in values.iter().enumerate() {
            let idx = graph.upsert_node(Node::new(format!("proc-{}", i), NodeKind::Procurement));
            graph.node_mut(idx).procurement = Some(ProcurementFacts {
                value: *value,
                expected_shadiness: Some(shadiness[i]),
                ..ProcurementFacts::default()
            });
        }

        let (graph, distribution) = UrgencyScorer::new(UrgencyConfig::default()).score(graph);
        prop_assert_eq!(distribution.procurements, values.len());
        for idx in graph.procurements() {
            let facts = graph.node(idx).procurement.clone().unwrap_or_default();
            if let Some(u) = facts.urgency {
                prop_assert!((0.0..=1.0).contains(&u), "urgency {} out of range", u);
            }
            if let Some(p) = facts.value_percentile {
                prop_assert!((0.0..=1.0).contains(&p));
            }
        }
    }
}

#[test]
fn test_controller_of_shareholder_reaches_winner() {
    // C controls S, S owns 10% of W: C is one hop beyond the ownership ring
    let mut graph = star(&[0.0, 0.1], &[10.0]);
    let s = graph.find("S0").unwrap();
    let c = graph.upsert_node(Node::new("C", NodeKind::Person).with_roles(Roles::shareholder()));
    graph.node_mut(c).risk_score = Some(0.8);
    graph.upsert_edge(c, s, Relation::Owns, Some(75.0), Attributes::new());
    graph.upsert_edge(c, s, Relation::Controls, Some(75.0), Attributes::new());

    assert!((shadiness(graph) - 0.8).abs() < 1e-12);
}
