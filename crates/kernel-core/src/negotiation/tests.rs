use contracts::{InitialPositions, RunMode};

use super::*;
use crate::scenario::generated_scenario;

fn small_config(seed: u64, worker_threads: u16) -> contracts::ScenarioConfig {
    let mut config = generated_scenario(seed, 5, 4);
    config.worker_threads = worker_threads;
    config.max_rounds = 50;
    config
}

fn orderings(engine: &NegotiationEngine, round: usize) -> Vec<Vec<u16>> {
    engine
        .round(round)
        .expect("round present")
        .positions()
        .iter()
        .map(|ranking| ranking.order().to_vec())
        .collect()
}

#[test]
fn engine_opens_with_one_state_and_aligned_positions() {
    let engine = NegotiationEngine::new(small_config(3, 1)).expect("engine");
    assert_eq!(engine.round_count(), 1);
    assert_eq!(engine.status().round, 0);
    assert_eq!(engine.status().mode, RunMode::Paused);
    let state = engine.latest_round().expect("opening state");
    assert_eq!(state.num_actors(), 5);
    // Central-position opening: everyone holds the same ranking.
    let first = &state.positions()[0];
    assert!(state.positions().iter().all(|p| p == first));
}

#[test]
fn advancing_rounds_appends_history_and_seals_it_on_completion() {
    let mut engine = NegotiationEngine::new(small_config(5, 2)).expect("engine");
    let committed = engine.run_to_convergence().expect("run");
    assert_eq!(engine.round_count(), committed as usize + 1);
    assert!(engine.status().is_complete());
    for round in 0..engine.round_count() {
        let snapshot = engine.round_snapshot(round).expect("snapshot");
        assert_eq!(snapshot.positions.len(), 5);
        assert!(snapshot.unique_indices.is_some(), "round {round}");
        assert!(snapshot.expected_utilities.is_some(), "round {round}");
        let eu = snapshot.expected_utilities.expect("eu");
        assert!(eu.iter().all(|v| *v > 0.0));
    }
}

#[test]
fn histories_are_identical_across_worker_counts() {
    let mut serial = NegotiationEngine::new(small_config(11, 1)).expect("engine");
    let mut parallel = NegotiationEngine::new(small_config(11, 4)).expect("engine");
    let a = serial.run_to_convergence().expect("serial run");
    let b = parallel.run_to_convergence().expect("parallel run");
    assert_eq!(a, b);
    assert_eq!(serial.round_count(), parallel.round_count());
    for round in 0..serial.round_count() {
        assert_eq!(orderings(&serial, round), orderings(&parallel, round));
    }
}

#[test]
fn repeated_runs_are_deterministic() {
    let mut first = NegotiationEngine::new(small_config(17, 2)).expect("engine");
    let mut second = NegotiationEngine::new(small_config(17, 2)).expect("engine");
    first.run_to_convergence().expect("run");
    second.run_to_convergence().expect("run");
    assert_eq!(first.status(), second.status());
    for round in 0..first.round_count() {
        assert_eq!(orderings(&first, round), orderings(&second, round));
    }
}

#[test]
fn converged_engine_refuses_further_rounds() {
    let mut engine = NegotiationEngine::new(small_config(23, 2)).expect("engine");
    engine.run_to_convergence().expect("run");
    let rounds_before = engine.round_count();
    let status_before = engine.status().clone();
    assert!(!engine.advance_round().expect("idempotent step"));
    assert_eq!(engine.round_count(), rounds_before);
    assert_eq!(engine.status(), &status_before);
}

#[test]
fn convergence_means_the_last_two_states_match() {
    let mut engine = NegotiationEngine::new(small_config(29, 2)).expect("engine");
    engine.run_to_convergence().expect("run");
    if engine.status().converged {
        let last = engine.round_count() - 1;
        let a = engine.round(last - 1).expect("prior state");
        let b = engine.round(last).expect("final state");
        assert!(a.equivalent_to(b));
    }
}

#[test]
fn capability_adjustment_is_pre_run_only() {
    let mut engine = NegotiationEngine::new(small_config(31, 1)).expect("engine");
    engine.set_capability(0, 500.0).expect("pre-run adjustment");
    assert_eq!(engine.roster()[0].capability, 500.0);
    assert!(matches!(
        engine.set_capability(9, 1.0),
        Err(CapabilityError::UnknownActor { index: 9 })
    ));
    assert!(matches!(
        engine.set_capability(0, f64::NAN),
        Err(CapabilityError::BadCapability { .. })
    ));

    engine.advance_round().expect("round");
    assert!(matches!(
        engine.set_capability(0, 1.0),
        Err(CapabilityError::RunStarted)
    ));
}

#[test]
fn explicit_openings_are_honored_and_validated() {
    let mut config = small_config(37, 1);
    config.initial_positions = InitialPositions::Explicit {
        orderings: vec![
            vec![0, 1, 2, 3],
            vec![3, 2, 1, 0],
            vec![1, 0, 3, 2],
            vec![2, 3, 0, 1],
            vec![0, 2, 1, 3],
        ],
    };
    let engine = NegotiationEngine::new(config.clone()).expect("engine");
    assert_eq!(
        orderings(&engine, 0),
        vec![
            vec![0, 1, 2, 3],
            vec![3, 2, 1, 0],
            vec![1, 0, 3, 2],
            vec![2, 3, 0, 1],
            vec![0, 2, 1, 3],
        ]
    );

    config.initial_positions = InitialPositions::Explicit {
        orderings: vec![vec![0, 1, 2, 3]],
    };
    assert!(matches!(
        NegotiationEngine::new(config.clone()),
        Err(ScenarioError::ExplicitPositionCount { .. })
    ));

    config.initial_positions = InitialPositions::Explicit {
        orderings: vec![
            vec![0, 1, 2, 3],
            vec![0, 0, 2, 3],
            vec![1, 0, 3, 2],
            vec![2, 3, 0, 1],
            vec![0, 2, 1, 3],
        ],
    };
    assert!(matches!(
        NegotiationEngine::new(config),
        Err(ScenarioError::InvalidOpeningPosition { actor: 1, .. })
    ));
}

#[test]
fn round_report_lists_positions_and_shares() {
    let mut engine = NegotiationEngine::new(small_config(41, 1)).expect("engine");
    engine.advance_round().expect("round");
    let report = engine.round_report(0).expect("report");
    assert!(report.contains("Round 00"));
    assert!(report.contains("actor 00"));
    assert!(report.contains("unique position(s)"));
    assert!(report.contains("share"));
}

#[test]
fn reference_scenario_runs_at_least_one_round() {
    let mut config = contracts::ScenarioConfig::default();
    config.worker_threads = 2;
    config.max_rounds = 3;
    let mut engine = NegotiationEngine::new(config).expect("engine");
    assert!(engine.advance_round().expect("round"));
    let snapshot = engine.round_snapshot(0).expect("snapshot");
    // Central opening: one unique position holding all probability mass.
    assert_eq!(snapshot.unique_indices.as_deref(), Some(&[0_usize][..]));
    assert_eq!(snapshot.position_shares.as_deref(), Some(&[1.0][..]));
}
