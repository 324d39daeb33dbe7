//! Scenario synthesis and opening-position selection. The only seeded
//! sampling in the crate lives here; the search path is deterministic.

use contracts::{
    ActorSpec, ChoiceModel, InitialPositions, ScenarioConfig, SearchLimits, VictoryModel,
    VotingRule, SCHEMA_VERSION_V1,
};

use crate::actor::{Negotiator, ValuationFrame};
use crate::position::Ranking;

fn mix_seed(seed: u64, salt: u64) -> u64 {
    let mut value = seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    value ^= value.rotate_left(29);
    value = value.wrapping_mul(0x517C_C1B7_2722_0A95);
    value ^ (value >> 31)
}

fn sample_range(seed: u64, stream: u64, min: f64, max: f64) -> f64 {
    let mixed = mix_seed(seed, stream);
    let unit = (mixed >> 11) as f64 / (1_u64 << 53) as f64;
    min + (max - min) * unit
}

/// Deterministic scenario in the shape of the reference one: costs 25-100,
/// item values 10-100, capabilities 1-100, budget at 60% of total cost so
/// that orderings matter.
pub fn generated_scenario(seed: u64, num_actors: usize, num_items: usize) -> ScenarioConfig {
    let item_costs: Vec<f64> = (0..num_items)
        .map(|j| sample_range(seed, 1000 + j as u64, 25.0, 100.0))
        .collect();
    let budget = 0.6 * item_costs.iter().sum::<f64>();

    let actors = (0..num_actors)
        .map(|i| {
            let actor_seed = mix_seed(seed, 2000 + i as u64);
            ActorSpec {
                name: format!("actor_{i:02}"),
                capability: sample_range(actor_seed, 1, 1.0, 100.0),
                item_values: (0..num_items)
                    .map(|j| sample_range(actor_seed, 100 + j as u64, 10.0, 100.0))
                    .collect(),
                voting_rule: VotingRule::Proportional,
            }
        })
        .collect();

    ScenarioConfig {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        run_id: format!("run_gen_{seed}"),
        seed,
        max_rounds: 100,
        item_costs,
        budget,
        overrun_factor: 0.10,
        slot_decline: 0.80,
        actors,
        initial_positions: InitialPositions::CentralPosition,
        victory_model: VictoryModel::Linear,
        choice_model: ChoiceModel::Conditional,
        search: SearchLimits::default(),
        worker_threads: 4,
    }
}

/// The ranking with the highest capability-weighted total support across the
/// roster, scanning the full permutation space. Ties go to the
/// lexicographically earliest ranking.
pub fn central_position(roster: &[Negotiator], frame: &ValuationFrame) -> Ranking {
    let mut best: Option<(f64, Ranking)> = None;
    for candidate in Ranking::all(frame.num_items()) {
        let support: f64 = roster
            .iter()
            .map(|negotiator| negotiator.capability * negotiator.position_utility(&candidate, frame))
            .sum();
        if best.as_ref().map_or(true, |(seen, _)| support > *seen) {
            best = Some((support, candidate));
        }
    }
    match best {
        Some((_, ranking)) => ranking,
        None => Ranking::first(frame.num_items()),
    }
}

/// The ranking maximizing one actor's own direct utility, ignoring everyone
/// else. Ties go to the lexicographically earliest ranking.
pub fn self_interested_position(negotiator: &Negotiator, frame: &ValuationFrame) -> Ranking {
    let mut best: Option<(f64, Ranking)> = None;
    for candidate in Ranking::all(frame.num_items()) {
        let value = negotiator.position_utility(&candidate, frame);
        if best.as_ref().map_or(true, |(seen, _)| value > *seen) {
            best = Some((value, candidate));
        }
    }
    match best {
        Some((_, ranking)) => ranking,
        None => Ranking::first(frame.num_items()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::build_roster;

    #[test]
    fn generated_scenarios_are_reproducible_and_consistent() {
        let a = generated_scenario(42, 6, 4);
        let b = generated_scenario(42, 6, 4);
        assert_eq!(a, b);
        assert_eq!(a.num_actors(), 6);
        assert_eq!(a.num_items(), 4);
        assert!(a.budget < a.item_costs.iter().sum::<f64>());
        for actor in &a.actors {
            assert_eq!(actor.item_values.len(), 4);
            assert!(actor.item_values.iter().all(|v| *v >= 10.0));
        }

        let c = generated_scenario(43, 6, 4);
        assert_ne!(a.item_costs, c.item_costs);
    }

    #[test]
    fn self_interested_position_maximizes_direct_utility() {
        let config = generated_scenario(7, 3, 4);
        let roster = build_roster(&config.actors, 4).expect("roster");
        let frame = ValuationFrame::new(
            config.item_costs.clone(),
            config.budget,
            config.overrun_factor,
            config.slot_decline,
        );
        for negotiator in &roster {
            let chosen = self_interested_position(negotiator, &frame);
            let chosen_value = negotiator.position_utility(&chosen, &frame);
            for other in Ranking::all(4) {
                assert!(chosen_value >= negotiator.position_utility(&other, &frame));
            }
        }
    }

    #[test]
    fn central_position_tracks_capability() {
        // One dominant actor: the central position must be its favorite.
        let mut config = generated_scenario(11, 3, 3);
        config.actors[0].capability = 1e6;
        let roster = build_roster(&config.actors, 3).expect("roster");
        let frame = ValuationFrame::new(
            config.item_costs.clone(),
            config.budget,
            config.overrun_factor,
            config.slot_decline,
        );
        let central = central_position(&roster, &frame);
        let favorite = self_interested_position(&roster[0], &frame);
        assert_eq!(central, favorite);
    }
}
