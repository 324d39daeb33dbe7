use std::fmt;

use contracts::{
    InitialPositions, RunMode, RunStatus, ScenarioConfig, SCHEMA_VERSION_V1,
};

use super::{NegotiationEngine, RoundMetrics};
use crate::actor::{build_roster, RosterError, ValuationFrame};
use crate::oracle::{CoalitionOracle, UtilityOracle, VoterWeight};
use crate::position::{Ranking, RankingError};
use crate::scenario::{central_position, self_interested_position};
use crate::state::{RoundState, StateError};

#[derive(Debug)]
pub enum ScenarioError {
    SchemaVersion {
        got: String,
    },
    NoItems,
    Roster(RosterError),
    BadItemCost {
        item: usize,
        cost: f64,
    },
    ScalarOutOfRange {
        name: &'static str,
        value: f64,
    },
    BadSearchLimits,
    ExplicitPositionCount {
        expected: usize,
        got: usize,
    },
    InvalidOpeningPosition {
        actor: usize,
        source: RankingError,
    },
    OpeningPositionLength {
        actor: usize,
        expected: usize,
        got: usize,
    },
    State(StateError),
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaVersion { got } => {
                write!(f, "unsupported scenario schema version {got}")
            }
            Self::NoItems => write!(f, "scenario has no items"),
            Self::Roster(source) => write!(f, "bad roster: {source}"),
            Self::BadItemCost { item, cost } => {
                write!(f, "item {item} cost {cost} is not strictly positive")
            }
            Self::ScalarOutOfRange { name, value } => {
                write!(f, "scenario scalar {name}={value} is out of range")
            }
            Self::BadSearchLimits => write!(f, "search limits must be at least one iteration and one stable round with a finite non-negative tolerance"),
            Self::ExplicitPositionCount { expected, got } => write!(
                f,
                "scenario supplies {got} explicit opening positions for {expected} actors"
            ),
            Self::InvalidOpeningPosition { actor, source } => {
                write!(f, "opening position for actor {actor} is invalid: {source}")
            }
            Self::OpeningPositionLength {
                actor,
                expected,
                got,
            } => write!(
                f,
                "opening position for actor {actor} ranks {got} items, scenario has {expected}"
            ),
            Self::State(source) => write!(f, "opening state is invalid: {source}"),
        }
    }
}

impl std::error::Error for ScenarioError {}

impl From<RosterError> for ScenarioError {
    fn from(value: RosterError) -> Self {
        Self::Roster(value)
    }
}

impl From<StateError> for ScenarioError {
    fn from(value: StateError) -> Self {
        Self::State(value)
    }
}

impl NegotiationEngine {
    /// Build an engine with the coalition oracle derived from the roster's
    /// capabilities and voting rules.
    pub fn new(config: ScenarioConfig) -> Result<Self, ScenarioError> {
        Self::build(config, None)
    }

    /// Build an engine around a caller-supplied oracle. Any deterministic,
    /// pure implementation of the oracle contract plugs in here.
    pub fn with_oracle(
        config: ScenarioConfig,
        oracle: Box<dyn UtilityOracle>,
    ) -> Result<Self, ScenarioError> {
        Self::build(config, Some(oracle))
    }

    fn build(
        config: ScenarioConfig,
        oracle_override: Option<Box<dyn UtilityOracle>>,
    ) -> Result<Self, ScenarioError> {
        validate_scalars(&config)?;

        let num_items = config.num_items();
        let roster = build_roster(&config.actors, num_items)?;
        let frame = ValuationFrame::new(
            config.item_costs.clone(),
            config.budget,
            config.overrun_factor,
            config.slot_decline,
        );

        let default_oracle = oracle_override.is_none();
        let oracle: Box<dyn UtilityOracle> = match oracle_override {
            Some(oracle) => oracle,
            None => Box::new(coalition_oracle_for(&roster, &config)),
        };

        let opening = opening_positions(&config, &roster, &frame)?;
        let state0 = RoundState::new(opening)?;

        let worker_threads = usize::from(config.worker_threads.max(1));
        let search_pool = if worker_threads > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(worker_threads)
                .build()
                .ok()
        } else {
            None
        };

        let status = RunStatus {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: config.run_id.clone(),
            round: 0,
            max_rounds: config.max_rounds,
            mode: RunMode::Paused,
            converged: false,
            matched_round: None,
        };

        Ok(Self {
            config,
            status,
            roster,
            frame,
            oracle,
            default_oracle,
            history: vec![state0],
            search_pool,
            worker_threads,
            last_round_metrics: RoundMetrics::default(),
        })
    }

    pub(super) fn rebuild_default_oracle(&mut self) {
        if self.default_oracle {
            self.oracle = Box::new(coalition_oracle_for(&self.roster, &self.config));
        }
    }
}

fn coalition_oracle_for(
    roster: &[crate::actor::Negotiator],
    config: &ScenarioConfig,
) -> CoalitionOracle {
    let voters = roster
        .iter()
        .map(|negotiator| VoterWeight {
            capability: negotiator.capability,
            rule: negotiator.voting_rule,
        })
        .collect();
    CoalitionOracle::new(voters, config.victory_model, config.choice_model)
}

fn validate_scalars(config: &ScenarioConfig) -> Result<(), ScenarioError> {
    if config.schema_version != SCHEMA_VERSION_V1 {
        return Err(ScenarioError::SchemaVersion {
            got: config.schema_version.clone(),
        });
    }
    if config.item_costs.is_empty() {
        return Err(ScenarioError::NoItems);
    }
    for (item, cost) in config.item_costs.iter().enumerate() {
        if !cost.is_finite() || *cost <= 0.0 {
            return Err(ScenarioError::BadItemCost { item, cost: *cost });
        }
    }
    if !config.budget.is_finite() || config.budget <= 0.0 {
        return Err(ScenarioError::ScalarOutOfRange {
            name: "budget",
            value: config.budget,
        });
    }
    if !config.overrun_factor.is_finite()
        || config.overrun_factor <= 0.0
        || config.overrun_factor > 1.0
    {
        return Err(ScenarioError::ScalarOutOfRange {
            name: "overrun_factor",
            value: config.overrun_factor,
        });
    }
    if !config.slot_decline.is_finite() || config.slot_decline <= 0.0 || config.slot_decline > 1.0 {
        return Err(ScenarioError::ScalarOutOfRange {
            name: "slot_decline",
            value: config.slot_decline,
        });
    }
    let search = &config.search;
    if search.max_iterations == 0
        || search.stable_limit == 0
        || !search.stable_tolerance.is_finite()
        || search.stable_tolerance < 0.0
    {
        return Err(ScenarioError::BadSearchLimits);
    }
    Ok(())
}

fn opening_positions(
    config: &ScenarioConfig,
    roster: &[crate::actor::Negotiator],
    frame: &ValuationFrame,
) -> Result<Vec<Ranking>, ScenarioError> {
    match &config.initial_positions {
        InitialPositions::CentralPosition => {
            let central = central_position(roster, frame);
            Ok(vec![central; roster.len()])
        }
        InitialPositions::SelfInterested => Ok(roster
            .iter()
            .map(|negotiator| self_interested_position(negotiator, frame))
            .collect()),
        InitialPositions::Explicit { orderings } => {
            if orderings.len() != roster.len() {
                return Err(ScenarioError::ExplicitPositionCount {
                    expected: roster.len(),
                    got: orderings.len(),
                });
            }
            orderings
                .iter()
                .enumerate()
                .map(|(actor, order)| {
                    let ranking = Ranking::new(order.clone())
                        .map_err(|source| ScenarioError::InvalidOpeningPosition { actor, source })?;
                    if ranking.len() != frame.num_items() {
                        return Err(ScenarioError::OpeningPositionLength {
                            actor,
                            expected: frame.num_items(),
                            got: ranking.len(),
                        });
                    }
                    Ok(ranking)
                })
                .collect()
        }
    }
}
