//! v1 cross-boundary contracts for the negotiation kernel, API, persistence, and CLI.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// How an actor's pairwise vote scales with its utility difference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VotingRule {
    Binary,
    Proportional,
    Cubic,
}

/// Curve mapping two coalition strengths to a pairwise victory probability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VictoryModel {
    Binary,
    Linear,
    Square,
}

/// Rule turning the pairwise victory matrix into a probability of choice
/// per unique position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceModel {
    Conditional,
    Markov,
}

/// Where each actor's opening position comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitialPositions {
    /// Everyone opens at the capability-weighted net-support maximum.
    CentralPosition,
    /// Each actor opens at its own direct-utility maximum.
    SelfInterested,
    /// Literal slot-to-item orderings, one per actor.
    Explicit { orderings: Vec<Vec<u16>> },
}

/// Termination bounds for one local search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SearchLimits {
    pub max_iterations: u32,
    pub stable_limit: u32,
    pub stable_tolerance: f64,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            stable_limit: 3,
            stable_tolerance: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActorSpec {
    pub name: String,
    pub capability: f64,
    /// Direct utility of each item to this actor, item-indexed.
    pub item_values: Vec<f64>,
    pub voting_rule: VotingRule,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioConfig {
    pub schema_version: String,
    pub run_id: String,
    #[serde(with = "serde_u64_string")]
    pub seed: u64,
    pub max_rounds: u32,
    /// Cost of enacting each item, item-indexed.
    pub item_costs: Vec<f64>,
    pub budget: f64,
    /// Discount applied to items that land past the budget line.
    pub overrun_factor: f64,
    /// Geometric decline of slot weight with priority rank.
    pub slot_decline: f64,
    pub actors: Vec<ActorSpec>,
    pub initial_positions: InitialPositions,
    pub victory_model: VictoryModel,
    pub choice_model: ChoiceModel,
    #[serde(default)]
    pub search: SearchLimits,
    pub worker_threads: u16,
}

impl ScenarioConfig {
    pub fn num_actors(&self) -> usize {
        self.actors.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_costs.len()
    }
}

impl Default for ScenarioConfig {
    /// The reference scenario: fifteen actors negotiating the priority order
    /// of seven reform items under a budget of 100. Costs differ enough that
    /// a pure value ordering is not affordable, so orderings interact.
    fn default() -> Self {
        const ITEM_COSTS: [f64; 7] = [32.0, 38.0, 29.0, 15.0, 18.0, 41.0, 27.0];
        const CAPABILITIES: [f64; 15] = [
            40.0, 30.0, 15.0, 30.0, 20.0, 10.0, 20.0, 5.0, 15.0, 25.0, 20.0, 10.0, 5.0, 5.0, 10.0,
        ];
        const ITEM_VALUES: [[f64; 7]; 15] = [
            [65.0, 60.0, 40.0, 25.0, 10.0, 100.0, 40.0],
            [70.0, 35.0, 80.0, 50.0, 0.0, 20.0, 100.0],
            [60.0, 75.0, 25.0, 0.0, 60.0, 100.0, 45.0],
            [55.0, 25.0, 60.0, 80.0, 30.0, 50.0, 30.0],
            [65.0, 100.0, 40.0, 80.0, 0.0, 60.0, 25.0],
            [45.0, 60.0, 100.0, 80.0, 40.0, 60.0, 20.0],
            [35.0, 100.0, 50.0, 90.0, 0.0, 80.0, 100.0],
            [35.0, 100.0, 20.0, 60.0, 0.0, 50.0, 25.0],
            [40.0, 80.0, 100.0, 60.0, 50.0, 25.0, 50.0],
            [60.0, 80.0, 100.0, 25.0, 40.0, 60.0, 35.0],
            [65.0, 60.0, 100.0, 80.0, 50.0, 30.0, 25.0],
            [60.0, 80.0, 100.0, 40.0, 50.0, 60.0, 35.0],
            [50.0, 50.0, 60.0, 0.0, 20.0, 100.0, 25.0],
            [50.0, 0.0, 60.0, 0.0, 100.0, 80.0, 0.0],
            [60.0, 0.0, 50.0, 0.0, 100.0, 80.0, 0.0],
        ];

        let actors = ITEM_VALUES
            .iter()
            .zip(CAPABILITIES.iter())
            .enumerate()
            .map(|(i, (values, capability))| ActorSpec {
                name: format!("actor_{i:02}"),
                capability: *capability,
                item_values: values.to_vec(),
                voting_rule: VotingRule::Proportional,
            })
            .collect();

        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: "run_local_001".to_string(),
            seed: 1337,
            max_rounds: 100,
            item_costs: ITEM_COSTS.to_vec(),
            budget: 100.0,
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
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStatus {
    pub schema_version: String,
    pub run_id: String,
    pub round: u32,
    pub max_rounds: u32,
    pub mode: RunMode,
    pub converged: bool,
    /// Earlier round this run's latest state repeats, when a cycle was hit.
    pub matched_round: Option<u32>,
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        self.converged || self.matched_round.is_some() || self.round >= self.max_rounds
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={} round={}/{} mode={:?} converged={}",
            self.run_id, self.round, self.max_rounds, self.mode, self.converged
        )
    }
}

/// One round of history as exposed to persistence and the API. The optional
/// blocks are present once the round's bookkeeping has been computed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundSnapshot {
    pub schema_version: String,
    pub run_id: String,
    pub round: u32,
    /// Slot-to-item ordering per actor, roster-indexed.
    pub positions: Vec<Vec<u16>>,
    pub unique_indices: Option<Vec<usize>>,
    pub class_of: Option<Vec<usize>>,
    pub expected_utilities: Option<Vec<f64>>,
    /// Probability of each unique position being the collective outcome,
    /// aligned with `unique_indices`.
    pub position_shares: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    SimStart,
    SimPause,
    SimStep,
    SimRun,
    SetCapability,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandPayload {
    SimStart,
    SimPause,
    SimStep { rounds: u32 },
    SimRun,
    SetCapability { actor_index: usize, capability: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub schema_version: String,
    pub command_id: String,
    pub run_id: String,
    pub issued_at_round: u32,
    pub command_type: CommandType,
    pub payload: CommandPayload,
}

impl Command {
    pub fn new(
        command_id: impl Into<String>,
        run_id: impl Into<String>,
        issued_at_round: u32,
        command_type: CommandType,
        payload: CommandPayload,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            command_id: command_id.into(),
            run_id: run_id.into(),
            issued_at_round,
            command_type,
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RunNotFound,
    InvalidCommand,
    InvalidQuery,
    RoundOutOfRange,
    ContractVersionUnsupported,
    RunStateConflict,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    pub schema_version: String,
    pub command_id: String,
    pub run_id: String,
    pub accepted: bool,
    pub error: Option<ApiError>,
}

impl CommandResult {
    pub fn accepted(command: &Command) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            command_id: command.command_id.clone(),
            run_id: command.run_id.clone(),
            accepted: true,
            error: None,
        }
    }

    pub fn rejected(command: &Command, error: ApiError) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            command_id: command.command_id.clone(),
            run_id: command.run_id.clone(),
            accepted: false,
            error: Some(error),
        }
    }
}

pub mod serde_u64_string {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_scenario_tables_are_consistent() {
        let config = ScenarioConfig::default();
        assert_eq!(config.num_actors(), 15);
        assert_eq!(config.num_items(), 7);
        for actor in &config.actors {
            assert_eq!(actor.item_values.len(), config.num_items());
            assert!(actor.capability > 0.0);
            assert!(actor.item_values.iter().all(|v| *v >= 0.0));
            assert!(actor.item_values.iter().any(|v| *v > 0.0));
        }
        let total_cost: f64 = config.item_costs.iter().sum();
        assert!(config.budget < total_cost, "budget must not cover everything");
    }

    #[test]
    fn scenario_config_round_trips_with_string_seed() {
        let mut config = ScenarioConfig::default();
        config.seed = u64::MAX - 3;
        let encoded = serde_json::to_string(&config).expect("serialize");
        assert!(encoded.contains(&format!("\"{}\"", u64::MAX - 3)));
        let decoded: ScenarioConfig = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(config, decoded);
    }

    #[test]
    fn command_result_carries_rejection_error() {
        let command = Command::new(
            "cmd_1",
            "run_1",
            0,
            CommandType::SetCapability,
            CommandPayload::SetCapability {
                actor_index: 0,
                capability: 10.0,
            },
        );
        let error = ApiError::new(ErrorCode::RunStateConflict, "run already started", None);
        let result = CommandResult::rejected(&command, error);
        assert!(!result.accepted);
        assert_eq!(result.command_id, "cmd_1");
        assert_eq!(
            result.error.as_ref().map(|e| e.error_code),
            Some(ErrorCode::RunStateConflict)
        );
    }
}
