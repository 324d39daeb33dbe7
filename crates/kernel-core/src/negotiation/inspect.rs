use std::fmt;
use std::fmt::Write as _;

use contracts::{RoundSnapshot, RunStatus, ScenarioConfig, SCHEMA_VERSION_V1};

use super::{NegotiationEngine, RoundMetrics};
use crate::actor::Negotiator;
use crate::state::RoundState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CapabilityError {
    RunStarted,
    UnknownActor { index: usize },
    BadCapability { capability: f64 },
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunStarted => {
                write!(f, "capability can only be adjusted before the run starts")
            }
            Self::UnknownActor { index } => write!(f, "no actor at roster index {index}"),
            Self::BadCapability { capability } => {
                write!(f, "capability {capability} is not a non-negative finite number")
            }
        }
    }
}

impl std::error::Error for CapabilityError {}

impl NegotiationEngine {
    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn roster(&self) -> &[Negotiator] {
        &self.roster
    }

    pub fn last_round_metrics(&self) -> RoundMetrics {
        self.last_round_metrics
    }

    pub fn round_count(&self) -> usize {
        self.history.len()
    }

    pub fn round(&self, round: usize) -> Option<&RoundState> {
        self.history.get(round)
    }

    pub fn latest_round(&self) -> Option<&RoundState> {
        self.history.last()
    }

    /// Serialized view of one round. The bookkeeping blocks appear once the
    /// round has been valued; a freshly assembled round exposes its
    /// positions and unique indices only.
    pub fn round_snapshot(&self, round: usize) -> Option<RoundSnapshot> {
        let state = self.history.get(round)?;
        let positions = state
            .positions()
            .iter()
            .map(|ranking| ranking.order().to_vec())
            .collect();
        let unique = state.unique();
        let valuations = state.valuations();
        Some(RoundSnapshot {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: self.status.run_id.clone(),
            round: round as u32,
            positions,
            unique_indices: unique.map(|index| index.representatives.clone()),
            class_of: unique.map(|index| index.class_of.clone()),
            expected_utilities: valuations.map(|v| v.expected_utilities.clone()),
            position_shares: valuations.map(|v| v.choice_shares.clone()),
        })
    }

    /// Console report for one round: every actor's position, then the unique
    /// positions with their outcome shares.
    pub fn round_report(&self, round: usize) -> Option<String> {
        let state = self.history.get(round)?;
        let mut out = String::new();
        let _ = writeln!(out, "Round {round:02}");
        for (actor, position) in state.positions().iter().enumerate() {
            let _ = writeln!(out, "  actor {actor:02}: {position}");
        }
        if let Some(unique) = state.unique() {
            let _ = writeln!(out, "  {} unique position(s)", unique.num_classes());
            if let Some(valuations) = state.valuations() {
                for (slot, representative) in unique.representatives.iter().enumerate() {
                    let _ = writeln!(
                        out,
                        "    {representative:02}: share {:.4}",
                        valuations.choice_shares[slot]
                    );
                }
            }
        }
        Some(out)
    }

    /// Pre-run adjustment of one actor's influence, e.g. to model a weakened
    /// agenda-setter. Rejected once any round has been advanced or valued.
    pub fn set_capability(
        &mut self,
        actor_index: usize,
        capability: f64,
    ) -> Result<(), CapabilityError> {
        let started = self.status.round > 0
            || self.history.len() > 1
            || self
                .history
                .last()
                .map_or(false, |state| state.valuations().is_some());
        if started {
            return Err(CapabilityError::RunStarted);
        }
        if actor_index >= self.roster.len() {
            return Err(CapabilityError::UnknownActor { index: actor_index });
        }
        if !capability.is_finite() || capability < 0.0 {
            return Err(CapabilityError::BadCapability { capability });
        }
        self.roster[actor_index].capability = capability;
        self.config.actors[actor_index].capability = capability;
        self.rebuild_default_oracle();
        Ok(())
    }
}
