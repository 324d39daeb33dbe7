//! The round-stepping negotiation engine: per-round parallel best-response
//! search over the position space, with append-only history.

use std::fmt;

use contracts::{RunStatus, ScenarioConfig};

use crate::actor::{Negotiator, ValuationFrame};
use crate::oracle::UtilityOracle;
use crate::state::{RoundState, StateError, ValuationError};

mod init;
mod inspect;
mod step;

pub use init::ScenarioError;
pub use inspect::CapabilityError;

/// Round-over-round expected utility may not fall below its prior value by
/// more than this; best-response search guarantees it up to round-off.
pub const IMPROVEMENT_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RoundMetrics {
    pub advanced_rounds: u32,
    pub searched_actors: u64,
    pub max_improvement: f64,
}

/// Fatal faults raised while advancing a round. None of these are
/// recoverable: the search and deduplication are deterministic pure
/// functions, so every variant indicates a logic defect upstream.
#[derive(Debug)]
pub enum StepError {
    Valuation {
        round: u32,
        actor: Option<usize>,
        source: ValuationError,
    },
    Monotonicity {
        round: u32,
        actor: usize,
        best_value: f64,
        baseline: f64,
    },
    State {
        round: u32,
        source: StateError,
    },
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valuation {
                round,
                actor,
                source,
            } => match actor {
                Some(actor) => write!(
                    f,
                    "round {round}: valuation fault while searching for actor {actor}: {source}"
                ),
                None => write!(f, "round {round}: valuation fault: {source}"),
            },
            Self::Monotonicity {
                round,
                actor,
                best_value,
                baseline,
            } => write!(
                f,
                "round {round}: best response for actor {actor} scored {best_value}, below the status-quo {baseline}; search and valuation disagree"
            ),
            Self::State { round, source } => {
                write!(f, "round {round}: assembled state is invalid: {source}")
            }
        }
    }
}

impl std::error::Error for StepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Valuation { source, .. } => Some(source),
            Self::State { source, .. } => Some(source),
            Self::Monotonicity { .. } => None,
        }
    }
}

pub struct NegotiationEngine {
    config: ScenarioConfig,
    status: RunStatus,
    roster: Vec<Negotiator>,
    frame: ValuationFrame,
    oracle: Box<dyn UtilityOracle>,
    /// Whether `oracle` is the engine-built coalition oracle; only then does
    /// a pre-run capability change rebuild it.
    default_oracle: bool,
    history: Vec<RoundState>,
    search_pool: Option<rayon::ThreadPool>,
    worker_threads: usize,
    last_round_metrics: RoundMetrics,
}

impl fmt::Debug for NegotiationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationEngine")
            .field("status", &self.status)
            .field("actors", &self.roster.len())
            .field("rounds", &self.history.len())
            .field("worker_threads", &self.worker_threads)
            .finish()
    }
}

#[cfg(test)]
mod tests;
