use rayon::prelude::*;

use contracts::RunMode;

use super::{NegotiationEngine, RoundMetrics, StepError, IMPROVEMENT_EPS};
use crate::dedupe::unique_by;
use crate::matrix::Matrix;
use crate::position::{Position, Ranking};
use crate::search::{climb, SearchOutcome};
use crate::state::{RoundState, RoundValuations, ValuationError};

impl NegotiationEngine {
    pub fn start(&mut self) {
        if !self.status.is_complete() {
            self.status.mode = RunMode::Running;
        }
    }

    pub fn pause(&mut self) {
        self.status.mode = RunMode::Paused;
    }

    /// Advance one round: every actor independently searches for its best
    /// response against the frozen current state, and the chosen positions
    /// become the next state. Returns `false` once the run is complete
    /// (converged, cycled, or out of rounds); the engine is then a no-op.
    pub fn advance_round(&mut self) -> Result<bool, StepError> {
        if self.status.is_complete() {
            self.status.mode = RunMode::Paused;
            return Ok(false);
        }
        self.status.mode = RunMode::Running;
        let round = self.status.round;

        // One-time population of the current round's bookkeeping.
        self.populate_last_round()?;

        let state = match self.history.last() {
            Some(state) => state,
            None => return Ok(false),
        };
        let valuations = match state.valuations() {
            Some(valuations) => valuations,
            None => return Ok(false),
        };
        let eu0 = valuations.expected_utilities.clone();

        let outcomes = self.search_all_actors(state, valuations, round)?;

        // Best response starts from the actor's current position and never
        // adopts anything worse, so a drop beyond round-off means the
        // hypothetical and status-quo valuation paths disagree.
        let mut max_improvement = 0.0_f64;
        for (h, outcome) in outcomes.iter().enumerate() {
            let baseline = eu0[h];
            if outcome.best_value < baseline - IMPROVEMENT_EPS {
                return Err(StepError::Monotonicity {
                    round,
                    actor: h,
                    best_value: outcome.best_value,
                    baseline,
                });
            }
            max_improvement = max_improvement.max(outcome.best_value - baseline);
        }

        let searched_actors = outcomes.len() as u64;
        let positions: Vec<Ranking> = outcomes
            .into_iter()
            .map(|outcome| outcome.best_position)
            .collect();
        let mut next = RoundState::new(positions)
            .map_err(|source| StepError::State { round, source })?;
        next.ensure_unique();

        if let Some(matched) = self
            .history
            .iter()
            .position(|prior| prior.equivalent_to(&next))
        {
            self.status.matched_round = Some(matched as u32);
            if matched + 1 == self.history.len() {
                self.status.converged = true;
            }
        }

        self.history.push(next);
        self.status.round += 1;
        self.last_round_metrics = RoundMetrics {
            advanced_rounds: 1,
            searched_actors,
            max_improvement,
        };

        if self.status.is_complete() {
            self.status.mode = RunMode::Paused;
            self.populate_last_round()?;
        }
        Ok(true)
    }

    pub fn advance_rounds(&mut self, rounds: u32) -> Result<u32, StepError> {
        let mut committed = 0;
        for _ in 0..rounds {
            if !self.advance_round()? {
                break;
            }
            committed += 1;
        }
        Ok(committed)
    }

    /// Step until the run converges, cycles, or exhausts its round budget.
    /// The whole history is inspectable afterwards.
    pub fn run_to_convergence(&mut self) -> Result<u32, StepError> {
        let mut committed = 0;
        while self.advance_round()? {
            committed += 1;
        }
        self.populate_last_round()?;
        Ok(committed)
    }

    pub(super) fn populate_last_round(&mut self) -> Result<(), StepError> {
        let round = self.status.round;
        let Self {
            history,
            roster,
            frame,
            oracle,
            ..
        } = self;
        if let Some(state) = history.last_mut() {
            state
                .ensure_valuations(roster, frame, oracle.as_ref())
                .map_err(|source| StepError::Valuation {
                    round,
                    actor: None,
                    source,
                })?;
        }
        Ok(())
    }

    /// One search task per actor. Tasks share the immutable current-state
    /// snapshot and nothing else; the indexed collect is the join barrier
    /// and keeps results in roster order regardless of scheduling.
    fn search_all_actors(
        &self,
        state: &RoundState,
        valuations: &RoundValuations,
        round: u32,
    ) -> Result<Vec<SearchOutcome<Ranking>>, StepError> {
        let actor_indices: Vec<usize> = (0..self.roster.len()).collect();
        if self.worker_threads <= 1 || actor_indices.len() <= 1 {
            return actor_indices
                .into_iter()
                .map(|h| self.best_response(state, valuations, h, round))
                .collect();
        }
        let engine_ref: &NegotiationEngine = self;
        match &self.search_pool {
            Some(pool) => pool.install(|| {
                actor_indices
                    .into_par_iter()
                    .map(|h| engine_ref.best_response(state, valuations, h, round))
                    .collect()
            }),
            None => actor_indices
                .into_iter()
                .map(|h| engine_ref.best_response(state, valuations, h, round))
                .collect(),
        }
    }

    fn best_response(
        &self,
        state: &RoundState,
        valuations: &RoundValuations,
        h: usize,
        round: u32,
    ) -> Result<SearchOutcome<Ranking>, StepError> {
        let start = state.positions()[h].clone();
        climb(
            start,
            |candidate| self.hypothetical_score(state, valuations, h, candidate),
            |position: &Ranking| position.neighbors(),
            &self.config.search,
        )
        .map_err(|source| StepError::Valuation {
            round,
            actor: Some(h),
            source,
        })
    }

    /// Actor `h`'s expected utility under the hypothesis that only `h` moves
    /// to `candidate` while everyone else keeps their current position:
    /// rebuild utility column `h` from every actor's true valuation of the
    /// candidate, re-deduplicate the overlaid configuration (the move can
    /// create or dissolve agreements), and ask the oracle.
    fn hypothetical_score(
        &self,
        state: &RoundState,
        valuations: &RoundValuations,
        h: usize,
        candidate: &Ranking,
    ) -> Result<f64, ValuationError> {
        let num_actors = self.roster.len();

        let mut candidate_column = Vec::with_capacity(num_actors);
        for negotiator in &self.roster {
            let value = negotiator.position_utility(candidate, &self.frame);
            if !(value > 0.0) {
                return Err(ValuationError::NonPositiveUtility {
                    actor: negotiator.index,
                    position: h,
                    value,
                });
            }
            candidate_column.push(value);
        }

        let positions = state.positions();
        let unique = unique_by(num_actors, |i, j| {
            let pi = if i == h { candidate } else { &positions[i] };
            let pj = if j == h { candidate } else { &positions[j] };
            pi.equivalent(pj)
        });

        let hypothetical = Matrix::from_fn(num_actors, unique.num_classes(), |i, j1| {
            let j = unique.representatives[j1];
            if j == h {
                candidate_column[i]
            } else {
                valuations.utility.get(i, j)
            }
        });

        let expected = self.oracle.expected_utility(&hypothetical);
        if expected.len() != num_actors {
            return Err(ValuationError::OracleArity {
                expected: num_actors,
                got: expected.len(),
            });
        }
        let score = expected[h];
        if !(score > 0.0) {
            return Err(ValuationError::NonPositiveExpectedUtility {
                actor: h,
                value: score,
                matrix: hypothetical,
            });
        }
        Ok(score)
    }
}
