//! One negotiation round: the roster-aligned position sequence plus its
//! derived bookkeeping, populated at most once.

use std::fmt;

use crate::actor::{Negotiator, ValuationFrame};
use crate::dedupe::{unique_by, UniqueIndex};
use crate::matrix::Matrix;
use crate::oracle::UtilityOracle;
use crate::position::{Position, Ranking};

#[derive(Debug, Clone, PartialEq)]
pub enum StateError {
    Empty,
    MixedItemCounts { actor: usize, expected: usize, got: usize },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "round state has no positions"),
            Self::MixedItemCounts {
                actor,
                expected,
                got,
            } => write!(
                f,
                "actor {actor} holds a {got}-item ranking in a {expected}-item round"
            ),
        }
    }
}

impl std::error::Error for StateError {}

/// Oracle-contract and positivity faults raised while valuing a round or a
/// hypothetical configuration. All of them are fatal to the run.
#[derive(Debug, Clone)]
pub enum ValuationError {
    NonPositiveUtility {
        actor: usize,
        position: usize,
        value: f64,
    },
    OracleArity {
        expected: usize,
        got: usize,
    },
    NonPositiveExpectedUtility {
        actor: usize,
        value: f64,
        matrix: Matrix,
    },
}

impl fmt::Display for ValuationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveUtility {
                actor,
                position,
                value,
            } => write!(
                f,
                "actor {actor} values position {position} at {value}; direct utilities must be strictly positive"
            ),
            Self::OracleArity { expected, got } => write!(
                f,
                "oracle returned {got} expected utilities for {expected} actors"
            ),
            Self::NonPositiveExpectedUtility {
                actor,
                value,
                matrix,
            } => write!(
                f,
                "oracle returned non-positive expected utility {value} for actor {actor}; input matrix:\n{matrix}"
            ),
        }
    }
}

impl std::error::Error for ValuationError {}

/// Bookkeeping derived from a round's positions, computed together on first
/// use: the perspective utility matrix (all actors share one perspective),
/// its unique-column cut, and the oracle's view of the status quo.
#[derive(Debug, Clone)]
pub struct RoundValuations {
    pub utility: Matrix,
    pub unique_utility: Matrix,
    pub choice_shares: Vec<f64>,
    pub expected_utilities: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct RoundState {
    positions: Vec<Ranking>,
    unique: Option<UniqueIndex>,
    valuations: Option<RoundValuations>,
}

impl RoundState {
    /// Positions are owned by the new state; the caller hands over fresh
    /// values, never shared references into an older round.
    pub fn new(positions: Vec<Ranking>) -> Result<Self, StateError> {
        let first_len = match positions.first() {
            Some(ranking) => ranking.len(),
            None => return Err(StateError::Empty),
        };
        for (actor, ranking) in positions.iter().enumerate() {
            if ranking.len() != first_len {
                return Err(StateError::MixedItemCounts {
                    actor,
                    expected: first_len,
                    got: ranking.len(),
                });
            }
        }
        Ok(Self {
            positions,
            unique: None,
            valuations: None,
        })
    }

    pub fn positions(&self) -> &[Ranking] {
        &self.positions
    }

    pub fn num_actors(&self) -> usize {
        self.positions.len()
    }

    pub fn unique(&self) -> Option<&UniqueIndex> {
        self.unique.as_ref()
    }

    pub fn valuations(&self) -> Option<&RoundValuations> {
        self.valuations.as_ref()
    }

    /// One-time computation of the equivalence bookkeeping.
    pub fn ensure_unique(&mut self) -> &UniqueIndex {
        let positions = &self.positions;
        self.unique.get_or_insert_with(|| {
            unique_by(positions.len(), |i, j| {
                positions[i].equivalent(&positions[j])
            })
        })
    }

    /// One-time computation of the utility matrix, its unique-column cut,
    /// and the oracle's status-quo view. The oracle is called with unique
    /// columns only.
    pub fn ensure_valuations(
        &mut self,
        roster: &[Negotiator],
        frame: &ValuationFrame,
        oracle: &dyn UtilityOracle,
    ) -> Result<&RoundValuations, ValuationError> {
        if self.valuations.is_none() {
            let representatives = self.ensure_unique().representatives.clone();
            let num_actors = self.positions.len();

            let mut utility = Matrix::zeros(num_actors, num_actors);
            for (i, negotiator) in roster.iter().enumerate() {
                for (j, position) in self.positions.iter().enumerate() {
                    let value = negotiator.position_utility(position, frame);
                    if !(value > 0.0) {
                        return Err(ValuationError::NonPositiveUtility {
                            actor: i,
                            position: j,
                            value,
                        });
                    }
                    utility.set(i, j, value);
                }
            }

            let unique_utility = utility.select_columns(&representatives);
            let choice_shares = oracle.choice_probabilities(&unique_utility);
            let expected_utilities = oracle.expected_utility(&unique_utility);
            if expected_utilities.len() != num_actors {
                return Err(ValuationError::OracleArity {
                    expected: num_actors,
                    got: expected_utilities.len(),
                });
            }
            for (actor, value) in expected_utilities.iter().enumerate() {
                if !(*value > 0.0) {
                    return Err(ValuationError::NonPositiveExpectedUtility {
                        actor,
                        value: *value,
                        matrix: unique_utility.clone(),
                    });
                }
            }

            self.valuations = Some(RoundValuations {
                utility,
                unique_utility,
                choice_shares,
                expected_utilities,
            });
        }
        match self.valuations.as_ref() {
            Some(valuations) => Ok(valuations),
            None => unreachable!("valuations populated above"),
        }
    }

    /// Behavioral equality: every actor's position equivalent pairwise.
    pub fn equivalent_to(&self, other: &RoundState) -> bool {
        self.positions.len() == other.positions.len()
            && self
                .positions
                .iter()
                .zip(other.positions.iter())
                .all(|(a, b)| a.equivalent(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ActorSpec, VotingRule};

    struct UniformOracle;

    impl UtilityOracle for UniformOracle {
        fn choice_probabilities(&self, unique_utility: &Matrix) -> Vec<f64> {
            vec![1.0 / unique_utility.cols() as f64; unique_utility.cols()]
        }
    }

    fn fixture() -> (Vec<Negotiator>, ValuationFrame) {
        let frame = ValuationFrame::new(vec![10.0, 10.0], 30.0, 0.1, 0.8);
        let specs = vec![
            ActorSpec {
                name: "a".to_string(),
                capability: 10.0,
                item_values: vec![9.0, 1.0],
                voting_rule: VotingRule::Proportional,
            },
            ActorSpec {
                name: "b".to_string(),
                capability: 10.0,
                item_values: vec![1.0, 9.0],
                voting_rule: VotingRule::Proportional,
            },
        ];
        let roster = crate::actor::build_roster(&specs, 2).expect("roster");
        (roster, frame)
    }

    fn ranking(order: &[u16]) -> Ranking {
        Ranking::new(order.to_vec()).expect("valid ranking")
    }

    #[test]
    fn new_rejects_empty_and_mixed_lengths() {
        assert!(matches!(RoundState::new(vec![]), Err(StateError::Empty)));
        let mixed = RoundState::new(vec![ranking(&[0, 1]), ranking(&[0, 1, 2])]);
        assert!(matches!(mixed, Err(StateError::MixedItemCounts { .. })));
    }

    #[test]
    fn unique_index_collapses_equal_positions() {
        let mut state = RoundState::new(vec![
            ranking(&[0, 1]),
            ranking(&[1, 0]),
            ranking(&[0, 1]),
        ])
        .expect("state");
        let unique = state.ensure_unique();
        assert_eq!(unique.representatives, vec![0, 1]);
        assert_eq!(unique.class_of, vec![0, 1, 0]);
    }

    #[test]
    fn valuations_populate_once_and_use_unique_columns() {
        let (roster, frame) = fixture();
        let mut state =
            RoundState::new(vec![ranking(&[0, 1]), ranking(&[0, 1])]).expect("state");
        let valuations = state
            .ensure_valuations(&roster, &frame, &UniformOracle)
            .expect("valuations");
        assert_eq!(valuations.utility.cols(), 2);
        assert_eq!(valuations.unique_utility.cols(), 1);
        assert_eq!(valuations.choice_shares, vec![1.0]);
        assert_eq!(valuations.expected_utilities.len(), 2);
        assert!(valuations.expected_utilities.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn equivalence_is_pairwise_over_the_roster() {
        let a = RoundState::new(vec![ranking(&[0, 1]), ranking(&[1, 0])]).expect("state");
        let b = RoundState::new(vec![ranking(&[0, 1]), ranking(&[1, 0])]).expect("state");
        let c = RoundState::new(vec![ranking(&[1, 0]), ranking(&[0, 1])]).expect("state");
        assert!(a.equivalent_to(&b));
        assert!(!a.equivalent_to(&c));
    }
}
