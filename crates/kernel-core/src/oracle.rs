//! Expected-utility oracle: the coalition / pairwise-victory / probability-
//! of-choice pipeline behind the round transition's scoring calls.

use contracts::{ChoiceModel, VictoryModel, VotingRule};

use crate::matrix::Matrix;

const MARKOV_TOLERANCE: f64 = 1e-10;
const MARKOV_MAX_SWEEPS: usize = 1000;

/// Pure scoring capability the round transition consumes. Implementations
/// must be deterministic and side-effect free; the input matrix always
/// carries one row per actor and one column per *unique* position, so no
/// probability mass is inflated by duplicate columns.
pub trait UtilityOracle: Send + Sync {
    /// Probability of each unique position being the collective outcome.
    fn choice_probabilities(&self, unique_utility: &Matrix) -> Vec<f64>;

    /// Expected utility per actor; the default marginalizes the utility
    /// matrix over the choice distribution.
    fn expected_utility(&self, unique_utility: &Matrix) -> Vec<f64> {
        unique_utility.mul_vector(&self.choice_probabilities(unique_utility))
    }
}

/// One voter's pairwise vote for option `i` over option `j`: influence scaled
/// by the utility difference according to the voter's rule.
pub fn vote(rule: VotingRule, capability: f64, u_i: f64, u_j: f64) -> f64 {
    let delta = u_i - u_j;
    match rule {
        VotingRule::Binary => {
            if delta > 0.0 {
                capability
            } else if delta < 0.0 {
                -capability
            } else {
                0.0
            }
        }
        VotingRule::Proportional => capability * delta,
        VotingRule::Cubic => capability * delta * delta * delta,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoterWeight {
    pub capability: f64,
    pub rule: VotingRule,
}

/// Reference oracle: votes aggregate into coalition strengths, strengths map
/// to pairwise victory probabilities, and a choice model turns the victory
/// matrix into a distribution over the unique positions.
#[derive(Debug, Clone)]
pub struct CoalitionOracle {
    voters: Vec<VoterWeight>,
    victory: VictoryModel,
    choice: ChoiceModel,
}

impl CoalitionOracle {
    pub fn new(voters: Vec<VoterWeight>, victory: VictoryModel, choice: ChoiceModel) -> Self {
        Self {
            voters,
            victory,
            choice,
        }
    }

    pub fn num_voters(&self) -> usize {
        self.voters.len()
    }

    /// `c(i, j)` = total influence of the voters favoring option `i` over
    /// option `j`. Row count of `u` must match the voter roster.
    fn coalition_strengths(&self, u: &Matrix) -> Matrix {
        assert_eq!(
            u.rows(),
            self.voters.len(),
            "utility rows {} do not match voter count {}",
            u.rows(),
            self.voters.len()
        );
        let n = u.cols();
        Matrix::from_fn(n, n, |i, j| {
            if i == j {
                return 0.0;
            }
            self.voters
                .iter()
                .enumerate()
                .map(|(k, voter)| {
                    vote(voter.rule, voter.capability, u.get(k, i), u.get(k, j)).max(0.0)
                })
                .sum()
        })
    }

    fn victory_probabilities(&self, strengths: &Matrix) -> Matrix {
        let n = strengths.rows();
        Matrix::from_fn(n, n, |i, j| {
            if i == j {
                return 0.5;
            }
            let c_ij = strengths.get(i, j);
            let c_ji = strengths.get(j, i);
            match self.victory {
                VictoryModel::Binary => {
                    if c_ij > c_ji {
                        1.0
                    } else if c_ij < c_ji {
                        0.0
                    } else {
                        0.5
                    }
                }
                VictoryModel::Linear => ratio_or_half(c_ij, c_ji),
                VictoryModel::Square => ratio_or_half(c_ij * c_ij, c_ji * c_ji),
            }
        })
    }

    fn choice_from_victory(&self, victory: &Matrix) -> Vec<f64> {
        let n = victory.rows();
        if n == 1 {
            return vec![1.0];
        }
        match self.choice {
            ChoiceModel::Conditional => {
                // Closed form: each option's share of the pairwise victories.
                let pair_mass = (n * (n - 1)) as f64 / 2.0;
                (0..n)
                    .map(|i| {
                        let row_sum: f64 = (0..n)
                            .filter(|j| *j != i)
                            .map(|j| victory.get(i, j))
                            .sum();
                        row_sum / pair_mass
                    })
                    .collect()
            }
            ChoiceModel::Markov => {
                // Power iteration from uniform to the victory matrix's fixed
                // point; deterministic given the tolerance and sweep cap.
                let mut current = vec![1.0 / n as f64; n];
                for _ in 0..MARKOV_MAX_SWEEPS {
                    let mut next = victory.mul_vector(&current);
                    let total: f64 = next.iter().sum();
                    if total > 0.0 {
                        for value in &mut next {
                            *value /= total;
                        }
                    }
                    let shift = current
                        .iter()
                        .zip(next.iter())
                        .map(|(a, b)| (a - b).abs())
                        .fold(0.0, f64::max);
                    current = next;
                    if shift < MARKOV_TOLERANCE {
                        break;
                    }
                }
                current
            }
        }
    }
}

fn ratio_or_half(a: f64, b: f64) -> f64 {
    let total = a + b;
    if total > 0.0 {
        a / total
    } else {
        0.5
    }
}

impl UtilityOracle for CoalitionOracle {
    fn choice_probabilities(&self, unique_utility: &Matrix) -> Vec<f64> {
        let strengths = self.coalition_strengths(unique_utility);
        let victory = self.victory_probabilities(&strengths);
        self.choice_from_victory(&victory)
    }
}
