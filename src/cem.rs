//! Cross-entropy planning: iterative Gaussian refitting on elite samples.

use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dynamics::DynamicsModel;
use crate::error::Error;
use crate::reward::RewardModel;
use crate::{rollout, Action, ActionSeq, Bounds, Planner, State};

/// Minimum sampling spread kept after every refit.
const STD_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct CemConfig {
    pub horizon: usize,
    pub iterations: usize,
    pub population: usize,
    pub selection: usize,
    pub action_repeat: usize,
    pub init_std: f64,
    pub discount: Option<f64>,
    pub seed: Option<u64>,
}

impl Default for CemConfig {
    fn default() -> Self {
        Self {
            horizon: 15,
            iterations: 10,
            population: 200,
            selection: 20,
            action_repeat: 1,
            init_std: 1.0,
            discount: None,
            seed: None,
        }
    }
}

pub struct CemPlanner {
    model: DynamicsModel,
    reward: RewardModel,
    bounds: Bounds,
    config: CemConfig,
    rng: Xoshiro256PlusPlus,
}

impl CemPlanner {
    pub fn new(
        model: DynamicsModel,
        reward: RewardModel,
        bounds: Bounds,
        config: CemConfig,
    ) -> Result<Self, Error> {
        if bounds.len() != model.action_size() {
            return Err(Error::InvalidShape {
                what: "action bounds",
                expected: model.action_size(),
                got: bounds.len(),
            });
        }
        if reward.weights().len() != model.state_size() {
            return Err(Error::InvalidShape {
                what: "reward weights",
                expected: model.state_size(),
                got: reward.weights().len(),
            });
        }
        if config.horizon == 0 {
            return Err(Error::InvalidShape {
                what: "horizon",
                expected: 1,
                got: 0,
            });
        }
        if config.action_repeat == 0 {
            return Err(Error::InvalidShape {
                what: "action_repeat",
                expected: 1,
                got: 0,
            });
        }
        if config.selection > config.population {
            return Err(Error::InvalidShape {
                what: "selection",
                expected: config.population,
                got: config.selection,
            });
        }
        let rng = match config.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        Ok(Self {
            model,
            reward,
            bounds,
            config,
            rng,
        })
    }

    fn check_pair(&self, state: &State, goal: &State) -> Result<(), Error> {
        if state.len() != self.model.state_size() {
            return Err(Error::InvalidShape {
                what: "state",
                expected: self.model.state_size(),
                got: state.len(),
            });
        }
        if goal.len() != self.model.state_size() {
            return Err(Error::InvalidShape {
                what: "goal",
                expected: self.model.state_size(),
                got: goal.len(),
            });
        }
        Ok(())
    }

    fn sample(&mut self, mean: &ActionSeq, std: &ActionSeq) -> Vec<ActionSeq> {
        let population = self.config.population;
        let rng = &mut self.rng;
        let bounds = &self.bounds;
        (0..population)
            .map(|_| {
                ActionSeq::from_fn(mean.nrows(), mean.ncols(), |t, j| {
                    let n: f64 = rng.sample(StandardNormal);
                    (mean[(t, j)] + std[(t, j)] * n).clamp(bounds.low()[j], bounds.high()[j])
                })
            })
            .collect()
    }
}

impl Planner for CemPlanner {
    fn plan(&mut self, state: &State, goal: &State) -> Result<Action, Error> {
        self.check_pair(state, goal)?;
        let cfg = self.config;
        let dim = self.model.action_size();
        let mut mean = ActionSeq::zeros(cfg.horizon, dim);
        let mut std = ActionSeq::from_element(cfg.horizon, dim, cfg.init_std.max(STD_FLOOR));

        if cfg.population > 0 && cfg.selection > 0 {
            for round in 0..cfg.iterations {
                let samples = self.sample(&mean, &std);
                let trajs =
                    rollout::predict_batch(&self.model, state, &samples, cfg.action_repeat)?;

                // 各候補のスコアは報酬の時間和
                let mut scores = Vec::with_capacity(trajs.len());
                for traj in &trajs {
                    let r: f64 = self
                        .reward
                        .evaluate_traj(traj, goal, cfg.discount)?
                        .iter()
                        .sum();
                    scores.push(if r.is_finite() { r } else { f64::NEG_INFINITY });
                }

                let elites = select_elites(&scores, cfg.selection);
                let (m, sd) = refit(&samples, &elites);
                mean = m;
                std = sd;
                log::trace!("cem round {round}: best score {:.4}", scores[elites[0]]);
            }
        }

        let mut action = mean.row(0).transpose();
        self.bounds.clamp_action(&mut action);
        Ok(action)
    }
}

/// Indices of the `selection` best scores, highest first. The sort is
/// stable, so ties keep the lowest index.
fn select_elites(scores: &[f64], selection: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&i, &j| scores[j].partial_cmp(&scores[i]).unwrap_or(std::cmp::Ordering::Equal));
    order.truncate(selection);
    order
}

/// Elite mean and biased standard deviation per timestep and dimension.
fn refit(samples: &[ActionSeq], elites: &[usize]) -> (ActionSeq, ActionSeq) {
    let n = elites.len() as f64;
    let (rows, cols) = samples[elites[0]].shape();
    let mut mean = ActionSeq::zeros(rows, cols);
    for &i in elites {
        mean += &samples[i];
    }
    mean /= n;
    let mut var = ActionSeq::zeros(rows, cols);
    for &i in elites {
        let d = &samples[i] - &mean;
        var += d.component_mul(&d);
    }
    var /= n;
    let std = var.map(|v| v.sqrt().max(STD_FLOOR));
    (mean, std)
}
