extern crate nalgebra as na;

pub mod cem;
pub mod dataset;
pub mod dynamics;
pub mod error;
pub mod gradient;
pub mod reward;
pub mod rollout;

pub use cem::{CemConfig, CemPlanner};
pub use dataset::{split, Transition};
pub use dynamics::DynamicsModel;
pub use error::Error;
pub use gradient::{GradientConfig, GradientPlanner};
pub use reward::RewardModel;

/// Type for state vectors of dimension `state_size`.
pub type State = na::DVector<f64>;
/// Type for control vectors of dimension `action_size`.
pub type Action = na::DVector<f64>;
/// Type for action sequences, one row per planned timestep.
pub type ActionSeq = na::DMatrix<f64>;

/// Receding-horizon strategy: optimize an action sequence for the given
/// state and goal, return the first action of the optimized sequence.
pub trait Planner {
    fn plan(&mut self, state: &State, goal: &State) -> Result<Action, Error>;
}

/// Componentwise action box supplied by the environment.
#[derive(Debug, Clone)]
pub struct Bounds {
    low: Action,
    high: Action,
}

impl Bounds {
    pub fn new(low: Action, high: Action) -> Result<Self, Error> {
        if low.len() != high.len() {
            return Err(Error::InvalidShape {
                what: "action bounds",
                expected: low.len(),
                got: high.len(),
            });
        }
        for i in 0..low.len() {
            if !(low[i].is_finite() && high[i].is_finite() && low[i] <= high[i]) {
                return Err(Error::NumericalInstability {
                    context: "action bounds",
                    value: low[i],
                });
            }
        }
        Ok(Self { low, high })
    }

    /// Same scalar limits for every action dimension.
    pub fn uniform(low: f64, high: f64, dim: usize) -> Result<Self, Error> {
        Self::new(
            Action::from_element(dim, low),
            Action::from_element(dim, high),
        )
    }

    pub fn len(&self) -> usize {
        self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.low.len() == 0
    }

    pub fn low(&self) -> &Action {
        &self.low
    }

    pub fn high(&self) -> &Action {
        &self.high
    }

    pub fn clamp_action(&self, u: &mut Action) {
        for i in 0..u.len() {
            u[i] = u[i].clamp(self.low[i], self.high[i]);
        }
    }

    pub fn clamp_seq(&self, u: &mut ActionSeq) {
        for t in 0..u.nrows() {
            for i in 0..u.ncols() {
                u[(t, i)] = u[(t, i)].clamp(self.low[i], self.high[i]);
            }
        }
    }

    pub fn contains(&self, u: &Action) -> bool {
        u.len() == self.low.len()
            && (0..u.len()).all(|i| self.low[i] <= u[i] && u[i] <= self.high[i])
    }
}
