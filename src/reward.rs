use crate::error::Error;
use crate::State;

const NORM_EPS: f64 = 1e-12;

/// Goal-distance scoring: the negated square root of a weighted L1 norm.
///
/// Dense shaping reward, maximal (zero) exactly at the goal. Weights are
/// environment-supplied constants; the model itself holds no mutable state.
#[derive(Debug, Clone)]
pub struct RewardModel {
    weights: State,
}

impl RewardModel {
    pub fn new(weights: State) -> Result<Self, Error> {
        if weights.is_empty() {
            return Err(Error::InvalidShape {
                what: "reward weights",
                expected: 1,
                got: 0,
            });
        }
        for i in 0..weights.len() {
            if !weights[i].is_finite() || weights[i] < 0.0 {
                return Err(Error::NumericalInstability {
                    context: "reward weights",
                    value: weights[i],
                });
            }
        }
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &State {
        &self.weights
    }

    pub fn evaluate(&self, state: &State, goal: &State) -> Result<f64, Error> {
        self.check(state, goal)?;
        Ok(-self.distance(state, goal).sqrt())
    }

    /// Per-step rewards along the time axis, step `t` scaled by `discount^t`.
    pub fn evaluate_traj(
        &self,
        states: &[State],
        goal: &State,
        discount: Option<f64>,
    ) -> Result<Vec<f64>, Error> {
        let gamma = discount.unwrap_or(1.0);
        let mut factor = 1.0;
        let mut out = Vec::with_capacity(states.len());
        for s in states {
            out.push(factor * self.evaluate(s, goal)?);
            factor *= gamma;
        }
        Ok(out)
    }

    /// Gradient of `evaluate` with respect to the state. Zero at the goal.
    pub fn evaluate_grad(&self, state: &State, goal: &State) -> Result<State, Error> {
        self.check(state, goal)?;
        let m = self.distance(state, goal);
        let mut grad = State::zeros(state.len());
        if m <= NORM_EPS {
            return Ok(grad);
        }
        let scale = -0.5 / m.sqrt();
        for i in 0..state.len() {
            let d = state[i] - goal[i];
            let sign = if d > 0.0 {
                1.0
            } else if d < 0.0 {
                -1.0
            } else {
                0.0
            };
            grad[i] = scale * self.weights[i] * sign;
        }
        Ok(grad)
    }

    fn distance(&self, state: &State, goal: &State) -> f64 {
        let mut m = 0.0;
        for i in 0..state.len() {
            m += self.weights[i] * (state[i] - goal[i]).abs();
        }
        m
    }

    fn check(&self, state: &State, goal: &State) -> Result<(), Error> {
        if state.len() != self.weights.len() {
            return Err(Error::InvalidShape {
                what: "state",
                expected: self.weights.len(),
                got: state.len(),
            });
        }
        if goal.len() != self.weights.len() {
            return Err(Error::InvalidShape {
                what: "goal",
                expected: self.weights.len(),
                got: goal.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> RewardModel {
        RewardModel::new(State::from_vec(vec![1.0, 1.0, 0.5])).unwrap()
    }

    #[test]
    fn symmetric_under_symmetric_weights() {
        let r = model();
        let a = State::from_vec(vec![1.0, -2.0, 0.5]);
        let b = State::from_vec(vec![0.0, 1.0, -0.5]);
        assert_eq!(r.evaluate(&a, &b).unwrap(), r.evaluate(&b, &a).unwrap());
    }

    #[test]
    fn maximal_only_at_goal() {
        let r = model();
        let goal = State::from_vec(vec![1.0, 0.0, -1.0]);
        assert_eq!(r.evaluate(&goal, &goal).unwrap(), 0.0);
        let off = State::from_vec(vec![1.0, 0.1, -1.0]);
        assert!(r.evaluate(&off, &goal).unwrap() < 0.0);
    }

    #[test]
    fn discount_scales_by_step_index() {
        let r = model();
        let goal = State::zeros(3);
        let s = State::from_vec(vec![1.0, 0.0, 0.0]);
        let traj = vec![s.clone(), s.clone(), s];
        let rewards = r.evaluate_traj(&traj, &goal, Some(0.5)).unwrap();
        assert!((rewards[0] - -1.0).abs() < 1e-12);
        assert!((rewards[1] - -0.5).abs() < 1e-12);
        assert!((rewards[2] - -0.25).abs() < 1e-12);
    }

    #[test]
    fn gradient_is_zero_at_goal_and_points_uphill_elsewhere() {
        let r = model();
        let goal = State::zeros(3);
        assert_eq!(r.evaluate_grad(&goal, &goal).unwrap(), State::zeros(3));

        let s = State::from_vec(vec![4.0, 0.0, 0.0]);
        let grad = r.evaluate_grad(&s, &goal).unwrap();
        // reward = -sqrt(|x0|), d/dx0 = -0.5 / sqrt(4) = -0.25
        assert!((grad[0] - -0.25).abs() < 1e-12);
        assert_eq!(grad[1], 0.0);

        // moving along the gradient must not decrease the reward
        let stepped = &s + &grad * 1e-3;
        assert!(r.evaluate(&stepped, &goal).unwrap() > r.evaluate(&s, &goal).unwrap());
    }

    #[test]
    fn rejects_bad_weights_and_shapes() {
        assert!(RewardModel::new(State::zeros(0)).is_err());
        assert!(RewardModel::new(State::from_vec(vec![1.0, -1.0])).is_err());
        let r = model();
        let err = r.evaluate(&State::zeros(2), &State::zeros(3)).unwrap_err();
        assert!(matches!(err, Error::InvalidShape { what: "state", .. }));
    }
}
