//! Learned one-step dynamics: locally linear maps conditioned on the
//! position-masked state and action.

use nalgebra::{DMatrix, DVector};
use rand::distributions::Uniform;
use rand::Rng;

use crate::dataset::{check_consistent, Transition};
use crate::error::Error;
use crate::{Action, State};

/// Forward model `next = x + (A(z)·mask(x) + B(z)·u) · dt`, where `z` is the
/// concatenation of the masked state and the action, and `A`, `B` come from
/// linear heads over `z`. Positional components are zeroed on both the head
/// input and the state `A` multiplies, so predicted deltas never depend on
/// absolute position.
#[derive(Debug, Clone)]
pub struct DynamicsModel {
    state_size: usize,
    action_size: usize,
    dt: f64,
    position_dims: Vec<usize>,
    w_a: DMatrix<f64>,
    b_a: DVector<f64>,
    w_b: DMatrix<f64>,
    b_b: DVector<f64>,
}

impl DynamicsModel {
    pub fn new(
        state_size: usize,
        action_size: usize,
        dt: f64,
        position_dims: Vec<usize>,
        rng: &mut impl Rng,
    ) -> Result<Self, Error> {
        validate(state_size, action_size, dt, &position_dims)?;
        let input = state_size + action_size;
        Ok(Self {
            state_size,
            action_size,
            dt,
            position_dims,
            w_a: xavier(state_size * state_size, input, rng),
            b_a: DVector::zeros(state_size * state_size),
            w_b: xavier(state_size * action_size, input, rng),
            b_b: DVector::zeros(state_size * action_size),
        })
    }

    /// Rebuild a model from raw head parameters. Sizes are inferred from the
    /// bias lengths; persistence of trained parameters is the caller's
    /// concern, this and [`DynamicsModel::params`] are the hooks for it.
    pub fn from_parts(
        w_a: DMatrix<f64>,
        b_a: DVector<f64>,
        w_b: DMatrix<f64>,
        b_b: DVector<f64>,
        dt: f64,
        position_dims: Vec<usize>,
    ) -> Result<Self, Error> {
        let s = (b_a.len() as f64).sqrt().round() as usize;
        if s == 0 || s * s != b_a.len() {
            return Err(Error::InvalidShape {
                what: "A head bias",
                expected: s * s,
                got: b_a.len(),
            });
        }
        if b_b.is_empty() || b_b.len() % s != 0 {
            return Err(Error::InvalidShape {
                what: "B head bias",
                expected: s,
                got: b_b.len(),
            });
        }
        let action_size = b_b.len() / s;
        let input = s + action_size;
        if w_a.nrows() != s * s || w_a.ncols() != input {
            return Err(Error::InvalidShape {
                what: "A head weights",
                expected: s * s * input,
                got: w_a.nrows() * w_a.ncols(),
            });
        }
        if w_b.nrows() != s * action_size || w_b.ncols() != input {
            return Err(Error::InvalidShape {
                what: "B head weights",
                expected: s * action_size * input,
                got: w_b.nrows() * w_b.ncols(),
            });
        }
        validate(s, action_size, dt, &position_dims)?;
        Ok(Self {
            state_size: s,
            action_size,
            dt,
            position_dims,
            w_a,
            b_a,
            w_b,
            b_b,
        })
    }

    pub fn params(
        &self,
    ) -> (
        &DMatrix<f64>,
        &DVector<f64>,
        &DMatrix<f64>,
        &DVector<f64>,
    ) {
        (&self.w_a, &self.b_a, &self.w_b, &self.b_b)
    }

    pub fn state_size(&self) -> usize {
        self.state_size
    }

    pub fn action_size(&self) -> usize {
        self.action_size
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn forward(&self, state: &State, action: &Action) -> Result<State, Error> {
        Ok(self.forward_linearized(state, action)?.0)
    }

    pub fn forward_batch(
        &self,
        states: &[State],
        actions: &[Action],
    ) -> Result<Vec<State>, Error> {
        if states.len() != actions.len() {
            return Err(Error::InvalidShape {
                what: "batch",
                expected: states.len(),
                got: actions.len(),
            });
        }
        states
            .iter()
            .zip(actions)
            .map(|(x, u)| self.forward(x, u))
            .collect()
    }

    /// `A`, `B` evaluated at one `(state, action)` point.
    pub fn linearize(
        &self,
        state: &State,
        action: &Action,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), Error> {
        let (_, a, b) = self.forward_linearized(state, action)?;
        Ok((a, b))
    }

    /// One step together with the matrices that produced it.
    pub fn forward_linearized(
        &self,
        state: &State,
        action: &Action,
    ) -> Result<(State, DMatrix<f64>, DMatrix<f64>), Error> {
        self.check_pair(state, action)?;
        let xm = self.masked(state);
        let z = self.joint(&xm, action);
        let (a, b) = self.heads(&z);
        let next = state + (&a * &xm + &b * action) * self.dt;
        Ok((next, a, b))
    }

    /// Full-batch gradient descent on the mean squared one-step prediction
    /// error. The validation split is scored every epoch but never trained
    /// on. Returns the per-epoch `(train_loss, validation_loss)` curve.
    pub fn train(
        &mut self,
        train_set: &[Transition],
        validation_set: &[Transition],
        epochs: usize,
        learning_rate: f64,
    ) -> Result<Vec<(f64, f64)>, Error> {
        if train_set.is_empty() {
            return Err(Error::EmptyDataset { split: "train" });
        }
        if validation_set.is_empty() {
            return Err(Error::EmptyDataset {
                split: "validation",
            });
        }
        check_consistent(train_set, self.state_size, self.action_size)?;
        check_consistent(validation_set, self.state_size, self.action_size)?;

        let s = self.state_size;
        let input = s + self.action_size;
        let inv = 1.0 / (train_set.len() * s) as f64;
        let mut curve = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            let mut gw_a = DMatrix::<f64>::zeros(s * s, input);
            let mut gb_a = DVector::<f64>::zeros(s * s);
            let mut gw_b = DMatrix::<f64>::zeros(s * self.action_size, input);
            let mut gb_b = DVector::<f64>::zeros(s * self.action_size);
            let mut loss = 0.0;

            for tr in train_set {
                let xm = self.masked(&tr.state);
                let z = self.joint(&xm, &tr.action);
                let (a, b) = self.heads(&z);
                let pred = &tr.state + (&a * &xm + &b * &tr.action) * self.dt;
                let err = pred - &tr.next_state;
                loss += err.dot(&err) * inv;

                // ヘッドは z に対して線形なので勾配は閉形式で求まる
                let e = err * (2.0 * inv * self.dt);
                let da = &e * xm.transpose();
                let db = &e * tr.action.transpose();
                let dav = DVector::from_fn(s * s, |k, _| da[(k / s, k % s)]);
                let dbv = DVector::from_fn(s * self.action_size, |k, _| {
                    db[(k / self.action_size, k % self.action_size)]
                });
                gw_a += &dav * z.transpose();
                gb_a += dav;
                gw_b += &dbv * z.transpose();
                gb_b += dbv;
            }

            if !loss.is_finite() {
                return Err(Error::NumericalInstability {
                    context: "training loss",
                    value: loss,
                });
            }

            self.w_a -= gw_a * learning_rate;
            self.b_a -= gb_a * learning_rate;
            self.w_b -= gw_b * learning_rate;
            self.b_b -= gb_b * learning_rate;

            let val_loss = self.mse(validation_set)?;
            if !val_loss.is_finite() {
                return Err(Error::NumericalInstability {
                    context: "validation loss",
                    value: val_loss,
                });
            }
            log::debug!("epoch {epoch}: train={loss:.6e} val={val_loss:.6e}");
            curve.push((loss, val_loss));
        }
        Ok(curve)
    }

    fn mse(&self, set: &[Transition]) -> Result<f64, Error> {
        let inv = 1.0 / (set.len() * self.state_size) as f64;
        let mut loss = 0.0;
        for tr in set {
            let pred = self.forward(&tr.state, &tr.action)?;
            let err = pred - &tr.next_state;
            loss += err.dot(&err) * inv;
        }
        Ok(loss)
    }

    fn masked(&self, state: &State) -> State {
        let mut m = state.clone();
        for &d in &self.position_dims {
            m[d] = 0.0;
        }
        m
    }

    fn joint(&self, masked_state: &State, action: &Action) -> DVector<f64> {
        let s = self.state_size;
        DVector::from_fn(s + self.action_size, |i, _| {
            if i < s {
                masked_state[i]
            } else {
                action[i - s]
            }
        })
    }

    fn heads(&self, z: &DVector<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let s = self.state_size;
        let a_dim = self.action_size;
        let av = &self.w_a * z + &self.b_a;
        let bv = &self.w_b * z + &self.b_b;
        let a = DMatrix::from_fn(s, s, |i, j| av[i * s + j]);
        let b = DMatrix::from_fn(s, a_dim, |i, j| bv[i * a_dim + j]);
        (a, b)
    }

    fn check_pair(&self, state: &State, action: &Action) -> Result<(), Error> {
        if state.len() != self.state_size {
            return Err(Error::InvalidShape {
                what: "state",
                expected: self.state_size,
                got: state.len(),
            });
        }
        if action.len() != self.action_size {
            return Err(Error::InvalidShape {
                what: "action",
                expected: self.action_size,
                got: action.len(),
            });
        }
        Ok(())
    }
}

fn validate(
    state_size: usize,
    action_size: usize,
    dt: f64,
    position_dims: &[usize],
) -> Result<(), Error> {
    if state_size == 0 {
        return Err(Error::InvalidShape {
            what: "state_size",
            expected: 1,
            got: 0,
        });
    }
    if action_size == 0 {
        return Err(Error::InvalidShape {
            what: "action_size",
            expected: 1,
            got: 0,
        });
    }
    if !dt.is_finite() || dt <= 0.0 {
        return Err(Error::NumericalInstability {
            context: "dt",
            value: dt,
        });
    }
    for &d in position_dims {
        if d >= state_size {
            return Err(Error::InvalidShape {
                what: "position_dims",
                expected: state_size,
                got: d,
            });
        }
    }
    Ok(())
}

fn xavier(out: usize, input: usize, rng: &mut impl Rng) -> DMatrix<f64> {
    let limit = (6.0 / (input + out) as f64).sqrt();
    let dist = Uniform::new(-limit, limit);
    DMatrix::from_fn(out, input, |_, _| rng.sample(dist))
}
