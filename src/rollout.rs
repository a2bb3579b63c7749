use rayon::prelude::*;

use crate::dynamics::DynamicsModel;
use crate::error::Error;
use crate::{ActionSeq, State};

/// Unroll the model from `initial`, holding each action in the sequence for
/// `action_repeat` consecutive steps. The returned trajectory excludes the
/// initial state, so its length is `rows(actions) * action_repeat`.
pub fn predict(
    model: &DynamicsModel,
    initial: &State,
    actions: &ActionSeq,
    action_repeat: usize,
) -> Result<Vec<State>, Error> {
    if action_repeat == 0 {
        return Err(Error::InvalidShape {
            what: "action_repeat",
            expected: 1,
            got: 0,
        });
    }
    if actions.ncols() != model.action_size() {
        return Err(Error::InvalidShape {
            what: "action sequence",
            expected: model.action_size(),
            got: actions.ncols(),
        });
    }
    let mut x = initial.clone();
    let mut traj = Vec::with_capacity(actions.nrows() * action_repeat);
    for t in 0..actions.nrows() {
        let u = actions.row(t).transpose();
        for _ in 0..action_repeat {
            x = model.forward(&x, &u)?;
            traj.push(x.clone());
        }
    }
    Ok(traj)
}

/// One shared initial state broadcast across a population of candidate
/// sequences, evaluated in parallel. Semantics match mapping [`predict`]
/// over the candidates.
pub fn predict_batch(
    model: &DynamicsModel,
    initial: &State,
    candidates: &[ActionSeq],
    action_repeat: usize,
) -> Result<Vec<Vec<State>>, Error> {
    candidates
        .par_iter()
        .map(|seq| predict(model, initial, seq, action_repeat))
        .collect()
}
