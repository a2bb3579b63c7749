use crate::error::Error;
use crate::{Action, State};

/// One recorded interaction step, the unit of training data.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: State,
    pub action: Action,
    pub next_state: State,
}

impl Transition {
    pub fn new(state: State, action: Action, next_state: State) -> Self {
        Self {
            state,
            action,
            next_state,
        }
    }
}

/// Ordered prefix/suffix partition at `floor(len * ratio)`.
pub fn split(transitions: &[Transition], ratio: f64) -> (&[Transition], &[Transition]) {
    let cut = (transitions.len() as f64 * ratio.clamp(0.0, 1.0)) as usize;
    transitions.split_at(cut.min(transitions.len()))
}

pub(crate) fn check_consistent(
    transitions: &[Transition],
    state_size: usize,
    action_size: usize,
) -> Result<(), Error> {
    for t in transitions {
        if t.state.len() != state_size {
            return Err(Error::InvalidShape {
                what: "transition state",
                expected: state_size,
                got: t.state.len(),
            });
        }
        if t.action.len() != action_size {
            return Err(Error::InvalidShape {
                what: "transition action",
                expected: action_size,
                got: t.action.len(),
            });
        }
        if t.next_state.len() != state_size {
            return Err(Error::InvalidShape {
                what: "transition next_state",
                expected: state_size,
                got: t.next_state.len(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(dim: usize) -> Transition {
        Transition::new(State::zeros(dim), Action::zeros(1), State::zeros(dim))
    }

    #[test]
    fn split_keeps_order_at_fixed_ratio() {
        let data: Vec<Transition> = (0..10).map(|_| transition(2)).collect();
        let (train, val) = split(&data, 0.7);
        assert_eq!(train.len(), 7);
        assert_eq!(val.len(), 3);
    }

    #[test]
    fn split_clamps_ratio() {
        let data: Vec<Transition> = (0..4).map(|_| transition(2)).collect();
        assert_eq!(split(&data, 2.0).0.len(), 4);
        assert_eq!(split(&data, -1.0).0.len(), 0);
        assert_eq!(split(&[], 0.7).0.len(), 0);
    }

    #[test]
    fn consistency_flags_first_mismatch() {
        let mut data: Vec<Transition> = (0..3).map(|_| transition(2)).collect();
        data[1] = transition(3);
        let err = check_consistent(&data, 2, 1).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidShape {
                what: "transition state",
                expected: 2,
                got: 3
            }
        );
        assert!(check_consistent(&data[..1], 2, 1).is_ok());
    }
}
