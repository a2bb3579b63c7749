use thiserror::Error;

/// Errors surfaced at the API boundary of the control core.
///
/// Copy + static messages for cheap propagation in hot paths.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Error {
    #[error("shape mismatch in {what}: expected {expected}, got {got}")]
    InvalidShape {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("empty dataset: {split} split has no transitions")]
    EmptyDataset { split: &'static str },

    #[error("numerical instability in {context}: {value}")]
    NumericalInstability { context: &'static str, value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_copy() {
        let err = Error::EmptyDataset { split: "train" };
        let err2 = err;
        assert_eq!(err, err2);
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::InvalidShape {
                what: "state",
                expected: 6,
                got: 4
            }
            .to_string(),
            "shape mismatch in state: expected 6, got 4"
        );
        assert_eq!(
            Error::EmptyDataset { split: "validation" }.to_string(),
            "empty dataset: validation split has no transitions"
        );
        assert_eq!(
            Error::NumericalInstability {
                context: "training loss",
                value: f64::INFINITY
            }
            .to_string(),
            "numerical instability in training loss: inf"
        );
    }
}
