use std::fmt;

/// Raised when a history is too short to build a single training row.
/// Travels inside `anyhow::Error`; recover it with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsufficientData {
    pub required: usize,
    pub available: usize,
}

impl fmt::Display for InsufficientData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "insufficient data: need at least {} draws, got {}",
            self.required, self.available
        )
    }
}

impl std::error::Error for InsufficientData {}

pub fn is_insufficient_data(err: &anyhow::Error) -> bool {
    err.downcast_ref::<InsufficientData>().is_some()
}
