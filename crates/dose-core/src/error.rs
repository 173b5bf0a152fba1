use thiserror::Error;

/// Fault taxonomy for the control plane.
///
/// Every component converts its faults into one of these at its own
/// boundary; errors never tunnel through a long call chain. The `Display`
/// strings are the human-readable messages surfaced over JSON.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DoserError {
    /// Out-of-range or malformed input; recovered at the caller.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Store open/read/write failed. In-memory state is not updated on a
    /// failed write (record-level atomicity).
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Motor start/stop failed; the affected head is forced to stop.
    #[error("actuator failure: {0}")]
    Actuator(String),

    /// A dispense was requested on a head already dispensing.
    #[error("head {head} is busy dispensing")]
    Busy { head: u8 },

    /// An in-flight dispense was cut short by an emergency stop.
    #[error("dispense on head {head} was interrupted")]
    Interrupted { head: u8 },

    /// Wall-clock time is required but has not been synchronized yet.
    #[error("wall clock not synchronized")]
    TimeNotSynced,

    /// A STA attempt failed; the supervisor state machine recovers.
    #[error("wifi: {0}")]
    WifiTransient(String),

    /// Lookup of a record that does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, DoserError>;

impl DoserError {
    pub fn validation(msg: impl Into<String>) -> Self {
        DoserError::Validation(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        DoserError::Persistence(msg.into())
    }

    pub fn actuator(msg: impl Into<String>) -> Self {
        DoserError::Actuator(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            DoserError::validation("volume out of range").to_string(),
            "invalid input: volume out of range"
        );
        assert_eq!(
            DoserError::Busy { head: 2 }.to_string(),
            "head 2 is busy dispensing"
        );
        assert_eq!(
            DoserError::TimeNotSynced.to_string(),
            "wall clock not synchronized"
        );
    }
}
