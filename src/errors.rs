use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChartPilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Screen capture failed: {0}")]
    Capture(String),

    #[error("Invalid coordinate ({x}, {y}): outside display bounds {width}x{height}")]
    InvalidCoordinate {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    },

    #[error("Input dispatch failed: {0}")]
    Dispatch(String),

    #[error("Decision service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Decision service refused request ({status}): {body}")]
    ServiceRejected { status: u16, body: String },

    #[error("Malformed decision service response: {0}")]
    MalformedResponse(String),

    #[error("Safety check rejected: {0}")]
    SafetyRejected(String),

    #[error("iteration budget exhausted ({0} turns)")]
    IterationBudgetExceeded(u32),

    #[error("Display '{0}' is already owned by a running automation")]
    DisplayBusy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Run cancelled by operator")]
    Cancelled,
}

impl ChartPilotError {
    /// Transient failures worth another attempt at the service boundary.
    pub fn is_transient(&self) -> bool {
        match self {
            ChartPilotError::ServiceUnavailable(_) => true,
            ChartPilotError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl serde::Serialize for ChartPilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type ChartPilotResult<T> = Result<T, ChartPilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_transient() {
        assert!(ChartPilotError::ServiceUnavailable("503".into()).is_transient());
        assert!(!ChartPilotError::MalformedResponse("no id".into()).is_transient());
        assert!(!ChartPilotError::ServiceRejected { status: 401, body: String::new() }.is_transient());
    }

    #[test]
    fn budget_message_is_operator_readable() {
        let e = ChartPilotError::IterationBudgetExceeded(3);
        assert_eq!(e.to_string(), "iteration budget exhausted (3 turns)");
    }
}
