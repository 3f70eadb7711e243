//! Broker error types.

/// Errors that can occur during gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("gateway returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("order error: {0}")]
    Order(String),

    #[error("no contract found for {0}")]
    NoContract(String),

    #[error("{0}")]
    Other(String),
}

impl BrokerError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Network failures and gateway-side HTTP errors are transient; a body we
    /// cannot parse will not parse on the next attempt either.
    pub fn is_transient(&self) -> bool {
        match self {
            BrokerError::Connection(_) => true,
            BrokerError::Http { status, .. } => *status >= 500 || *status == 429 || *status == 401,
            _ => false,
        }
    }
}
