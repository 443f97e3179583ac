use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// Transport-level failure: connection refused, channel closed, timeout.
    /// The caller retries; no message or record is lost.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker explicitly refused the message (negative confirm).
    /// Counts against the record's attempts budget.
    #[error("rejected by broker: {0}")]
    Rejected(String),
}

impl From<lapin::Error> for BrokerError {
    fn from(e: lapin::Error) -> Self {
        BrokerError::Unavailable(e.to_string())
    }
}

impl BrokerError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, BrokerError::Rejected(_))
    }
}
