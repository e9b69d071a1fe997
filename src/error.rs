use crate::types::MeasurementResult;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpeedtestError {
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("no servers available")]
    NoServerAvailable,

    #[error("transfer against {url} failed: {reason}")]
    Transfer { url: String, reason: String },

    #[error("cannot bind to '{interface}': {reason}")]
    Bind { interface: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("metrics write failed: {0}")]
    Sink(String),

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("System time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),
}

impl SpeedtestError {
    pub fn decode(what: &str, reason: impl ToString) -> Self {
        Self::Decode {
            what: what.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpeedtestError>;

/// A measurement run that stopped early.
///
/// `partial` holds whatever had been measured before `source` occurred.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct RunError {
    pub partial: MeasurementResult,
    pub source: SpeedtestError,
}
