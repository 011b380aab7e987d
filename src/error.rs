//! Error taxonomy for the gasket pipeline

use thiserror::Error;

/// Root error type for all gasket failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GasketError {
    /// Embedding or sampling infrastructure failed; variance cannot be measured.
    #[error("measurement unavailable: {0}")]
    MeasurementUnavailable(String),

    /// A price claim could not be checked because the oracle has no reference.
    #[error("oracle blind spot: {0}")]
    OracleBlindSpot(String),

    /// A price claim drifted beyond the financial tolerance.
    #[error("factual drift: {0}")]
    FactualDrift(String),

    /// Variance or entropy over the constitutional limit.
    #[error("constitutional breach: value {value:.4} exceeds limit {limit}")]
    ConstitutionalBreach { value: f64, limit: f64 },

    /// Variance or entropy over twice the limit; the system is now locked.
    #[error("severe breach: value {value:.4} exceeds {limit}")]
    SevereBreach { value: f64, limit: f64 },

    /// Lockout record present; nothing is issued or released.
    #[error("system locked: {0}")]
    SystemLocked(String),

    /// Completion backend unreachable or returned garbage.
    #[error("backend error: {0}")]
    Backend(String),

    /// A remote call exceeded its deadline.
    #[error("timeout: {operation} exceeded {millis}ms")]
    Timeout { operation: String, millis: u64 },

    /// Lockout persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed JSON on the wire or on disk.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GasketError {
    /// Does this error come from the measurement path (fail closed)?
    pub fn is_measurement_failure(&self) -> bool {
        matches!(
            self,
            Self::MeasurementUnavailable(_) | Self::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for GasketError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for GasketError {
    fn from(e: reqwest::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

pub type GasketResult<T> = Result<T, GasketError>;
