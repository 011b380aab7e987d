//! Reason codes for window decisions

use serde::{Deserialize, Serialize};

/// Reason codes for every window verdict and stream termination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum ReasonCode {
    // =========================================================================
    // R1xx: Release
    // =========================================================================
    /// Window healthy, oldest fragment released
    R101_WINDOW_RELEASED,
    /// End of input, buffered tail released without re-evaluation
    R102_TAIL_FLUSHED,

    // =========================================================================
    // R2xx: Interdiction
    // =========================================================================
    /// Raw variance above the constitutional limit
    R201_VARIANCE_BREACH,
    /// Health index below crystallization threshold
    R202_HEALTH_BELOW_THRESHOLD,
    /// Price claim failed the oracle cross-check
    R203_FACTUAL_BREACH,
    /// Variance above twice the limit, lockout triggered
    R204_SEVERE_BREACH,

    // =========================================================================
    // R3xx: Infrastructure
    // =========================================================================
    /// Embedding or sampling failed
    R301_MEASUREMENT_UNAVAILABLE,
    /// Completion source failed
    R302_SOURCE_UNAVAILABLE,

    // =========================================================================
    // R4xx: Lockout
    // =========================================================================
    /// Lockout record present
    R401_SYSTEM_LOCKED,
}

impl ReasonCode {
    /// Get the code string (for logging)
    pub fn code(&self) -> &'static str {
        match self {
            Self::R101_WINDOW_RELEASED => "R101_WINDOW_RELEASED",
            Self::R102_TAIL_FLUSHED => "R102_TAIL_FLUSHED",
            Self::R201_VARIANCE_BREACH => "R201_VARIANCE_BREACH",
            Self::R202_HEALTH_BELOW_THRESHOLD => "R202_HEALTH_BELOW_THRESHOLD",
            Self::R203_FACTUAL_BREACH => "R203_FACTUAL_BREACH",
            Self::R204_SEVERE_BREACH => "R204_SEVERE_BREACH",
            Self::R301_MEASUREMENT_UNAVAILABLE => "R301_MEASUREMENT_UNAVAILABLE",
            Self::R302_SOURCE_UNAVAILABLE => "R302_SOURCE_UNAVAILABLE",
            Self::R401_SYSTEM_LOCKED => "R401_SYSTEM_LOCKED",
        }
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::R101_WINDOW_RELEASED => "Window healthy, fragment released",
            Self::R102_TAIL_FLUSHED => "Buffered tail flushed",
            Self::R201_VARIANCE_BREACH => "Variance exceeds constitutional limit",
            Self::R202_HEALTH_BELOW_THRESHOLD => "Health index below crystallization",
            Self::R203_FACTUAL_BREACH => "Claim failed oracle cross-check",
            Self::R204_SEVERE_BREACH => "Variance exceeds twice the limit",
            Self::R301_MEASUREMENT_UNAVAILABLE => "Variance could not be measured",
            Self::R302_SOURCE_UNAVAILABLE => "Completion source failed",
            Self::R401_SYSTEM_LOCKED => "System locked",
        }
    }

    /// Does this verdict drop the window?
    pub fn is_redaction(&self) -> bool {
        matches!(
            self,
            Self::R201_VARIANCE_BREACH
                | Self::R202_HEALTH_BELOW_THRESHOLD
                | Self::R203_FACTUAL_BREACH
                | Self::R204_SEVERE_BREACH
        )
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}
