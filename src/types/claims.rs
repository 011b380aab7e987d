//! Claim and fact-check types

use serde::{Deserialize, Serialize};

use crate::error::GasketError;

/// Verifiable claims pulled out of generated text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Currency amounts, commas stripped
    pub prices: Vec<f64>,
    /// `0x` contract addresses
    pub addresses: Vec<String>,
}

impl Claims {
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty() && self.addresses.is_empty()
    }
}

/// Reason codes for the cross-check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum FactCheckReason {
    /// Nothing verifiable in the text
    R601_NO_CLAIMS,
    /// Every price within tolerance of the oracle
    R602_FACT_VALIDATED,
    /// Oracle could not provide a reference
    R603_ORACLE_BLIND_SPOT,
    /// Price drifted past the tolerance
    R604_FACTUAL_DRIFT,
}

impl FactCheckReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::R601_NO_CLAIMS => "R601_NO_CLAIMS",
            Self::R602_FACT_VALIDATED => "R602_FACT_VALIDATED",
            Self::R603_ORACLE_BLIND_SPOT => "R603_ORACLE_BLIND_SPOT",
            Self::R604_FACTUAL_DRIFT => "R604_FACTUAL_DRIFT",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::R601_NO_CLAIMS | Self::R602_FACT_VALIDATED)
    }
}

impl std::fmt::Display for FactCheckReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Outcome of validating a claim set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheck {
    pub reason: FactCheckReason,
    pub detail: String,
}

impl FactCheck {
    pub fn new(reason: FactCheckReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.reason.is_success()
    }

    /// Failure as an error, `None` when the check passed
    pub fn to_error(&self) -> Option<GasketError> {
        match self.reason {
            FactCheckReason::R603_ORACLE_BLIND_SPOT => {
                Some(GasketError::OracleBlindSpot(self.detail.clone()))
            }
            FactCheckReason::R604_FACTUAL_DRIFT => {
                Some(GasketError::FactualDrift(self.detail.clone()))
            }
            _ => None,
        }
    }
}
