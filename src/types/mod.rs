//! Core types for the gasket

mod claims;
mod clearance;
mod lockout;
mod output;
mod reason;
mod state;

pub use claims::{Claims, FactCheck, FactCheckReason};
pub use clearance::{
    ClearancePayload, ClearanceReason, ClearanceResult, ClearanceToken, TokenRejection, MAC_LEN,
    TOKEN_VERSION,
};
pub use lockout::LockoutRecord;
pub use output::{
    Evaluation, FinalStatus, StreamEvent, StreamSummary, VerificationReport, FALLBACK_MARKER,
    LOCKED_MARKER, REDACTION_MARKER,
};
pub use reason::ReasonCode;
pub use state::{GateState, GateStatus};
