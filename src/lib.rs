//! Gasket: streaming semantic-variance interdiction layer
//!
//! Source → RedactionBuffer (VarianceEngine + FactGuard per window)
//! → ConstitutionalGate (health index, clearance tokens, lockout) → caller

pub mod config;
pub mod core;
pub mod error;
pub mod types;

pub use config::GasketConfig;
pub use error::{GasketError, GasketResult};

// =============================================================================
// CONSTITUTIONAL THRESHOLDS
// =============================================================================

/// Raw variance above this redacts the window
pub const VARIANCE_LIMIT: f64 = 0.05;

/// Variance (or kinetic entropy) above `limit * SEVERE_MULTIPLIER` locks the system
pub const SEVERE_MULTIPLIER: f64 = 2.0;

/// Health index below this is DEGRADED and refuses clearance
pub const CRYSTALLIZATION_THRESHOLD: f64 = 0.997;

/// Relative drift tolerated between a price claim and the oracle (1%)
pub const FACT_TOLERANCE: f64 = 0.01;

// =============================================================================
// WINDOW
// =============================================================================

/// Fragments held back before the first evaluation
pub const BUFFER_SIZE: usize = 5;

/// Completions compared per evaluation (1 proposed + n-1 alternates)
pub const SAMPLE_COUNT: usize = 3;

/// Per-call embedding timeout (milliseconds)
pub const EMBED_TIMEOUT_MS: u64 = 5_000;

/// Per-call alternate sampling timeout (milliseconds)
pub const SAMPLE_TIMEOUT_MS: u64 = 30_000;

/// Longest wait for the next fragment of an open stream (milliseconds)
pub const FRAGMENT_TIMEOUT_MS: u64 = 30_000;

/// Longest cage code the token layout can carry
pub const MAX_CAGE_CODE_LEN: usize = u16::MAX as usize;

// =============================================================================
// CLEARANCE
// =============================================================================

/// Clearance tokens older than this are rejected (milliseconds)
pub const TOKEN_TTL_MS: u64 = 500;

/// Tolerated clock skew for tokens stamped in the future (milliseconds)
pub const TOKEN_SKEW_MS: u64 = 50;

/// CAGE code embedded in every clearance token
pub const CAGE_CODE: &str = "17TJ5";

/// Default lockout record location
pub const LOCKOUT_FILE: &str = "./gasket_lockout.json";

/// Symbol the oracle is asked about for price claims
pub const ORACLE_SYMBOL: &str = "ETH/USDT";

// =============================================================================
// VERSION
// =============================================================================

pub const VERSION: &str = "0.1.0";
