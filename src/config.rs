//! Runtime configuration
//!
//! Defaults come from the constants in the crate root. A JSON file can
//! override any subset of fields; environment variables override secrets
//! and endpoints last.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GasketError, GasketResult};
use crate::{
    BUFFER_SIZE, CAGE_CODE, CRYSTALLIZATION_THRESHOLD, EMBED_TIMEOUT_MS, FACT_TOLERANCE,
    FRAGMENT_TIMEOUT_MS, LOCKOUT_FILE, MAX_CAGE_CODE_LEN, ORACLE_SYMBOL, SAMPLE_COUNT,
    SAMPLE_TIMEOUT_MS, SEVERE_MULTIPLIER, TOKEN_TTL_MS, VARIANCE_LIMIT,
};

/// Full gasket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GasketConfig {
    /// Constitutional variance limit. Default: 0.05.
    pub variance_limit: f64,

    /// Health index below this is DEGRADED. Default: 0.997.
    pub crystallization_threshold: f64,

    /// Normalizer in `health = 1 - dispersion / confidence`.
    /// `None` derives it so that variance == limit maps onto the threshold.
    pub confidence: Option<f64>,

    /// Relative price drift tolerated by the cross-checker. Default: 0.01.
    pub fact_tolerance: f64,

    /// Window capacity in fragments. Default: 5.
    pub buffer_size: usize,

    /// Completions per evaluation, including the proposed state. Default: 3.
    pub sample_count: usize,

    pub embed_timeout_ms: u64,
    pub sample_timeout_ms: u64,

    /// Stall limit between fragments of a running stream.
    pub fragment_timeout_ms: u64,

    pub cage_code: String,
    pub token_ttl_ms: u64,

    /// HMAC key for clearance tokens. Random per process when unset.
    #[serde(skip_serializing)]
    pub secret: Option<String>,

    pub lockout_path: PathBuf,

    /// Symbol queried for every price claim.
    pub oracle_symbol: String,

    /// Static oracle table (symbol → price).
    pub oracle_prices: BTreeMap<String, f64>,

    /// Fail open to the fallback embedder instead of aborting.
    pub panic_mode: bool,

    /// Cross-check price claims in every evaluated window.
    pub fact_check: bool,

    pub system_prompt: String,

    #[serde(skip_serializing)]
    pub openai_key: Option<String>,
    pub openai_url: String,
    pub openai_model: String,

    pub local_url: String,
    pub local_model: String,

    /// Remote embedding service. Offline hashing embedder when unset.
    pub embed_url: Option<String>,

    /// Secondary embedding service used in panic mode.
    pub fallback_embed_url: Option<String>,
}

impl Default for GasketConfig {
    fn default() -> Self {
        Self {
            variance_limit: VARIANCE_LIMIT,
            crystallization_threshold: CRYSTALLIZATION_THRESHOLD,
            confidence: None,
            fact_tolerance: FACT_TOLERANCE,
            buffer_size: BUFFER_SIZE,
            sample_count: SAMPLE_COUNT,
            embed_timeout_ms: EMBED_TIMEOUT_MS,
            sample_timeout_ms: SAMPLE_TIMEOUT_MS,
            fragment_timeout_ms: FRAGMENT_TIMEOUT_MS,
            cage_code: CAGE_CODE.to_string(),
            token_ttl_ms: TOKEN_TTL_MS,
            secret: None,
            lockout_path: PathBuf::from(LOCKOUT_FILE),
            oracle_symbol: ORACLE_SYMBOL.to_string(),
            oracle_prices: BTreeMap::new(),
            panic_mode: false,
            fact_check: true,
            system_prompt: String::new(),
            openai_key: None,
            openai_url: "https://api.openai.com/v1/chat/completions".to_string(),
            openai_model: "gpt-4o".to_string(),
            local_url: "http://localhost:11434/api/generate".to_string(),
            local_model: "llama3".to_string(),
            embed_url: None,
            fallback_embed_url: None,
        }
    }
}

impl GasketConfig {
    /// Variance at which a window is a severe breach.
    pub fn severe_limit(&self) -> f64 {
        self.variance_limit * SEVERE_MULTIPLIER
    }

    /// Effective health normalizer.
    pub fn confidence(&self) -> f64 {
        self.confidence.unwrap_or_else(|| {
            self.variance_limit / (1.0 - self.crystallization_threshold)
        })
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> GasketResult<()> {
        if !(self.variance_limit > 0.0 && self.variance_limit.is_finite()) {
            return Err(GasketError::Config(format!(
                "variance_limit must be > 0, got {}",
                self.variance_limit
            )));
        }
        if !(0.0..1.0).contains(&self.crystallization_threshold) {
            return Err(GasketError::Config(format!(
                "crystallization_threshold must be in [0, 1), got {}",
                self.crystallization_threshold
            )));
        }
        if let Some(c) = self.confidence {
            if !(c > 0.0 && c.is_finite()) {
                return Err(GasketError::Config(format!(
                    "confidence must be > 0, got {c}"
                )));
            }
        }
        if !(self.fact_tolerance >= 0.0 && self.fact_tolerance.is_finite()) {
            return Err(GasketError::Config(format!(
                "fact_tolerance must be >= 0, got {}",
                self.fact_tolerance
            )));
        }
        if self.buffer_size < 1 {
            return Err(GasketError::Config(format!(
                "buffer_size must be >= 1, got {}",
                self.buffer_size
            )));
        }
        if self.sample_count < 2 {
            return Err(GasketError::Config(format!(
                "sample_count must be >= 2, got {}",
                self.sample_count
            )));
        }
        if self.embed_timeout_ms == 0 || self.sample_timeout_ms == 0 || self.fragment_timeout_ms == 0
        {
            return Err(GasketError::Config("timeouts must be > 0".to_string()));
        }
        if self.token_ttl_ms == 0 {
            return Err(GasketError::Config("token_ttl_ms must be > 0".to_string()));
        }
        if self.cage_code.is_empty() {
            return Err(GasketError::Config("cage_code must not be empty".to_string()));
        }
        if self.cage_code.len() > MAX_CAGE_CODE_LEN {
            return Err(GasketError::Config(format!(
                "cage_code must be at most {MAX_CAGE_CODE_LEN} bytes, got {}",
                self.cage_code.len()
            )));
        }
        Ok(())
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> GasketResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| GasketError::Config(format!("JSON parse error: {e}")))
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> GasketResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            GasketError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Apply environment overrides for secrets and endpoints.
    pub fn apply_env(mut self) -> Self {
        if let Ok(secret) = std::env::var("GASKET_SECRET") {
            self.secret = Some(secret);
        }
        if let Ok(path) = std::env::var("GASKET_LOCKOUT_PATH") {
            self.lockout_path = PathBuf::from(path);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.openai_key = Some(key);
        }
        if let Ok(url) = std::env::var("GASKET_EMBED_URL") {
            self.embed_url = Some(url);
        }
        if let Ok(url) = std::env::var("GASKET_LOCAL_URL") {
            self.local_url = url;
        }
        self
    }
}
