//! Caller-facing gasket
//!
//! Wires a completion source, variance measure, fact guard, gate and
//! redaction buffer together from one `GasketConfig`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use futures_util::stream::{self, StreamExt};

use crate::config::GasketConfig;
use crate::core::buffer::{BufferSettings, EventStream, RedactionBuffer};
use crate::core::claims::{CrossChecker, FactGuard, ReferenceOracle, StaticOracle};
use crate::core::embedder::{Embedder, HashingEmbedder, HttpEmbedder};
use crate::core::gate::{ConstitutionalGate, GateSettings};
use crate::core::lockout::{FileLockoutStore, LockoutStore};
use crate::core::source::{CompletionSource, EchoSource, FailoverRouter, FragmentStream};
use crate::core::token::TokenSigner;
use crate::core::variance::{VarianceEngine, VarianceMeasure};
use crate::error::{GasketError, GasketResult};
use crate::types::{
    ClearanceResult, ClearanceToken, Evaluation, FinalStatus, GateStatus, StreamEvent,
    StreamSummary, TokenRejection, VerificationReport,
};

/// Pluggable collaborators
pub struct GasketParts {
    pub source: Arc<dyn CompletionSource>,
    pub measure: Arc<dyn VarianceMeasure>,
    pub oracle: Option<Arc<dyn ReferenceOracle>>,
    pub store: Arc<dyn LockoutStore>,
}

pub struct Gasket {
    config: GasketConfig,
    source: Arc<dyn CompletionSource>,
    measure: Arc<dyn VarianceMeasure>,
    guard: FactGuard,
    gate: Arc<ConstitutionalGate>,
    buffer: RedactionBuffer,
}

impl Gasket {
    pub fn new(config: GasketConfig, parts: GasketParts) -> GasketResult<Self> {
        config.validate()?;

        let signer = match &config.secret {
            Some(secret) => TokenSigner::new(secret.as_bytes(), config.token_ttl_ms)?,
            None => TokenSigner::new_random(config.token_ttl_ms)?,
        };
        let gate = Arc::new(ConstitutionalGate::new(
            GateSettings::from_config(&config),
            parts.store,
            signer,
        ));
        let guard = FactGuard::new(
            CrossChecker::new(&config.oracle_symbol, config.fact_tolerance),
            parts.oracle,
        );

        let mut buffer = RedactionBuffer::new(
            BufferSettings::from_config(&config),
            parts.source.clone(),
            parts.measure.clone(),
            gate.clone(),
        );
        if config.fact_check {
            buffer = buffer.with_fact_guard(guard.clone());
        }

        Ok(Self {
            config,
            source: parts.source,
            measure: parts.measure,
            guard,
            gate,
            buffer,
        })
    }

    /// Live backends: failover router, remote or hashing embedder, file lockout
    pub fn from_config(config: GasketConfig) -> GasketResult<Self> {
        let source: Arc<dyn CompletionSource> = Arc::new(FailoverRouter::from_config(&config)?);
        Self::with_source(config, source)
    }

    /// Echo source for demos; everything else as configured
    pub fn offline(config: GasketConfig) -> GasketResult<Self> {
        let source: Arc<dyn CompletionSource> = Arc::new(EchoSource::new(config.buffer_size));
        Self::with_source(config, source)
    }

    fn with_source(config: GasketConfig, source: Arc<dyn CompletionSource>) -> GasketResult<Self> {
        let timeout = Duration::from_millis(config.embed_timeout_ms);

        let primary: Arc<dyn Embedder> = match &config.embed_url {
            Some(url) => Arc::new(HttpEmbedder::new(url, timeout)?),
            None => Arc::new(HashingEmbedder::new()),
        };
        let mut engine = VarianceEngine::new(primary, timeout);
        if config.panic_mode {
            let fallback: Arc<dyn Embedder> = match &config.fallback_embed_url {
                Some(url) => Arc::new(HttpEmbedder::new(url, timeout)?),
                None => Arc::new(HashingEmbedder::new()),
            };
            engine = engine.with_fallback(fallback);
        }

        let oracle: Option<Arc<dyn ReferenceOracle>> = if config.oracle_prices.is_empty() {
            None
        } else {
            Some(Arc::new(StaticOracle::new(config.oracle_prices.clone())))
        };
        let store: Arc<dyn LockoutStore> = Arc::new(FileLockoutStore::new(&config.lockout_path));

        Self::new(
            config,
            GasketParts {
                source,
                measure: Arc::new(engine),
                oracle,
                store,
            },
        )
    }

    pub fn config(&self) -> &GasketConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<ConstitutionalGate> {
        &self.gate
    }

    fn closed_stream(marker: StreamEvent, status: FinalStatus) -> EventStream {
        stream::iter(vec![marker, StreamEvent::Finished(StreamSummary::new(status))]).boxed()
    }

    /// Generate for `prompt` and interdict the output as it streams
    pub async fn stream(&self, prompt: &str) -> EventStream {
        self.stream_with_system(prompt, &self.config.system_prompt).await
    }

    pub async fn stream_with_system(&self, prompt: &str, system: &str) -> EventStream {
        if self.gate.is_locked() {
            return Self::closed_stream(StreamEvent::Locked, FinalStatus::SystemLocked);
        }
        match self.source.stream(prompt, system).await {
            Ok(tokens) => self.buffer.process(prompt, system, tokens),
            Err(e) => {
                tracing::error!(error = %e, "completion source unavailable");
                Self::closed_stream(StreamEvent::Fallback, FinalStatus::SourceUnavailable)
            }
        }
    }

    /// Collect a whole stream
    pub async fn evaluate(&self, prompt: &str) -> Evaluation {
        self.evaluate_with_system(prompt, &self.config.system_prompt).await
    }

    pub async fn evaluate_with_system(&self, prompt: &str, system: &str) -> Evaluation {
        let events: Vec<StreamEvent> = self.stream_with_system(prompt, system).await.collect().await;
        Evaluation::from_events(events)
    }

    /// Interdict an already-produced fragment stream
    pub fn interdict(&self, prompt: &str, tokens: FragmentStream) -> EventStream {
        self.buffer.process(prompt, &self.config.system_prompt, tokens)
    }

    pub fn issue_token(&self, intent: &str, kinetic_entropy: f64) -> ClearanceResult {
        self.gate.issue_token(intent, kinetic_entropy)
    }

    pub fn verify_token(&self, token_hex: &str) -> Result<ClearanceToken, TokenRejection> {
        self.gate.verify_hex(token_hex)
    }

    /// Non-streaming check: `n` parallel completions, variance, then a fact
    /// check of the first completion.
    pub async fn generate_and_verify(
        &self,
        prompt: &str,
        system: Option<&str>,
        n: usize,
    ) -> GasketResult<VerificationReport> {
        if n == 0 {
            return Err(GasketError::Config("n must be >= 1".to_string()));
        }
        if self.gate.is_locked() {
            let reason = self
                .gate
                .status()
                .lockout
                .map(|record| record.reason)
                .unwrap_or_else(|| "lockout store unreadable".to_string());
            return Err(GasketError::SystemLocked(reason));
        }
        let system = system.unwrap_or(&self.config.system_prompt);
        let timeout = Duration::from_millis(self.config.sample_timeout_ms);

        let completions = try_join_all((0..n).map(|_| async move {
            tokio::time::timeout(timeout, self.source.generate(prompt, system))
                .await
                .map_err(|_| GasketError::Timeout {
                    operation: "generate".to_string(),
                    millis: self.config.sample_timeout_ms,
                })?
        }))
        .await?;

        let variance = match self.measure.measure(&completions).await {
            Ok(v) => v,
            Err(e) => {
                self.gate.record_measurement_failure();
                return Err(e);
            }
        };
        let health = self.gate.update_health(variance);

        let severe_limit = self.config.severe_limit();
        let reason = if variance > severe_limit {
            let breach = GasketError::SevereBreach {
                value: variance,
                limit: severe_limit,
            };
            self.gate.trigger_lockout(&breach.to_string());
            format!("SEVERE_BREACH: {breach}")
        } else if variance > self.config.variance_limit
            || health < self.config.crystallization_threshold
        {
            let breach = GasketError::ConstitutionalBreach {
                value: variance,
                limit: self.config.variance_limit,
            };
            format!("CONSISTENCY_BREACH: {breach}")
        } else if self.config.fact_check {
            let check = self.guard.check(&completions[0]).await;
            if check.passed() {
                "SYSTEM_SAFE".to_string()
            } else {
                format!("FACTUALITY_BREACH: {}", check.detail)
            }
        } else {
            "SYSTEM_SAFE".to_string()
        };

        tracing::info!(variance, health, reason = %reason, "generate_and_verify");
        Ok(VerificationReport {
            is_safe: reason == "SYSTEM_SAFE",
            variance,
            health_index: health,
            consensus: completions[0].clone(),
            reason,
            completions,
        })
    }

    pub fn status(&self) -> GateStatus {
        self.gate.status()
    }

    /// Operator reset
    pub fn reset(&self) -> GasketResult<()> {
        self.gate.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lockout::MemoryLockoutStore;
    use crate::core::source::ScriptedSource;
    use crate::types::GateState;

    fn offline_parts(source: Arc<dyn CompletionSource>) -> GasketParts {
        GasketParts {
            source,
            measure: Arc::new(VarianceEngine::new(
                Arc::new(HashingEmbedder::new()),
                Duration::from_secs(1),
            )),
            oracle: None,
            store: Arc::new(MemoryLockoutStore::new()),
        }
    }

    #[tokio::test]
    async fn test_echo_round_trip_is_clean() {
        let gasket = Gasket::new(
            GasketConfig::default(),
            offline_parts(Arc::new(EchoSource::default())),
        )
        .unwrap();
        let prompt = "the quick brown fox jumps over the lazy dog";
        let eval = gasket.evaluate(prompt).await;
        assert_eq!(eval.final_status, FinalStatus::Completed);
        assert_eq!(eval.released_text(), prompt);
    }

    #[tokio::test]
    async fn test_locked_gasket_short_circuits() {
        let gasket = Gasket::new(
            GasketConfig::default(),
            offline_parts(Arc::new(EchoSource::default())),
        )
        .unwrap();
        gasket.gate().trigger_lockout("TEST");
        let eval = gasket.evaluate("anything").await;
        assert_eq!(eval.fragments, vec![StreamEvent::Locked]);
        assert_eq!(eval.final_status, FinalStatus::SystemLocked);
        assert_eq!(gasket.status().state, GateState::Locked);
    }

    #[tokio::test]
    async fn test_generate_and_verify_consensus() {
        let source = ScriptedSource::new(["ETH is at $3,000"]);
        let gasket = Gasket::new(GasketConfig::default(), offline_parts(Arc::new(source))).unwrap();
        let report = gasket.generate_and_verify("p", None, 3).await.unwrap();
        assert_eq!(report.variance, 0.0);
        assert_eq!(report.consensus, "ETH is at $3,000");
        // No oracle configured: price claims cannot be verified.
        assert!(!report.is_safe);
        assert!(report.reason.starts_with("FACTUALITY_BREACH"));
    }

    #[tokio::test]
    async fn test_generate_and_verify_safe_without_claims() {
        let source = ScriptedSource::new(["hello there"]);
        let gasket = Gasket::new(GasketConfig::default(), offline_parts(Arc::new(source))).unwrap();
        let report = gasket.generate_and_verify("p", None, 2).await.unwrap();
        assert!(report.is_safe);
        assert_eq!(report.reason, "SYSTEM_SAFE");
        assert_eq!(report.completions.len(), 2);
    }

    /// Completions that disagree word for word
    struct Divergent(std::sync::atomic::AtomicUsize);

    #[async_trait::async_trait]
    impl CompletionSource for Divergent {
        fn name(&self) -> &str {
            "divergent"
        }

        async fn generate(&self, _prompt: &str, _system: &str) -> GasketResult<String> {
            let n = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(["alpha beta gamma", "delta epsilon zeta", "eta theta iota"][n % 3].to_string())
        }

        async fn stream(&self, _prompt: &str, _system: &str) -> GasketResult<FragmentStream> {
            Ok(stream::empty().boxed())
        }
    }

    #[tokio::test]
    async fn test_generate_and_verify_severe_breach_locks() {
        let source = Divergent(std::sync::atomic::AtomicUsize::new(0));
        let gasket = Gasket::new(GasketConfig::default(), offline_parts(Arc::new(source))).unwrap();
        let report = gasket.generate_and_verify("p", None, 3).await.unwrap();

        assert!(!report.is_safe);
        assert!(report.reason.starts_with("SEVERE_BREACH: severe breach: value"));
        let record = gasket.status().lockout.unwrap();
        assert!(record.reason.starts_with("severe breach"));

        match gasket.generate_and_verify("p", None, 3).await {
            Err(GasketError::SystemLocked(reason)) => assert_eq!(reason, record.reason),
            other => panic!("expected SystemLocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_and_verify_consistency_breach_detail() {
        let source = Divergent(std::sync::atomic::AtomicUsize::new(0));
        let config = GasketConfig {
            variance_limit: 0.5,
            ..Default::default()
        };
        let gasket = Gasket::new(config, offline_parts(Arc::new(source))).unwrap();
        let report = gasket.generate_and_verify("p", None, 3).await.unwrap();

        assert!(report.variance > 0.5 && report.variance <= 1.0);
        assert!(report.reason.starts_with("CONSISTENCY_BREACH: constitutional breach"));
        assert!(!gasket.gate().is_locked());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GasketConfig {
            sample_count: 0,
            ..Default::default()
        };
        assert!(Gasket::new(config, offline_parts(Arc::new(EchoSource::default()))).is_err());
    }
}
