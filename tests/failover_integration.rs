//! Integration tests for completion failover and panic-mode measurement

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use pretty_assertions::assert_eq;

use gasket::core::{
    CompletionSource, Embedder, FailoverRouter, FragmentStream, Gasket, GasketParts,
    HashingEmbedder, MemoryLockoutStore, ScriptedSource, VarianceEngine, VarianceMeasure,
};
use gasket::types::{FinalStatus, StreamEvent};
use gasket::{GasketConfig, GasketError, GasketResult};

/// Refuses every request and counts attempts
#[derive(Default)]
struct DeadSource {
    attempts: AtomicUsize,
}

#[async_trait]
impl CompletionSource for DeadSource {
    fn name(&self) -> &str {
        "dead"
    }

    async fn generate(&self, _prompt: &str, _system: &str) -> GasketResult<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(GasketError::Backend("503 Service Unavailable".to_string()))
    }

    async fn stream(&self, _prompt: &str, _system: &str) -> GasketResult<FragmentStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(GasketError::Backend("503 Service Unavailable".to_string()))
    }
}

/// Opens fine, then dies after one fragment
struct FlakySource;

#[async_trait]
impl CompletionSource for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn generate(&self, _prompt: &str, _system: &str) -> GasketResult<String> {
        Ok("steady".to_string())
    }

    async fn stream(&self, _prompt: &str, _system: &str) -> GasketResult<FragmentStream> {
        Ok(stream::iter(vec![
            Ok("first ".to_string()),
            Err(GasketError::Backend("stream reset".to_string())),
        ])
        .boxed())
    }
}

struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    async fn embed(&self, _text: &str) -> GasketResult<Vec<f64>> {
        Err(GasketError::MeasurementUnavailable("embedding service down".to_string()))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

fn gasket_over(source: Arc<dyn CompletionSource>, measure: Arc<dyn VarianceMeasure>) -> Gasket {
    Gasket::new(
        GasketConfig::default(),
        GasketParts {
            source,
            measure,
            oracle: None,
            store: Arc::new(MemoryLockoutStore::new()),
        },
    )
    .unwrap()
}

fn hashing_engine() -> Arc<VarianceEngine> {
    Arc::new(VarianceEngine::new(
        Arc::new(HashingEmbedder::new()),
        Duration::from_secs(1),
    ))
}

#[tokio::test]
async fn test_generate_falls_back_to_secondary() {
    let dead = Arc::new(DeadSource::default());
    let router = FailoverRouter::new(vec![
        dead.clone(),
        Arc::new(ScriptedSource::new(["local ", "answer"])),
    ]);

    let text = router.generate("", "").await.unwrap();
    assert_eq!(text, "local answer");
    assert_eq!(dead.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_healthy_primary_is_only_backend_used() {
    let spare = Arc::new(DeadSource::default());
    let router = FailoverRouter::new(vec![
        Arc::new(ScriptedSource::new(["primary"])),
        spare.clone(),
    ]);

    assert_eq!(router.generate("", "").await.unwrap(), "primary");
    let opened: Vec<_> = router.stream("", "").await.unwrap().collect().await;
    assert_eq!(opened.len(), 1);
    assert_eq!(spare.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_all_backends_down_reports_each() {
    let router = FailoverRouter::new(vec![
        Arc::new(DeadSource::default()),
        Arc::new(DeadSource::default()),
    ]);

    match router.generate("p", "").await {
        Err(GasketError::Backend(msg)) => assert_eq!(msg.matches("dead:").count(), 2),
        other => panic!("expected Backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_open_failure_yields_fallback_marker() {
    let router = FailoverRouter::new(vec![Arc::new(DeadSource::default())]);
    let gasket = gasket_over(Arc::new(router), hashing_engine());

    let eval = gasket.evaluate("p").await;
    assert_eq!(eval.fragments, vec![StreamEvent::Fallback]);
    assert_eq!(eval.final_status, FinalStatus::SourceUnavailable);
}

#[tokio::test]
async fn test_mid_stream_failure_is_not_restarted() {
    let router = FailoverRouter::new(vec![
        Arc::new(FlakySource),
        Arc::new(ScriptedSource::new(["never ", "used"])),
    ]);
    let gasket = gasket_over(Arc::new(router), hashing_engine());

    let eval = gasket.evaluate("p").await;
    // The held-back fragment is dropped with the window, never released unverified.
    assert_eq!(eval.fragments, vec![StreamEvent::Fallback]);
    assert_eq!(eval.final_status, FinalStatus::SourceUnavailable);
}

#[tokio::test]
async fn test_panic_mode_measures_on_fallback_embedder() {
    let engine = VarianceEngine::new(Arc::new(BrokenEmbedder), Duration::from_secs(1))
        .with_fallback(Arc::new(HashingEmbedder::new()));
    let texts = vec!["same text".to_string(), "same text".to_string()];

    assert_eq!(engine.measure(&texts).await.unwrap(), 0.0);
}

#[tokio::test]
async fn test_panic_mode_keeps_stream_flowing() {
    let script = ["a ", "b ", "c ", "d ", "e ", "f"];
    let engine = VarianceEngine::new(Arc::new(BrokenEmbedder), Duration::from_secs(1))
        .with_fallback(Arc::new(HashingEmbedder::new()));
    let gasket = gasket_over(Arc::new(ScriptedSource::new(script)), Arc::new(engine));

    let eval = gasket.evaluate("").await;
    assert_eq!(eval.final_status, FinalStatus::Completed);
    assert_eq!(eval.released_text(), "a b c d e f");
}

#[tokio::test]
async fn test_both_embedders_down_still_fails_closed() {
    let engine = VarianceEngine::new(Arc::new(BrokenEmbedder), Duration::from_secs(1))
        .with_fallback(Arc::new(BrokenEmbedder));
    let texts = vec!["x".to_string(), "y".to_string()];

    let err = engine.measure(&texts).await.unwrap_err();
    assert!(err.is_measurement_failure());
}
