//! Variance engine
//!
//! Embeds every completion of one prefix and scores how far the set
//! spreads: mean Euclidean distance to the centroid. Any failed embedding
//! fails the whole measurement; there is no partial centroid.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::try_join_all;

use crate::core::embedder::Embedder;
use crate::error::{GasketError, GasketResult};

/// Anything that can score disagreement between completions
#[async_trait]
pub trait VarianceMeasure: Send + Sync {
    /// Dispersion of `completions`; 0.0 for fewer than two
    async fn measure(&self, completions: &[String]) -> GasketResult<f64>;
}

/// Mean Euclidean distance of each vector from the centroid.
///
/// Empty or single input is 0.0. Callers guarantee equal dimensions.
pub fn dispersion(vectors: &[Vec<f64>]) -> f64 {
    if vectors.len() < 2 {
        return 0.0;
    }
    let dim = vectors[0].len();
    let n = vectors.len() as f64;

    let mut centroid = vec![0.0; dim];
    for v in vectors {
        for (c, x) in centroid.iter_mut().zip(v) {
            *c += x;
        }
    }
    for c in &mut centroid {
        *c /= n;
    }

    let total: f64 = vectors
        .iter()
        .map(|v| {
            v.iter()
                .zip(&centroid)
                .map(|(x, c)| (x - c) * (x - c))
                .sum::<f64>()
                .sqrt()
        })
        .sum();
    total / n
}

/// Map a dispersion onto [0, 1]; unusable input is the worst case
pub fn health_index(dispersion: f64, confidence: f64) -> f64 {
    if !dispersion.is_finite() || dispersion < 0.0 || !(confidence > 0.0) {
        return 0.0;
    }
    (1.0 - dispersion / confidence).clamp(0.0, 1.0)
}

/// Embedding-backed variance measurement
pub struct VarianceEngine {
    embedder: Arc<dyn Embedder>,
    fallback: Option<Arc<dyn Embedder>>,
    timeout: Duration,
}

impl VarianceEngine {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self {
            embedder,
            fallback: None,
            timeout,
        }
    }

    /// Panic mode: retry a failed measurement once on `fallback`
    pub fn with_fallback(mut self, fallback: Arc<dyn Embedder>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    async fn embed_one(&self, embedder: &dyn Embedder, text: &str) -> GasketResult<Vec<f64>> {
        let vector = tokio::time::timeout(self.timeout, embedder.embed(text))
            .await
            .map_err(|_| GasketError::Timeout {
                operation: format!("embed via {}", embedder.name()),
                millis: self.timeout.as_millis() as u64,
            })??;

        if vector.is_empty() {
            return Err(GasketError::MeasurementUnavailable(
                "empty embedding".to_string(),
            ));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(GasketError::MeasurementUnavailable(
                "non-finite embedding component".to_string(),
            ));
        }
        Ok(vector)
    }

    async fn measure_with(
        &self,
        embedder: &dyn Embedder,
        completions: &[String],
    ) -> GasketResult<f64> {
        let vectors =
            try_join_all(completions.iter().map(|c| self.embed_one(embedder, c))).await?;

        let dim = vectors[0].len();
        if vectors.iter().any(|v| v.len() != dim) {
            return Err(GasketError::MeasurementUnavailable(
                "embedding dimension mismatch".to_string(),
            ));
        }
        Ok(dispersion(&vectors))
    }
}

#[async_trait]
impl VarianceMeasure for VarianceEngine {
    async fn measure(&self, completions: &[String]) -> GasketResult<f64> {
        if completions.len() < 2 {
            return Ok(0.0);
        }

        match self.measure_with(self.embedder.as_ref(), completions).await {
            Ok(v) => Ok(v),
            Err(primary) => {
                let Some(fallback) = &self.fallback else {
                    tracing::error!(error = %primary, embedder = self.embedder.name(), "variance measurement failed");
                    return Err(GasketError::MeasurementUnavailable(primary.to_string()));
                };
                tracing::warn!(
                    error = %primary,
                    fallback = fallback.name(),
                    "primary embedder failed, panic mode fallback"
                );
                self.measure_with(fallback.as_ref(), completions)
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "fallback embedder failed");
                        GasketError::MeasurementUnavailable(format!(
                            "primary: {primary}; fallback: {e}"
                        ))
                    })
            }
        }
    }
}
