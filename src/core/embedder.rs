//! Embedding backends

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{GasketError, GasketResult};

/// Text to fixed-dimension vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> GasketResult<Vec<f64>>;

    /// Short label for logs
    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f64>,
}

/// Remote embedding service: POST `{"text"}` → `{"embedding": [...]}`
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
}

impl HttpEmbedder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> GasketResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GasketError::Config(format!("embed client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> GasketResult<Vec<f64>> {
        let response = self
            .client
            .post(&self.url)
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| GasketError::MeasurementUnavailable(format!("embed request: {e}")))?;

        if !response.status().is_success() {
            return Err(GasketError::MeasurementUnavailable(format!(
                "embed service returned {}",
                response.status()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| GasketError::MeasurementUnavailable(format!("embed response: {e}")))?;
        Ok(body.embedding)
    }

    fn name(&self) -> &str {
        &self.url
    }
}

/// Dimension of the hashing embedder
pub const HASHING_DIM: usize = 64;

/// Offline bag-of-words embedder
///
/// Each lowercase word is hashed to a bucket and a sign; the result is
/// L2-normalized. Identical texts give identical vectors, disjoint
/// vocabularies give near-orthogonal ones.
#[derive(Debug, Clone, Default)]
pub struct HashingEmbedder;

impl HashingEmbedder {
    pub fn new() -> Self {
        Self
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; HASHING_DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != '$' && c != '.')
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u16::from_be_bytes([digest[0], digest[1]]) as usize % HASHING_DIM;
            let sign = if digest[2] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> GasketResult<Vec<f64>> {
        Ok(self.embed_sync(text))
    }

    fn name(&self) -> &str {
        "hashing"
    }
}
