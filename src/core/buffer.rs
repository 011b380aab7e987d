//! Streaming redaction buffer
//!
//! Holds back `buffer_size` fragments. Each time the window is full it is
//! evaluated against `sample_count - 1` alternate continuations of the same
//! prefix; a healthy window releases only its oldest fragment, a flagged
//! window is dropped whole and replaced by one marker.
//!
//! A stream that stalls longer than `fragment_timeout` between fragments is
//! treated as a failed source.
//!
//! Runs as a producer task feeding a bounded channel. Dropping the returned
//! stream closes the channel, which stops the producer and aborts any
//! in-flight alternate samples.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::GasketConfig;
use crate::core::claims::FactGuard;
use crate::core::gate::ConstitutionalGate;
use crate::core::source::{CompletionSource, FragmentStream};
use crate::core::variance::VarianceMeasure;
use crate::error::{GasketError, GasketResult};
use crate::types::{FinalStatus, ReasonCode, StreamEvent, StreamSummary};

/// Consumer side of one buffered stream
pub type EventStream = BoxStream<'static, StreamEvent>;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct BufferSettings {
    pub buffer_size: usize,
    pub sample_count: usize,
    pub sample_timeout: Duration,
    pub fragment_timeout: Duration,
    pub variance_limit: f64,
    pub severe_limit: f64,
    pub crystallization_threshold: f64,
}

impl BufferSettings {
    pub fn from_config(config: &GasketConfig) -> Self {
        Self {
            buffer_size: config.buffer_size.max(1),
            sample_count: config.sample_count,
            sample_timeout: Duration::from_millis(config.sample_timeout_ms),
            fragment_timeout: Duration::from_millis(config.fragment_timeout_ms),
            variance_limit: config.variance_limit,
            severe_limit: config.severe_limit(),
            crystallization_threshold: config.crystallization_threshold,
        }
    }
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self::from_config(&GasketConfig::default())
    }
}

/// Sliding-window interdiction over a fragment stream
#[derive(Clone)]
pub struct RedactionBuffer {
    settings: BufferSettings,
    source: Arc<dyn CompletionSource>,
    measure: Arc<dyn VarianceMeasure>,
    guard: Option<FactGuard>,
    gate: Arc<ConstitutionalGate>,
}

impl RedactionBuffer {
    pub fn new(
        settings: BufferSettings,
        source: Arc<dyn CompletionSource>,
        measure: Arc<dyn VarianceMeasure>,
        gate: Arc<ConstitutionalGate>,
    ) -> Self {
        Self {
            settings,
            source,
            measure,
            guard: None,
            gate,
        }
    }

    /// Cross-check claims in every evaluated window
    pub fn with_fact_guard(mut self, guard: FactGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn settings(&self) -> &BufferSettings {
        &self.settings
    }

    /// Interdict `tokens`. Alternates are sampled from `prompt` plus the
    /// released text. Must be called inside a tokio runtime.
    pub fn process(&self, prompt: &str, system: &str, tokens: FragmentStream) -> EventStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let run = Run {
            buffer: self.clone(),
            prompt: prompt.to_string(),
            system: system.to_string(),
            tx,
            window: VecDeque::with_capacity(self.settings.buffer_size),
            accumulated: String::new(),
            summary: StreamSummary::new(FinalStatus::Completed),
        };
        tokio::spawn(run.execute(tokens));

        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|e| (e, rx)) }).boxed()
    }
}

/// Why the producer stopped before the end of its input
enum Halt {
    /// Consumer dropped the stream
    Disconnected,
    Status(FinalStatus),
}

type Flow = Result<(), Halt>;

struct Run {
    buffer: RedactionBuffer,
    prompt: String,
    system: String,
    tx: mpsc::Sender<StreamEvent>,
    window: VecDeque<String>,
    accumulated: String,
    summary: StreamSummary,
}

impl Run {
    async fn execute(mut self, tokens: FragmentStream) {
        let watch = self.tx.clone();
        let outcome = tokio::select! {
            biased;
            _ = watch.closed() => Err(Halt::Disconnected),
            outcome = self.drive(tokens) => outcome,
        };

        let status = match outcome {
            Ok(status) | Err(Halt::Status(status)) => status,
            Err(Halt::Disconnected) => {
                tracing::debug!("consumer dropped stream, producer stopped");
                return;
            }
        };
        self.summary.status = status;
        tracing::info!(
            status = %status,
            ingested = self.summary.ingested,
            released = self.summary.released,
            redactions = self.summary.redactions,
            "stream finished"
        );
        let _ = self.tx.send(StreamEvent::Finished(self.summary.clone())).await;
    }

    async fn drive(&mut self, mut tokens: FragmentStream) -> Result<FinalStatus, Halt> {
        if self.buffer.gate.is_locked() {
            tracing::warn!(reason = ReasonCode::R401_SYSTEM_LOCKED.code(), "stream refused");
            self.emit(StreamEvent::Locked).await?;
            return Ok(FinalStatus::SystemLocked);
        }

        let fragment_timeout = self.buffer.settings.fragment_timeout;
        loop {
            let next = match tokio::time::timeout(fragment_timeout, tokens.next()).await {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(_) => Err(GasketError::Timeout {
                    operation: "next fragment".to_string(),
                    millis: fragment_timeout.as_millis() as u64,
                }),
            };
            let fragment = match next {
                Ok(fragment) => fragment,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        reason = ReasonCode::R302_SOURCE_UNAVAILABLE.code(),
                        dropped = self.window.len(),
                        "completion source failed mid-stream"
                    );
                    self.window.clear();
                    self.emit(StreamEvent::Fallback).await?;
                    return Ok(FinalStatus::SourceUnavailable);
                }
            };
            self.summary.ingested += 1;
            self.window.push_back(fragment);

            if self.window.len() >= self.buffer.settings.buffer_size {
                self.evaluate().await?;
            }
        }

        // Tail was already inside an accepted window, except for a price
        // that was still open there.
        if !self.window.is_empty() {
            self.settle_tail().await?;
        }
        if !self.window.is_empty() {
            tracing::debug!(reason = ReasonCode::R102_TAIL_FLUSHED.code(), tail = self.window.len(), "flushing tail");
        }
        while let Some(fragment) = self.window.pop_front() {
            self.release(fragment).await?;
        }

        Ok(if self.summary.redactions > 0 {
            FinalStatus::Interdicted
        } else {
            FinalStatus::Completed
        })
    }

    /// Judge the full window, then release its oldest fragment or drop it
    async fn evaluate(&mut self) -> Flow {
        self.summary.evaluations += 1;
        let window_no = self.summary.evaluations;
        let proposed: String = self
            .accumulated
            .chars()
            .chain(self.window.iter().flat_map(|f| f.chars()))
            .collect();

        let measured = match self.sample(&proposed).await {
            Ok(completions) => self.buffer.measure.measure(&completions).await,
            Err(e) => Err(e),
        }
        .and_then(|v| {
            if v.is_finite() && v >= 0.0 {
                Ok(v)
            } else {
                Err(GasketError::MeasurementUnavailable(format!("unusable variance {v}")))
            }
        });
        let variance = match measured {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    window = window_no,
                    reason = ReasonCode::R301_MEASUREMENT_UNAVAILABLE.code(),
                    "measurement unavailable, failing closed"
                );
                self.buffer.gate.record_measurement_failure();
                self.window.clear();
                self.emit(StreamEvent::Fallback).await?;
                return Err(Halt::Status(FinalStatus::MeasurementUnavailable));
            }
        };

        self.summary.peak_variance = self.summary.peak_variance.max(variance);
        let health = self.buffer.gate.update_health(variance);
        let BufferSettings {
            variance_limit,
            severe_limit,
            crystallization_threshold,
            ..
        } = self.buffer.settings;

        let verdict = if variance > severe_limit {
            ReasonCode::R204_SEVERE_BREACH
        } else if variance > variance_limit {
            ReasonCode::R201_VARIANCE_BREACH
        } else if health < crystallization_threshold {
            ReasonCode::R202_HEALTH_BELOW_THRESHOLD
        } else if !self.fact_check(&proposed).await {
            ReasonCode::R203_FACTUAL_BREACH
        } else {
            ReasonCode::R101_WINDOW_RELEASED
        };

        if !verdict.is_redaction() {
            tracing::debug!(window = window_no, variance, health, "window healthy");
            return match self.window.pop_front() {
                Some(oldest) => self.release(oldest).await,
                None => Ok(()),
            };
        }

        tracing::warn!(
            window = window_no,
            variance,
            health,
            reason = verdict.code(),
            dropped = self.window.len(),
            "window redacted"
        );
        self.window.clear();
        self.summary.redactions += 1;
        self.emit(StreamEvent::Redacted).await?;

        if verdict == ReasonCode::R204_SEVERE_BREACH {
            let breach = GasketError::SevereBreach {
                value: variance,
                limit: severe_limit,
            };
            tracing::error!(window = window_no, error = %breach, "severe breach");
            self.buffer.gate.trigger_lockout(&breach.to_string());
            self.emit(StreamEvent::Locked).await?;
            return Err(Halt::Status(FinalStatus::SevereBreach));
        }
        Ok(())
    }

    /// Cross-check complete claims; a price still open at the edge waits
    /// for the fragments that finish it
    async fn fact_check(&self, proposed: &str) -> bool {
        let Some(guard) = &self.buffer.guard else {
            return true;
        };
        let (check, pending) = guard.check_settled(proposed).await;
        if pending {
            tracing::debug!("price claim still open, deferred");
        }
        if !check.passed() {
            tracing::warn!(reason = check.reason.code(), detail = %check.detail, "fact check failed");
        }
        check.passed()
    }

    /// End of input closes any open price; check it before the tail goes out
    async fn settle_tail(&mut self) -> Flow {
        let Some(guard) = &self.buffer.guard else {
            return Ok(());
        };
        let proposed: String = self
            .accumulated
            .chars()
            .chain(self.window.iter().flat_map(|f| f.chars()))
            .collect();
        let (_, pending) = guard.check_settled(&proposed).await;
        if !pending {
            return Ok(());
        }

        let check = guard.check(&proposed).await;
        if check.passed() {
            return Ok(());
        }
        tracing::warn!(
            reason = ReasonCode::R203_FACTUAL_BREACH.code(),
            detail = %check.detail,
            dropped = self.window.len(),
            "tail redacted"
        );
        self.window.clear();
        self.summary.redactions += 1;
        self.emit(StreamEvent::Redacted).await
    }

    /// `[proposed, accumulated + alt_1, ...]`, alternates sampled in parallel
    async fn sample(&self, proposed: &str) -> GasketResult<Vec<String>> {
        let settings = &self.buffer.settings;
        let prefix = format!("{}{}", self.prompt, self.accumulated);
        let timeout = settings.sample_timeout;

        let mut tasks = JoinSet::new();
        for _ in 1..settings.sample_count {
            let source = self.buffer.source.clone();
            let prefix = prefix.clone();
            let system = self.system.clone();
            tasks.spawn(async move {
                match tokio::time::timeout(timeout, source.generate(&prefix, &system)).await {
                    Ok(result) => result,
                    Err(_) => Err(GasketError::Timeout {
                        operation: format!("alternate sample via {}", source.name()),
                        millis: timeout.as_millis() as u64,
                    }),
                }
            });
        }

        let mut completions = Vec::with_capacity(settings.sample_count);
        completions.push(proposed.to_string());
        while let Some(joined) = tasks.join_next().await {
            let alternate = joined
                .map_err(|e| GasketError::MeasurementUnavailable(format!("sampler task: {e}")))?
                .map_err(|e| GasketError::MeasurementUnavailable(format!("alternate sample: {e}")))?;
            completions.push(format!("{}{}", self.accumulated, alternate));
        }
        Ok(completions)
    }

    /// Emit one fragment of text, unless a lockout has appeared meanwhile
    async fn release(&mut self, fragment: String) -> Flow {
        if self.buffer.gate.is_locked() {
            tracing::warn!(
                reason = ReasonCode::R401_SYSTEM_LOCKED.code(),
                "lockout detected before release, halting stream"
            );
            self.window.clear();
            self.emit(StreamEvent::Locked).await?;
            return Err(Halt::Status(FinalStatus::SystemLocked));
        }
        self.accumulated.push_str(&fragment);
        self.summary.released += 1;
        self.emit(StreamEvent::Fragment(fragment)).await
    }

    async fn emit(&self, event: StreamEvent) -> Flow {
        self.tx.send(event).await.map_err(|_| Halt::Disconnected)
    }
}
