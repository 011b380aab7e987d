//! Constitutional gate
//!
//! State machine:
//! - OPEN → DEGRADED: health index below crystallization threshold
//! - DEGRADED → OPEN: health recovers
//! - any → LOCKED: severe breach (persisted)
//! - LOCKED → OPEN: operator reset only
//!
//! Health, counters and the cached lockout record sit behind one mutex, so
//! token issuance and lockout are mutually atomic.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::GasketConfig;
use crate::core::lockout::LockoutStore;
use crate::core::token::TokenSigner;
use crate::core::variance::health_index;
use crate::error::GasketResult;
use crate::types::{
    ClearancePayload, ClearanceReason, ClearanceResult, ClearanceToken, GateState, GateStatus,
    LockoutRecord, TokenRejection, TOKEN_VERSION,
};

/// Thresholds the gate enforces
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub variance_limit: f64,
    pub severe_limit: f64,
    pub crystallization_threshold: f64,
    pub confidence: f64,
    pub cage_code: String,
}

impl GateSettings {
    pub fn from_config(config: &GasketConfig) -> Self {
        Self {
            variance_limit: config.variance_limit,
            severe_limit: config.severe_limit(),
            crystallization_threshold: config.crystallization_threshold,
            confidence: config.confidence(),
            cage_code: config.cage_code.clone(),
        }
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        Self::from_config(&GasketConfig::default())
    }
}

#[derive(Debug)]
struct GateInner {
    health: f64,
    last_dispersion: Option<f64>,
    tokens_issued: u64,
    lockout: Option<LockoutRecord>,
}

impl GateInner {
    fn fresh() -> Self {
        Self {
            health: 1.0,
            last_dispersion: None,
            tokens_issued: 0,
            lockout: None,
        }
    }
}

pub struct ConstitutionalGate {
    settings: GateSettings,
    store: Arc<dyn LockoutStore>,
    signer: TokenSigner,
    inner: Mutex<GateInner>,
}

impl std::fmt::Debug for ConstitutionalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstitutionalGate")
            .field("settings", &self.settings)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl ConstitutionalGate {
    /// Build the gate; an active record in the store restores LOCKED
    pub fn new(settings: GateSettings, store: Arc<dyn LockoutStore>, signer: TokenSigner) -> Self {
        let mut inner = GateInner::fresh();
        match store.load() {
            Ok(Some(record)) => {
                tracing::warn!(reason = %record.reason, since = %record.timestamp, "lockout record restored");
                inner.lockout = Some(record);
            }
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "lockout store unreadable at startup"),
        }
        Self {
            settings,
            store,
            signer,
            inner: Mutex::new(inner),
        }
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Re-read the store unless already locked. Unreadable store counts as
    /// locked but is not cached, so a repaired store unlocks.
    fn refresh_locked(&self, inner: &mut GateInner) -> bool {
        if inner.lockout.is_some() {
            return true;
        }
        match self.store.load() {
            Ok(Some(record)) => {
                inner.lockout = Some(record);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::error!(error = %e, "lockout store unreadable, failing closed");
                true
            }
        }
    }

    fn lock_inner(&self, inner: &mut GateInner, reason: &str) -> LockoutRecord {
        if let Some(record) = &inner.lockout {
            return record.clone();
        }
        if let Ok(Some(record)) = self.store.load() {
            inner.lockout = Some(record.clone());
            return record;
        }

        let record = LockoutRecord::new(reason);
        if let Err(e) = self.store.save(&record) {
            // Still locked in memory for this process.
            tracing::error!(error = %e, "failed to persist lockout record");
        }
        tracing::error!(reason, "LOCKOUT TRIGGERED");
        inner.lockout = Some(record.clone());
        record
    }

    /// Is a lockout in effect (re-checks the store)?
    pub fn is_locked(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh_locked(&mut inner)
    }

    pub fn health_index(&self) -> f64 {
        self.inner.lock().health
    }

    /// Recompute the health index from a fresh dispersion
    pub fn update_health(&self, dispersion: f64) -> f64 {
        let health = health_index(dispersion, self.settings.confidence);
        let mut inner = self.inner.lock();
        inner.health = health;
        inner.last_dispersion = Some(dispersion);
        tracing::debug!(dispersion, health, "health index updated");
        health
    }

    /// Unmeasurable variance is treated as maximal
    pub fn record_measurement_failure(&self) {
        let mut inner = self.inner.lock();
        inner.health = 0.0;
        inner.last_dispersion = None;
    }

    /// Set the lockout. Idempotent: the first reason is kept.
    pub fn trigger_lockout(&self, reason: &str) -> LockoutRecord {
        let mut inner = self.inner.lock();
        self.lock_inner(&mut inner, reason)
    }

    /// Request clearance for an intent to act
    pub fn issue_token(&self, intent: &str, kinetic_entropy: f64) -> ClearanceResult {
        let mut inner = self.inner.lock();

        if self.refresh_locked(&mut inner) {
            return ClearanceResult::refused(ClearanceReason::R501_SYSTEM_LOCKED);
        }

        if inner.health < self.settings.crystallization_threshold {
            return ClearanceResult::refused(ClearanceReason::R502_HEALTH_BELOW_THRESHOLD);
        }

        if !kinetic_entropy.is_finite() || kinetic_entropy > self.settings.severe_limit {
            self.lock_inner(
                &mut inner,
                &format!(
                    "KINETIC_ENTROPY_SEVERE: {kinetic_entropy} > {} for intent {intent}",
                    self.settings.severe_limit
                ),
            );
            return ClearanceResult::refused(ClearanceReason::R504_ENTROPY_SEVERE);
        }

        if kinetic_entropy > self.settings.variance_limit {
            tracing::warn!(kinetic_entropy, intent, "clearance refused, entropy over limit");
            return ClearanceResult::refused(ClearanceReason::R503_ENTROPY_OVER_LIMIT);
        }

        let token = self.signer.sign(ClearancePayload {
            version: TOKEN_VERSION,
            cage_code: self.settings.cage_code.clone(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            health_index: inner.health,
            kinetic_entropy,
            intent: intent.to_string(),
        });
        inner.tokens_issued += 1;
        tracing::info!(intent, health = inner.health, "clearance granted");
        ClearanceResult::granted(token)
    }

    /// Verify a token issued by this gate
    pub fn verify_token(&self, token: &ClearanceToken) -> Result<(), TokenRejection> {
        self.signer.verify(token)?;
        if token.payload.cage_code != self.settings.cage_code {
            return Err(TokenRejection::R515_TOKEN_WRONG_CAGE);
        }
        Ok(())
    }

    /// Parse and verify the hex wire form
    pub fn verify_hex(&self, text: &str) -> Result<ClearanceToken, TokenRejection> {
        let token = ClearanceToken::from_hex(text).ok_or(TokenRejection::R511_TOKEN_MALFORMED)?;
        self.verify_token(&token)?;
        Ok(token)
    }

    /// Operator reset: remove the record and start over
    pub fn reset(&self) -> GasketResult<()> {
        let mut inner = self.inner.lock();
        self.store.clear()?;
        let tokens_issued = inner.tokens_issued;
        *inner = GateInner::fresh();
        inner.tokens_issued = tokens_issued;
        tracing::warn!("gate reset by operator");
        Ok(())
    }

    pub fn state(&self) -> GateState {
        self.status().state
    }

    pub fn status(&self) -> GateStatus {
        let mut inner = self.inner.lock();
        let locked = self.refresh_locked(&mut inner);
        let state = if locked {
            GateState::Locked
        } else if inner.health < self.settings.crystallization_threshold {
            GateState::Degraded
        } else {
            GateState::Open
        };
        GateStatus {
            state,
            health_index: inner.health,
            last_dispersion: inner.last_dispersion,
            tokens_issued: inner.tokens_issued,
            lockout: inner.lockout.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lockout::MemoryLockoutStore;

    fn gate() -> ConstitutionalGate {
        gate_with(Arc::new(MemoryLockoutStore::new()))
    }

    fn gate_with(store: Arc<dyn LockoutStore>) -> ConstitutionalGate {
        ConstitutionalGate::new(
            GateSettings::default(),
            store,
            TokenSigner::new(b"test", 500).unwrap(),
        )
    }

    #[test]
    fn test_starts_open() {
        let g = gate();
        assert_eq!(g.state(), GateState::Open);
        assert_eq!(g.health_index(), 1.0);
    }

    #[test]
    fn test_variance_at_limit_stays_open() {
        let g = gate();
        let h = g.update_health(0.01);
        assert!(h >= 0.997);
        assert_eq!(g.state(), GateState::Open);
    }

    #[test]
    fn test_variance_over_limit_degrades() {
        let g = gate();
        g.update_health(0.06);
        assert_eq!(g.state(), GateState::Degraded);
        g.update_health(0.0);
        assert_eq!(g.state(), GateState::Open);
    }

    #[test]
    fn test_nan_dispersion_is_worst_case() {
        let g = gate();
        assert_eq!(g.update_health(f64::NAN), 0.0);
        assert_eq!(g.state(), GateState::Degraded);
    }

    #[test]
    fn test_measurement_failure_zeroes_health() {
        let g = gate();
        g.record_measurement_failure();
        assert_eq!(g.health_index(), 0.0);
    }

    #[test]
    fn test_issue_token_happy_path() {
        let g = gate();
        let result = g.issue_token("EXECUTE_TRADE", 0.01);
        assert!(result.is_granted());
        let token = result.token.unwrap();
        assert_eq!(token.payload.cage_code, "17TJ5");
        assert_eq!(g.verify_token(&token), Ok(()));
        assert_eq!(g.status().tokens_issued, 1);
    }

    #[test]
    fn test_entropy_over_limit_refused_without_lockout() {
        let g = gate();
        let result = g.issue_token("EXECUTE_TRADE", 0.07);
        assert_eq!(result.reason, ClearanceReason::R503_ENTROPY_OVER_LIMIT);
        assert!(!g.is_locked());
    }

    #[test]
    fn test_severe_entropy_locks() {
        let g = gate();
        let result = g.issue_token("EXECUTE_TRADE", 0.5);
        assert_eq!(result.reason, ClearanceReason::R504_ENTROPY_SEVERE);
        assert!(g.is_locked());
        let result = g.issue_token("EXECUTE_TRADE", 0.0);
        assert_eq!(result.reason, ClearanceReason::R501_SYSTEM_LOCKED);
    }

    #[test]
    fn test_nan_entropy_is_severe() {
        let g = gate();
        let result = g.issue_token("EXECUTE_TRADE", f64::NAN);
        assert_eq!(result.reason, ClearanceReason::R504_ENTROPY_SEVERE);
    }

    #[test]
    fn test_degraded_refuses_clearance() {
        let g = gate();
        g.update_health(0.2);
        let result = g.issue_token("EXECUTE_TRADE", 0.0);
        assert_eq!(result.reason, ClearanceReason::R502_HEALTH_BELOW_THRESHOLD);
    }

    #[test]
    fn test_degraded_refuses_before_judging_entropy() {
        let g = gate();
        g.update_health(0.2);
        let result = g.issue_token("EXECUTE_TRADE", 0.2);
        assert_eq!(result.reason, ClearanceReason::R502_HEALTH_BELOW_THRESHOLD);
        assert!(!g.is_locked());
        assert!(g.status().lockout.is_none());
    }

    #[test]
    fn test_lockout_idempotent_first_reason_kept() {
        let g = gate();
        let first = g.trigger_lockout("FIRST");
        let second = g.trigger_lockout("SECOND");
        assert_eq!(first, second);
        assert_eq!(g.status().lockout.unwrap().reason, "FIRST");
    }

    #[test]
    fn test_lockout_set_by_another_handle_is_seen() {
        let store: Arc<dyn LockoutStore> = Arc::new(MemoryLockoutStore::new());
        let a = gate_with(store.clone());
        let b = gate_with(store);
        a.trigger_lockout("FROM_A");
        assert!(b.is_locked());
        assert_eq!(b.trigger_lockout("FROM_B").reason, "FROM_A");
    }

    #[test]
    fn test_reset_reopens() {
        let g = gate();
        g.update_health(0.5);
        g.trigger_lockout("X");
        g.reset().unwrap();
        let status = g.status();
        assert_eq!(status.state, GateState::Open);
        assert_eq!(status.health_index, 1.0);
        assert!(status.lockout.is_none());
    }

    #[test]
    fn test_wrong_cage_rejected() {
        let g = gate();
        let token = g.issue_token("X", 0.0).token.unwrap();
        let other = ConstitutionalGate::new(
            GateSettings {
                cage_code: "OTHER".to_string(),
                ..GateSettings::default()
            },
            Arc::new(MemoryLockoutStore::new()),
            TokenSigner::new(b"test", 500).unwrap(),
        );
        assert_eq!(other.verify_token(&token), Err(TokenRejection::R515_TOKEN_WRONG_CAGE));
    }
}
