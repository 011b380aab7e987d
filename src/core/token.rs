//! Clearance token signing and verification
//!
//! HMAC-SHA256 over the canonical payload bytes. Verification checks the
//! MAC in constant time, then the age window.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::{GasketError, GasketResult};
use crate::types::{ClearancePayload, ClearanceToken, TokenRejection, MAC_LEN};
use crate::TOKEN_SKEW_MS;

type HmacSha256 = Hmac<Sha256>;

/// Holds the keyed HMAC state
#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
    ttl_ms: u64,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("ttl_ms", &self.ttl_ms)
            .finish()
    }
}

impl TokenSigner {
    /// Signer with an explicit key
    pub fn new(key: &[u8], ttl_ms: u64) -> GasketResult<Self> {
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| GasketError::Config(format!("invalid token key: {e}")))?;
        Ok(Self { mac, ttl_ms })
    }

    /// Signer with a fresh 32-byte key; tokens do not survive the process
    pub fn new_random(ttl_ms: u64) -> GasketResult<Self> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(&key, ttl_ms)
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Sign a payload
    pub fn sign(&self, payload: ClearancePayload) -> ClearanceToken {
        let mut mac = self.mac.clone();
        mac.update(&payload.to_bytes());
        let digest = mac.finalize().into_bytes();

        let mut out = [0u8; MAC_LEN];
        out.copy_from_slice(&digest);
        ClearanceToken::new(payload, out)
    }

    /// Verify a token against the current clock
    pub fn verify(&self, token: &ClearanceToken) -> Result<(), TokenRejection> {
        self.verify_at(token, chrono::Utc::now().timestamp_millis())
    }

    /// Verify a token against an explicit clock reading (unix ms)
    pub fn verify_at(&self, token: &ClearanceToken, now_ms: i64) -> Result<(), TokenRejection> {
        let mut mac = self.mac.clone();
        mac.update(&token.payload.to_bytes());
        mac.verify_slice(&token.mac)
            .map_err(|_| TokenRejection::R512_TOKEN_BAD_SIGNATURE)?;

        let age = now_ms - token.payload.timestamp_ms;
        if age < -(TOKEN_SKEW_MS as i64) {
            return Err(TokenRejection::R514_TOKEN_FROM_FUTURE);
        }
        if age > self.ttl_ms as i64 {
            return Err(TokenRejection::R513_TOKEN_EXPIRED);
        }
        Ok(())
    }

    /// Parse and verify the hex wire form
    pub fn verify_hex(&self, text: &str) -> Result<ClearanceToken, TokenRejection> {
        let token = ClearanceToken::from_hex(text).ok_or(TokenRejection::R511_TOKEN_MALFORMED)?;
        self.verify(&token)?;
        Ok(token)
    }
}
