//! Clearance token types
//!
//! Wire layout (big endian):
//! version(2) + cage_len(2) + cage + timestamp_ms(8) + health(8)
//! + entropy(8) + intent_len(4) + intent + mac(32)

use serde::{Deserialize, Serialize};

/// Current token layout version
pub const TOKEN_VERSION: u16 = 1;

/// HMAC-SHA256 output size
pub const MAC_LEN: usize = 32;

/// Signed fields of a clearance token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearancePayload {
    pub version: u16,
    pub cage_code: String,
    /// Unix milliseconds at issuance
    pub timestamp_ms: i64,
    pub health_index: f64,
    pub kinetic_entropy: f64,
    pub intent: String,
}

impl ClearancePayload {
    /// Canonical byte encoding (the MAC input)
    pub fn to_bytes(&self) -> Vec<u8> {
        let cage = self.cage_code.as_bytes();
        let intent = self.intent.as_bytes();
        let mut bytes = Vec::with_capacity(2 + 2 + cage.len() + 24 + 4 + intent.len());

        bytes.extend_from_slice(&self.version.to_be_bytes());
        bytes.extend_from_slice(&(cage.len() as u16).to_be_bytes());
        bytes.extend_from_slice(cage);
        bytes.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        bytes.extend_from_slice(&self.health_index.to_be_bytes());
        bytes.extend_from_slice(&self.kinetic_entropy.to_be_bytes());
        bytes.extend_from_slice(&(intent.len() as u32).to_be_bytes());
        bytes.extend_from_slice(intent);

        bytes
    }

    /// Parse the canonical encoding; returns the payload and bytes consumed
    pub fn from_bytes(bytes: &[u8]) -> Option<(Self, usize)> {
        let mut reader = Reader { bytes, offset: 0 };

        let version = u16::from_be_bytes(reader.take_array()?);
        let cage_len = u16::from_be_bytes(reader.take_array()?) as usize;
        let cage_code = String::from_utf8(reader.take(cage_len)?.to_vec()).ok()?;
        let timestamp_ms = i64::from_be_bytes(reader.take_array()?);
        let health_index = f64::from_be_bytes(reader.take_array()?);
        let kinetic_entropy = f64::from_be_bytes(reader.take_array()?);
        let intent_len = u32::from_be_bytes(reader.take_array()?) as usize;
        let intent = String::from_utf8(reader.take(intent_len)?.to_vec()).ok()?;

        Some((
            Self {
                version,
                cage_code,
                timestamp_ms,
                health_index,
                kinetic_entropy,
                intent,
            },
            reader.offset,
        ))
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(len)?;
        let slice = self.bytes.get(self.offset..end)?;
        self.offset = end;
        Some(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }
}

/// Complete token: payload plus MAC
#[derive(Debug, Clone, PartialEq)]
pub struct ClearanceToken {
    pub payload: ClearancePayload,
    pub mac: [u8; MAC_LEN],
}

impl ClearanceToken {
    pub fn new(payload: ClearancePayload, mac: [u8; MAC_LEN]) -> Self {
        Self { payload, mac }
    }

    /// Serialize payload then MAC
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.payload.to_bytes();
        bytes.extend_from_slice(&self.mac);
        bytes
    }

    /// Deserialize; trailing bytes after the MAC are rejected
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (payload, used) = ClearancePayload::from_bytes(bytes)?;
        let rest = bytes.get(used..)?;
        if rest.len() != MAC_LEN {
            return None;
        }
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(rest);
        Some(Self { payload, mac })
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse from hex string
    pub fn from_hex(text: &str) -> Option<Self> {
        let bytes = hex::decode(text.trim()).ok()?;
        Self::from_bytes(&bytes)
    }
}

/// Reason codes for clearance issuance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum ClearanceReason {
    /// Token signed and issued
    R500_CLEARANCE_GRANTED,
    /// Lockout record present
    R501_SYSTEM_LOCKED,
    /// Health index below crystallization threshold
    R502_HEALTH_BELOW_THRESHOLD,
    /// Kinetic entropy above the constitutional limit
    R503_ENTROPY_OVER_LIMIT,
    /// Kinetic entropy above twice the limit; lockout triggered
    R504_ENTROPY_SEVERE,
}

impl ClearanceReason {
    /// Get code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::R500_CLEARANCE_GRANTED => "R500_CLEARANCE_GRANTED",
            Self::R501_SYSTEM_LOCKED => "R501_SYSTEM_LOCKED",
            Self::R502_HEALTH_BELOW_THRESHOLD => "R502_HEALTH_BELOW_THRESHOLD",
            Self::R503_ENTROPY_OVER_LIMIT => "R503_ENTROPY_OVER_LIMIT",
            Self::R504_ENTROPY_SEVERE => "R504_ENTROPY_SEVERE",
        }
    }

    /// Get description
    pub fn description(&self) -> &'static str {
        match self {
            Self::R500_CLEARANCE_GRANTED => "Clearance token issued",
            Self::R501_SYSTEM_LOCKED => "System locked",
            Self::R502_HEALTH_BELOW_THRESHOLD => "Health index below crystallization",
            Self::R503_ENTROPY_OVER_LIMIT => "Kinetic entropy exceeds limit",
            Self::R504_ENTROPY_SEVERE => "Kinetic entropy exceeds twice the limit, system locked",
        }
    }

    /// Is this a success code?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::R500_CLEARANCE_GRANTED)
    }
}

impl std::fmt::Display for ClearanceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}

/// Result of a clearance request
#[derive(Debug, Clone)]
pub struct ClearanceResult {
    /// The token if granted
    pub token: Option<ClearanceToken>,
    /// Reason code
    pub reason: ClearanceReason,
}

impl ClearanceResult {
    /// Create granted result
    pub fn granted(token: ClearanceToken) -> Self {
        Self {
            token: Some(token),
            reason: ClearanceReason::R500_CLEARANCE_GRANTED,
        }
    }

    /// Create refusal
    pub fn refused(reason: ClearanceReason) -> Self {
        Self { token: None, reason }
    }

    /// Check if granted
    pub fn is_granted(&self) -> bool {
        self.token.is_some()
    }
}

/// Why a presented token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum TokenRejection {
    R511_TOKEN_MALFORMED,
    R512_TOKEN_BAD_SIGNATURE,
    R513_TOKEN_EXPIRED,
    R514_TOKEN_FROM_FUTURE,
    R515_TOKEN_WRONG_CAGE,
}

impl TokenRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::R511_TOKEN_MALFORMED => "R511_TOKEN_MALFORMED",
            Self::R512_TOKEN_BAD_SIGNATURE => "R512_TOKEN_BAD_SIGNATURE",
            Self::R513_TOKEN_EXPIRED => "R513_TOKEN_EXPIRED",
            Self::R514_TOKEN_FROM_FUTURE => "R514_TOKEN_FROM_FUTURE",
            Self::R515_TOKEN_WRONG_CAGE => "R515_TOKEN_WRONG_CAGE",
        }
    }
}

impl std::fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ClearancePayload {
        ClearancePayload {
            version: TOKEN_VERSION,
            cage_code: "17TJ5".to_string(),
            timestamp_ms: 1_700_000_000_000,
            health_index: 0.999,
            kinetic_entropy: 0.01,
            intent: "EXECUTE_TRADE::WETH/USDC".to_string(),
        }
    }

    #[test]
    fn test_token_hex_restores_fields() {
        let token = ClearanceToken::new(payload(), [7u8; MAC_LEN]);
        let restored = ClearanceToken::from_hex(&token.to_hex()).unwrap();
        assert_eq!(restored, token);
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let token = ClearanceToken::new(payload(), [7u8; MAC_LEN]);
        let bytes = token.to_bytes();
        assert!(ClearanceToken::from_bytes(&bytes[..bytes.len() - 1]).is_none());
        assert!(ClearanceToken::from_bytes(&bytes[..10]).is_none());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let token = ClearanceToken::new(payload(), [7u8; MAC_LEN]);
        let mut bytes = token.to_bytes();
        bytes.push(0);
        assert!(ClearanceToken::from_bytes(&bytes).is_none());
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!(ClearanceToken::from_hex("zz").is_none());
        assert!(ClearanceToken::from_hex("").is_none());
    }
}
