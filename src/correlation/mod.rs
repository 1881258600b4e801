//! Correlation IDs shared with the external workflow engine.
//!
//! The engine only carries an opaque string per process instance. We pack the
//! record ID and the apply sequence of the submission into that string so
//! callbacks can be matched back to the exact submission that produced them:
//!
//! ```text
//! record_id (u64 BE) ‖ apply_sequence (u64 BE) ──base64url, no pad──▶ 22 chars
//! ```
//!
//! The payload is fixed width, so truncated or padded tokens never decode.
//! Decode failures are [`CorrelationError::Malformed`], which callers must
//! keep distinct from "record not found".

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

const PAYLOAD_LEN: usize = 16;

/// Length of every encoded token.
pub const TOKEN_LEN: usize = 22;

/// Errors produced when decoding a correlation ID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    #[error("Malformed correlation ID '{token}': {reason}")]
    Malformed { token: String, reason: &'static str },
}

impl CorrelationError {
    fn malformed(token: &str, reason: &'static str) -> Self {
        Self::Malformed {
            token: token.to_string(),
            reason,
        }
    }
}

/// Decoded `(record ID, apply sequence)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId {
    pub record_id: u64,
    pub apply_sequence: u64,
}

impl CorrelationId {
    pub fn new(record_id: u64, apply_sequence: u64) -> Self {
        Self {
            record_id,
            apply_sequence,
        }
    }

    /// Encode into the opaque token handed to the workflow engine.
    pub fn encode(&self) -> String {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[..8].copy_from_slice(&self.record_id.to_be_bytes());
        payload[8..].copy_from_slice(&self.apply_sequence.to_be_bytes());
        URL_SAFE_NO_PAD.encode(payload)
    }

    /// Decode a token produced by [`encode`](Self::encode).
    pub fn decode(token: &str) -> Result<Self, CorrelationError> {
        if token.len() != TOKEN_LEN {
            return Err(CorrelationError::malformed(token, "unexpected length"));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CorrelationError::malformed(token, "not base64url"))?;

        let payload: [u8; PAYLOAD_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CorrelationError::malformed(token, "unexpected payload size"))?;

        let mut id = [0u8; 8];
        let mut seq = [0u8; 8];
        id.copy_from_slice(&payload[..8]);
        seq.copy_from_slice(&payload[8..]);

        Ok(Self {
            record_id: u64::from_be_bytes(id),
            apply_sequence: u64::from_be_bytes(seq),
        })
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for CorrelationId {
    type Err = CorrelationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

#[cfg(test)]
mod tests;
