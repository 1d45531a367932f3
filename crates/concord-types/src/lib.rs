use serde::{Deserialize, Serialize};
use std::fmt;

pub mod b64;
mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

/// Agent identity: an opaque, caller-assigned identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentId({})", self.0)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// UTC wall-clock instant.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Common error types.
///
/// `Format` and `Decryption` render identically; callers that surface these
/// to users must not be able to tell a corrupted bundle from a wrong passphrase.
#[derive(Debug, thiserror::Error)]
pub enum ConcordError {
    #[error("key generation failed: {0}")]
    Generation(String),
    #[error("key bundle could not be opened")]
    Format,
    #[error("key bundle could not be opened")]
    Decryption,
    #[error("key exchange failed: {0}")]
    KeyExchange(String),
    #[error("channel not established")]
    NotEstablished,
    #[error("message authentication failed")]
    Authentication,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ConcordError>;
