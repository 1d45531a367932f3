use serde::{Deserialize, Serialize};

/// Negotiation engine configuration.
///
/// Expiry policy belongs to the embedding hub; the default never expires.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Seconds a proposal stays pending before it expires.
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
}

impl NegotiationConfig {
    pub fn with_ttl_secs(secs: u64) -> Self {
        Self {
            default_ttl_secs: Some(secs),
        }
    }

    pub(crate) fn ttl(&self) -> Option<chrono::Duration> {
        self.default_ttl_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(chrono::Duration::try_seconds)
    }
}
