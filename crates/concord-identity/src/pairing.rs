use concord_types::{b64, ConcordError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::canonical::canonicalize;
use crate::card::AgentCard;
use crate::keybundle::{HybridSignature, KeyBundle};
use crate::relationship::{Permission, Relationship, RelationshipType};

/// Version tag mixed into every pairing request signing payload.
pub const PAIRING_PAYLOAD_VERSION: &str = "concord-pairing-v1";

/// A signed offer to enter a relationship, wrapping the requester's signed card.
///
/// Carries two independent signatures: the card's own and one over the
/// whole request, including the card's relationships. Both must verify.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRequest {
    pub card: AgentCard,
    pub relationship_type: RelationshipType,
    pub message: String,
    pub created_at: Timestamp,
    pub signature: HybridSignature,
}

impl PairingRequest {
    /// Create and sign a pairing request. `card` must already be signed by `bundle`.
    pub fn new(
        card: AgentCard,
        relationship_type: RelationshipType,
        message: impl Into<String>,
        bundle: &KeyBundle,
    ) -> Result<Self> {
        card.verify()?;
        if card.public_keys != bundle.public_keys() {
            return Err(ConcordError::InvalidSignature);
        }

        let message = message.into();
        let created_at = chrono::Utc::now();
        let signable = Self::signable_content(&card, relationship_type, &message, &created_at)?;
        let signature = bundle.sign_hybrid(signable.as_bytes());

        Ok(Self {
            card,
            relationship_type,
            message,
            created_at,
            signature,
        })
    }

    /// Verify the embedded card and the request-level signature.
    pub fn verify(&self) -> Result<()> {
        self.card.verify()?;
        let signable = Self::signable_content(
            &self.card,
            self.relationship_type,
            &self.message,
            &self.created_at,
        )?;
        if self
            .card
            .public_keys
            .verify_hybrid(signable.as_bytes(), &self.signature)
        {
            Ok(())
        } else {
            warn!(agent = %self.card.id, "pairing request signature rejected");
            Err(ConcordError::InvalidSignature)
        }
    }

    /// Verify, then describe the requester as a verified relationship.
    ///
    /// Storing it (and on which side) is up to the caller.
    pub fn to_relationship(&self, permissions: Vec<Permission>) -> Result<Relationship> {
        self.verify()?;
        Ok(Relationship {
            agent_id: self.card.id.clone(),
            name: self.card.name.clone(),
            relationship_type: self.relationship_type,
            permissions,
            verified: true,
            since: chrono::Utc::now(),
        })
    }

    fn signable_content(
        card: &AgentCard,
        relationship_type: RelationshipType,
        message: &str,
        created_at: &Timestamp,
    ) -> Result<String> {
        let card_signature = card.signature.as_ref().ok_or(ConcordError::InvalidSignature)?;
        let relationships = serde_json::to_value(&card.relationships)
            .map_err(|e| ConcordError::Serialization(e.to_string()))?;
        canonicalize(&json!({
            "v": PAIRING_PAYLOAD_VERSION,
            "card": card.signing_payload()?,
            "card_signature": {
                "ed25519": b64::encode(&card_signature.ed25519),
                "mldsa": b64::encode(&card_signature.mldsa),
            },
            "relationships": relationships,
            "relationship_type": relationship_type.to_string(),
            "message": message,
            "created_at": created_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        }))
    }
}
