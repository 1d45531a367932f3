use concord_types::{b64, AgentId, ConcordError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::canonical::canonicalize;
use crate::keybundle::{HybridSignature, KeyBundle, PublicKeys};
use crate::relationship::{Capability, PermissionLevel, Relationship};

/// Version tag mixed into every card signing payload.
pub const CARD_PAYLOAD_VERSION: &str = "concord-card-v1";

/// A signed, self-describing agent identity document.
///
/// Untrusted until [`AgentCard::verify`] succeeds. The signature covers id,
/// name, endpoint, public keys and capabilities; relationships are local
/// bookkeeping and are not signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCard {
    pub id: AgentId,
    pub name: String,
    pub endpoint: String,
    pub public_keys: PublicKeys,
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub relationships: BTreeMap<AgentId, Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<HybridSignature>,
}

impl AgentCard {
    /// Build an unsigned card over `bundle`'s public keys.
    pub fn new(
        id: AgentId,
        name: impl Into<String>,
        endpoint: impl Into<String>,
        bundle: &KeyBundle,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self::from_public_keys(id, name, endpoint, bundle.public_keys(), capabilities)
    }

    /// Build an unsigned card for keys we only hold the public half of.
    pub fn from_public_keys(
        id: AgentId,
        name: impl Into<String>,
        endpoint: impl Into<String>,
        public_keys: PublicKeys,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            endpoint: endpoint.into(),
            public_keys,
            capabilities: capabilities.into_iter().collect(),
            relationships: BTreeMap::new(),
            signature: None,
        }
    }

    /// Canonical bytes covered by the card signature.
    pub fn signing_payload(&self) -> Result<String> {
        let mut capabilities: Vec<String> =
            self.capabilities.iter().map(|c| c.to_string()).collect();
        capabilities.sort();

        canonicalize(&json!({
            "v": CARD_PAYLOAD_VERSION,
            "id": self.id.as_str(),
            "name": self.name,
            "endpoint": self.endpoint,
            "keys": {
                "ed25519": b64::encode(self.public_keys.ed25519),
                "mldsa": b64::encode(&self.public_keys.mldsa),
                "mlkem": b64::encode(&self.public_keys.mlkem),
            },
            "capabilities": capabilities,
        }))
    }

    /// Sign the card with `bundle`, replacing any previous signature.
    ///
    /// `bundle` must hold the keys the card advertises.
    pub fn sign(&mut self, bundle: &KeyBundle) -> Result<()> {
        if bundle.public_keys() != self.public_keys {
            return Err(ConcordError::InvalidSignature);
        }
        let payload = self.signing_payload()?;
        self.signature = Some(bundle.sign_hybrid(payload.as_bytes()));
        Ok(())
    }

    /// Check the embedded signature against the embedded public keys.
    pub fn verify(&self) -> Result<()> {
        let signature = self.signature.as_ref().ok_or(ConcordError::InvalidSignature)?;
        let payload = self.signing_payload()?;
        if self.public_keys.verify_hybrid(payload.as_bytes(), signature) {
            Ok(())
        } else {
            warn!(agent = %self.id, fingerprint = %self.fingerprint(), "card signature rejected");
            Err(ConcordError::InvalidSignature)
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Display-only identifier derived from the public keys.
    pub fn fingerprint(&self) -> String {
        self.public_keys.fingerprint()
    }

    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Add a capability. Clears the signature if the set changed.
    pub fn add_capability(&mut self, capability: Capability) {
        if self.capabilities.insert(capability) {
            self.signature = None;
        }
    }

    /// Remove a capability. Clears the signature if the set changed.
    pub fn remove_capability(&mut self, capability: &Capability) {
        if self.capabilities.remove(capability) {
            self.signature = None;
        }
    }

    /// Store `relationship`, replacing and returning any previous entry for that peer.
    pub fn add_relationship(&mut self, relationship: Relationship) -> Option<Relationship> {
        self.relationships
            .insert(relationship.agent_id.clone(), relationship)
    }

    pub fn get_relationship(&self, agent_id: &AgentId) -> Option<&Relationship> {
        self.relationships.get(agent_id)
    }

    pub fn remove_relationship(&mut self, agent_id: &AgentId) -> Option<Relationship> {
        self.relationships.remove(agent_id)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    /// Level granted to `agent_id` for `capability`; `None` without a relationship.
    pub fn get_permission_level(
        &self,
        agent_id: &AgentId,
        capability: &Capability,
    ) -> PermissionLevel {
        self.relationships
            .get(agent_id)
            .map(|rel| rel.level_for(capability))
            .unwrap_or_default()
    }

    pub fn can_access(
        &self,
        agent_id: &AgentId,
        capability: &Capability,
        required: PermissionLevel,
    ) -> bool {
        self.get_permission_level(agent_id, capability) >= required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::RelationshipType;

    fn signed_card(bundle: &KeyBundle) -> AgentCard {
        let mut card = AgentCard::new(
            "agent:alice".into(),
            "Alice",
            "https://alice.example/agent",
            bundle,
            [Capability::Calendar, Capability::Email],
        );
        card.sign(bundle).unwrap();
        card
    }

    #[test]
    fn sign_and_verify() {
        let kb = KeyBundle::generate().unwrap();
        let card = signed_card(&kb);
        assert!(card.is_signed());
        assert!(card.verify().is_ok());
    }

    #[test]
    fn unsigned_card_rejected() {
        let kb = KeyBundle::generate().unwrap();
        let card = AgentCard::new("a".into(), "A", "https://a", &kb, []);
        assert!(matches!(card.verify(), Err(ConcordError::InvalidSignature)));
    }

    #[test]
    fn tampered_fields_rejected() {
        let kb = KeyBundle::generate().unwrap();
        let card = signed_card(&kb);

        let mut renamed = card.clone();
        renamed.name = "Mallory".into();
        assert!(renamed.verify().is_err());

        let mut moved = card.clone();
        moved.endpoint = "https://evil.example".into();
        assert!(moved.verify().is_err());

        let mut escalated = card.clone();
        escalated.capabilities.insert(Capability::Finance);
        assert!(escalated.verify().is_err());

        let mut rekeyed = card;
        rekeyed.public_keys = KeyBundle::generate().unwrap().public_keys();
        assert!(rekeyed.verify().is_err());
    }

    #[test]
    fn signed_by_other_bundle_rejected() {
        let kb = KeyBundle::generate().unwrap();
        let impostor = KeyBundle::generate().unwrap();
        let mut card = AgentCard::new("a".into(), "A", "https://a", &kb, []);
        assert!(matches!(
            card.sign(&impostor),
            Err(ConcordError::InvalidSignature)
        ));
        assert!(!card.is_signed());

        card.sign(&kb).unwrap();
        assert!(matches!(
            card.sign(&impostor),
            Err(ConcordError::InvalidSignature)
        ));
        assert!(card.verify().is_ok(), "failed re-sign keeps the old signature");
    }

    #[test]
    fn capability_mutators_clear_signature() {
        let kb = KeyBundle::generate().unwrap();
        let mut card = signed_card(&kb);

        card.add_capability(Capability::Calendar);
        assert!(card.is_signed(), "no-op insert keeps signature");

        card.add_capability(Capability::Tasks);
        assert!(!card.is_signed());
        assert!(card.has_capability(&Capability::Tasks));

        card.sign(&kb).unwrap();
        card.remove_capability(&Capability::Email);
        assert!(!card.is_signed());
    }

    #[test]
    fn relationships_do_not_affect_signature() {
        let kb = KeyBundle::generate().unwrap();
        let mut card = signed_card(&kb);
        card.add_relationship(Relationship::new("bob".into(), "Bob", RelationshipType::Spouse));
        assert!(card.verify().is_ok());
    }

    #[test]
    fn payload_is_order_independent() {
        let kb = KeyBundle::generate().unwrap();
        let a = AgentCard::new(
            "a".into(),
            "A",
            "https://a",
            &kb,
            [Capability::Email, Capability::Calendar],
        );
        let b = AgentCard::new(
            "a".into(),
            "A",
            "https://a",
            &kb,
            [Capability::Calendar, Capability::Email],
        );
        let payload = a.signing_payload().unwrap();
        assert_eq!(payload, b.signing_payload().unwrap());
        assert!(payload.starts_with(r#"{"capabilities":["calendar","email"],"endpoint":"https://a","id":"a","keys":{"#));
        assert!(payload.ends_with(r#""name":"A","v":"concord-card-v1"}"#));
    }

    #[test]
    fn relationship_upsert_overwrites() {
        let kb = KeyBundle::generate().unwrap();
        let mut card = signed_card(&kb);
        let bob: AgentId = "bob".into();

        let first = Relationship::new(bob.clone(), "Bob", RelationshipType::Colleague);
        assert!(card.add_relationship(first).is_none());

        let second = Relationship::new(bob.clone(), "Robert", RelationshipType::Friend);
        let replaced = card.add_relationship(second).unwrap();
        assert_eq!(replaced.name, "Bob");
        assert_eq!(card.get_relationship(&bob).unwrap().name, "Robert");
        assert_eq!(card.relationships().count(), 1);

        assert!(card.remove_relationship(&bob).is_some());
        assert!(card.get_relationship(&bob).is_none());
    }

    #[test]
    fn access_control_follows_level_order() {
        let kb = KeyBundle::generate().unwrap();
        let mut card = signed_card(&kb);
        let peer: AgentId = "bob".into();
        let stranger: AgentId = "eve".into();

        for (granted, expected) in [
            (PermissionLevel::Full, true),
            (PermissionLevel::Modify, true),
            (PermissionLevel::View, false),
        ] {
            card.add_relationship(
                Relationship::new(peer.clone(), "Bob", RelationshipType::Spouse)
                    .with_permission(Capability::Calendar, granted),
            );
            assert_eq!(
                card.can_access(&peer, &Capability::Calendar, PermissionLevel::Modify),
                expected,
                "granted {granted:?}"
            );
        }

        assert_eq!(
            card.get_permission_level(&peer, &Capability::Email),
            PermissionLevel::None
        );
        assert_eq!(
            card.get_permission_level(&stranger, &Capability::Calendar),
            PermissionLevel::None
        );
        assert!(card.can_access(&stranger, &Capability::Calendar, PermissionLevel::None));
        assert!(!card.can_access(&stranger, &Capability::Calendar, PermissionLevel::View));
    }

    #[test]
    fn card_serde_roundtrip_still_verifies() {
        let kb = KeyBundle::generate().unwrap();
        let card = signed_card(&kb);
        let json = serde_json::to_string(&card).unwrap();
        let back: AgentCard = serde_json::from_str(&json).unwrap();
        assert_eq!(back, card);
        assert!(back.verify().is_ok());
    }
}
