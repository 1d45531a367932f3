use concord_types::{AgentId, Clock, ConcordError, Result, SystemClock, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::config::NegotiationConfig;
use crate::payload::{NegotiationPayload, NegotiationType, Priority};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl NegotiationStatus {
    pub fn is_terminal(self) -> bool {
        self != NegotiationStatus::Pending
    }
}

impl fmt::Display for NegotiationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationStatus::Pending => "pending",
            NegotiationStatus::Accepted => "accepted",
            NegotiationStatus::Rejected => "rejected",
            NegotiationStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A proposal between two agents and where it stands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Negotiation {
    pub id: String,
    pub negotiation_type: NegotiationType,
    pub initiator: AgentId,
    pub counterparty: AgentId,
    pub payload: NegotiationPayload,
    pub priority: Priority,
    pub status: NegotiationStatus,
    /// The negotiation this one counters, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

impl Negotiation {
    /// Pending but past its deadline.
    pub fn is_overdue(&self, now: Timestamp) -> bool {
        self.status == NegotiationStatus::Pending && self.expires_at.is_some_and(|t| now >= t)
    }

    /// The agent on the other side from `me`.
    pub fn peer_of(&self, me: &AgentId) -> &AgentId {
        if &self.initiator == me {
            &self.counterparty
        } else {
            &self.initiator
        }
    }

    fn observed_at(mut self, now: Timestamp) -> Self {
        if self.is_overdue(now) {
            self.status = NegotiationStatus::Expired;
        }
        self
    }
}

/// Result of [`NegotiationEngine::respond`].
#[derive(Clone, Debug, PartialEq)]
pub struct RespondOutcome {
    /// The negotiation after the transition.
    pub negotiation: Negotiation,
    /// A new pending negotiation linked to the rejected one, when a counter-offer was made.
    pub counter: Option<Negotiation>,
}

/// Proposal/response state machine for one local agent.
///
/// `Pending -> Accepted | Rejected | Expired`; every non-pending state is final.
/// Expiry is evaluated lazily against the clock whenever a negotiation is
/// read or responded to, or in bulk via [`NegotiationEngine::expire_due`].
pub struct NegotiationEngine {
    local: AgentId,
    config: NegotiationConfig,
    clock: Arc<dyn Clock>,
    negotiations: RwLock<HashMap<String, Negotiation>>,
}

impl NegotiationEngine {
    pub fn new(local: AgentId, config: NegotiationConfig) -> Self {
        Self::with_clock(local, config, Arc::new(SystemClock))
    }

    pub fn with_clock(local: AgentId, config: NegotiationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            local,
            config,
            clock,
            negotiations: RwLock::new(HashMap::new()),
        }
    }

    pub fn local(&self) -> &AgentId {
        &self.local
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    fn lock_read(&self) -> RwLockReadGuard<'_, HashMap<String, Negotiation>> {
        self.negotiations.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Negotiation>> {
        self.negotiations.write().unwrap_or_else(|e| e.into_inner())
    }

    fn build(
        &self,
        negotiation_type: NegotiationType,
        counterparty: AgentId,
        payload: NegotiationPayload,
        priority: Priority,
        parent_id: Option<String>,
        now: Timestamp,
    ) -> Negotiation {
        Negotiation {
            id: uuid::Uuid::new_v4().to_string(),
            negotiation_type,
            initiator: self.local.clone(),
            counterparty,
            payload,
            priority,
            status: NegotiationStatus::Pending,
            parent_id,
            created_at: now,
            updated_at: now,
            expires_at: self.config.ttl().and_then(|ttl| now.checked_add_signed(ttl)),
        }
    }

    /// Open a new negotiation from the local agent to `counterparty`.
    pub async fn propose(
        &self,
        negotiation_type: NegotiationType,
        counterparty: AgentId,
        payload: NegotiationPayload,
        priority: Priority,
    ) -> Result<Negotiation> {
        payload.check_type(&negotiation_type)?;
        if counterparty == self.local {
            return Err(ConcordError::InvalidState(
                "cannot negotiate with the local agent".into(),
            ));
        }

        let now = self.clock.now();
        let negotiation = self.build(negotiation_type, counterparty, payload, priority, None, now);
        self.lock_write()
            .insert(negotiation.id.clone(), negotiation.clone());

        debug!(
            negotiation = %negotiation.id,
            kind = %negotiation.negotiation_type,
            counterparty = %negotiation.counterparty,
            "proposed"
        );
        Ok(negotiation)
    }

    /// Register a pending proposal that a peer sent to the local agent.
    pub fn receive(&self, negotiation: Negotiation) -> Result<()> {
        if negotiation.counterparty != self.local {
            return Err(ConcordError::InvalidState(format!(
                "negotiation {} is addressed to {}",
                negotiation.id, negotiation.counterparty
            )));
        }
        if negotiation.initiator == self.local {
            return Err(ConcordError::InvalidState(
                "cannot negotiate with the local agent".into(),
            ));
        }
        if negotiation.status != NegotiationStatus::Pending {
            return Err(ConcordError::InvalidState(format!(
                "negotiation {} is already {}",
                negotiation.id, negotiation.status
            )));
        }
        negotiation.payload.check_type(&negotiation.negotiation_type)?;

        let mut negotiations = self.lock_write();
        if negotiations.contains_key(&negotiation.id) {
            return Err(ConcordError::InvalidState(format!(
                "negotiation {} already known",
                negotiation.id
            )));
        }
        debug!(negotiation = %negotiation.id, from = %negotiation.initiator, "received");
        negotiations.insert(negotiation.id.clone(), negotiation);
        Ok(())
    }

    /// Accept or reject a pending negotiation.
    ///
    /// A `counter_offer` accompanying a rejection opens a new pending
    /// negotiation from the local agent, linked through `parent_id`.
    /// A counter-offer accompanying an acceptance is ignored.
    pub async fn respond(
        &self,
        id: &str,
        accept: bool,
        counter_offer: Option<NegotiationPayload>,
    ) -> Result<RespondOutcome> {
        let now = self.clock.now();
        let mut negotiations = self.lock_write();
        let negotiation = negotiations
            .get_mut(id)
            .ok_or_else(|| ConcordError::NotFound(format!("negotiation {id}")))?;

        if negotiation.is_overdue(now) {
            negotiation.status = NegotiationStatus::Expired;
            negotiation.updated_at = now;
            debug!(negotiation = %id, "expired");
        }
        if negotiation.status.is_terminal() {
            return Err(ConcordError::InvalidState(format!(
                "negotiation {id} is already {}",
                negotiation.status
            )));
        }

        let counter_payload = match counter_offer {
            Some(payload) if !accept => {
                payload.check_type(&negotiation.negotiation_type)?;
                Some(payload)
            }
            Some(_) => {
                debug!(negotiation = %id, "counter-offer ignored on acceptance");
                None
            }
            None => None,
        };

        negotiation.status = if accept {
            NegotiationStatus::Accepted
        } else {
            NegotiationStatus::Rejected
        };
        negotiation.updated_at = now;
        let updated = negotiation.clone();

        let counter = counter_payload.map(|payload| {
            self.build(
                updated.negotiation_type.clone(),
                updated.peer_of(&self.local).clone(),
                payload,
                updated.priority,
                Some(updated.id.clone()),
                now,
            )
        });
        if let Some(counter) = &counter {
            negotiations.insert(counter.id.clone(), counter.clone());
        }

        info!(
            negotiation = %id,
            status = %updated.status,
            counter = counter.as_ref().map(|c| c.id.as_str()),
            "responded"
        );
        Ok(RespondOutcome {
            negotiation: updated,
            counter,
        })
    }

    /// Look up a negotiation. Overdue pending entries are reported as expired.
    pub fn get_negotiation(&self, id: &str) -> Option<Negotiation> {
        let now = self.clock.now();
        self.lock_read().get(id).cloned().map(|n| n.observed_at(now))
    }

    /// All negotiations, oldest first.
    pub fn list_negotiations(&self) -> Vec<Negotiation> {
        let now = self.clock.now();
        let mut all: Vec<Negotiation> = self
            .lock_read()
            .values()
            .cloned()
            .map(|n| n.observed_at(now))
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Still-pending negotiations involving `peer`, oldest first.
    pub fn pending_with(&self, peer: &AgentId) -> Vec<Negotiation> {
        self.list_negotiations()
            .into_iter()
            .filter(|n| n.status == NegotiationStatus::Pending)
            .filter(|n| &n.initiator == peer || &n.counterparty == peer)
            .collect()
    }

    /// Persist expiry for every overdue negotiation. Returns how many expired.
    ///
    /// Intended for an external scheduler tick; reads already see expiry lazily.
    pub fn expire_due(&self) -> usize {
        let now = self.clock.now();
        let mut expired = 0;
        for negotiation in self.lock_write().values_mut() {
            if negotiation.is_overdue(now) {
                negotiation.status = NegotiationStatus::Expired;
                negotiation.updated_at = now;
                expired += 1;
            }
        }
        if expired > 0 {
            debug!(expired, "expired overdue negotiations");
        }
        expired
    }
}
