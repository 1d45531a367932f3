use concord_types::{AgentId, ConcordError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::engine::{Negotiation, NegotiationEngine, RespondOutcome};
use crate::payload::{NegotiationPayload, NegotiationType, Priority, ScheduleProposal};

/// A window of availability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: Timestamp,
    pub end: Timestamp,
    #[serde(default)]
    pub priority: Priority,
}

impl TimeSlot {
    pub fn new(start: Timestamp, end: Timestamp, priority: Priority) -> Self {
        Self {
            start,
            end,
            priority,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// Whether `[start, end]` lies entirely within this slot.
    pub fn contains(&self, start: Timestamp, end: Timestamp) -> bool {
        self.start <= start && end <= self.end
    }

    /// The shared part of two slots, if they meet at all. Touching slots
    /// share a zero-length interval. Takes the higher of the two priorities.
    pub fn overlap(&self, other: &TimeSlot) -> Option<TimeSlot> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (end >= start).then(|| TimeSlot::new(start, end, self.priority.max(other.priority)))
    }
}

/// Scheduling on top of a [`NegotiationEngine`].
pub struct ScheduleNegotiator {
    engine: Arc<NegotiationEngine>,
    availability: RwLock<Vec<TimeSlot>>,
}

impl ScheduleNegotiator {
    pub fn new(engine: Arc<NegotiationEngine>) -> Self {
        Self {
            engine,
            availability: RwLock::new(Vec::new()),
        }
    }

    pub fn engine(&self) -> &Arc<NegotiationEngine> {
        &self.engine
    }

    /// Replace the local availability.
    pub fn set_availability(&self, mut slots: Vec<TimeSlot>) {
        slots.sort_by_key(|s| s.start);
        *self.availability.write().unwrap_or_else(|e| e.into_inner()) = slots;
    }

    pub fn availability(&self) -> Vec<TimeSlot> {
        self.availability
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Every overlap between a local and a remote slot that is at least
    /// `duration` long, ordered by start.
    ///
    /// Each qualifying pair is reported, so results may overlap each other.
    pub fn find_common_time(&self, remote: &[TimeSlot], duration: chrono::Duration) -> Vec<TimeSlot> {
        let local = self.availability();
        let mut common: Vec<TimeSlot> = local
            .iter()
            .flat_map(|l| remote.iter().filter_map(move |r| l.overlap(r)))
            .filter(|slot| slot.duration() >= duration)
            .collect();
        common.sort_by_key(|s| s.start);
        common
    }

    pub async fn propose_meeting(
        &self,
        counterparty: AgentId,
        proposal: ScheduleProposal,
        priority: Priority,
    ) -> Result<Negotiation> {
        self.engine
            .propose(
                NegotiationType::Schedule,
                counterparty,
                NegotiationPayload::Schedule(proposal),
                priority,
            )
            .await
    }

    /// Answer a pending schedule proposal against local availability.
    ///
    /// Accepts when the proposed time fits in a local slot. A flexible
    /// proposal that does not fit is rejected with a counter-offer of the
    /// same length at the start of the earliest slot long enough to hold it.
    pub async fn review(&self, id: &str) -> Result<RespondOutcome> {
        let negotiation = self
            .engine
            .get_negotiation(id)
            .ok_or_else(|| ConcordError::NotFound(format!("negotiation {id}")))?;
        let proposal = negotiation.payload.as_schedule().ok_or_else(|| {
            ConcordError::InvalidPayload(format!("negotiation {id} is not a schedule proposal"))
        })?;

        let availability = self.availability();
        if availability
            .iter()
            .any(|slot| slot.contains(proposal.start_time, proposal.end_time))
        {
            debug!(negotiation = %id, "proposal fits local availability");
            return self.engine.respond(id, true, None).await;
        }

        let counter = if proposal.flexible {
            let duration = proposal.duration();
            availability
                .iter()
                .find(|slot| slot.duration() >= duration)
                .map(|slot| ScheduleProposal {
                    start_time: slot.start,
                    end_time: slot.start + duration,
                    ..proposal.clone()
                })
        } else {
            None
        };

        debug!(negotiation = %id, counter = counter.is_some(), "proposal does not fit");
        self.engine
            .respond(id, false, counter.map(NegotiationPayload::Schedule))
            .await
    }
}
