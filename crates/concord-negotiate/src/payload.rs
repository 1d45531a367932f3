use concord_types::{AgentId, ConcordError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a negotiation is about. Selects how its payload is interpreted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationType {
    Schedule,
    Task,
    Custom(String),
}

impl fmt::Display for NegotiationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationType::Schedule => f.write_str("schedule"),
            NegotiationType::Task => f.write_str("task"),
            NegotiationType::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// A proposed calendar event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleProposal {
    pub event_type: String,
    pub title: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub participants: Vec<AgentId>,
    /// Whether the proposer accepts a different time of the same length.
    #[serde(default)]
    pub flexible: bool,
}

impl ScheduleProposal {
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    fn validate(&self) -> Result<()> {
        if self.end_time <= self.start_time {
            return Err(ConcordError::InvalidPayload(
                "schedule proposal ends before it starts".into(),
            ));
        }
        Ok(())
    }
}

/// Payload carried by a negotiation, tagged by kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NegotiationPayload {
    Schedule(ScheduleProposal),
    /// Domain payload this crate does not interpret.
    Opaque { data: serde_json::Value },
}

impl NegotiationPayload {
    pub fn opaque(data: serde_json::Value) -> Self {
        NegotiationPayload::Opaque { data }
    }

    pub fn as_schedule(&self) -> Option<&ScheduleProposal> {
        match self {
            NegotiationPayload::Schedule(p) => Some(p),
            NegotiationPayload::Opaque { .. } => None,
        }
    }

    /// Schedule negotiations carry schedule proposals, and only they do.
    pub fn check_type(&self, negotiation_type: &NegotiationType) -> Result<()> {
        match (negotiation_type, self) {
            (NegotiationType::Schedule, NegotiationPayload::Schedule(p)) => p.validate(),
            (NegotiationType::Schedule, NegotiationPayload::Opaque { .. }) => Err(
                ConcordError::InvalidPayload("schedule negotiation needs a schedule proposal".into()),
            ),
            (other, NegotiationPayload::Schedule(_)) => Err(ConcordError::InvalidPayload(
                format!("schedule proposal sent as {other} negotiation"),
            )),
            (_, NegotiationPayload::Opaque { .. }) => Ok(()),
        }
    }
}
