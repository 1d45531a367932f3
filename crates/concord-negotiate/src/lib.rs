mod config;
mod engine;
mod payload;
mod schedule;

pub use config::NegotiationConfig;
pub use engine::{Negotiation, NegotiationEngine, NegotiationStatus, RespondOutcome};
pub use payload::{NegotiationPayload, NegotiationType, Priority, ScheduleProposal};
pub use schedule::{ScheduleNegotiator, TimeSlot};
