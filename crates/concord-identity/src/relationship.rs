use concord_types::{AgentId, ConcordError, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named permission domain an agent exposes or consumes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Capability {
    Calendar,
    Email,
    Messaging,
    Contacts,
    Tasks,
    Files,
    Finance,
    Location,
    /// Anything outside the built-in set, written as `custom:<name>`.
    Custom(String),
}

impl Capability {
    pub fn as_str(&self) -> &str {
        match self {
            Capability::Calendar => "calendar",
            Capability::Email => "email",
            Capability::Messaging => "messaging",
            Capability::Contacts => "contacts",
            Capability::Tasks => "tasks",
            Capability::Files => "files",
            Capability::Finance => "finance",
            Capability::Location => "location",
            Capability::Custom(name) => name,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Custom(name) => write!(f, "custom:{name}"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl FromStr for Capability {
    type Err = ConcordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "calendar" => Capability::Calendar,
            "email" => Capability::Email,
            "messaging" => Capability::Messaging,
            "contacts" => Capability::Contacts,
            "tasks" => Capability::Tasks,
            "files" => Capability::Files,
            "finance" => Capability::Finance,
            "location" => Capability::Location,
            other => match other.strip_prefix("custom:") {
                Some(name) if !name.is_empty() => Capability::Custom(name.to_string()),
                _ => {
                    return Err(ConcordError::Serialization(format!(
                        "unknown capability: {other}"
                    )))
                }
            },
        })
    }
}

impl From<Capability> for String {
    fn from(cap: Capability) -> Self {
        cap.to_string()
    }
}

impl TryFrom<String> for Capability {
    type Error = ConcordError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// How much a peer may do within a capability. Ordered `None < View < Modify < Full`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    #[default]
    None,
    View,
    Modify,
    Full,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub capability: Capability,
    pub level: PermissionLevel,
}

impl Permission {
    pub fn new(capability: Capability, level: PermissionLevel) -> Self {
        Self { capability, level }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Spouse,
    Partner,
    Family,
    Friend,
    Colleague,
    Manager,
    Report,
    Assistant,
    Acquaintance,
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationshipType::Spouse => "spouse",
            RelationshipType::Partner => "partner",
            RelationshipType::Family => "family",
            RelationshipType::Friend => "friend",
            RelationshipType::Colleague => "colleague",
            RelationshipType::Manager => "manager",
            RelationshipType::Report => "report",
            RelationshipType::Assistant => "assistant",
            RelationshipType::Acquaintance => "acquaintance",
        };
        f.write_str(s)
    }
}

/// What this agent knows about, and allows, a specific peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub agent_id: AgentId,
    pub name: String,
    pub relationship_type: RelationshipType,
    pub permissions: Vec<Permission>,
    pub verified: bool,
    pub since: Timestamp,
}

impl Relationship {
    pub fn new(
        agent_id: AgentId,
        name: impl Into<String>,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            agent_id,
            name: name.into(),
            relationship_type,
            permissions: Vec::new(),
            verified: false,
            since: chrono::Utc::now(),
        }
    }

    pub fn with_permission(mut self, capability: Capability, level: PermissionLevel) -> Self {
        self.grant(capability, level);
        self
    }

    /// Set the level for `capability`, replacing any existing grant for it.
    pub fn grant(&mut self, capability: Capability, level: PermissionLevel) {
        match self
            .permissions
            .iter_mut()
            .find(|p| p.capability == capability)
        {
            Some(existing) => existing.level = level,
            None => self.permissions.push(Permission::new(capability, level)),
        }
    }

    /// Highest level granted for `capability`, or `None`.
    pub fn level_for(&self, capability: &Capability) -> PermissionLevel {
        self.permissions
            .iter()
            .filter(|p| &p.capability == capability)
            .map(|p| p.level)
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_levels_are_totally_ordered() {
        use PermissionLevel::*;
        assert!(None < View && View < Modify && Modify < Full);
        assert_eq!(PermissionLevel::default(), None);
    }

    #[test]
    fn capability_string_roundtrip() {
        for cap in [
            Capability::Calendar,
            Capability::Finance,
            Capability::Custom("travel".into()),
        ] {
            let s = cap.to_string();
            assert_eq!(s.parse::<Capability>().unwrap(), cap);
        }
        assert_eq!(Capability::Custom("travel".into()).to_string(), "custom:travel");
        assert!("teleport".parse::<Capability>().is_err());
        assert!("custom:".parse::<Capability>().is_err());
    }

    #[test]
    fn capability_serializes_as_string() {
        let json = serde_json::to_string(&Capability::Calendar).unwrap();
        assert_eq!(json, r#""calendar""#);
        let back: Capability = serde_json::from_str(r#""custom:gym""#).unwrap();
        assert_eq!(back, Capability::Custom("gym".into()));
    }

    #[test]
    fn grant_replaces_existing_level() {
        let mut rel = Relationship::new("bob".into(), "Bob", RelationshipType::Friend)
            .with_permission(Capability::Calendar, PermissionLevel::View);
        rel.grant(Capability::Calendar, PermissionLevel::Full);
        assert_eq!(rel.permissions.len(), 1);
        assert_eq!(rel.level_for(&Capability::Calendar), PermissionLevel::Full);
        assert_eq!(rel.level_for(&Capability::Email), PermissionLevel::None);
    }

    #[test]
    fn level_for_takes_highest_duplicate() {
        let mut rel = Relationship::new("bob".into(), "Bob", RelationshipType::Colleague);
        rel.permissions.push(Permission::new(Capability::Tasks, PermissionLevel::View));
        rel.permissions.push(Permission::new(Capability::Tasks, PermissionLevel::Modify));
        assert_eq!(rel.level_for(&Capability::Tasks), PermissionLevel::Modify);
    }
}
