//! Specialist catalog entries.
//!
//! A `SpecialistProfile` describes one persona the orchestrator can bring
//! into the room: who it is, how it sounds, what it looks like and which
//! topics it owns. Profiles are loaded once at startup and never mutated.

use serde::{Deserialize, Serialize};

/// Which provider credential a specialist's sessions use.
///
/// Exactly two groups exist so that concurrent specialists can spread
/// their load across two provider accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialGroup {
    #[default]
    Primary,
    Secondary,
}

impl CredentialGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

/// An immutable catalog entry for one specialist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistProfile {
    /// Stable identifier, also used as the specialist's room identity.
    pub id: String,
    /// Display name the specialist introduces itself with.
    pub name: String,
    /// Human-readable role label.
    pub role: String,
    /// Avatar reference passed to the avatar-rendering service.
    pub avatar_id: String,
    /// Voice reference passed to the speech model.
    pub voice: String,
    /// System instructions for the specialist's speech session.
    pub instructions: String,
    /// Lower-case keywords that route a topic to this specialist.
    #[serde(default)]
    pub expertise_keywords: Vec<String>,
    /// Provider credential group.
    #[serde(default)]
    pub credential_group: CredentialGroup,
}

impl SpecialistProfile {
    /// Returns `true` if any expertise keyword occurs in `topic_lower`.
    ///
    /// The caller lower-cases the topic once; keywords are compared
    /// lower-cased as well.
    pub fn matches_topic(&self, topic_lower: &str) -> bool {
        self.expertise_keywords
            .iter()
            .any(|keyword| !keyword.is_empty() && topic_lower.contains(&keyword.to_lowercase()))
    }

    /// `"Name - Role"`, as listed in the primary agent's roster.
    pub fn summary(&self) -> String {
        format!("{} - {}", self.name, self.role)
    }

    /// The scripted self-introduction spoken when a specialist is invoked.
    pub fn introduction(&self, context: &str) -> String {
        format!("Olá! Sou {}, {}. {}", self.name, self.role, context)
            .trim_end()
            .to_string()
    }

    /// Identities under which this specialist may appear in the room.
    ///
    /// Includes the identifier itself and the lower-cased display name.
    pub fn identities(&self) -> Vec<String> {
        let mut identities = vec![self.id.to_lowercase()];
        let name = self.name.to_lowercase();
        if !name.is_empty() && name != identities[0] {
            identities.push(name);
        }
        identities
    }
}
