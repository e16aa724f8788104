//! Shared types and constants for the Ensemble workspace.
//!
//! This crate provides the foundational types used across all Ensemble
//! crates: participant kinds and routing roles, specialist catalog entries,
//! credential groups, and PCM audio frames.
//!
//! It sits at the bottom of the dependency graph: the voice and
//! orchestration crates share these definitions, and nothing here knows
//! about rooms, speech providers or avatars.

use serde::{Deserialize, Serialize};

mod audio;
mod profile;

pub use audio::{AudioFrame, AudioFrameError};
pub use profile::{CredentialGroup, SpecialistProfile};

/// Sample rate of every agent output source, in Hz.
pub const AGENT_OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Channel count of every agent output source.
pub const AGENT_OUTPUT_CHANNELS: u32 = 1;

/// Participant kind as reported by the room transport.
///
/// This is the externally reported classification of a room participant.
/// It is one of the two inputs to identity classification, the other being
/// the set of agent identities known to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    /// A regular client, usually a human.
    #[default]
    Standard,
    /// An ingress participant (RTMP/WHIP bridge).
    Ingress,
    /// An egress participant (recorder).
    Egress,
    /// A SIP telephony participant.
    Sip,
    /// An agent worker.
    Agent,
}

impl ParticipantKind {
    /// Returns `true` for the `Standard` kind.
    pub fn is_standard(self) -> bool {
        matches!(self, Self::Standard)
    }
}

/// Routing role of a participant, derived per event from its identity and
/// reported kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// The primary agent coordinating the team.
    PrimaryAgent,
    /// A catalog specialist (or any other non-primary synthetic participant).
    SpecialistAgent,
    /// A human participant.
    StandardParticipant,
}

impl ParticipantRole {
    /// Returns the string label for this role.
    pub fn label(self) -> &'static str {
        match self {
            Self::PrimaryAgent => "PRIMARY_AGENT",
            Self::SpecialistAgent => "SPECIALIST_AGENT",
            Self::StandardParticipant => "STANDARD_PARTICIPANT",
        }
    }

    /// Returns `true` for either agent role.
    pub fn is_agent(self) -> bool {
        !matches!(self, Self::StandardParticipant)
    }
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Media kind of a published track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_labels() {
        assert_eq!(ParticipantRole::PrimaryAgent.label(), "PRIMARY_AGENT");
        assert_eq!(ParticipantRole::SpecialistAgent.label(), "SPECIALIST_AGENT");
        assert_eq!(
            ParticipantRole::StandardParticipant.label(),
            "STANDARD_PARTICIPANT"
        );
    }

    #[test]
    fn only_agent_roles_are_agents() {
        assert!(ParticipantRole::PrimaryAgent.is_agent());
        assert!(ParticipantRole::SpecialistAgent.is_agent());
        assert!(!ParticipantRole::StandardParticipant.is_agent());
    }

    #[test]
    fn participant_kind_defaults_to_standard() {
        assert_eq!(ParticipantKind::default(), ParticipantKind::Standard);
        assert!(ParticipantKind::Standard.is_standard());
        assert!(!ParticipantKind::Agent.is_standard());
    }

    #[test]
    fn participant_kind_uses_snake_case() {
        let json = serde_json::to_string(&ParticipantKind::Agent).unwrap();
        assert_eq!(json, "\"agent\"");
    }
}
