//! Who hears whom.
//!
//! Every agent runs its own speech session and must only be fed the audio
//! it is meant to hear. [`should_subscribe`] is the policy; the
//! [`IdentityDirectory`] classifies raw room identities into roles so the
//! policy can be applied to each track as it shows up.

use ensemble_types::{ParticipantKind, ParticipantRole};
use std::collections::HashMap;

/// Decides whether `listener` should hear `source`.
///
/// Rules, in order:
/// 1. Never hear yourself.
/// 2. Everyone hears human participants.
/// 3. The primary agent hears every agent.
/// 4. Every specialist hears the primary agent.
/// 5. Specialists never hear each other.
pub fn should_subscribe(
    listener_identity: &str,
    listener_role: ParticipantRole,
    source_identity: &str,
    source_role: ParticipantRole,
) -> bool {
    if source_identity == listener_identity {
        return false;
    }
    if source_role == ParticipantRole::StandardParticipant {
        return true;
    }
    if listener_role == ParticipantRole::PrimaryAgent {
        return true;
    }
    if source_role == ParticipantRole::PrimaryAgent {
        return true;
    }
    false
}

/// A room identity resolved to the agent it speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// The canonical identity (an alias such as an avatar worker resolves
    /// to the agent it renders).
    pub identity: String,
    pub role: ParticipantRole,
}

/// Known agent identities, used to classify room participants.
///
/// Built once from the catalog. Classification itself is recomputed for
/// every event and never cached, since participants come and go.
#[derive(Debug, Clone)]
pub struct IdentityDirectory {
    primary: String,
    /// Lower-cased alias -> canonical agent identity.
    aliases: HashMap<String, String>,
}

impl IdentityDirectory {
    pub fn new(primary_identity: impl Into<String>) -> Self {
        let primary = primary_identity.into().to_lowercase();
        let mut aliases = HashMap::new();
        aliases.insert(primary.clone(), primary.clone());
        Self { primary, aliases }
    }

    pub fn primary_identity(&self) -> &str {
        &self.primary
    }

    /// Registers an agent under its canonical identity.
    pub fn register_agent(&mut self, identity: &str) {
        let identity = identity.to_lowercase();
        self.aliases.insert(identity.clone(), identity);
    }

    /// Registers another room identity speaking for `canonical`.
    pub fn register_alias(&mut self, alias: &str, canonical: &str) {
        self.aliases
            .insert(alias.to_lowercase(), canonical.to_lowercase());
    }

    pub fn is_known_agent(&self, identity: &str) -> bool {
        self.aliases.contains_key(&identity.to_lowercase())
    }

    /// Classifies a room participant.
    ///
    /// The primary identity (or one of its aliases) is the primary agent.
    /// Any other known agent identity, or any participant the room reports
    /// as non-standard, is a specialist. Everyone else is a standard
    /// participant.
    pub fn classify(&self, identity: &str, kind: ParticipantKind) -> Classified {
        let lowered = identity.to_lowercase();
        match self.aliases.get(&lowered) {
            Some(canonical) if *canonical == self.primary => Classified {
                identity: canonical.clone(),
                role: ParticipantRole::PrimaryAgent,
            },
            Some(canonical) => Classified {
                identity: canonical.clone(),
                role: ParticipantRole::SpecialistAgent,
            },
            None if !kind.is_standard() => Classified {
                identity: lowered,
                role: ParticipantRole::SpecialistAgent,
            },
            None => Classified {
                identity: lowered,
                role: ParticipantRole::StandardParticipant,
            },
        }
    }

    /// Classifies `source` and applies [`should_subscribe`] for `listener`.
    pub fn should_listen(
        &self,
        listener_identity: &str,
        listener_role: ParticipantRole,
        source_identity: &str,
        source_kind: ParticipantKind,
    ) -> bool {
        let source = self.classify(source_identity, source_kind);
        should_subscribe(
            &listener_identity.to_lowercase(),
            listener_role,
            &source.identity,
            source.role,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_types::ParticipantRole::{PrimaryAgent, SpecialistAgent, StandardParticipant};

    const ROLES: [ParticipantRole; 3] = [PrimaryAgent, SpecialistAgent, StandardParticipant];

    fn directory() -> IdentityDirectory {
        let mut dir = IdentityDirectory::new("cosmo");
        dir.register_alias("cosmo-avatar", "cosmo");
        for id in ["marketing", "finance"] {
            dir.register_agent(id);
            dir.register_alias(&format!("{id}-avatar"), id);
        }
        dir.register_alias("maya", "marketing");
        dir
    }

    #[test]
    fn never_self_subscribe() {
        for listener in ROLES {
            for source in ROLES {
                assert!(!should_subscribe("x", listener, "x", source));
            }
        }
    }

    #[test]
    fn everyone_hears_humans() {
        for listener in ROLES {
            assert!(should_subscribe("a", listener, "human", StandardParticipant));
        }
    }

    #[test]
    fn specialists_do_not_hear_each_other() {
        assert!(!should_subscribe("a", SpecialistAgent, "b", SpecialistAgent));
        assert!(!should_subscribe("b", SpecialistAgent, "a", SpecialistAgent));
    }

    #[test]
    fn primary_and_specialists_hear_each_other() {
        assert!(should_subscribe("cosmo", PrimaryAgent, "a", SpecialistAgent));
        assert!(should_subscribe("a", SpecialistAgent, "cosmo", PrimaryAgent));
    }

    #[test]
    fn classify_known_identities() {
        let dir = directory();
        assert_eq!(
            dir.classify("Cosmo", ParticipantKind::Agent),
            Classified {
                identity: "cosmo".to_string(),
                role: PrimaryAgent
            }
        );
        assert_eq!(
            dir.classify("maya", ParticipantKind::Standard).role,
            SpecialistAgent
        );
        assert_eq!(
            dir.classify("maya", ParticipantKind::Standard).identity,
            "marketing"
        );
    }

    #[test]
    fn classify_unknown_by_reported_kind() {
        let dir = directory();
        assert_eq!(
            dir.classify("alice", ParticipantKind::Standard).role,
            StandardParticipant
        );
        assert_eq!(
            dir.classify("recorder", ParticipantKind::Egress).role,
            SpecialistAgent
        );
    }

    #[test]
    fn avatars_resolve_to_their_agent() {
        let dir = directory();
        // The primary must not hear its own avatar republishing its voice.
        assert!(!dir.should_listen("cosmo", PrimaryAgent, "cosmo-avatar", ParticipantKind::Agent));
        // The primary does hear a specialist's avatar.
        assert!(dir.should_listen("cosmo", PrimaryAgent, "finance-avatar", ParticipantKind::Agent));
        // Specialists hear the primary's avatar.
        assert!(dir.should_listen("finance", SpecialistAgent, "cosmo-avatar", ParticipantKind::Agent));
        // Specialists ignore other specialists' avatars.
        assert!(!dir.should_listen("finance", SpecialistAgent, "marketing-avatar", ParticipantKind::Agent));
    }
}
