//! Speech-provider credentials per credential group.

use ensemble_types::CredentialGroup;
use serde::Deserialize;
use std::fmt;

/// Provider keys for the two credential groups.
///
/// Specialists are spread across groups so their sessions draw on
/// separate quotas. The secondary group falls back to the primary key
/// when it is not configured.
#[derive(Clone, Default, Deserialize)]
pub struct CredentialTable {
    #[serde(default)]
    pub primary: String,
    #[serde(default)]
    pub secondary: Option<String>,
}

impl fmt::Debug for CredentialTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialTable")
            .field("primary", &redact(&self.primary))
            .field(
                "secondary",
                &self.secondary.as_deref().map(redact),
            )
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "[REDACTED]"
    }
}

impl CredentialTable {
    pub fn new(primary: impl Into<String>, secondary: Option<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary,
        }
    }

    /// The key used for sessions in `group`. Empty when nothing usable is
    /// configured.
    pub fn resolve(&self, group: CredentialGroup) -> &str {
        match group {
            CredentialGroup::Primary => &self.primary,
            CredentialGroup::Secondary => self
                .secondary
                .as_deref()
                .filter(|key| !key.is_empty())
                .unwrap_or(&self.primary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secondary_falls_back_to_primary() {
        let table = CredentialTable::new("k1", None);
        assert_eq!(table.resolve(CredentialGroup::Secondary), "k1");

        let table = CredentialTable::new("k1", Some(String::new()));
        assert_eq!(table.resolve(CredentialGroup::Secondary), "k1");
    }

    #[test]
    fn groups_resolve_independently() {
        let table = CredentialTable::new("k1", Some("k2".to_string()));
        assert_eq!(table.resolve(CredentialGroup::Primary), "k1");
        assert_eq!(table.resolve(CredentialGroup::Secondary), "k2");
    }

    #[test]
    fn debug_hides_keys() {
        let table = CredentialTable::new("super-secret", Some("also-secret".to_string()));
        let rendered = format!("{table:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
