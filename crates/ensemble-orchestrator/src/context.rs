//! Long-term context about the person being mentored.
//!
//! The context is read once, rendered into prompt text and injected into
//! the primary agent's instructions. This crate never writes it back.

use crate::config::ConfigError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::path::Path;

const CONTEXT_HEADER: &str = "\n\n---\n## CONTEXTO DO EMPRESÁRIO (Lembre-se destas informações):\n";

/// Source of the context block appended to the primary agent's prompt.
pub trait LongTermContext: Send + Sync {
    /// Rendered context, or an empty string when nothing is known.
    fn context_prompt(&self) -> String;
}

/// A context source that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl LongTermContext for NoContext {
    fn context_prompt(&self) -> String {
        String::new()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub business_type: Option<String>,
    /// Free-form; documents hold either a number or a range such as "5-10".
    #[serde(default)]
    pub team_size: Option<serde_json::Value>,
    #[serde(default)]
    pub main_challenges: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSummary {
    /// Stored as written; see [`calendar_day`].
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Goal {
    pub goal: String,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Insight {
    pub insight: String,
    #[serde(default)]
    pub date: Option<String>,
}

/// A read-only snapshot of everything remembered about the user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextSnapshot {
    #[serde(default)]
    pub user_profile: UserProfile,
    #[serde(default)]
    pub sessions: Vec<SessionSummary>,
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub key_insights: Vec<Insight>,
}

impl ContextSnapshot {
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Loads a snapshot; a missing file is an empty snapshot.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "context file not found, starting fresh");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::FileRead(e)),
        }
    }

    fn profile_section(&self) -> Option<String> {
        let profile = &self.user_profile;
        if profile.name.is_none() && profile.business_name.is_none() {
            return None;
        }
        let mut section = String::from("## Sobre o Empresário:\n");
        if let Some(name) = &profile.name {
            section.push_str(&format!("- Nome: {name}\n"));
        }
        if let Some(business) = &profile.business_name {
            section.push_str(&format!("- Empresa: {business}\n"));
        }
        if let Some(kind) = &profile.business_type {
            section.push_str(&format!("- Tipo de negócio: {kind}\n"));
        }
        match &profile.team_size {
            Some(serde_json::Value::String(size)) => {
                section.push_str(&format!("- Tamanho da equipe: {size}\n"));
            }
            Some(serde_json::Value::Null) | None => {}
            Some(size) => section.push_str(&format!("- Tamanho da equipe: {size}\n")),
        }
        if !profile.main_challenges.is_empty() {
            section.push_str(&format!(
                "- Desafios principais: {}\n",
                profile.main_challenges.join(", ")
            ));
        }
        Some(section)
    }

    fn sessions_section(&self) -> Option<String> {
        if self.sessions.is_empty() {
            return None;
        }
        let mut section = String::from("## Sessões Anteriores:\n");
        for session in last(&self.sessions, 3) {
            let date = session
                .date
                .as_deref()
                .map(calendar_day)
                .unwrap_or_default();
            let summary = session.summary.as_deref().unwrap_or("No summary");
            section.push_str(&format!("- ({date}): {summary}\n"));
        }
        Some(section)
    }

    fn goals_section(&self) -> Option<String> {
        let open: Vec<&Goal> = self.goals.iter().filter(|g| !g.completed).collect();
        if open.is_empty() {
            return None;
        }
        let mut section = String::from("## Metas em Andamento:\n");
        for goal in last(&open, 5) {
            match goal.deadline.as_deref().filter(|d| !d.is_empty()) {
                Some(deadline) => {
                    section.push_str(&format!("- {} (prazo: {deadline})\n", goal.goal))
                }
                None => section.push_str(&format!("- {}\n", goal.goal)),
            }
        }
        Some(section)
    }

    fn insights_section(&self) -> Option<String> {
        if self.key_insights.is_empty() {
            return None;
        }
        let mut section = String::from("## Insights Importantes sobre o Negócio:\n");
        for insight in last(&self.key_insights, 5) {
            section.push_str(&format!("- {}\n", insight.insight));
        }
        Some(section)
    }
}

/// The `YYYY-MM-DD` day of a stored timestamp.
///
/// Naive and offset timestamps and bare dates are parsed; anything else
/// shows its first ten characters.
fn calendar_day(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return at.date_naive().to_string();
    }
    if let Ok(at) = raw.parse::<NaiveDateTime>() {
        return at.date().to_string();
    }
    if let Ok(day) = raw.parse::<NaiveDate>() {
        return day.to_string();
    }
    raw.chars().take(10).collect()
}

fn last<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

impl LongTermContext for ContextSnapshot {
    fn context_prompt(&self) -> String {
        let parts: Vec<String> = [
            self.profile_section(),
            self.sessions_section(),
            self.goals_section(),
            self.insights_section(),
        ]
        .into_iter()
        .flatten()
        .collect();

        if parts.is_empty() {
            return String::new();
        }
        format!("{CONTEXT_HEADER}{}", parts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "user_profile": {
            "name": "Joana",
            "business_name": "Padaria Sol",
            "business_type": "Alimentação",
            "team_size": 8,
            "main_challenges": ["caixa apertado", "contratação"]
        },
        "sessions": [
            {"date": "2024-01-01T09:00:00", "summary": "primeira"},
            {"date": "2024-02-01T09:00:00.123456", "summary": "segunda"},
            {"date": "2024-03-01T09:00:00", "summary": "terceira"},
            {"date": "2024-04-01T09:00:00", "summary": "quarta"}
        ],
        "goals": [
            {"goal": "Reduzir custos", "deadline": "2024-06-30", "completed": false},
            {"goal": "Abrir filial", "completed": true},
            {"goal": "Contratar gerente"}
        ],
        "key_insights": [
            {"insight": "Margem baixa nos doces", "date": "2024-02-01T10:00:00"}
        ],
        "last_updated": "2024-04-01T09:00:00"
    }"#;

    #[test]
    fn empty_snapshot_renders_nothing() {
        assert_eq!(ContextSnapshot::default().context_prompt(), "");
        assert_eq!(NoContext.context_prompt(), "");
    }

    #[test]
    fn renders_every_section() {
        let snapshot = ContextSnapshot::from_json_str(DOCUMENT).expect("parses");
        let prompt = snapshot.context_prompt();

        assert!(prompt.starts_with(CONTEXT_HEADER));
        assert!(prompt.contains("- Nome: Joana\n"));
        assert!(prompt.contains("- Tamanho da equipe: 8\n"));
        assert!(prompt.contains("- Desafios principais: caixa apertado, contratação\n"));
        // Only the last three sessions.
        assert!(!prompt.contains("primeira"));
        assert!(prompt.contains("- (2024-02-01): segunda\n"));
        assert!(prompt.contains("- (2024-04-01): quarta\n"));
        assert!(prompt.contains("- Reduzir custos (prazo: 2024-06-30)\n"));
        assert!(prompt.contains("- Contratar gerente\n"));
        assert!(!prompt.contains("Abrir filial"));
        assert!(prompt.contains("- Margem baixa nos doces\n"));
    }

    #[test]
    fn session_dates_in_other_shapes_still_load() {
        let snapshot = ContextSnapshot::from_json_str(
            r#"{"sessions": [
                {"date": "2024-05-02", "summary": "sem hora"},
                {"date": "2024-05-03T08:30:00-03:00", "summary": "com fuso"},
                {"date": "ontem à tarde", "summary": "texto livre"}
            ]}"#,
        )
        .expect("parses");
        let prompt = snapshot.context_prompt();

        assert!(prompt.contains("- (2024-05-02): sem hora\n"));
        assert!(prompt.contains("- (2024-05-03): com fuso\n"));
        assert!(prompt.contains("- (ontem à ta): texto livre\n"));
    }

    #[test]
    fn calendar_day_handles_zulu_and_fractional_seconds() {
        assert_eq!(calendar_day("2024-02-01T09:00:00.123456"), "2024-02-01");
        assert_eq!(calendar_day("2024-02-01T23:00:00Z"), "2024-02-01");
        assert_eq!(calendar_day(""), "");
    }

    #[test]
    fn profile_needs_a_name_or_business() {
        let snapshot = ContextSnapshot::from_json_str(
            r#"{"user_profile": {"business_type": "Varejo"}}"#,
        )
        .expect("parses");
        assert_eq!(snapshot.context_prompt(), "");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshot = ContextSnapshot::load(dir.path().join("memory.json")).expect("loads");
        assert!(snapshot.sessions.is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            ContextSnapshot::load(&path),
            Err(ConfigError::Json(_))
        ));
    }
}
