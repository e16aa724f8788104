//! Orchestrator configuration loading from file and environment variables.

use crate::credentials::CredentialTable;
use crate::retry::{AvatarFailurePolicy, RetryPolicy};
use crate::startup::StartupPolicy;
use ensemble_voice::RoomAccess;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Room server settings, used to mint avatar join tokens.
    #[serde(default)]
    pub livekit: RoomAccess,

    /// Speech-provider keys per credential group.
    #[serde(default)]
    pub credentials: CredentialTable,

    #[serde(default)]
    pub primary: PrimaryConfig,

    #[serde(default)]
    pub specialists: SpecialistsConfig,

    /// How `start_all` brings specialists up.
    #[serde(default)]
    pub startup: StartupPolicy,

    #[serde(default)]
    pub avatar: AvatarConfig,

    /// Upper bound on each individual cleanup step.
    #[serde(default = "default_cleanup_timeout_secs")]
    pub cleanup_timeout_secs: u64,

    /// Optional JSON document with the long-term context.
    #[serde(default)]
    pub context_path: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "ensemble_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// The always-present primary agent.
#[derive(Debug, Clone, Deserialize)]
pub struct PrimaryConfig {
    #[serde(default = "default_primary_identity")]
    pub identity: String,

    #[serde(default = "default_primary_name")]
    pub display_name: String,

    #[serde(default = "default_primary_voice")]
    pub voice: String,

    #[serde(default = "default_primary_temperature")]
    pub temperature: f32,

    /// Avatar rendered for the primary agent, if any.
    #[serde(default)]
    pub avatar_id: Option<String>,

    /// Base prompt. `{specialists}` and `{context}` are substituted with
    /// the roster and the long-term context; either is appended when its
    /// placeholder is missing.
    #[serde(default = "default_primary_instructions")]
    pub instructions: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpecialistsConfig {
    #[serde(default = "default_specialist_temperature")]
    pub temperature: f32,

    /// TOML catalog replacing the built-in specialists.
    #[serde(default)]
    pub catalog_path: Option<String>,

    /// Extra room identities that belong to agents (for example an avatar
    /// provider's worker) and must never be treated as human participants.
    #[serde(default = "default_auxiliary_identities")]
    pub auxiliary_agent_identities: Vec<String>,
}

/// Avatar attachment behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct AvatarConfig {
    #[serde(default = "default_avatar_attempts")]
    pub attempts: u32,

    #[serde(default = "default_avatar_delay_ms")]
    pub delay_ms: u64,

    #[serde(default)]
    pub on_failure: AvatarFailurePolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cleanup_timeout_secs() -> u64 {
    10
}

fn default_primary_identity() -> String {
    "cosmo".to_string()
}

fn default_primary_name() -> String {
    "Cosmo".to_string()
}

fn default_primary_voice() -> String {
    "Puck".to_string()
}

fn default_primary_temperature() -> f32 {
    0.8
}

fn default_primary_instructions() -> String {
    crate::primary::DEFAULT_PRIMARY_INSTRUCTIONS.to_string()
}

fn default_specialist_temperature() -> f32 {
    0.7
}

fn default_auxiliary_identities() -> Vec<String> {
    vec!["bey-avatar-agent".to_string()]
}

fn default_avatar_attempts() -> u32 {
    3
}

fn default_avatar_delay_ms() -> u64 {
    3000
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            livekit: RoomAccess::default(),
            credentials: CredentialTable::default(),
            primary: PrimaryConfig::default(),
            specialists: SpecialistsConfig::default(),
            startup: StartupPolicy::default(),
            avatar: AvatarConfig::default(),
            cleanup_timeout_secs: default_cleanup_timeout_secs(),
            context_path: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            identity: default_primary_identity(),
            display_name: default_primary_name(),
            voice: default_primary_voice(),
            temperature: default_primary_temperature(),
            avatar_id: None,
            instructions: default_primary_instructions(),
        }
    }
}

impl Default for SpecialistsConfig {
    fn default() -> Self {
        Self {
            temperature: default_specialist_temperature(),
            catalog_path: None,
            auxiliary_agent_identities: default_auxiliary_identities(),
        }
    }
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            attempts: default_avatar_attempts(),
            delay_ms: default_avatar_delay_ms(),
            on_failure: AvatarFailurePolicy::default(),
        }
    }
}

impl AvatarConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.delay_ms))
    }
}

impl EnsembleConfig {
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }

    /// Rejects values no session could run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary.identity.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "primary.identity must not be empty".to_string(),
            ));
        }
        if self.avatar.attempts == 0 {
            return Err(ConfigError::Invalid(
                "avatar.attempts must be at least 1".to_string(),
            ));
        }
        for (field, value) in [
            ("primary.temperature", self.primary.temperature),
            ("specialists.temperature", self.specialists.temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be within 0.0..=2.0, got {value}"
                )));
            }
        }
        if self.cleanup_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "cleanup_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse a TOML file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to parse a JSON document.
    #[error("failed to parse json document: {0}")]
    Json(#[from] serde_json::Error),

    /// The file parsed but holds unusable values.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `ENSEMBLE_LOG_LEVEL` overrides `logging.level`
/// - `ENSEMBLE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `ENSEMBLE_LIVEKIT_URL`, `ENSEMBLE_LIVEKIT_API_KEY`,
///   `ENSEMBLE_LIVEKIT_API_SECRET` override `livekit.*`
/// - `ENSEMBLE_PRIMARY_API_KEY` overrides `credentials.primary`
/// - `ENSEMBLE_SECONDARY_API_KEY` overrides `credentials.secondary`
/// - `ENSEMBLE_PRIMARY_AVATAR_ID` overrides `primary.avatar_id`
/// - `ENSEMBLE_CATALOG_PATH` overrides `specialists.catalog_path`
/// - `ENSEMBLE_CONTEXT_PATH` overrides `context_path`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the result fails validation.
pub fn load_config(path: Option<&str>) -> Result<EnsembleConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with_env(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<EnsembleConfig, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                EnsembleConfig::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => EnsembleConfig::default(),
    };

    if let Some(level) = env("ENSEMBLE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("ENSEMBLE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = env("ENSEMBLE_LIVEKIT_URL") {
        config.livekit.url = url;
    }
    if let Some(key) = env("ENSEMBLE_LIVEKIT_API_KEY") {
        config.livekit.api_key = key;
    }
    if let Some(secret) = env("ENSEMBLE_LIVEKIT_API_SECRET") {
        config.livekit.api_secret = secret;
    }
    if let Some(key) = env("ENSEMBLE_PRIMARY_API_KEY") {
        config.credentials.primary = key;
    }
    if let Some(key) = env("ENSEMBLE_SECONDARY_API_KEY") {
        config.credentials.secondary = Some(key);
    }
    if let Some(avatar_id) = env("ENSEMBLE_PRIMARY_AVATAR_ID") {
        config.primary.avatar_id = Some(avatar_id);
    }
    if let Some(path) = env("ENSEMBLE_CATALOG_PATH") {
        config.specialists.catalog_path = Some(path);
    }
    if let Some(path) = env("ENSEMBLE_CONTEXT_PATH") {
        config.context_path = Some(path);
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_file() {
        let config = load_config_with_env(None, no_env).expect("defaults load");
        assert_eq!(config.primary.identity, "cosmo");
        assert_eq!(config.primary.voice, "Puck");
        assert!((config.primary.temperature - 0.8).abs() < f32::EPSILON);
        assert!((config.specialists.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.avatar.attempts, 3);
        assert_eq!(config.avatar.delay_ms, 3000);
        assert_eq!(config.avatar.on_failure, AvatarFailurePolicy::Degrade);
        assert_eq!(config.cleanup_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.specialists.auxiliary_agent_identities,
            vec!["bey-avatar-agent".to_string()]
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");
        let config =
            load_config_with_env(path.to_str(), no_env).expect("missing file is not an error");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn file_values_and_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
cleanup_timeout_secs = 4

[logging]
level = "debug"

[credentials]
primary = "from-file"

[startup]
mode = "sequential"
delay_ms = 2000

[avatar]
attempts = 5
on_failure = "fail"
"#
        )
        .expect("write");

        let env: HashMap<&str, &str> = HashMap::from([
            ("ENSEMBLE_SECONDARY_API_KEY", "second"),
            ("ENSEMBLE_LOG_JSON", "1"),
        ]);
        let config = load_config_with_env(file.path().to_str(), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .expect("config loads");

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.credentials.primary, "from-file");
        assert_eq!(config.credentials.secondary.as_deref(), Some("second"));
        assert_eq!(
            config.startup,
            StartupPolicy::Sequential { delay_ms: 2000 }
        );
        assert_eq!(config.avatar.attempts, 5);
        assert_eq!(config.avatar.delay_ms, 3000);
        assert_eq!(config.avatar.on_failure, AvatarFailurePolicy::Fail);
        assert_eq!(config.cleanup_timeout(), Duration::from_secs(4));
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[avatar]\nattempts = 0").expect("write");
        let err = load_config_with_env(file.path().to_str(), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("avatar.attempts")));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[primary\nidentity = ").expect("write");
        let err = load_config_with_env(file.path().to_str(), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
