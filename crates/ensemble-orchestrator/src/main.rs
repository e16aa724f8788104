//! Ensemble rehearsal binary.
//!
//! Loads configuration, brings the primary agent and every specialist up
//! against in-process loopback collaborators, and waits for Ctrl-C before
//! shutting down. Useful to check a configuration and a catalog without a
//! room server or a speech provider.

use ensemble_orchestrator::{
    config, logging, Collaborators, ContextSnapshot, LongTermContext, NoContext, Orchestrator,
    OrchestratorSettings, SpecialistCatalog,
};
use ensemble_voice::loopback::{LoopbackAvatarService, LoopbackRoom, LoopbackSpeechModel};
use ensemble_voice::RoomTokenIssuer;
use std::sync::Arc;

const DEFAULT_CONFIG_FILE: &str = "ensemble.toml";

/// Picks the configuration file and says why: the first argument wins over
/// `ENSEMBLE_CONFIG_PATH`, which wins over `ensemble.toml`. Blank values are
/// ignored.
fn config_file(
    arg: Option<String>,
    env: impl FnOnce() -> Option<String>,
) -> (String, &'static str) {
    let given = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
    if let Some(path) = given(arg) {
        return (path, "argument");
    }
    if let Some(path) = given(env()) {
        return (path, "ENSEMBLE_CONFIG_PATH");
    }
    (DEFAULT_CONFIG_FILE.to_string(), "default")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, chosen_by) = config_file(std::env::args().nth(1), || {
        std::env::var("ENSEMBLE_CONFIG_PATH").ok()
    });
    let config = config::load_config(Some(&config_path))?;
    logging::init(&config.logging)?;
    tracing::info!(path = %config_path, chosen_by, "configuration loaded");

    let catalog = match &config.specialists.catalog_path {
        Some(path) => SpecialistCatalog::load(path)?,
        None => SpecialistCatalog::builtin(),
    };
    let context: Arc<dyn LongTermContext> = match &config.context_path {
        Some(path) => Arc::new(ContextSnapshot::load(path)?),
        None => Arc::new(NoContext),
    };

    let room = LoopbackRoom::new("ensemble-rehearsal");
    let mut collaborators = Collaborators::new(room, LoopbackSpeechModel::new())
        .with_avatars(LoopbackAvatarService::new());
    if let Some(issuer) = RoomTokenIssuer::for_room(&config.livekit) {
        collaborators = collaborators.with_tokens(issuer);
    }

    // Loopback speech sessions accept any key.
    let mut credentials = config.credentials.clone();
    if credentials.primary.is_empty() {
        credentials.primary = "rehearsal".to_string();
    }

    let orchestrator = Orchestrator::new(
        catalog,
        credentials,
        collaborators,
        context,
        OrchestratorSettings::from_config(&config),
    );

    orchestrator.start_primary().await?;
    let report = orchestrator.start_all(config.startup).await;
    tracing::info!(
        active = ?orchestrator.list_active(),
        failed = ?report.failed,
        "rehearsal running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    orchestrator.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_beats_environment() {
        let (path, chosen_by) = config_file(Some("cli.toml".to_string()), || {
            Some("env.toml".to_string())
        });
        assert_eq!((path.as_str(), chosen_by), ("cli.toml", "argument"));
    }

    #[test]
    fn blank_values_fall_through_to_the_default() {
        let (path, chosen_by) = config_file(Some("  ".to_string()), || Some(String::new()));
        assert_eq!((path.as_str(), chosen_by), (DEFAULT_CONFIG_FILE, "default"));

        let (path, chosen_by) = config_file(None, || Some("env.toml".to_string()));
        assert_eq!((path.as_str(), chosen_by), ("env.toml", "ENSEMBLE_CONFIG_PATH"));
    }
}
