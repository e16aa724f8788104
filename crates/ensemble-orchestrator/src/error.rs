//! Error types for the orchestration layer.

use crate::config::ConfigError;
use crate::session::SessionState;
use ensemble_voice::VoiceError;

/// Errors surfaced by the orchestrator and the agent sessions it runs.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The identifier is not in the specialist catalog.
    #[error("unknown specialist: {0}")]
    UnknownSpecialist(String),

    /// The speech session (or the track feeding it) could not be brought up.
    #[error("failed to start session for '{identity}': {reason}")]
    SessionStartFailure { identity: String, reason: String },

    /// Avatar attachment gave up after its retry budget.
    #[error("avatar attach failed for '{identity}' after {attempts} attempt(s): {reason}")]
    AvatarAttachFailure {
        identity: String,
        attempts: u32,
        reason: String,
    },

    /// A running speech session rejected a request.
    #[error("speech stream error for '{identity}': {cause}")]
    StreamError { identity: String, cause: String },

    /// `start_primary` was called on an orchestrator whose primary agent runs.
    #[error("primary agent already started")]
    PrimaryAlreadyStarted,

    #[error("primary agent not started")]
    PrimaryNotStarted,

    /// The orchestrator has been shut down.
    #[error("orchestrator is shut down")]
    ShutDown,

    /// The specialist is known but not currently in the room.
    #[error("specialist '{0}' is not active")]
    NotActive(String),

    /// A lifecycle operation was attempted from the wrong state.
    #[error("session '{identity}' cannot do this while {state:?}")]
    InvalidState { identity: String, state: SessionState },

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
