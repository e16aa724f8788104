//! Multi-agent voice orchestration.
//!
//! One primary agent leads a conversation in a shared room and brings
//! specialist agents in and out on demand. Each agent runs its own speech
//! session, publishes its own audio track and optionally drives an avatar.
//! The [`Orchestrator`] owns the specialist lifecycle: invocation,
//! dismissal, bulk startup under a [`StartupPolicy`] and topic routing.

pub mod agent;
pub mod catalog;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod primary;
pub mod retry;
pub mod session;
pub mod startup;

pub use agent::{Collaborators, SessionSettings, StopReport};
pub use catalog::SpecialistCatalog;
pub use config::{load_config, ConfigError, EnsembleConfig};
pub use context::{ContextSnapshot, LongTermContext, NoContext};
pub use credentials::CredentialTable;
pub use error::OrchestratorError;
pub use orchestrator::{InvokeOutcome, Orchestrator, OrchestratorSettings, StartupReport};
pub use primary::PrimaryAgent;
pub use retry::{AvatarFailurePolicy, RetryPolicy};
pub use session::{SessionState, SpecialistAgentSession};
pub use startup::StartupPolicy;
