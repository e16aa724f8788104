//! Brings specialists in and out of the shared room alongside the primary
//! agent.

use crate::agent::{lock, Collaborators, SessionSettings, StopReport};
use crate::catalog::SpecialistCatalog;
use crate::config::{EnsembleConfig, PrimaryConfig};
use crate::context::LongTermContext;
use crate::credentials::CredentialTable;
use crate::error::OrchestratorError;
use crate::primary::{build_primary_instructions, PrimaryAgent};
use crate::session::SpecialistAgentSession;
use crate::startup::StartupPolicy;
use ensemble_types::CredentialGroup;
use ensemble_voice::IdentityDirectory;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Tunables the orchestrator applies to every session it starts.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub primary: PrimaryConfig,
    pub specialist_temperature: f32,
    pub auxiliary_agent_identities: Vec<String>,
    pub session: SessionSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&EnsembleConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &EnsembleConfig) -> Self {
        Self {
            primary: config.primary.clone(),
            specialist_temperature: config.specialists.temperature,
            auxiliary_agent_identities: config.specialists.auxiliary_agent_identities.clone(),
            session: SessionSettings {
                retry: config.avatar.retry_policy(),
                avatar_failure: config.avatar.on_failure,
                cleanup_timeout: config.cleanup_timeout(),
            },
        }
    }
}

/// What `invoke` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeOutcome {
    Started,
    AlreadyActive,
}

/// Result of `start_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub started: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Orchestrator {
    catalog: Arc<SpecialistCatalog>,
    credentials: CredentialTable,
    collaborators: Collaborators,
    directory: Arc<IdentityDirectory>,
    context: Arc<dyn LongTermContext>,
    settings: OrchestratorSettings,
    primary: tokio::sync::Mutex<Option<Arc<PrimaryAgent>>>,
    active: Mutex<HashMap<String, Arc<SpecialistAgentSession>>>,
    /// Serializes invoke and dismiss per specialist.
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    closed: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        catalog: SpecialistCatalog,
        credentials: CredentialTable,
        collaborators: Collaborators,
        context: Arc<dyn LongTermContext>,
        settings: OrchestratorSettings,
    ) -> Self {
        let directory = catalog.identity_directory(
            &settings.primary.identity,
            &settings.auxiliary_agent_identities,
        );
        Self {
            catalog: Arc::new(catalog),
            credentials,
            collaborators,
            directory: Arc::new(directory),
            context,
            settings,
            primary: tokio::sync::Mutex::new(None),
            active: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn catalog(&self) -> &SpecialistCatalog {
        &self.catalog
    }

    pub fn directory(&self) -> &IdentityDirectory {
        &self.directory
    }

    /// Builds the primary agent's instructions and brings it into the room.
    ///
    /// # Errors
    ///
    /// `PrimaryAlreadyStarted` if it already runs, `ShutDown` after
    /// [`Orchestrator::shutdown`]; otherwise the session's start error.
    pub async fn start_primary(&self) -> Result<(), OrchestratorError> {
        let mut slot = self.primary.lock().await;
        if self.is_shut_down() {
            return Err(OrchestratorError::ShutDown);
        }
        if slot.is_some() {
            return Err(OrchestratorError::PrimaryAlreadyStarted);
        }

        let instructions = build_primary_instructions(
            &self.settings.primary.instructions,
            &self.catalog.roster_prompt(),
            &self.context.context_prompt(),
        );
        let api_key = self.api_key(&self.settings.primary.identity, CredentialGroup::Primary)?;
        let agent = PrimaryAgent::start(
            &self.settings.primary,
            instructions,
            &api_key,
            self.collaborators.clone(),
            Arc::clone(&self.directory),
            self.settings.session.clone(),
        )
        .await?;
        *slot = Some(Arc::new(agent));
        Ok(())
    }

    pub async fn primary(&self) -> Option<Arc<PrimaryAgent>> {
        self.primary.lock().await.clone()
    }

    /// Brings a specialist into the room. Returns `true` on success,
    /// including when it was already active.
    ///
    /// Failures are logged; use [`Orchestrator::try_invoke`] to see them.
    pub async fn invoke(&self, specialist_id: &str, intro_context: &str, introduce: bool) -> bool {
        match self.try_invoke(specialist_id, intro_context, introduce).await {
            Ok(_) => true,
            Err(e) => {
                error!(specialist_id, error = %e, "failed to invoke specialist");
                false
            }
        }
    }

    /// Like [`Orchestrator::invoke`], reporting what went wrong.
    ///
    /// Specialists only join while the primary agent runs, so this fails
    /// with `PrimaryNotStarted` before `start_primary` and with `ShutDown`
    /// once shutdown has begun.
    pub async fn try_invoke(
        &self,
        specialist_id: &str,
        intro_context: &str,
        introduce: bool,
    ) -> Result<InvokeOutcome, OrchestratorError> {
        let profile = self
            .catalog
            .get(specialist_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownSpecialist(specialist_id.to_string()))?;

        let key_lock = self.key_lock(specialist_id);
        let _guard = key_lock.lock().await;

        if self.is_shut_down() {
            return Err(OrchestratorError::ShutDown);
        }
        if self.primary.lock().await.is_none() {
            return Err(OrchestratorError::PrimaryNotStarted);
        }
        if lock(&self.active).contains_key(specialist_id) {
            info!(specialist_id, "specialist already active");
            return Ok(InvokeOutcome::AlreadyActive);
        }

        let api_key = self.api_key(specialist_id, profile.credential_group)?;
        let session = Arc::new(SpecialistAgentSession::new(
            Arc::clone(&profile),
            self.collaborators.clone(),
            Arc::clone(&self.directory),
            self.settings.session.clone(),
        ));
        session
            .start(&api_key, self.settings.specialist_temperature)
            .await?;
        lock(&self.active).insert(specialist_id.to_string(), Arc::clone(&session));
        info!(specialist_id, "specialist joined");

        if introduce {
            if let Err(e) = session.speak(&profile.introduction(intro_context)).await {
                warn!(specialist_id, error = %e, "introduction failed");
            }
        }
        Ok(InvokeOutcome::Started)
    }

    /// Removes a specialist from the room. Returns `false` if it was not
    /// active.
    pub async fn dismiss(&self, specialist_id: &str) -> bool {
        if !self.catalog.contains(specialist_id) {
            return false;
        }
        let key_lock = self.key_lock(specialist_id);
        let _guard = key_lock.lock().await;

        let session = lock(&self.active).remove(specialist_id);
        match session {
            Some(session) => {
                session.stop().await;
                info!(specialist_id, "specialist dismissed");
                true
            }
            None => false,
        }
    }

    /// Brings up every cataloged specialist, without introductions.
    pub async fn start_all(&self, policy: StartupPolicy) -> StartupReport {
        let ids = self.catalog.ids();
        info!(count = ids.len(), ?policy, "starting all specialists");

        let results = policy
            .run(ids, move |id| async move {
                let ok = self.invoke(&id, "", false).await;
                (id, ok)
            })
            .await;

        let mut report = StartupReport::default();
        for (id, ok) in results {
            if ok {
                report.started.push(id);
            } else {
                report.failed.push(id);
            }
        }
        info!(started = ?report.started, failed = ?report.failed, "specialist startup finished");
        report
    }

    /// The specialist whose keywords occur in `text`, if any.
    pub fn route_topic(&self, text: &str) -> Option<String> {
        self.catalog.route_topic(text).map(|p| p.id.clone())
    }

    pub fn list_active(&self) -> BTreeSet<String> {
        lock(&self.active).keys().cloned().collect()
    }

    pub fn session(&self, specialist_id: &str) -> Option<Arc<SpecialistAgentSession>> {
        lock(&self.active).get(specialist_id).cloned()
    }

    /// Makes an active specialist say `text`.
    pub async fn speak(&self, specialist_id: &str, text: &str) -> Result<(), OrchestratorError> {
        if !self.catalog.contains(specialist_id) {
            return Err(OrchestratorError::UnknownSpecialist(specialist_id.to_string()));
        }
        let session = self
            .session(specialist_id)
            .ok_or_else(|| OrchestratorError::NotActive(specialist_id.to_string()))?;
        session.speak(text).await
    }

    /// Dismisses every specialist, then stops the primary agent. Later
    /// invokes are refused.
    pub async fn shutdown(&self) -> StopReport {
        self.closed.store(true, Ordering::SeqCst);
        let mut report = StopReport::default();
        // Every cataloged id, not just the active ones: dismiss waits on the
        // per-key lock, so an invoke already past its checks lands first.
        for id in self.catalog.ids() {
            self.dismiss(&id).await;
        }
        let primary = self.primary.lock().await.take();
        if let Some(primary) = primary {
            report = primary.stop().await;
        }
        info!("orchestrator shut down");
        report
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn key_lock(&self, specialist_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            lock(&self.key_locks)
                .entry(specialist_id.to_string())
                .or_default(),
        )
    }

    fn api_key(&self, identity: &str, group: CredentialGroup) -> Result<String, OrchestratorError> {
        let key = self.credentials.resolve(group);
        if key.is_empty() {
            return Err(OrchestratorError::SessionStartFailure {
                identity: identity.to_string(),
                reason: format!("no credential configured for group '{}'", group.as_str()),
            });
        }
        Ok(key.to_string())
    }
}
