//! One specialist's presence in the room.

use crate::agent::{lock, AgentLaunch, AgentSlots, AvatarOutcome, Collaborators, SessionSettings, StopReport};
use crate::error::OrchestratorError;
use crate::retry::AvatarFailurePolicy;
use ensemble_types::{AudioFrame, ParticipantRole, SpecialistProfile};
use ensemble_voice::{IdentityDirectory, PipelineCounters, SpeechSessionParams};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Lifecycle of a specialist session.
///
/// `Uninitialized -> Starting -> {Active, Failed}` and
/// `Active -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Starting,
    Active,
    Failed,
    Stopping,
    Stopped,
}

/// A running (or starting, or stopped) specialist.
///
/// Owns the specialist's output track, its speech session and its avatar.
/// Inbound audio reaches it through the room listener started on
/// activation.
pub struct SpecialistAgentSession {
    profile: Arc<SpecialistProfile>,
    collaborators: Collaborators,
    directory: Arc<IdentityDirectory>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    failures: AtomicU64,
    degraded: AtomicBool,
    slots: AgentSlots,
}

impl SpecialistAgentSession {
    pub fn new(
        profile: Arc<SpecialistProfile>,
        collaborators: Collaborators,
        directory: Arc<IdentityDirectory>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            profile,
            collaborators,
            directory,
            settings,
            state: Mutex::new(SessionState::Uninitialized),
            failures: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            slots: AgentSlots::default(),
        }
    }

    pub fn profile(&self) -> &Arc<SpecialistProfile> {
        &self.profile
    }

    /// Room identity, the lower-cased specialist id.
    pub fn identity(&self) -> String {
        self.profile.id.to_lowercase()
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Failed avatar attempts, failed cleanup steps and speech error events.
    pub fn failure_count(&self) -> u64 {
        let stream_errors = self.counters().map_or(0, |c| c.stream_errors);
        self.failures.load(Ordering::Relaxed) + stream_errors
    }

    /// Running audio-only because the avatar could not be attached.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn has_avatar(&self) -> bool {
        self.slots.has_avatar()
    }

    pub fn counters(&self) -> Option<PipelineCounters> {
        self.slots.binding().map(|b| b.counters())
    }

    /// Brings the specialist into the room.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the session is `Uninitialized`.
    /// - `SessionStartFailure` if the track or the speech session cannot
    ///   be brought up.
    /// - `AvatarAttachFailure` if the avatar cannot be attached and the
    ///   failure policy is `fail`.
    ///
    /// On error the session is `Failed` and holds no resources.
    pub async fn start(&self, api_key: &str, temperature: f32) -> Result<(), OrchestratorError> {
        self.transition(SessionState::Uninitialized, SessionState::Starting)?;
        let identity = self.identity();
        info!(
            specialist_id = %identity,
            name = %self.profile.name,
            role = %self.profile.role,
            "starting specialist"
        );

        let launch = AgentLaunch {
            identity: identity.clone(),
            role: ParticipantRole::SpecialistAgent,
            track_name: format!("specialist-{identity}-voice"),
            params: SpeechSessionParams {
                instructions: self.profile.instructions.clone(),
                voice: self.profile.voice.clone(),
                temperature,
                api_key: api_key.to_string(),
                input_transcription: true,
            },
        };
        let binding = match self.slots.open(launch, &self.collaborators).await {
            Ok(binding) => binding,
            Err(e) => {
                error!(specialist_id = %identity, error = %e, "failed to start speech session");
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.teardown(&identity).await;
                self.set_state(SessionState::Failed);
                return Err(OrchestratorError::SessionStartFailure {
                    identity,
                    reason: e.to_string(),
                });
            }
        };

        let outcome = self
            .slots
            .attach_avatar(
                &identity,
                &self.profile.name,
                Some(&self.profile.avatar_id),
                &self.collaborators,
                self.settings.retry,
            )
            .await;
        match outcome {
            AvatarOutcome::Attached { failed_attempts } => {
                self.failures
                    .fetch_add(u64::from(failed_attempts), Ordering::Relaxed);
            }
            AvatarOutcome::NotConfigured => {
                info!(specialist_id = %identity, "no avatar configured, running audio-only");
            }
            AvatarOutcome::Failed(e) => {
                self.failures
                    .fetch_add(u64::from(e.attempts.max(1)), Ordering::Relaxed);
                match self.settings.avatar_failure {
                    AvatarFailurePolicy::Degrade => {
                        warn!(
                            specialist_id = %identity,
                            attempts = e.attempts,
                            error = %e.last_error,
                            "avatar unavailable, continuing audio-only"
                        );
                        self.degraded.store(true, Ordering::Relaxed);
                    }
                    AvatarFailurePolicy::Fail => {
                        error!(
                            specialist_id = %identity,
                            attempts = e.attempts,
                            error = %e.last_error,
                            "avatar unavailable, stopping specialist"
                        );
                        self.teardown(&identity).await;
                        self.set_state(SessionState::Failed);
                        return Err(OrchestratorError::AvatarAttachFailure {
                            identity,
                            attempts: e.attempts,
                            reason: e.last_error.to_string(),
                        });
                    }
                }
            }
        }

        binding.listen(
            Arc::clone(&self.collaborators.room),
            Arc::clone(&self.directory),
        );
        self.set_state(SessionState::Active);
        info!(specialist_id = %identity, avatar = self.has_avatar(), "specialist active");
        Ok(())
    }

    /// Speaks `text` through the specialist's speech session.
    pub async fn speak(&self, text: &str) -> Result<(), OrchestratorError> {
        let binding = self.active_binding()?;
        binding
            .speak(text)
            .await
            .map_err(|e| OrchestratorError::StreamError {
                identity: self.identity(),
                cause: e.to_string(),
            })
    }

    /// Pushes one inbound frame into the speech session.
    pub async fn push_inbound(&self, frame: AudioFrame) -> Result<(), OrchestratorError> {
        let binding = self.active_binding()?;
        binding
            .push_inbound(frame)
            .await
            .map_err(|e| OrchestratorError::StreamError {
                identity: self.identity(),
                cause: e.to_string(),
            })
    }

    /// Stops the avatar, closes the speech session and unpublishes the
    /// track. A no-op once stopping has begun.
    pub async fn stop(&self) -> StopReport {
        {
            let mut state = lock(&self.state);
            match *state {
                SessionState::Stopping | SessionState::Stopped => return StopReport::default(),
                SessionState::Uninitialized => {
                    *state = SessionState::Stopped;
                    return StopReport::default();
                }
                _ => *state = SessionState::Stopping,
            }
        }
        let identity = self.identity();
        info!(specialist_id = %identity, "stopping specialist");
        let report = self.teardown(&identity).await;
        self.set_state(SessionState::Stopped);
        if report.is_clean() {
            info!(specialist_id = %identity, "specialist stopped");
        } else {
            warn!(specialist_id = %identity, failed_steps = ?report.failed_steps, "specialist stopped with errors");
        }
        report
    }

    async fn teardown(&self, identity: &str) -> StopReport {
        let report = self
            .slots
            .teardown(
                identity,
                self.collaborators.room.as_ref(),
                self.settings.cleanup_timeout,
            )
            .await;
        self.failures
            .fetch_add(report.failed_steps.len() as u64, Ordering::Relaxed);
        report
    }

    fn active_binding(&self) -> Result<Arc<ensemble_voice::AgentSessionBinding>, OrchestratorError> {
        match (self.state(), self.slots.binding()) {
            (SessionState::Active, Some(binding)) => Ok(binding),
            _ => Err(OrchestratorError::NotActive(self.identity())),
        }
    }

    fn transition(&self, from: SessionState, to: SessionState) -> Result<(), OrchestratorError> {
        let mut state = lock(&self.state);
        if *state != from {
            return Err(OrchestratorError::InvalidState {
                identity: self.identity(),
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn set_state(&self, next: SessionState) {
        *lock(&self.state) = next;
    }
}
