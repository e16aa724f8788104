//! Plumbing shared by the primary agent and the specialists: publishing an
//! output track, opening the speech session behind it, attaching an avatar
//! and tearing all of it down again.

use crate::retry::{attach_with_retry, AttachError, AvatarFailurePolicy, RetryPolicy};
use ensemble_types::{ParticipantRole, AGENT_OUTPUT_CHANNELS, AGENT_OUTPUT_SAMPLE_RATE};
use ensemble_voice::{
    avatar_identity_for, AgentSessionBinding, AvatarRenderingService, AvatarSession,
    AvatarStartRequest, LocalAudioSource, OutputRoute, Room, RoomTokenIssuer, SpeechModel,
    SpeechSessionParams, TrackHandle, VoiceError, DEFAULT_SOURCE_QUEUE_FRAMES,
};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The external services every agent talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub room: Arc<dyn Room>,
    pub speech: Arc<dyn SpeechModel>,
    /// Without an avatar service every agent runs audio-only.
    pub avatars: Option<Arc<dyn AvatarRenderingService>>,
    /// Mints join tokens for avatar workers.
    pub tokens: Option<Arc<RoomTokenIssuer>>,
}

impl Collaborators {
    pub fn new(room: Arc<dyn Room>, speech: Arc<dyn SpeechModel>) -> Self {
        Self {
            room,
            speech,
            avatars: None,
            tokens: None,
        }
    }

    pub fn with_avatars(mut self, avatars: Arc<dyn AvatarRenderingService>) -> Self {
        self.avatars = Some(avatars);
        self
    }

    pub fn with_tokens(mut self, tokens: RoomTokenIssuer) -> Self {
        self.tokens = Some(Arc::new(tokens));
        self
    }
}

/// Lifecycle settings shared by every agent session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub retry: RetryPolicy,
    pub avatar_failure: AvatarFailurePolicy,
    /// Upper bound on each individual cleanup step.
    pub cleanup_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            avatar_failure: AvatarFailurePolicy::default(),
            cleanup_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a stop sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Cleanup steps that failed or timed out.
    pub failed_steps: Vec<&'static str>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failed_steps.is_empty()
    }
}

pub(crate) struct AgentLaunch {
    pub identity: String,
    pub role: ParticipantRole,
    pub track_name: String,
    pub params: SpeechSessionParams,
}

pub(crate) enum AvatarOutcome {
    /// No avatar service or no avatar reference.
    NotConfigured,
    Attached { failed_attempts: u32 },
    Failed(AttachError),
}

/// The resources one agent owns while it runs.
///
/// Each slot is filled as its resource comes up, so a teardown after a
/// partial start releases exactly what was acquired.
#[derive(Default)]
pub(crate) struct AgentSlots {
    binding: Mutex<Option<Arc<AgentSessionBinding>>>,
    track: Mutex<Option<TrackHandle>>,
    avatar: Mutex<Option<Box<dyn AvatarSession>>>,
}

impl AgentSlots {
    pub fn binding(&self) -> Option<Arc<AgentSessionBinding>> {
        lock(&self.binding).clone()
    }

    pub fn has_avatar(&self) -> bool {
        lock(&self.avatar).is_some()
    }

    /// Publishes the output track, opens the speech session and starts the
    /// output pipeline.
    pub async fn open(
        &self,
        launch: AgentLaunch,
        collaborators: &Collaborators,
    ) -> Result<Arc<AgentSessionBinding>, VoiceError> {
        let (source, stream) = LocalAudioSource::new(
            launch.track_name.clone(),
            AGENT_OUTPUT_SAMPLE_RATE,
            AGENT_OUTPUT_CHANNELS,
            DEFAULT_SOURCE_QUEUE_FRAMES,
        );
        let track = collaborators
            .room
            .publish_audio_track(&launch.track_name, stream)
            .await?;
        debug!(identity = %launch.identity, track_sid = %track.sid, "output track published");
        *lock(&self.track) = Some(track);

        let speech = collaborators.speech.open(launch.params).await?;
        let binding = Arc::new(AgentSessionBinding::new(
            launch.identity,
            launch.role,
            speech,
            Arc::new(OutputRoute::new(source)),
        ));
        *lock(&self.binding) = Some(Arc::clone(&binding));

        binding.start_pipeline()?;
        Ok(binding)
    }

    /// Starts an avatar for `identity` and routes the agent's output to it.
    pub async fn attach_avatar(
        &self,
        identity: &str,
        display_name: &str,
        avatar_id: Option<&str>,
        collaborators: &Collaborators,
        retry: RetryPolicy,
    ) -> AvatarOutcome {
        let (Some(service), Some(avatar_id)) = (
            collaborators.avatars.as_ref(),
            avatar_id.filter(|id| !id.is_empty()),
        ) else {
            return AvatarOutcome::NotConfigured;
        };

        let request = match avatar_request(identity, display_name, avatar_id, collaborators) {
            Ok(request) => request,
            Err(e) => {
                return AvatarOutcome::Failed(AttachError {
                    attempts: 0,
                    last_error: e,
                })
            }
        };

        match attach_with_retry(service.as_ref(), &request, retry).await {
            Ok(attached) => {
                if let Some(binding) = self.binding() {
                    binding.output().bind_avatar(attached.session.audio_sink());
                }
                *lock(&self.avatar) = Some(attached.session);
                AvatarOutcome::Attached {
                    failed_attempts: attached.failed_attempts,
                }
            }
            Err(e) => AvatarOutcome::Failed(e),
        }
    }

    /// Stops the avatar, closes the speech session and unpublishes the
    /// track. Every step runs even when an earlier one fails.
    pub async fn teardown(&self, identity: &str, room: &dyn Room, limit: Duration) -> StopReport {
        let mut report = StopReport::default();
        let avatar = lock(&self.avatar).take();
        let binding = lock(&self.binding).take();
        let track = lock(&self.track).take();

        if let Some(avatar) = avatar {
            if let Some(binding) = &binding {
                binding.output().unbind_avatar();
            }
            if !cleanup_step(identity, "stop avatar", limit, avatar.stop()).await {
                report.failed_steps.push("stop avatar");
            }
        }
        if let Some(binding) = binding {
            if !cleanup_step(identity, "close speech session", limit, binding.close()).await {
                report.failed_steps.push("close speech session");
            }
        }
        if let Some(track) = track {
            if !cleanup_step(identity, "unpublish track", limit, room.unpublish_track(&track)).await
            {
                report.failed_steps.push("unpublish track");
            }
        }
        report
    }
}

fn avatar_request(
    identity: &str,
    display_name: &str,
    avatar_id: &str,
    collaborators: &Collaborators,
) -> Result<AvatarStartRequest, VoiceError> {
    let avatar_identity = avatar_identity_for(identity);
    let room_name = collaborators.room.name().to_string();
    let (livekit_url, join_token) = match &collaborators.tokens {
        Some(issuer) if issuer.is_enabled() => {
            let token = issuer.issue_join_token(
                &room_name,
                &avatar_identity,
                &format!("{display_name} (avatar)"),
            )?;
            (issuer.url().to_string(), Some(token))
        }
        Some(issuer) => (issuer.url().to_string(), None),
        None => (String::new(), None),
    };
    Ok(AvatarStartRequest {
        avatar_id: avatar_id.to_string(),
        agent_identity: identity.to_string(),
        avatar_identity,
        room_name,
        livekit_url,
        join_token,
    })
}

/// Runs one cleanup step under `limit`. Returns `false` when it failed.
async fn cleanup_step<F>(identity: &str, step: &'static str, limit: Duration, fut: F) -> bool
where
    F: Future<Output = Result<(), VoiceError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(())) => {
            debug!(identity, step, "cleanup step done");
            true
        }
        Ok(Err(e)) => {
            warn!(identity, step, error = %e, "cleanup step failed");
            false
        }
        Err(_) => {
            warn!(identity, step, timeout_ms = limit.as_millis() as u64, "cleanup step timed out");
            false
        }
    }
}
