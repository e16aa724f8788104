//! Contract for the avatar-rendering service.
//!
//! An avatar joins the room as its own participant, takes the agent's audio
//! through a capture sink and publishes lip-synced audio and video.

use crate::error::VoiceError;
use crate::sink::AudioOutputSink;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Suffix appended to an agent identity to form its avatar's identity.
pub const AVATAR_IDENTITY_SUFFIX: &str = "-avatar";

/// The room identity an agent's avatar joins under.
pub fn avatar_identity_for(agent_identity: &str) -> String {
    format!("{agent_identity}{AVATAR_IDENTITY_SUFFIX}")
}

/// Everything the avatar service needs to join the room for one agent.
#[derive(Clone)]
pub struct AvatarStartRequest {
    pub avatar_id: String,
    pub agent_identity: String,
    pub avatar_identity: String,
    pub room_name: String,
    pub livekit_url: String,
    /// Join token for `avatar_identity`, when the deployment issues them.
    pub join_token: Option<String>,
}

impl fmt::Debug for AvatarStartRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarStartRequest")
            .field("avatar_id", &self.avatar_id)
            .field("agent_identity", &self.agent_identity)
            .field("avatar_identity", &self.avatar_identity)
            .field("room_name", &self.room_name)
            .field("livekit_url", &self.livekit_url)
            .field("join_token", &self.join_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A running avatar bound to one agent.
#[async_trait]
pub trait AvatarSession: Send + Sync {
    /// Sink the agent's synthesized audio should be captured into.
    fn audio_sink(&self) -> Arc<dyn AudioOutputSink>;

    async fn stop(&self) -> Result<(), VoiceError>;
}

#[async_trait]
pub trait AvatarRenderingService: Send + Sync {
    /// Starts an avatar session.
    ///
    /// # Errors
    ///
    /// Fails with [`VoiceError::AvatarConnection`] on transient provider
    /// failures; callers retry those.
    async fn start(&self, request: &AvatarStartRequest) -> Result<Box<dyn AvatarSession>, VoiceError>;
}
