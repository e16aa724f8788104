//! Join tokens for participants the orchestrator brings into the room on
//! its own behalf (avatar workers).

use crate::error::VoiceError;
use livekit_api::access_token::{AccessToken, VideoGrants};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Avatars join once at session start, so their tokens only need to
/// outlive the join handshake.
const DEFAULT_JOIN_TOKEN_TTL_SECS: u64 = 600;

/// Where avatar workers connect and the key pair their tokens are signed
/// with. Deserialized from the `[livekit]` table.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RoomAccess {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
    pub join_token_ttl_secs: u64,
}

impl Default for RoomAccess {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            join_token_ttl_secs: DEFAULT_JOIN_TOKEN_TTL_SECS,
        }
    }
}

impl fmt::Debug for RoomAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = if self.api_secret.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("RoomAccess")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &secret)
            .field("join_token_ttl_secs", &self.join_token_ttl_secs)
            .finish()
    }
}

impl RoomAccess {
    pub fn has_key_pair(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    fn join_token_ttl(&self) -> Duration {
        Duration::from_secs(self.join_token_ttl_secs.max(1))
    }
}

/// Mints LiveKit access tokens from a [`RoomAccess`] key pair.
#[derive(Debug, Clone)]
pub struct RoomTokenIssuer {
    access: RoomAccess,
}

impl RoomTokenIssuer {
    pub fn new(access: RoomAccess) -> Self {
        Self { access }
    }

    /// Builds an issuer only when there is somewhere to connect to.
    pub fn for_room(access: &RoomAccess) -> Option<Self> {
        (!access.url.is_empty()).then(|| Self::new(access.clone()))
    }

    /// A token can only be minted when both halves of the key pair are set.
    pub fn is_enabled(&self) -> bool {
        self.access.has_key_pair()
    }

    pub fn url(&self) -> &str {
        &self.access.url
    }

    /// Issues a join token for `participant_identity` in `room_name`.
    ///
    /// The grant lets the participant publish media on behalf of the agent it
    /// renders; it never needs to subscribe to anyone else.
    pub fn issue_join_token(
        &self,
        room_name: &str,
        participant_identity: &str,
        participant_name: &str,
    ) -> Result<String, VoiceError> {
        if !self.is_enabled() {
            return Err(VoiceError::Config(
                "livekit api_key and api_secret are required to issue join tokens".to_string(),
            ));
        }

        AccessToken::with_api_key(&self.access.api_key, &self.access.api_secret)
            .with_identity(participant_identity)
            .with_name(participant_name)
            .with_grants(VideoGrants {
                room_join: true,
                room: room_name.to_string(),
                can_publish: true,
                can_subscribe: false,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(self.access.join_token_ttl())
            .to_jwt()
            .map_err(VoiceError::LiveKit)
    }
}
