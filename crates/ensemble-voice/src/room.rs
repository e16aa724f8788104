//! Contract for the shared real-time room.
//!
//! The room transport itself lives outside this workspace. Agents only need
//! to publish one audio track each, watch for newly subscribed tracks, and
//! scan the tracks that were already published when they joined.

use crate::error::VoiceError;
use async_trait::async_trait;
use ensemble_types::{AudioFrame, ParticipantKind, TrackKind};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// A lazy, finite sequence of audio frames. Ends when the producer goes away.
pub type AudioFrameStream = mpsc::Receiver<AudioFrame>;

/// Handle to a track published by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackHandle {
    pub sid: String,
    pub name: String,
}

/// Produces frame streams for one remote track.
pub trait RemoteTrackSource: Send + Sync {
    /// Opens a new frame stream. Returns `None` if the track carries no audio
    /// or has already been unpublished.
    fn audio_stream(&self) -> Option<AudioFrameStream>;
}

/// A track published by a remote participant.
#[derive(Clone)]
pub struct RemoteTrack {
    pub sid: String,
    pub kind: TrackKind,
    source: Arc<dyn RemoteTrackSource>,
}

impl RemoteTrack {
    pub fn new(sid: impl Into<String>, kind: TrackKind, source: Arc<dyn RemoteTrackSource>) -> Self {
        Self {
            sid: sid.into(),
            kind,
            source,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.kind == TrackKind::Audio
    }

    /// Opens a frame stream for audio tracks; `None` for video.
    pub fn audio_stream(&self) -> Option<AudioFrameStream> {
        if self.is_audio() {
            self.source.audio_stream()
        } else {
            None
        }
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("sid", &self.sid)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Snapshot of a remote participant and its current publications.
#[derive(Debug, Clone)]
pub struct RemoteParticipant {
    pub identity: String,
    pub kind: ParticipantKind,
    pub tracks: Vec<RemoteTrack>,
}

/// Events emitted by the room.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// A remote track became available to this room connection.
    TrackSubscribed {
        track: RemoteTrack,
        publisher_identity: String,
        publisher_kind: ParticipantKind,
    },
    /// A remote participant left; its track streams end.
    ParticipantDisconnected { identity: String },
}

#[async_trait]
pub trait Room: Send + Sync {
    /// Name of the room, used when minting join tokens.
    fn name(&self) -> &str;

    /// Publishes an audio track fed by `source`.
    async fn publish_audio_track(
        &self,
        name: &str,
        source: AudioFrameStream,
    ) -> Result<TrackHandle, VoiceError>;

    /// Removes a previously published track.
    async fn unpublish_track(&self, handle: &TrackHandle) -> Result<(), VoiceError>;

    /// Subscribes to room events from this point onward.
    fn subscribe_events(&self) -> broadcast::Receiver<RoomEvent>;

    /// Current remote participants and their published tracks.
    fn remote_participants(&self) -> Vec<RemoteParticipant>;
}
