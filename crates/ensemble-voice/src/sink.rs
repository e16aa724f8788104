//! Audio output sinks.
//!
//! Every agent owns a [`LocalAudioSource`] feeding its published track. When
//! an avatar session is attached, the avatar's capture sink takes over and
//! the avatar publishes the audio (lip-synced) itself. [`OutputRoute`] picks
//! between the two and serializes writes.

use crate::error::VoiceError;
use crate::room::AudioFrameStream;
use async_trait::async_trait;
use ensemble_types::AudioFrame;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Default number of frames buffered between a local source and its track.
pub const DEFAULT_SOURCE_QUEUE_FRAMES: usize = 256;

/// Anything agent audio can be captured into.
#[async_trait]
pub trait AudioOutputSink: Send + Sync {
    /// Short label for logs.
    fn label(&self) -> &str;

    async fn capture_frame(&self, frame: AudioFrame) -> Result<(), VoiceError>;
}

/// An audio source owned by the agent and published as a room track.
#[derive(Debug)]
pub struct LocalAudioSource {
    label: String,
    sample_rate: u32,
    num_channels: u32,
    tx: mpsc::Sender<AudioFrame>,
}

impl LocalAudioSource {
    /// Creates a source and the stream the room reads it from.
    pub fn new(
        label: impl Into<String>,
        sample_rate: u32,
        num_channels: u32,
        queue_frames: usize,
    ) -> (Arc<Self>, AudioFrameStream) {
        let (tx, rx) = mpsc::channel(queue_frames.max(1));
        let source = Arc::new(Self {
            label: label.into(),
            sample_rate,
            num_channels,
            tx,
        });
        (source, rx)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }
}

#[async_trait]
impl AudioOutputSink for LocalAudioSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn capture_frame(&self, frame: AudioFrame) -> Result<(), VoiceError> {
        if frame.sample_rate() != self.sample_rate || frame.num_channels() != self.num_channels {
            return Err(VoiceError::FormatMismatch {
                expected_rate: self.sample_rate,
                expected_channels: self.num_channels,
                rate: frame.sample_rate(),
                channels: frame.num_channels(),
            });
        }
        self.tx
            .send(frame)
            .await
            .map_err(|_| VoiceError::SinkClosed(self.label.clone()))
    }
}

/// Where an agent's synthesized audio goes.
///
/// Captures are serialized: a frame is fully handed to the sink before the
/// next capture starts.
pub struct OutputRoute {
    local: Arc<LocalAudioSource>,
    avatar: RwLock<Option<Arc<dyn AudioOutputSink>>>,
    write_lock: Mutex<()>,
}

impl OutputRoute {
    pub fn new(local: Arc<LocalAudioSource>) -> Self {
        Self {
            local,
            avatar: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    pub fn local(&self) -> &Arc<LocalAudioSource> {
        &self.local
    }

    /// Routes all subsequent frames to `sink`.
    pub fn bind_avatar(&self, sink: Arc<dyn AudioOutputSink>) {
        let mut guard = self.avatar.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(sink);
    }

    /// Routes all subsequent frames back to the local source.
    pub fn unbind_avatar(&self) {
        let mut guard = self.avatar.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn has_avatar(&self) -> bool {
        self.avatar
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Captures one frame into the current sink.
    ///
    /// If the avatar sink reports itself closed, the avatar is unbound and
    /// the frame (and every later one) goes to the local source instead.
    pub async fn capture(&self, frame: AudioFrame) -> Result<(), VoiceError> {
        let _guard = self.write_lock.lock().await;
        let avatar = self
            .avatar
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(avatar) = avatar else {
            return self.local.capture_frame(frame).await;
        };

        match avatar.capture_frame(frame.clone()).await {
            Err(VoiceError::SinkClosed(label)) => {
                self.unbind_if_current(&avatar);
                warn!(sink = %label, local = %self.local.label, "avatar sink closed, falling back to local audio source");
                self.local.capture_frame(frame).await
            }
            other => other,
        }
    }

    fn unbind_if_current(&self, sink: &Arc<dyn AudioOutputSink>) {
        let mut guard = self.avatar.write().unwrap_or_else(|e| e.into_inner());
        if guard.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, sink)) {
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::RecordingSink;

    fn frame(rate: u32, channels: u32) -> AudioFrame {
        AudioFrame::silence(rate, channels, 240)
    }

    #[tokio::test]
    async fn local_source_forwards_frames_to_track_stream() {
        let (source, mut stream) = LocalAudioSource::new("voice", 24_000, 1, 4);
        source.capture_frame(frame(24_000, 1)).await.unwrap();
        let received = stream.recv().await.unwrap();
        assert_eq!(received.sample_rate(), 24_000);
    }

    #[tokio::test]
    async fn local_source_rejects_format_mismatch() {
        let (source, _stream) = LocalAudioSource::new("voice", 24_000, 1, 4);
        let err = source.capture_frame(frame(48_000, 2)).await.unwrap_err();
        assert!(matches!(err, VoiceError::FormatMismatch { rate: 48_000, .. }));
    }

    #[tokio::test]
    async fn local_source_reports_closed_track() {
        let (source, stream) = LocalAudioSource::new("voice", 24_000, 1, 4);
        drop(stream);
        let err = source.capture_frame(frame(24_000, 1)).await.unwrap_err();
        assert!(matches!(err, VoiceError::SinkClosed(label) if label == "voice"));
    }

    #[tokio::test]
    async fn route_prefers_avatar_and_falls_back_to_local() {
        let (source, mut stream) = LocalAudioSource::new("voice", 24_000, 1, 4);
        let route = OutputRoute::new(source);
        let avatar = Arc::new(RecordingSink::new("avatar"));

        route.capture(frame(24_000, 1)).await.unwrap();
        assert!(stream.try_recv().is_ok());

        route.bind_avatar(avatar.clone());
        assert!(route.has_avatar());
        route.capture(frame(24_000, 1)).await.unwrap();
        assert_eq!(avatar.frame_count(), 1);
        assert!(stream.try_recv().is_err());

        route.unbind_avatar();
        route.capture(frame(24_000, 1)).await.unwrap();
        assert_eq!(avatar.frame_count(), 1);
        assert!(stream.try_recv().is_ok());
    }

    #[tokio::test]
    async fn closed_avatar_sink_falls_back_to_local_source() {
        let (source, mut stream) = LocalAudioSource::new("voice", 24_000, 1, 4);
        let route = OutputRoute::new(source);
        let avatar = Arc::new(RecordingSink::new("avatar"));
        route.bind_avatar(avatar.clone());
        avatar.close();

        route.capture(frame(24_000, 1)).await.unwrap();
        assert!(!route.has_avatar());
        assert!(stream.try_recv().is_ok());
        assert_eq!(avatar.frame_count(), 0);
    }
}
