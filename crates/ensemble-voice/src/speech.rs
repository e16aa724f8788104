//! Contract for speech-generation sessions.
//!
//! A speech session takes inbound audio and text, and emits generations.
//! Each generation carries a lazy stream of messages and each message
//! carries its own lazy stream of audio frames. All output arrives on one
//! typed event channel per session, which the draining task owns.

use crate::error::VoiceError;
use crate::room::AudioFrameStream;
use async_trait::async_trait;
use ensemble_types::AudioFrame;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Parameters for opening a speech session.
#[derive(Clone)]
pub struct SpeechSessionParams {
    pub instructions: String,
    pub voice: String,
    pub temperature: f32,
    pub api_key: String,
    /// Ask the provider to transcribe inbound audio.
    pub input_transcription: bool,
}

impl fmt::Debug for SpeechSessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechSessionParams")
            .field("instructions_len", &self.instructions.len())
            .field("voice", &self.voice)
            .field("temperature", &self.temperature)
            .field("api_key", &"[REDACTED]")
            .field("input_transcription", &self.input_transcription)
            .finish()
    }
}

/// One message inside a generation.
#[derive(Debug)]
pub struct MessageGeneration {
    pub message_id: String,
    pub audio: AudioFrameStream,
}

/// A generation started by the speech session.
#[derive(Debug)]
pub struct GenerationEvent {
    pub response_id: String,
    pub messages: mpsc::Receiver<MessageGeneration>,
}

/// Everything a speech session reports back.
#[derive(Debug)]
pub enum SpeechEvent {
    GenerationCreated(GenerationEvent),
    InputTranscription { transcript: String },
    Error(String),
}

#[async_trait]
pub trait SpeechSession: Send + Sync {
    /// Pushes one inbound frame. The session resamples as needed.
    async fn push_audio(&self, frame: AudioFrame) -> Result<(), VoiceError>;

    /// Injects text for the session to speak.
    async fn send_text(&self, text: &str) -> Result<(), VoiceError>;

    /// Takes the session's event channel. Returns `None` once taken.
    fn take_events(&self) -> Option<mpsc::Receiver<SpeechEvent>>;

    /// Closes the session. Every stream it produced ends.
    async fn close(&self) -> Result<(), VoiceError>;
}

/// Opens speech sessions.
#[async_trait]
pub trait SpeechModel: Send + Sync {
    async fn open(&self, params: SpeechSessionParams) -> Result<Arc<dyn SpeechSession>, VoiceError>;
}
