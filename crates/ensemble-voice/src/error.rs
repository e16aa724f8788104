use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("LiveKit API error: {0}")]
    LiveKit(#[from] livekit_api::access_token::AccessTokenError),

    #[error("Room service error: {0}")]
    RoomService(String),

    #[error("Speech session error: {0}")]
    Speech(String),

    #[error("Speech session is closed")]
    SessionClosed,

    #[error("Avatar connection error: {0}")]
    AvatarConnection(String),

    #[error("Avatar session error: {0}")]
    Avatar(String),

    #[error("Audio sink '{0}' is closed")]
    SinkClosed(String),

    #[error(
        "Audio format mismatch: sink expects {expected_rate}Hz/{expected_channels}ch, \
         frame is {rate}Hz/{channels}ch"
    )]
    FormatMismatch {
        expected_rate: u32,
        expected_channels: u32,
        rate: u32,
        channels: u32,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Output pipeline already started for '{0}'")]
    PipelineAlreadyStarted(String),
}

impl VoiceError {
    /// Returns `true` for failures worth retrying (transient provider errors).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AvatarConnection(_) | Self::RoomService(_))
    }
}
