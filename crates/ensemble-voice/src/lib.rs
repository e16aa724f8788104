//! Voice plumbing for Ensemble agents.
//!
//! Defines the contracts of the external collaborators every agent relies
//! on (the shared room, speech-generation sessions, the avatar-rendering
//! service) and the machinery that wires them together for one agent:
//! the audio routing policy, output sinks, and the [`AgentSessionBinding`]
//! that pipes room audio into a speech session and synthesized audio back
//! out to the room.
//!
//! The room transport, the speech model and the avatar service themselves
//! are not implemented here. The [`loopback`] module provides in-process
//! stand-ins that record every call.

pub mod avatar;
pub mod binding;
pub mod error;
pub mod loopback;
pub mod room;
pub mod routing;
pub mod sink;
pub mod speech;
pub mod token;

pub use avatar::{avatar_identity_for, AvatarRenderingService, AvatarSession, AvatarStartRequest};
pub use binding::{AgentSessionBinding, PipelineCounters};
pub use error::VoiceError;
pub use room::{AudioFrameStream, RemoteParticipant, RemoteTrack, RemoteTrackSource, Room, RoomEvent, TrackHandle};
pub use routing::{should_subscribe, Classified, IdentityDirectory};
pub use sink::{AudioOutputSink, LocalAudioSource, OutputRoute, DEFAULT_SOURCE_QUEUE_FRAMES};
pub use speech::{GenerationEvent, MessageGeneration, SpeechEvent, SpeechModel, SpeechSession, SpeechSessionParams};
pub use token::{RoomAccess, RoomTokenIssuer};
