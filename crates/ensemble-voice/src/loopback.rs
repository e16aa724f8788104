//! In-process collaborators.
//!
//! These implement the room, speech and avatar contracts without any
//! network. They record every call and can be told to fail, which makes
//! them the backbone of the workspace's tests. They are also usable for
//! local dry runs of the orchestrator.

use crate::avatar::{AvatarRenderingService, AvatarSession, AvatarStartRequest};
use crate::error::VoiceError;
use crate::room::{AudioFrameStream, RemoteParticipant, RemoteTrack, RemoteTrackSource, Room, RoomEvent, TrackHandle};
use crate::sink::AudioOutputSink;
use crate::speech::{GenerationEvent, MessageGeneration, SpeechEvent, SpeechModel, SpeechSession, SpeechSessionParams};
use async_trait::async_trait;
use ensemble_types::{AudioFrame, ParticipantKind, TrackKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

const ROOM_EVENT_CAPACITY: usize = 256;
const SPEECH_EVENT_CAPACITY: usize = 64;
const TRACK_QUEUE_FRAMES: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// Feeds frames into a remote track of a [`LoopbackRoom`].
#[derive(Clone, Default)]
pub struct LoopbackTrackFeed {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<AudioFrame>>>>,
}

impl LoopbackTrackFeed {
    /// Delivers `frame` to every open stream of this track.
    pub async fn push(&self, frame: AudioFrame) {
        let subscribers = lock(&self.subscribers).clone();
        for tx in subscribers {
            let _ = tx.send(frame.clone()).await;
        }
        lock(&self.subscribers).retain(|tx| !tx.is_closed());
    }

    /// Number of open streams reading this track.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Ends every stream, as if the publisher unpublished the track.
    pub fn end(&self) {
        lock(&self.subscribers).clear();
    }
}

impl RemoteTrackSource for LoopbackTrackFeed {
    fn audio_stream(&self) -> Option<AudioFrameStream> {
        let (tx, rx) = mpsc::channel(TRACK_QUEUE_FRAMES);
        lock(&self.subscribers).push(tx);
        Some(rx)
    }
}

#[derive(Default)]
struct RoomState {
    participants: Vec<RemoteParticipant>,
    published: HashMap<String, (String, Option<AudioFrameStream>)>,
    unpublished: Vec<String>,
    fail_publish: bool,
    fail_unpublish: bool,
}

/// A room that lives in memory.
pub struct LoopbackRoom {
    name: String,
    events: broadcast::Sender<RoomEvent>,
    state: Mutex<RoomState>,
    publish_count: AtomicUsize,
}

impl LoopbackRoom {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(ROOM_EVENT_CAPACITY);
        Arc::new(Self {
            name: name.into(),
            events,
            state: Mutex::new(RoomState::default()),
            publish_count: AtomicUsize::new(0),
        })
    }

    /// Adds a remote participant publishing one audio track and announces
    /// the track to current listeners.
    pub fn join_participant(&self, identity: &str, kind: ParticipantKind) -> LoopbackTrackFeed {
        let feed = LoopbackTrackFeed::default();
        let track = RemoteTrack::new(
            format!("TR_{}", Uuid::new_v4().simple()),
            TrackKind::Audio,
            Arc::new(feed.clone()),
        );
        lock(&self.state).participants.push(RemoteParticipant {
            identity: identity.to_string(),
            kind,
            tracks: vec![track.clone()],
        });
        let _ = self.events.send(RoomEvent::TrackSubscribed {
            track,
            publisher_identity: identity.to_string(),
            publisher_kind: kind,
        });
        feed
    }

    /// Removes a participant and ends its tracks.
    pub fn leave_participant(&self, identity: &str, feed: &LoopbackTrackFeed) {
        feed.end();
        lock(&self.state)
            .participants
            .retain(|p| p.identity != identity);
        let _ = self.events.send(RoomEvent::ParticipantDisconnected {
            identity: identity.to_string(),
        });
    }

    /// Names of the tracks currently published by agents.
    pub fn published_track_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state)
            .published
            .values()
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Takes the frame stream behind a published track, to observe what an
    /// agent plays into the room.
    pub fn take_published_stream(&self, track_name: &str) -> Option<AudioFrameStream> {
        lock(&self.state)
            .published
            .values_mut()
            .find(|(name, _)| name == track_name)
            .and_then(|(_, stream)| stream.take())
    }

    /// Sids passed to `unpublish_track`, successful or not.
    pub fn unpublish_calls(&self) -> Vec<String> {
        lock(&self.state).unpublished.clone()
    }

    pub fn publish_count(&self) -> usize {
        self.publish_count.load(Ordering::SeqCst)
    }

    pub fn set_fail_publish(&self, fail: bool) {
        lock(&self.state).fail_publish = fail;
    }

    pub fn set_fail_unpublish(&self, fail: bool) {
        lock(&self.state).fail_unpublish = fail;
    }
}

#[async_trait]
impl Room for LoopbackRoom {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish_audio_track(
        &self,
        name: &str,
        source: AudioFrameStream,
    ) -> Result<TrackHandle, VoiceError> {
        let mut state = lock(&self.state);
        if state.fail_publish {
            return Err(VoiceError::RoomService(format!("publish of '{name}' refused")));
        }
        let handle = TrackHandle {
            sid: format!("TR_{}", Uuid::new_v4().simple()),
            name: name.to_string(),
        };
        state
            .published
            .insert(handle.sid.clone(), (name.to_string(), Some(source)));
        self.publish_count.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn unpublish_track(&self, handle: &TrackHandle) -> Result<(), VoiceError> {
        let mut state = lock(&self.state);
        state.unpublished.push(handle.sid.clone());
        if state.fail_unpublish {
            return Err(VoiceError::RoomService(format!(
                "unpublish of '{}' refused",
                handle.sid
            )));
        }
        state.published.remove(&handle.sid);
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    fn remote_participants(&self) -> Vec<RemoteParticipant> {
        lock(&self.state).participants.clone()
    }
}

// ---------------------------------------------------------------------------
// Speech
// ---------------------------------------------------------------------------

/// A speech session driven by the test instead of a model.
pub struct LoopbackSpeechSession {
    params: SpeechSessionParams,
    events_tx: Mutex<Option<mpsc::Sender<SpeechEvent>>>,
    events_rx: Mutex<Option<mpsc::Receiver<SpeechEvent>>>,
    pushed_frames: AtomicU64,
    texts: Mutex<Vec<String>>,
    closed: AtomicBool,
    close_calls: AtomicU32,
    fail_close: AtomicBool,
    next_id: AtomicU64,
}

impl LoopbackSpeechSession {
    pub fn new(params: SpeechSessionParams) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(SPEECH_EVENT_CAPACITY);
        Arc::new(Self {
            params,
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
            pushed_frames: AtomicU64::new(0),
            texts: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_calls: AtomicU32::new(0),
            fail_close: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn params(&self) -> &SpeechSessionParams {
        &self.params
    }

    pub fn pushed_frames(&self) -> u64 {
        self.pushed_frames.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        lock(&self.texts).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Makes `close` report an error (the session still closes).
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    fn sender(&self) -> Result<mpsc::Sender<SpeechEvent>, VoiceError> {
        lock(&self.events_tx).clone().ok_or(VoiceError::SessionClosed)
    }

    /// Emits one generation whose messages carry the given frames.
    pub async fn emit_generation(&self, messages: Vec<Vec<AudioFrame>>) -> Result<(), VoiceError> {
        let tx = self.sender()?;
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (message_tx, message_rx) = mpsc::channel(messages.len().max(1));

        tx.send(SpeechEvent::GenerationCreated(GenerationEvent {
            response_id: format!("resp-{seq}"),
            messages: message_rx,
        }))
        .await
        .map_err(|_| VoiceError::SessionClosed)?;

        for (index, frames) in messages.into_iter().enumerate() {
            let (audio_tx, audio_rx) = mpsc::channel(frames.len().max(1));
            for frame in frames {
                audio_tx
                    .send(frame)
                    .await
                    .map_err(|_| VoiceError::SessionClosed)?;
            }
            message_tx
                .send(MessageGeneration {
                    message_id: format!("msg-{seq}-{index}"),
                    audio: audio_rx,
                })
                .await
                .map_err(|_| VoiceError::SessionClosed)?;
        }
        Ok(())
    }

    /// Emits an asynchronous session error.
    pub async fn emit_error(&self, cause: &str) -> Result<(), VoiceError> {
        self.sender()?
            .send(SpeechEvent::Error(cause.to_string()))
            .await
            .map_err(|_| VoiceError::SessionClosed)
    }
}

#[async_trait]
impl SpeechSession for LoopbackSpeechSession {
    async fn push_audio(&self, _frame: AudioFrame) -> Result<(), VoiceError> {
        if self.is_closed() {
            return Err(VoiceError::SessionClosed);
        }
        self.pushed_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), VoiceError> {
        if self.is_closed() {
            return Err(VoiceError::SessionClosed);
        }
        lock(&self.texts).push(text.to_string());
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<SpeechEvent>> {
        lock(&self.events_rx).take()
    }

    async fn close(&self) -> Result<(), VoiceError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.events_tx).take();
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(VoiceError::Speech("close failed".to_string()));
        }
        Ok(())
    }
}

/// Opens [`LoopbackSpeechSession`]s and records when each was opened.
#[derive(Default)]
pub struct LoopbackSpeechModel {
    sessions: Mutex<Vec<(Instant, Arc<LoopbackSpeechSession>)>>,
    fail_voices: Mutex<Vec<String>>,
    open_delay: Mutex<Option<Duration>>,
    open_calls: AtomicUsize,
}

impl LoopbackSpeechModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every open for `voice` fail.
    pub fn fail_voice(&self, voice: &str) {
        lock(&self.fail_voices).push(voice.to_string());
    }

    /// Delays every open, to widen race windows in tests.
    pub fn set_open_delay(&self, delay: Duration) {
        *lock(&self.open_delay) = Some(delay);
    }

    /// Number of `open` calls, including failed ones.
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<LoopbackSpeechSession>> {
        lock(&self.sessions).iter().map(|(_, s)| Arc::clone(s)).collect()
    }

    /// The most recent session opened with `voice`.
    pub fn session_for_voice(&self, voice: &str) -> Option<Arc<LoopbackSpeechSession>> {
        lock(&self.sessions)
            .iter()
            .rev()
            .find(|(_, s)| s.params().voice == voice)
            .map(|(_, s)| Arc::clone(s))
    }

    /// Open instants in call order, paired with the voice used.
    pub fn open_times(&self) -> Vec<(String, Instant)> {
        lock(&self.sessions)
            .iter()
            .map(|(at, s)| (s.params().voice.clone(), *at))
            .collect()
    }
}

#[async_trait]
impl SpeechModel for LoopbackSpeechModel {
    async fn open(&self, params: SpeechSessionParams) -> Result<Arc<dyn SpeechSession>, VoiceError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let opened_at = Instant::now();

        let delay = *lock(&self.open_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.fail_voices).contains(&params.voice) {
            return Err(VoiceError::Speech(format!(
                "provider rejected session for voice '{}'",
                params.voice
            )));
        }

        let session = LoopbackSpeechSession::new(params);
        lock(&self.sessions).push((opened_at, Arc::clone(&session)));
        Ok(session)
    }
}

// ---------------------------------------------------------------------------
// Avatar
// ---------------------------------------------------------------------------

/// A sink that keeps every frame it receives.
pub struct RecordingSink {
    label: String,
    frames: Mutex<Vec<AudioFrame>>,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            frames: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn frames(&self) -> Vec<AudioFrame> {
        lock(&self.frames).clone()
    }

    pub fn frame_count(&self) -> usize {
        lock(&self.frames).len()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioOutputSink for RecordingSink {
    fn label(&self) -> &str {
        &self.label
    }

    async fn capture_frame(&self, frame: AudioFrame) -> Result<(), VoiceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::SinkClosed(self.label.clone()));
        }
        lock(&self.frames).push(frame);
        Ok(())
    }
}

/// A started loopback avatar.
pub struct LoopbackAvatarSession {
    request: AvatarStartRequest,
    sink: Arc<RecordingSink>,
    stop_calls: AtomicU32,
    fail_stop: bool,
}

impl LoopbackAvatarSession {
    pub fn request(&self) -> &AvatarStartRequest {
        &self.request
    }

    pub fn sink(&self) -> &Arc<RecordingSink> {
        &self.sink
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AvatarSession for Arc<LoopbackAvatarSession> {
    fn audio_sink(&self) -> Arc<dyn AudioOutputSink> {
        Arc::clone(&self.sink) as Arc<dyn AudioOutputSink>
    }

    async fn stop(&self) -> Result<(), VoiceError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.sink.close();
        if self.fail_stop {
            return Err(VoiceError::Avatar(format!(
                "stop of '{}' failed",
                self.request.avatar_identity
            )));
        }
        Ok(())
    }
}

/// An avatar service that can be told to fail its first N attempts.
#[derive(Default)]
pub struct LoopbackAvatarService {
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
    fail_stop: AtomicBool,
    sessions: Mutex<Vec<Arc<LoopbackAvatarSession>>>,
}

impl LoopbackAvatarService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the next `count` start attempts with a connection error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Fails every start attempt.
    pub fn fail_always(&self) {
        self.fail_next(u32::MAX);
    }

    /// Makes sessions started from now on fail their `stop` call.
    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<LoopbackAvatarSession>> {
        lock(&self.sessions).clone()
    }

    /// The most recent session started for `agent_identity`.
    pub fn session_for(&self, agent_identity: &str) -> Option<Arc<LoopbackAvatarSession>> {
        lock(&self.sessions)
            .iter()
            .rev()
            .find(|s| s.request.agent_identity == agent_identity)
            .cloned()
    }
}

#[async_trait]
impl AvatarRenderingService for LoopbackAvatarService {
    async fn start(&self, request: &AvatarStartRequest) -> Result<Box<dyn AvatarSession>, VoiceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if failing {
            return Err(VoiceError::AvatarConnection(format!(
                "avatar provider unavailable for '{}'",
                request.avatar_id
            )));
        }

        let session = Arc::new(LoopbackAvatarSession {
            request: request.clone(),
            sink: Arc::new(RecordingSink::new(request.avatar_identity.clone())),
            stop_calls: AtomicU32::new(0),
            fail_stop: self.fail_stop.load(Ordering::SeqCst),
        });
        lock(&self.sessions).push(Arc::clone(&session));
        Ok(Box::new(session))
    }
}
