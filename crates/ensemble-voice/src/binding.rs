//! Couples one speech session to one audio output route.
//!
//! An [`AgentSessionBinding`] runs three kinds of background work:
//!
//! - the output pipeline: one task draining the speech session's event
//!   channel, one task per generation draining its messages, and one task
//!   per message draining its audio frames into the [`OutputRoute`];
//! - the room listener: one task watching room events and scanning
//!   existing publications, plus one forwarding task per accepted track;
//! - direct calls: [`speak`](AgentSessionBinding::speak) and
//!   [`push_inbound`](AgentSessionBinding::push_inbound).
//!
//! Child tasks live in `JoinSet`s owned by their parent task, so aborting
//! the top-level tasks on [`close`](AgentSessionBinding::close) tears down
//! the whole tree.

use crate::error::VoiceError;
use crate::room::{AudioFrameStream, RemoteTrack, Room, RoomEvent};
use crate::routing::IdentityDirectory;
use crate::sink::OutputRoute;
use crate::speech::{GenerationEvent, MessageGeneration, SpeechEvent, SpeechSession};
use ensemble_types::{AudioFrame, ParticipantKind, ParticipantRole};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Inbound frames between two progress logs on a forwarded track.
const INBOUND_LOG_EVERY: u64 = 1000;

/// Outbound frames between two progress logs on a message stream.
const OUTBOUND_LOG_EVERY: u64 = 500;

#[derive(Debug, Default)]
struct PipelineStats {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    generations: AtomicU64,
    stream_errors: AtomicU64,
    sink_errors: AtomicU64,
}

/// Point-in-time counters for one binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCounters {
    /// Frames pushed into the speech session.
    pub frames_in: u64,
    /// Frames captured into the output route.
    pub frames_out: u64,
    /// Generations received from the speech session.
    pub generations: u64,
    /// Error events reported by the speech session.
    pub stream_errors: u64,
    /// Frames the output route refused.
    pub sink_errors: u64,
}

pub struct AgentSessionBinding {
    identity: String,
    role: ParticipantRole,
    speech: Arc<dyn SpeechSession>,
    output: Arc<OutputRoute>,
    stats: Arc<PipelineStats>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AgentSessionBinding {
    pub fn new(
        identity: impl Into<String>,
        role: ParticipantRole,
        speech: Arc<dyn SpeechSession>,
        output: Arc<OutputRoute>,
    ) -> Self {
        Self {
            identity: identity.into().to_lowercase(),
            role,
            speech,
            output,
            stats: Arc::new(PipelineStats::default()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn role(&self) -> ParticipantRole {
        self.role
    }

    pub fn output(&self) -> &Arc<OutputRoute> {
        &self.output
    }

    pub fn counters(&self) -> PipelineCounters {
        PipelineCounters {
            frames_in: self.stats.frames_in.load(Ordering::Relaxed),
            frames_out: self.stats.frames_out.load(Ordering::Relaxed),
            generations: self.stats.generations.load(Ordering::Relaxed),
            stream_errors: self.stats.stream_errors.load(Ordering::Relaxed),
            sink_errors: self.stats.sink_errors.load(Ordering::Relaxed),
        }
    }

    /// Starts draining the speech session's output into the output route.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::PipelineAlreadyStarted`] if the session's event
    /// channel was already taken.
    pub fn start_pipeline(&self) -> Result<(), VoiceError> {
        let events = self
            .speech
            .take_events()
            .ok_or_else(|| VoiceError::PipelineAlreadyStarted(self.identity.clone()))?;

        let handle = tokio::spawn(drain_events(
            self.identity.clone(),
            events,
            Arc::clone(&self.output),
            Arc::clone(&self.stats),
        ));
        self.track(handle);
        Ok(())
    }

    /// Starts forwarding routed room audio into the speech session.
    ///
    /// Tracks already published are scanned immediately; tracks subscribed
    /// later are picked up from the room's event stream.
    pub fn listen(&self, room: Arc<dyn Room>, directory: Arc<IdentityDirectory>) {
        let forwarder = TrackForwarder {
            identity: self.identity.clone(),
            role: self.role,
            directory,
            speech: Arc::clone(&self.speech),
            stats: Arc::clone(&self.stats),
            forwarders: JoinSet::new(),
            forwarding: HashSet::new(),
        };
        let handle = tokio::spawn(forwarder.run(room));
        self.track(handle);
    }

    /// Injects text into the speech session for synthesis.
    pub async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        let preview: String = text.chars().take(50).collect();
        info!(identity = %self.identity, "speaking: {}...", preview);
        self.speech.send_text(text).await
    }

    /// Pushes one inbound frame into the speech session.
    pub async fn push_inbound(&self, frame: AudioFrame) -> Result<(), VoiceError> {
        self.speech.push_audio(frame).await?;
        self.stats.frames_in.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Aborts every background task of this binding.
    pub fn abort_tasks(&self) {
        let handles = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            handle.abort();
        }
    }

    /// Aborts background work and closes the speech session.
    pub async fn close(&self) -> Result<(), VoiceError> {
        self.abort_tasks();
        self.speech.close().await
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

impl Drop for AgentSessionBinding {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

fn log_join<T>(identity: &str, joined: Result<T, JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(identity = %identity, "audio pipeline task panicked: {}", e);
        }
    }
}

async fn drain_events(
    identity: String,
    mut events: mpsc::Receiver<SpeechEvent>,
    output: Arc<OutputRoute>,
    stats: Arc<PipelineStats>,
) {
    let mut generations = JoinSet::new();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SpeechEvent::GenerationCreated(generation) => {
                        stats.generations.fetch_add(1, Ordering::Relaxed);
                        info!(
                            identity = %identity,
                            response_id = %generation.response_id,
                            "generation created"
                        );
                        generations.spawn(drain_generation(
                            identity.clone(),
                            generation,
                            Arc::clone(&output),
                            Arc::clone(&stats),
                        ));
                    }
                    SpeechEvent::InputTranscription { transcript } => {
                        info!(identity = %identity, "input transcription: {}", transcript);
                    }
                    SpeechEvent::Error(cause) => {
                        stats.stream_errors.fetch_add(1, Ordering::Relaxed);
                        error!(identity = %identity, "speech session error: {}", cause);
                    }
                }
            }
            Some(joined) = generations.join_next(), if !generations.is_empty() => {
                log_join(&identity, joined);
            }
        }
    }

    while let Some(joined) = generations.join_next().await {
        log_join(&identity, joined);
    }
    info!(identity = %identity, "speech event stream ended");
}

async fn drain_generation(
    identity: String,
    generation: GenerationEvent,
    output: Arc<OutputRoute>,
    stats: Arc<PipelineStats>,
) {
    let GenerationEvent {
        response_id,
        mut messages,
    } = generation;
    let mut streams = JoinSet::new();

    while let Some(message) = messages.recv().await {
        debug!(
            identity = %identity,
            response_id = %response_id,
            message_id = %message.message_id,
            "received message generation"
        );
        streams.spawn(drain_audio(
            identity.clone(),
            message,
            Arc::clone(&output),
            Arc::clone(&stats),
        ));
    }

    while let Some(joined) = streams.join_next().await {
        log_join(&identity, joined);
    }
}

async fn drain_audio(
    identity: String,
    message: MessageGeneration,
    output: Arc<OutputRoute>,
    stats: Arc<PipelineStats>,
) {
    let MessageGeneration {
        message_id,
        mut audio,
    } = message;
    let mut frame_count: u64 = 0;

    while let Some(frame) = audio.recv().await {
        match output.capture(frame).await {
            Ok(()) => {
                frame_count += 1;
                stats.frames_out.fetch_add(1, Ordering::Relaxed);
                if frame_count % OUTBOUND_LOG_EVERY == 0 {
                    debug!(identity = %identity, message_id = %message_id, frame_count, "captured audio frames");
                }
            }
            Err(VoiceError::SinkClosed(sink)) => {
                stats.sink_errors.fetch_add(1, Ordering::Relaxed);
                warn!(identity = %identity, message_id = %message_id, sink = %sink, "output sink closed, dropping message audio");
                break;
            }
            Err(e) => {
                stats.sink_errors.fetch_add(1, Ordering::Relaxed);
                warn!(identity = %identity, message_id = %message_id, "failed to capture audio frame: {}", e);
            }
        }
    }

    debug!(identity = %identity, message_id = %message_id, frame_count, "finished message audio stream");
}

struct TrackForwarder {
    identity: String,
    role: ParticipantRole,
    directory: Arc<IdentityDirectory>,
    speech: Arc<dyn SpeechSession>,
    stats: Arc<PipelineStats>,
    forwarders: JoinSet<String>,
    /// Track sids currently forwarded, so a track seen both in the initial
    /// scan and in the event stream is forwarded once.
    forwarding: HashSet<String>,
}

impl TrackForwarder {
    async fn run(mut self, room: Arc<dyn Room>) {
        // Subscribe before scanning so nothing published in between is lost.
        let mut events = room.subscribe_events();
        self.scan(room.as_ref());

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(RoomEvent::TrackSubscribed { track, publisher_identity, publisher_kind }) => {
                        self.consider(&track, &publisher_identity, publisher_kind);
                    }
                    Ok(RoomEvent::ParticipantDisconnected { identity }) => {
                        debug!(listener = %self.identity, participant = %identity, "participant left");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(listener = %self.identity, skipped, "room events lagged, rescanning publications");
                        self.scan(room.as_ref());
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(joined) = self.forwarders.join_next(), if !self.forwarders.is_empty() => {
                    match joined {
                        Ok(sid) => {
                            self.forwarding.remove(&sid);
                        }
                        Err(e) => log_join::<()>(&self.identity, Err(e)),
                    }
                }
            }
        }

        while let Some(joined) = self.forwarders.join_next().await {
            if let Err(e) = joined {
                log_join::<()>(&self.identity, Err(e));
            }
        }
        info!(listener = %self.identity, "room event stream ended");
    }

    fn scan(&mut self, room: &dyn Room) {
        for participant in room.remote_participants() {
            for track in &participant.tracks {
                self.consider(track, &participant.identity, participant.kind);
            }
        }
    }

    fn consider(&mut self, track: &RemoteTrack, publisher_identity: &str, publisher_kind: ParticipantKind) {
        if !track.is_audio() {
            return;
        }
        if !self
            .directory
            .should_listen(&self.identity, self.role, publisher_identity, publisher_kind)
        {
            debug!(
                listener = %self.identity,
                publisher = %publisher_identity,
                track_sid = %track.sid,
                "routing policy rejected track"
            );
            return;
        }
        if !self.forwarding.insert(track.sid.clone()) {
            return;
        }
        let Some(stream) = track.audio_stream() else {
            self.forwarding.remove(&track.sid);
            return;
        };

        info!(
            listener = %self.identity,
            publisher = %publisher_identity,
            track_sid = %track.sid,
            "forwarding audio track"
        );
        self.forwarders.spawn(forward_track(
            self.identity.clone(),
            track.sid.clone(),
            stream,
            Arc::clone(&self.speech),
            Arc::clone(&self.stats),
        ));
    }
}

async fn forward_track(
    identity: String,
    sid: String,
    mut stream: AudioFrameStream,
    speech: Arc<dyn SpeechSession>,
    stats: Arc<PipelineStats>,
) -> String {
    let mut frame_count: u64 = 0;

    while let Some(frame) = stream.recv().await {
        if let Err(e) = speech.push_audio(frame).await {
            warn!(listener = %identity, track_sid = %sid, "stopped forwarding track: {}", e);
            break;
        }
        frame_count += 1;
        stats.frames_in.fetch_add(1, Ordering::Relaxed);
        if frame_count % INBOUND_LOG_EVERY == 0 {
            debug!(listener = %identity, track_sid = %sid, frame_count, "pushed inbound frames");
        }
    }

    debug!(listener = %identity, track_sid = %sid, frame_count, "audio track forwarding ended");
    sid
}
