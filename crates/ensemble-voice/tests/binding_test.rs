//! Tests for the agent session binding: output pipeline, routed listening
//! and teardown.

use ensemble_types::{AudioFrame, ParticipantKind, ParticipantRole};
use ensemble_voice::loopback::{LoopbackRoom, LoopbackSpeechSession, RecordingSink};
use ensemble_voice::{
    AgentSessionBinding, AudioFrameStream, IdentityDirectory, LocalAudioSource, OutputRoute,
    SpeechSessionParams, VoiceError,
};
use std::sync::Arc;
use std::time::Duration;

fn frame(value: i16) -> AudioFrame {
    AudioFrame::new(vec![value; 240], 24_000, 1).expect("valid frame")
}

fn params(voice: &str) -> SpeechSessionParams {
    SpeechSessionParams {
        instructions: "test".to_string(),
        voice: voice.to_string(),
        temperature: 0.7,
        api_key: "key".to_string(),
        input_transcription: true,
    }
}

fn directory() -> Arc<IdentityDirectory> {
    let mut dir = IdentityDirectory::new("cosmo");
    dir.register_agent("finance");
    dir.register_agent("marketing");
    Arc::new(dir)
}

fn binding(
    identity: &str,
    role: ParticipantRole,
) -> (AgentSessionBinding, Arc<LoopbackSpeechSession>, AudioFrameStream) {
    let session = LoopbackSpeechSession::new(params("Charon"));
    let (source, stream) = LocalAudioSource::new(format!("{identity}-voice"), 24_000, 1, 64);
    let binding = AgentSessionBinding::new(
        identity,
        role,
        session.clone(),
        Arc::new(OutputRoute::new(source)),
    );
    (binding, session, stream)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_generation_frames_reach_local_track_in_order() {
    let (binding, session, mut track) = binding("finance", ParticipantRole::SpecialistAgent);
    binding.start_pipeline().expect("pipeline starts");

    session
        .emit_generation(vec![vec![frame(1), frame(2), frame(3)]])
        .await
        .expect("emit");

    for expected in 1..=3 {
        let received = tokio::time::timeout(Duration::from_secs(2), track.recv())
            .await
            .expect("frame in time")
            .expect("track open");
        assert_eq!(received.data()[0], expected);
    }
    assert_eq!(binding.counters().frames_out, 3);
    assert_eq!(binding.counters().generations, 1);
}

#[tokio::test]
async fn test_avatar_sink_takes_over_output() {
    let (binding, session, mut track) = binding("finance", ParticipantRole::SpecialistAgent);
    let avatar = Arc::new(RecordingSink::new("finance-avatar"));
    binding.output().bind_avatar(avatar.clone());
    binding.start_pipeline().expect("pipeline starts");

    session
        .emit_generation(vec![vec![frame(1), frame(2)], vec![frame(3)]])
        .await
        .expect("emit");

    wait_until(|| avatar.frame_count() == 3).await;
    assert!(track.try_recv().is_err(), "local track stays silent");
}

#[tokio::test]
async fn test_closed_avatar_sink_falls_back_to_local_track() {
    let (binding, session, mut track) = binding("finance", ParticipantRole::SpecialistAgent);
    let avatar = Arc::new(RecordingSink::new("finance-avatar"));
    binding.output().bind_avatar(avatar.clone());
    binding.start_pipeline().expect("pipeline starts");
    avatar.close();

    session
        .emit_generation(vec![vec![frame(1), frame(2)], vec![frame(3)]])
        .await
        .expect("emit");

    let mut received = Vec::new();
    for _ in 0..3 {
        let next = tokio::time::timeout(Duration::from_secs(2), track.recv())
            .await
            .expect("frame in time")
            .expect("track open");
        received.push(next.data()[0]);
    }
    received.sort_unstable();
    assert_eq!(received, vec![1, 2, 3]);
    assert!(!binding.output().has_avatar());
    assert_eq!(avatar.frame_count(), 0);
    wait_until(|| binding.counters().frames_out == 3).await;
    assert_eq!(binding.counters().sink_errors, 0);
}

#[tokio::test]
async fn test_stream_errors_are_counted_and_not_fatal() {
    let (binding, session, mut track) = binding("finance", ParticipantRole::SpecialistAgent);
    binding.start_pipeline().expect("pipeline starts");

    session.emit_error("quota exceeded").await.expect("emit");
    session
        .emit_generation(vec![vec![frame(7)]])
        .await
        .expect("emit");

    let received = tokio::time::timeout(Duration::from_secs(2), track.recv())
        .await
        .expect("frame in time")
        .expect("track open");
    assert_eq!(received.data()[0], 7);
    assert_eq!(binding.counters().stream_errors, 1);
}

#[tokio::test]
async fn test_pipeline_starts_once() {
    let (binding, _session, _track) = binding("finance", ParticipantRole::SpecialistAgent);
    binding.start_pipeline().expect("first start");
    let err = binding.start_pipeline().unwrap_err();
    assert!(matches!(err, VoiceError::PipelineAlreadyStarted(identity) if identity == "finance"));
}

#[tokio::test]
async fn test_speak_and_push_inbound_reach_session() {
    let (binding, session, _track) = binding("finance", ParticipantRole::SpecialistAgent);
    binding.speak("Olá! Sou Ricardo.").await.expect("speak");
    binding.push_inbound(frame(1)).await.expect("push");

    assert_eq!(session.texts(), vec!["Olá! Sou Ricardo.".to_string()]);
    assert_eq!(session.pushed_frames(), 1);
    assert_eq!(binding.counters().frames_in, 1);
}

#[tokio::test]
async fn test_specialist_listener_applies_routing_policy() {
    let room = LoopbackRoom::new("mentoria");
    // Published before the specialist joined: found by the initial scan.
    let alice = room.join_participant("alice", ParticipantKind::Standard);

    let (binding, session, _track) = binding("finance", ParticipantRole::SpecialistAgent);
    binding.listen(room.clone(), directory());
    wait_until(|| alice.subscriber_count() == 1).await;

    let marketing = room.join_participant("marketing", ParticipantKind::Agent);
    let cosmo = room.join_participant("cosmo", ParticipantKind::Agent);
    wait_until(|| cosmo.subscriber_count() == 1).await;
    assert_eq!(marketing.subscriber_count(), 0, "specialists ignore each other");

    for value in 0..3 {
        alice.push(frame(value)).await;
    }
    for value in 0..2 {
        cosmo.push(frame(value)).await;
    }
    marketing.push(frame(9)).await;

    wait_until(|| session.pushed_frames() == 5).await;
}

#[tokio::test]
async fn test_primary_listener_hears_specialists_but_not_itself() {
    let room = LoopbackRoom::new("mentoria");
    let (binding, session, _track) = binding("cosmo", ParticipantRole::PrimaryAgent);
    binding.listen(room.clone(), directory());

    let own = room.join_participant("cosmo", ParticipantKind::Agent);
    let finance = room.join_participant("finance", ParticipantKind::Agent);
    wait_until(|| finance.subscriber_count() == 1).await;
    assert_eq!(own.subscriber_count(), 0);

    finance.push(frame(1)).await;
    wait_until(|| session.pushed_frames() == 1).await;
}

#[tokio::test]
async fn test_close_stops_forwarding_and_closes_session() {
    let room = LoopbackRoom::new("mentoria");
    let alice = room.join_participant("alice", ParticipantKind::Standard);

    let (binding, session, _track) = binding("finance", ParticipantRole::SpecialistAgent);
    binding.start_pipeline().expect("pipeline starts");
    binding.listen(room.clone(), directory());
    wait_until(|| alice.subscriber_count() == 1).await;

    binding.close().await.expect("close");
    assert!(session.is_closed());
    wait_until(|| alice.subscriber_count() == 0).await;
    assert!(binding.push_inbound(frame(1)).await.is_err());
}
