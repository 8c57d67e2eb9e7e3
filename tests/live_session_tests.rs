// Integration tests for the live session state machine
//
// The session runs against fake devices and a fake connector, so these tests
// drive the remote side by hand and observe callbacks through a
// ChannelObserver.

mod common;

use common::{silent_audio, wait_until, FakeConnector, FakeDevices};
use lingopop::live::{
    ChannelObserver, ConnectOutcome, LiveSession, LiveSessionConfig, Outgoing, SessionEvent,
    SessionState, TransportEvent,
};
use lingopop::SessionError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Option<SessionEvent> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .ok()
        .flatten()
}

fn transcript(user: &str, ai: &str) -> SessionEvent {
    SessionEvent::TranscriptUpdate {
        user: user.to_string(),
        ai: ai.to_string(),
    }
}

#[tokio::test]
async fn test_turn_complete_scenario() {
    let devices = FakeDevices::new();
    let (connector, mut remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector);
    let (observer, mut events) = ChannelObserver::new();

    session
        .connect(LiveSessionConfig::new("Spanish", "English"), Arc::new(observer))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Open);

    let remote = remotes.recv().await.unwrap();
    remote
        .send_json(r#"{"serverContent":{"inputTranscription":{"text":"Hola"}}}"#)
        .await;
    remote
        .send_json(r#"{"serverContent":{"inputTranscription":{"text":" amigo"}}}"#)
        .await;
    remote
        .send_json(r#"{"serverContent":{"outputTranscription":{"text":"Hello"}}}"#)
        .await;
    remote
        .send_json(r#"{"serverContent":{"outputTranscription":{"text":" friend"}}}"#)
        .await;
    remote
        .send_json(r#"{"serverContent":{"turnComplete":true}}"#)
        .await;

    assert_eq!(next_event(&mut events).await, Some(transcript("Hola", "")));
    assert_eq!(next_event(&mut events).await, Some(transcript("Hola amigo", "")));
    assert_eq!(
        next_event(&mut events).await,
        Some(transcript("Hola amigo", "Hello"))
    );
    assert_eq!(
        next_event(&mut events).await,
        Some(transcript("Hola amigo", "Hello friend"))
    );

    match next_event(&mut events).await {
        Some(SessionEvent::TurnComplete(turn)) => {
            assert_eq!(turn.user, "Hola amigo");
            assert_eq!(turn.ai, "Hello friend");
        }
        other => panic!("expected turn complete, got {:?}", other),
    }

    assert_eq!(session.current_transcript(), (String::new(), String::new()));
    assert_eq!(session.stats().turns_completed, 1);

    // The next turn starts from empty buffers
    remote
        .send_json(r#"{"serverContent":{"inputTranscription":{"text":"Adios"}}}"#)
        .await;
    assert_eq!(next_event(&mut events).await, Some(transcript("Adios", "")));

    session.disconnect().await;
}

#[tokio::test]
async fn test_setup_carries_language_pair() {
    let devices = FakeDevices::new();
    let (connector, mut remotes) = FakeConnector::new();
    let session = LiveSession::new(devices, connector);
    let (observer, _events) = ChannelObserver::new();

    let config = LiveSessionConfig::new("English", "Portuguese")
        .with_focus_topic(Some("travel".to_string()));
    session.connect(config, Arc::new(observer)).await.unwrap();

    let remote = remotes.recv().await.unwrap();
    let prompt = &remote.setup.system_instruction.parts[0].text;
    assert!(prompt.contains("speaks English"));
    assert!(prompt.contains("learning Portuguese"));
    assert!(prompt.contains("travel"));

    session.disconnect().await;
}

#[tokio::test]
async fn test_connect_while_open_is_noop() {
    let devices = FakeDevices::new();
    let (connector, _remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector.clone());

    let (first, _first_events) = ChannelObserver::new();
    let (second, _second_events) = ChannelObserver::new();

    let opened = session
        .connect(LiveSessionConfig::default(), Arc::new(first))
        .await
        .unwrap();
    let repeated = session
        .connect(LiveSessionConfig::default(), Arc::new(second))
        .await
        .unwrap();

    assert_eq!(opened, ConnectOutcome::Opened);
    assert_eq!(repeated, ConnectOutcome::AlreadyActive(SessionState::Open));

    assert_eq!(devices.inputs_opened.load(Ordering::SeqCst), 1);
    assert_eq!(devices.outputs_opened.load(Ordering::SeqCst), 1);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

    session.disconnect().await;
}

#[tokio::test]
async fn test_connect_while_connecting_is_noop() {
    let devices = FakeDevices::new();
    let (connector, _remotes, gate) = FakeConnector::gated();
    let session = LiveSession::new(devices.clone(), connector.clone());

    let first = {
        let session = session.clone();
        tokio::spawn(async move {
            let (observer, _events) = ChannelObserver::new();
            session
                .connect(LiveSessionConfig::default(), Arc::new(observer))
                .await
        })
    };

    assert!(wait_until(|| connector.connects.load(Ordering::SeqCst) == 1).await);
    assert_eq!(session.state(), SessionState::Connecting);

    let (observer, _events) = ChannelObserver::new();
    let repeated = session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    assert_eq!(repeated, ConnectOutcome::AlreadyActive(SessionState::Connecting));

    gate.add_permits(1);
    assert_eq!(first.await.unwrap().unwrap(), ConnectOutcome::Opened);

    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(devices.inputs_opened.load(Ordering::SeqCst), 1);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

    session.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_while_connecting_releases_microphone() {
    let devices = FakeDevices::new();
    let (connector, mut remotes, gate) = FakeConnector::gated();
    let session = LiveSession::new(devices.clone(), connector.clone());
    let (observer, mut events) = ChannelObserver::new();

    let first = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .connect(LiveSessionConfig::default(), Arc::new(observer))
                .await
        })
    };

    assert!(wait_until(|| connector.connects.load(Ordering::SeqCst) == 1).await);
    assert_eq!(session.state(), SessionState::Connecting);

    session.disconnect().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(devices.input_stopped());
    assert!(devices.output_closed());

    // The handshake finishing late must not revive the session
    gate.add_permits(1);
    assert_eq!(first.await.unwrap().unwrap(), ConnectOutcome::Cancelled);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(devices.input_stopped());

    let mut remote = remotes.recv().await.unwrap();
    assert!(matches!(remote.next_non_audio().await, Some(Outgoing::Close)));
    assert_eq!(next_event(&mut events).await, None);

    // A retry holds exactly one microphone and one connection
    gate.add_permits(1);
    let (observer, _events) = ChannelObserver::new();
    let retried = session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    assert_eq!(retried, ConnectOutcome::Opened);
    assert!(!devices.input_stopped());
    assert_eq!(devices.inputs_opened.load(Ordering::SeqCst), 2);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);

    session.disconnect().await;
    assert!(devices.input_stopped());
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let devices = FakeDevices::new();
    let (connector, mut remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector);
    let (observer, mut events) = ChannelObserver::new();

    session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    let mut remote = remotes.recv().await.unwrap();

    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(devices.input_stopped());
    assert!(devices.output_closed());
    assert!(matches!(remote.next_non_audio().await, Some(Outgoing::Close)));

    // Caller-initiated teardown notifies nobody and drops the observer
    assert_eq!(next_event(&mut events).await, None);
}

#[tokio::test]
async fn test_disconnect_before_connect() {
    let devices = FakeDevices::new();
    let (connector, _remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector.clone());

    session.disconnect().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(devices.outputs_opened.load(Ordering::SeqCst), 0);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reconnect_after_close() {
    let devices = FakeDevices::new();
    let (connector, _remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector.clone());

    let (observer, _events) = ChannelObserver::new();
    session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    let first_id = session.stats().session_id;
    session.disconnect().await;

    let (observer, _events) = ChannelObserver::new();
    session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    assert_ne!(session.stats().session_id, first_id);

    session.disconnect().await;
}

#[tokio::test]
async fn test_audio_is_scheduled_back_to_back() {
    let devices = FakeDevices::new();
    let (connector, mut remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector);
    let (observer, _events) = ChannelObserver::new();

    session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    let remote = remotes.recv().await.unwrap();

    devices.set_clock(1.0);

    // 2400 samples at 24kHz is 100ms each
    for _ in 0..3 {
        remote
            .send_json(&format!(
                r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}]}}}}}}"#,
                silent_audio(2400)
            ))
            .await;
    }

    assert!(wait_until(|| session.stats().audio_chunks_received == 3).await);

    let starts: Vec<f64> = devices.scheduled().iter().map(|(_, start, _)| *start).collect();
    assert_eq!(starts.len(), 3);
    assert!((starts[0] - 1.0).abs() < 1e-9);
    assert!((starts[1] - 1.1).abs() < 1e-9);
    assert!((starts[2] - 1.2).abs() < 1e-9);

    session.disconnect().await;
}

#[tokio::test]
async fn test_interrupt_stops_playback_and_discards_ai_text() {
    let devices = FakeDevices::new();
    let (connector, mut remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector);
    let (observer, mut events) = ChannelObserver::new();

    session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    let remote = remotes.recv().await.unwrap();

    remote
        .send_json(&format!(
            r#"{{"serverContent":{{"outputTranscription":{{"text":"Let me explain"}},"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}},{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}]}}}}}}"#,
            silent_audio(24000),
            silent_audio(24000)
        ))
        .await;
    assert_eq!(
        next_event(&mut events).await,
        Some(transcript("", "Let me explain"))
    );
    assert!(wait_until(|| devices.scheduled().len() == 2).await);

    remote
        .send_json(r#"{"serverContent":{"interrupted":true}}"#)
        .await;
    assert_eq!(next_event(&mut events).await, Some(transcript("", "")));

    let mut stopped = devices.stopped();
    stopped.sort_unstable();
    let mut scheduled: Vec<u64> = devices.scheduled().iter().map(|(id, _, _)| *id).collect();
    scheduled.sort_unstable();
    assert_eq!(stopped, scheduled);

    // Nothing left to finalize, so no turn is reported
    remote
        .send_json(r#"{"serverContent":{"turnComplete":true}}"#)
        .await;
    remote
        .send_json(r#"{"serverContent":{"inputTranscription":{"text":"Sorry"}}}"#)
        .await;
    assert_eq!(next_event(&mut events).await, Some(transcript("Sorry", "")));

    // After the barge-in the next chunk starts now, not after the dropped audio
    devices.set_clock(0.25);
    remote
        .send_json(&format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"data":"{}"}}}}]}}}}}}"#,
            silent_audio(240)
        ))
        .await;
    assert!(wait_until(|| devices.scheduled().len() == 3).await);
    let (_, start, _) = devices.scheduled()[2];
    assert!((start - 0.25).abs() < 1e-9);

    assert_eq!(session.stats().interruptions, 1);
    assert_eq!(session.stats().turns_completed, 0);

    session.disconnect().await;
}

#[tokio::test]
async fn test_malformed_audio_keeps_session_open() {
    let devices = FakeDevices::new();
    let (connector, mut remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector);
    let (observer, mut events) = ChannelObserver::new();

    session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    let remote = remotes.recv().await.unwrap();

    // Invalid base64, then an odd-length payload, then text instead of audio
    remote
        .send_json(r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"!!!"}}]}}}"#)
        .await;
    remote
        .send_json(r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"AAAA"}}]}}}"#)
        .await;
    remote
        .send_json(r#"{"serverContent":{"modelTurn":{"parts":[{"text":"no audio here"}]}}}"#)
        .await;
    remote
        .send_json(r#"{"serverContent":{"inputTranscription":{"text":"still here"}}}"#)
        .await;

    assert_eq!(next_event(&mut events).await, Some(transcript("still here", "")));
    assert_eq!(session.state(), SessionState::Open);

    // "AAAA" is three bytes: one whole sample survives
    let scheduled = devices.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert!((scheduled[0].2 - 1.0 / 24000.0).abs() < 1e-12);

    session.disconnect().await;
}

#[tokio::test]
async fn test_connect_failure_releases_devices() {
    let devices = FakeDevices::new();
    let (connector, _remotes) = FakeConnector::new();
    connector.fail.store(true, Ordering::SeqCst);
    let session = LiveSession::new(devices.clone(), connector);
    let (observer, mut events) = ChannelObserver::new();

    let err = session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Transport(_)));
    assert!(devices.input_stopped());
    assert!(devices.output_closed());
    assert_eq!(session.state(), SessionState::Closed);

    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Error { .. })
    ));
    assert_eq!(next_event(&mut events).await, None);
}

#[tokio::test]
async fn test_microphone_failure_is_device_error() {
    let devices = FakeDevices::new();
    devices.fail_input.store(true, Ordering::SeqCst);
    let (connector, _remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector.clone());
    let (observer, mut events) = ChannelObserver::new();

    let err = session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Device(_)));
    assert!(devices.output_closed());
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Error { .. })
    ));

    // The user can retry once the device is back
    devices.fail_input.store(false, Ordering::SeqCst);
    let (observer, _events) = ChannelObserver::new();
    session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Open);
    session.disconnect().await;
}

#[tokio::test]
async fn test_remote_close_notifies_once() {
    let devices = FakeDevices::new();
    let (connector, mut remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector);
    let (observer, mut events) = ChannelObserver::new();

    session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    let remote = remotes.recv().await.unwrap();

    remote
        .send_event(TransportEvent::Closed(Some("session expired".to_string())))
        .await;

    assert_eq!(next_event(&mut events).await, Some(SessionEvent::Closed));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(devices.input_stopped());
    assert!(devices.output_closed());

    session.disconnect().await;
    assert_eq!(next_event(&mut events).await, None);
}

#[tokio::test]
async fn test_remote_error_notifies_once() {
    let devices = FakeDevices::new();
    let (connector, mut remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector);
    let (observer, mut events) = ChannelObserver::new();

    session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    let remote = remotes.recv().await.unwrap();

    remote
        .send_event(TransportEvent::Error("connection reset".to_string()))
        .await;

    match next_event(&mut events).await {
        Some(SessionEvent::Error { message }) => assert!(message.contains("connection reset")),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(next_event(&mut events).await, None);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(devices.input_stopped());
    assert!(devices.output_closed());
}

#[tokio::test]
async fn test_video_frames_only_while_open() {
    let devices = FakeDevices::new();
    let (connector, mut remotes) = FakeConnector::new();
    let session = LiveSession::new(devices, connector);
    let (observer, _events) = ChannelObserver::new();

    assert!(!session.send_video_frame(&[0xFF, 0xD8, 0xFF]));

    session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    let mut remote = remotes.recv().await.unwrap();

    assert!(session.send_video_frame(&[0xFF, 0xD8, 0xFF]));
    match remote.next_non_audio().await {
        Some(Outgoing::Message(msg)) => {
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(json["realtimeInput"]["mediaChunks"][0]["mimeType"], "image/jpeg");
            assert_eq!(json["realtimeInput"]["mediaChunks"][0]["data"], "/9j/");
        }
        other => panic!("expected video frame, got {:?}", other),
    }
    assert_eq!(session.stats().video_frames_sent, 1);

    session.disconnect().await;
    assert!(!session.send_video_frame(&[0xFF, 0xD8, 0xFF]));
}

#[tokio::test]
async fn test_microphone_audio_is_streamed() {
    let devices = FakeDevices::new();
    let (connector, mut remotes) = FakeConnector::new();
    let session = LiveSession::new(devices.clone(), connector);
    let (observer, _events) = ChannelObserver::new();

    session
        .connect(LiveSessionConfig::default(), Arc::new(observer))
        .await
        .unwrap();
    let mut remote = remotes.recv().await.unwrap();

    assert!(devices.push_frame(vec![0.5; 4096]));

    let sent = tokio::time::timeout(Duration::from_secs(2), remote.outgoing.recv())
        .await
        .unwrap()
        .unwrap();
    match sent {
        Outgoing::Message(msg) => {
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(
                json["realtimeInput"]["mediaChunks"][0]["mimeType"],
                "audio/pcm;rate=16000"
            );
        }
        Outgoing::Close => panic!("unexpected close"),
    }

    assert!(wait_until(|| session.stats().audio_chunks_sent == 1).await);
    session.disconnect().await;
}
