//! Integration tests for the push-to-talk flow.
//!
//! Exercises the full path a dispatch console sees: sessions open,
//! channels joined, tokens granted and denied, audio fanned out, and the
//! transmission record finalized with its transcription.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use dispatch_controller::actors::{DispatchActor, DispatchActorHandle, Outbound};
use dispatch_controller::config::Config;
use dispatch_controller::errors::DcError;
use dispatch_controller::history::HistoryStore;
use dispatch_controller::transcription::{OfflineTranscriber, TranscriptionAdapter};
use dispatch_protocol::frame::AudioFrame;
use dispatch_protocol::messages::ServerMessage;
use dispatch_protocol::types::{AlertType, ReleaseReason, TranscriptionStatus, TransmissionToken};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct TestRig {
    dispatch: DispatchActorHandle,
    history: Arc<HistoryStore>,
    cancel: CancellationToken,
}

fn spawn_rig() -> TestRig {
    let mut vars = HashMap::new();
    vars.insert("DC_ID".to_string(), "dc-test-001".to_string());
    let config = Config::from_vars(&vars).unwrap();

    let cancel = CancellationToken::new();
    let history = Arc::new(HistoryStore::new());
    let transcription = TranscriptionAdapter::spawn(
        OfflineTranscriber,
        Arc::clone(&history),
        cancel.child_token(),
    );
    let (dispatch, _task) = DispatchActor::spawn(
        &config,
        Arc::clone(&history),
        transcription,
        cancel.clone(),
    );

    TestRig {
        dispatch,
        history,
        cancel,
    }
}

async fn open_session(rig: &TestRig, user: &str) -> (String, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(128);
    let opened = rig
        .dispatch
        .open_session(user.to_string(), user.to_string(), tx)
        .await
        .unwrap();
    (opened.session_id, rx)
}

fn frame(token: &TransmissionToken, payload: &'static [u8]) -> AudioFrame {
    AudioFrame {
        version: AudioFrame::VERSION,
        token_id: token.token_id,
        sequence: 0,
        timestamp_us: 1_700_000_000_000_000,
        channel_id: token.channel_id.clone(),
        payload: Bytes::from_static(payload),
    }
}

/// Wait for the next control message, skipping audio.
async fn next_control(rx: &mut mpsc::Receiver<Outbound>) -> ServerMessage {
    loop {
        match rx.recv().await.expect("channel closed") {
            Outbound::Control(msg) => return msg,
            Outbound::Audio(_) => {}
        }
    }
}

#[tokio::test]
async fn full_transmission_cycle() {
    let rig = spawn_rig();

    let (unit_a, _rx_a) = open_session(&rig, "unit-a").await;
    let (unit_b, mut rx_b) = open_session(&rig, "unit-b").await;
    let (dispatcher, mut rx_d) = open_session(&rig, "dispatcher-1").await;

    let channel = rig
        .dispatch
        .join_channel(unit_a.clone(), "ops-1".to_string())
        .await
        .unwrap();
    rig.dispatch
        .join_channel(unit_b.clone(), "ops-1".to_string())
        .await
        .unwrap();
    rig.dispatch
        .join_channel(dispatcher.clone(), "ops-1".to_string())
        .await
        .unwrap();

    // Unit A wins the channel
    let token = channel.request_transmission(unit_a.clone()).await.unwrap();

    // Everyone else is told who is talking
    let started = next_control(&mut rx_b).await;
    let ServerMessage::TransmissionStarted {
        user_id, sequence, ..
    } = started
    else {
        panic!("expected transmission-started, got {started:?}");
    };
    assert_eq!(user_id, "unit-a");
    assert_eq!(sequence, token.sequence);

    // Unit B is denied while A holds the token, and is told who holds it
    let denied = channel.request_transmission(unit_b.clone()).await;
    let Err(DcError::ChannelBusy { current_holder }) = denied else {
        panic!("expected channel busy");
    };
    assert_eq!(current_holder, "unit-a");

    // A's audio reaches B and the dispatcher with increasing sequence
    channel.relay_frame(unit_a.clone(), frame(&token, b"frame-1"));
    channel.relay_frame(unit_a.clone(), frame(&token, b"frame-2"));

    let mut last_seq = token.sequence;
    for _ in 0..2 {
        let audio = loop {
            match rx_d.recv().await.unwrap() {
                Outbound::Audio(f) => break f,
                Outbound::Control(_) => {}
            }
        };
        assert!(audio.sequence > last_seq, "sequence must increase");
        last_seq = audio.sequence;
        // Listeners never see the live capability id
        assert!(audio.token_id.is_nil());
    }

    // A stops; exactly one transmission-ended lands on the channel
    channel
        .release(token.token_id, ReleaseReason::ExplicitStop)
        .await
        .unwrap();

    let ended = loop {
        match next_control(&mut rx_b).await {
            ServerMessage::TransmissionEnded {
                transmission_id,
                reason,
                sequence,
                ..
            } => break (transmission_id, reason, sequence),
            _ => {}
        }
    };
    assert_eq!(ended.0, token.token_id);
    assert_eq!(ended.1, ReleaseReason::ExplicitStop);
    assert!(ended.2 > last_seq);

    // The transcription lands afterwards, in channel order
    let update = loop {
        match next_control(&mut rx_b).await {
            ServerMessage::TranscriptionUpdate {
                transmission_id,
                sequence,
                ..
            } => break (transmission_id, sequence),
            _ => {}
        }
    };
    assert_eq!(update.0, token.token_id);
    assert!(update.1 > ended.2);

    // History holds the finalized, transcribed record
    let record = rig.history.get_transmission(token.token_id).await.unwrap();
    assert_eq!(record.user_id, "unit-a");
    assert_eq!(record.release_reason, Some(ReleaseReason::ExplicitStop));
    assert_eq!(record.transcription_status, TranscriptionStatus::Complete);

    // The channel is free again: B gets the token now
    let token_b = channel.request_transmission(unit_b).await.unwrap();
    assert!(token_b.sequence > token.sequence);

    rig.cancel.cancel();
}

#[tokio::test]
async fn alert_interleaves_with_transmission_in_channel_order() {
    let rig = spawn_rig();

    let (unit_a, _rx_a) = open_session(&rig, "unit-a").await;
    let (unit_b, mut rx_b) = open_session(&rig, "unit-b").await;

    let channel = rig
        .dispatch
        .join_channel(unit_a.clone(), "ops-1".to_string())
        .await
        .unwrap();
    rig.dispatch
        .join_channel(unit_b.clone(), "ops-1".to_string())
        .await
        .unwrap();

    let token = channel.request_transmission(unit_a.clone()).await.unwrap();
    channel.relay_frame(unit_a.clone(), frame(&token, b"mid-transmission"));

    // An alert raised mid-transmission is stamped into the same order
    rig.dispatch
        .raise_alert(
            unit_a,
            Some("ops-1".to_string()),
            AlertType::BackupRequest,
            "backup at 5th and Main".to_string(),
        )
        .await
        .unwrap();

    let mut frame_seq = None;
    let mut alert_seq = None;
    while alert_seq.is_none() {
        match rx_b.recv().await.unwrap() {
            Outbound::Audio(f) => frame_seq = Some(f.sequence),
            Outbound::Control(ServerMessage::AlertRaised { sequence, .. }) => {
                alert_seq = sequence;
            }
            Outbound::Control(_) => {}
        }
    }
    let frame_seq = frame_seq.expect("frame should precede the alert");
    assert!(alert_seq.unwrap() > frame_seq);

    rig.cancel.cancel();
}

#[tokio::test]
async fn emergency_console_flow() {
    let rig = spawn_rig();

    let (unit, mut rx_unit) = open_session(&rig, "unit-7").await;
    let (console, mut rx_console) = open_session(&rig, "dispatcher-1").await;

    // Global alert: no channel membership anywhere, everyone still hears it
    let alert = rig
        .dispatch
        .raise_alert(
            unit.clone(),
            None,
            AlertType::OfficerDown,
            "officer down, unit 7 location".to_string(),
        )
        .await
        .unwrap();

    for rx in [&mut rx_unit, &mut rx_console] {
        let msg = next_control(rx).await;
        let ServerMessage::AlertRaised {
            alert_id, sequence, ..
        } = msg
        else {
            panic!("expected alert-raised, got {msg:?}");
        };
        assert_eq!(alert_id, alert.alert_id);
        assert!(sequence.is_none());
    }

    // Console acknowledges, then resolves
    rig.dispatch
        .acknowledge_alert(console.clone(), alert.alert_id)
        .await
        .unwrap();
    let ack = next_control(&mut rx_unit).await;
    assert!(matches!(ack, ServerMessage::AlertAcknowledged { .. }));

    rig.dispatch
        .resolve_alert(console, alert.alert_id, "unit recovered".to_string())
        .await
        .unwrap();
    let resolved = next_control(&mut rx_unit).await;
    let ServerMessage::AlertResolved { notes, .. } = resolved else {
        panic!("expected alert-resolved");
    };
    assert_eq!(notes, "unit recovered");

    // Full lifecycle is on record
    let stored = rig.history.get_alert(alert.alert_id).await.unwrap();
    assert_eq!(stored.resolved_by.as_deref(), Some("dispatcher-1"));

    rig.cancel.cancel();
}

#[tokio::test]
async fn channels_arbitrate_independently() {
    let rig = spawn_rig();

    let (unit_a, _rx_a) = open_session(&rig, "unit-a").await;
    let (unit_b, _rx_b) = open_session(&rig, "unit-b").await;

    let ops1 = rig
        .dispatch
        .join_channel(unit_a.clone(), "ops-1".to_string())
        .await
        .unwrap();
    let ops2 = rig
        .dispatch
        .join_channel(unit_b.clone(), "ops-2".to_string())
        .await
        .unwrap();

    // Busy on ops-1 does not affect ops-2
    ops1.request_transmission(unit_a).await.unwrap();
    ops2.request_transmission(unit_b).await.unwrap();

    rig.cancel.cancel();
}
