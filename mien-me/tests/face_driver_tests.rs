// Face driver behaviour over paused tokio time

use mien_core::{
    AvatarState, ConnectionState, Expression, MienConfig, PresenceSignal, ServerMessage,
};
use mien_link::PresenceSnapshot;
use mien_me::{FaceDriver, FaceHandle, FaceSources, TransportRequest};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::advance;
use tokio_test::assert_ok;

struct Rig {
    handle: FaceHandle,
    join: JoinHandle<()>,
    transport: watch::Sender<ConnectionState>,
    server: mpsc::UnboundedSender<ServerMessage>,
    presence: watch::Sender<PresenceSnapshot>,
    loudness: watch::Sender<bool>,
    requests: mpsc::UnboundedReceiver<TransportRequest>,
}

impl Rig {
    fn state(&self) -> AvatarState {
        self.handle.state()
    }

    fn expression(&self) -> Expression {
        self.state().expression
    }

    fn set_transport(&self, state: ConnectionState) {
        self.transport.send_replace(state);
    }

    fn set_present(&self, present: bool) {
        self.presence.send_replace(snapshot(present));
    }

    fn server(&self, json: &str) {
        let message = ServerMessage::parse(json).expect("test message must decode");
        assert_ok!(self.server.send(message));
    }
}

fn snapshot(present: bool) -> PresenceSnapshot {
    PresenceSnapshot {
        is_connected: true,
        signal: Some(PresenceSignal::new(present, u32::from(present))),
    }
}

fn rig_with(config: MienConfig) -> Rig {
    let (transport, transport_rx) = watch::channel(ConnectionState::Disconnected);
    let (server, server_rx) = mpsc::unbounded_channel();
    let (presence, presence_rx) = watch::channel(PresenceSnapshot::default());
    let (loudness, loudness_rx) = watch::channel(false);
    let (requests_tx, requests) = mpsc::unbounded_channel();

    let sources = FaceSources::new()
        .with_transport(transport_rx)
        .with_server_messages(server_rx)
        .with_presence(presence_rx)
        .with_loudness(loudness_rx)
        .with_transport_control(requests_tx);
    let (handle, join) =
        FaceDriver::spawn_with_rng(&config, sources, StdRng::seed_from_u64(0xFACE));

    Rig {
        handle,
        join,
        transport,
        server,
        presence,
        loudness,
        requests,
    }
}

fn rig() -> Rig {
    rig_with(MienConfig::default())
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time in small steps so every timer gets to run
async fn run_for(duration: Duration) {
    let step = Duration::from_millis(10);
    let mut elapsed = Duration::ZERO;
    while elapsed < duration {
        advance(step).await;
        settle().await;
        elapsed += step;
    }
}

#[tokio::test(start_paused = true)]
async fn test_initial_values_cause_no_transition() {
    let rig = rig();
    settle().await;

    // Disconnected with nobody present would mean sleeping if it were applied
    assert_eq!(rig.expression(), Expression::Resting);
    assert!(!rig.state().showing_text);
}

#[tokio::test(start_paused = true)]
async fn test_arrival_right_after_spawn_is_not_lost() {
    let rig = rig();
    // No yield since spawn: the presence forwarder has not run yet
    rig.set_present(true);
    settle().await;
    assert_eq!(rig.expression(), Expression::Kawaii);
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_change_right_after_spawn_is_not_lost() {
    let rig = rig();
    rig.set_transport(ConnectionState::Connecting);
    settle().await;
    assert_eq!(rig.expression(), Expression::Kawaii);

    rig.set_transport(ConnectionState::Ready);
    settle().await;
    assert_eq!(rig.expression(), Expression::Thinking);
}

#[tokio::test(start_paused = true)]
async fn test_loud_audio_right_after_spawn_is_not_lost() {
    let rig = rig();
    assert_ok!(rig.handle.set_talking(true));
    rig.loudness.send_replace(true);
    settle().await;
    assert!(rig.state().mouth_moving());
}

#[tokio::test(start_paused = true)]
async fn test_connecting_then_connected() {
    let rig = rig();
    settle().await;

    rig.set_transport(ConnectionState::Connecting);
    settle().await;
    assert_eq!(rig.expression(), Expression::Kawaii);

    rig.set_transport(ConnectionState::Connected);
    settle().await;
    assert_eq!(rig.expression(), Expression::Kawaii);

    rig.server(r#"{"event":"bot_started_speaking"}"#);
    settle().await;
    assert_eq!(rig.expression(), Expression::Resting);
    assert!(rig.state().talking);

    rig.set_transport(ConnectionState::Ready);
    settle().await;
    assert_eq!(rig.expression(), Expression::Thinking);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_sleeps_when_nobody_is_present() {
    let rig = rig();
    rig.set_transport(ConnectionState::Ready);
    settle().await;
    assert_eq!(rig.expression(), Expression::Thinking);

    rig.set_transport(ConnectionState::Disconnected);
    settle().await;
    assert_eq!(rig.expression(), Expression::Sleeping);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_rests_without_presence_detection() {
    let mut config = MienConfig::default();
    config.presence.detection_enabled = false;
    let rig = rig_with(config);

    rig.set_transport(ConnectionState::Connecting);
    settle().await;
    rig.set_transport(ConnectionState::Disconnected);
    settle().await;
    assert_eq!(rig.expression(), Expression::Resting);
}

#[tokio::test(start_paused = true)]
async fn test_arrival_greets_then_resets_after_three_seconds() {
    let rig = rig();
    settle().await;

    rig.set_present(true);
    settle().await;
    assert_eq!(rig.expression(), Expression::Kawaii);

    run_for(Duration::from_millis(2900)).await;
    assert_eq!(rig.expression(), Expression::Kawaii);

    run_for(Duration::from_millis(200)).await;
    assert_eq!(rig.expression(), Expression::Resting);
}

#[tokio::test(start_paused = true)]
async fn test_departure_sleeps_and_never_blinks() {
    let rig = rig();
    rig.set_present(true);
    settle().await;
    rig.set_present(false);
    settle().await;
    assert_eq!(rig.expression(), Expression::Sleeping);

    let mut elapsed = Duration::ZERO;
    while elapsed < Duration::from_secs(30) {
        run_for(Duration::from_millis(50)).await;
        elapsed += Duration::from_millis(50);
        let state = rig.state();
        assert_eq!(state.expression, Expression::Sleeping);
        assert!(!state.is_blinking, "blinked while sleeping at {:?}", elapsed);
    }
}

#[tokio::test(start_paused = true)]
async fn test_nervous_then_arrival_restarts_reset_timer() {
    let rig = rig();
    settle().await;

    rig.server(r#"{"event":"expression_change","data":{"expression":"nervous"}}"#);
    settle().await;
    assert_eq!(rig.expression(), Expression::Nervous);

    run_for(Duration::from_secs(2)).await;
    rig.set_present(true);
    settle().await;
    assert_eq!(rig.expression(), Expression::Kawaii);

    // The nervous reset would have fired here
    run_for(Duration::from_millis(1500)).await;
    assert_eq!(rig.expression(), Expression::Kawaii);

    run_for(Duration::from_millis(1600)).await;
    assert_eq!(rig.expression(), Expression::Resting);
}

#[tokio::test(start_paused = true)]
async fn test_second_expression_change_restarts_reset() {
    let rig = rig();
    settle().await;

    rig.server(r#"{"event":"expression_change","data":{"expression":"nervous"}}"#);
    settle().await;
    run_for(Duration::from_secs(1)).await;
    rig.server(r#"{"event":"expression_change","data":{"expression":"kawaii"}}"#);
    settle().await;

    run_for(Duration::from_millis(2900)).await;
    assert_eq!(rig.expression(), Expression::Kawaii);
    run_for(Duration::from_millis(200)).await;
    assert_eq!(rig.expression(), Expression::Resting);
}

#[tokio::test(start_paused = true)]
async fn test_hide_cancels_pending_auto_hide() {
    let rig = rig();
    settle().await;

    assert_ok!(rig.handle.show_text("hello", Some(2.0)));
    settle().await;
    run_for(Duration::from_millis(500)).await;
    assert_ok!(rig.handle.hide_text());
    settle().await;
    assert!(!rig.state().showing_text);

    // A new caption shown after the hide must survive the old 2 s deadline
    assert_ok!(rig.handle.show_text("later", None));
    settle().await;
    run_for(Duration::from_secs(3)).await;
    assert_eq!(rig.state().visible_text(), Some("later"));
}

#[tokio::test(start_paused = true)]
async fn test_server_messages_apply_in_order() {
    let rig = rig();
    settle().await;

    rig.server(r#"{"event":"user_started_speaking"}"#);
    rig.server(r#"{"event":"user_stopped_speaking"}"#);
    rig.server(r#"{"event":"bot_started_speaking"}"#);
    settle().await;

    let state = rig.state();
    assert_eq!(state.expression, Expression::Resting);
    assert!(state.talking);

    // bot_started_speaking cancelled the thinking reset
    run_for(Duration::from_secs(4)).await;
    assert_eq!(rig.expression(), Expression::Resting);

    rig.server(r#"{"event":"bot_stopped_speaking"}"#);
    settle().await;
    assert!(!rig.state().talking);
}

#[tokio::test(start_paused = true)]
async fn test_show_text_then_hide() {
    let rig = rig();
    settle().await;

    rig.server(r#"{"event":"show_text","data":{"text":"hello","duration":2}}"#);
    settle().await;
    assert_eq!(rig.state().visible_text(), Some("hello"));

    run_for(Duration::from_millis(2100)).await;
    let state = rig.state();
    assert!(!state.showing_text);
    assert_eq!(state.display_text, "hello");

    assert_ok!(rig.handle.show_text("again", None));
    settle().await;
    run_for(Duration::from_secs(10)).await;
    assert_eq!(rig.state().visible_text(), Some("again"));

    rig.server(r#"{"event":"hide_text"}"#);
    settle().await;
    let state = rig.state();
    assert!(!state.showing_text);
    assert!(state.display_text.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_loudness_only_moves_the_mouth() {
    let rig = rig();
    assert_ok!(rig.handle.set_expression(Expression::Thinking));
    assert_ok!(rig.handle.set_talking(true));
    settle().await;

    rig.loudness.send_replace(true);
    settle().await;
    let state = rig.state();
    assert!(state.is_loud);
    assert!(state.mouth_moving());
    assert_eq!(state.expression, Expression::Thinking);

    rig.loudness.send_replace(false);
    settle().await;
    assert!(!rig.state().mouth_moving());
}

#[tokio::test(start_paused = true)]
async fn test_idle_face_blinks() {
    let rig = rig();
    let mut saw_blink = false;
    let mut elapsed = Duration::ZERO;
    while elapsed < Duration::from_secs(12) && !saw_blink {
        run_for(Duration::from_millis(10)).await;
        elapsed += Duration::from_millis(10);
        saw_blink = rig.state().is_blinking;
    }
    assert!(saw_blink, "no blink within 12s");

    run_for(Duration::from_millis(200)).await;
    assert!(!rig.state().is_blinking);
}

#[tokio::test(start_paused = true)]
async fn test_presence_requests_transport_changes() {
    let mut rig = rig();
    settle().await;

    rig.set_present(true);
    settle().await;
    assert_eq!(rig.requests.try_recv().ok(), Some(TransportRequest::Connect));

    rig.set_transport(ConnectionState::Connecting);
    settle().await;
    rig.set_transport(ConnectionState::Ready);
    settle().await;

    rig.set_present(false);
    settle().await;
    assert_eq!(rig.requests.try_recv().ok(), Some(TransportRequest::Disconnect));
    assert!(rig.requests.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_manual_controls() {
    let rig = rig();
    settle().await;

    assert_ok!(rig.handle.set_presence_detection(false));
    rig.set_present(true);
    settle().await;
    assert_eq!(rig.expression(), Expression::Resting);

    // Turning detection back on sees the arrival
    assert_ok!(rig.handle.set_presence_detection(true));
    settle().await;
    assert_eq!(rig.expression(), Expression::Kawaii);

    assert_ok!(rig.handle.set_expression(Expression::Laughing));
    settle().await;
    run_for(Duration::from_secs(5)).await;
    assert_eq!(rig.expression(), Expression::Laughing);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_everything() {
    let rig = rig();
    rig.server(r#"{"event":"user_stopped_speaking"}"#);
    rig.server(r#"{"event":"show_text","data":{"text":"bye","duration":1}}"#);
    settle().await;

    assert_ok!(rig.handle.shutdown());
    assert_ok!(rig.join.await);
    assert!(rig.handle.is_closed());

    let frozen = rig.handle.state();
    rig.transport.send_replace(ConnectionState::Connecting);
    let _ = rig.server.send(ServerMessage::BotStartedSpeaking);
    run_for(Duration::from_secs(5)).await;

    assert_eq!(rig.handle.state(), frozen);
    assert!(!frozen.is_blinking);
    assert!(rig.handle.set_talking(true).is_err());
    // Forwarders are gone, so nobody holds the receiving ends any more
    assert!(rig.server.is_closed());
    assert_eq!(rig.transport.receiver_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_every_handle_stops_the_driver() {
    let Rig { handle, join, .. } = rig();
    settle().await;
    drop(handle);
    assert_ok!(join.await);
}
