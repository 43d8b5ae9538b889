//! Face driver - the single owner of [`AvatarState`]
//!
//! Every source (transport lifecycle, server messages, presence, loudness)
//! and every debug command is funnelled through one queue into a task that
//! owns the [`ExpressionMachine`] and its timers. Sources are attached by
//! forwarder tasks holding only weak senders, so nothing but a
//! [`FaceHandle`] keeps the driver alive. The resulting state is published on
//! a watch channel.

use crate::error::FaceError;
use crate::machine::{ExpressionMachine, FaceInput, MachineOptions, TransportRequest};
use mien_core::{
    AvatarState, ConnectionState, Expression, MienConfig, ServerMessage, TimerFired, TimerSlot,
    TimerTable,
};
use mien_link::{PresenceSnapshot, PresenceSource};
use mien_sc::{AudioTrack, LoudnessMonitor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum Command {
    Apply(FaceInput),
    AttachTrack(Option<Arc<dyn AudioTrack>>),
    Shutdown,
}

/// Inputs the driver subscribes to. Every source is optional.
#[derive(Default)]
pub struct FaceSources {
    transport: Option<watch::Receiver<ConnectionState>>,
    server: Option<mpsc::UnboundedReceiver<ServerMessage>>,
    presence: Option<watch::Receiver<PresenceSnapshot>>,
    loudness: Option<watch::Receiver<bool>>,
    transport_control: Option<mpsc::UnboundedSender<TransportRequest>>,
    presence_source: Option<PresenceSource>,
    loudness_monitor: Option<LoudnessMonitor>,
}

impl FaceSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(mut self, rx: watch::Receiver<ConnectionState>) -> Self {
        self.transport = Some(rx);
        self
    }

    /// Server messages are applied strictly in arrival order
    pub fn with_server_messages(mut self, rx: mpsc::UnboundedReceiver<ServerMessage>) -> Self {
        self.server = Some(rx);
        self
    }

    pub fn with_presence(mut self, rx: watch::Receiver<PresenceSnapshot>) -> Self {
        self.presence = Some(rx);
        self
    }

    /// Subscribe to `source` and stop it when the driver shuts down
    pub fn with_presence_source(mut self, source: PresenceSource) -> Self {
        self.presence = Some(source.subscribe());
        self.presence_source = Some(source);
        self
    }

    pub fn with_loudness(mut self, rx: watch::Receiver<bool>) -> Self {
        self.loudness = Some(rx);
        self
    }

    /// Subscribe to `monitor`; tracks can then be swapped with
    /// [`FaceHandle::attach_track`]
    pub fn with_loudness_monitor(mut self, monitor: LoudnessMonitor) -> Self {
        self.loudness = Some(monitor.subscribe());
        self.loudness_monitor = Some(monitor);
        self
    }

    /// Where presence-driven connect/disconnect requests are sent
    pub fn with_transport_control(mut self, tx: mpsc::UnboundedSender<TransportRequest>) -> Self {
        self.transport_control = Some(tx);
        self
    }
}

/// Forwarder tasks, released exactly once
#[derive(Default)]
struct Subscriptions {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Subscriptions {
    fn add(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    fn release_all(&mut self) -> usize {
        let released = self.tasks.len();
        for (name, handle) in self.tasks.drain(..) {
            handle.abort();
            debug!("Released {} subscription", name);
        }
        released
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Cloneable control surface of a running driver
#[derive(Clone)]
pub struct FaceHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<AvatarState>,
}

impl FaceHandle {
    fn send(&self, command: Command) -> Result<(), FaceError> {
        self.commands.send(command).map_err(|_| FaceError::DriverGone)
    }

    /// Show `text`; hidden again after `duration` seconds when that is
    /// positive and finite
    pub fn show_text(&self, text: impl Into<String>, duration: Option<f64>) -> Result<(), FaceError> {
        let text = text.into();
        if text.is_empty() {
            return Err(FaceError::InvalidCommand("show_text needs non-empty text".to_string()));
        }
        self.send(Command::Apply(FaceInput::ShowText { text, duration }))
    }

    pub fn hide_text(&self) -> Result<(), FaceError> {
        self.send(Command::Apply(FaceInput::HideText))
    }

    /// Force an expression. It stays until something else changes it.
    pub fn set_expression(&self, expression: Expression) -> Result<(), FaceError> {
        self.send(Command::Apply(FaceInput::SetExpression(expression)))
    }

    pub fn set_talking(&self, talking: bool) -> Result<(), FaceError> {
        self.send(Command::Apply(FaceInput::SetTalking(talking)))
    }

    pub fn set_presence_detection(&self, enabled: bool) -> Result<(), FaceError> {
        self.send(Command::Apply(FaceInput::SetPresenceDetection(enabled)))
    }

    /// Swap the track sampled by the driver's loudness monitor
    pub fn attach_track(&self, track: Option<Arc<dyn AudioTrack>>) -> Result<(), FaceError> {
        self.send(Command::AttachTrack(track))
    }

    pub fn subscribe(&self) -> watch::Receiver<AvatarState> {
        self.state.clone()
    }

    pub fn state(&self) -> AvatarState {
        self.state.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Ask the driver to tear down. Await the join handle returned by
    /// [`FaceDriver::spawn`] to wait for it.
    pub fn shutdown(&self) -> Result<(), FaceError> {
        self.send(Command::Shutdown)
    }
}

pub struct FaceDriver<R = StdRng> {
    machine: ExpressionMachine<R>,
    timers: TimerTable<TimerSlot>,
    fired: mpsc::UnboundedReceiver<TimerFired<TimerSlot>>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<AvatarState>,
    subscriptions: Subscriptions,
    transport_control: Option<mpsc::UnboundedSender<TransportRequest>>,
    presence_source: Option<PresenceSource>,
    loudness_monitor: Option<LoudnessMonitor>,
}

impl FaceDriver<StdRng> {
    /// Start a driver over `sources`. Must be called from within a tokio
    /// runtime.
    pub fn spawn(config: &MienConfig, sources: FaceSources) -> (FaceHandle, JoinHandle<()>) {
        Self::spawn_with_rng(config, sources, StdRng::from_entropy())
    }
}

impl<R: Rng + Send + 'static> FaceDriver<R> {
    pub fn spawn_with_rng(
        config: &MienConfig,
        sources: FaceSources,
        rng: R,
    ) -> (FaceHandle, JoinHandle<()>) {
        let options = MachineOptions::new(&config.face, config.presence.detection_enabled)
            .with_auto_connect_on_presence(config.presence.auto_connect_on_presence);
        let mut machine = ExpressionMachine::new(options, rng);
        let (mut timers, fired) = TimerTable::new();
        let (command_tx, commands) = mpsc::unbounded_channel();

        let FaceSources {
            mut transport,
            server,
            mut presence,
            mut loudness,
            transport_control,
            presence_source,
            loudness_monitor,
        } = sources;

        // Values already current at startup are context, not transitions
        let lifecycle = transport.as_mut().map(|rx| *rx.borrow_and_update());
        let present = presence
            .as_mut()
            .map(|rx| rx.borrow_and_update().is_present())
            .unwrap_or(false);
        machine.seed(lifecycle, present);
        let loud = loudness.as_mut().map(|rx| *rx.borrow_and_update());
        if let Some(loud) = loud {
            machine.apply(FaceInput::Loudness(loud), &mut timers);
        }

        let mut subscriptions = Subscriptions::default();
        let weak = command_tx.downgrade();
        // Forwarders compare against the seeded values, so a change landing
        // before their first poll is still forwarded
        if let (Some(rx), Some(seeded)) = (transport, lifecycle) {
            subscriptions.add(
                "transport",
                tokio::spawn(forward_watch(
                    rx,
                    FaceInput::Transport(seeded),
                    weak.clone(),
                    |state| FaceInput::Transport(*state),
                )),
            );
        }
        if let Some(rx) = presence {
            subscriptions.add(
                "presence",
                tokio::spawn(forward_watch(
                    rx,
                    FaceInput::Presence(present),
                    weak.clone(),
                    |snapshot| FaceInput::Presence(snapshot.is_present()),
                )),
            );
        }
        if let (Some(rx), Some(seeded)) = (loudness, loud) {
            subscriptions.add(
                "loudness",
                tokio::spawn(forward_watch(
                    rx,
                    FaceInput::Loudness(seeded),
                    weak.clone(),
                    |loud| FaceInput::Loudness(*loud),
                )),
            );
        }
        if let Some(rx) = server {
            subscriptions.add("server", tokio::spawn(forward_messages(rx, weak)));
        }

        let (state, state_rx) = watch::channel(machine.state().clone());
        let driver = Self {
            machine,
            timers,
            fired,
            commands,
            state,
            subscriptions,
            transport_control,
            presence_source,
            loudness_monitor,
        };
        let join = tokio::spawn(driver.run());

        let handle = FaceHandle {
            commands: command_tx,
            state: state_rx,
        };
        (handle, join)
    }

    async fn run(mut self) {
        info!(
            "Face driver started with {} subscription(s)",
            self.subscriptions.tasks.len()
        );
        self.machine.start(&mut self.timers);
        self.publish();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Apply(input)) => self.apply(input),
                    Some(Command::AttachTrack(track)) => self.attach_track(track),
                    Some(Command::Shutdown) | None => break,
                },
                Some(fired) = self.fired.recv() => {
                    if self.timers.take(&fired) {
                        self.machine.on_timer(fired.slot, &mut self.timers);
                        self.publish();
                    }
                }
            }
        }

        self.teardown().await;
    }

    fn apply(&mut self, input: FaceInput) {
        if let Some(request) = self.machine.apply(input, &mut self.timers) {
            self.request_transport(request);
        }
        self.publish();
    }

    fn request_transport(&self, request: TransportRequest) {
        match &self.transport_control {
            Some(tx) => {
                info!("Requesting transport {:?}", request);
                if tx.send(request).is_err() {
                    warn!("Transport control receiver is gone, dropping {:?}", request);
                }
            }
            None => debug!("No transport control attached, ignoring {:?}", request),
        }
    }

    fn attach_track(&mut self, track: Option<Arc<dyn AudioTrack>>) {
        match self.loudness_monitor.as_mut() {
            Some(monitor) => monitor.attach(track),
            None => warn!("No loudness monitor attached, ignoring track change"),
        }
    }

    fn publish(&self) {
        let current = self.machine.state();
        self.state.send_if_modified(|published| {
            if published == current {
                false
            } else {
                *published = current.clone();
                true
            }
        });
    }

    async fn teardown(&mut self) {
        let released = self.subscriptions.release_all();
        self.machine.shutdown(&mut self.timers);
        self.timers.cancel_all();

        if let Some(source) = self.presence_source.take() {
            source.stop().await;
        }
        if let Some(mut monitor) = self.loudness_monitor.take() {
            monitor.stop();
        }

        self.publish();
        info!("Face driver stopped ({} subscription(s) released)", released);
    }
}

/// Forward changes of a watched source, skipping values equal to the last
/// one forwarded. `last` is the value the machine was seeded with.
async fn forward_watch<T, F>(
    mut rx: watch::Receiver<T>,
    mut last: FaceInput,
    commands: mpsc::WeakUnboundedSender<Command>,
    to_input: F,
) where
    T: Send + Sync + 'static,
    F: Fn(&T) -> FaceInput + Send + 'static,
{
    while rx.changed().await.is_ok() {
        let input = to_input(&*rx.borrow_and_update());
        if input == last {
            continue;
        }
        last = input.clone();

        let Some(tx) = commands.upgrade() else {
            break;
        };
        if tx.send(Command::Apply(input)).is_err() {
            break;
        }
    }
}

async fn forward_messages(
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
    commands: mpsc::WeakUnboundedSender<Command>,
) {
    while let Some(message) = rx.recv().await {
        let Some(tx) = commands.upgrade() else {
            break;
        };
        if tx.send(Command::Apply(FaceInput::Server(message))).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriptions_release_once() {
        let mut subs = Subscriptions::default();
        subs.add("a", tokio::spawn(std::future::pending::<()>()));
        subs.add("b", tokio::spawn(std::future::pending::<()>()));
        assert_eq!(subs.release_all(), 2);
        assert_eq!(subs.release_all(), 0);
    }

    #[tokio::test]
    async fn test_show_text_rejects_empty_text() {
        let (handle, join) = FaceDriver::spawn_with_rng(
            &MienConfig::default(),
            FaceSources::new(),
            StdRng::seed_from_u64(1),
        );
        assert!(matches!(
            handle.show_text("", Some(1.0)),
            Err(FaceError::InvalidCommand(_))
        ));
        handle.shutdown().unwrap();
        join.await.unwrap();
        assert!(handle.is_closed());
        assert!(matches!(handle.hide_text(), Err(FaceError::DriverGone)));
    }
}
