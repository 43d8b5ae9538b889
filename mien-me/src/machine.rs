//! Expression transition rules.
//!
//! [`ExpressionMachine`] folds every input into one [`AvatarState`]. It owns
//! no tasks: timers are armed and cancelled through [`Timers`] and fed back
//! with [`ExpressionMachine::on_timer`], which keeps the rules synchronous
//! and testable against a virtual clock.

use crate::blink::{BlinkScheduler, BlinkTiming};
use crate::overlay::TextOverlay;
use crate::timers::Timers;
use mien_core::{
    AvatarState, ConnectionState, Expression, FaceConfig, ServerMessage, TimerSlot,
};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Everything that can change the face
#[derive(Debug, Clone, PartialEq)]
pub enum FaceInput {
    Transport(ConnectionState),
    Presence(bool),
    Loudness(bool),
    Server(ServerMessage),
    ShowText {
        text: String,
        duration: Option<f64>,
    },
    HideText,
    /// Manual override; never auto-resets
    SetExpression(Expression),
    SetTalking(bool),
    SetPresenceDetection(bool),
}

/// Asks the owner of the voice transport to connect or disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportRequest {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MachineOptions {
    pub expression_reset: Duration,
    pub blink: BlinkTiming,
    pub detection_enabled: bool,
    pub auto_connect_on_presence: bool,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self::new(&FaceConfig::default(), true)
    }
}

impl MachineOptions {
    pub fn new(face: &FaceConfig, detection_enabled: bool) -> Self {
        Self {
            expression_reset: face.expression_reset(),
            blink: BlinkTiming::from(face),
            detection_enabled,
            auto_connect_on_presence: false,
        }
    }

    pub fn with_auto_connect_on_presence(mut self, enabled: bool) -> Self {
        self.auto_connect_on_presence = enabled;
        self
    }
}

pub struct ExpressionMachine<R = StdRng> {
    state: AvatarState,
    blink: BlinkScheduler<R>,
    overlay: TextOverlay,
    expression_reset: Duration,
    auto_connect_on_presence: bool,
    detection_enabled: bool,
    lifecycle: Option<ConnectionState>,
    present: bool,
    /// Last presence value seen while detection was enabled
    prev_present: bool,
}

impl<R: Rng> ExpressionMachine<R> {
    pub fn new(options: MachineOptions, rng: R) -> Self {
        Self {
            state: AvatarState::default(),
            blink: BlinkScheduler::new(options.blink, rng),
            overlay: TextOverlay,
            expression_reset: options.expression_reset,
            auto_connect_on_presence: options.auto_connect_on_presence,
            detection_enabled: options.detection_enabled,
            lifecycle: None,
            present: false,
            prev_present: false,
        }
    }

    pub fn state(&self) -> &AvatarState {
        &self.state
    }

    pub fn lifecycle(&self) -> Option<ConnectionState> {
        self.lifecycle
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled
    }

    pub fn blink(&self) -> &BlinkScheduler<R> {
        &self.blink
    }

    /// Record source values that were already current before the machine
    /// started. They become context for later rules but cause no transition.
    pub fn seed(&mut self, lifecycle: Option<ConnectionState>, present: bool) {
        self.lifecycle = lifecycle;
        self.present = present;
        if self.detection_enabled {
            self.prev_present = present;
        }
    }

    /// Arm blinking for the initial expression
    pub fn start(&mut self, timers: &mut dyn Timers) {
        let expression = self.state.expression;
        self.blink.rearm(expression, &mut self.state, timers);
    }

    /// Cancel every slot the machine may have armed
    pub fn shutdown(&mut self, timers: &mut dyn Timers) {
        self.blink.disarm(&mut self.state, timers);
        timers.cancel(TimerSlot::ExpressionReset);
        timers.cancel(TimerSlot::TextHide);
    }

    /// Apply one input. Returns a transport request when presence asks for one.
    pub fn apply(&mut self, input: FaceInput, timers: &mut dyn Timers) -> Option<TransportRequest> {
        let before = self.state.expression;
        let mut request = None;

        match input {
            FaceInput::Transport(lifecycle) => {
                debug!("Transport state: {}", lifecycle);
                self.lifecycle = Some(lifecycle);
                self.apply_lifecycle(timers);
            }
            FaceInput::Presence(present) => {
                request = self.on_presence(present, timers);
            }
            FaceInput::Loudness(loud) => {
                self.state.is_loud = loud;
            }
            FaceInput::Server(message) => self.on_server_message(message, timers),
            FaceInput::ShowText { text, duration } => {
                self.overlay.show(&mut self.state, timers, &text, duration);
            }
            FaceInput::HideText => self.overlay.hide(&mut self.state, timers),
            FaceInput::SetExpression(expression) => {
                timers.cancel(TimerSlot::ExpressionReset);
                self.state.expression = expression;
            }
            FaceInput::SetTalking(talking) => {
                self.state.talking = talking;
            }
            FaceInput::SetPresenceDetection(enabled) => {
                request = self.set_presence_detection(enabled, timers);
            }
        }

        self.follow_expression(before, timers);
        request
    }

    /// Handle a timer firing that the caller has already checked is current
    pub fn on_timer(&mut self, slot: TimerSlot, timers: &mut dyn Timers) {
        let before = self.state.expression;
        match slot {
            TimerSlot::ExpressionReset => {
                debug!("Expression {} timed out", self.state.expression);
                self.state.expression = Expression::Resting;
            }
            TimerSlot::TextHide => self.overlay.on_timer(&mut self.state),
            TimerSlot::BlinkTrigger => self.blink.on_trigger(&mut self.state, timers),
            TimerSlot::BlinkReset => self.blink.on_reset(&mut self.state),
        }
        self.follow_expression(before, timers);
    }

    fn follow_expression(&mut self, before: Expression, timers: &mut dyn Timers) {
        let now = self.state.expression;
        if now != before {
            debug!("Expression {} -> {}", before, now);
            self.blink.rearm(now, &mut self.state, timers);
        }
    }

    fn apply_lifecycle(&mut self, timers: &mut dyn Timers) {
        let Some(lifecycle) = self.lifecycle else {
            return;
        };

        match lifecycle {
            ConnectionState::Initializing
            | ConnectionState::Authenticating
            | ConnectionState::Connecting => {
                self.state.expression = Expression::Kawaii;
            }
            ConnectionState::Connected | ConnectionState::Ready => {
                if self.state.expression == Expression::Resting {
                    self.state.expression = Expression::Thinking;
                }
            }
            ConnectionState::Disconnected => {
                self.state.expression = if self.detection_enabled && !self.present {
                    Expression::Sleeping
                } else {
                    Expression::Resting
                };
                self.overlay.dismiss(&mut self.state, timers);
                timers.cancel(TimerSlot::ExpressionReset);
            }
        }
    }

    fn on_presence(&mut self, present: bool, timers: &mut dyn Timers) -> Option<TransportRequest> {
        let changed = self.present != present;
        self.present = present;
        if !self.detection_enabled || !changed {
            return None;
        }
        self.apply_lifecycle(timers);
        self.evaluate_edge(timers)
    }

    fn set_presence_detection(
        &mut self,
        enabled: bool,
        timers: &mut dyn Timers,
    ) -> Option<TransportRequest> {
        if self.detection_enabled == enabled {
            return None;
        }
        info!("Presence detection {}", if enabled { "enabled" } else { "disabled" });
        self.detection_enabled = enabled;
        self.apply_lifecycle(timers);
        if enabled {
            self.evaluate_edge(timers)
        } else {
            None
        }
    }

    fn evaluate_edge(&mut self, timers: &mut dyn Timers) -> Option<TransportRequest> {
        let previous = std::mem::replace(&mut self.prev_present, self.present);
        if previous == self.present {
            return None;
        }

        let live = self.lifecycle.map(|l| l.is_live()).unwrap_or(false);
        let starting = self.lifecycle.map(|l| l.is_starting()).unwrap_or(false);

        if self.present {
            info!("Someone arrived");
            self.state.expression = Expression::Kawaii;
            timers.arm(TimerSlot::ExpressionReset, self.expression_reset);
            (self.auto_connect_on_presence && !live && !starting).then_some(TransportRequest::Connect)
        } else {
            info!("Everyone left");
            self.state.expression = Expression::Sleeping;
            timers.cancel(TimerSlot::ExpressionReset);
            (self.auto_connect_on_presence && live).then_some(TransportRequest::Disconnect)
        }
    }

    fn on_server_message(&mut self, message: ServerMessage, timers: &mut dyn Timers) {
        debug!("Server message: {}", message.event_name());
        match message {
            ServerMessage::BotStartedSpeaking => {
                self.state.talking = true;
                self.state.expression = Expression::Resting;
                // Already resting; a stale reset must not fire mid-utterance
                timers.cancel(TimerSlot::ExpressionReset);
            }
            ServerMessage::BotStoppedSpeaking => {
                self.state.talking = false;
            }
            ServerMessage::ExpressionChange { expression } => {
                self.state.expression = expression;
                if expression == Expression::Resting {
                    timers.cancel(TimerSlot::ExpressionReset);
                } else {
                    timers.arm(TimerSlot::ExpressionReset, self.expression_reset);
                }
            }
            ServerMessage::UserStartedSpeaking => {
                self.state.talking = false;
                self.state.expression = Expression::Listening;
                // Listening holds until the user stops, not for a fixed time
                timers.cancel(TimerSlot::ExpressionReset);
            }
            ServerMessage::UserStoppedSpeaking => {
                self.state.talking = false;
                self.state.expression = Expression::Thinking;
                timers.arm(TimerSlot::ExpressionReset, self.expression_reset);
            }
            ServerMessage::ShowText { text, duration } => {
                self.overlay.show(&mut self.state, timers, &text, duration);
            }
            ServerMessage::HideText => self.overlay.hide(&mut self.state, timers),
        }
    }
}
