// Invariants of the expression machine under arbitrary input sequences

use mien_core::{ConnectionState, Expression, ServerMessage, TimerSlot};
use mien_me::{ExpressionMachine, FaceInput, MachineOptions, Timers, VirtualTimers};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Step {
    Input(FaceInput),
    Advance(u64),
}

fn expression() -> impl Strategy<Value = Expression> {
    prop::sample::select(Expression::ALL.to_vec())
}

fn lifecycle() -> impl Strategy<Value = ConnectionState> {
    prop::sample::select(vec![
        ConnectionState::Initializing,
        ConnectionState::Authenticating,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Ready,
        ConnectionState::Disconnected,
    ])
}

fn server_message() -> impl Strategy<Value = ServerMessage> {
    prop_oneof![
        Just(ServerMessage::BotStartedSpeaking),
        Just(ServerMessage::BotStoppedSpeaking),
        Just(ServerMessage::UserStartedSpeaking),
        Just(ServerMessage::UserStoppedSpeaking),
        Just(ServerMessage::HideText),
        expression().prop_map(|expression| ServerMessage::ExpressionChange { expression }),
        ("[a-z]{1,8}", prop::option::of(-1.0f64..5.0))
            .prop_map(|(text, duration)| ServerMessage::ShowText { text, duration }),
    ]
}

fn input() -> impl Strategy<Value = FaceInput> {
    prop_oneof![
        lifecycle().prop_map(FaceInput::Transport),
        any::<bool>().prop_map(FaceInput::Presence),
        any::<bool>().prop_map(FaceInput::Loudness),
        server_message().prop_map(FaceInput::Server),
        Just(FaceInput::HideText),
        expression().prop_map(FaceInput::SetExpression),
        any::<bool>().prop_map(FaceInput::SetTalking),
        any::<bool>().prop_map(FaceInput::SetPresenceDetection),
    ]
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => input().prop_map(Step::Input),
        2 => (1u64..4000).prop_map(Step::Advance),
    ]
}

/// Fire every timer due within `ms`, in deadline order
fn advance(machine: &mut ExpressionMachine<StdRng>, timers: &mut VirtualTimers, ms: u64) {
    let until = timers.now() + Duration::from_millis(ms);
    while let Some(slot) = timers.pop_due(until) {
        machine.on_timer(slot, timers);
    }
}

fn check(machine: &ExpressionMachine<StdRng>, timers: &VirtualTimers) -> Result<(), TestCaseError> {
    let state = machine.state();

    if state.expression.suppresses_blink() {
        prop_assert!(!state.is_blinking);
        prop_assert!(!timers.is_armed(TimerSlot::BlinkTrigger));
        prop_assert!(!timers.is_armed(TimerSlot::BlinkReset));
    } else {
        // Exactly one pending blink trigger while blinking is allowed
        prop_assert!(timers.is_armed(TimerSlot::BlinkTrigger));
    }
    prop_assert_eq!(machine.blink().is_armed(), timers.is_armed(TimerSlot::BlinkTrigger));

    if state.expression == Expression::Resting {
        prop_assert!(!timers.is_armed(TimerSlot::ExpressionReset));
    }
    if state.showing_text {
        prop_assert!(!state.display_text.is_empty());
    } else {
        prop_assert!(!timers.is_armed(TimerSlot::TextHide));
    }
    Ok(())
}

proptest! {
    #[test]
    fn machine_invariants_hold(steps in prop::collection::vec(step(), 1..60), seed in any::<u64>()) {
        let mut timers = VirtualTimers::new();
        let mut machine = ExpressionMachine::new(
            MachineOptions::default().with_auto_connect_on_presence(true),
            StdRng::seed_from_u64(seed),
        );
        machine.start(&mut timers);
        check(&machine, &timers)?;

        for step in steps {
            match step {
                Step::Input(input) => {
                    machine.apply(input, &mut timers);
                }
                Step::Advance(ms) => advance(&mut machine, &mut timers, ms),
            }
            check(&machine, &timers)?;
        }

        machine.shutdown(&mut timers);
        prop_assert_eq!(timers.armed_count(), 0);
        prop_assert!(!machine.state().is_blinking);
    }

    #[test]
    fn loudness_never_changes_expression(
        prefix in prop::collection::vec(input(), 0..20),
        loud in prop::collection::vec(any::<bool>(), 1..20),
    ) {
        let mut timers = VirtualTimers::new();
        let mut machine = ExpressionMachine::new(MachineOptions::default(), StdRng::seed_from_u64(1));
        machine.start(&mut timers);
        for input in prefix {
            machine.apply(input, &mut timers);
        }

        let expression = machine.state().expression;
        for value in loud {
            machine.apply(FaceInput::Loudness(value), &mut timers);
            prop_assert_eq!(machine.state().expression, expression);
            prop_assert_eq!(machine.state().is_loud, value);
        }
    }
}
