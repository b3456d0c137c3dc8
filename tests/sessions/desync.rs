//! A peer that contradicts its own ledger entry halts the session.

use crate::common::{run_all, test_addr, LoopbackNetwork};
use lockstep_chess::telemetry::{CollectingObserver, ViolationKind, ViolationSeverity};
use lockstep_chess::{
    Action, ChessError, ChessEvent, NonBlockingSocket, Packet, ParticipantId, SessionBuilder,
    SessionState, SyncHealth, Tick,
};
use std::sync::Arc;

const ROGUE: ParticipantId = ParticipantId::new(66);

fn say(text: &str) -> Vec<Action> {
    vec![Action::Msg {
        text: text.to_owned(),
    }]
}

#[test]
fn conflicting_window_halts_with_violation() {
    let net = LoopbackNetwork::new();
    let observer = Arc::new(CollectingObserver::new());
    let mut session = SessionBuilder::new()
        .with_participant_id(ParticipantId::new(1))
        .with_violation_observer(observer.clone())
        .add_peer(test_addr(7302))
        .start_p2p_session(net.socket(test_addr(7301)))
        .unwrap();
    let mut rogue = net.socket(test_addr(7302));

    let tick = Tick::new(3);
    rogue.send_to(&Packet::window(ROGUE, vec![(tick, say("first"))]), &test_addr(7301));
    session.advance_tick().unwrap();
    // Repeating the same entry is harmless.
    rogue.send_to(&Packet::window(ROGUE, vec![(tick, say("first"))]), &test_addr(7301));
    session.advance_tick().unwrap();

    rogue.send_to(&Packet::window(ROGUE, vec![(tick, say("second"))]), &test_addr(7301));
    let err = session.advance_tick().unwrap_err();
    assert_eq!(
        err,
        ChessError::ProtocolViolation {
            tick,
            participant: ROGUE
        }
    );
    assert_eq!(session.current_state(), SessionState::Halted);
    assert_eq!(session.sync_health(), SyncHealth::Halted { tick: session.tick() });
    assert!(session.events().any(|e| matches!(
        e,
        ChessEvent::DesyncDetected { tick: t, participant } if t == tick && participant == ROGUE
    )));

    assert!(observer.has_violation(ViolationKind::Ledger));
    assert_eq!(observer.violations_at_severity(ViolationSeverity::Critical).len(), 1);

    // The original entry survives and every later call keeps failing.
    assert_eq!(session.ledger().get(tick, ROGUE), Some(say("first").as_slice()));
    assert!(session.advance_tick().is_err());
}

#[test]
fn honest_peers_never_conflict() {
    let net = LoopbackNetwork::new();
    let observer = Arc::new(CollectingObserver::new());
    let ports = [7311u16, 7312];
    let mut sessions: Vec<_> = (0..2)
        .map(|i| {
            SessionBuilder::new()
                .with_participant_id(ParticipantId::new(i as u64 + 1))
                .with_violation_observer(observer.clone())
                .add_peer(test_addr(ports[1 - i]))
                .start_p2p_session(net.socket(test_addr(ports[i])))
                .unwrap()
        })
        .collect();
    for round in 0..40 {
        sessions[round % 2].queue_command(&format!("round {}", round)).unwrap();
        run_all(&mut sessions, 2);
    }
    assert!(observer.is_empty(), "{:?}", observer.violations());
    assert!(sessions.iter().all(|s| s.current_state() == SessionState::Running));
}
