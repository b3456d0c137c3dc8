//! Replaying a finished match and resuming live play.

use crate::common::{drain_messages, run_all, run_until_tick, test_addr, LoopbackNetwork};
use lockstep_chess::{
    ChessEvent, Coord, Game, KingCapturePolicy, LockstepSession, ParticipantId, Player,
    ReplayState, RuleConfig, SessionBuilder,
};
use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;

fn run_until_live(session: &mut LockstepSession<SocketAddr>) {
    for _ in 0..500 {
        if session.replay_state() == ReplayState::Live {
            return;
        }
        session.advance_tick().unwrap();
    }
    panic!("replay never finished");
}

#[test]
fn surrender_triggers_one_scored_replay() {
    let captures = Rc::new(Cell::new(0));
    let counter = Rc::clone(&captures);
    let mut session = SessionBuilder::<SocketAddr>::new()
        .with_participant_id(ParticipantId::new(1))
        .with_seat(Player::new(0))
        .with_king_captured_callback(move |player| {
            assert_eq!(player, Player::new(0));
            counter.set(counter.get() + 1);
        })
        .start_offline_session()
        .unwrap();

    session.queue_command("/surrender").unwrap();
    run_all(std::slice::from_mut(&mut session), 6);
    assert!(matches!(
        session.replay_state(),
        ReplayState::Replaying { stop, .. } if stop.as_u32() == 6
    ));
    assert_eq!(session.model().score(), [0, 1]);
    let first = drain_messages(&mut session);
    assert!(first.contains(&"White King Captured!".to_owned()), "{:?}", first);
    assert!(first.contains(&"Black wins!".to_owned()));

    let ledger = session.ledger().clone();
    run_until_live(&mut session);

    let replayed: Vec<ChessEvent<SocketAddr>> = session.events().collect();
    assert!(replayed
        .iter()
        .any(|e| matches!(e, ChessEvent::KingCaptured { player } if *player == Player::new(0))));
    assert!(replayed
        .iter()
        .any(|e| matches!(e, ChessEvent::ReplayFinished { tick } if tick.as_u32() == 6)));

    // The replayed capture scores nothing, calls nothing, and requests no second replay.
    assert_eq!(session.model().score(), [0, 1]);
    assert_eq!(captures.get(), 1);
    assert_eq!(session.ledger(), &ledger);
    assert_eq!(session.checksum(), Game::new(RuleConfig::standard()).checksum());

    run_all(std::slice::from_mut(&mut session), 50);
    assert_eq!(session.replay_state(), ReplayState::Live);
}

#[test]
fn restart_policy_skips_replay() {
    let mut session = SessionBuilder::<SocketAddr>::new()
        .with_seat(Player::new(1))
        .with_king_capture_policy(KingCapturePolicy::Restart)
        .start_offline_session()
        .unwrap();
    session.queue_command("/surrender").unwrap();
    run_all(std::slice::from_mut(&mut session), 10);
    assert_eq!(session.replay_state(), ReplayState::Live);
    assert_eq!(session.model().score(), [1, 0]);
    assert!(session
        .events()
        .any(|e| matches!(e, ChessEvent::MatchStarted { tick, .. } if tick.as_u32() == 6)));
}

#[test]
fn replay_reproduces_moves() {
    let mut session = SessionBuilder::<SocketAddr>::new()
        .with_rule_config(RuleConfig::dev())
        .start_offline_session()
        .unwrap();
    session.queue_command("/move 4,1 4,3").unwrap();
    run_all(std::slice::from_mut(&mut session), 8);
    assert!(session.game().board().is_occupied(Coord::new(4, 3)));
    let _ = drain_messages(&mut session);

    session.queue_command("/replay").unwrap();
    run_all(std::slice::from_mut(&mut session), 6);
    assert!(session.replay_state() != ReplayState::Live);
    assert!(!session.game().board().is_occupied(Coord::new(4, 3)));

    run_until_live(&mut session);
    let log = drain_messages(&mut session);
    assert!(log.contains(&"White pawn moved".to_owned()), "{:?}", log);
    assert!(log.contains(&"Replay finished".to_owned()));
    // Live play resumes on a fresh board.
    assert!(!session.game().board().is_occupied(Coord::new(4, 3)));
}

#[test]
fn peers_replay_together_and_resume_in_sync() {
    let net = LoopbackNetwork::new();
    let ports = [7101u16, 7102];
    let mut sessions: Vec<_> = ports
        .iter()
        .enumerate()
        .map(|(i, &port)| {
            SessionBuilder::new()
                .with_rule_config(RuleConfig::dev())
                .with_participant_id(ParticipantId::new(i as u64 + 1))
                .add_peer(test_addr(ports[1 - i]))
                .start_p2p_session(net.socket(test_addr(port)))
                .unwrap()
        })
        .collect();

    sessions[0].queue_command("/move 4,1 4,3").unwrap();
    sessions[1].queue_command("/move 4,6 4,4").unwrap();
    run_all(&mut sessions, 10);
    sessions[1].queue_command("/replay").unwrap();

    let mut saw_replay = [false, false];
    for _ in 0..1000 {
        run_all(&mut sessions, 1);
        for (i, session) in sessions.iter().enumerate() {
            saw_replay[i] |= session.replay_state() != ReplayState::Live;
        }
        if saw_replay.iter().all(|s| *s)
            && sessions.iter().all(|s| s.replay_state() == ReplayState::Live)
        {
            break;
        }
    }
    assert_eq!(saw_replay, [true, true]);

    sessions[0].queue_command("/move 3,1 3,2").unwrap();
    let target = sessions.iter().map(|s| s.tick().as_u32()).max().unwrap() + 15;
    assert!(run_until_tick(&mut sessions, target, None));
    assert_eq!(sessions[0].checksum(), sessions[1].checksum());
    assert!(sessions[0].game().board().is_occupied(Coord::new(3, 2)));
    assert!(!sessions[0].game().board().is_occupied(Coord::new(4, 3)));
}

#[test]
fn ending_replay_early_is_local() {
    let net = LoopbackNetwork::new();
    let ports = [7111u16, 7112];
    let mut sessions: Vec<_> = ports
        .iter()
        .enumerate()
        .map(|(i, &port)| {
            SessionBuilder::new()
                .with_participant_id(ParticipantId::new(i as u64 + 1))
                .add_peer(test_addr(ports[1 - i]))
                .start_p2p_session(net.socket(test_addr(port)))
                .unwrap()
        })
        .collect();
    sessions[0].queue_command("/replay").unwrap();
    for _ in 0..100 {
        run_all(&mut sessions, 1);
        if sessions[0].replay_state() != ReplayState::Live {
            break;
        }
    }
    assert!(sessions[0].replay_state() != ReplayState::Live);

    sessions[0].queue_command("/endreplay").unwrap();
    assert_eq!(sessions[0].replay_state(), ReplayState::Live);
    // `/endreplay` never reaches the ledger.
    assert!(sessions[0].queued_actions().is_empty());

    let target = sessions.iter().map(|s| s.tick().as_u32()).max().unwrap() + 10;
    assert!(run_until_tick(&mut sessions, target, None));
    assert_eq!(sessions[0].checksum(), sessions[1].checksum());
}
