//! A third peer joining a running match.

use crate::common::{run_all, run_until_running, run_until_tick, test_addr, LoopbackNetwork};
use lockstep_chess::{
    Action, ChessEvent, Coord, KingCapturePolicy, LockstepSession, ParticipantId, Player, RuleConfig,
    SessionBuilder, SessionState, SyncHealth, Tick,
};
use std::net::SocketAddr;

const HOST: u16 = 7201;
const OTHER: u16 = 7202;
const JOINER: u16 = 7203;

fn running_pair(net: &LoopbackNetwork, ports: [u16; 2]) -> Vec<LockstepSession<SocketAddr>> {
    let names = ["ana", "ben"];
    (0..2)
        .map(|i| {
            SessionBuilder::new()
                .with_rule_config(RuleConfig::dev())
                .with_participant_id(ParticipantId::new(i as u64 + 1))
                .with_nickname(names[i])
                .add_peer(test_addr(ports[1 - i]))
                .start_p2p_session(net.socket(test_addr(ports[i])))
                .unwrap()
        })
        .collect()
}

fn joiner(net: &LoopbackNetwork, port: u16, host: u16) -> LockstepSession<SocketAddr> {
    SessionBuilder::new()
        .with_rule_config(RuleConfig::dev())
        .with_participant_id(ParticipantId::new(3))
        .join_session(net.socket(test_addr(port)), test_addr(host))
        .unwrap()
}

#[test]
fn third_peer_joins_and_converges() {
    let net = LoopbackNetwork::new();
    let mut sessions = running_pair(&net, [HOST, OTHER]);
    sessions[0].queue_command("/move 4,1 4,3").unwrap();
    assert!(run_until_tick(&mut sessions, 30, None));
    // Drop everything so far; only what happens after the join matters.
    for session in &mut sessions {
        let _ = session.events().count();
    }

    sessions.push(joiner(&net, JOINER, HOST));
    assert_eq!(sessions[2].current_state(), SessionState::Joining);
    assert!(run_until_running(&mut sessions, None));

    let joined: Vec<_> = sessions[2].events().collect();
    let Some(welcome_tick) = joined.iter().find_map(|e| match e {
        ChessEvent::Joined { host, tick } => {
            assert_eq!(*host, test_addr(HOST));
            Some(*tick)
        },
        _ => None,
    }) else {
        panic!("no Joined event in {:?}", joined);
    };
    assert!(welcome_tick.as_u32() > 30);
    let mut peers = sessions[2].peers().to_vec();
    peers.sort();
    assert_eq!(peers, vec![test_addr(HOST), test_addr(OTHER)]);

    for session in &mut sessions[..2] {
        assert!(session.peers().contains(&test_addr(JOINER)));
        assert!(session
            .events()
            .any(|e| matches!(e, ChessEvent::PeerJoined { addr } if addr == test_addr(JOINER))));
    }

    sessions[2].queue_command("/move 1,7 2,5").unwrap();
    sessions[1].queue_command("/move 3,6 3,4").unwrap();
    let target = sessions.iter().map(|s| s.tick().as_u32()).max().unwrap() + 20;
    assert!(run_until_tick(&mut sessions, target, None));

    let checksum = sessions[0].checksum();
    assert!(sessions.iter().all(|s| s.checksum() == checksum));
    // The welcome started a fresh match, so the first pawn is home again.
    assert!(!sessions[2].game().board().is_occupied(Coord::new(4, 3)));
    assert!(sessions[2].game().board().is_occupied(Coord::new(2, 5)));
    // Existing peers re-announce their names for the newcomer.
    assert_eq!(sessions[2].model().nick(ParticipantId::new(1)), "ana");
    assert_eq!(sessions[2].model().nick(ParticipantId::new(2)), "ben");
}

#[test]
fn repeated_hellos_welcome_once() {
    let net = LoopbackNetwork::new();
    let mut sessions = running_pair(&net, [7211, 7212]);
    assert!(run_until_tick(&mut sessions, 10, None));

    let mut newcomer = SessionBuilder::new()
        .with_participant_id(ParticipantId::new(9))
        .with_session_config(lockstep_chess::SessionConfig {
            hello_interval: std::time::Duration::ZERO,
            ..lockstep_chess::SessionConfig::default()
        })
        .join_session(net.socket(test_addr(7213)), test_addr(7211))
        .unwrap();
    // Several hellos reach the host before its welcome executes.
    for _ in 0..3 {
        newcomer.advance_tick().unwrap();
    }
    sessions.push(newcomer);
    assert!(run_until_running(&mut sessions, None));
    let target = sessions.iter().map(|s| s.tick().as_u32()).max().unwrap() + 15;
    assert!(run_until_tick(&mut sessions, target, None));

    let ledger = sessions[0].ledger();
    let last = ledger.last_tick().unwrap().as_u32();
    let welcomes = (0..=last)
        .flat_map(|t| ledger.actions_at(Tick::new(t)))
        .filter(|(_, action)| matches!(action, Action::Welcome { .. }))
        .count();
    assert_eq!(welcomes, 1);
    let started = sessions[1]
        .events()
        .filter(|e| matches!(e, ChessEvent::MatchStarted { .. }))
        .count();
    assert_eq!(started, 1, "one welcome, one fresh match");
}

#[test]
fn unanswered_join_keeps_waiting() {
    let net = LoopbackNetwork::new();
    let mut lonely = joiner(&net, 7221, 7222);
    run_all(std::slice::from_mut(&mut lonely), 50);
    assert_eq!(lonely.current_state(), SessionState::Joining);
    assert_eq!(lonely.tick().as_u32(), 0);
    assert!(matches!(
        lonely.sync_health(),
        SyncHealth::WaitingForPeers { ref missing, .. } if missing.is_empty()
    ));
}

#[test]
fn lone_host_welcomes_first_guest() {
    let net = LoopbackNetwork::new();
    let mut host = SessionBuilder::<SocketAddr>::new()
        .with_rule_config(RuleConfig::dev())
        .with_participant_id(ParticipantId::new(1))
        .start_p2p_session(net.socket(test_addr(7231)))
        .unwrap();
    assert_eq!(host.current_state(), SessionState::Running);
    host.queue_command("/move 4,1 4,3").unwrap();
    assert!(run_until_tick(std::slice::from_mut(&mut host), 12, None));

    let mut sessions = vec![host, joiner(&net, 7232, 7231)];
    assert!(run_until_running(&mut sessions, None));
    assert_eq!(sessions[0].peers(), &[test_addr(7232)]);
    assert_eq!(sessions[1].peers(), &[test_addr(7231)]);

    sessions[1].queue_command("/move 1,7 2,5").unwrap();
    let target = sessions.iter().map(|s| s.tick().as_u32()).max().unwrap() + 15;
    assert!(run_until_tick(&mut sessions, target, None));
    assert_eq!(sessions[0].checksum(), sessions[1].checksum());
    assert!(sessions[0].game().board().is_occupied(Coord::new(2, 5)));
}

#[test]
fn welcome_settles_board_count() {
    let net = LoopbackNetwork::new();
    let mut sessions = running_pair(&net, [7241, 7242]);
    sessions[1].queue_command("/reset 2").unwrap();
    assert!(run_until_tick(&mut sessions, 20, None));
    assert!(sessions.iter().all(|s| s.game().num_boards() == 2));

    sessions.push(joiner(&net, 7243, 7241));
    assert!(run_until_running(&mut sessions, None));
    let target = sessions.iter().map(|s| s.tick().as_u32()).max().unwrap() + 20;
    assert!(run_until_tick(&mut sessions, target, None));

    for session in &sessions {
        assert_eq!(session.game().num_boards(), 2);
    }
    let checksum = sessions[0].checksum();
    assert!(sessions.iter().all(|s| s.checksum() == checksum));
}

#[test]
fn seats_are_retaken_after_welcome() {
    let net = LoopbackNetwork::new();
    let ports = [7251, 7252];
    let mut sessions: Vec<_> = (0..2)
        .map(|i| {
            SessionBuilder::new()
                .with_rule_config(RuleConfig::dev())
                .with_king_capture_policy(KingCapturePolicy::Restart)
                .with_participant_id(ParticipantId::new(i as u64 + 1))
                .with_seat(Player::new(i as u8))
                .add_peer(test_addr(ports[1 - i]))
                .start_p2p_session(net.socket(test_addr(ports[i])))
                .unwrap()
        })
        .collect();
    assert!(run_until_tick(&mut sessions, 20, None));

    sessions.push(joiner(&net, 7253, 7251));
    assert!(run_until_running(&mut sessions, None));
    let target = sessions.iter().map(|s| s.tick().as_u32()).max().unwrap() + 20;
    assert!(run_until_tick(&mut sessions, target, None));
    for participant in [1, 2] {
        let seat = Some(Player::new(participant as u8 - 1));
        assert!(sessions.iter().all(|s| s.model().player_of(ParticipantId::new(participant)) == seat));
    }

    sessions[1].queue_command("/move 4,6 4,4").unwrap();
    sessions[0].queue_command("/surrender").unwrap();
    let target = sessions.iter().map(|s| s.tick().as_u32()).max().unwrap() + 20;
    assert!(run_until_tick(&mut sessions, target, None));

    let checksum = sessions[0].checksum();
    assert!(sessions.iter().all(|s| s.checksum() == checksum));
    assert!(sessions.iter().all(|s| s.model().score() == [0, 1]));
}
