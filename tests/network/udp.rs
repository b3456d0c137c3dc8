//! Sessions talking over real UDP sockets on the loopback interface.

use crate::common::{run_until_tick, test_addr, PortAllocator, POLL_INTERVAL};
use lockstep_chess::{
    ChessEvent, LockstepSession, ParticipantId, RuleConfig, SessionBuilder, UdpNonBlockingSocket,
};
use serial_test::serial;
use std::net::SocketAddr;

fn udp_mesh<const N: usize>() -> Vec<LockstepSession<SocketAddr>> {
    let ports = PortAllocator::next_ports::<N>();
    ports
        .iter()
        .enumerate()
        .map(|(i, &port)| {
            let mut builder = SessionBuilder::new()
                .with_rule_config(RuleConfig {
                    num_boards: 2,
                    ..RuleConfig::dev()
                })
                .with_participant_id(ParticipantId::new(10 + i as u64));
            for &other in ports.iter().filter(|&&p| p != port) {
                builder = builder.add_peer(test_addr(other));
            }
            builder
                .start_p2p_session(UdpNonBlockingSocket::bind_to_port(port).unwrap())
                .unwrap()
        })
        .collect()
}

#[test]
#[serial]
fn two_peers_over_udp() {
    let mut sessions = udp_mesh::<2>();
    sessions[0].queue_command("/nick ana").unwrap();
    sessions[1].queue_command("/move 1,0 2,2").unwrap();
    assert!(run_until_tick(&mut sessions, 30, Some(POLL_INTERVAL)));
    assert_eq!(sessions[0].checksum(), sessions[1].checksum());
    assert!(sessions[1].game().board().is_occupied(lockstep_chess::Coord::new(2, 2)));
    assert!(sessions[1]
        .events()
        .any(|e| matches!(e, ChessEvent::Message { ref text } if text == "Spectator renames to ana")));
}

#[test]
#[serial]
fn four_peers_over_udp() {
    let mut sessions = udp_mesh::<4>();
    for (i, session) in sessions.iter_mut().enumerate() {
        session.queue_command(&format!("/become {}", i)).unwrap();
    }
    assert!(run_until_tick(&mut sessions, 20, Some(POLL_INTERVAL)));
    sessions[2].queue_command("/move 9,1 9,3").unwrap();
    assert!(run_until_tick(&mut sessions, 40, Some(POLL_INTERVAL)));

    let checksum = sessions[0].checksum();
    assert!(sessions.iter().all(|s| s.checksum() == checksum));
    for session in &sessions {
        assert_eq!(
            session.model().player_of(ParticipantId::new(13)),
            Some(lockstep_chess::Player::new(3))
        );
    }
}

#[test]
#[serial]
fn windows_full_of_chat_still_arrive() {
    let mut sessions = udp_mesh::<2>();
    let long = "z".repeat(5000);
    assert!(matches!(
        sessions[0].queue_command(&long),
        Err(lockstep_chess::ChessError::InvalidRequest { .. })
    ));

    // One near-limit line per tick keeps every outbound window at its largest.
    let line = "z".repeat(sessions[0].config().tick_payload_budget() - 64);
    for _ in 0..12 {
        sessions[0].queue_command(&line).unwrap();
    }
    assert!(run_until_tick(&mut sessions, 40, Some(POLL_INTERVAL)));
    assert_eq!(sessions[0].checksum(), sessions[1].checksum());
    let heard = sessions[1]
        .events()
        .filter(|e| matches!(e, ChessEvent::Message { text } if text.ends_with(&line)))
        .count();
    assert_eq!(heard, 12);
}
