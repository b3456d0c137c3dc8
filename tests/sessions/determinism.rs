//! Peers fed the same actions end every tick with the same board.

use crate::common::{drain_messages, init_tracing, run_all, run_until_tick, test_addr, LoopbackNetwork};
use lockstep_chess::rng::{Pcg32, Rng};
use lockstep_chess::{
    Action, KingCapturePolicy, LockstepSession, ParticipantId, Player, RuleConfig, SessionBuilder,
    SyncHealth,
};
use std::net::SocketAddr;

fn mesh(net: &LoopbackNetwork, ports: &[u16], rules: RuleConfig) -> Vec<LockstepSession<SocketAddr>> {
    ports
        .iter()
        .enumerate()
        .map(|(i, &port)| {
            let mut builder = SessionBuilder::new()
                .with_rule_config(rules)
                .with_king_capture_policy(KingCapturePolicy::Notify)
                .with_participant_id(ParticipantId::new(100 + i as u64))
                .with_seat(Player::new(i as u8));
            for &other in ports.iter().filter(|&&p| p != port) {
                builder = builder.add_peer(test_addr(other));
            }
            builder
                .start_p2p_session(net.socket(test_addr(port)))
                .expect("session")
        })
        .collect()
}

/// Picks a legal-looking move for `player` from the session's current view.
fn random_move(session: &LockstepSession<SocketAddr>, player: Player, rng: &mut Pcg32) -> Option<Action> {
    let game = session.game();
    let candidates: Vec<Action> = game
        .board()
        .pieces_of(player)
        .flat_map(|piece| {
            game.moves(piece.position).into_iter().map(move |dst| Action::Move {
                src: piece.position,
                dst,
            })
        })
        .collect();
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.gen_range_usize(0..candidates.len())].clone())
}

fn play_random(sessions: &mut [LockstepSession<SocketAddr>], seed: u64, rounds: usize) {
    let mut rng = Pcg32::seed_from_u64(seed);
    for _ in 0..rounds {
        for (i, session) in sessions.iter_mut().enumerate() {
            if rng.gen_bool(0.3) {
                if let Some(action) = random_move(session, Player::new(i as u8), &mut rng) {
                    session.queue_action(action).unwrap();
                }
            }
        }
        run_all(sessions, 1);
    }
}

/// Runs until every peer has executed every submitted tick.
fn settle(sessions: &mut [LockstepSession<SocketAddr>]) {
    let target = sessions.iter().map(|s| s.tick().as_u32()).max().unwrap_or(0) + 12;
    assert!(run_until_tick(sessions, target, None), "peers did not converge");
}

#[test]
fn two_peers_agree_on_board() {
    init_tracing();
    let net = LoopbackNetwork::new();
    let mut sessions = mesh(&net, &[7001, 7002], RuleConfig::dev());
    play_random(&mut sessions, 7, 300);
    settle(&mut sessions);

    assert_eq!(sessions[0].checksum(), sessions[1].checksum());
    assert_ne!(
        sessions[0].checksum(),
        lockstep_chess::Game::new(RuleConfig::dev()).checksum(),
        "some move should have happened"
    );
}

#[test]
fn four_peers_on_two_boards_agree() {
    let net = LoopbackNetwork::new();
    let rules = RuleConfig {
        num_boards: 2,
        ..RuleConfig::dev()
    };
    let mut sessions = mesh(&net, &[7011, 7012, 7013, 7014], rules);
    play_random(&mut sessions, 99, 400);
    settle(&mut sessions);

    let first = sessions[0].checksum();
    for session in &sessions[1..] {
        assert_eq!(session.checksum(), first);
    }
    let scores: Vec<_> = sessions.iter().map(|s| s.model().score()).collect();
    assert!(scores.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn same_messages_on_every_peer() {
    let net = LoopbackNetwork::new();
    let mut sessions = mesh(&net, &[7021, 7022], RuleConfig::dev());
    sessions[0].queue_command("/nick ana").unwrap();
    sessions[1].queue_command("/nick ben").unwrap();
    sessions[1].queue_command("hello there").unwrap();
    run_all(&mut sessions, 3);
    settle(&mut sessions);

    let logs: Vec<Vec<String>> = sessions.iter_mut().map(drain_messages).collect();
    assert_eq!(logs[0], logs[1]);
    assert!(logs[0].contains(&"ben: hello there".to_owned()), "{:?}", logs[0]);
    assert_eq!(sessions[0].model().nick(ParticipantId::new(101)), "ben");
}

#[test]
fn silent_peer_blocks_progress() {
    let net = LoopbackNetwork::new();
    let mut sessions = mesh(&net, &[7031, 7032], RuleConfig::dev());
    run_until_tick(&mut sessions, 10, None);

    // Only the first peer keeps running; the second stops sending.
    let stalled_at = sessions[0].tick();
    for _ in 0..50 {
        sessions[0].advance_tick().unwrap();
    }
    let latency = sessions[0].config().latency_window;
    assert!(sessions[0].tick().as_u32() <= stalled_at.as_u32() + 2 * latency);
    assert!(matches!(
        sessions[0].sync_health(),
        SyncHealth::WaitingForPeers { ref missing, .. } if missing == &vec![ParticipantId::new(101)]
    ));

    // Once the second peer catches up, both continue.
    assert!(run_until_tick(&mut sessions, stalled_at.as_u32() + 20, None));
}

#[test]
fn cut_link_stalls_then_recovers() {
    let net = LoopbackNetwork::new();
    let mut sessions = mesh(&net, &[7041, 7042], RuleConfig::dev());
    run_until_tick(&mut sessions, 8, None);

    net.cut(test_addr(7042), test_addr(7041));
    run_all(&mut sessions, 40);
    let stalled = sessions[0].tick();
    run_all(&mut sessions, 40);
    assert_eq!(sessions[0].tick(), stalled);

    net.heal();
    assert!(run_until_tick(&mut sessions, stalled.as_u32() + 10, None));
}
