//! Sessions keep agreeing when the network drops, duplicates, and reorders datagrams.

use crate::common::{init_tracing, run_all, run_until_tick, test_addr, LoopbackNetwork, POLL_INTERVAL};
use lockstep_chess::{
    ChaosConfig, ChaosSocket, LockstepSession, ParticipantId, RuleConfig, SessionBuilder,
};
use std::net::SocketAddr;
use std::time::Duration;

fn chaotic_pair(net: &LoopbackNetwork, ports: [u16; 2], configs: [ChaosConfig; 2]) -> Vec<LockstepSession<SocketAddr>> {
    configs
        .into_iter()
        .enumerate()
        .map(|(i, config)| {
            let socket = ChaosSocket::new(net.socket(test_addr(ports[i])), config);
            SessionBuilder::new()
                .with_rule_config(RuleConfig::dev())
                .with_participant_id(ParticipantId::new(i as u64 + 1))
                .add_peer(test_addr(ports[1 - i]))
                .start_p2p_session(socket)
                .unwrap()
        })
        .collect()
}

fn play_opening(sessions: &mut [LockstepSession<SocketAddr>]) {
    sessions[0].queue_command("/move 4,1 4,3").unwrap();
    sessions[1].queue_command("/move 4,6 4,4").unwrap();
    run_all(sessions, 20);
    sessions[0].queue_command("/move 6,0 5,2").unwrap();
    sessions[1].queue_command("/move 1,7 2,5").unwrap();
}

#[test]
fn converges_through_heavy_loss() {
    init_tracing();
    let net = LoopbackNetwork::new();
    let lossy = |seed| ChaosConfig {
        seed: Some(seed),
        ..ChaosConfig::lossy(0.3)
    };
    let mut sessions = chaotic_pair(&net, [7401, 7402], [lossy(1), lossy(2)]);
    play_opening(&mut sessions);
    assert!(run_until_tick(&mut sessions, 60, None));
    assert_eq!(sessions[0].checksum(), sessions[1].checksum());
    assert_ne!(sessions[0].checksum(), lockstep_chess::Game::new(RuleConfig::dev()).checksum());
}

#[test]
fn duplicates_and_reordering_are_harmless() {
    let net = LoopbackNetwork::new();
    let config = |seed| {
        ChaosConfig::builder()
            .duplication_rate(0.5)
            .reorder(4, 0.5)
            .seed(seed)
            .build()
    };
    let mut sessions = chaotic_pair(&net, [7411, 7412], [config(5), config(6)]);
    play_opening(&mut sessions);
    assert!(run_until_tick(&mut sessions, 60, None));
    assert_eq!(sessions[0].checksum(), sessions[1].checksum());
    assert!(sessions.iter_mut().all(|s| s.events().count() > 0));
}

#[test]
fn converges_with_latency_and_jitter() {
    let net = LoopbackNetwork::new();
    let config = |seed| {
        ChaosConfig::builder()
            .latency(Duration::from_millis(3))
            .jitter(Duration::from_millis(2))
            .packet_loss_rate(0.05)
            .seed(seed)
            .build()
    };
    let mut sessions = chaotic_pair(&net, [7421, 7422], [config(8), config(9)]);
    play_opening(&mut sessions);
    assert!(run_until_tick(&mut sessions, 40, Some(POLL_INTERVAL)));
    assert_eq!(sessions[0].checksum(), sessions[1].checksum());
}
