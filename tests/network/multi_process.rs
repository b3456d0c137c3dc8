//! Multi-process network testing.
//!
//! These tests spawn separate `chess_peer` processes that play random moves against each
//! other over real UDP sockets, then compare the checksums they report.
//!
//! # Requirements
//!
//! The binary must be built first; the tests are skipped otherwise:
//! ```bash
//! cargo build -p chess-peer
//! ```

#![allow(clippy::print_stderr)]

use crate::common::PortAllocator;
use serde::Deserialize;
use serial_test::serial;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const PEER_BINARY_NAME: &str = "chess_peer";
const PEER_PROCESS_TIMEOUT: Duration = Duration::from_secs(60);

/// What a peer prints on stdout.
#[derive(Debug, Deserialize)]
struct PeerResult {
    success: bool,
    final_tick: u32,
    checksum: u64,
    score: [u32; 2],
    moves: usize,
    joined_at: Option<u32>,
    error: Option<String>,
}

/// Test executables live in `target/<profile>/deps/`, binaries one level up.
fn find_peer_binary() -> Option<PathBuf> {
    let test_exe = std::env::current_exe().ok()?;
    let target_dir = test_exe.parent()?.parent()?;
    let binary = target_dir.join(PEER_BINARY_NAME);
    binary.exists().then_some(binary)
}

fn skip_without_binary() -> bool {
    if find_peer_binary().is_some() {
        return false;
    }
    eprintln!("SKIP: {} not found; build it with `cargo build -p chess-peer`", PEER_BINARY_NAME);
    true
}

fn spawn_peer(args: &[String]) -> Child {
    let binary = find_peer_binary().expect("peer binary");
    Command::new(binary)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn peer")
}

fn wait_for_peer(mut child: Child, name: &str) -> PeerResult {
    let start = Instant::now();
    loop {
        match child.try_wait().expect("wait on peer") {
            Some(_) => break,
            None if start.elapsed() > PEER_PROCESS_TIMEOUT => {
                let _ = child.kill();
                panic!("{} did not finish within {:?}", name, PEER_PROCESS_TIMEOUT);
            },
            None => std::thread::sleep(Duration::from_millis(50)),
        }
    }
    let output = child.wait_with_output().expect("peer output");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().unwrap_or_default();
    serde_json::from_str(line).unwrap_or_else(|e| panic!("{}: bad output {:?}: {}", name, line, e))
}

fn mesh_args(port: u16, seat: u8, peers: &[u16], extra: &[&str]) -> Vec<String> {
    let mut args = vec![
        "--local-port".to_owned(),
        port.to_string(),
        "--participant".to_owned(),
        port.to_string(),
        "--seat".to_owned(),
        seat.to_string(),
    ];
    for peer in peers.iter().filter(|&&p| p != port) {
        args.push("--peer".to_owned());
        args.push(format!("127.0.0.1:{}", peer));
    }
    args.extend(extra.iter().map(|s| (*s).to_owned()));
    args
}

fn assert_agree(results: &[PeerResult]) {
    for result in results {
        assert!(result.success, "peer failed: {:?}", result.error);
    }
    let first = &results[0];
    for other in &results[1..] {
        assert_eq!(other.checksum, first.checksum, "{:?} vs {:?}", first, other);
    }
}

/// Score agrees too; a welcome resets it on every peer.
fn assert_same_score(results: &[PeerResult]) {
    assert!(results.windows(2).all(|w| w[0].score == w[1].score), "{:?}", results);
}

#[test]
#[serial]
fn two_processes_agree() {
    if skip_without_binary() {
        return;
    }
    let ports = PortAllocator::next_ports::<2>();
    let children: Vec<_> = (0..2u8)
        .map(|seat| spawn_peer(&mesh_args(ports[usize::from(seat)], seat, &ports, &["--ticks", "240"])))
        .collect();
    let results: Vec<_> = children
        .into_iter()
        .enumerate()
        .map(|(i, child)| wait_for_peer(child, &format!("peer {}", i)))
        .collect();
    assert_agree(&results);
    assert_same_score(&results);
    assert!(results.iter().all(|r| r.final_tick >= 240));
    assert!(results.iter().map(|r| r.moves).sum::<usize>() > 0);
}

#[test]
#[serial]
fn four_processes_on_two_boards_with_loss() {
    if skip_without_binary() {
        return;
    }
    let ports = PortAllocator::next_ports::<4>();
    let extra = ["--boards", "2", "--ticks", "200", "--packet-loss", "0.1", "--seed", "11"];
    let children: Vec<_> = (0..4u8)
        .map(|seat| spawn_peer(&mesh_args(ports[usize::from(seat)], seat, &ports, &extra)))
        .collect();
    let results: Vec<_> = children
        .into_iter()
        .enumerate()
        .map(|(i, child)| wait_for_peer(child, &format!("peer {}", i)))
        .collect();
    assert_agree(&results);
    assert_same_score(&results);
}

#[test]
#[serial]
fn spectator_joins_running_match() {
    if skip_without_binary() {
        return;
    }
    let [a, b, c] = PortAllocator::next_ports::<3>();
    let players = [a, b];
    let extra = ["--ticks", "400", "--linger-ms", "2000"];
    let first = spawn_peer(&mesh_args(a, 0, &players, &extra));
    let second = spawn_peer(&mesh_args(b, 1, &players, &extra));
    std::thread::sleep(Duration::from_millis(500));
    let joiner = spawn_peer(&[
        "--local-port".to_owned(),
        c.to_string(),
        "--join".to_owned(),
        format!("127.0.0.1:{}", a),
        "--ticks".to_owned(),
        "400".to_owned(),
    ]);

    let results = vec![
        wait_for_peer(first, "white"),
        wait_for_peer(second, "black"),
        wait_for_peer(joiner, "spectator"),
    ];
    assert_agree(&results);
    assert_same_score(&results);
    assert!(results[2].joined_at.is_some());
}
