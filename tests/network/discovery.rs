//! The lookup-service client against a minimal HTTP server on localhost.

use crate::common::{drain_messages, test_addr, LoopbackNetwork};
use lockstep_chess::{
    ChessError, DiscoveryConfig, DiscoveryWorker, HttpDirectory, ParticipantId, PeerDirectory,
    SessionBuilder, SessionState,
};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

/// Answers the lookup protocol for a single registered match, `brave otter`.
fn route(path: &str) -> (u16, &'static str) {
    match path {
        "/register/chess2/127.0.0.1/7500/" => (200, "brave otter\n"),
        "/lookup/chess2/brave%20otter/" => (200, "127.0.0.1:7500 127.0.0.1:7501\n"),
        "/connect/chess2/brave%20otter/quiet%20fox/" => (200, "127.0.0.1:7502"),
        "/lookup/chess2/broken/" => (500, "oops"),
        _ => (404, "not found"),
    }
}

fn answer(mut stream: TcpStream) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    reader.read_line(&mut request_line).unwrap();
    // Skip headers.
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
            break;
        }
    }
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    let (status, body) = route(path);
    let reason = if status == 200 { "OK" } else { "Error" };
    write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )
    .unwrap();
}

/// Starts the server on a free port and returns its base URL.
fn serve() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            answer(stream);
        }
    });
    format!("http://127.0.0.1:{}", port)
}

fn config(base_url: String) -> DiscoveryConfig {
    DiscoveryConfig {
        poll_interval: Duration::from_millis(10),
        request_timeout: Duration::from_secs(2),
        ..DiscoveryConfig::with_base_url(base_url)
    }
}

#[test]
fn http_directory_speaks_the_protocol() {
    let directory = HttpDirectory::new(config(serve())).unwrap();
    assert_eq!(directory.register(test_addr(7500)).unwrap(), "brave otter");
    assert_eq!(
        directory.lookup("brave otter").unwrap(),
        vec![test_addr(7500), test_addr(7501)]
    );
    // Addresses are typed in any case but looked up lowercase.
    assert_eq!(
        directory.connect("brave otter", "QUIET FOX").unwrap(),
        vec![test_addr(7502)]
    );
    assert_eq!(
        directory.connect("brave otter", "lost mole"),
        Err(ChessError::NoSuchGame {
            address: "lost mole".to_owned()
        })
    );
    assert!(matches!(
        directory.lookup("broken"),
        Err(ChessError::DiscoveryError { .. })
    ));
}

#[test]
fn unreachable_service_is_an_error() {
    // Bind and drop to find a port nobody listens on.
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let directory = HttpDirectory::new(config(format!("http://127.0.0.1:{}", port))).unwrap();
    assert!(matches!(
        directory.register(test_addr(7500)),
        Err(ChessError::DiscoveryError { .. })
    ));
}

#[test]
fn worker_connects_waiting_session() {
    let endpoint: SocketAddr = test_addr(7500);
    let worker = DiscoveryWorker::spawn(
        HttpDirectory::new(config(serve())).unwrap(),
        endpoint,
        config("http://unused".to_owned()),
    );
    let net = LoopbackNetwork::new();
    let mut session = SessionBuilder::new()
        .with_participant_id(ParticipantId::new(1))
        .start_discovery_session(net.socket(endpoint))
        .unwrap();
    assert_eq!(session.current_state(), SessionState::AwaitingPeers);

    for _ in 0..300 {
        session.poll_discovery(&worker);
        if !session.peers().is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(session.peers(), &[test_addr(7501)]);
    assert_eq!(session.current_state(), SessionState::Running);
    assert_eq!(
        drain_messages(&mut session),
        vec![
            "Your address is:",
            "BRAVE OTTER",
            "Type the address of a friend to play with them",
            "Connection successful!",
            "THE GAME BEGINS!",
        ]
    );
}
