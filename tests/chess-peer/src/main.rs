//! Headless peer for multi-process testing.
//!
//! Runs one participant of a match over real UDP sockets and plays random legal moves for
//! its seat. A test runner spawns several of these and compares the checksums they print.
//!
//! # Usage
//!
//! ```bash
//! # White
//! cargo run -p chess-peer -- --local-port 9001 --seat 0 --peer 127.0.0.1:9002 --ticks 300
//!
//! # Black
//! cargo run -p chess-peer -- --local-port 9002 --seat 1 --peer 127.0.0.1:9001 --ticks 300
//!
//! # A spectator joining the running match through the first peer
//! cargo run -p chess-peer -- --local-port 9003 --join 127.0.0.1:9001 --ticks 300
//! ```
//!
//! Chaos options (`--packet-loss`, `--latency`, `--jitter`, `--seed`) wrap the socket in a
//! [`ChaosSocket`].
//!
//! # Output
//!
//! One JSON line on stdout:
//! ```json
//! {"success":true,"final_tick":300,"checksum":1234,"score":[0,0],"moves":12}
//! ```

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use lockstep_chess::rng::{Pcg32, Rng};
use lockstep_chess::{
    Action, ChaosConfig, ChaosSocket, ChessError, ChessEvent, KingCapturePolicy, LockstepSession,
    ParticipantId, Player, RuleConfig, SessionBuilder, SessionConfig, SessionState, Tick,
    UdpNonBlockingSocket,
};
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(about = "Headless lockstep-chess peer")]
struct Args {
    /// UDP port to bind.
    #[arg(long)]
    local_port: u16,

    /// Seat to take; spectate if absent.
    #[arg(long)]
    seat: Option<u8>,

    /// Participant ID; random if absent.
    #[arg(long)]
    participant: Option<u64>,

    /// A peer of the starting mesh. Repeat for several.
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Join a running match through this peer instead.
    #[arg(long, conflicts_with = "peers")]
    join: Option<SocketAddr>,

    /// Boards in play.
    #[arg(long, default_value_t = 1)]
    boards: u8,

    /// Tick to reach before reporting.
    #[arg(long, default_value_t = 300)]
    ticks: u32,

    /// Chance per tick of queueing a random move.
    #[arg(long, default_value_t = 0.2)]
    move_rate: f64,

    /// Ticks per second.
    #[arg(long, default_value_t = 60)]
    tick_rate: u32,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Keep serving peers this long after finishing, so slower ones can finish too.
    #[arg(long, default_value_t = 1000)]
    linger_ms: u64,

    #[arg(long, default_value_t = 0.0)]
    packet_loss: f64,

    /// Milliseconds.
    #[arg(long, default_value_t = 0)]
    latency: u64,

    /// Milliseconds.
    #[arg(long, default_value_t = 0)]
    jitter: u64,

    /// Seed for moves and chaos.
    #[arg(long)]
    seed: Option<u64>,

    /// Log to stderr.
    #[arg(long)]
    log: bool,
}

#[derive(Debug, Serialize)]
struct PeerResult {
    success: bool,
    final_tick: u32,
    checksum: u64,
    score: [u32; 2],
    moves: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    joined_at: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl PeerResult {
    fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            final_tick: 0,
            checksum: 0,
            score: [0, 0],
            moves: 0,
            joined_at: None,
            messages: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

fn start(args: &Args) -> Result<LockstepSession<SocketAddr>, ChessError> {
    let udp = UdpNonBlockingSocket::bind_to_port(args.local_port).map_err(|e| ChessError::SocketError {
        context: format!("binding port {}: {}", args.local_port, e),
    })?;
    let chaos = ChaosConfig::builder()
        .packet_loss_rate(args.packet_loss)
        .latency(Duration::from_millis(args.latency))
        .jitter(Duration::from_millis(args.jitter))
        .seed(args.seed.unwrap_or(0).wrapping_add(u64::from(args.local_port)))
        .build();
    let socket = ChaosSocket::new(udp, chaos);

    let mut builder = SessionBuilder::new()
        .with_session_config(SessionConfig {
            tick_rate: args.tick_rate,
            ..SessionConfig::lan()
        })
        .with_rule_config(RuleConfig {
            num_boards: args.boards,
            ..RuleConfig::dev()
        })
        .with_king_capture_policy(KingCapturePolicy::Restart);
    if let Some(id) = args.participant {
        builder = builder.with_participant_id(ParticipantId::new(id));
    }
    if let Some(seat) = args.seat {
        builder = builder.with_seat(Player::new(seat));
    }
    match args.join {
        Some(host) => builder.join_session(socket, host),
        None => {
            for &peer in &args.peers {
                builder = builder.add_peer(peer);
            }
            builder.start_p2p_session(socket)
        },
    }
}

fn random_move(session: &LockstepSession<SocketAddr>, player: Player, rng: &mut Pcg32) -> Option<Action> {
    let game = session.game();
    let moves: Vec<Action> = game
        .board()
        .pieces_of(player)
        .flat_map(|piece| {
            let src = piece.position;
            game.moves(src).into_iter().map(move |dst| Action::Move { src, dst })
        })
        .collect();
    if moves.is_empty() {
        return None;
    }
    moves.get(rng.gen_range_usize(0..moves.len())).cloned()
}

fn run(args: &Args) -> Result<PeerResult, ChessError> {
    let mut session = start(args)?;
    let mut rng = Pcg32::seed_from_u64(args.seed.unwrap_or(7) ^ u64::from(args.local_port));
    let interval = session.config().tick_interval();
    // No new moves this close to the end, so every peer reports the same final board.
    let quiet_from = args
        .ticks
        .saturating_sub(4 * session.config().latency_window);
    let deadline = Instant::now() + Duration::from_secs(args.timeout);

    let mut moves = 0;
    let mut joined_at = None;
    let mut messages = Vec::new();
    while session.tick() < Tick::new(args.ticks) {
        if Instant::now() > deadline {
            return Err(ChessError::InvalidRequest {
                info: format!("timed out at tick {} ({:?})", session.tick(), session.sync_health()),
            });
        }
        if let Some(seat) = args.seat {
            let live = session.current_state() == SessionState::Running;
            if live && session.tick() < Tick::new(quiet_from) && rng.gen_bool(args.move_rate) {
                if let Some(action) = random_move(&session, Player::new(seat), &mut rng) {
                    session.queue_action(action)?;
                    moves += 1;
                }
            }
        }
        session.advance_tick()?;
        for event in session.events() {
            match event {
                ChessEvent::Message { text } => messages.push(text),
                ChessEvent::Joined { tick, .. } => joined_at = Some(tick.as_u32()),
                other => tracing::debug!(?other, "session event"),
            }
        }
        std::thread::sleep(interval);
    }

    let result = PeerResult {
        success: true,
        final_tick: session.tick().as_u32(),
        checksum: session.checksum(),
        score: session.model().score(),
        moves,
        joined_at,
        messages,
        error: None,
    };

    let linger_until = Instant::now() + Duration::from_millis(args.linger_ms);
    while Instant::now() < linger_until {
        session.advance_tick()?;
        std::thread::sleep(interval);
    }
    Ok(result)
}

fn main() -> ExitCode {
    let args = Args::parse();
    if args.log {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }
    let (result, code) = match run(&args) {
        Ok(result) => (result, ExitCode::SUCCESS),
        Err(err) => (PeerResult::failure(err), ExitCode::FAILURE),
    };
    match serde_json::to_string(&result) {
        Ok(line) => println!("{}", line),
        Err(err) => eprintln!("could not serialize result: {}", err),
    }
    code
}
