//! Shared test utilities for integration tests.
//!
//! # Port Allocation
//!
//! Tests that bind real UDP sockets take their ports from [`PortAllocator`] so that
//! parallel test binaries do not collide:
//!
//! ```ignore
//! use common::test_utils::PortAllocator;
//!
//! let [a, b] = PortAllocator::next_ports::<2>();
//! ```

use lockstep_chess::{ChessEvent, LockstepSession, PeerAddress, SessionState};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;

// ============================================================================
// Port Allocation System
// ============================================================================

/// Starting port for the atomic port allocator; clear of well-known ports and of the
/// ephemeral range.
#[allow(dead_code)]
const PORT_ALLOCATOR_START: u16 = 30000;

/// Ports reserved per test process.
#[allow(dead_code)]
const PORTS_PER_PROCESS: u16 = 20;

static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);
static PORT_COUNTER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Thread-safe port allocator for integration tests.
///
/// Each process starts at an offset derived from its PID, so test binaries running side
/// by side draw from different ranges.
pub struct PortAllocator;

impl PortAllocator {
    #[allow(dead_code)]
    fn initialize_counter() {
        if PORT_COUNTER_INITIALIZED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let pid = std::process::id();
            let max_offsets = (60000 - PORT_ALLOCATOR_START) / PORTS_PER_PROCESS;
            let offset_index = (pid as u16) % max_offsets;
            PORT_COUNTER.store(
                PORT_ALLOCATOR_START + offset_index * PORTS_PER_PROCESS,
                Ordering::SeqCst,
            );
        }
    }

    /// Allocates the next available port.
    #[allow(dead_code)]
    #[must_use]
    pub fn next_port() -> u16 {
        Self::initialize_counter();
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        assert!(
            port < 60000,
            "Port allocator exhausted. This indicates a test suite issue."
        );
        port
    }

    /// Allocates N ports.
    #[allow(dead_code)]
    #[must_use]
    pub fn next_ports<const N: usize>() -> [u16; N] {
        let mut ports = [0u16; N];
        for port in &mut ports {
            *port = Self::next_port();
        }
        ports
    }
}

// ============================================================================
// Common Test Constants
// ============================================================================

/// Upper bound on iterations for loops that wait for the network to settle.
pub const MAX_SYNC_ITERATIONS: usize = 2000;

/// Time to sleep between iterations when real sockets are involved.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

// ============================================================================
// Helpers
// ============================================================================

/// Loopback address on `port`.
#[must_use]
pub fn test_addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// Installs a `tracing` subscriber that writes through the test harness. Safe to call
/// from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Advances every session once per iteration, in order.
///
/// # Panics
///
/// Panics if any session reports an error.
pub fn run_all<A: PeerAddress>(sessions: &mut [LockstepSession<A>], iterations: usize) {
    for _ in 0..iterations {
        for session in sessions.iter_mut() {
            session.advance_tick().expect("advance_tick");
        }
    }
}

/// Advances every session until all have executed past `tick`, or gives up after
/// [`MAX_SYNC_ITERATIONS`]. Returns whether the target was reached.
pub fn run_until_tick<A: PeerAddress>(
    sessions: &mut [LockstepSession<A>],
    tick: u32,
    sleep: Option<Duration>,
) -> bool {
    for _ in 0..MAX_SYNC_ITERATIONS {
        if sessions.iter().all(|s| s.tick().as_u32() >= tick) {
            return true;
        }
        // Sessions that are already there keep advancing so that peers still behind
        // receive their windows.
        run_all(sessions, 1);
        if let Some(pause) = sleep {
            std::thread::sleep(pause);
        }
    }
    false
}

/// Advances every session until all are running, or gives up.
pub fn run_until_running<A: PeerAddress>(
    sessions: &mut [LockstepSession<A>],
    sleep: Option<Duration>,
) -> bool {
    for _ in 0..MAX_SYNC_ITERATIONS {
        if sessions
            .iter()
            .all(|s| s.current_state() == SessionState::Running)
        {
            return true;
        }
        run_all(sessions, 1);
        if let Some(pause) = sleep {
            std::thread::sleep(pause);
        }
    }
    false
}

/// Drains a session's events and keeps only the message texts.
pub fn drain_messages<A: PeerAddress>(session: &mut LockstepSession<A>) -> Vec<String> {
    session
        .events()
        .filter_map(|event| match event {
            ChessEvent::Message { text } => Some(text),
            _ => None,
        })
        .collect()
}
