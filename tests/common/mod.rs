//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `loopback`: an in-memory network for running several sessions on one thread
//! - `test_utils`: port allocation, tracing setup, and loops that drive sessions
//!
//! # Usage
//!
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{test_addr, LoopbackNetwork};
//! ```

pub mod loopback;
pub mod test_utils;

// Re-exported for convenience; not every test binary uses every helper.
#[allow(unused_imports)]
pub use loopback::{LoopbackNetwork, LoopbackSocket};
#[allow(unused_imports)]
pub use test_utils::{
    drain_messages, init_tracing, run_all, run_until_running, run_until_tick, test_addr,
    PortAllocator, MAX_SYNC_ITERATIONS, POLL_INTERVAL,
};
