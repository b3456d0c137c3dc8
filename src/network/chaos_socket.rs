//! A lossy, laggy wrapper around any [`NonBlockingSocket`].
//!
//! Windows are resent every tick and ledger merges are idempotent, so a match must survive
//! dropped, doubled, late and shuffled datagrams. Tests and the headless peer wrap their
//! sockets in a [`ChaosSocket`] to check that it does.
//!
//! ```
//! use lockstep_chess::ChaosConfig;
//! use std::time::Duration;
//!
//! let config = ChaosConfig::builder()
//!     .latency(Duration::from_millis(50))
//!     .jitter(Duration::from_millis(20))
//!     .packet_loss_rate(0.05)
//!     .seed(42)
//!     .build();
//! assert_eq!(config.loss_rate, 0.05);
//! ```

use std::hash::Hash;
use std::time::Duration;

use web_time::Instant;

use crate::network::messages::Packet;
use crate::rng::{Pcg32, Rng};
use crate::NonBlockingSocket;

/// How badly to treat packets. The default lets everything through untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaosConfig {
    /// Delay before a received packet is handed over.
    pub latency: Duration,
    /// Each packet's delay varies within `latency ± jitter`.
    pub jitter: Duration,
    /// Chance an outgoing packet never arrives.
    pub loss_rate: f64,
    /// Chance an outgoing packet arrives twice.
    pub duplication_rate: f64,
    /// Packets collected before a batch may be shuffled. Zero keeps arrival order.
    pub reorder_window: usize,
    /// Chance each collected packet swaps places with another.
    pub reorder_rate: f64,
    /// Fixed seed for repeatable runs.
    pub seed: Option<u64>,
}

impl ChaosConfig {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> ChaosConfigBuilder {
        ChaosConfigBuilder::default()
    }

    /// Drops the given share of packets and nothing else.
    #[must_use]
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate: loss_rate.clamp(0.0, 1.0),
            ..Self::default()
        }
    }
}

/// Builder for [`ChaosConfig`]. Rates are clamped to `[0, 1]`.
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct ChaosConfigBuilder {
    config: ChaosConfig,
}

impl ChaosConfigBuilder {
    /// Base delay.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.config.latency = latency;
        self
    }

    /// Spread around the base delay.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Share of packets lost.
    pub fn packet_loss_rate(mut self, rate: f64) -> Self {
        self.config.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Share of packets delivered twice.
    pub fn duplication_rate(mut self, rate: f64) -> Self {
        self.config.duplication_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Collect `window` packets, then swap each with probability `rate`.
    pub fn reorder(mut self, window: usize, rate: f64) -> Self {
        self.config.reorder_window = window;
        self.config.reorder_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Fixes the seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> ChaosConfig {
        self.config
    }
}

/// What the wrapper did to the traffic so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaosStats {
    /// Packets the session asked to send.
    pub sent: u64,
    /// Packets thrown away.
    pub dropped: u64,
    /// Packets sent a second time.
    pub duplicated: u64,
    /// Packets handed back to the session.
    pub delivered: u64,
    /// Swaps made while shuffling.
    pub reordered: u64,
}

/// Wraps a socket and degrades it according to a [`ChaosConfig`].
pub struct ChaosSocket<A, S>
where
    A: Clone + PartialEq + Eq + Hash,
    S: NonBlockingSocket<A>,
{
    inner: S,
    config: ChaosConfig,
    rng: Pcg32,
    // sorted by delivery time
    delayed: Vec<(Instant, A, Packet)>,
    shuffle: Vec<(A, Packet)>,
    stats: ChaosStats,
}

impl<A, S> ChaosSocket<A, S>
where
    A: Clone + PartialEq + Eq + Hash,
    S: NonBlockingSocket<A>,
{
    /// Wraps `inner`.
    pub fn new(inner: S, config: ChaosConfig) -> Self {
        let rng = config.seed.map_or_else(Pcg32::from_entropy, Pcg32::seed_from_u64);
        Self {
            inner,
            config,
            rng,
            delayed: Vec::new(),
            shuffle: Vec::new(),
            stats: ChaosStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> ChaosStats {
        self.stats
    }

    /// Packets received but still held back.
    pub fn packets_in_flight(&self) -> usize {
        self.delayed.len() + self.shuffle.len()
    }

    fn chance(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.gen_bool(rate)
    }

    fn due_at(&mut self, now: Instant) -> Instant {
        let jitter = self.config.jitter.as_micros().min(u128::from(u32::MAX / 2)) as u32;
        if jitter == 0 {
            return now + self.config.latency;
        }
        let offset = i64::from(self.rng.gen_range(0..jitter * 2 + 1)) - i64::from(jitter);
        let micros = (self.config.latency.as_micros() as i64 + offset).max(0);
        now + Duration::from_micros(micros as u64)
    }

    fn shuffled(&mut self, ready: Vec<(A, Packet)>) -> Vec<(A, Packet)> {
        if self.config.reorder_window == 0 || self.config.reorder_rate <= 0.0 {
            return ready;
        }
        self.shuffle.extend(ready);
        if self.shuffle.len() < self.config.reorder_window {
            return Vec::new();
        }
        let len = self.shuffle.len();
        for i in 0..len {
            if self.chance(self.config.reorder_rate) {
                let j = self.rng.gen_range_usize(0..len);
                if i != j {
                    self.shuffle.swap(i, j);
                    self.stats.reordered += 1;
                }
            }
        }
        std::mem::take(&mut self.shuffle)
    }
}

impl<A, S> NonBlockingSocket<A> for ChaosSocket<A, S>
where
    A: Clone + PartialEq + Eq + Hash,
    S: NonBlockingSocket<A>,
{
    fn send_to(&mut self, packet: &Packet, addr: &A) {
        self.stats.sent += 1;
        if self.chance(self.config.loss_rate) {
            self.stats.dropped += 1;
            return;
        }
        self.inner.send_to(packet, addr);
        if self.chance(self.config.duplication_rate) {
            self.stats.duplicated += 1;
            self.inner.send_to(packet, addr);
        }
    }

    fn receive_all_packets(&mut self) -> Vec<(A, Packet)> {
        let now = Instant::now();
        for (addr, packet) in self.inner.receive_all_packets() {
            let due = self.due_at(now);
            let at = self.delayed.partition_point(|(t, _, _)| *t <= due);
            self.delayed.insert(at, (due, addr, packet));
        }
        let ready_count = self.delayed.partition_point(|(t, _, _)| *t <= now);
        let ready = self
            .delayed
            .drain(..ready_count)
            .map(|(_, addr, packet)| (addr, packet))
            .collect();
        let ready = self.shuffled(ready);
        self.stats.delivered += ready.len() as u64;
        ready
    }
}
