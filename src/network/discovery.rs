//! Client for the matchmaking lookup service, and the background thread that talks to it.
//!
//! The service maps short human-typable match addresses to UDP endpoints:
//!
//! | request                               | response                                |
//! |---------------------------------------|-----------------------------------------|
//! | `/register/{ns}/{ip}/{port}/`         | the new match address                   |
//! | `/lookup/{ns}/{addr}/`                | whitespace-separated `host:port` peers  |
//! | `/connect/{ns}/{my_addr}/{addr}/`     | peer list, or 404 for an unknown match  |
//!
//! All HTTP happens on the [`DiscoveryWorker`] thread; the session only ever drains its
//! mailbox, so the tick loop never blocks on the network.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::ChessError;
use crate::report_violation;
use crate::telemetry::{ViolationKind, ViolationSeverity};

/// Where the lookup service lives and how often to ask it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Scheme and host, without a trailing slash.
    pub base_url: String,
    /// Path segment separating this game from others on the same service.
    pub namespace: String,
    /// Pause between lookups while waiting for someone to join, and between retries.
    pub poll_interval: Duration,
    /// Timeout for a single HTTP request.
    pub request_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://game-match.herokuapp.com".to_owned(),
            namespace: "chess2".to_owned(),
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl DiscoveryConfig {
    /// A config pointing at `base_url`, otherwise default.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Checks the values are usable.
    pub fn validate(&self) -> Result<(), ChessError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ChessError::InvalidRequest {
                info: format!("base_url must be an http(s) URL, got {:?}", self.base_url),
            });
        }
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(ChessError::InvalidRequest {
                info: format!("namespace must be a single path segment, got {:?}", self.namespace),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ChessError::InvalidRequest {
                info: "poll_interval must be non-zero".to_owned(),
            });
        }
        Ok(())
    }
}

/// The three calls the lookup service offers. Replace it in tests or to use another service.
pub trait PeerDirectory: Send + 'static {
    /// Registers an endpoint and returns its new match address.
    fn register(&self, endpoint: SocketAddr) -> Result<String, ChessError>;

    /// Peers that have connected to `address` so far.
    fn lookup(&self, address: &str) -> Result<Vec<SocketAddr>, ChessError>;

    /// Joins the match at `address` from our own match `my_address`.
    /// Fails with [`ChessError::NoSuchGame`] when the service does not know it.
    fn connect(&self, my_address: &str, address: &str) -> Result<Vec<SocketAddr>, ChessError>;
}

/// [`PeerDirectory`] over HTTP with a blocking client.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: reqwest::blocking::Client,
    config: DiscoveryConfig,
}

impl HttpDirectory {
    /// Builds the HTTP client.
    pub fn new(config: DiscoveryConfig) -> Result<Self, ChessError> {
        config.validate()?;
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChessError::DiscoveryError {
                context: format!("building http client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    fn url(&self, verb: &str, segments: &[&str]) -> String {
        let mut url = format!("{}/{}/{}/", self.config.base_url, verb, self.config.namespace);
        for segment in segments {
            url.push_str(&escape_segment(segment));
            url.push('/');
        }
        url
    }

    fn get(&self, url: &str, address: &str) -> Result<String, ChessError> {
        trace!(url, "discovery request");
        let response = self.client.get(url).send().map_err(|e| ChessError::DiscoveryError {
            context: format!("GET {}: {}", url, e),
        })?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ChessError::NoSuchGame {
                address: address.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(ChessError::DiscoveryError {
                context: format!("GET {}: server answered {}", url, status),
            });
        }
        response.text().map_err(|e| ChessError::DiscoveryError {
            context: format!("GET {}: reading body: {}", url, e),
        })
    }
}

impl PeerDirectory for HttpDirectory {
    fn register(&self, endpoint: SocketAddr) -> Result<String, ChessError> {
        let ip = endpoint.ip().to_string();
        let port = endpoint.port().to_string();
        let url = self.url("register", &[&ip, &port]);
        self.get(&url, "").map(|body| body.trim().to_owned())
    }

    fn lookup(&self, address: &str) -> Result<Vec<SocketAddr>, ChessError> {
        let url = self.url("lookup", &[address]);
        self.get(&url, address).map(|body| parse_peer_list(&body))
    }

    fn connect(&self, my_address: &str, address: &str) -> Result<Vec<SocketAddr>, ChessError> {
        let target = address.to_lowercase();
        let url = self.url("connect", &[my_address, &target]);
        self.get(&url, address).map(|body| parse_peer_list(&body))
    }
}

/// Match addresses are words separated by spaces; those are the only characters escaped.
fn escape_segment(segment: &str) -> String {
    segment.replace(' ', "%20")
}

/// Parses whitespace-separated `host:port` entries. Entries that are not socket addresses
/// are reported and skipped.
#[must_use]
pub fn parse_peer_list(text: &str) -> Vec<SocketAddr> {
    text.split_whitespace()
        .filter_map(|entry| match entry.parse() {
            Ok(addr) => Some(addr),
            Err(e) => {
                report_violation!(
                    ViolationSeverity::Warning,
                    ViolationKind::Discovery,
                    "ignoring malformed peer entry {:?}: {}",
                    entry,
                    e
                );
                None
            },
        })
        .collect()
}

/// Results the worker hands to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// Our endpoint is registered under this match address.
    Registered {
        /// Address to tell friends.
        address: String,
    },
    /// Peers to add, already stripped of our own endpoint.
    Peers(Vec<SocketAddr>),
    /// A connect request named a match the service does not know.
    NoSuchGame {
        /// The address that was tried.
        address: String,
    },
    /// A request failed; the worker will retry where that makes sense.
    Failed {
        /// What went wrong.
        context: String,
    },
}

#[derive(Debug, Default)]
struct Mailbox {
    events: Vec<DiscoveryEvent>,
    connect_requests: Vec<String>,
}

/// Background thread that registers this peer, polls for peers joining it, and runs
/// connect requests.
///
/// Dropping the worker stops the thread and waits for it. A request already in flight
/// finishes first, bounded by [`DiscoveryConfig::request_timeout`].
#[derive(Debug)]
pub struct DiscoveryWorker {
    mailbox: Arc<Mutex<Mailbox>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DiscoveryWorker {
    /// Starts the thread. `endpoint` is our externally reachable UDP address.
    pub fn spawn<D: PeerDirectory>(directory: D, endpoint: SocketAddr, config: DiscoveryConfig) -> Self {
        let mailbox = Arc::new(Mutex::new(Mailbox::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let mailbox = Arc::clone(&mailbox);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                WorkerLoop {
                    directory,
                    endpoint,
                    poll_interval: config.poll_interval,
                    mailbox,
                    stop,
                }
                .run();
            })
        };
        Self {
            mailbox,
            stop,
            handle: Some(handle),
        }
    }

    /// Asks the worker to join the match at `address`.
    pub fn connect(&self, address: &str) {
        self.mailbox.lock().connect_requests.push(address.to_owned());
    }

    /// Takes every result produced since the last call.
    #[must_use]
    pub fn poll(&self) -> Vec<DiscoveryEvent> {
        std::mem::take(&mut self.mailbox.lock().events)
    }

    /// Signals the thread to stop and waits for it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                report_violation!(
                    ViolationSeverity::Error,
                    ViolationKind::Internal,
                    "discovery thread panicked"
                );
            }
        }
    }
}

impl Drop for DiscoveryWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerLoop<D> {
    directory: D,
    endpoint: SocketAddr,
    poll_interval: Duration,
    mailbox: Arc<Mutex<Mailbox>>,
    stop: Arc<AtomicBool>,
}

impl<D: PeerDirectory> WorkerLoop<D> {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn post(&self, event: DiscoveryEvent) {
        self.mailbox.lock().events.push(event);
    }

    fn fail(&self, err: &ChessError) {
        self.post(DiscoveryEvent::Failed {
            context: err.to_string(),
        });
    }

    /// Sleeps for `duration` in short slices, returning early once stopped.
    fn pause(&self, duration: Duration) {
        const SLICE: Duration = Duration::from_millis(20);
        let mut left = duration;
        while !left.is_zero() && !self.stopped() {
            let step = left.min(SLICE);
            std::thread::sleep(step);
            left -= step;
        }
    }

    fn peers_without_self(&self, peers: Vec<SocketAddr>) -> Vec<SocketAddr> {
        peers.into_iter().filter(|p| *p != self.endpoint).collect()
    }

    fn run(self) {
        let Some(address) = self.register() else {
            return;
        };
        let mut waiting_for_joiners = true;
        while !self.stopped() {
            let requests = std::mem::take(&mut self.mailbox.lock().connect_requests);
            for target in requests {
                if self.stopped() {
                    return;
                }
                match self.directory.connect(&address, &target) {
                    Ok(peers) => {
                        debug!(%target, count = peers.len(), "connected through lookup service");
                        waiting_for_joiners = false;
                        self.post(DiscoveryEvent::Peers(self.peers_without_self(peers)));
                    },
                    Err(ChessError::NoSuchGame { address }) => {
                        self.post(DiscoveryEvent::NoSuchGame { address });
                    },
                    Err(err) => self.fail(&err),
                }
            }

            if waiting_for_joiners {
                match self.directory.lookup(&address) {
                    Ok(peers) => {
                        let peers = self.peers_without_self(peers);
                        if !peers.is_empty() {
                            debug!(count = peers.len(), "peers joined our match");
                            waiting_for_joiners = false;
                            self.post(DiscoveryEvent::Peers(peers));
                        }
                    },
                    Err(err) => self.fail(&err),
                }
            }
            self.pause(self.poll_interval);
        }
    }

    fn register(&self) -> Option<String> {
        while !self.stopped() {
            match self.directory.register(self.endpoint) {
                Ok(address) => {
                    debug!(%address, endpoint = %self.endpoint, "registered with lookup service");
                    self.post(DiscoveryEvent::Registered {
                        address: address.clone(),
                    });
                    return Some(address);
                },
                Err(err) => {
                    self.fail(&err);
                    self.pause(self.poll_interval);
                },
            }
        }
        None
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn peer_list_skips_garbage() {
        let peers = parse_peer_list("1.2.3.4:5000\n  nonsense 10.0.0.1:7\n");
        assert_eq!(
            peers,
            vec!["1.2.3.4:5000".parse().unwrap(), "10.0.0.1:7".parse().unwrap()]
        );
    }

    #[test]
    fn urls_escape_spaces() {
        let directory = HttpDirectory::new(DiscoveryConfig::default()).unwrap();
        assert_eq!(
            directory.url("lookup", &["red fox jumps"]),
            "http://game-match.herokuapp.com/lookup/chess2/red%20fox%20jumps/"
        );
    }

    #[test]
    fn config_rejects_bad_namespace() {
        let mut config = DiscoveryConfig::default();
        config.namespace = "a/b".to_owned();
        assert!(config.validate().is_err());
        assert!(DiscoveryConfig::with_base_url("ftp://x").validate().is_err());
    }

    struct Scripted {
        peers: Mutex<Vec<Vec<SocketAddr>>>,
    }

    impl PeerDirectory for Scripted {
        fn register(&self, _endpoint: SocketAddr) -> Result<String, ChessError> {
            Ok("blue cat".to_owned())
        }

        fn lookup(&self, _address: &str) -> Result<Vec<SocketAddr>, ChessError> {
            Ok(self.peers.lock().pop().unwrap_or_default())
        }

        fn connect(&self, _my: &str, address: &str) -> Result<Vec<SocketAddr>, ChessError> {
            Err(ChessError::NoSuchGame {
                address: address.to_owned(),
            })
        }
    }

    fn wait_for(worker: &DiscoveryWorker, count: usize) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        for _ in 0..200 {
            events.extend(worker.poll());
            if events.len() >= count {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        events
    }

    #[test]
    fn worker_registers_then_reports_joiners_without_self() {
        let me: SocketAddr = "9.9.9.9:1000".parse().unwrap();
        let friend: SocketAddr = "8.8.8.8:2000".parse().unwrap();
        let directory = Scripted {
            peers: Mutex::new(vec![vec![me, friend], vec![]]),
        };
        let config = DiscoveryConfig {
            poll_interval: Duration::from_millis(5),
            ..DiscoveryConfig::default()
        };
        let worker = DiscoveryWorker::spawn(directory, me, config);
        let events = wait_for(&worker, 2);
        assert_eq!(
            events,
            vec![
                DiscoveryEvent::Registered {
                    address: "blue cat".to_owned()
                },
                DiscoveryEvent::Peers(vec![friend]),
            ]
        );
    }

    #[test]
    fn unknown_match_is_reported() {
        let directory = Scripted {
            peers: Mutex::new(vec![]),
        };
        let config = DiscoveryConfig {
            poll_interval: Duration::from_millis(5),
            ..DiscoveryConfig::default()
        };
        let worker = DiscoveryWorker::spawn(directory, "9.9.9.9:1000".parse().unwrap(), config);
        worker.connect("no such place");
        let events = wait_for(&worker, 2);
        assert!(events.contains(&DiscoveryEvent::NoSuchGame {
            address: "no such place".to_owned()
        }));
    }
}
