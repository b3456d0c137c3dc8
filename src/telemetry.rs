//! Violations: things a peer noticed that should not happen in a healthy match.
//!
//! A dropped datagram, a contradicted ledger entry or a rejected move is reported as a
//! [`Violation`] rather than a bare log line. Sessions hand them to their
//! [`ViolationObserver`], which logs through `tracing` unless the caller installed a
//! [`CollectingObserver`] to inspect them in tests.
//!
//! ```
//! use lockstep_chess::telemetry::{CollectingObserver, ViolationKind};
//!
//! let observer = CollectingObserver::new();
//! assert!(!observer.has_violation(ViolationKind::Ledger));
//! ```

use crate::Tick;
use parking_lot::Mutex;
use std::sync::Arc;

/// How bad it is, from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// The offending input was dropped and play goes on, e.g. an undecodable datagram.
    Warning,
    /// Something local failed, e.g. a socket send.
    Error,
    /// Peers can no longer agree, e.g. a participant contradicted its own ledger entry.
    Critical,
}

/// Where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// Contradicting ledger entries.
    Ledger,
    /// Malformed, foreign or unroutable packets.
    NetworkProtocol,
    /// An action the rule engine refused.
    Rules,
    /// A replay request that could not be honored.
    Replay,
    /// Lookup service failures.
    Discovery,
    /// A background thread died.
    Internal,
}

impl ViolationKind {
    /// Label used in log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ledger => "ledger",
            Self::NetworkProtocol => "network_protocol",
            Self::Rules => "rules",
            Self::Replay => "replay",
            Self::Discovery => "discovery",
            Self::Internal => "internal",
        }
    }
}

/// One reported violation.
///
/// ```
/// use lockstep_chess::telemetry::{Violation, ViolationKind, ViolationSeverity};
/// use lockstep_chess::Tick;
///
/// let violation = Violation::new(
///     ViolationSeverity::Critical,
///     ViolationKind::Ledger,
///     "conflicting entry",
///     "ledger.rs:1",
/// )
/// .with_tick(Tick::new(12));
///
/// assert!(violation.to_string().contains("tick 12"));
/// ```
#[derive(Debug, Clone, serde::Serialize)]
pub struct Violation {
    /// How bad it is.
    pub severity: ViolationSeverity,
    /// Where it happened.
    pub kind: ViolationKind,
    /// What happened.
    pub message: String,
    /// `file:line` of the report.
    pub location: &'static str,
    /// Tick the session was on, if a session reported it.
    pub tick: Option<Tick>,
}

impl Violation {
    /// Creates a violation without a tick.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            tick: None,
        }
    }

    /// Attaches the session tick.
    #[must_use]
    pub fn with_tick(mut self, tick: Tick) -> Self {
        self.tick = Some(tick);
        self
    }

    /// One JSON object, for shipping to a log collector.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} at {}", self.message, self.kind.as_str(), self.location)?;
        if let Some(tick) = self.tick {
            write!(f, ", tick {tick}")?;
        }
        write!(f, ")")
    }
}

/// Receives violations. Shared with the discovery thread, hence `Send + Sync`.
pub trait ViolationObserver: Send + Sync {
    /// Runs inside the tick loop, so it should return quickly.
    fn on_violation(&self, violation: &Violation);
}

/// Logs through `tracing`: warnings as `warn!`, the rest as `error!`.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &Violation) {
        let kind = violation.kind.as_str();
        let location = violation.location;
        let tick = violation.tick.map(Tick::as_u32);
        match violation.severity {
            ViolationSeverity::Warning => {
                tracing::warn!(kind, location, tick, "{}", violation.message);
            },
            ViolationSeverity::Error | ViolationSeverity::Critical => {
                tracing::error!(kind, location, tick, "{}", violation.message);
            },
        }
    }
}

/// Keeps every violation so tests can assert on them.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<Violation>>,
}

impl CollectingObserver {
    /// Starts empty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything seen so far.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    /// Nothing seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Whether any violation of `kind` was seen.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// Violations at least as severe as `min_severity`.
    #[must_use]
    pub fn violations_at_severity(&self, min_severity: ViolationSeverity) -> Vec<Violation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.severity >= min_severity)
            .cloned()
            .collect()
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &Violation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Reports to [`TracingObserver`] with the current file and line. For code outside a session.
///
/// ```
/// use lockstep_chess::{report_violation, telemetry::{ViolationKind, ViolationSeverity}};
///
/// report_violation!(ViolationSeverity::Warning, ViolationKind::Discovery,
///     "lookup returned {} peers", 0);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $($fmt:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($($fmt)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};
}

/// Sends a violation to `observer`, or to [`TracingObserver`] when there is none.
pub fn report_to_observer<O: ViolationObserver + ?Sized>(observer: Option<&Arc<O>>, violation: &Violation) {
    match observer {
        Some(obs) => obs.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Like [`report_violation!`], but through a session's observer and stamped with its tick.
///
/// ```
/// use lockstep_chess::{report_violation_to, telemetry::{CollectingObserver, ViolationKind, ViolationObserver, ViolationSeverity}};
/// use lockstep_chess::Tick;
/// use std::sync::Arc;
///
/// let observer: Option<Arc<dyn ViolationObserver>> = Some(Arc::new(CollectingObserver::new()));
/// report_violation_to!(&observer, Tick::new(4), ViolationSeverity::Warning,
///     ViolationKind::NetworkProtocol, "dropped packet from {}", "10.0.0.2:9000");
/// ```
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $tick:expr, $severity:expr, $kind:expr, $($fmt:tt)+) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($($fmt)+),
            concat!(file!(), ":", line!()),
        )
        .with_tick($tick);
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
}
