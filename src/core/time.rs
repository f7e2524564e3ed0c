//! Timestamps and time sources.
//!
//! Lock claims are ordered primarily by the timestamp at which they were
//! written, so every component that creates or judges claims draws time from
//! a single injectable [`TimestampProvider`]:
//! - [`SystemTimestamps`] samples the wall clock and sleeps the calling thread
//! - [`ManualTimestamps`] is a fabricated clock whose sleeps advance it
//!   instantly, for deterministic tests and simulations

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    nanos: u64,
}

impl Timestamp {
    /// Create a timestamp from nanoseconds since the epoch.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Create a timestamp from microseconds since the epoch.
    pub const fn from_micros(micros: u64) -> Self {
        Self {
            nanos: micros.saturating_mul(1_000),
        }
    }

    /// Create a timestamp from milliseconds since the epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis.saturating_mul(1_000_000),
        }
    }

    /// The epoch itself.
    pub const fn zero() -> Self {
        Self { nanos: 0 }
    }

    /// Nanoseconds since the epoch.
    pub const fn as_nanos(self) -> u64 {
        self.nanos
    }

    /// Add a duration, saturating at the maximum representable instant.
    pub fn plus(self, d: Duration) -> Self {
        Self {
            nanos: self.nanos.saturating_add(duration_nanos(d)),
        }
    }

    /// Subtract a duration, saturating at the epoch.
    pub fn minus(self, d: Duration) -> Self {
        Self {
            nanos: self.nanos.saturating_sub(duration_nanos(d)),
        }
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is later.
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }

    /// Check if this instant is strictly before `other`.
    pub const fn is_before(self, other: Timestamp) -> bool {
        self.nanos < other.nanos
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.nanos)
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Granularity of timestamps issued by a provider and of their stored form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampResolution {
    Nano,
    #[default]
    Micro,
    Milli,
}

impl TimestampResolution {
    /// Nanoseconds per unit.
    pub const fn unit_nanos(self) -> u64 {
        match self {
            Self::Nano => 1,
            Self::Micro => 1_000,
            Self::Milli => 1_000_000,
        }
    }

    /// Drop precision finer than this resolution.
    pub const fn truncate(self, ts: Timestamp) -> Timestamp {
        let unit = self.unit_nanos();
        Timestamp::from_nanos(ts.as_nanos() / unit * unit)
    }

    /// Express a timestamp as a count of units.
    pub const fn to_raw(self, ts: Timestamp) -> u64 {
        ts.as_nanos() / self.unit_nanos()
    }

    /// Inverse of [`TimestampResolution::to_raw`].
    pub const fn from_raw(self, raw: u64) -> Timestamp {
        Timestamp::from_nanos(raw.saturating_mul(self.unit_nanos()))
    }
}

impl std::fmt::Display for TimestampResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nano => write!(f, "nano"),
            Self::Micro => write!(f, "micro"),
            Self::Milli => write!(f, "milli"),
        }
    }
}

impl std::str::FromStr for TimestampResolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nano" => Ok(Self::Nano),
            "micro" => Ok(Self::Micro),
            "milli" => Ok(Self::Milli),
            other => anyhow::bail!("unknown timestamp resolution: {other}"),
        }
    }
}

/// Source of claim timestamps.
///
/// Implementations must be monotonic enough that two calls from one thread
/// never go backwards.
pub trait TimestampProvider: Send + Sync {
    /// Current instant, truncated to [`TimestampProvider::resolution`].
    fn now(&self) -> Timestamp;

    /// Resolution of issued timestamps.
    fn resolution(&self) -> TimestampResolution;

    /// Block until [`TimestampProvider::now`] is strictly after `deadline`
    /// and return that instant.
    fn sleep_past(&self, deadline: Timestamp) -> Timestamp;

    /// Block for at least `d`.
    fn sleep_for(&self, d: Duration) {
        let target = self.now().plus(d);
        self.sleep_past(target);
    }
}

/// Wall-clock provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimestamps {
    resolution: TimestampResolution,
}

impl SystemTimestamps {
    /// Create a wall-clock provider with the given resolution.
    pub fn new(resolution: TimestampResolution) -> Self {
        Self { resolution }
    }
}

impl TimestampProvider for SystemTimestamps {
    fn now(&self) -> Timestamp {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        self.resolution
            .truncate(Timestamp::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    fn resolution(&self) -> TimestampResolution {
        self.resolution
    }

    fn sleep_past(&self, deadline: Timestamp) -> Timestamp {
        loop {
            let now = self.now();
            if deadline.is_before(now) {
                return now;
            }
            // Overshoot by one unit so the truncated clock moves past the deadline.
            let remaining = deadline.saturating_duration_since(now)
                + Duration::from_nanos(self.resolution.unit_nanos());
            std::thread::sleep(remaining);
        }
    }
}

/// Fabricated clock for tests and simulations.
///
/// Time only moves when [`ManualTimestamps::advance`] or [`ManualTimestamps::set`]
/// is called, or when a caller sleeps, in which case the clock jumps just past
/// the requested deadline without blocking.
#[derive(Debug)]
pub struct ManualTimestamps {
    nanos: AtomicU64,
    resolution: TimestampResolution,
}

impl ManualTimestamps {
    /// Create a manual clock starting at `start`.
    pub fn new(start: Timestamp, resolution: TimestampResolution) -> Self {
        Self {
            nanos: AtomicU64::new(resolution.truncate(start).as_nanos()),
            resolution,
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, d: Duration) -> Timestamp {
        let delta = duration_nanos(d);
        let prev = self.nanos.fetch_add(delta, Ordering::AcqRel);
        Timestamp::from_nanos(prev.saturating_add(delta))
    }

    /// Jump to a specific instant. Never moves the clock backwards.
    pub fn set(&self, ts: Timestamp) {
        self.nanos.fetch_max(ts.as_nanos(), Ordering::AcqRel);
    }
}

impl TimestampProvider for ManualTimestamps {
    fn now(&self) -> Timestamp {
        self.resolution
            .truncate(Timestamp::from_nanos(self.nanos.load(Ordering::Acquire)))
    }

    fn resolution(&self) -> TimestampResolution {
        self.resolution
    }

    fn sleep_past(&self, deadline: Timestamp) -> Timestamp {
        let target = deadline.as_nanos().saturating_add(self.resolution.unit_nanos());
        self.nanos.fetch_max(target, Ordering::AcqRel);
        self.now()
    }
}
