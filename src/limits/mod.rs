//! File-descriptor limits and capacity negotiation
//!
//! Provides the boot snapshot, the capacity estimator, the feasibility
//! checker and the limit raiser.

mod backend;
mod boot;
mod estimator;
mod feasibility;
mod raiser;

use std::fmt;

pub use backend::{RlimitBackend, SimulatedRlimit};
#[cfg(unix)]
pub use backend::SystemRlimit;
pub use boot::BootSnapshot;
pub use estimator::{CapacityEstimator, EstimatorSettings, SpliceDemand};
pub use feasibility::check_if_maxsock_permitted;
pub use raiser::{raise_limit_nofile, RaiseOutcome, RaiseReport};

/// Descriptors consumed by one proxied connection (client + server side)
pub const FDS_PER_CONN: u64 = 2;

/// Spliced connections sharing one pipe on average
pub const CONNS_PER_PIPE: u64 = 4;

/// Descriptors held by one pipe (read end + write end)
pub const FDS_PER_PIPE: u64 = 2;

/// stdin, stdout, stderr
pub const STDIO_FDS: u64 = 3;

/// Admin socket, log socket and the signal self-pipe pair
pub const AUX_FDS: u64 = 4;

/// Poller descriptor plus wake-up pipe pair, per thread
pub const FDS_PER_THREAD: u64 = 3;

/// Working ceiling substituted when the boot maximum is unbounded
pub const UNBOUNDED_FD_CEILING: u64 = 1_048_576;

/// Pipe budget used when no finite descriptor ceiling is known
pub const DEFAULT_MAXPIPES: u64 = 16_384;

/// Smallest connection budget ever suggested
pub const MIN_MAXCONN: u64 = 16;

static_assertions::const_assert!(MIN_MAXCONN > 0);
static_assertions::const_assert!(CONNS_PER_PIPE > 0);
static_assertions::const_assert!(DEFAULT_MAXPIPES * FDS_PER_PIPE < UNBOUNDED_FD_CEILING);

/// A single descriptor limit as granted by the OS
///
/// Every bounded value orders below `Unbounded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceLimit {
    /// Finite number of descriptors
    Bounded(u64),
    /// No limit (`RLIM_INFINITY`)
    Unbounded,
}

impl ResourceLimit {
    /// Finite value, if any
    #[must_use]
    pub const fn finite(self) -> Option<u64> {
        match self {
            Self::Bounded(n) => Some(n),
            Self::Unbounded => None,
        }
    }

    /// Whether `count` descriptors fit under this limit
    #[must_use]
    pub const fn admits(self, count: u64) -> bool {
        match self {
            Self::Bounded(n) => count <= n,
            Self::Unbounded => true,
        }
    }
}

impl fmt::Display for ResourceLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(n) => write!(f, "{n}"),
            Self::Unbounded => f.write_str("unlimited"),
        }
    }
}

/// Soft/hard `RLIMIT_NOFILE` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LimitPair {
    /// Soft limit, enforced now
    pub current: ResourceLimit,
    /// Hard limit, ceiling for the soft limit
    pub maximum: ResourceLimit,
}

impl LimitPair {
    /// Pair of two finite limits
    #[must_use]
    pub const fn bounded(current: u64, maximum: u64) -> Self {
        Self {
            current: ResourceLimit::Bounded(current),
            maximum: ResourceLimit::Bounded(maximum),
        }
    }

    /// Whether the soft limit does not exceed the hard limit
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.current <= self.maximum
    }

    /// Same hard limit, soft limit raised toward `target` but capped at the hard limit
    #[must_use]
    pub fn with_capped_current(&self, target: ResourceLimit) -> Self {
        Self {
            current: target.min(self.maximum),
            maximum: self.maximum,
        }
    }
}

impl fmt::Display for LimitPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "soft={}, hard={}", self.current, self.maximum)
    }
}
