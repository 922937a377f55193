//! Access to the process `RLIMIT_NOFILE` pair

use std::cell::Cell;

use crate::error::LimitError;

use super::{LimitPair, ResourceLimit};

/// Source and sink of the process descriptor limit
pub trait RlimitBackend {
    /// Read the current soft/hard pair
    ///
    /// # Errors
    ///
    /// Returns the OS failure class if the limit cannot be read
    fn get(&self) -> std::result::Result<LimitPair, LimitError>;

    /// Replace the soft/hard pair
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` when raising the hard limit needs privilege,
    /// or another class for any other rejection
    fn set(&self, limit: LimitPair) -> std::result::Result<(), LimitError>;
}

/// The real process limit, via `getrlimit(2)`/`setrlimit(2)`
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRlimit;

#[cfg(unix)]
impl SystemRlimit {
    /// Create a handle on the process limit
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[allow(clippy::useless_conversion, clippy::unnecessary_cast)]
mod raw {
    use nix::libc::{rlim_t, RLIM_INFINITY};

    use super::ResourceLimit;

    pub(super) fn from_raw(value: rlim_t) -> ResourceLimit {
        if value == RLIM_INFINITY {
            ResourceLimit::Unbounded
        } else {
            ResourceLimit::Bounded(value as u64)
        }
    }

    pub(super) fn to_raw(limit: ResourceLimit) -> rlim_t {
        match limit {
            // Values that do not fit are clamped just below the sentinel
            ResourceLimit::Bounded(n) => rlim_t::try_from(n)
                .unwrap_or(RLIM_INFINITY - 1)
                .min(RLIM_INFINITY - 1),
            ResourceLimit::Unbounded => RLIM_INFINITY,
        }
    }
}

#[cfg(unix)]
impl RlimitBackend for SystemRlimit {
    fn get(&self) -> std::result::Result<LimitPair, LimitError> {
        use nix::sys::resource::{getrlimit, Resource};

        let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;
        Ok(LimitPair {
            current: raw::from_raw(soft),
            maximum: raw::from_raw(hard),
        })
    }

    fn set(&self, limit: LimitPair) -> std::result::Result<(), LimitError> {
        use nix::sys::resource::{setrlimit, Resource};

        setrlimit(
            Resource::RLIMIT_NOFILE,
            raw::to_raw(limit.current),
            raw::to_raw(limit.maximum),
        )?;
        Ok(())
    }
}

/// In-memory model of the OS limit rules
///
/// Follows the `setrlimit(2)` contract: the soft limit may not exceed the
/// hard limit, and only a privileged process may raise the hard limit or go
/// past the system-wide ceiling.
#[derive(Debug)]
pub struct SimulatedRlimit {
    limit: Cell<LimitPair>,
    privileged: bool,
    system_ceiling: ResourceLimit,
    fail_queries: bool,
    set_calls: Cell<usize>,
}

impl SimulatedRlimit {
    /// Unprivileged process holding `limit`
    #[must_use]
    pub fn new(limit: LimitPair) -> Self {
        Self {
            limit: Cell::new(limit),
            privileged: false,
            system_ceiling: ResourceLimit::Unbounded,
            fail_queries: false,
            set_calls: Cell::new(0),
        }
    }

    /// Grant or revoke the privilege to raise the hard limit
    #[must_use]
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// System-wide ceiling no process may exceed (like `fs.nr_open`)
    #[must_use]
    pub fn system_ceiling(mut self, ceiling: ResourceLimit) -> Self {
        self.system_ceiling = ceiling;
        self
    }

    /// Make every query fail
    #[must_use]
    pub fn failing_queries(mut self) -> Self {
        self.fail_queries = true;
        self
    }

    /// Pair currently in effect
    #[must_use]
    pub fn limit(&self) -> LimitPair {
        self.limit.get()
    }

    /// Number of `set` calls seen, successful or not
    #[must_use]
    pub fn set_calls(&self) -> usize {
        self.set_calls.get()
    }
}

impl RlimitBackend for SimulatedRlimit {
    fn get(&self) -> std::result::Result<LimitPair, LimitError> {
        if self.fail_queries {
            return Err(LimitError::Os(14));
        }
        Ok(self.limit.get())
    }

    fn set(&self, limit: LimitPair) -> std::result::Result<(), LimitError> {
        self.set_calls.set(self.set_calls.get() + 1);

        if !limit.is_consistent() {
            return Err(LimitError::InvalidArgument);
        }

        let raises_hard = limit.maximum > self.limit.get().maximum;
        if limit.maximum > self.system_ceiling || (raises_hard && !self.privileged) {
            return Err(LimitError::PermissionDenied);
        }

        self.limit.set(limit);
        Ok(())
    }
}
