//! Descriptor limits captured at process start

use std::sync::OnceLock;

use tracing::{debug, info};

use crate::{FdBudgetError, Result};

use super::{LimitPair, ResourceLimit, RlimitBackend};

static GLOBAL: OnceLock<BootSnapshot> = OnceLock::new();

/// The `RLIMIT_NOFILE` pair as it was before any initialization ran
///
/// Values never change after capture, even when the OS limit is raised later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSnapshot {
    fd_current_at_boot: ResourceLimit,
    fd_maximum_at_boot: ResourceLimit,
}

impl BootSnapshot {
    /// Read the limit pair from the OS
    ///
    /// Must run before configuration parsing or anything else that may
    /// touch the limit.
    ///
    /// # Errors
    ///
    /// Returns `LimitQuery` if the OS refuses to report the limit; startup
    /// cannot continue without it.
    pub fn capture(backend: &impl RlimitBackend) -> Result<Self> {
        let limit = backend.get().map_err(FdBudgetError::LimitQuery)?;
        info!("Descriptor limits at boot: {}", limit);
        Ok(Self::from_pair(limit))
    }

    /// Snapshot of a known pair
    #[must_use]
    pub const fn from_pair(limit: LimitPair) -> Self {
        Self {
            fd_current_at_boot: limit.current,
            fd_maximum_at_boot: limit.maximum,
        }
    }

    /// Soft limit at boot
    #[must_use]
    pub const fn fd_current_at_boot(&self) -> ResourceLimit {
        self.fd_current_at_boot
    }

    /// Hard limit at boot
    #[must_use]
    pub const fn fd_maximum_at_boot(&self) -> ResourceLimit {
        self.fd_maximum_at_boot
    }

    /// Both boot values as a pair
    #[must_use]
    pub const fn pair(&self) -> LimitPair {
        LimitPair {
            current: self.fd_current_at_boot,
            maximum: self.fd_maximum_at_boot,
        }
    }

    /// Publish this snapshot as the process-wide one
    ///
    /// # Errors
    ///
    /// Returns `SnapshotAlreadyInstalled` if a snapshot was published before
    pub fn install(self) -> Result<&'static Self> {
        GLOBAL
            .set(self)
            .map_err(|_| FdBudgetError::SnapshotAlreadyInstalled)?;
        debug!("Boot snapshot installed");
        GLOBAL.get().ok_or(FdBudgetError::SnapshotAlreadyInstalled)
    }

    /// Process-wide snapshot, if installed
    #[must_use]
    pub fn global() -> Option<&'static Self> {
        GLOBAL.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimitError;
    use crate::limits::SimulatedRlimit;

    #[test]
    fn test_capture_reads_backend() {
        let backend = SimulatedRlimit::new(LimitPair::bounded(1024, 4096));
        let snapshot = BootSnapshot::capture(&backend).unwrap();

        assert_eq!(snapshot.fd_current_at_boot(), ResourceLimit::Bounded(1024));
        assert_eq!(snapshot.fd_maximum_at_boot(), ResourceLimit::Bounded(4096));
    }

    #[test]
    fn test_snapshot_ignores_later_raises() {
        let backend = SimulatedRlimit::new(LimitPair::bounded(1024, 4096));
        let snapshot = BootSnapshot::capture(&backend).unwrap();

        backend.set(LimitPair::bounded(4096, 4096)).unwrap();

        assert_eq!(snapshot.pair(), LimitPair::bounded(1024, 4096));
    }

    #[test]
    fn test_capture_failure_is_fatal() {
        let backend = SimulatedRlimit::new(LimitPair::bounded(1024, 4096)).failing_queries();
        let err = BootSnapshot::capture(&backend).unwrap_err();

        assert!(matches!(err, FdBudgetError::LimitQuery(LimitError::Os(_))));
    }

    #[test]
    fn test_install_is_write_once() {
        let first = BootSnapshot::from_pair(LimitPair::bounded(1024, 4096));
        let second = BootSnapshot::from_pair(LimitPair::bounded(8192, 8192));

        // Only test in this binary touching the global
        let installed = first.install().unwrap();
        assert_eq!(*installed, first);

        assert!(matches!(
            second.install(),
            Err(FdBudgetError::SnapshotAlreadyInstalled)
        ));
        assert_eq!(BootSnapshot::global(), Some(&first));
    }
}
