//! Raising the process descriptor limit

use tracing::{info, warn};

use crate::error::LimitError;
use crate::{FdBudgetError, Result};

use super::{LimitPair, RlimitBackend};

/// Terminal state of a raise attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseOutcome {
    /// Both limits set as requested
    Raised,
    /// Hard limit could not be raised; soft limit raised up to the existing hard limit
    RaisedPartial,
    /// Nothing changed
    Failed(LimitError),
}

/// What a raise attempt started from and ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaiseReport {
    /// Pair in effect before any change
    pub old: LimitPair,
    /// Pair that was asked for
    pub requested: LimitPair,
    /// Pair in effect afterwards
    pub achieved: LimitPair,
    /// How the attempt ended
    pub outcome: RaiseOutcome,
}

impl RaiseReport {
    /// Whether the requested soft limit is now in effect
    #[must_use]
    pub fn reached_target(&self) -> bool {
        self.achieved.current >= self.requested.current
    }
}

/// Raise `RLIMIT_NOFILE` to `new_limit`
///
/// Tries the full pair first. If the OS refuses with a privilege error,
/// retries with only the soft limit, capped at the hard limit already in
/// effect. Any other rejection ends in `Failed`.
///
/// # Errors
///
/// Returns `LimitQuery` if the limit in effect cannot be read beforehand
pub fn raise_limit_nofile(
    backend: &impl RlimitBackend,
    new_limit: LimitPair,
) -> Result<RaiseReport> {
    let old = backend.get().map_err(FdBudgetError::LimitQuery)?;

    let report = |achieved, outcome| RaiseReport {
        old,
        requested: new_limit,
        achieved,
        outcome,
    };

    match backend.set(new_limit) {
        Ok(()) => {
            info!("Raised descriptor limit from {} to {}", old, new_limit);
            return Ok(report(new_limit, RaiseOutcome::Raised));
        }
        Err(LimitError::PermissionDenied) => {
            warn!(
                "Not permitted to set descriptor limit to {}, keeping hard limit {}",
                new_limit, old.maximum
            );
        }
        Err(e) => {
            warn!("Cannot set descriptor limit to {}: {}", new_limit, e);
            return Ok(report(old, RaiseOutcome::Failed(e)));
        }
    }

    let soft_only = old.with_capped_current(new_limit.current);
    match backend.set(soft_only) {
        Ok(()) => {
            info!(
                "Raised descriptor soft limit from {} to {} (requested {})",
                old.current, soft_only.current, new_limit.current
            );
            Ok(report(soft_only, RaiseOutcome::RaisedPartial))
        }
        Err(e) => {
            warn!("Cannot set descriptor soft limit to {}: {}", soft_only.current, e);
            Ok(report(old, RaiseOutcome::Failed(e)))
        }
    }
}
