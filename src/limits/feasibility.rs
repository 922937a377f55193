//! Whether a socket budget fits under the current hard limit

use tracing::debug;

use crate::{FdBudgetError, Result};

use super::RlimitBackend;

/// Check `maxsock` against the hard limit in effect now
///
/// True when the hard limit is unbounded or at least `maxsock`. Nothing is
/// changed.
///
/// # Errors
///
/// Returns `LimitQuery` if the limit in effect cannot be read
pub fn check_if_maxsock_permitted(backend: &impl RlimitBackend, maxsock: u64) -> Result<bool> {
    let limit = backend.get().map_err(FdBudgetError::LimitQuery)?;

    let permitted = limit.maximum.admits(maxsock);
    debug!(
        "maxsock {} against hard limit {}: {}",
        maxsock,
        limit.maximum,
        if permitted { "permitted" } else { "exceeds" }
    );
    Ok(permitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{LimitPair, ResourceLimit, SimulatedRlimit};
    use proptest::prelude::*;

    #[test]
    fn test_uses_current_not_boot_limit() {
        let backend = SimulatedRlimit::new(LimitPair::bounded(1024, 1024)).privileged(true);
        assert!(!check_if_maxsock_permitted(&backend, 4096).unwrap());

        backend.set(LimitPair::bounded(4096, 4096)).unwrap();
        assert!(check_if_maxsock_permitted(&backend, 4096).unwrap());
    }

    #[test]
    fn test_unbounded_hard_limit_permits_everything() {
        let backend = SimulatedRlimit::new(LimitPair {
            current: ResourceLimit::Bounded(1024),
            maximum: ResourceLimit::Unbounded,
        });

        assert!(check_if_maxsock_permitted(&backend, u64::MAX).unwrap());
    }

    #[test]
    fn test_query_failure_is_reported() {
        let backend = SimulatedRlimit::new(LimitPair::bounded(1024, 1024)).failing_queries();
        assert!(matches!(
            check_if_maxsock_permitted(&backend, 1_000_000),
            Err(FdBudgetError::LimitQuery(_))
        ));
    }

    #[test]
    fn test_check_never_sets() {
        let backend = SimulatedRlimit::new(LimitPair::bounded(1024, 4096));
        let _ = check_if_maxsock_permitted(&backend, 8192);

        assert_eq!(backend.set_calls(), 0);
        assert_eq!(backend.limit(), LimitPair::bounded(1024, 4096));
    }

    proptest! {
        #[test]
        fn prop_permitted_iff_within_hard(hard in 0u64..u64::MAX, maxsock in 0u64..u64::MAX) {
            let backend = SimulatedRlimit::new(LimitPair::bounded(0, hard));
            let permitted = check_if_maxsock_permitted(&backend, maxsock).unwrap();
            prop_assert_eq!(permitted, maxsock <= hard);
        }
    }
}
