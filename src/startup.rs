//! Startup negotiation of connection, pipe and socket budgets
//!
//! Fills in every budget the administrator left out, checks the socket
//! budget against the OS limits, raises them when needed and shrinks the
//! computed budgets to whatever the OS actually granted.

use std::fmt;

use tracing::{info, warn};

use crate::config::{Config, GlobalConfig};
use crate::error::Stage;
use crate::limits::{
    check_if_maxsock_permitted, raise_limit_nofile, BootSnapshot, CapacityEstimator,
    EstimatorSettings, LimitPair, RaiseReport, ResourceLimit, RlimitBackend,
};
use crate::{FdBudgetError, Result};

/// Where a budget value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Set by the administrator
    Configured,
    /// Filled in by the estimator
    Computed,
}

/// A budget value and its origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Number of connections, pipes or descriptors
    pub value: u64,
    /// Origin
    pub provenance: Provenance,
}

impl Budget {
    fn resolve(configured: Option<u64>, compute: impl FnOnce() -> u64) -> Self {
        match configured {
            Some(value) => Self {
                value,
                provenance: Provenance::Configured,
            },
            None => Self {
                value: compute(),
                provenance: Provenance::Computed,
            },
        }
    }

    /// Whether the estimator may change this value
    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.provenance == Provenance::Computed
    }
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provenance {
            Provenance::Configured => write!(f, "{} (configured)", self.value),
            Provenance::Computed => write!(f, "{} (computed)", self.value),
        }
    }
}

/// Resolved process capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// Connection budget
    pub maxconn: Budget,
    /// Splice pipe budget
    pub maxpipes: Budget,
    /// Total descriptor budget
    pub maxsock: Budget,
}

impl Capacity {
    fn size(estimator: &CapacityEstimator<'_>, global: &GlobalConfig, maxconn: Budget) -> Self {
        let maxpipes = Budget::resolve(global.maxpipes, || {
            estimator.compute_maxpipes_for(maxconn.value)
        });
        let maxsock = Budget::resolve(global.maxsock, || {
            estimator.compute_ideal_maxsock(maxconn.value)
        });

        Self {
            maxconn,
            maxpipes,
            maxsock,
        }
    }

    /// Re-derive computed budgets against a lower descriptor ceiling
    ///
    /// Configured values are kept as they are.
    fn shrink_to(
        &mut self,
        ceiling: ResourceLimit,
        settings: &EstimatorSettings,
        global: &GlobalConfig,
    ) {
        if !self.maxconn.is_computed() {
            return;
        }

        let estimator = CapacityEstimator::with_ceiling(ceiling, settings);
        let maxconn = Budget::resolve(None, || estimator.compute_ideal_maxconn());
        *self = Self::size(&estimator, global, maxconn);
        if let Some(fd_hard_limit) = global.fd_hard_limit {
            self.maxsock.value = self.maxsock.value.min(fd_hard_limit);
        }
        info!(
            "Capacity re-derived for ceiling {}: maxconn={}, maxpipes={}, maxsock={}",
            ceiling, self.maxconn, self.maxpipes, self.maxsock
        );
    }
}

/// A budget the process could not be given in full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    /// Stage that could not deliver
    pub stage: Stage,
    /// Descriptors asked for
    pub requested: u64,
    /// Limit actually obtained
    pub achieved: ResourceLimit,
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: requested {}, achieved {}",
            self.stage, self.requested, self.achieved
        )
    }
}

/// Result of startup negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationReport {
    /// Limits at boot
    pub boot: LimitPair,
    /// Budgets handed to the rest of the process
    pub capacity: Capacity,
    /// Limits before negotiation
    pub before: LimitPair,
    /// Limits after negotiation
    pub after: LimitPair,
    /// Raise attempt, if one was needed
    pub raise: Option<RaiseReport>,
    /// Budgets that could not be met
    pub shortfalls: Vec<Shortfall>,
}

impl fmt::Display for NegotiationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "boot limits:    {}", self.boot)?;
        writeln!(f, "limits before:  {}", self.before)?;
        writeln!(f, "limits after:   {}", self.after)?;
        writeln!(f, "maxconn:        {}", self.capacity.maxconn)?;
        writeln!(f, "maxpipes:       {}", self.capacity.maxpipes)?;
        writeln!(f, "maxsock:        {}", self.capacity.maxsock)?;
        if let Some(raise) = &self.raise {
            writeln!(f, "raise outcome:  {:?}", raise.outcome)?;
        }
        for shortfall in &self.shortfalls {
            writeln!(f, "shortfall:      {shortfall}")?;
        }
        Ok(())
    }
}

/// Size the process and negotiate descriptor limits with the OS
///
/// # Errors
///
/// Returns `LimitQuery` if the OS limit cannot be read. With
/// `strict_limits`, returns `InfeasibleConfiguration` or `LimitShortfall`
/// instead of shrinking or warning.
pub fn negotiate(
    config: &Config,
    boot: &BootSnapshot,
    backend: &impl RlimitBackend,
) -> Result<NegotiationReport> {
    let global = &config.global;
    let settings = config.estimator_settings();
    let estimator = CapacityEstimator::new(boot, &settings);

    let maxconn = Budget::resolve(global.maxconn, || estimator.compute_ideal_maxconn());
    let mut capacity = Capacity::size(&estimator, global, maxconn);
    let mut shortfalls = Vec::new();
    info!(
        "Capacity: maxconn={}, maxpipes={}, maxsock={}",
        capacity.maxconn, capacity.maxpipes, capacity.maxsock
    );

    if let Some(fd_hard_limit) = global.fd_hard_limit {
        if capacity.maxsock.value > fd_hard_limit {
            let shortfall = Shortfall {
                stage: Stage::Estimation,
                requested: capacity.maxsock.value,
                achieved: ResourceLimit::Bounded(fd_hard_limit),
            };
            if global.strict_limits {
                return Err(FdBudgetError::InfeasibleConfiguration {
                    requested: capacity.maxsock.value,
                    hard_limit: shortfall.achieved,
                });
            }
            warn!("maxsock {} capped by fd_hard_limit ({})", capacity.maxsock, shortfall);
            capacity.maxsock.value = fd_hard_limit;
            shortfalls.push(shortfall);
        }
    }

    let before = backend.get().map_err(FdBudgetError::LimitQuery)?;

    if !check_if_maxsock_permitted(backend, capacity.maxsock.value)? {
        let shortfall = Shortfall {
            stage: Stage::Estimation,
            requested: capacity.maxsock.value,
            achieved: before.maximum,
        };
        if capacity.maxconn.is_computed() {
            warn!(
                "maxsock exceeds hard limit ({}; boot-time hard limit was {}), shrinking",
                shortfall,
                boot.fd_maximum_at_boot()
            );
            capacity.shrink_to(before.maximum, &settings, global);
            shortfalls.push(shortfall);
        } else if global.strict_limits {
            return Err(FdBudgetError::InfeasibleConfiguration {
                requested: shortfall.requested,
                hard_limit: shortfall.achieved,
            });
        } else {
            warn!(
                "maxsock exceeds hard limit ({}); raising it needs privilege",
                shortfall
            );
        }
    }

    let maxsock = capacity.maxsock.value;
    let mut after = before;
    let mut raise = None;

    if !before.current.admits(maxsock) {
        let target = LimitPair {
            current: ResourceLimit::Bounded(maxsock),
            maximum: before.maximum.max(ResourceLimit::Bounded(maxsock)),
        };
        let report = raise_limit_nofile(backend, target)?;
        after = report.achieved;

        if !report.reached_target() {
            let shortfall = Shortfall {
                stage: Stage::OsNegotiation,
                requested: maxsock,
                achieved: report.achieved.current,
            };
            if global.strict_limits {
                return Err(FdBudgetError::LimitShortfall {
                    stage: shortfall.stage,
                    requested: shortfall.requested,
                    achieved: shortfall.achieved,
                });
            }
            warn!(
                "Cannot raise descriptor limit for maxsock ({}, outcome {:?})",
                shortfall, report.outcome
            );
            capacity.shrink_to(report.achieved.current, &settings, global);
            shortfalls.push(shortfall);
        }
        raise = Some(report);
    }

    Ok(NegotiationReport {
        boot: boot.pair(),
        capacity,
        before,
        after,
        raise,
        shortfalls,
    })
}
