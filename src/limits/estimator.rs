//! Ideal connection, pipe and socket budgets derived from descriptor limits
//!
//! Every budget is computed from the same working ceiling so that
//! `compute_ideal_maxsock(compute_ideal_maxconn())` never exceeds it:
//!
//! ```text
//! maxsock = reserve + maxconn * (FDS_PER_CONN + extra) + maxpipes * FDS_PER_PIPE
//! reserve = STDIO_FDS + AUX_FDS + listeners + nbthread * FDS_PER_THREAD
//! ```

use tracing::debug;

use super::{
    BootSnapshot, ResourceLimit, AUX_FDS, CONNS_PER_PIPE, DEFAULT_MAXPIPES, FDS_PER_CONN,
    FDS_PER_PIPE, FDS_PER_THREAD, MIN_MAXCONN, STDIO_FDS, UNBOUNDED_FD_CEILING,
};

/// Concurrent connections that may be spliced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpliceDemand {
    /// No proxy uses splicing
    #[default]
    None,
    /// At most this many spliced connections
    Bounded(u64),
    /// Some splicing proxy has no connection limit
    Unbounded,
}

/// Inputs to the estimator besides the boot snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimatorSettings {
    /// Listening sockets
    pub listeners: u64,
    /// Worker threads
    pub nbthread: u64,
    /// Descriptors each connection needs on top of its two sockets
    pub extra_fds_per_conn: u64,
    /// Administrator ceiling on descriptor usage
    pub fd_hard_limit: Option<u64>,
    /// Configured connection budget
    pub maxconn: Option<u64>,
    /// Configured pipe budget
    pub maxpipes: Option<u64>,
    /// Splicing demand of the configured proxies
    pub splice: SpliceDemand,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            listeners: 1,
            nbthread: 1,
            extra_fds_per_conn: 0,
            fd_hard_limit: None,
            maxconn: None,
            maxpipes: None,
            splice: SpliceDemand::None,
        }
    }
}

/// Pure capacity sizing over a descriptor ceiling
#[derive(Debug, Clone, Copy)]
pub struct CapacityEstimator<'a> {
    ceiling: ResourceLimit,
    settings: &'a EstimatorSettings,
}

impl<'a> CapacityEstimator<'a> {
    /// Estimator sized from the boot-time hard limit
    #[must_use]
    pub const fn new(boot: &BootSnapshot, settings: &'a EstimatorSettings) -> Self {
        Self::with_ceiling(boot.fd_maximum_at_boot(), settings)
    }

    /// Estimator sized from an arbitrary descriptor ceiling
    #[must_use]
    pub const fn with_ceiling(ceiling: ResourceLimit, settings: &'a EstimatorSettings) -> Self {
        Self { ceiling, settings }
    }

    /// Descriptors the process keeps for itself regardless of traffic
    #[must_use]
    pub fn fixed_reserve(&self) -> u64 {
        STDIO_FDS
            .saturating_add(AUX_FDS)
            .saturating_add(self.settings.listeners)
            .saturating_add(self.settings.nbthread.saturating_mul(FDS_PER_THREAD))
    }

    /// Finite ceiling after applying `fd_hard_limit`, if one is known
    #[must_use]
    pub fn finite_ceiling(&self) -> Option<u64> {
        match (self.ceiling.finite(), self.settings.fd_hard_limit) {
            (Some(os), Some(admin)) => Some(os.min(admin)),
            (Some(os), None) => Some(os),
            (None, admin) => admin,
        }
    }

    /// Ceiling used for arithmetic; never unbounded
    #[must_use]
    pub fn working_ceiling(&self) -> u64 {
        self.finite_ceiling().unwrap_or(UNBOUNDED_FD_CEILING)
    }

    fn available(&self) -> u64 {
        self.working_ceiling().saturating_sub(self.fixed_reserve())
    }

    fn fds_per_conn(&self) -> u64 {
        FDS_PER_CONN.saturating_add(self.settings.extra_fds_per_conn)
    }

    /// Descriptors per `CONNS_PER_PIPE` spliced connections, pipe share included
    fn spliced_group_cost(&self) -> u64 {
        self.fds_per_conn()
            .saturating_mul(CONNS_PER_PIPE)
            .saturating_add(FDS_PER_PIPE)
    }

    /// Largest pipe budget the ceiling can carry next to its connections
    fn pipe_ceiling(&self) -> u64 {
        match self.finite_ceiling() {
            Some(_) => self.available() / self.spliced_group_cost(),
            None => DEFAULT_MAXPIPES,
        }
    }

    /// Ideal number of splice pipes
    ///
    /// Sized against the configured connection budget, or the ideal one when
    /// none is configured.
    #[must_use]
    pub fn compute_ideal_maxpipes(&self) -> u64 {
        let maxconn = self
            .settings
            .maxconn
            .unwrap_or_else(|| self.compute_ideal_maxconn());
        self.compute_maxpipes_for(maxconn)
    }

    /// Pipe budget for a given connection budget
    ///
    /// Zero when nothing splices.
    #[must_use]
    pub fn compute_maxpipes_for(&self, maxconn: u64) -> u64 {
        let spliced = match self.settings.splice {
            SpliceDemand::None => return 0,
            SpliceDemand::Bounded(demand) => demand.min(maxconn),
            SpliceDemand::Unbounded => maxconn,
        };

        let pipes = (spliced / CONNS_PER_PIPE).min(self.pipe_ceiling());
        debug!("Ideal maxpipes for maxconn {}: {}", maxconn, pipes);
        pipes
    }

    /// Ideal number of concurrent connections
    ///
    /// Never below `MIN_MAXCONN`.
    #[must_use]
    pub fn compute_ideal_maxconn(&self) -> u64 {
        let mut remain = self.available();
        let per_conn = self.fds_per_conn();

        let maxconn = match (self.settings.maxpipes, self.settings.splice) {
            (Some(pipes), _) => {
                // Pipes are optional; only charge them when they fit
                let pipe_fds = pipes.saturating_mul(FDS_PER_PIPE);
                if pipe_fds < remain {
                    remain -= pipe_fds;
                }
                remain / per_conn
            }
            (None, SpliceDemand::None) => remain / per_conn,
            (None, _) => {
                let scaled = u128::from(remain) * u128::from(CONNS_PER_PIPE);
                let conns = scaled / u128::from(self.spliced_group_cost());
                u64::try_from(conns).unwrap_or(u64::MAX)
            }
        };

        let maxconn = maxconn.max(MIN_MAXCONN);
        debug!(
            "Ideal maxconn: {} (ceiling {}, reserve {}, {} fds per conn)",
            maxconn,
            self.working_ceiling(),
            self.fixed_reserve(),
            per_conn
        );
        maxconn
    }

    /// Total descriptors needed to serve `maxconn` connections
    ///
    /// Monotonically non-decreasing in `maxconn`.
    #[must_use]
    pub fn compute_ideal_maxsock(&self, maxconn: u64) -> u64 {
        let pipes = self
            .settings
            .maxpipes
            .unwrap_or_else(|| self.compute_maxpipes_for(maxconn));

        self.fixed_reserve()
            .saturating_add(maxconn.saturating_mul(self.fds_per_conn()))
            .saturating_add(pipes.saturating_mul(FDS_PER_PIPE))
    }
}
