//! Error types for fdbudget

use std::fmt;
use thiserror::Error;

use crate::limits::ResourceLimit;

/// Result type for fdbudget operations
pub type Result<T> = std::result::Result<T, FdBudgetError>;

/// Errors that can occur while negotiating descriptor capacity
#[derive(Debug, Error)]
pub enum FdBudgetError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The OS refused to report the descriptor limit
    #[error("Cannot query RLIMIT_NOFILE: {0}")]
    LimitQuery(LimitError),

    /// The boot snapshot was already published for this process
    #[error("Boot snapshot already installed")]
    SnapshotAlreadyInstalled,

    /// A socket budget exceeds the hard limit and cannot be reached
    #[error("Socket budget {requested} exceeds hard limit {hard_limit}")]
    InfeasibleConfiguration {
        /// Requested socket budget
        requested: u64,
        /// Hard limit in effect
        hard_limit: ResourceLimit,
    },

    /// Negotiation ended below the requested value
    #[error("{stage} shortfall: requested {requested} descriptors, achieved {achieved}")]
    LimitShortfall {
        /// Stage that produced the shortfall
        stage: Stage,
        /// Requested descriptor count
        requested: u64,
        /// Achieved descriptor limit
        achieved: ResourceLimit,
    },
}

/// Failure classes reported by the OS limit primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LimitError {
    /// Caller lacks the privilege to raise the hard limit (`EPERM`)
    #[error("operation not permitted")]
    PermissionDenied,

    /// The requested pair was rejected as malformed (`EINVAL`)
    #[error("invalid argument")]
    InvalidArgument,

    /// Any other errno
    #[error("os error {0}")]
    Os(i32),
}

#[cfg(unix)]
impl From<nix::errno::Errno> for LimitError {
    fn from(errno: nix::errno::Errno) -> Self {
        match errno {
            nix::errno::Errno::EPERM => Self::PermissionDenied,
            nix::errno::Errno::EINVAL => Self::InvalidArgument,
            other => Self::Os(other as i32),
        }
    }
}

/// Startup stage at which a capacity shortfall was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Sizing against the configured or boot-time ceiling
    Estimation,
    /// Negotiating with the OS
    OsNegotiation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Estimation => f.write_str("estimation"),
            Self::OsNegotiation => f.write_str("OS negotiation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortfall_message_names_stage_and_values() {
        let err = FdBudgetError::LimitShortfall {
            stage: Stage::OsNegotiation,
            requested: 8192,
            achieved: ResourceLimit::Bounded(4096),
        };

        assert_eq!(
            err.to_string(),
            "OS negotiation shortfall: requested 8192 descriptors, achieved 4096"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_errno_classification() {
        use nix::errno::Errno;

        assert_eq!(LimitError::from(Errno::EPERM), LimitError::PermissionDenied);
        assert_eq!(LimitError::from(Errno::EINVAL), LimitError::InvalidArgument);
        assert_eq!(
            LimitError::from(Errno::EFAULT),
            LimitError::Os(Errno::EFAULT as i32)
        );
    }
}
