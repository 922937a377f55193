//! Configuration types for fdbudget

use serde::{Deserialize, Serialize};

use crate::limits::{EstimatorSettings, SpliceDemand};
use crate::{FdBudgetError, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Process-wide settings
    #[serde(default)]
    pub global: GlobalConfig,
    /// Proxies served by this process
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,
}

/// Process-wide capacity settings
///
/// `maxconn`, `maxsock` and `maxpipes` bypass the estimator when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Connection budget override
    #[serde(default)]
    pub maxconn: Option<u64>,
    /// Socket budget override
    #[serde(default)]
    pub maxsock: Option<u64>,
    /// Pipe budget override
    #[serde(default)]
    pub maxpipes: Option<u64>,
    /// Administrator ceiling on descriptor usage
    #[serde(default)]
    pub fd_hard_limit: Option<u64>,
    /// Worker threads
    #[serde(default = "default_one")]
    pub nbthread: u64,
    /// Listening sockets
    #[serde(default = "default_one")]
    pub listeners: u64,
    /// Descriptors each connection needs besides its two sockets
    #[serde(default)]
    pub extra_fds_per_conn: u64,
    /// Treat any capacity shortfall as fatal
    #[serde(default)]
    pub strict_limits: bool,
}

fn default_one() -> u64 {
    1
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            maxconn: None,
            maxsock: None,
            maxpipes: None,
            fd_hard_limit: None,
            nbthread: 1,
            listeners: 1,
            extra_fds_per_conn: 0,
            strict_limits: false,
        }
    }
}

/// Side(s) of the traffic a proxy handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyRole {
    /// Accepts client connections
    Frontend,
    /// Opens server connections
    Backend,
    /// Both
    Both,
}

impl ProxyRole {
    fn is_frontend(self) -> bool {
        matches!(self, Self::Frontend | Self::Both)
    }

    fn is_backend(self) -> bool {
        matches!(self, Self::Backend | Self::Both)
    }
}

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy name
    pub name: String,
    /// Frontend, backend or both
    pub role: ProxyRole,
    /// Frontend connection limit; unlimited when absent
    #[serde(default)]
    pub maxconn: Option<u64>,
    /// Backend sizing; falls back to the global maxconn
    #[serde(default)]
    pub fullconn: Option<u64>,
    /// Forward with splice(2)
    #[serde(default)]
    pub splice: bool,
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FdBudgetError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| FdBudgetError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        let global = &self.global;

        for (name, value) in [
            ("maxconn", global.maxconn),
            ("maxsock", global.maxsock),
            ("maxpipes", global.maxpipes),
            ("fd_hard_limit", global.fd_hard_limit),
        ] {
            if value == Some(0) {
                return Err(FdBudgetError::ConfigError(format!(
                    "global.{name} must be > 0 when set"
                )));
            }
        }

        if global.nbthread == 0 {
            return Err(FdBudgetError::ConfigError(
                "global.nbthread must be > 0".to_string(),
            ));
        }

        for (i, proxy) in self.proxies.iter().enumerate() {
            if proxy.name.is_empty() {
                return Err(FdBudgetError::ConfigError(format!(
                    "Proxy {i}: name cannot be empty"
                )));
            }

            if proxy.maxconn == Some(0) || proxy.fullconn == Some(0) {
                return Err(FdBudgetError::ConfigError(format!(
                    "Proxy '{}': maxconn and fullconn must be > 0 when set",
                    proxy.name
                )));
            }
        }

        Ok(())
    }

    /// Concurrent connections that may be spliced across all proxies
    #[must_use]
    pub fn splice_demand(&self) -> SpliceDemand {
        let splicing: Vec<&ProxyConfig> = self.proxies.iter().filter(|p| p.splice).collect();
        if splicing.is_empty() {
            return SpliceDemand::None;
        }

        let frontends = splicing
            .iter()
            .filter(|p| p.role.is_frontend())
            .map(|p| p.maxconn);
        let backends = splicing
            .iter()
            .filter(|p| p.role.is_backend())
            .map(|p| p.fullconn.or(self.global.maxconn));

        match (sum_limits(frontends), sum_limits(backends)) {
            (Some(fe), Some(be)) => SpliceDemand::Bounded(fe.max(be)),
            _ => SpliceDemand::Unbounded,
        }
    }

    /// Estimator inputs described by this configuration
    #[must_use]
    pub fn estimator_settings(&self) -> EstimatorSettings {
        EstimatorSettings {
            listeners: self.global.listeners,
            nbthread: self.global.nbthread,
            extra_fds_per_conn: self.global.extra_fds_per_conn,
            fd_hard_limit: self.global.fd_hard_limit,
            maxconn: self.global.maxconn,
            maxpipes: self.global.maxpipes,
            splice: self.splice_demand(),
        }
    }
}

/// Sum of limits, or `None` if any of them is unlimited
fn sum_limits(mut limits: impl Iterator<Item = Option<u64>>) -> Option<u64> {
    limits.try_fold(0u64, |total, limit| limit.map(|n| total.saturating_add(n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parse() {
        let config_toml = r#"
            [global]
            maxconn = 10000
            nbthread = 4

            [[proxies]]
            name = "web"
            role = "both"
            maxconn = 2000
            splice = true
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert_eq!(config.global.maxconn, Some(10_000));
        assert_eq!(config.global.nbthread, 4);
        assert_eq!(config.global.listeners, 1);
        assert!(!config.global.strict_limits);
        assert_eq!(config.proxies.len(), 1);
        assert_eq!(config.proxies[0].role, ProxyRole::Both);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.estimator_settings(), EstimatorSettings::default());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        let config_toml = r"
            [global]
            maxpipes = 64
            strict_limits = true
        ";
        file.write_all(config_toml.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.global.maxpipes, Some(64));
        assert!(config.global.strict_limits);
    }

    #[test]
    fn test_invalid_config_zero_override() {
        let config: Config = toml::from_str("[global]\nmaxconn = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_config_zero_threads() {
        let config: Config = toml::from_str("[global]\nnbthread = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_config_unnamed_proxy() {
        let config: Config =
            toml::from_str("[[proxies]]\nname = \"\"\nrole = \"frontend\"").unwrap();
        assert!(config.validate().is_err());
    }

    fn proxy(role: ProxyRole, maxconn: Option<u64>, fullconn: Option<u64>) -> ProxyConfig {
        ProxyConfig {
            name: "p".to_string(),
            role,
            maxconn,
            fullconn,
            splice: true,
        }
    }

    #[test]
    fn test_splice_demand_none_without_splicing() {
        let mut config = Config::default();
        config.proxies.push(ProxyConfig {
            splice: false,
            ..proxy(ProxyRole::Frontend, Some(100), None)
        });

        assert_eq!(config.splice_demand(), SpliceDemand::None);
    }

    #[test]
    fn test_splice_demand_takes_larger_side() {
        let mut config = Config::default();
        config.proxies.push(proxy(ProxyRole::Frontend, Some(100), None));
        config.proxies.push(proxy(ProxyRole::Frontend, Some(50), None));
        config.proxies.push(proxy(ProxyRole::Backend, None, Some(120)));

        assert_eq!(config.splice_demand(), SpliceDemand::Bounded(150));
    }

    #[test]
    fn test_splice_demand_backend_falls_back_to_global() {
        let mut config = Config::default();
        config.proxies.push(proxy(ProxyRole::Backend, None, None));
        assert_eq!(config.splice_demand(), SpliceDemand::Unbounded);

        config.global.maxconn = Some(500);
        assert_eq!(config.splice_demand(), SpliceDemand::Bounded(500));
    }

    #[test]
    fn test_splice_demand_unlimited_frontend() {
        let mut config = Config::default();
        config.global.maxconn = Some(500);
        config.proxies.push(proxy(ProxyRole::Both, None, Some(10)));

        assert_eq!(config.splice_demand(), SpliceDemand::Unbounded);
    }
}
