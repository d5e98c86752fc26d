//! Configuration types
//!
//! Service endpoints and timing knobs are carried in an explicit
//! [`ConvoyConfig`] that callers hand to the clients and engines they build.
//! Nothing is read from process-wide mutable state after startup.

use crate::{ConfigError, ConvoyError, ConvoyResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// SERVICES
// ============================================================================

/// The remote services convoy talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Inventory,
    Task,
    Rule,
    Nic,
}

impl Service {
    pub const ALL: [Service; 4] = [Service::Inventory, Service::Task, Service::Rule, Service::Nic];

    /// Configuration field name holding this service's base URL.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Inventory => "inventory_url",
            Self::Task => "task_url",
            Self::Rule => "rule_url",
            Self::Nic => "nic_url",
        }
    }

    /// Environment variable holding this service's base URL.
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Inventory => "CONVOY_INVENTORY_URL",
            Self::Task => "CONVOY_TASK_URL",
            Self::Rule => "CONVOY_RULE_URL",
            Self::Nic => "CONVOY_NIC_URL",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inventory => "inventory",
            Self::Task => "tasks",
            Self::Rule => "rules",
            Self::Nic => "nics",
        };
        f.write_str(name)
    }
}

/// Base URLs of the remote services. Any of them may be unset; a pipeline
/// asks for the ones it needs through [`ServiceEndpoints::require`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    pub inventory_url: Option<String>,
    pub task_url: Option<String>,
    pub rule_url: Option<String>,
    pub nic_url: Option<String>,
}

impl ServiceEndpoints {
    pub fn get(&self, service: Service) -> Option<&str> {
        let url = match service {
            Service::Inventory => &self.inventory_url,
            Service::Task => &self.task_url,
            Service::Rule => &self.rule_url,
            Service::Nic => &self.nic_url,
        };
        url.as_deref()
    }

    /// The URL for `service`, or `ConfigError::MissingRequired`.
    pub fn require(&self, service: Service) -> ConvoyResult<&str> {
        self.get(service).ok_or_else(|| {
            ConvoyError::Config(ConfigError::MissingRequired {
                field: service.field().to_string(),
            })
        })
    }
}

// ============================================================================
// POLLING
// ============================================================================

/// Poll loop timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between two status requests for the same task
    pub interval: Duration,
    /// Upper bound on the wait for one task; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            timeout: Some(Duration::from_secs(3600)),
        }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvoyConfig {
    pub services: ServiceEndpoints,
    pub poll: PollConfig,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Default for ConvoyConfig {
    fn default() -> Self {
        Self {
            services: ServiceEndpoints::default(),
            poll: PollConfig::default(),
            request_timeout: Duration::from_millis(30_000),
        }
    }
}

impl ConvoyConfig {
    /// Create a config from environment variables.
    ///
    /// Environment variables:
    /// - `CONVOY_INVENTORY_URL`, `CONVOY_TASK_URL`, `CONVOY_RULE_URL`, `CONVOY_NIC_URL`
    /// - `CONVOY_REQUEST_TIMEOUT_MS`: per-request timeout (default: 30000)
    /// - `CONVOY_POLL_INTERVAL_MS`: delay between polls (default: 1000)
    /// - `CONVOY_POLL_TIMEOUT_SECS`: per-task poll bound, `0` = unbounded (default: 3600)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ConvoyConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let url = |service: Service| {
            lookup(service.env_var())
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
        };

        let request_timeout = lookup("CONVOY_REQUEST_TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_timeout);

        let interval = lookup("CONVOY_POLL_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll.interval);

        let timeout = match lookup("CONVOY_POLL_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok()) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.poll.timeout,
        };

        Self {
            services: ServiceEndpoints {
                inventory_url: url(Service::Inventory),
                task_url: url(Service::Task),
                rule_url: url(Service::Rule),
                nic_url: url(Service::Nic),
            },
            poll: PollConfig { interval, timeout },
            request_timeout,
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - every configured URL is http(s)
    /// - poll interval and request timeout are positive
    pub fn validate(&self) -> ConvoyResult<()> {
        for service in Service::ALL {
            if let Some(url) = self.services.get(service) {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConvoyError::Config(ConfigError::InvalidValue {
                        field: service.field().to_string(),
                        value: url.to_string(),
                        reason: "must be an http(s) URL".to_string(),
                    }));
                }
            }
        }

        if self.poll.interval.is_zero() {
            return Err(ConvoyError::Config(ConfigError::InvalidValue {
                field: "poll.interval".to_string(),
                value: format!("{:?}", self.poll.interval),
                reason: "poll interval must be positive".to_string(),
            }));
        }

        if self.request_timeout.is_zero() {
            return Err(ConvoyError::Config(ConfigError::InvalidValue {
                field: "request_timeout".to_string(),
                value: format!("{:?}", self.request_timeout),
                reason: "request timeout must be positive".to_string(),
            }));
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
