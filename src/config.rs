//! Configuration loading via `ortho-config`, the process-wide retry policy,
//! and the owned subnet registry.
//!
//! The retry constants are read once when the driver session opens and are
//! treated as read-only by concurrent operations afterwards. Subnet-list
//! updates, which arrive from an out-of-scope cluster watcher, flow through
//! an explicitly owned, versioned [`SubnetRegistry`] instead of a mutated
//! process environment variable.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Driver configuration derived from environment variables, configuration
/// files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "VPCFILE")]
pub struct DriverConfig {
    /// Identifier of the cluster this driver instance serves.
    pub cluster_id: String,
    /// Resource group used when a storage class supplies none.
    pub default_resource_group: Option<String>,
    /// VPC the cluster's workers live in; access points bind shares into it.
    pub vpc_id: Option<String>,
    /// Comma-separated subnet ids seeding the subnet registry.
    pub subnet_ids: Option<String>,
    /// Attempt ceiling for retried backend calls.
    #[ortho_config(default = 10)]
    pub retry_attempts: u32,
    /// First inter-attempt gap, in seconds; doubles on each retry.
    #[ortho_config(default = 5)]
    pub retry_initial_gap_secs: u64,
    /// Largest inter-attempt gap a retry loop will use, in seconds.
    #[ortho_config(default = 60)]
    pub retry_gap_ceiling_secs: u64,
}

impl DriverConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags
    /// in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge
    /// sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on the loaded values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the cluster id is blank
    /// and [`ConfigError::InvalidRetryPolicy`] when the retry constants are
    /// unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_id.trim().is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "cluster_id: set VPCFILE_CLUSTER_ID or add cluster_id to the driver config file",
            )));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy(String::from(
                "retry_attempts must be at least 1",
            )));
        }
        if self.retry_gap_ceiling_secs < self.retry_initial_gap_secs {
            return Err(ConfigError::InvalidRetryPolicy(String::from(
                "retry_gap_ceiling_secs must not be below retry_initial_gap_secs",
            )));
        }
        Ok(())
    }

    /// Builds the immutable retry policy shared by all retrying operations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        self.validate()?;
        Ok(RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_gap: Duration::from_secs(self.retry_initial_gap_secs),
            gap_ceiling: Duration::from_secs(self.retry_gap_ceiling_secs),
        })
    }

    /// Parses the seed subnet list from configuration.
    #[must_use]
    pub fn initial_subnets(&self) -> Vec<String> {
        self.subnet_ids
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates the retry constants cannot drive a backoff loop.
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

/// Caps the exponent so the doubling factor cannot overflow.
const MAX_DOUBLINGS: u32 = 16;

/// Process-wide backoff constants shared by all retrying operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Attempt ceiling; a loop gives up after this many tries.
    pub max_attempts: u32,
    /// Gap before the second attempt.
    pub initial_gap: Duration,
    /// Largest gap regardless of how many attempts have elapsed.
    pub gap_ceiling: Duration,
}

impl RetryPolicy {
    /// Gap to sleep after the given zero-based attempt: the initial gap
    /// doubled per attempt, capped at the ceiling.
    #[must_use]
    pub fn gap_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(MAX_DOUBLINGS));
        self.initial_gap.saturating_mul(factor).min(self.gap_ceiling)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_gap: Duration::from_secs(5),
            gap_ceiling: Duration::from_secs(60),
        }
    }
}

/// Callback invoked with the new version and subnet list after an update.
pub type SubnetWatcher = Box<dyn Fn(u64, &[String]) + Send + Sync>;

struct SubnetState {
    version: u64,
    subnet_ids: Vec<String>,
}

/// Owned, versioned subnet-list value with change notification.
///
/// The out-of-scope cluster watcher pushes updates through [`Self::set`];
/// readers observe a consistent `(version, list)` pair through
/// [`Self::get`] and may register callbacks to be told about changes.
pub struct SubnetRegistry {
    state: RwLock<SubnetState>,
    watchers: Mutex<Vec<SubnetWatcher>>,
}

fn recover<T>(result: Result<T, PoisonError<T>>) -> T {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl SubnetRegistry {
    /// Creates a registry seeded with the configured subnet list.
    #[must_use]
    pub fn new(initial: Vec<String>) -> Self {
        Self {
            state: RwLock::new(SubnetState {
                version: 0,
                subnet_ids: initial,
            }),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Returns the current version and subnet list.
    #[must_use]
    pub fn get(&self) -> (u64, Vec<String>) {
        let guard = recover(self.state.read());
        (guard.version, guard.subnet_ids.clone())
    }

    /// Replaces the subnet list, bumps the version, and notifies watchers.
    /// Returns the new version.
    pub fn set(&self, subnet_ids: Vec<String>) -> u64 {
        let version = {
            let mut guard = recover(self.state.write());
            guard.version += 1;
            guard.subnet_ids = subnet_ids;
            guard.version
        };
        let (current_version, current_ids) = self.get();
        let watchers: MutexGuard<'_, Vec<SubnetWatcher>> = recover(self.watchers.lock());
        for watcher in watchers.iter() {
            watcher(current_version, &current_ids);
        }
        version
    }

    /// Registers a callback invoked after every update.
    pub fn subscribe(&self, watcher: SubnetWatcher) {
        recover(self.watchers.lock()).push(watcher);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn config() -> DriverConfig {
        DriverConfig {
            cluster_id: String::from("cluster-1"),
            default_resource_group: None,
            vpc_id: None,
            subnet_ids: Some(String::from("sub-1, sub-2,")),
            retry_attempts: 10,
            retry_initial_gap_secs: 5,
            retry_gap_ceiling_secs: 60,
        }
    }

    #[test]
    fn validate_rejects_blank_cluster_id() {
        let mut cfg = config();
        cfg.cluster_id = String::from("  ");
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut cfg = config();
        cfg.retry_attempts = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidRetryPolicy(_))
        ));
    }

    #[test]
    fn initial_subnets_are_split_and_trimmed() {
        assert_eq!(
            config().initial_subnets(),
            vec![String::from("sub-1"), String::from("sub-2")]
        );
    }

    #[test]
    fn backoff_doubles_then_hits_the_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_gap: Duration::from_secs(5),
            gap_ceiling: Duration::from_secs(60),
        };
        assert_eq!(policy.gap_for(0), Duration::from_secs(5));
        assert_eq!(policy.gap_for(1), Duration::from_secs(10));
        assert_eq!(policy.gap_for(2), Duration::from_secs(20));
        assert_eq!(policy.gap_for(3), Duration::from_secs(40));
        assert_eq!(policy.gap_for(4), Duration::from_secs(60));
        assert_eq!(policy.gap_for(30), Duration::from_secs(60));
    }

    #[test]
    fn registry_bumps_version_and_notifies_watchers() {
        let registry = SubnetRegistry::new(vec![String::from("sub-1")]);
        let seen = Arc::new(AtomicU64::new(0));
        let seen_by_watcher = Arc::clone(&seen);
        registry.subscribe(Box::new(move |version, _ids| {
            seen_by_watcher.store(version, Ordering::SeqCst);
        }));

        let version = registry.set(vec![String::from("sub-9")]);
        assert_eq!(version, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let (current, ids) = registry.get();
        assert_eq!(current, 1);
        assert_eq!(ids, vec![String::from("sub-9")]);
    }
}
