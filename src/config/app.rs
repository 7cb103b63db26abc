//! Scheduler, engine, registry and store configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::batch::CompletionPolicy;

use super::pool::WorkerPoolConfig;

/// Prefix of every environment variable read by [`AppConfig::from_env`].
pub const ENV_PREFIX: &str = "EMISSIONS_";

/// Batch scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between polls for pending batches.
    pub poll_interval_ms: u64,
    /// Upper bound of the random delay added to each poll interval.
    pub poll_jitter_ms: u64,
    /// Batches dispatched per poll at most.
    pub max_batches_per_poll: usize,
    /// Bounded wait when acquiring a batch lease.
    pub lock_wait_ms: u64,
    /// Lease time-to-live; workers renew at a third of this.
    pub lease_ttl_ms: u64,
    /// Retry budget when a submission does not specify one.
    pub default_max_retries: u32,
    /// Largest retry budget a submission may request.
    pub max_retries_limit: u32,
    /// Largest number of activities per batch.
    pub max_activities_per_batch: usize,
    /// Per-activity errors kept in a batch's error summary.
    pub error_summary_limit: usize,
    /// Rule deciding Completed versus Failed.
    pub completion_policy: CompletionPolicy,
    /// Fail batches whose lease expired so the retry policy can pick them up.
    pub recover_orphans: bool,
    /// How long `stop` waits for in-flight batches.
    pub drain_timeout_ms: u64,
    /// Prefix for generated worker identifiers.
    pub worker_id_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            poll_jitter_ms: 5_000,
            max_batches_per_poll: 10,
            lock_wait_ms: 2_000,
            lease_ttl_ms: 5 * 60 * 1000,
            default_max_retries: 3,
            max_retries_limit: 10,
            max_activities_per_batch: 10_000,
            error_summary_limit: 10,
            completion_policy: CompletionPolicy::AnySuccess,
            recover_orphans: true,
            drain_timeout_ms: 30_000,
            worker_id_prefix: "scheduler".into(),
        }
    }
}

impl SchedulerConfig {
    /// Poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Lease wait as a `Duration`.
    #[must_use]
    pub const fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    /// Lease TTL as a `Duration`.
    #[must_use]
    pub const fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    /// Drain timeout as a `Duration`.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.max_batches_per_poll == 0 {
            return Err("max_batches_per_poll must be greater than 0".into());
        }
        if self.lease_ttl_ms < 3 {
            return Err("lease_ttl_ms must be at least 3".into());
        }
        if self.default_max_retries > self.max_retries_limit {
            return Err(format!(
                "default_max_retries ({}) exceeds max_retries_limit ({})",
                self.default_max_retries, self.max_retries_limit
            ));
        }
        if self.max_activities_per_batch == 0 {
            return Err("max_activities_per_batch must be greater than 0".into());
        }
        if self.worker_id_prefix.trim().is_empty() {
            return Err("worker_id_prefix must not be empty".into());
        }
        self.completion_policy.validate()
    }
}

/// Emissions engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Calculate a batch's activities concurrently.
    pub enable_parallel_batch: bool,
    /// Activities in flight per batch when parallel.
    pub max_batch_concurrency: usize,
    /// Missing factors are errors instead of falling back to defaults.
    pub strict_mode: bool,
    /// Add CH4/N2O contributions to Scope 1 combustion defaults.
    pub include_ch4_n2o: bool,
    /// Region assigned to activities without a location; empty disables.
    pub default_region: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_parallel_batch: true,
            max_batch_concurrency: 10,
            strict_mode: true,
            include_ch4_n2o: false,
            default_region: "GLOBAL".into(),
        }
    }
}

impl EngineConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_concurrency == 0 {
            return Err("max_batch_concurrency must be greater than 0".into());
        }
        Ok(())
    }
}

/// Factor registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Seed the registry with the built-in factors.
    pub preload_defaults: bool,
    /// Try parent regions and `default_region` when the exact region misses.
    pub region_fallback: bool,
    /// Last region tried.
    pub default_region: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            preload_defaults: true,
            region_fallback: true,
            default_region: "GLOBAL".into(),
        }
    }
}

impl RegistryConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.region_fallback && self.default_region.trim().is_empty() {
            return Err("default_region must be set when region_fallback is enabled".into());
        }
        Ok(())
    }
}

/// Batch store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendConfig {
    /// In-memory store for development and tests.
    #[default]
    InMemory,
    /// JSON snapshot file.
    File {
        /// Path of the snapshot file.
        path: PathBuf,
    },
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Worker pool settings.
    pub workers: WorkerPoolConfig,
    /// Engine settings.
    pub engine: EngineConfig,
    /// Factor registry settings.
    pub registry: RegistryConfig,
    /// Batch store backend.
    pub store: StoreBackendConfig,
}

impl AppConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns a message prefixed with the failing section.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler.validate().map_err(|e| format!("scheduler: {e}"))?;
        self.workers.validate().map_err(|e| format!("workers: {e}"))?;
        self.engine.validate().map_err(|e| format!("engine: {e}"))?;
        self.registry.validate().map_err(|e| format!("registry: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overlaid with `EMISSIONS_*` environment variables, after
    /// loading a `.env` file if one exists.
    ///
    /// # Errors
    ///
    /// Returns a message for unparsable values or an invalid result.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by full variable name.
    ///
    /// # Errors
    ///
    /// Returns a message for unparsable values or an invalid result.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let env = EnvReader { lookup };
        let mut cfg = Self::default();

        env.set("POLL_INTERVAL_MS", &mut cfg.scheduler.poll_interval_ms)?;
        env.set("POLL_JITTER_MS", &mut cfg.scheduler.poll_jitter_ms)?;
        env.set("MAX_BATCHES_PER_POLL", &mut cfg.scheduler.max_batches_per_poll)?;
        env.set("LOCK_WAIT_MS", &mut cfg.scheduler.lock_wait_ms)?;
        env.set("LEASE_TTL_MS", &mut cfg.scheduler.lease_ttl_ms)?;
        env.set("MAX_RETRIES", &mut cfg.scheduler.default_max_retries)?;
        env.set("MAX_RETRIES_LIMIT", &mut cfg.scheduler.max_retries_limit)?;
        env.set("ERROR_SUMMARY_LIMIT", &mut cfg.scheduler.error_summary_limit)?;
        env.set("COMPLETION_POLICY", &mut cfg.scheduler.completion_policy)?;
        env.set("RECOVER_ORPHANS", &mut cfg.scheduler.recover_orphans)?;
        env.set("WORKER_COUNT", &mut cfg.workers.worker_count)?;
        env.set("WORKER_QUEUE_DEPTH", &mut cfg.workers.max_queue_depth)?;
        env.set("PARALLEL_BATCH", &mut cfg.engine.enable_parallel_batch)?;
        env.set("MAX_BATCH_CONCURRENCY", &mut cfg.engine.max_batch_concurrency)?;
        env.set("STRICT_MODE", &mut cfg.engine.strict_mode)?;
        env.set("INCLUDE_CH4_N2O", &mut cfg.engine.include_ch4_n2o)?;
        env.set("DEFAULT_REGION", &mut cfg.engine.default_region)?;
        env.set("PRELOAD_FACTORS", &mut cfg.registry.preload_defaults)?;
        env.set("REGION_FALLBACK", &mut cfg.registry.region_fallback)?;
        env.set("FALLBACK_REGION", &mut cfg.registry.default_region)?;
        if let Some(path) = env.get("STORE_PATH") {
            cfg.store = StoreBackendConfig::File { path: path.into() };
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
    }

    fn set<T>(&self, name: &str, target: &mut T) -> Result<(), String>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = self.get(name) {
            *target = raw
                .trim()
                .parse()
                .map_err(|e| format!("{ENV_PREFIX}{name}: invalid value `{raw}`: {e}"))?;
        }
        Ok(())
    }
}
