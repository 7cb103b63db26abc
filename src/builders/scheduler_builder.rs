//! Build a [`BatchScheduler`] from [`AppConfig`].

use std::sync::Arc;

use tracing::info;

use crate::config::{AppConfig, StoreBackendConfig};
use crate::core::{ActivitySource, AuditSink, BatchScheduler, BatchStore, LeaseStore, SchedulerDeps, SchedulerError, TracingAuditSink};
use crate::emissions::Engine;
use crate::infra::{FileBatchStore, InMemoryBatchStore};

use super::engine_builder::build_engine;

/// One store object viewed through both of its roles.
#[derive(Clone)]
pub struct StoreHandles {
    /// Batch persistence.
    pub batches: Arc<dyn BatchStore>,
    /// Leases over the same batches.
    pub leases: Arc<dyn LeaseStore>,
}

impl std::fmt::Debug for StoreHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandles").finish_non_exhaustive()
    }
}

impl StoreHandles {
    fn of<S: BatchStore + LeaseStore + 'static>(store: Arc<S>) -> Self {
        Self {
            batches: store.clone(),
            leases: store,
        }
    }
}

/// Open the configured store backend.
///
/// # Errors
///
/// `Persistence` if a file store cannot be opened.
pub fn build_store(backend: &StoreBackendConfig) -> Result<StoreHandles, SchedulerError> {
    match backend {
        StoreBackendConfig::InMemory => Ok(StoreHandles::of(Arc::new(InMemoryBatchStore::new()))),
        StoreBackendConfig::File { path } => Ok(StoreHandles::of(Arc::new(FileBatchStore::open(path)?))),
    }
}

/// Assembles a scheduler; anything not supplied is built from the config.
pub struct SchedulerBuilder {
    config: AppConfig,
    source: Arc<dyn ActivitySource>,
    store: Option<StoreHandles>,
    engine: Option<Arc<Engine>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl SchedulerBuilder {
    /// Start from `config`, reading activities from `source`.
    pub fn new(config: AppConfig, source: Arc<dyn ActivitySource>) -> Self {
        Self {
            config,
            source,
            store: None,
            engine: None,
            audit: None,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Use an existing store, e.g. one shared with another scheduler.
    #[must_use]
    pub fn with_store(mut self, store: StoreHandles) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an existing engine.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Send audit events to `audit` instead of the tracing sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the scheduler. It is not started.
    ///
    /// # Errors
    ///
    /// `Config` for invalid configuration, `Persistence` if the store cannot
    /// be opened, `Pool` if worker threads cannot be spawned.
    pub fn build(self) -> Result<BatchScheduler, SchedulerError> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::Config(format!("config invalid: {e}")))?;

        let store = match self.store {
            Some(store) => store,
            None => build_store(&self.config.store)?,
        };
        let engine = match self.engine {
            Some(engine) => engine,
            None => build_engine(&self.config)?.engine,
        };
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));

        info!(
            store = ?self.config.store,
            workers = self.config.workers.worker_count,
            policy = ?self.config.scheduler.completion_policy,
            "Building batch scheduler"
        );

        BatchScheduler::new(
            SchedulerDeps {
                store: store.batches,
                leases: store.leases,
                source: self.source,
                engine,
                audit,
            },
            self.config.scheduler,
            self.config.workers,
        )
    }
}
