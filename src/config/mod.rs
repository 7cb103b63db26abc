//! Configuration models for the scheduler, worker pool, engine and stores.

pub mod app;
pub mod pool;

pub use app::{AppConfig, EngineConfig, RegistryConfig, SchedulerConfig, StoreBackendConfig, ENV_PREFIX};
pub use pool::WorkerPoolConfig;
