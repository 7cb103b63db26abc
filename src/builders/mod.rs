//! Builders wiring engines, stores and schedulers from configuration.

pub mod engine_builder;
pub mod scheduler_builder;

pub use engine_builder::{build_engine, EngineParts};
pub use scheduler_builder::{build_store, SchedulerBuilder, StoreHandles};
