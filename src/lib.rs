//! # Emissions Scheduler
//!
//! Batch scheduler for greenhouse-gas emissions calculation.
//!
//! Callers submit batches of activity ids on behalf of an organization. A
//! poll loop picks up Pending batches, leases each one so that at most one
//! worker processes it, and hands it to a bounded pool of worker threads.
//! Workers fetch each activity, run it through the emissions [`Engine`],
//! record per-activity outcomes and finish the batch as Completed, Failed or
//! Cancelled. Failed batches with retry budget go back to Pending.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending -> Queued -> Processing -> Completed
//!    |         |           |-------> Failed -> Pending (retry)
//!    |---------|-----------|-------> Cancelled
//! ```
//!
//! Every transition is a compare-and-set on the stored status, so concurrent
//! schedulers sharing a store never both process one batch.
//!
//! ## Emissions engine
//!
//! The engine classifies each activity into Scope 1, 2 or 3, normalizes its
//! unit, looks up an emission factor by category, region and validity date
//! and produces an [`EmissionRecord`](emissions::EmissionRecord).
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use emissions_scheduler::builders::SchedulerBuilder;
//! use emissions_scheduler::config::AppConfig;
//! use emissions_scheduler::infra::InMemoryActivitySource;
//!
//! let source = Arc::new(InMemoryActivitySource::new());
//! let scheduler = SchedulerBuilder::new(AppConfig::from_env()?, source).build()?;
//! scheduler.start()?;
//!
//! let batch_id = scheduler
//!     .submit_batch("org-1", "ws-1", vec!["act-1".into(), "act-2".into()], 3)
//!     .await?;
//! let progress = scheduler.get_progress("org-1", &batch_id).await?;
//! ```
//!
//! [`Engine`]: emissions::Engine

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Batch lifecycle, stores, worker pool and the scheduler.
pub mod core;
/// Configuration models for the scheduler, worker pool, engine and stores.
pub mod config;
/// Builders to construct schedulers and engines from configuration.
pub mod builders;
/// Emissions calculation engine.
pub mod emissions;
/// Infrastructure adapters for batch storage and activity ingestion.
pub mod infra;
/// API request/response models and handlers.
pub mod runtime;
/// Shared utilities.
pub mod util;
