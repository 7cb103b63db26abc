//! Build the emissions engine and its factor registry from configuration.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::SchedulerError;
use crate::emissions::{Engine, FactorRegistry, InMemoryFactorRegistry};

/// Engine plus the registry its calculators read from.
#[derive(Debug, Clone)]
pub struct EngineParts {
    /// Engine with the built-in calculators.
    pub engine: Arc<Engine>,
    /// Registry shared by the calculators; register extra factors here.
    pub registry: Arc<InMemoryFactorRegistry>,
}

/// Build an engine with Scope 1, 2 and 3 calculators over a fresh registry.
///
/// # Errors
///
/// `Config` if the engine or registry sections are invalid.
pub fn build_engine(cfg: &AppConfig) -> Result<EngineParts, SchedulerError> {
    cfg.engine
        .validate()
        .and_then(|()| cfg.registry.validate())
        .map_err(|e| SchedulerError::Config(format!("config invalid: {e}")))?;

    let registry = Arc::new(InMemoryFactorRegistry::with_config(&cfg.registry));
    let shared: Arc<dyn FactorRegistry> = registry.clone();
    let engine = Arc::new(Engine::with_default_calculators(shared, cfg.engine.clone()));
    Ok(EngineParts { engine, registry })
}
