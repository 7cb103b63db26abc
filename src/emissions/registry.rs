//! Emission factor registry.
//!
//! Lookups resolve `(category, unit, region, as_of)` to a single factor. The
//! in-memory registry publishes an immutable `Arc` snapshot on every write so
//! readers only hold the lock long enough to clone the pointer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::RegistryConfig;
use crate::core::error::CalculationError;
use crate::util::ids::generate_record_id;

use super::defaults::seed_factors;
use super::model::{EmissionFactor, Scope};
use super::units::normalize_factor;

/// Read access to emission factors.
#[async_trait]
pub trait FactorRegistry: Send + Sync {
    /// Resolve the factor that applies to the key at `as_of`.
    ///
    /// # Errors
    ///
    /// Returns `CalculationError::FactorNotFound` when no factor matches.
    async fn lookup(
        &self,
        category: &str,
        unit: &str,
        region: &str,
        as_of: DateTime<Utc>,
    ) -> Result<EmissionFactor, CalculationError>;
}

/// Counts of registered factors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySummary {
    /// Total number of factors.
    pub total: usize,
    /// Factors per scope.
    pub by_scope: BTreeMap<Scope, usize>,
    /// Factors per region.
    pub by_region: BTreeMap<String, usize>,
}

type FactorKey = (String, String);

#[derive(Debug, Clone, Default)]
struct FactorTable {
    by_key: HashMap<FactorKey, Vec<EmissionFactor>>,
    len: usize,
}

impl FactorTable {
    fn insert(&mut self, factor: EmissionFactor) {
        let key = (factor.category.clone(), factor.unit.clone());
        self.by_key.entry(key).or_default().push(factor);
        self.len += 1;
    }

    fn best_match(
        &self,
        key: &FactorKey,
        region: &str,
        as_of: DateTime<Utc>,
    ) -> Option<&EmissionFactor> {
        self.by_key
            .get(key)?
            .iter()
            .filter(|f| f.region.eq_ignore_ascii_case(region) && f.is_valid_at(as_of))
            .max_by_key(|f| f.valid_from)
    }
}

/// Registry backed by an in-process copy-on-write table.
pub struct InMemoryFactorRegistry {
    table: RwLock<Arc<FactorTable>>,
    region_fallback: bool,
    default_region: String,
}

impl std::fmt::Debug for InMemoryFactorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryFactorRegistry")
            .field("factors", &self.len())
            .field("region_fallback", &self.region_fallback)
            .field("default_region", &self.default_region)
            .finish()
    }
}

impl Default for InMemoryFactorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFactorRegistry {
    /// Empty registry with region fallback to `GLOBAL`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&RegistryConfig {
            preload_defaults: false,
            ..RegistryConfig::default()
        })
    }

    /// Registry configured from `cfg`, seeded with defaults if requested.
    #[must_use]
    pub fn with_config(cfg: &RegistryConfig) -> Self {
        let registry = Self {
            table: RwLock::new(Arc::new(FactorTable::default())),
            region_fallback: cfg.region_fallback,
            default_region: cfg.default_region.to_ascii_uppercase(),
        };
        if cfg.preload_defaults {
            let preloaded = registry.preload_defaults();
            debug_assert!(preloaded.is_ok(), "seed factors must validate: {preloaded:?}");
            if let Err(e) = preloaded {
                error!(error = %e, "Default emission factors rejected; registry starts empty");
            }
        }
        registry
    }

    /// Register the built-in seed factors; returns how many were added.
    ///
    /// # Errors
    ///
    /// `InvalidFactor` if a seed fails validation; nothing is registered then.
    pub fn preload_defaults(&self) -> Result<usize, CalculationError> {
        let seeds = seed_factors();
        let count = seeds.len();
        self.register_many(seeds)?;
        info!(count, "Preloaded default emission factors");
        Ok(count)
    }

    /// Register a single factor.
    ///
    /// # Errors
    ///
    /// Returns `CalculationError::InvalidFactor` for empty categories or
    /// non-finite values.
    pub fn register(&self, factor: EmissionFactor) -> Result<(), CalculationError> {
        self.register_many(std::iter::once(factor))
    }

    /// Register several factors and publish them as one snapshot.
    ///
    /// Nothing is published if any factor is invalid.
    ///
    /// # Errors
    ///
    /// Returns `CalculationError::InvalidFactor` for the first invalid factor.
    pub fn register_many(
        &self,
        factors: impl IntoIterator<Item = EmissionFactor>,
    ) -> Result<(), CalculationError> {
        let prepared = factors
            .into_iter()
            .map(prepare_factor)
            .collect::<Result<Vec<_>, _>>()?;

        let mut guard = self.table.write();
        let mut next = FactorTable::clone(&guard);
        for factor in prepared {
            debug!(
                factor_id = %factor.id,
                category = %factor.category,
                unit = %factor.unit,
                region = %factor.region,
                "Registered emission factor"
            );
            next.insert(factor);
        }
        *guard = Arc::new(next);
        Ok(())
    }

    fn snapshot(&self) -> Arc<FactorTable> {
        Arc::clone(&self.table.read())
    }

    /// Number of registered factors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len
    }

    /// Whether no factors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered factors, in no particular order.
    #[must_use]
    pub fn factors(&self) -> Vec<EmissionFactor> {
        self.snapshot()
            .by_key
            .values()
            .flat_map(|v| v.iter().cloned())
            .collect()
    }

    /// Counts by scope and region.
    #[must_use]
    pub fn summary(&self) -> RegistrySummary {
        let mut summary = RegistrySummary::default();
        for factor in self.snapshot().by_key.values().flatten() {
            summary.total += 1;
            *summary.by_scope.entry(factor.scope).or_default() += 1;
            *summary.by_region.entry(factor.region.clone()).or_default() += 1;
        }
        summary
    }

    /// Regions to try for `region`, most specific first.
    fn region_chain(&self, region: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = region.trim().to_ascii_uppercase();
        if !current.is_empty() {
            chain.push(current.clone());
            if self.region_fallback {
                while let Some(idx) = current.rfind('-') {
                    current.truncate(idx);
                    chain.push(current.clone());
                }
            }
        }
        if (self.region_fallback || chain.is_empty()) && !chain.contains(&self.default_region) {
            chain.push(self.default_region.clone());
        }
        chain
    }
}

fn prepare_factor(mut factor: EmissionFactor) -> Result<EmissionFactor, CalculationError> {
    if factor.category.trim().is_empty() {
        return Err(CalculationError::InvalidFactor("category must not be empty".into()));
    }
    if !factor.kg_co2e_per_unit.is_finite() {
        return Err(CalculationError::InvalidFactor(format!(
            "factor for `{}` is not a finite number",
            factor.category
        )));
    }
    if let (Some(from), Some(to)) = (factor.valid_from, factor.valid_to) {
        if from > to {
            return Err(CalculationError::InvalidFactor(format!(
                "factor for `{}` has valid_from after valid_to",
                factor.category
            )));
        }
    }
    let (value, unit) = normalize_factor(factor.kg_co2e_per_unit, &factor.unit);
    factor.kg_co2e_per_unit = value;
    factor.unit = unit;
    factor.category = factor.category.trim().to_ascii_lowercase();
    factor.region = factor.region.trim().to_ascii_uppercase();
    if factor.id.is_empty() {
        factor.id = generate_record_id();
    }
    Ok(factor)
}

#[async_trait]
impl FactorRegistry for InMemoryFactorRegistry {
    async fn lookup(
        &self,
        category: &str,
        unit: &str,
        region: &str,
        as_of: DateTime<Utc>,
    ) -> Result<EmissionFactor, CalculationError> {
        let table = self.snapshot();
        let key = (
            category.trim().to_ascii_lowercase(),
            super::units::canonical_unit(unit),
        );
        for candidate in self.region_chain(region) {
            if let Some(factor) = table.best_match(&key, &candidate, as_of) {
                return Ok(factor.clone());
            }
        }
        Err(CalculationError::FactorNotFound {
            category: key.0,
            unit: key.1,
            region: region.to_owned(),
            as_of,
        })
    }
}

#[async_trait]
impl<T: FactorRegistry + ?Sized> FactorRegistry for Arc<T> {
    async fn lookup(
        &self,
        category: &str,
        unit: &str,
        region: &str,
        as_of: DateTime<Utc>,
    ) -> Result<EmissionFactor, CalculationError> {
        (**self).lookup(category, unit, region, as_of).await
    }
}
