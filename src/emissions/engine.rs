//! Emissions engine: classifies activities by scope and dispatches them to the
//! registered calculator.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::error::CalculationError;

use super::calculator::{aggregate, Calculator, CalculatorOptions};
use super::defaults::{scope1_fallback, scope3_fallback};
use super::model::{Activity, BatchResult, EmissionRecord, Scope};
use super::registry::FactorRegistry;
use super::scope1::Scope1Calculator;
use super::scope2::Scope2Calculator;
use super::scope3::Scope3Calculator;

const SCOPE1_SOURCES: &[&str] = &[
    "fleet",
    "on-site",
    "on_site",
    "refrigerants",
    "stationary_combustion",
    "mobile_combustion",
    "fugitive",
];
const SCOPE2_SOURCES: &[&str] = &["utility_bill", "electricity", "steam", "heating", "cooling"];
const SCOPE3_SOURCES: &[&str] = &[
    "travel",
    "business_travel",
    "commuting",
    "purchases",
    "waste",
    "upstream",
    "downstream",
    "freight",
    "shipping",
    "investment",
];
const SCOPE2_CATEGORIES: &[&str] = &["electricity", "steam", "heating", "cooling"];

/// Classify an activity: by source first, then by category, defaulting to Scope 2.
#[must_use]
pub fn classify_scope(activity: &Activity) -> Scope {
    let source = activity.source.trim().to_ascii_lowercase();
    if SCOPE1_SOURCES.contains(&source.as_str()) {
        return Scope::Scope1;
    }
    if SCOPE2_SOURCES.contains(&source.as_str()) {
        return Scope::Scope2;
    }
    if SCOPE3_SOURCES.contains(&source.as_str()) {
        return Scope::Scope3;
    }

    let category = activity.category.trim().to_ascii_lowercase();
    if SCOPE2_CATEGORIES.contains(&category.as_str()) {
        Scope::Scope2
    } else if scope1_fallback(&category, false).is_some() {
        Scope::Scope1
    } else if scope3_fallback(&category).is_some() {
        Scope::Scope3
    } else {
        Scope::Scope2
    }
}

/// Dispatches activities to per-scope calculators.
pub struct Engine {
    calculators: RwLock<HashMap<Scope, Arc<dyn Calculator>>>,
    config: EngineConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scopes", &self.registered_scopes())
            .field("config", &self.config)
            .finish()
    }
}

impl Engine {
    /// Engine with no calculators registered.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            calculators: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Engine with the built-in Scope 1, 2 and 3 calculators over `registry`.
    #[must_use]
    pub fn with_default_calculators(registry: Arc<dyn FactorRegistry>, config: EngineConfig) -> Self {
        let options = CalculatorOptions {
            strict: config.strict_mode,
            include_ch4_n2o: config.include_ch4_n2o,
        };
        let engine = Self::new(config);
        engine.register_calculator(Scope::Scope1, Arc::new(Scope1Calculator::new(Arc::clone(&registry), options)));
        engine.register_calculator(Scope::Scope2, Arc::new(Scope2Calculator::new(Arc::clone(&registry), options)));
        engine.register_calculator(Scope::Scope3, Arc::new(Scope3Calculator::new(registry, options)));
        engine
    }

    /// Register a calculator for `scope`. A later registration replaces an
    /// earlier one for the same scope.
    pub fn register_calculator(&self, scope: Scope, calculator: Arc<dyn Calculator>) {
        if calculator.scope() != scope {
            warn!(
                scope = %scope,
                calculator_scope = %calculator.scope(),
                "Calculator registered under a different scope than it reports"
            );
        }
        let replaced = self.calculators.write().insert(scope, calculator).is_some();
        info!(scope = %scope, replaced, "Registered emissions calculator");
    }

    /// Scopes with a registered calculator, ascending.
    #[must_use]
    pub fn registered_scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = self.calculators.read().keys().copied().collect();
        scopes.sort();
        scopes
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn calculator_for(&self, scope: Scope) -> Option<Arc<dyn Calculator>> {
        self.calculators.read().get(&scope).cloned()
    }

    /// Calculate one activity.
    ///
    /// Activities without a location are looked up in the configured default
    /// region.
    ///
    /// # Errors
    ///
    /// `CalculationError::UnregisteredScope` when no calculator handles the
    /// classified scope; otherwise whatever the calculator reports.
    pub async fn calculate(&self, activity: &Activity) -> Result<EmissionRecord, CalculationError> {
        let scope = classify_scope(activity);
        let calculator = self
            .calculator_for(scope)
            .ok_or(CalculationError::UnregisteredScope(scope))?;

        let activity = if activity.location.trim().is_empty() && !self.config.default_region.is_empty() {
            let mut located = activity.clone();
            located.location.clone_from(&self.config.default_region);
            Cow::Owned(located)
        } else {
            Cow::Borrowed(activity)
        };

        debug!(activity_id = %activity.id, scope = %scope, "Dispatching activity");
        calculator.calculate(&activity).await
    }

    /// Calculate many activities with per-activity fault isolation.
    ///
    /// Runs serially or with at most `max_batch_concurrency` activities in
    /// flight. Either way results are folded in input order, so counts and
    /// totals do not depend on the mode.
    pub async fn calculate_batch(&self, activities: &[Activity]) -> BatchResult {
        let concurrency = self.config.max_batch_concurrency.max(1);
        if !self.config.enable_parallel_batch || concurrency == 1 || activities.len() <= 1 {
            let mut outcomes = Vec::with_capacity(activities.len());
            for activity in activities {
                outcomes.push((activity.id.clone(), self.calculate(activity).await));
            }
            return aggregate(outcomes);
        }

        let mut indexed: Vec<(usize, String, Result<EmissionRecord, CalculationError>)> =
            stream::iter(activities.iter().enumerate())
                .map(move |(idx, activity)| async move {
                    (idx, activity.id.clone(), self.calculate(activity).await)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
        indexed.sort_by_key(|(idx, _, _)| *idx);
        aggregate(indexed.into_iter().map(|(_, id, outcome)| (id, outcome)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emissions::model::EmissionFactor;
    use crate::emissions::registry::InMemoryFactorRegistry;

    fn us_registry() -> Arc<InMemoryFactorRegistry> {
        let registry = Arc::new(InMemoryFactorRegistry::new());
        registry
            .register(EmissionFactor::new(Scope::Scope2, "electricity", "kWh", "US", 0.4))
            .unwrap();
        registry
    }

    fn config(parallel: bool) -> EngineConfig {
        EngineConfig {
            enable_parallel_batch: parallel,
            max_batch_concurrency: 4,
            strict_mode: true,
            include_ch4_n2o: false,
            default_region: String::new(),
        }
    }

    #[test]
    fn test_classification_prefers_source_then_category() {
        assert_eq!(classify_scope(&Activity::new("a", "fleet", "diesel", 1.0, "L")), Scope::Scope1);
        assert_eq!(classify_scope(&Activity::new("a", "utility_bill", "x", 1.0, "kWh")), Scope::Scope2);
        assert_eq!(classify_scope(&Activity::new("a", "travel", "train", 1.0, "km")), Scope::Scope3);
        assert_eq!(classify_scope(&Activity::new("a", "csv", "propane", 1.0, "L")), Scope::Scope1);
        assert_eq!(classify_scope(&Activity::new("a", "csv", "software", 1.0, "USD")), Scope::Scope3);
        assert_eq!(classify_scope(&Activity::new("a", "csv", "unknown", 1.0, "kWh")), Scope::Scope2);
    }

    #[tokio::test]
    async fn test_unregistered_scope_is_reported() {
        let engine = Engine::new(config(false));
        let err = engine
            .calculate(&Activity::new("a", "fleet", "diesel", 1.0, "L"))
            .await
            .unwrap_err();
        assert_eq!(err, CalculationError::UnregisteredScope(Scope::Scope1));
    }

    #[tokio::test]
    async fn test_later_registration_wins() {
        let registry = us_registry();
        let engine = Engine::new(config(false));
        let lenient = CalculatorOptions {
            strict: false,
            include_ch4_n2o: false,
        };
        engine.register_calculator(Scope::Scope2, Arc::new(Scope2Calculator::new(registry.clone(), CalculatorOptions::default())));
        engine.register_calculator(Scope::Scope2, Arc::new(Scope2Calculator::new(registry, lenient)));
        assert_eq!(engine.registered_scopes(), vec![Scope::Scope2]);

        // Only the lenient calculator can resolve an unknown region via the grid default.
        let record = engine
            .calculate(&Activity::new("a", "utility_bill", "steam", 10.0, "kWh").with_location("BR"))
            .await
            .unwrap();
        assert!((record.emissions_kg_co2e - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_default_region_applies_to_unlocated_activities() {
        let mut cfg = config(false);
        cfg.default_region = "US".into();
        let engine = Engine::with_default_calculators(us_registry(), cfg);
        let record = engine
            .calculate(&Activity::new("a", "utility_bill", "electricity", 100.0, "kWh"))
            .await
            .unwrap();
        assert_eq!(record.region, "US");
        assert!((record.emissions_kg_co2e - 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let engine = Engine::with_default_calculators(us_registry(), config(true));
        let activities = vec![
            Activity::new("a1", "utility_bill", "electricity", 1000.0, "kWh").with_location("US"),
            Activity::new("a2", "utility_bill", "electricity", 500.0, "kWh").with_location("US"),
            Activity::new("a3", "utility_bill", "water", 10.0, "kWh").with_location("US"),
        ];
        let result = engine.calculate_batch(&activities).await;
        assert_eq!(result.success_count, 2);
        assert_eq!(result.error_count, 1);
        assert!((result.total_emissions_kg_co2e - 600.0).abs() < 1e-9);
        assert_eq!(result.failures[0].activity_id, "a3");
    }

    #[tokio::test]
    async fn test_serial_and_parallel_agree() {
        let activities: Vec<Activity> = (0..50)
            .map(|i| {
                Activity::new(format!("a{i}"), "utility_bill", "electricity", f64::from(i) * 1.37, "kWh")
                    .with_location("US")
            })
            .collect();
        let serial = Engine::with_default_calculators(us_registry(), config(false))
            .calculate_batch(&activities)
            .await;
        let parallel = Engine::with_default_calculators(us_registry(), config(true))
            .calculate_batch(&activities)
            .await;
        assert_eq!(serial.success_count, parallel.success_count);
        assert_eq!(serial.error_count, parallel.error_count);
        assert_eq!(
            serial.total_emissions_kg_co2e.to_bits(),
            parallel.total_emissions_kg_co2e.to_bits()
        );
    }
}
