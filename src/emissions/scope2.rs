//! Scope 2: purchased electricity, steam, heating and cooling.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::core::error::CalculationError;

use super::calculator::{resolve_factor, validate_activity, Calculator, CalculatorOptions, ResolvedFactor};
use super::defaults::{FallbackFactor, DEFAULT_GRID_FACTOR_KG_PER_KWH};
use super::model::{Activity, EmissionRecord, Methodology, Scope};
use super::registry::FactorRegistry;
use super::units::{dimension_of, normalize, Dimension};

const CATEGORIES: &[&str] = &["electricity", "steam", "heating", "cooling"];

/// Metadata key selecting market-based accounting.
pub const METHOD_METADATA_KEY: &str = "method";

/// Scope 2 calculator.
#[derive(Clone)]
pub struct Scope2Calculator {
    registry: Arc<dyn FactorRegistry>,
    options: CalculatorOptions,
}

impl Scope2Calculator {
    /// Create a calculator backed by `registry`.
    pub fn new(registry: Arc<dyn FactorRegistry>, options: CalculatorOptions) -> Self {
        Self { registry, options }
    }

    fn methodology(activity: &Activity) -> Methodology {
        match activity.metadata.get(METHOD_METADATA_KEY).map(String::as_str) {
            Some("market-based" | "market_based") => Methodology::MarketBased,
            _ => Methodology::LocationBased,
        }
    }
}

#[async_trait]
impl Calculator for Scope2Calculator {
    fn scope(&self) -> Scope {
        Scope::Scope2
    }

    fn supports(&self, activity: &Activity) -> bool {
        let category = activity.category.to_ascii_lowercase();
        CATEGORIES.contains(&category.as_str()) && dimension_of(&activity.unit) == Dimension::Energy
    }

    async fn calculate(&self, activity: &Activity) -> Result<EmissionRecord, CalculationError> {
        validate_activity(activity)?;
        let normalized = normalize(activity.quantity, &activity.unit);
        if normalized.dimension != Dimension::Energy {
            return Err(CalculationError::UnsupportedUnit {
                unit: activity.unit.clone(),
                scope: Scope::Scope2,
            });
        }

        let grid = FallbackFactor {
            key: "grid-average",
            unit: "kwh",
            kg_co2e_per_unit: DEFAULT_GRID_FACTOR_KG_PER_KWH,
            method: Methodology::LocationBased,
        };
        let factor = resolve_factor(
            self.registry.as_ref(),
            activity,
            &normalized,
            self.options,
            Self::methodology(activity),
            Some(ResolvedFactor::fallback(Scope::Scope2, &grid)),
        )
        .await?;

        let record = factor.into_record(activity, Scope::Scope2, &normalized, None);
        debug!(
            activity_id = %activity.id,
            region = %activity.location,
            kwh = normalized.quantity,
            emissions_kg_co2e = record.emissions_kg_co2e,
            "Calculated scope 2 emissions"
        );
        Ok(record)
    }
}
