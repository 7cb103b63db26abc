//! Scope 1: direct emissions from fleet, stationary combustion and fugitive
//! refrigerant losses.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::core::error::CalculationError;

use super::calculator::{resolve_factor, validate_activity, Calculator, CalculatorOptions, ResolvedFactor};
use super::defaults::scope1_fallback;
use super::model::{Activity, EmissionRecord, Methodology, Scope};
use super::registry::FactorRegistry;
use super::units::normalize;

const SOURCES: &[&str] = &[
    "fleet",
    "on-site",
    "on_site",
    "stationary_combustion",
    "mobile_combustion",
    "refrigerants",
    "fugitive",
];

/// Scope 1 calculator.
#[derive(Clone)]
pub struct Scope1Calculator {
    registry: Arc<dyn FactorRegistry>,
    options: CalculatorOptions,
}

impl Scope1Calculator {
    /// Create a calculator backed by `registry`.
    pub fn new(registry: Arc<dyn FactorRegistry>, options: CalculatorOptions) -> Self {
        Self { registry, options }
    }
}

#[async_trait]
impl Calculator for Scope1Calculator {
    fn scope(&self) -> Scope {
        Scope::Scope1
    }

    fn supports(&self, activity: &Activity) -> bool {
        let source = activity.source.to_ascii_lowercase();
        SOURCES.contains(&source.as_str()) || scope1_fallback(&activity.category, false).is_some()
    }

    async fn calculate(&self, activity: &Activity) -> Result<EmissionRecord, CalculationError> {
        validate_activity(activity)?;
        let normalized = normalize(activity.quantity, &activity.unit);
        let fallback = scope1_fallback(&activity.category, self.options.include_ch4_n2o)
            .map(|f| ResolvedFactor::fallback(Scope::Scope1, &f));

        let factor = resolve_factor(
            self.registry.as_ref(),
            activity,
            &normalized,
            self.options,
            Methodology::ActivityBased,
            fallback,
        )
        .await?;

        if !factor.accepts(&normalized) {
            return Err(CalculationError::UnsupportedUnit {
                unit: activity.unit.clone(),
                scope: Scope::Scope1,
            });
        }

        let record = factor.into_record(activity, Scope::Scope1, &normalized, None);
        debug!(
            activity_id = %activity.id,
            category = %activity.category,
            emissions_kg_co2e = record.emissions_kg_co2e,
            "Calculated scope 1 emissions"
        );
        Ok(record)
    }
}
