//! Calculator abstraction shared by the per-scope implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::CalculationError;
use crate::util::clock::now;
use crate::util::ids::generate_record_id;

use super::defaults::FallbackFactor;
use super::registry::FactorRegistry;
use super::model::{
    kg_to_tonnes, Activity, ActivityFailure, BatchResult, DataQuality, EmissionFactor, EmissionRecord,
    Methodology, Scope,
};
use super::units::{Dimension, NormalizedQuantity};

/// Options shared by all calculators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculatorOptions {
    /// Missing or expired factors are hard errors instead of falling back to
    /// the built-in tables.
    pub strict: bool,
    /// Add CH4/N2O contributions to Scope 1 combustion fallbacks.
    pub include_ch4_n2o: bool,
}

impl Default for CalculatorOptions {
    fn default() -> Self {
        Self {
            strict: true,
            include_ch4_n2o: false,
        }
    }
}

/// Computes emissions for the activities of one scope.
#[async_trait]
pub trait Calculator: Send + Sync {
    /// Scope this calculator produces records for.
    fn scope(&self) -> Scope;

    /// Whether the calculator understands this activity.
    fn supports(&self, activity: &Activity) -> bool;

    /// Calculate a single activity.
    ///
    /// # Errors
    ///
    /// Returns a `CalculationError` when the activity is invalid, its unit is
    /// unsupported, or no factor applies.
    async fn calculate(&self, activity: &Activity) -> Result<EmissionRecord, CalculationError>;

    /// Calculate every supported activity in order; unsupported ones are skipped.
    async fn calculate_batch(&self, activities: &[Activity]) -> BatchResult {
        let mut outcomes = Vec::with_capacity(activities.len());
        for activity in activities.iter().filter(|a| self.supports(a)) {
            outcomes.push((activity.id.clone(), self.calculate(activity).await));
        }
        aggregate(outcomes)
    }
}

/// Fold per-activity outcomes, given in input order, into a `BatchResult`.
///
/// The total is accumulated in the order given so callers that reorder
/// parallel results by input position get bit-identical sums.
#[must_use]
pub fn aggregate(
    outcomes: impl IntoIterator<Item = (String, Result<EmissionRecord, CalculationError>)>,
) -> BatchResult {
    let mut result = BatchResult::default();
    for (activity_id, outcome) in outcomes {
        match outcome {
            Ok(record) => {
                result.success_count += 1;
                result.total_emissions_kg_co2e += record.emissions_kg_co2e;
                result.records.push(record);
            }
            Err(err) => {
                result.error_count += 1;
                result.failures.push(ActivityFailure {
                    activity_id,
                    error: err.to_string(),
                });
            }
        }
    }
    result
}

/// Reject activities whose quantity or unit cannot be used.
///
/// # Errors
///
/// Returns `CalculationError::InvalidActivity`.
pub fn validate_activity(activity: &Activity) -> Result<(), CalculationError> {
    if activity.id.trim().is_empty() {
        return Err(CalculationError::InvalidActivity("activity id is empty".into()));
    }
    if !activity.quantity.is_finite() || activity.quantity < 0.0 {
        return Err(CalculationError::InvalidActivity(format!(
            "activity {} has invalid quantity {}",
            activity.id, activity.quantity
        )));
    }
    if activity.unit.trim().is_empty() {
        return Err(CalculationError::InvalidActivity(format!(
            "activity {} has no unit",
            activity.id
        )));
    }
    Ok(())
}

/// Look the activity up in the registry, falling back to `fallback` on a miss
/// when not strict.
pub(crate) async fn resolve_factor(
    registry: &dyn FactorRegistry,
    activity: &Activity,
    normalized: &NormalizedQuantity,
    options: CalculatorOptions,
    default_method: Methodology,
    fallback: Option<ResolvedFactor>,
) -> Result<ResolvedFactor, CalculationError> {
    let lookup = registry
        .lookup(
            &activity.category,
            &normalized.unit,
            &activity.location,
            activity.period_start,
        )
        .await;
    match lookup {
        Ok(factor) => Ok(ResolvedFactor::registered(&factor, default_method)),
        Err(err @ CalculationError::FactorNotFound { .. }) if !options.strict => {
            let Some(fallback) = fallback else {
                return Err(err);
            };
            warn!(
                activity_id = %activity.id,
                category = %activity.category,
                factor_id = %fallback.id,
                "No registered factor, using built-in default"
            );
            Ok(fallback)
        }
        Err(err) => Err(err),
    }
}

/// The factor a calculator settled on, before it is applied.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedFactor {
    pub id: String,
    pub value: f64,
    pub unit: String,
    pub methodology: Methodology,
    pub data_quality: DataQuality,
}

impl ResolvedFactor {
    /// From a registry factor; `default_method` applies when the factor carries none.
    pub fn registered(factor: &EmissionFactor, default_method: Methodology) -> Self {
        let methodology = factor.method.unwrap_or(default_method);
        let data_quality = if methodology == Methodology::SpendBased {
            DataQuality::Estimated
        } else {
            DataQuality::Measured
        };
        Self {
            id: factor.id.clone(),
            value: factor.kg_co2e_per_unit,
            unit: factor.unit.clone(),
            methodology,
            data_quality,
        }
    }

    /// From a built-in fallback table entry.
    pub fn fallback(scope: Scope, factor: &FallbackFactor) -> Self {
        Self {
            id: format!("default-scope{}-{}", scope.number(), factor.key),
            value: factor.kg_co2e_per_unit,
            unit: factor.unit.to_owned(),
            methodology: Methodology::DefaultFactor,
            data_quality: DataQuality::Default,
        }
    }

    /// Whether the factor's unit accepts `normalized`.
    pub fn accepts(&self, normalized: &NormalizedQuantity) -> bool {
        self.unit == normalized.unit
            || (self.unit == "currency" && normalized.dimension == Dimension::Currency)
    }

    /// Apply the factor to the normalized quantity.
    pub fn into_record(
        self,
        activity: &Activity,
        scope: Scope,
        normalized: &NormalizedQuantity,
        scope3_category: Option<u8>,
    ) -> EmissionRecord {
        let emissions = normalized.quantity * self.value;
        EmissionRecord {
            id: generate_record_id(),
            activity_id: activity.id.clone(),
            scope,
            emissions_kg_co2e: emissions,
            emissions_tonnes_co2e: kg_to_tonnes(emissions),
            methodology: self.methodology,
            data_quality: self.data_quality,
            factor_id: self.id,
            factor_value: self.value,
            input_quantity: activity.quantity,
            input_unit: activity.unit.clone(),
            normalized_quantity: normalized.quantity,
            normalized_unit: normalized.unit.clone(),
            region: activity.location.clone(),
            org_id: activity.org_id.clone(),
            workspace_id: activity.workspace_id.clone(),
            scope3_category,
            period_start: activity.period_start,
            period_end: activity.period_end,
            calculated_at: now(),
        }
    }
}
