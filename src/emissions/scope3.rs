//! Scope 3: value-chain emissions (travel, commuting, purchases, waste, freight).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::CalculationError;

use super::calculator::{resolve_factor, validate_activity, Calculator, CalculatorOptions, ResolvedFactor};
use super::defaults::scope3_fallback;
use super::model::{Activity, EmissionRecord, Methodology, Scope};
use super::registry::FactorRegistry;
use super::units::{normalize, Dimension};

/// GHG Protocol Scope 3 category (1 to 15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Scope3Category {
    Unspecified,
    PurchasedGoods,
    CapitalGoods,
    FuelEnergy,
    UpstreamTransport,
    Waste,
    BusinessTravel,
    Commuting,
    UpstreamLeasedAssets,
    DownstreamTransport,
    ProcessingSold,
    UseSoldProducts,
    EndOfLife,
    DownstreamLeasedAssets,
    Franchises,
    Investments,
}

impl Scope3Category {
    /// Category number as defined by the GHG Protocol, `0` when unspecified.
    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Categories 1 to 8.
    #[must_use]
    pub const fn is_upstream(self) -> bool {
        let n = self.number();
        n >= 1 && n <= 8
    }

    /// Categories 9 to 15.
    #[must_use]
    pub const fn is_downstream(self) -> bool {
        self.number() >= 9
    }

    /// Infer the category from an activity's source and category.
    #[must_use]
    pub fn from_activity(activity: &Activity) -> Self {
        let source = activity.source.to_ascii_lowercase();
        let category = activity.category.to_ascii_lowercase();
        match source.as_str() {
            "travel" | "business_travel" => Self::BusinessTravel,
            "commuting" => Self::Commuting,
            "waste" => Self::Waste,
            "purchases" => match category.as_str() {
                "capital" | "equipment" | "machinery" | "capital_goods" => Self::CapitalGoods,
                _ => Self::PurchasedGoods,
            },
            "upstream" => match category.as_str() {
                "transportation_distribution" | "truck_freight" | "freight" | "shipping" => {
                    Self::UpstreamTransport
                }
                "leased_assets" => Self::UpstreamLeasedAssets,
                _ => Self::FuelEnergy,
            },
            "downstream" => match category.as_str() {
                "processing_sold_products" => Self::ProcessingSold,
                "use_sold_products" => Self::UseSoldProducts,
                "end_of_life_treatment" => Self::EndOfLife,
                "leased_assets" => Self::DownstreamLeasedAssets,
                "franchises" => Self::Franchises,
                "investments" => Self::Investments,
                _ => Self::DownstreamTransport,
            },
            "freight" | "shipping" => Self::UpstreamTransport,
            "investment" => Self::Investments,
            _ => Self::Unspecified,
        }
    }
}

impl fmt::Display for Scope3Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unspecified => "Unknown Category",
            Self::PurchasedGoods => "Purchased Goods and Services",
            Self::CapitalGoods => "Capital Goods",
            Self::FuelEnergy => "Fuel and Energy Activities",
            Self::UpstreamTransport => "Upstream Transportation",
            Self::Waste => "Waste",
            Self::BusinessTravel => "Business Travel",
            Self::Commuting => "Employee Commuting",
            Self::UpstreamLeasedAssets => "Upstream Leased Assets",
            Self::DownstreamTransport => "Downstream Transportation",
            Self::ProcessingSold => "Processing of Sold Products",
            Self::UseSoldProducts => "Use of Sold Products",
            Self::EndOfLife => "End-of-Life Treatment",
            Self::DownstreamLeasedAssets => "Downstream Leased Assets",
            Self::Franchises => "Franchises",
            Self::Investments => "Investments",
        };
        f.write_str(name)
    }
}

/// Scope 3 calculator.
#[derive(Clone)]
pub struct Scope3Calculator {
    registry: Arc<dyn FactorRegistry>,
    options: CalculatorOptions,
}

impl Scope3Calculator {
    /// Create a calculator backed by `registry`.
    pub fn new(registry: Arc<dyn FactorRegistry>, options: CalculatorOptions) -> Self {
        Self { registry, options }
    }
}

#[async_trait]
impl Calculator for Scope3Calculator {
    fn scope(&self) -> Scope {
        Scope::Scope3
    }

    fn supports(&self, activity: &Activity) -> bool {
        Scope3Category::from_activity(activity) != Scope3Category::Unspecified
    }

    async fn calculate(&self, activity: &Activity) -> Result<EmissionRecord, CalculationError> {
        validate_activity(activity)?;
        let category = Scope3Category::from_activity(activity);
        if category == Scope3Category::Unspecified {
            return Err(CalculationError::InvalidActivity(format!(
                "cannot determine scope 3 category for activity {} (source `{}`)",
                activity.id, activity.source
            )));
        }

        let normalized = normalize(activity.quantity, &activity.unit);
        let default_method = if normalized.dimension == Dimension::Currency {
            Methodology::SpendBased
        } else {
            Methodology::ActivityBased
        };
        let fallback = scope3_fallback(&activity.category).map(|f| {
            let mut resolved = ResolvedFactor::fallback(Scope::Scope3, &f);
            if f.method == Methodology::SpendBased {
                resolved.methodology = Methodology::SpendBased;
            }
            resolved
        });

        let factor = resolve_factor(
            self.registry.as_ref(),
            activity,
            &normalized,
            self.options,
            default_method,
            fallback,
        )
        .await?;

        if !factor.accepts(&normalized) {
            return Err(CalculationError::UnsupportedUnit {
                unit: activity.unit.clone(),
                scope: Scope::Scope3,
            });
        }

        let record = factor.into_record(activity, Scope::Scope3, &normalized, Some(category.number()));
        debug!(
            activity_id = %activity.id,
            category = %category,
            method = %record.methodology,
            emissions_kg_co2e = record.emissions_kg_co2e,
            "Calculated scope 3 emissions"
        );
        Ok(record)
    }
}
