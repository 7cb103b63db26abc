//! Domain model for activities, emission factors and calculated records.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::clock::now;

/// GHG Protocol emission scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Direct emissions from owned or controlled sources.
    Scope1,
    /// Indirect emissions from purchased energy.
    Scope2,
    /// Other indirect emissions across the value chain.
    Scope3,
}

impl Scope {
    /// All scopes in ascending order.
    pub const ALL: [Self; 3] = [Self::Scope1, Self::Scope2, Self::Scope3];

    /// Numeric scope (1, 2 or 3).
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Scope1 => 1,
            Self::Scope2 => 2,
            Self::Scope3 => 3,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope {}", self.number())
    }
}

/// Calculation methodology recorded on each emission record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Methodology {
    /// Grid-average factors for the consumption location.
    LocationBased,
    /// Contractual instruments (PPAs, certificates).
    MarketBased,
    /// Economic input-output factors applied to spend.
    SpendBased,
    /// Physical activity data multiplied by a factor.
    ActivityBased,
    /// Emissions reported by the supplier.
    SupplierSpecific,
    /// Built-in fallback factor used because no registered factor matched.
    DefaultFactor,
}

impl fmt::Display for Methodology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LocationBased => "location-based",
            Self::MarketBased => "market-based",
            Self::SpendBased => "spend-based",
            Self::ActivityBased => "activity-based",
            Self::SupplierSpecific => "supplier-specific",
            Self::DefaultFactor => "default-factor",
        };
        f.write_str(s)
    }
}

/// Confidence in the input data behind a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    /// Metered or invoiced data with a registered factor.
    Measured,
    /// Estimated from proxies (spend, averages).
    Estimated,
    /// Built-in default factor.
    Default,
}

/// An immutable unit of consumption owned by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity identifier.
    pub id: String,
    /// Owning organization.
    pub org_id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Origin of the data, e.g. `utility_bill`, `fleet`, `travel`.
    pub source: String,
    /// Finer classification, e.g. `electricity`, `diesel`, `flight-long`.
    pub category: String,
    /// Region used for factor lookup, e.g. `US-WEST`.
    pub location: String,
    /// Consumed amount in `unit`.
    pub quantity: f64,
    /// Unit of `quantity`.
    pub unit: String,
    /// Start of the consumption period.
    pub period_start: DateTime<Utc>,
    /// End of the consumption period.
    pub period_end: DateTime<Utc>,
    /// Free-form attributes.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Activity {
    /// Create an activity with the current time as its period and no owner.
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        category: impl Into<String>,
        quantity: f64,
        unit: impl Into<String>,
    ) -> Self {
        let at = now();
        Self {
            id: id.into(),
            org_id: String::new(),
            workspace_id: String::new(),
            source: source.into(),
            category: category.into(),
            location: String::new(),
            quantity,
            unit: unit.into(),
            period_start: at,
            period_end: at,
            metadata: HashMap::new(),
        }
    }

    /// Set the region.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Set the owning organization and workspace.
    #[must_use]
    pub fn with_owner(mut self, org_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        self.org_id = org_id.into();
        self.workspace_id = workspace_id.into();
        self
    }

    /// Set the consumption period.
    #[must_use]
    pub const fn with_period(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.period_start = start;
        self.period_end = end;
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Conversion coefficient from activity quantity to kg CO2e.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionFactor {
    /// Factor identifier.
    pub id: String,
    /// Scope the factor applies to.
    pub scope: Scope,
    /// Activity category the factor matches.
    pub category: String,
    /// Unit the factor is expressed per.
    pub unit: String,
    /// Region code.
    pub region: String,
    /// First day the factor applies (inclusive).
    pub valid_from: Option<DateTime<Utc>>,
    /// Last day the factor applies (inclusive).
    pub valid_to: Option<DateTime<Utc>>,
    /// kg CO2e per unit.
    pub kg_co2e_per_unit: f64,
    /// Provenance, e.g. `EPA eGRID 2023`.
    pub source: String,
    /// Methodology the factor implies, if any.
    #[serde(default)]
    pub method: Option<Methodology>,
}

impl EmissionFactor {
    /// Create an open-ended factor.
    pub fn new(
        scope: Scope,
        category: impl Into<String>,
        unit: impl Into<String>,
        region: impl Into<String>,
        kg_co2e_per_unit: f64,
    ) -> Self {
        Self {
            id: String::new(),
            scope,
            category: category.into(),
            unit: unit.into(),
            region: region.into(),
            valid_from: None,
            valid_to: None,
            kg_co2e_per_unit,
            source: String::new(),
            method: None,
        }
    }

    /// Set the identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Restrict the factor to a validity window.
    #[must_use]
    pub const fn with_validity(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    /// Set the provenance string.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the methodology.
    #[must_use]
    pub const fn with_method(mut self, method: Methodology) -> Self {
        self.method = Some(method);
        self
    }

    /// Whether the factor applies at `as_of`.
    #[must_use]
    pub fn is_valid_at(&self, as_of: DateTime<Utc>) -> bool {
        self.valid_from.is_none_or(|from| from <= as_of) && self.valid_to.is_none_or(|to| as_of <= to)
    }
}

/// The result of calculating one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionRecord {
    /// Record identifier.
    pub id: String,
    /// Activity the record was computed from.
    pub activity_id: String,
    /// Scope of the emissions.
    pub scope: Scope,
    /// Emissions in kg CO2e.
    pub emissions_kg_co2e: f64,
    /// Emissions in tonnes CO2e.
    pub emissions_tonnes_co2e: f64,
    /// Methodology tag.
    pub methodology: Methodology,
    /// Confidence in the result.
    pub data_quality: DataQuality,
    /// Identifier of the factor used.
    pub factor_id: String,
    /// Factor value used, per `normalized_unit`.
    pub factor_value: f64,
    /// Quantity as submitted.
    pub input_quantity: f64,
    /// Unit as submitted.
    pub input_unit: String,
    /// Quantity after normalization.
    pub normalized_quantity: f64,
    /// Canonical unit the quantity was normalized to.
    pub normalized_unit: String,
    /// Region of the activity.
    pub region: String,
    /// Owning organization.
    pub org_id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Scope 3 category, when applicable.
    #[serde(default)]
    pub scope3_category: Option<u8>,
    /// Start of the consumption period.
    pub period_start: DateTime<Utc>,
    /// End of the consumption period.
    pub period_end: DateTime<Utc>,
    /// When the record was produced.
    pub calculated_at: DateTime<Utc>,
}

/// One activity that could not be calculated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityFailure {
    /// Activity identifier.
    pub activity_id: String,
    /// Rendered error.
    pub error: String,
}

/// Aggregate outcome of a batch calculation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Activities calculated successfully.
    pub success_count: usize,
    /// Activities that failed.
    pub error_count: usize,
    /// Sum of successful records, accumulated in input order.
    pub total_emissions_kg_co2e: f64,
    /// Successful records; order is unspecified when computed in parallel.
    pub records: Vec<EmissionRecord>,
    /// Failed activities.
    pub failures: Vec<ActivityFailure>,
}

impl BatchResult {
    /// Records sorted by activity identifier.
    #[must_use]
    pub fn sorted_records(&self) -> Vec<EmissionRecord> {
        let mut records = self.records.clone();
        records.sort_by(|a, b| a.activity_id.cmp(&b.activity_id));
        records
    }

    /// Emissions summed per scope.
    #[must_use]
    pub fn emissions_by_scope(&self) -> BTreeMap<Scope, f64> {
        let mut totals = BTreeMap::new();
        for record in self.sorted_records() {
            *totals.entry(record.scope).or_insert(0.0) += record.emissions_kg_co2e;
        }
        totals
    }

    /// Fraction of activities that succeeded, `0.0` for an empty batch.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.error_count;
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64
    }
}

/// Convert kilograms to metric tonnes.
#[must_use]
pub fn kg_to_tonnes(kg: f64) -> f64 {
    kg / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_factor_validity_window_is_inclusive() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        let factor = EmissionFactor::new(Scope::Scope2, "electricity", "kwh", "US", 0.4)
            .with_validity(Some(from), Some(to));

        assert!(factor.is_valid_at(from));
        assert!(factor.is_valid_at(to));
        assert!(!factor.is_valid_at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        assert!(!factor.is_valid_at(Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_success_rate_handles_empty_batch() {
        assert!((BatchResult::default().success_rate() - 0.0).abs() < f64::EPSILON);
        let result = BatchResult {
            success_count: 3,
            error_count: 1,
            ..BatchResult::default()
        };
        assert!((result.success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scope_display_and_serde() {
        assert_eq!(Scope::Scope2.to_string(), "scope 2");
        assert_eq!(serde_json::to_string(&Scope::Scope3).unwrap(), "\"scope3\"");
        assert_eq!(serde_json::to_string(&Methodology::DefaultFactor).unwrap(), "\"default-factor\"");
    }

    #[test]
    fn test_kg_to_tonnes_divides_by_thousand() {
        assert!((kg_to_tonnes(1500.0) - 1.5).abs() < f64::EPSILON);
    }
}
