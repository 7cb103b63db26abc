//! Unit normalization.
//!
//! Quantities are converted to one canonical unit per dimension before being
//! multiplied by a factor, and factors are stored per canonical unit:
//!
//! | Dimension | Canonical |
//! |---|---|
//! | energy | `kwh` |
//! | volume | `l` |
//! | mass | `kg` |
//! | distance | `km` |
//! | passenger distance | `passenger-km` |
//! | freight | `tonne-km` |
//!
//! Currency codes and unknown units pass through unchanged (lowercased).

use serde::{Deserialize, Serialize};

/// Physical dimension of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Energy (kWh).
    Energy,
    /// Volume (litres).
    Volume,
    /// Mass (kg).
    Mass,
    /// Distance (km).
    Distance,
    /// Passenger distance (passenger-km).
    PassengerDistance,
    /// Freight (tonne-km).
    Freight,
    /// Monetary spend.
    Currency,
    /// Anything else; passed through as-is.
    Other,
}

/// A quantity expressed in its canonical unit.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedQuantity {
    /// Converted amount.
    pub quantity: f64,
    /// Canonical unit.
    pub unit: String,
    /// Dimension of the unit.
    pub dimension: Dimension,
}

const CURRENCIES: &[&str] = &["usd", "eur", "gbp", "jpy", "cad", "aud", "chf", "cny", "inr"];

/// Returns `(dimension, canonical unit, multiplier to canonical)` for a known unit.
#[must_use]
pub fn conversion(unit: &str) -> Option<(Dimension, &'static str, f64)> {
    let key = unit.trim().to_ascii_lowercase();
    let entry = match key.as_str() {
        "kwh" => (Dimension::Energy, "kwh", 1.0),
        "wh" => (Dimension::Energy, "kwh", 0.001),
        "mwh" => (Dimension::Energy, "kwh", 1000.0),
        "gwh" => (Dimension::Energy, "kwh", 1_000_000.0),
        "mj" => (Dimension::Energy, "kwh", 0.277_778),
        "gj" => (Dimension::Energy, "kwh", 277.778),
        "therm" | "therms" => (Dimension::Energy, "kwh", 29.3071),
        "mmbtu" => (Dimension::Energy, "kwh", 293.071),
        "btu" => (Dimension::Energy, "kwh", 0.000_293_071),

        "l" | "liter" | "liters" | "litre" | "litres" => (Dimension::Volume, "l", 1.0),
        "ml" => (Dimension::Volume, "l", 0.001),
        "gal" | "gallon" | "gallons" => (Dimension::Volume, "l", 3.78541),
        "m3" | "kl" => (Dimension::Volume, "l", 1000.0),

        "kg" | "kgs" => (Dimension::Mass, "kg", 1.0),
        "g" => (Dimension::Mass, "kg", 0.001),
        "t" | "tonne" | "tonnes" | "metric_ton" => (Dimension::Mass, "kg", 1000.0),
        "lb" | "lbs" => (Dimension::Mass, "kg", 0.453_592),
        "short_ton" => (Dimension::Mass, "kg", 907.185),

        "km" => (Dimension::Distance, "km", 1.0),
        "m" => (Dimension::Distance, "km", 0.001),
        "mi" | "mile" | "miles" => (Dimension::Distance, "km", 1.60934),

        "passenger-km" | "pkm" => (Dimension::PassengerDistance, "passenger-km", 1.0),
        "passenger-mile" | "pmi" => (Dimension::PassengerDistance, "passenger-km", 1.60934),

        "tonne-km" | "ton-km" | "tkm" | "t-km" => (Dimension::Freight, "tonne-km", 1.0),
        "kg-km" => (Dimension::Freight, "tonne-km", 0.001),
        "ton-mile" => (Dimension::Freight, "tonne-km", 1.459_97),
        _ => return None,
    };
    Some(entry)
}

/// Canonical form of `unit` (lowercased pass-through when unknown).
#[must_use]
pub fn canonical_unit(unit: &str) -> String {
    conversion(unit).map_or_else(|| unit.trim().to_ascii_lowercase(), |(_, canonical, _)| canonical.to_owned())
}

/// Dimension of `unit`.
#[must_use]
pub fn dimension_of(unit: &str) -> Dimension {
    if let Some((dimension, _, _)) = conversion(unit) {
        return dimension;
    }
    let lower = unit.trim().to_ascii_lowercase();
    if CURRENCIES.contains(&lower.as_str()) || lower.contains('$') {
        Dimension::Currency
    } else {
        Dimension::Other
    }
}

/// Convert `quantity` in `unit` to its canonical unit.
#[must_use]
pub fn normalize(quantity: f64, unit: &str) -> NormalizedQuantity {
    match conversion(unit) {
        Some((dimension, canonical, multiplier)) => NormalizedQuantity {
            quantity: quantity * multiplier,
            unit: canonical.to_owned(),
            dimension,
        },
        None => NormalizedQuantity {
            quantity,
            unit: unit.trim().to_ascii_lowercase(),
            dimension: dimension_of(unit),
        },
    }
}

/// Convert a factor expressed per `unit` into one per canonical unit.
#[must_use]
pub fn normalize_factor(kg_co2e_per_unit: f64, unit: &str) -> (f64, String) {
    match conversion(unit) {
        Some((_, canonical, multiplier)) => (kg_co2e_per_unit / multiplier, canonical.to_owned()),
        None => (kg_co2e_per_unit, unit.trim().to_ascii_lowercase()),
    }
}
