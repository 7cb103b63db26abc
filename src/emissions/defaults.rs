//! Built-in factor tables.
//!
//! `seed_factors` is what `preload_defaults` registers. The `*_fallback`
//! functions are used by calculators outside strict mode when the registry has
//! no match. All values are kg CO2e per canonical unit (see [`super::units`]).

use super::model::{EmissionFactor, Methodology, Scope};

/// Global average grid intensity in kg CO2e per kWh.
pub const DEFAULT_GRID_FACTOR_KG_PER_KWH: f64 = 0.4;

/// Region used when nothing more specific matches.
pub const GLOBAL_REGION: &str = "GLOBAL";

/// A fallback factor from the built-in tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackFactor {
    /// Table key the factor was found under.
    pub key: &'static str,
    /// Canonical unit the value is expressed per.
    pub unit: &'static str,
    /// kg CO2e per `unit`.
    pub kg_co2e_per_unit: f64,
    /// Methodology implied by the table.
    pub method: Methodology,
}

const fn activity(key: &'static str, unit: &'static str, kg_co2e_per_unit: f64) -> FallbackFactor {
    FallbackFactor {
        key,
        unit,
        kg_co2e_per_unit,
        method: Methodology::ActivityBased,
    }
}

const fn spend(key: &'static str, kg_co2e_per_unit: f64) -> FallbackFactor {
    FallbackFactor {
        key,
        unit: "currency",
        kg_co2e_per_unit,
        method: Methodology::SpendBased,
    }
}

// Liquids per litre, natural gas per litre (1.93 kg/m3), solids per kg.
const SCOPE1_FUELS: &[FallbackFactor] = &[
    activity("diesel", "l", 2.68),
    activity("gasoline", "l", 2.31),
    activity("petrol", "l", 2.31),
    activity("natural_gas", "l", 0.001_93),
    activity("propane", "l", 1.51),
    activity("fuel_oil", "l", 2.96),
    activity("fuel_oil_1", "l", 2.72),
    activity("fuel_oil_2", "l", 2.96),
    activity("fuel_oil_4", "l", 3.10),
    activity("fuel_oil_5", "l", 3.20),
    activity("fuel_oil_6", "l", 3.25),
    activity("jet_fuel", "l", 2.52),
    activity("biodiesel", "l", 0.0),
    activity("ethanol", "l", 0.0),
    activity("coal", "kg", 2.42),
    activity("wood", "kg", 0.0),
];

const SCOPE1_CH4_N2O_UPLIFT: &[(&str, f64)] = &[
    ("diesel", 0.01),
    ("gasoline", 0.012),
    ("petrol", 0.012),
    ("natural_gas", 0.000_004),
    ("propane", 0.003),
    ("fuel_oil", 0.012),
    ("fuel_oil_1", 0.010),
    ("fuel_oil_2", 0.012),
    ("fuel_oil_4", 0.014),
    ("fuel_oil_5", 0.014),
    ("fuel_oil_6", 0.015),
    ("jet_fuel", 0.010),
    ("coal", 0.020),
];

// 100-year GWP, applied per kg leaked.
const REFRIGERANT_GWP: &[(&str, f64)] = &[
    ("r-134a", 1430.0),
    ("r-410a", 2088.0),
    ("r-404a", 3922.0),
    ("r-407c", 1774.0),
    ("r-22", 1810.0),
    ("r-290", 3.0),
    ("r-744", 1.0),
    ("r-717", 0.0),
];

const REFRIGERANT_DEFAULT_GWP: f64 = 1500.0;

const SCOPE3_TABLE: &[FallbackFactor] = &[
    // business travel, per passenger-km
    activity("flight-domestic", "passenger-km", 0.255),
    activity("flight-short", "passenger-km", 0.156),
    activity("flight-long", "passenger-km", 0.195),
    activity("flight-first-class", "passenger-km", 0.585),
    activity("train", "passenger-km", 0.041),
    activity("train-high-speed", "passenger-km", 0.006),
    activity("car-rental", "passenger-km", 0.171),
    activity("car-taxi", "passenger-km", 0.210),
    activity("bus", "passenger-km", 0.089),
    activity("hotel-night", "nights", 20.6),
    // commuting
    activity("car-petrol", "passenger-km", 0.171),
    activity("car-diesel", "passenger-km", 0.168),
    activity("car-hybrid", "passenger-km", 0.120),
    activity("car-electric", "passenger-km", 0.053),
    activity("motorcycle", "passenger-km", 0.114),
    activity("public-transit", "passenger-km", 0.089),
    activity("bicycle", "passenger-km", 0.0),
    activity("walking", "passenger-km", 0.0),
    activity("work-from-home", "days", 0.8),
    // waste, per kg
    activity("landfill-mixed", "kg", 0.467),
    activity("landfill-organic", "kg", 0.623),
    activity("incineration", "kg", 0.989),
    activity("recycling-paper", "kg", -0.139),
    activity("recycling-plastic", "kg", -0.573),
    activity("recycling-metal", "kg", -1.467),
    activity("recycling-glass", "kg", -0.314),
    activity("composting", "kg", 0.010),
    activity("anaerobic-digestion", "kg", -0.116),
    // freight, per tonne-km
    activity("truck_freight", "tonne-km", 0.089),
    activity("rail_freight", "tonne-km", 0.022),
    activity("ship_freight", "tonne-km", 0.012),
    activity("air_freight", "tonne-km", 0.602),
    activity("transportation_distribution", "tonne-km", 0.089),
    activity("downstream_transport", "tonne-km", 0.089),
    // fuel- and energy-related activities, per kWh
    activity("transmission_distribution", "kwh", 0.05),
    activity("fuel_wtt", "kwh", 0.04),
    activity("use_sold_products", "kwh", 0.45),
    activity("end_of_life_treatment", "kg", 0.35),
    activity("leased_assets", "m2", 12.0),
    // spend-based (EEIO), per currency unit
    spend("electronics", 0.35),
    spend("office-supplies", 0.18),
    spend("professional-services", 0.12),
    spend("software", 0.05),
    spend("cloud-services", 0.08),
    spend("furniture", 0.25),
    spend("food-catering", 0.55),
    spend("marketing", 0.15),
    spend("construction", 0.42),
    spend("manufacturing-avg", 0.45),
    spend("general-goods", 0.30),
    spend("processing_sold_products", 0.50),
    spend("franchises", 0.80),
    spend("investments", 0.70),
];

fn normalize_key(category: &str) -> String {
    category.trim().to_ascii_lowercase()
}

/// Scope 1 combustion fallback for a fuel category, optionally with the
/// CH4/N2O uplift added. Refrigerant categories (`r-…`) resolve to their GWP
/// per kg leaked.
#[must_use]
pub fn scope1_fallback(category: &str, include_ch4_n2o: bool) -> Option<FallbackFactor> {
    let key = normalize_key(category);
    if key.starts_with("r-") {
        let gwp = REFRIGERANT_GWP
            .iter()
            .find(|(name, _)| *name == key)
            .map_or(REFRIGERANT_DEFAULT_GWP, |(_, gwp)| *gwp);
        return Some(activity("refrigerant", "kg", gwp));
    }
    let mut factor = *SCOPE1_FUELS.iter().find(|f| f.key == key)?;
    if include_ch4_n2o {
        if let Some((_, uplift)) = SCOPE1_CH4_N2O_UPLIFT.iter().find(|(name, _)| *name == key) {
            factor.kg_co2e_per_unit += uplift;
        }
    }
    Some(factor)
}

/// Scope 3 fallback for a category key.
#[must_use]
pub fn scope3_fallback(category: &str) -> Option<FallbackFactor> {
    let key = normalize_key(category);
    SCOPE3_TABLE.iter().find(|f| f.key == key).copied()
}

fn grid(region: &str, value: f64, source: &str) -> EmissionFactor {
    EmissionFactor::new(Scope::Scope2, "electricity", "kwh", region, value)
        .with_id(format!("grid-{}", region.to_ascii_lowercase()))
        .with_source(source)
        .with_method(Methodology::LocationBased)
}

fn fuel(category: &str, unit: &str, value: f64) -> EmissionFactor {
    EmissionFactor::new(Scope::Scope1, category, unit, GLOBAL_REGION, value)
        .with_id(format!("fuel-{category}"))
        .with_source("EPA GHG Emission Factors Hub")
        .with_method(Methodology::ActivityBased)
}

/// Factors registered by `preload_defaults`.
#[must_use]
pub fn seed_factors() -> Vec<EmissionFactor> {
    vec![
        grid(GLOBAL_REGION, DEFAULT_GRID_FACTOR_KG_PER_KWH, "IEA global average"),
        grid("US", 0.386, "EPA eGRID"),
        grid("US-WEST", 0.298, "EPA eGRID"),
        grid("US-EAST", 0.388, "EPA eGRID"),
        grid("US-TEXAS", 0.395, "EPA eGRID"),
        grid("US-MIDWEST", 0.452, "EPA eGRID"),
        grid("EU", 0.276, "EEA"),
        grid("EU-CENTRAL", 0.350, "EEA"),
        grid("EU-NORTH", 0.150, "EEA"),
        grid("EU-WEST", 0.185, "EEA"),
        grid("EU-SOUTH", 0.295, "EEA"),
        grid("UK", 0.193, "DEFRA"),
        grid("DE", 0.366, "UBA"),
        grid("FR", 0.056, "RTE"),
        grid("IN", 0.708, "CEA"),
        grid("CN", 0.681, "MEE"),
        grid("ASIA", 0.550, "IEA"),
        grid("ASIA-JAPAN", 0.470, "IEA"),
        grid("ASIA-AUSTRALIA", 0.656, "IEA"),
        grid("CANADA", 0.130, "ECCC"),
        grid("LATAM-BRAZIL", 0.075, "ONS"),
        fuel("diesel", "L", 2.68),
        fuel("gasoline", "L", 2.31),
        fuel("fuel_oil_2", "L", 2.96),
        fuel("fuel_oil_6", "L", 3.25),
        fuel("natural_gas", "m3", 1.93),
        fuel("propane", "L", 1.51),
    ]
}
