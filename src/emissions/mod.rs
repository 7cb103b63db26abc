//! Emissions calculation: factor registry, unit normalization, per-scope
//! calculators and the dispatching engine.

pub mod calculator;
pub mod defaults;
pub mod engine;
pub mod model;
pub mod registry;
pub mod scope1;
pub mod scope2;
pub mod scope3;
pub mod units;

pub use calculator::{Calculator, CalculatorOptions};
pub use engine::{classify_scope, Engine};
pub use model::{
    kg_to_tonnes, Activity, ActivityFailure, BatchResult, DataQuality, EmissionFactor, EmissionRecord,
    Methodology, Scope,
};
pub use registry::{FactorRegistry, InMemoryFactorRegistry, RegistrySummary};
pub use scope1::Scope1Calculator;
pub use scope2::Scope2Calculator;
pub use scope3::{Scope3Calculator, Scope3Category};
