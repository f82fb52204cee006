//! # EUFD2025-001 methodology tables
//!
//! Static `(project type, sub-method) → factor` lookups.
//!
//! | Sector           | Factor meaning                  | Default |
//! |------------------|---------------------------------|---------|
//! | carbon-farming   | t CO₂ / ha / year               | 1.5     |
//! | forestation      | t CO₂ / ha / year               | 4.0     |
//! | renewable-energy | capacity factor (0..1)          | 0.25    |
//!
//! Renewable energy additionally uses a grid emission factor of
//! 0.53 kg CO₂/kWh for every known energy type; an unknown type falls back to
//! the generic grid factor 0.40 together with the default capacity factor.
//!
//! Unknown sub-methods are never an error. The lookup reports
//! `used_default = true` so auditors can single those projects out.

use serde::Serialize;

use crate::types::ProjectType;

/// Hours in a non-leap year.
pub const HOURS_PER_YEAR: f64 = 8760.0;

/// National grid standard, kg CO₂ per kWh displaced.
pub const GRID_EMISSION_FACTOR: f64 = 0.53;
/// Emission factor applied when the energy type is not recognised.
pub const DEFAULT_GRID_EMISSION_FACTOR: f64 = 0.40;

pub const DEFAULT_FARMING_FACTOR: f64 = 1.5;
pub const DEFAULT_FOREST_FACTOR: f64 = 4.0;
pub const DEFAULT_CAPACITY_FACTOR: f64 = 0.25;

/// Fixed 2% measurement-variability haircut.
pub const SAFETY_FACTOR: f64 = 0.98;
/// Share of safety-adjusted CO₂ withheld as permanence reserve.
pub const GUARANTEE_FUND_SHARE: f64 = 0.05;
/// Share of safety-adjusted CO₂ issuable to the project.
pub const NET_AVAILABLE_SHARE: f64 = 0.95;

const FARMING_METHODS: &[(&str, f64)] = &[
    ("organic", 1.8),
    ("regenerative", 2.2),
    ("no_till", 1.2),
    ("cover_crops", 1.4),
    ("agroforestry", 2.5),
    ("rotational_grazing", 1.6),
    ("biochar", 3.0),
];

const FOREST_TYPES: &[(&str, f64)] = &[
    ("deciduous", 3.5),
    ("coniferous", 4.2),
    ("mixed", 4.0),
    ("tropical", 6.0),
    ("mangrove", 7.5),
    ("agroforest", 3.0),
];

const ENERGY_TYPES: &[(&str, f64)] = &[
    ("solar", 0.18),
    ("wind", 0.27),
    ("hydro", 0.45),
    ("biomass", 0.75),
    ("geothermal", 0.90),
    ("marine", 0.30),
    ("hydrogen", 0.70),
];

/// Result of a methodology lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MethodologyFactor {
    /// Sequestration factor, or capacity factor for renewable energy.
    pub factor: f64,
    /// kg CO₂/kWh; `Some` for renewable energy only.
    pub emission_factor: Option<f64>,
    pub used_default: bool,
}

/// Resolve the factor for `project_type` and an optional sub-method.
///
/// Sub-method matching ignores case, surrounding whitespace and treats `-` and
/// spaces as `_`, so `"No-Till"` and `"no till"` both resolve to `no_till`.
pub fn lookup(project_type: ProjectType, sub_method: Option<&str>) -> MethodologyFactor {
    let key = sub_method.map(normalize);
    let key = key.as_deref().filter(|k| !k.is_empty());

    match project_type {
        ProjectType::CarbonFarming => sector_factor(FARMING_METHODS, key, DEFAULT_FARMING_FACTOR),
        ProjectType::Forestation => sector_factor(FOREST_TYPES, key, DEFAULT_FOREST_FACTOR),
        ProjectType::RenewableEnergy => match key.and_then(|k| find(ENERGY_TYPES, k)) {
            Some(capacity_factor) => MethodologyFactor {
                factor: capacity_factor,
                emission_factor: Some(GRID_EMISSION_FACTOR),
                used_default: false,
            },
            None => MethodologyFactor {
                factor: DEFAULT_CAPACITY_FACTOR,
                emission_factor: Some(DEFAULT_GRID_EMISSION_FACTOR),
                used_default: true,
            },
        },
    }
}

/// Recognised sub-method names for a sector, in table order.
pub fn known_sub_methods(project_type: ProjectType) -> Vec<&'static str> {
    let table = match project_type {
        ProjectType::CarbonFarming => FARMING_METHODS,
        ProjectType::Forestation => FOREST_TYPES,
        ProjectType::RenewableEnergy => ENERGY_TYPES,
    };
    table.iter().map(|(name, _)| *name).collect()
}

fn sector_factor(table: &[(&str, f64)], key: Option<&str>, default: f64) -> MethodologyFactor {
    match key.and_then(|k| find(table, k)) {
        Some(factor) => MethodologyFactor {
            factor,
            emission_factor: None,
            used_default: false,
        },
        None => MethodologyFactor {
            factor: default,
            emission_factor: None,
            used_default: true,
        },
    }
}

fn find(table: &[(&str, f64)], key: &str) -> Option<f64> {
    table
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| *value)
}

fn normalize(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect()
}
