//! CO₂ quantification.
//!
//! Pure and deterministic: no I/O, no clock, no shared state. Safe to call
//! from any number of tasks at once, including on every declaration edit.

use crate::errors::{CertificationError, Result};
use crate::methodology::{
    self, GUARANTEE_FUND_SHARE, HOURS_PER_YEAR, NET_AVAILABLE_SHARE, SAFETY_FACTOR,
};
use crate::types::{Co2Result, Declaration, Project, ProjectType};

/// Quantify a declaration for the given sector.
///
/// Fails on non-positive or non-finite magnitudes, zero duration, and
/// declarations large enough to overflow any derived quantity; unknown
/// sub-methods fall back to the sector default and set `used_default_factor`.
pub fn quantify(project_type: ProjectType, declaration: &Declaration) -> Result<Co2Result> {
    validate(project_type, declaration)?;

    let lookup = methodology::lookup(project_type, declaration.sub_method.as_deref());
    let magnitude = declaration.magnitude;

    let (base_co2, annual_energy_kwh) = match project_type {
        ProjectType::CarbonFarming | ProjectType::Forestation => (magnitude * lookup.factor, None),
        ProjectType::RenewableEnergy => {
            let emission_factor = lookup
                .emission_factor
                .unwrap_or(methodology::DEFAULT_GRID_EMISSION_FACTOR);
            let annual_energy = magnitude * lookup.factor * HOURS_PER_YEAR;
            (annual_energy * emission_factor / 1000.0, Some(annual_energy))
        }
    };

    let result = apply_deductions(
        base_co2,
        declaration.duration_years,
        lookup.factor,
        lookup.used_default,
        annual_energy_kwh,
        lookup.emission_factor,
    );
    ensure_finite(project_type, &result)?;
    Ok(result)
}

/// Convenience wrapper over [`quantify`] for a stored project.
pub fn quantify_project(project: &Project) -> Result<Co2Result> {
    quantify(project.project_type, &project.declaration)
}

/// Reject inputs before any arithmetic.
pub fn validate(project_type: ProjectType, declaration: &Declaration) -> Result<()> {
    let magnitude = declaration.magnitude;
    if !magnitude.is_finite() || magnitude <= 0.0 {
        return Err(CertificationError::Validation(format!(
            "{} must be a positive number of {}, got {magnitude}",
            magnitude_label(project_type),
            project_type.magnitude_unit(),
        )));
    }
    if declaration.duration_years == 0 {
        return Err(CertificationError::Validation(
            "duration must be at least one year".to_string(),
        ));
    }
    if let Some(investment) = declaration.investment_capacity {
        if !investment.is_finite() || investment < 0.0 {
            return Err(CertificationError::Validation(format!(
                "investment capacity must be a non-negative number, got {investment}"
            )));
        }
    }
    Ok(())
}

/// Mandatory downstream reductions, identical for every sector.
fn apply_deductions(
    base_co2: f64,
    duration_years: u32,
    factor: f64,
    used_default_factor: bool,
    annual_energy_kwh: Option<f64>,
    emission_factor: Option<f64>,
) -> Co2Result {
    let duration = f64::from(duration_years);
    let safety_adjusted_co2 = base_co2 * SAFETY_FACTOR;
    let net_available_co2 = safety_adjusted_co2 * NET_AVAILABLE_SHARE;

    Co2Result {
        base_co2,
        safety_adjusted_co2,
        guarantee_fund_co2: safety_adjusted_co2 * GUARANTEE_FUND_SHARE,
        net_available_co2,
        total_project_value: net_available_co2 * duration,
        gross_total_co2: base_co2 * duration,
        factor,
        used_default_factor,
        annual_energy_kwh,
        emission_factor,
    }
}

/// Every stored quantity must survive a JSON round trip.
fn ensure_finite(project_type: ProjectType, result: &Co2Result) -> Result<()> {
    let quantities = [
        result.base_co2,
        result.safety_adjusted_co2,
        result.guarantee_fund_co2,
        result.net_available_co2,
        result.total_project_value,
        result.gross_total_co2,
        result.annual_energy_kwh.unwrap_or(0.0),
    ];
    if quantities.iter().all(|q| q.is_finite()) {
        return Ok(());
    }
    Err(CertificationError::Validation(format!(
        "{} is too large to quantify",
        magnitude_label(project_type)
    )))
}

fn magnitude_label(project_type: ProjectType) -> &'static str {
    match project_type {
        ProjectType::CarbonFarming | ProjectType::Forestation => "area",
        ProjectType::RenewableEnergy => "capacity",
    }
}
