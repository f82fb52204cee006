//! Supporting documents attached to a project at submission.
//!
//! Each category carries its own typed metadata and is validated when the
//! project is created; file contents themselves live elsewhere.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{CertificationError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum ProjectDocument {
    /// Cadastral extract proving land tenure.
    LandRegistry { parcel_id: String, area_ha: f64 },
    /// Laboratory soil sample report.
    SoilAnalysis {
        lab: String,
        sampled_on: NaiveDate,
        organic_carbon_pct: f64,
    },
    /// Meter certificate for a generation installation.
    EnergyMeter { meter_id: String, capacity_kw: f64 },
    /// Stand inventory for forestation projects.
    ForestInventory { inventory_id: String, tree_count: u64 },
    /// Site photograph.
    Photo { caption: String, uri: String },
}

impl ProjectDocument {
    pub fn category(&self) -> &'static str {
        match self {
            Self::LandRegistry { .. } => "land_registry",
            Self::SoilAnalysis { .. } => "soil_analysis",
            Self::EnergyMeter { .. } => "energy_meter",
            Self::ForestInventory { .. } => "forest_inventory",
            Self::Photo { .. } => "photo",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::LandRegistry { parcel_id, area_ha } => {
                require_text(self, "parcel_id", parcel_id)?;
                require_positive(self, "area_ha", *area_ha)
            }
            Self::SoilAnalysis {
                lab,
                organic_carbon_pct,
                ..
            } => {
                require_text(self, "lab", lab)?;
                if !organic_carbon_pct.is_finite() || !(0.0..=100.0).contains(organic_carbon_pct)
                {
                    return Err(invalid(self, "organic_carbon_pct must be within 0..=100"));
                }
                Ok(())
            }
            Self::EnergyMeter {
                meter_id,
                capacity_kw,
            } => {
                require_text(self, "meter_id", meter_id)?;
                require_positive(self, "capacity_kw", *capacity_kw)
            }
            Self::ForestInventory {
                inventory_id,
                tree_count,
            } => {
                require_text(self, "inventory_id", inventory_id)?;
                if *tree_count == 0 {
                    return Err(invalid(self, "tree_count must be positive"));
                }
                Ok(())
            }
            Self::Photo { uri, .. } => require_text(self, "uri", uri),
        }
    }
}

/// Validate a batch in order, failing on the first bad document.
pub fn validate_all(documents: &[ProjectDocument]) -> Result<()> {
    documents.iter().try_for_each(ProjectDocument::validate)
}

fn invalid(doc: &ProjectDocument, reason: &str) -> CertificationError {
    CertificationError::Validation(format!("{} document: {reason}", doc.category()))
}

fn require_text(doc: &ProjectDocument, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(doc, &format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_positive(doc: &ProjectDocument, field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(doc, &format!("{field} must be positive")));
    }
    Ok(())
}
