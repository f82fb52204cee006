//! # Types
//!
//! Shared data structures used across all modules of the engine.
//!
//! ## Immutable identity / mutable declaration split
//!
//! A [`Project`] carries three groups of fields:
//!
//! - identity (`id`, `owner_id`, `project_type`, `created_at`), fixed at creation;
//! - the [`Declaration`] submitted by the owner, editable while `pending`;
//! - derived state (`co2`, `certification_status`, `certificate`, `recording`)
//!   that only the calculator, the state machine and the recorder write.
//!
//! ## Certification status as a finite-state machine
//!
//! ```text
//! Pending ──► Approved ──► Certified
//!     └──► Rejected
//! ```
//!
//! `Certified` and `Rejected` are terminal. Transitions are enforced by
//! [`crate::state_machine`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::documents::ProjectDocument;

/// Sector a project belongs to; selects the quantification formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    CarbonFarming,
    Forestation,
    RenewableEnergy,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CarbonFarming => "carbon-farming",
            Self::Forestation => "forestation",
            Self::RenewableEnergy => "renewable-energy",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "carbon-farming" => Some(Self::CarbonFarming),
            "forestation" => Some(Self::Forestation),
            "renewable-energy" => Some(Self::RenewableEnergy),
            _ => None,
        }
    }

    /// Unit of the declared magnitude.
    pub fn magnitude_unit(&self) -> &'static str {
        match self {
            Self::CarbonFarming | Self::Forestation => "ha",
            Self::RenewableEnergy => "kW",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Certification lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationStatus {
    /// Submitted; awaiting a review decision.
    Pending,
    /// Reviewer approved; recording is attempted on entry.
    Approved,
    /// Certificate issued. Terminal.
    Certified,
    /// Reviewer rejected. Terminal, retained for audit.
    Rejected,
}

impl CertificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Certified => "certified",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "certified" => Some(Self::Certified),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Certified | Self::Rejected)
    }

    /// States in which a ledger recording may exist.
    pub fn allows_recording(&self) -> bool {
        matches!(self, Self::Approved | Self::Certified)
    }
}

impl fmt::Display for CertificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broader display status, derived from certification state and recording.
/// Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    UnderReview,
    Approved,
    Recorded,
    Certified,
    Rejected,
}

/// Owner-submitted project declaration. The only mutable input to the
/// calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    /// Area in hectares (carbon-farming, forestation) or capacity in kW
    /// (renewable-energy).
    pub magnitude: f64,
    /// Farming method, forest type or energy type. Unknown or missing values
    /// fall back to the sector default factor.
    #[serde(default)]
    pub sub_method: Option<String>,
    /// Project duration in whole years.
    pub duration_years: u32,
    /// Declared investment capacity, informational.
    #[serde(default)]
    pub investment_capacity: Option<f64>,
}

/// Output of [`crate::calculator::quantify`]. All quantities in t CO₂.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Co2Result {
    /// Raw yearly reduction or sequestration.
    pub base_co2: f64,
    /// `base_co2` after the 2% variability haircut.
    pub safety_adjusted_co2: f64,
    /// 5% of the safety-adjusted amount, held as permanence reserve.
    pub guarantee_fund_co2: f64,
    /// 95% of the safety-adjusted amount, issuable to the project per year.
    pub net_available_co2: f64,
    /// `net_available_co2 × duration`.
    pub total_project_value: f64,
    /// `base_co2 × duration`, before any deduction.
    pub gross_total_co2: f64,
    /// Sector factor applied (t CO₂/ha/yr, or capacity factor for energy).
    pub factor: f64,
    /// Set when the sub-method was missing or unrecognised.
    pub used_default_factor: bool,
    /// Yearly generation in kWh; renewable-energy only.
    pub annual_energy_kwh: Option<f64>,
    /// Grid emission factor in kg CO₂/kWh; renewable-energy only.
    pub emission_factor: Option<f64>,
}

/// Certificate stamped by the `certify` transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub number: String,
    pub issued_at: DateTime<Utc>,
}

/// One-time external ledger commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub project_id: u64,
    pub commit_id: String,
    pub committed_at: DateTime<Utc>,
}

/// Input to `create_project`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub owner_id: String,
    pub project_type: ProjectType,
    pub declaration: Declaration,
    #[serde(default)]
    pub documents: Vec<ProjectDocument>,
}

/// A certification subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier (auto-incremented by the repository).
    pub id: u64,
    pub owner_id: String,
    pub project_type: ProjectType,
    pub created_at: DateTime<Utc>,
    pub declaration: Declaration,
    /// Recomputed whenever `declaration` changes.
    pub co2: Co2Result,
    pub certification_status: CertificationStatus,
    /// Stamped by the `approve` transition.
    pub approved_at: Option<DateTime<Utc>>,
    pub certificate: Option<Certificate>,
    /// Set at most once.
    pub recording: Option<Recording>,
    pub documents: Vec<ProjectDocument>,
    /// Trail entries for state already saved on this project but not yet
    /// confirmed by the activity store. Drained by `AuditTrail::flush`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unlogged_activities: Vec<NewActivity>,
}

impl Project {
    pub fn lifecycle_status(&self) -> LifecycleStatus {
        match (self.certification_status, &self.recording) {
            (CertificationStatus::Pending, _) => LifecycleStatus::UnderReview,
            (CertificationStatus::Approved, None) => LifecycleStatus::Approved,
            (CertificationStatus::Approved, Some(_)) => LifecycleStatus::Recorded,
            (CertificationStatus::Certified, _) => LifecycleStatus::Certified,
            (CertificationStatus::Rejected, _) => LifecycleStatus::Rejected,
        }
    }

    /// Approved or certified but not yet committed to the ledger.
    pub fn awaiting_recording(&self) -> bool {
        self.recording.is_none() && self.certification_status.allows_recording()
    }
}

/// Kind of an audit-trail entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Created,
    DeclarationUpdated,
    Approved,
    Rejected,
    Certified,
    Recorded,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::DeclarationUpdated => "declaration_updated",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Certified => "certified",
            Self::Recorded => "recorded",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "declaration_updated" => Some(Self::DeclarationUpdated),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "certified" => Some(Self::Certified),
            "recorded" => Some(Self::Recorded),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An activity before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewActivity {
    pub project_id: u64,
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit-trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: u64,
    pub project_id: u64,
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

impl Activity {
    pub fn from_new(id: u64, entry: NewActivity) -> Self {
        Activity {
            id,
            project_id: entry.project_id,
            kind: entry.kind,
            title: entry.title,
            description: entry.description,
            actor: entry.actor,
            timestamp: entry.timestamp,
        }
    }
}
