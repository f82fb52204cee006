//! Certification state machine.
//!
//! ```text
//! ┌─────────┐ approve ┌──────────┐ certify ┌───────────┐
//! │ pending │────────►│ approved │────────►│ certified │
//! └────┬────┘         └──────────┘         └───────────┘
//!      │ reject       ┌──────────┐
//!      └─────────────►│ rejected │
//!                     └──────────┘
//! ```
//!
//! This module only decides and applies the status change on an in-memory
//! [`Project`]. Persisting it, appending the activity and invoking the
//! recorder after `approve` is the engine's job, done under the project's
//! lock so the decision and its side effects cannot interleave with another
//! caller.

use chrono::{DateTime, Utc};

use crate::errors::{CertificationError, Result};
use crate::types::{ActivityKind, Certificate, CertificationStatus, Project};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Approve { notes: String },
    Reject { notes: String },
    Certify { certificate_number: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Certify { .. } => "certify",
        }
    }

    fn validate(&self) -> Result<()> {
        if let Self::Certify { certificate_number } = self {
            if certificate_number.trim().is_empty() {
                return Err(CertificationError::Validation(
                    "certificate number is required".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of a successful [`apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: CertificationStatus,
    pub to: CertificationStatus,
    pub activity: ActivityKind,
    pub description: String,
    /// Whether the recorder must be invoked once the transition is persisted.
    pub triggers_recording: bool,
}

/// Target status for `event` from `from`, or `InvalidTransition`.
pub fn next_status(from: CertificationStatus, event: &Event) -> Result<CertificationStatus> {
    use CertificationStatus::*;

    match (from, event) {
        (Pending, Event::Approve { .. }) => Ok(Approved),
        (Pending, Event::Reject { .. }) => Ok(Rejected),
        (Approved, Event::Certify { .. }) => Ok(Certified),
        _ => Err(CertificationError::InvalidTransition {
            from,
            event: event.name(),
        }),
    }
}

/// Events accepted from `status`. Empty for terminal states.
pub fn allowed_events(status: CertificationStatus) -> &'static [&'static str] {
    match status {
        CertificationStatus::Pending => &["approve", "reject"],
        CertificationStatus::Approved => &["certify"],
        CertificationStatus::Certified | CertificationStatus::Rejected => &[],
    }
}

/// Validate `event` and apply it to `project`.
///
/// On error `project` is left untouched.
pub fn apply(project: &mut Project, event: Event, now: DateTime<Utc>) -> Result<Transition> {
    event.validate()?;
    let from = project.certification_status;
    let to = next_status(from, &event)?;

    let (activity, description, triggers_recording) = match event {
        Event::Approve { notes } => {
            project.approved_at = Some(now);
            (ActivityKind::Approved, notes, true)
        }
        Event::Reject { notes } => (ActivityKind::Rejected, notes, false),
        Event::Certify { certificate_number } => {
            let number = certificate_number.trim().to_string();
            project.certificate = Some(Certificate {
                number: number.clone(),
                issued_at: now,
            });
            (
                ActivityKind::Certified,
                format!("certificate {number}"),
                false,
            )
        }
    };
    project.certification_status = to;

    Ok(Transition {
        from,
        to,
        activity,
        description,
        triggers_recording,
    })
}
