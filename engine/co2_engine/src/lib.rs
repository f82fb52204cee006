//! # CO₂ Certification Engine
//!
//! Quantifies agricultural, forestation and renewable-energy projects under
//! the EUFD2025-001 methodology and drives each one through certification:
//!
//! | Phase          | Entry point(s)                                       |
//! |----------------|------------------------------------------------------|
//! | Submission     | [`WorkflowEngine::create_project`], `update_declaration` |
//! | Quantification | [`calculator::quantify`], `WorkflowEngine::recalculate` |
//! | Review         | `approve`, `reject`                                  |
//! | Recording      | `commit` (also triggered by `approve`)               |
//! | Issuance       | `certify`                                            |
//! | Queries        | `get_project`, `list_projects`, `activities`         |
//!
//! ## Architecture
//!
//! Numeric factors live in [`methodology`]; [`calculator`] is pure.
//! [`state_machine`] decides transitions, [`recorder`] performs the one-time
//! ledger commit, [`audit`] keeps the append-only trail. Persistence, the
//! ledger and time are injected through [`storage`], [`ledger`] and
//! [`clock`]. [`engine`] wires them together and serializes work per project.

pub mod audit;
pub mod calculator;
pub mod clock;
pub mod documents;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod methodology;
pub mod recorder;
pub mod state_machine;
pub mod storage;
pub mod types;

#[cfg(test)]
mod test_concurrency;
#[cfg(test)]
mod test_engine;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineConfig, WorkflowEngine};
pub use errors::{CertificationError, LedgerError, Result};
pub use ledger::{CommitPayload, HashLedger, LedgerClient};
pub use storage::{
    ActivityStore, InMemoryActivityStore, InMemoryProjectRepository, ProjectRepository,
};
pub use types::{
    Activity, ActivityKind, CertificationStatus, Co2Result, Declaration, LifecycleStatus,
    NewProject, Project, ProjectType, Recording,
};
