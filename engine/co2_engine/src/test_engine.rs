use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use crate::documents::ProjectDocument;
use crate::invariants::{
    assert_all_project_invariants, assert_trail_monotonic, assert_trail_ordered, count_kind,
};
use crate::types::NewActivity;
use crate::{
    Activity, ActivityKind, ActivityStore, CertificationError, CertificationStatus,
    CommitPayload, Declaration, EngineConfig, HashLedger, InMemoryActivityStore,
    InMemoryProjectRepository, LedgerClient, LedgerError, LifecycleStatus, ManualClock,
    NewProject, ProjectRepository, ProjectType, WorkflowEngine,
};

const EPS: f64 = 1e-9;

/// Fails the first `failures` submissions, then behaves like [`HashLedger`].
struct FlakyLedger {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl LedgerClient for FlakyLedger {
    async fn submit(&self, payload: &CommitPayload) -> Result<String, LedgerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(LedgerError::Transport("ledger node unreachable".into()));
        }
        HashLedger.submit(payload).await
    }
}

/// Refuses the first append of `kind`, then stores everything.
struct DiskFullOnce {
    kind: ActivityKind,
    tripped: AtomicUsize,
    inner: InMemoryActivityStore,
}

impl DiskFullOnce {
    fn on(kind: ActivityKind) -> Self {
        DiskFullOnce {
            kind,
            tripped: AtomicUsize::new(0),
            inner: InMemoryActivityStore::new(),
        }
    }
}

#[async_trait]
impl ActivityStore for DiskFullOnce {
    async fn append(&self, entry: NewActivity) -> crate::Result<Activity> {
        if entry.kind == self.kind && self.tripped.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(CertificationError::Storage("disk full".into()));
        }
        self.inner.append(entry).await
    }

    async fn list(&self, project_id: u64) -> crate::Result<Vec<Activity>> {
        self.inner.list(project_id).await
    }
}

fn setup_with(
    repository: Arc<dyn ProjectRepository>,
    activities: Arc<dyn ActivityStore>,
    ledger: Arc<dyn LedgerClient>,
) -> WorkflowEngine {
    let start = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();
    WorkflowEngine::new(
        repository,
        activities,
        ledger,
        Arc::new(ManualClock::with_tick(start, Duration::seconds(1))),
        EngineConfig::default(),
    )
}

fn setup_with_ledger(ledger: Arc<dyn LedgerClient>) -> WorkflowEngine {
    setup_with(
        Arc::new(InMemoryProjectRepository::new()),
        Arc::new(InMemoryActivityStore::new()),
        ledger,
    )
}

fn setup_with_store(activities: Arc<dyn ActivityStore>) -> WorkflowEngine {
    setup_with(
        Arc::new(InMemoryProjectRepository::new()),
        activities,
        Arc::new(HashLedger),
    )
}

fn setup() -> WorkflowEngine {
    setup_with_ledger(Arc::new(HashLedger))
}

fn organic_farm() -> NewProject {
    NewProject {
        owner_id: "hof-berger".into(),
        project_type: ProjectType::CarbonFarming,
        declaration: Declaration {
            magnitude: 25.5,
            sub_method: Some("organic".into()),
            duration_years: 5,
            investment_capacity: Some(120_000.0),
        },
        documents: vec![ProjectDocument::LandRegistry {
            parcel_id: "AT-3100-0815".into(),
            area_ha: 25.5,
        }],
    }
}

fn solar_park() -> NewProject {
    NewProject {
        owner_id: "sunfield".into(),
        project_type: ProjectType::RenewableEnergy,
        declaration: Declaration {
            magnitude: 100.0,
            sub_method: Some("solar".into()),
            duration_years: 3,
            investment_capacity: None,
        },
        documents: vec![ProjectDocument::EnergyMeter {
            meter_id: "MTR-77".into(),
            capacity_kw: 100.0,
        }],
    }
}

#[tokio::test]
async fn test_create_project_quantifies_and_logs() {
    let engine = setup();
    let project = engine.create_project(organic_farm()).await.unwrap();

    assert_eq!(project.id, 1);
    assert_eq!(project.certification_status, CertificationStatus::Pending);
    assert_eq!(project.lifecycle_status(), LifecycleStatus::UnderReview);
    assert!((project.co2.base_co2 - 45.90).abs() < EPS);
    assert!((project.co2.total_project_value - 213.6645).abs() < EPS);
    assert_all_project_invariants(&project);

    let trail = engine.activities(project.id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].kind, ActivityKind::Created);
    assert_eq!(trail[0].actor, "hof-berger");
}

#[tokio::test]
async fn test_create_project_rejects_invalid_input() {
    let engine = setup();

    let mut zero_area = organic_farm();
    zero_area.declaration.magnitude = 0.0;
    let mut bad_doc = organic_farm();
    bad_doc.documents = vec![ProjectDocument::ForestInventory {
        inventory_id: "INV-1".into(),
        tree_count: 0,
    }];
    let mut no_owner = organic_farm();
    no_owner.owner_id = "  ".into();

    for input in [zero_area, bad_doc, no_owner] {
        let err = engine.create_project(input).await.unwrap_err();
        assert!(matches!(err, CertificationError::Validation(_)), "{err}");
    }
    assert!(engine.list_projects(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_solar_project_totals() {
    let engine = setup();
    let project = engine.create_project(solar_park()).await.unwrap();
    assert!((project.co2.annual_energy_kwh.unwrap() - 157_680.0).abs() < EPS);
    assert!((project.co2.base_co2 - 83.5704).abs() < EPS);
    assert!((project.co2.gross_total_co2 - 250.7112).abs() < EPS);
    assert_all_project_invariants(&project);
}

#[tokio::test]
async fn test_update_declaration_recomputes_while_pending() {
    let engine = setup();
    let project = engine.create_project(organic_farm()).await.unwrap();

    let updated = engine
        .update_declaration(
            project.id,
            "hof-berger",
            Declaration {
                magnitude: 30.0,
                sub_method: Some("agroforestry".into()),
                duration_years: 10,
                investment_capacity: None,
            },
        )
        .await
        .unwrap();
    assert!((updated.co2.base_co2 - 75.0).abs() < EPS);
    assert_eq!(updated.created_at, project.created_at);
    assert_all_project_invariants(&updated);

    let stored = engine.get_project(project.id).await.unwrap();
    assert_eq!(stored, updated);
    let trail = engine.activities(project.id).await.unwrap();
    assert_eq!(count_kind(&trail, ActivityKind::DeclarationUpdated), 1);
}

#[tokio::test]
async fn test_update_declaration_refused_after_review() {
    let engine = setup();
    let project = engine.create_project(organic_farm()).await.unwrap();
    engine.approve(project.id, "reviewer", "ok").await.unwrap();

    let err = engine
        .update_declaration(project.id, "hof-berger", organic_farm().declaration)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CertificationError::InvalidTransition {
            from: CertificationStatus::Approved,
            event: "update_declaration",
        }
    );
}

#[tokio::test]
async fn test_update_declaration_validation_keeps_old_values() {
    let engine = setup();
    let project = engine.create_project(organic_farm()).await.unwrap();
    let mut bad = organic_farm().declaration;
    bad.duration_years = 0;

    let err = engine
        .update_declaration(project.id, "hof-berger", bad)
        .await
        .unwrap_err();
    assert!(matches!(err, CertificationError::Validation(_)));
    assert_eq!(engine.get_project(project.id).await.unwrap(), project);
    assert_eq!(engine.activities(project.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_approve_records_on_ledger() {
    let engine = setup();
    let project = engine.create_project(organic_farm()).await.unwrap();

    let approved = engine
        .approve(project.id, "reviewer", "soil samples consistent")
        .await
        .unwrap();
    assert_eq!(approved.certification_status, CertificationStatus::Approved);
    assert_eq!(approved.lifecycle_status(), LifecycleStatus::Recorded);
    let recording = approved.recording.clone().unwrap();
    assert!(recording.commit_id.starts_with("sha256:"));
    assert_eq!(recording.project_id, project.id);
    assert_all_project_invariants(&approved);

    let trail = engine.activities(project.id).await.unwrap();
    let kinds: Vec<_> = trail.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ActivityKind::Created,
            ActivityKind::Approved,
            ActivityKind::Recorded
        ]
    );
    assert_eq!(trail[1].description, "soil samples consistent");
    assert_trail_ordered(project.id, &trail);

    assert_eq!(engine.get_project(project.id).await.unwrap(), approved);
}

#[tokio::test]
async fn test_commit_twice_yields_one_recording() {
    let engine = setup();
    let project = engine.create_project(solar_park()).await.unwrap();
    let approved = engine.approve(project.id, "reviewer", "").await.unwrap();

    let first = engine.commit(project.id).await.unwrap();
    let second = engine.commit(project.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(Some(first), approved.recording);

    let trail = engine.activities(project.id).await.unwrap();
    assert_eq!(count_kind(&trail, ActivityKind::Recorded), 1);
}

#[tokio::test]
async fn test_commit_requires_approval() {
    let engine = setup();
    let project = engine.create_project(organic_farm()).await.unwrap();
    let err = engine.commit(project.id).await.unwrap_err();
    assert_eq!(
        err,
        CertificationError::CertificationNotApproved {
            status: CertificationStatus::Pending
        }
    );

    engine.reject(project.id, "reviewer", "no tenure").await.unwrap();
    let err = engine.commit(project.id).await.unwrap_err();
    assert_eq!(
        err,
        CertificationError::CertificationNotApproved {
            status: CertificationStatus::Rejected
        }
    );
    assert!(engine.get_project(project.id).await.unwrap().recording.is_none());
}

#[tokio::test]
async fn test_reject_after_approve_has_no_side_effect() {
    let engine = setup();
    let project = engine.create_project(organic_farm()).await.unwrap();
    engine.approve(project.id, "reviewer", "ok").await.unwrap();
    let before = engine.activities(project.id).await.unwrap().len();

    let err = engine
        .reject(project.id, "reviewer", "changed my mind")
        .await
        .unwrap_err();
    assert!(matches!(err, CertificationError::InvalidTransition { .. }));

    let stored = engine.get_project(project.id).await.unwrap();
    assert_eq!(stored.certification_status, CertificationStatus::Approved);
    assert_eq!(engine.activities(project.id).await.unwrap().len(), before);
}

#[tokio::test]
async fn test_rejected_is_terminal() {
    let engine = setup();
    let project = engine.create_project(organic_farm()).await.unwrap();
    let rejected = engine
        .reject(project.id, "reviewer", "parcel overlaps protected area")
        .await
        .unwrap();
    assert_eq!(rejected.lifecycle_status(), LifecycleStatus::Rejected);

    let before = engine.activities(project.id).await.unwrap().len();
    assert!(engine.approve(project.id, "reviewer", "").await.is_err());
    assert!(engine.reject(project.id, "reviewer", "").await.is_err());
    assert!(engine.certify(project.id, "inspector", "EU-9").await.is_err());
    let after = engine.activities(project.id).await.unwrap().len();
    assert_eq!(before, after);
    assert_all_project_invariants(&engine.get_project(project.id).await.unwrap());
}

#[tokio::test]
async fn test_certify_flow() {
    let engine = setup();
    let project = engine.create_project(solar_park()).await.unwrap();

    // Certify straight from pending is illegal.
    let err = engine
        .certify(project.id, "inspector", "EUFD-2025-001")
        .await
        .unwrap_err();
    assert!(matches!(err, CertificationError::InvalidTransition { .. }));

    engine.approve(project.id, "reviewer", "ok").await.unwrap();

    let err = engine.certify(project.id, "inspector", "").await.unwrap_err();
    assert!(matches!(err, CertificationError::Validation(_)));
    assert_eq!(
        engine.get_project(project.id).await.unwrap().certification_status,
        CertificationStatus::Approved
    );

    let certified = engine
        .certify(project.id, "inspector", "EUFD-2025-001")
        .await
        .unwrap();
    assert_eq!(certified.certification_status, CertificationStatus::Certified);
    assert_eq!(certified.certificate.as_ref().unwrap().number, "EUFD-2025-001");
    assert!(certified.recording.is_some());
    assert_all_project_invariants(&certified);

    for result in [
        engine.approve(project.id, "reviewer", "").await,
        engine.reject(project.id, "reviewer", "").await,
        engine.certify(project.id, "inspector", "EUFD-2025-002").await,
    ] {
        assert!(matches!(
            result,
            Err(CertificationError::InvalidTransition {
                from: CertificationStatus::Certified,
                ..
            })
        ));
    }
}

#[tokio::test]
async fn test_failed_commit_is_retryable() {
    let ledger = Arc::new(FlakyLedger {
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let engine = setup_with_ledger(ledger.clone());
    let project = engine.create_project(organic_farm()).await.unwrap();

    let err = engine.approve(project.id, "reviewer", "ok").await.unwrap_err();
    assert!(err.is_retryable());

    let stored = engine.get_project(project.id).await.unwrap();
    assert_eq!(stored.certification_status, CertificationStatus::Approved);
    assert_eq!(stored.lifecycle_status(), LifecycleStatus::Approved);
    assert!(stored.recording.is_none());
    assert_eq!(engine.projects_awaiting_recording().await.unwrap().len(), 1);

    assert!(engine.commit(project.id).await.unwrap_err().is_retryable());
    let recording = engine.commit(project.id).await.unwrap();
    assert_eq!(ledger.calls.load(Ordering::SeqCst), 3);

    let stored = engine.get_project(project.id).await.unwrap();
    assert_eq!(stored.recording, Some(recording));
    assert!(engine.projects_awaiting_recording().await.unwrap().is_empty());

    let trail = engine.activities(project.id).await.unwrap();
    assert_eq!(count_kind(&trail, ActivityKind::Approved), 1);
    assert_eq!(count_kind(&trail, ActivityKind::Recorded), 1);
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let engine = setup();
    let missing = 404;
    let expected = CertificationError::NotFound(missing);

    assert_eq!(engine.get_project(missing).await.unwrap_err(), expected);
    assert_eq!(engine.recalculate(missing).await.unwrap_err(), expected);
    assert_eq!(engine.approve(missing, "r", "").await.unwrap_err(), expected);
    assert_eq!(engine.reject(missing, "r", "").await.unwrap_err(), expected);
    assert_eq!(engine.certify(missing, "r", "C-1").await.unwrap_err(), expected);
    assert_eq!(engine.commit(missing).await.unwrap_err(), expected);
    assert_eq!(engine.activities(missing).await.unwrap_err(), expected);
    assert_eq!(
        engine
            .update_declaration(missing, "r", organic_farm().declaration)
            .await
            .unwrap_err(),
        expected
    );
}

#[tokio::test]
async fn test_recalculate_matches_stored_result() {
    let engine = setup();
    let project = engine.create_project(solar_park()).await.unwrap();
    let co2 = engine.recalculate(project.id).await.unwrap();
    assert_eq!(co2, project.co2);
}

#[tokio::test]
async fn test_list_projects_by_owner() {
    let engine = setup();
    engine.create_project(organic_farm()).await.unwrap();
    engine.create_project(solar_park()).await.unwrap();
    engine.create_project(organic_farm()).await.unwrap();

    let all = engine.list_projects(None).await.unwrap();
    assert_eq!(all.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2, 3]);

    let farm = engine.list_projects(Some("hof-berger")).await.unwrap();
    assert_eq!(farm.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 3]);
    assert!(engine.list_projects(Some("nobody")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recent_activities_newest_first() {
    let engine = setup();
    let project = engine.create_project(organic_farm()).await.unwrap();
    let mut lengths = vec![engine.activities(project.id).await.unwrap().len()];
    engine.approve(project.id, "reviewer", "ok").await.unwrap();
    lengths.push(engine.activities(project.id).await.unwrap().len());
    engine.certify(project.id, "inspector", "C-77").await.unwrap();
    lengths.push(engine.activities(project.id).await.unwrap().len());
    for pair in lengths.windows(2) {
        assert_trail_monotonic(pair[0], pair[1]);
    }

    let recent = engine.recent_activities(project.id).await.unwrap();
    let kinds: Vec<_> = recent.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ActivityKind::Certified,
            ActivityKind::Recorded,
            ActivityKind::Approved,
            ActivityKind::Created
        ]
    );
}

#[tokio::test]
async fn test_oversized_declaration_is_rejected() {
    let engine = setup();
    let mut huge = organic_farm();
    huge.project_type = ProjectType::Forestation;
    huge.declaration.magnitude = 1e308;
    let err = engine.create_project(huge).await.unwrap_err();
    assert!(matches!(err, CertificationError::Validation(_)));
    assert!(engine.list_projects(None).await.unwrap().is_empty());

    let project = engine.create_project(organic_farm()).await.unwrap();
    let mut declaration = organic_farm().declaration;
    declaration.magnitude = f64::MAX;
    assert!(matches!(
        engine.update_declaration(project.id, "owner", declaration).await,
        Err(CertificationError::Validation(_))
    ));
    assert_eq!(engine.get_project(project.id).await.unwrap(), project);
}

#[tokio::test]
async fn test_lost_recorded_activity_is_repaired_by_commit() {
    let engine = setup_with_store(Arc::new(DiskFullOnce::on(ActivityKind::Recorded)));
    let project = engine.create_project(organic_farm()).await.unwrap();

    let err = engine.approve(project.id, "reviewer", "ok").await.unwrap_err();
    assert_eq!(err, CertificationError::Storage("disk full".into()));
    let stored = engine.get_project(project.id).await.unwrap();
    let recording = stored.recording.clone().unwrap();
    assert_eq!(stored.unlogged_activities.len(), 1);

    assert_eq!(engine.commit(project.id).await.unwrap(), recording);
    assert_eq!(engine.commit(project.id).await.unwrap(), recording);

    let trail = engine.activities(project.id).await.unwrap();
    let kinds: Vec<_> = trail.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ActivityKind::Created,
            ActivityKind::Approved,
            ActivityKind::Recorded
        ]
    );
    assert!(engine
        .get_project(project.id)
        .await
        .unwrap()
        .unlogged_activities
        .is_empty());
}

#[tokio::test]
async fn test_lost_transition_activity_is_repaired() {
    let engine = setup_with_store(Arc::new(DiskFullOnce::on(ActivityKind::Approved)));
    let project = engine.create_project(organic_farm()).await.unwrap();

    let err = engine.approve(project.id, "reviewer", "soil verified").await.unwrap_err();
    assert!(matches!(err, CertificationError::Storage(_)));
    let stored = engine.get_project(project.id).await.unwrap();
    assert_eq!(stored.certification_status, CertificationStatus::Approved);
    assert!(stored.recording.is_none());

    // the retry path of the recording worker
    assert_eq!(engine.flush_unlogged_activities().await.unwrap(), 1);
    assert_eq!(engine.flush_unlogged_activities().await.unwrap(), 0);
    engine.commit(project.id).await.unwrap();

    let trail = engine.activities(project.id).await.unwrap();
    assert_eq!(count_kind(&trail, ActivityKind::Approved), 1);
    assert_eq!(count_kind(&trail, ActivityKind::Recorded), 1);
    let approved = trail
        .iter()
        .find(|a| a.kind == ActivityKind::Approved)
        .unwrap();
    assert_eq!(approved.actor, "reviewer");
    assert_eq!(approved.timestamp, stored.approved_at.unwrap());
    assert_trail_ordered(project.id, &trail);
}

#[tokio::test]
async fn test_recalculate_keeps_reviewed_quantity() {
    let repository = Arc::new(InMemoryProjectRepository::new());
    let engine = setup_with(
        repository.clone(),
        Arc::new(InMemoryActivityStore::new()),
        Arc::new(HashLedger),
    );
    let pending = engine.create_project(solar_park()).await.unwrap();
    let approved = engine.create_project(organic_farm()).await.unwrap();
    let approved = engine.approve(approved.id, "reviewer", "ok").await.unwrap();

    // stale figures, as if the factor tables had changed since
    for project in [&pending, &approved] {
        let mut stale = project.clone();
        stale.co2.base_co2 += 1.0;
        repository.save(&stale).await.unwrap();
    }

    let fresh = engine.recalculate(pending.id).await.unwrap();
    assert_eq!(fresh, pending.co2);
    assert_eq!(engine.get_project(pending.id).await.unwrap().co2, pending.co2);

    let fresh = engine.recalculate(approved.id).await.unwrap();
    assert_eq!(fresh, approved.co2);
    let stored = engine.get_project(approved.id).await.unwrap();
    assert!((stored.co2.base_co2 - (approved.co2.base_co2 + 1.0)).abs() < EPS);
}
