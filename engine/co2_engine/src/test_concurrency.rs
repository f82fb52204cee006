use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::invariants::{assert_all_project_invariants, count_kind};
use crate::{
    ActivityKind, CertificationError, CertificationStatus, CommitPayload, Declaration,
    EngineConfig, HashLedger, InMemoryActivityStore, InMemoryProjectRepository, LedgerClient,
    LedgerError, NewProject, ProjectType, SystemClock, WorkflowEngine,
};

const RACERS: usize = 16;

/// Counts successful submissions and yields long enough for racers to pile up.
struct CountingLedger {
    fail_first: bool,
    calls: AtomicUsize,
    commits: AtomicUsize,
}

impl CountingLedger {
    fn new(fail_first: bool) -> Self {
        CountingLedger {
            fail_first,
            calls: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LedgerClient for CountingLedger {
    async fn submit(&self, payload: &CommitPayload) -> Result<String, LedgerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail_first && call == 0 {
            return Err(LedgerError::Transport("first call dropped".into()));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        HashLedger.submit(payload).await
    }
}

fn engine(ledger: Arc<CountingLedger>) -> Arc<WorkflowEngine> {
    Arc::new(WorkflowEngine::new(
        Arc::new(InMemoryProjectRepository::new()),
        Arc::new(InMemoryActivityStore::new()),
        ledger,
        Arc::new(SystemClock),
        EngineConfig::default(),
    ))
}

fn forest() -> NewProject {
    NewProject {
        owner_id: "waldgenossenschaft".into(),
        project_type: ProjectType::Forestation,
        declaration: Declaration {
            magnitude: 12.0,
            sub_method: Some("mixed".into()),
            duration_years: 30,
            investment_capacity: None,
        },
        documents: vec![],
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approve_commits_once() {
    let ledger = Arc::new(CountingLedger::new(false));
    let engine = engine(ledger.clone());
    let project = engine.create_project(forest()).await.unwrap();
    let id = project.id;

    let mut handles = Vec::with_capacity(RACERS);
    for i in 0..RACERS {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.approve(id, &format!("reviewer-{i}"), "race").await
        }));
    }

    let mut approved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(p) => {
                approved += 1;
                assert!(p.recording.is_some());
            }
            Err(CertificationError::InvalidTransition { from, event }) => {
                assert_eq!(from, CertificationStatus::Approved);
                assert_eq!(event, "approve");
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(approved, 1);
    assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);

    let trail = engine.activities(project.id).await.unwrap();
    assert_eq!(count_kind(&trail, ActivityKind::Approved), 1);
    assert_eq!(count_kind(&trail, ActivityKind::Recorded), 1);
    assert_all_project_invariants(&engine.get_project(project.id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commit_retries_commit_once() {
    let ledger = Arc::new(CountingLedger::new(true));
    let engine = engine(ledger.clone());
    let project = engine.create_project(forest()).await.unwrap();

    // First ledger call fails: approved, no recording.
    assert!(engine
        .approve(project.id, "reviewer", "ok")
        .await
        .unwrap_err()
        .is_retryable());

    let id = project.id;
    let mut handles = Vec::with_capacity(RACERS);
    for _ in 0..RACERS {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.commit(id).await }));
    }
    let mut commit_ids = Vec::new();
    for handle in handles {
        commit_ids.push(handle.await.unwrap().unwrap().commit_id);
    }
    commit_ids.dedup();
    assert_eq!(commit_ids.len(), 1);
    assert_eq!(ledger.commits.load(Ordering::SeqCst), 1);

    let trail = engine.activities(project.id).await.unwrap();
    assert_eq!(count_kind(&trail, ActivityKind::Recorded), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_see_whole_trails_during_writes() {
    let ledger = Arc::new(CountingLedger::new(false));
    let engine = engine(ledger);
    let id = engine.create_project(forest()).await.unwrap().id;

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 0..20u32 {
                let mut declaration = forest().declaration;
                declaration.magnitude = 12.0 + f64::from(i);
                engine
                    .update_declaration(id, "owner", declaration)
                    .await
                    .unwrap();
            }
        })
    };

    let reader = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut last = 0;
            for _ in 0..50 {
                let trail = engine.activities(id).await.unwrap();
                assert!(trail.len() >= last, "trail shrank");
                assert!(trail.iter().all(|a| a.project_id == id));
                last = trail.len();
                tokio::task::yield_now().await;
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
    assert_eq!(engine.activities(id).await.unwrap().len(), 21);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_projects_do_not_block_each_other() {
    let ledger = Arc::new(CountingLedger::new(false));
    let engine = engine(ledger.clone());

    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(engine.create_project(forest()).await.unwrap().id);
    }

    let mut handles = Vec::new();
    for id in ids.clone() {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.approve(id, "reviewer", "batch").await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(ledger.commits.load(Ordering::SeqCst), ids.len());
    assert!(engine.projects_awaiting_recording().await.unwrap().is_empty());
}
