use cc_core::config::CommandsConfig;
use cc_core::types::{
    JobKind, JobTrigger, NewJob, NewLogEntry, ProjectId, RegisterProjectInput, VcsProvider,
    WorkspaceId,
};
use cc_core::{CoreProvider, RequestContext};
use cc_db::DbProvider;
use cc_events::bus::EventBus;
use cc_events::types::EventSource;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

const WRITERS: usize = 8;

fn ctx() -> RequestContext {
    RequestContext::new(EventSource::Webhook, None)
}

fn setup() -> (TempDir, Arc<DbProvider>, ProjectId) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codecrow.db");
    let provider = Arc::new(DbProvider::new(path.to_str().unwrap(), EventBus::new(64)));
    provider.migrate().unwrap();
    let project = provider
        .open()
        .unwrap()
        .projects()
        .register(
            &ctx(),
            RegisterProjectInput {
                workspace_id: WorkspaceId::generate(),
                provider: VcsProvider::Github,
                repo_full_name: "acme/api".to_string(),
                default_branch: Some("main".to_string()),
                branch_patterns: Vec::new(),
                pr_analysis_enabled: None,
                branch_analysis_enabled: None,
                rag_enabled: None,
                commands_enabled: None,
            },
        )
        .unwrap();
    (dir, provider, project.id)
}

/// Runs `work` once per writer thread, each on its own connection, released
/// together.
fn race<T, F>(provider: &Arc<DbProvider>, work: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize, &DbProvider) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(WRITERS));
    let work = Arc::new(work);
    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let provider = Arc::clone(provider);
            let barrier = Arc::clone(&barrier);
            let work = Arc::clone(&work);
            thread::spawn(move || {
                barrier.wait();
                work(writer, &provider)
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect()
}

#[test]
fn test_concurrent_log_appends_stay_gapless() {
    let (_dir, provider, project_id) = setup();
    let job = provider
        .open()
        .unwrap()
        .jobs()
        .create(
            &ctx(),
            NewJob {
                project_id,
                kind: JobKind::PrAnalysis,
                trigger: JobTrigger::Webhook,
                pr_number: Some(7),
                branch: None,
                commit_hash: Some("head1".to_string()),
            },
        )
        .unwrap();
    let per_writer = 20;

    let job_id = job.id.clone();
    let written = race(&provider, move |writer, provider| {
        let core = provider.open().unwrap();
        (0..per_writer)
            .map(|n| {
                core.jobs()
                    .append_log(&job_id, NewLogEntry::info("step", format!("{writer}-{n}")))
                    .unwrap()
                    .sequence
            })
            .collect::<Vec<i64>>()
    });

    let mut sequences: Vec<i64> = written.into_iter().flatten().collect();
    sequences.sort_unstable();
    let total = (WRITERS * per_writer) as i64;
    assert_eq!(sequences, (1..=total).collect::<Vec<i64>>());

    let page = provider
        .open()
        .unwrap()
        .jobs()
        .logs_since(&job.id, 0, None)
        .unwrap();
    assert_eq!(page.logs.len(), WRITERS * per_writer);
    assert_eq!(page.latest_sequence, total);
}

#[test]
fn test_concurrent_rate_limit_consumption_never_overshoots() {
    let (_dir, provider, project_id) = setup();
    let config = CommandsConfig {
        max_per_window: 3,
        ..CommandsConfig::default()
    };

    let project = project_id.clone();
    let decisions = race(&provider, move |_, provider| {
        let core = provider.open().unwrap();
        (0..4)
            .map(|_| {
                core.rate_limits()
                    .consume(&project, &config)
                    .unwrap()
                    .allowed
            })
            .collect::<Vec<bool>>()
    });

    let allowed = decisions.into_iter().flatten().filter(|allowed| *allowed).count();
    assert_eq!(allowed, 3);
    let next = provider
        .open()
        .unwrap()
        .rate_limits()
        .consume(&project_id, &config)
        .unwrap();
    assert!(!next.allowed);
}
