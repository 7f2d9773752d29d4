//! End-to-end job scenarios against the simulated hub.
//!
//! These drive the orchestrator the same way the HTTP layer does and
//! observe jobs only through the store and the status reporter.

use prefetchd::config::AppConfig;
use prefetchd::context::AppContext;
use prefetchd::core::hub::{Hub, SimulatedHub};
use prefetchd::core::reporter::{self, StatusView};
use prefetchd::core::{JobStatus, Orchestrator, PrefetchRequest};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::{sleep, timeout};

const REPO: &str = "org/model";

fn context(root: &Path, hub: Arc<SimulatedHub>) -> AppContext {
    let config = AppConfig {
        data_directory: root.join("data"),
        cache_directory: root.join("cache"),
        sync_files: false,
        ..Default::default()
    };
    AppContext::new(config, Hub::from_backend(hub))
}

fn hub_with(root: &Path, files: &[(&str, &str)]) -> Arc<SimulatedHub> {
    let hub = SimulatedHub::new(&root.join("cache"));
    for (path, bytes) in files {
        hub.add_file(REPO, "main", path, bytes.as_bytes().to_vec());
    }
    Arc::new(hub)
}

fn request(projects: &[&str], files: &[&str]) -> PrefetchRequest {
    PrefetchRequest {
        repository_id: REPO.to_string(),
        revision: None,
        project_names: projects.iter().map(|s| s.to_string()).collect(),
        files: files.iter().map(|s| s.to_string()).collect(),
    }
}

/// Poll until the job is terminal, returning every snapshot observed.
async fn poll_until_done(ctx: &AppContext, job_id: &str) -> Vec<StatusView> {
    timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        loop {
            let view = reporter::report(&ctx.jobs, job_id)
                .await
                .expect("job should exist");
            let done = view.status.is_terminal();
            seen.push(view);
            if done {
                return seen;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}

#[tokio::test]
async fn all_files_succeed() {
    let temp = tempdir().unwrap();
    let hub = hub_with(temp.path(), &[("a.json", "{\"a\":1}"), ("b.bin", "\u{0}\u{1}\u{2}")]);
    let ctx = context(temp.path(), hub);

    let handle = Orchestrator::new(ctx.clone())
        .start(request(&["p1"], &["a.json", "b.bin"]))
        .await
        .unwrap();
    let job_id = handle.detach();

    let last = poll_until_done(&ctx, &job_id).await.pop().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.downloaded_files, 2);
    assert_eq!(last.total_files, 2);
    assert_eq!(last.progress, 1.0);
    assert_eq!(last.message, "");

    let data = temp.path().join("data/p1/org/model");
    assert_eq!(std::fs::read(data.join("a.json")).unwrap(), b"{\"a\":1}");
    assert_eq!(std::fs::read(data.join("b.bin")).unwrap(), b"\x00\x01\x02");
}

#[tokio::test]
async fn network_error_fails_job_with_partial_progress() {
    let temp = tempdir().unwrap();
    let hub = hub_with(temp.path(), &[("a.json", "{}"), ("b.bin", "bin")]);
    hub.fail_path(REPO, "b.bin", "network is unreachable");
    let ctx = context(temp.path(), hub);

    let handle = Orchestrator::new(ctx.clone())
        .start(request(&["p1"], &["a.json", "b.bin"]))
        .await
        .unwrap();
    let job_id = handle.detach();

    let last = poll_until_done(&ctx, &job_id).await.pop().unwrap();
    assert_eq!(last.status, JobStatus::Failed);
    assert_eq!(last.downloaded_files, 1);
    assert_eq!(last.progress, 0.5);
    assert!(last.message.contains("network is unreachable"));

    let data = temp.path().join("data/p1/org/model");
    assert!(data.join("a.json").exists());
    assert!(!data.join("b.bin").exists());
}

#[tokio::test]
async fn shared_file_is_fetched_once_for_all_projects() {
    let temp = tempdir().unwrap();
    let hub = hub_with(temp.path(), &[("weights/model.bin", "shared weights")]);
    let ctx = context(temp.path(), hub.clone());

    let handle = Orchestrator::new(ctx.clone())
        .start(request(&["alpha", "beta"], &["weights/model.bin"]))
        .await
        .unwrap();
    let job_id = handle.id().to_string();
    handle.wait().await.unwrap();

    assert_eq!(
        ctx.jobs.get(&job_id).await.unwrap().status,
        JobStatus::Completed
    );
    assert_eq!(hub.fetch_count(REPO, "main", "weights/model.bin"), 1);

    let alpha = std::fs::read(temp.path().join("data/alpha/org/model/weights/model.bin")).unwrap();
    let beta = std::fs::read(temp.path().join("data/beta/org/model/weights/model.bin")).unwrap();
    assert_eq!(alpha, b"shared weights");
    assert_eq!(alpha, beta);
}

#[tokio::test]
async fn identical_rerun_is_idempotent() {
    let temp = tempdir().unwrap();
    let hub = hub_with(temp.path(), &[("a.json", "{\"v\":1}"), ("sub/b.bin", "bbb")]);
    let ctx = context(temp.path(), hub.clone());
    let orchestrator = Orchestrator::new(ctx.clone());

    for _ in 0..2 {
        let handle = orchestrator
            .start(request(&["p1"], &["a.json", "sub/b.bin"]))
            .await
            .unwrap();
        let job_id = handle.id().to_string();
        handle.wait().await.unwrap();
        assert_eq!(
            ctx.jobs.get(&job_id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    let root = temp.path().join("data/p1/org/model");
    let mut top: Vec<String> = std::fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    top.sort();
    assert_eq!(top, vec!["a.json", "sub"]);
    assert_eq!(std::fs::read_dir(root.join("sub")).unwrap().count(), 1);
    assert_eq!(std::fs::read(root.join("a.json")).unwrap(), b"{\"v\":1}");

    // Second run was served from the cache
    assert_eq!(hub.fetch_count(REPO, "main", "a.json"), 1);
}

#[tokio::test]
async fn progress_is_monotonic_and_terminal_snapshot_frozen() {
    let temp = tempdir().unwrap();
    let hub = SimulatedHub::new(&temp.path().join("cache"))
        .with_fetch_delay(Duration::from_millis(20));
    for name in ["f1", "f2", "f3", "f4", "f5"] {
        hub.add_file(REPO, "main", name, name.as_bytes().to_vec());
    }
    let ctx = context(temp.path(), Arc::new(hub));

    let handle = Orchestrator::new(ctx.clone())
        .start(request(&["p1", "p2"], &["f1", "f2", "f3", "f4", "f5"]))
        .await
        .unwrap();
    let job_id = handle.detach();

    let seen = poll_until_done(&ctx, &job_id).await;
    assert!(seen.len() > 1, "expected to observe the job in flight");
    for pair in seen.windows(2) {
        assert!(pair[0].downloaded_files <= pair[1].downloaded_files);
        assert!(pair[0].progress <= pair[1].progress);
    }
    assert!(seen.iter().all(|v| v.total_files == 5));
    assert!(seen.iter().all(|v| v.downloaded_files <= v.total_files));

    let last = seen.last().unwrap().clone();
    assert_eq!(last.status, JobStatus::Completed);
    for _ in 0..3 {
        sleep(Duration::from_millis(5)).await;
        let again = reporter::report(&ctx.jobs, &job_id).await.unwrap();
        assert_eq!(
            serde_json::to_vec(&again).unwrap(),
            serde_json::to_vec(&last).unwrap()
        );
    }
}

#[tokio::test]
async fn concurrent_jobs_run_independently() {
    let temp = tempdir().unwrap();
    let hub = hub_with(temp.path(), &[("a.json", "a"), ("b.bin", "b")]);
    hub.add_file("other/repo", "v2", "c.txt", b"c".to_vec());
    let ctx = context(temp.path(), hub);
    let orchestrator = Orchestrator::new(ctx.clone());

    let first = orchestrator
        .start(request(&["p1"], &["a.json", "b.bin"]))
        .await
        .unwrap();
    let second = orchestrator
        .start(PrefetchRequest {
            repository_id: "other/repo".to_string(),
            revision: Some("v2".to_string()),
            project_names: vec!["p2".to_string()],
            files: vec!["c.txt".to_string()],
        })
        .await
        .unwrap();

    let (first_id, second_id) = (first.id().to_string(), second.id().to_string());
    first.wait().await.unwrap();
    second.wait().await.unwrap();

    assert_eq!(ctx.jobs.get(&first_id).await.unwrap().status, JobStatus::Completed);
    assert_eq!(ctx.jobs.get(&second_id).await.unwrap().status, JobStatus::Completed);
    assert!(temp.path().join("data/p2/other/repo/c.txt").exists());
    assert_eq!(ctx.jobs.active_count().await, 0);
}
