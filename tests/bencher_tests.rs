
use std::time::Duration;

use bencher::bencher::Phase;
use bencher::error::BencherError;
use bencher::lock::LockStatus;
use bencher::scheduler::{JobStatus, Scheduled};
use bencher::JobRequest;
use test_harness::{wait_for, Script, TestEnv};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_submit_runs_job_in_sandbox() {
    let env = TestEnv::new();
    let bencher = env.bencher().await;
    env.engine.script("v1", Script::stdout("BenchmarkSum 42 ns/op\n"));

    let request = JobRequest::new("v1", env.workspace("v1")).with_workdir("pkg/sum");
    bencher.prepare(&request).await.unwrap();

    let spec = env.engine.container("v1").unwrap();
    assert_eq!(spec.image, "golang:alpine");
    assert_eq!(spec.command, vec!["go", "test", "-bench=.", "-benchmem"]);
    assert_eq!(spec.entrypoint, Some(vec![String::new()]));
    assert_eq!(spec.working_dir.as_deref(), Some("/bencher/pkg/sum"));
    assert_eq!(spec.mounts[0].target, "/bencher");
    assert_eq!(spec.labels.get("bencher").map(String::as_str), Some("runner"));
    assert_eq!(
        bencher.query("v1").await.unwrap().status(),
        JobStatus::Pending
    );

    let Scheduled::Ran(job) = bencher.schedule("v1").await.unwrap() else {
        panic!("expected the job to run");
    };
    assert_eq!(job.status(), JobStatus::Done);
    assert_eq!(bencher.query("v1").await.unwrap().stdout, "BenchmarkSum 42 ns/op\n");
}

#[tokio::test]
async fn test_custom_command_and_dot_alias() {
    let env = TestEnv::new();
    let bencher = env.bencher().await;

    let custom = JobRequest::new("v1", env.workspace("v1"))
        .with_command(vec!["go".into(), "test".into(), "-run=^$".into()]);
    bencher.prepare(&custom).await.unwrap();
    assert_eq!(
        env.engine.container("v1").unwrap().command,
        vec!["go", "test", "-run=^$"]
    );

    let dot = JobRequest::new("v2", env.workspace("v2")).with_command(vec![".".into()]);
    bencher.prepare(&dot).await.unwrap();
    assert_eq!(
        env.engine.container("v2").unwrap().command,
        bencher.config().sandbox.default_command
    );
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected() {
    let env = TestEnv::new();
    let bencher = env.bencher().await;
    let request = JobRequest::new("v1", env.workspace("v1"));

    bencher.submit(&request).await.unwrap();
    // The record outlives the container.
    let err = bencher.submit(&request).await.unwrap_err();
    assert!(matches!(err, BencherError::DuplicateJob(_)));

    let err = bencher
        .prepare(&JobRequest::new("bad,name", env.dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, BencherError::InvalidIdentifier { .. }));
}

#[tokio::test]
async fn test_query_unknown_job() {
    let env = TestEnv::new();
    let bencher = env.bencher().await;
    assert!(matches!(
        bencher.query("nope").await,
        Err(BencherError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_overview_shows_running_and_queued() {
    let env = TestEnv::new();
    let first = env.bencher().await;
    let second = env.bencher().await;
    env.engine.gate("a1");

    first
        .prepare(&JobRequest::new("a1", env.workspace("a1")))
        .await
        .unwrap();
    let running = tokio::spawn(async move { first.schedule("a1").await });
    let engine = env.engine.clone();
    assert!(wait_for(|| engine.started().contains(&"a1".to_string()), TIMEOUT).await);

    for v in ["b1", "c1"] {
        let outcome = second
            .submit(&JobRequest::new(v, env.workspace(v)))
            .await
            .unwrap();
        assert_eq!(outcome, Scheduled::Queued);
    }

    let overview = second.query_all().await.unwrap();
    assert_eq!(overview.running.as_deref(), Some("a1"));
    assert_eq!(overview.queue, vec!["b1", "c1"]);
    assert_eq!(overview.phase("a1"), Some(Phase::Running));
    assert_eq!(overview.phase("c1"), Some(Phase::Queued(1)));
    assert_eq!(overview.phase("zz"), None);
    assert_eq!(Phase::Queued(1).to_string(), "scheduled at order #1");

    env.engine.open("a1");
    running.await.unwrap().unwrap();

    let overview = second.query_all().await.unwrap();
    assert!(overview.running.is_none());
    assert!(overview.queue.is_empty());
    assert_eq!(overview.phase("c1"), Some(Phase::Settled(JobStatus::Done)));
    assert_eq!(env.engine.started(), vec!["a1", "b1", "c1"]);
}

#[tokio::test]
async fn test_remove_running_job_needs_force() {
    let env = TestEnv::new();
    let first = env.bencher().await;
    let second = env.bencher().await;
    env.engine.gate("a1");

    first
        .prepare(&JobRequest::new("a1", env.workspace("a1")))
        .await
        .unwrap();
    let running = tokio::spawn(async move { first.schedule("a1").await });
    let engine = env.engine.clone();
    assert!(wait_for(|| engine.started().contains(&"a1".to_string()), TIMEOUT).await);

    let removed = second.remove(&["a1".to_string()], false).await.unwrap();
    assert_eq!(removed.stopped, None);
    assert!(env.engine.has_container("a1"));

    let removed = second.remove(&["a1".to_string()], true).await.unwrap();
    assert_eq!(removed.stopped.as_deref(), Some("a1"));
    assert!(env.engine.removed().contains(&("a1".to_string(), true)));

    // The holder finishes with an engine error and frees the slot.
    env.engine.open("a1");
    assert!(running.await.unwrap().is_err());
    assert_eq!(second.lock_status().await.unwrap(), LockStatus::Free);
}

#[tokio::test]
async fn test_remove_queued_and_finished_jobs() {
    let env = TestEnv::new();
    let bencher = env.bencher().await;
    let holder = env.bencher().await;

    bencher
        .submit(&JobRequest::new("done1", env.workspace("done1")))
        .await
        .unwrap();

    // Occupy the slot so the next submissions queue.
    env.engine.gate("busy");
    holder
        .prepare(&JobRequest::new("busy", env.workspace("busy")))
        .await
        .unwrap();
    let running = tokio::spawn(async move { holder.schedule("busy").await });
    let engine = env.engine.clone();
    assert!(wait_for(|| engine.started().contains(&"busy".to_string()), TIMEOUT).await);

    for v in ["q1", "q2", "q3"] {
        bencher
            .submit(&JobRequest::new(v, env.workspace(v)))
            .await
            .unwrap();
    }

    let removed = bencher
        .remove(&["q2".to_string(), "done1".to_string()], false)
        .await
        .unwrap();
    assert_eq!(removed.dequeued, vec!["q2"]);
    assert_eq!(removed.deleted, vec!["q2", "done1"]);
    assert!(!env.engine.has_container("q2"));

    env.engine.open("busy");
    running.await.unwrap().unwrap();
    assert_eq!(env.engine.started(), vec!["done1", "busy", "q1", "q3"]);
    assert!(matches!(
        bencher.query("q2").await,
        Err(BencherError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_all_clears_everything() {
    let env = TestEnv::new();
    let bencher = env.bencher().await;
    for v in ["v1", "v2"] {
        bencher
            .submit(&JobRequest::new(v, env.workspace(v)))
            .await
            .unwrap();
    }
    bencher
        .prepare(&JobRequest::new("v3", env.workspace("v3")))
        .await
        .unwrap();

    let removed = bencher.remove_all(false).await.unwrap();
    assert_eq!(removed.deleted.len(), 3);
    assert!(!env.engine.has_container("v3"));

    let overview = bencher.query_all().await.unwrap();
    assert!(overview.jobs.is_empty());
    assert!(overview.queue.is_empty());
}

#[tokio::test]
async fn test_unlock_clears_stale_lock() {
    let env = TestEnv::new();
    let bencher = env.bencher().await;
    std::fs::create_dir_all(env.config.server_dir()).unwrap();
    std::fs::write(env.config.lock_path(), "").unwrap();
    std::fs::write(env.config.marker_path(), "crashed").unwrap();

    assert_eq!(
        bencher.lock_status().await.unwrap().running(),
        Some("crashed")
    );
    // A record-less running job still answers queries.
    assert_eq!(
        bencher.query("crashed").await.unwrap().status(),
        JobStatus::Pending
    );

    bencher.unlock().await.unwrap();
    assert_eq!(bencher.lock_status().await.unwrap(), LockStatus::Free);
}

#[tokio::test]
async fn test_dispatch_prunes_old_coordinators() {
    let env = TestEnv::new();
    let bencher = env.bencher().await;
    bencher
        .prepare(&JobRequest::new("v1", env.workspace("v1")))
        .await
        .unwrap();

    let coordinator = bencher.dispatch("v1").await.unwrap();
    assert_eq!(env.engine.pruned(), vec!["bencher=server"]);
    let spec = env.engine.container(&coordinator).unwrap();
    assert_eq!(spec.command, vec!["sched", "v1"]);
}

#[tokio::test]
async fn test_remove_continues_past_engine_refusal() {
    let env = TestEnv::new();
    let bencher = env.bencher().await;
    for v in ["k1", "k2"] {
        bencher
            .prepare(&JobRequest::new(v, env.workspace(v)))
            .await
            .unwrap();
    }
    env.engine.fail_remove("k1");

    let removed = bencher
        .remove(&["k1".to_string(), "k2".to_string()], false)
        .await
        .unwrap();
    assert_eq!(removed.deleted, vec!["k1", "k2"]);
    assert_eq!(removed.failed, vec!["k1"]);

    assert!(env.engine.has_container("k1"));
    assert!(env.config.version_dir("k1").exists());
    assert!(!env.engine.has_container("k2"));
    assert!(!env.config.version_dir("k2").exists());
}
