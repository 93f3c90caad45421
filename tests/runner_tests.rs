
use bencher::config::BencherConfig;
use bencher::error::BencherError;
use bencher::runner::{ContainerRunner, ContainerSpec, LogOutput};
use bencher::scheduler::dispatch::dispatch;
use test_harness::{create_container, FakeEngine, Script};

fn spec(name: &str) -> ContainerSpec {
    ContainerSpec {
        name: name.to_string(),
        image: "golang:alpine".to_string(),
        ..ContainerSpec::default()
    }
}

#[tokio::test]
async fn test_collect_logs_splits_streams() {
    let engine = FakeEngine::new();
    let runner = ContainerRunner::new(engine.clone());
    create_container(&engine, "v1").await;
    engine.script(
        "v1",
        Script {
            stdout: "BenchmarkA 10 ns/op\n".to_string(),
            stderr: "warning: cache miss\n".to_string(),
            exit_code: 0,
        },
    );

    let logs = runner.collect_logs("v1").await.unwrap();
    assert_eq!(
        logs,
        LogOutput {
            stdout: "BenchmarkA 10 ns/op\n".to_string(),
            stderr: "warning: cache miss\n".to_string(),
        }
    );
}

#[tokio::test]
async fn test_create_job_reports_duplicate_name() {
    let engine = FakeEngine::new();
    let runner = ContainerRunner::new(engine.clone());

    runner.create_job(&spec("v1")).await.unwrap();
    let err = runner.create_job(&spec("v1")).await.unwrap_err();
    assert!(matches!(err, BencherError::DuplicateJob(name) if name == "v1"));

    // The raw call keeps the engine's conflict for callers that retry.
    assert!(runner.create(&spec("v1")).await.unwrap_err().is_conflict());
}

#[tokio::test]
async fn test_remove_tolerates_missing_container() {
    let engine = FakeEngine::new();
    let runner = ContainerRunner::new(engine.clone());
    create_container(&engine, "v1").await;

    runner.remove("v1", false).await.unwrap();
    runner.remove("v1", false).await.unwrap();
    assert_eq!(engine.removed(), vec![("v1".to_string(), false)]);
}

#[tokio::test]
async fn test_wait_returns_exit_code() {
    let engine = FakeEngine::new();
    let runner = ContainerRunner::new(engine.clone());
    create_container(&engine, "v1").await;
    engine.script("v1", Script::stderr("FAIL\n", 1));

    runner.start("v1").await.unwrap();
    assert_eq!(runner.wait("v1").await.unwrap(), 1);
    assert!(runner.start("missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_dispatch_starts_coordinator() {
    let engine = FakeEngine::new();
    let runner = ContainerRunner::new(engine.clone());
    let config = BencherConfig::new("/tmp/bencher-test");

    let name = dispatch(&runner, &config, "v1").await.unwrap();
    assert!(name.starts_with("bencher_"));
    assert_eq!(engine.started(), vec![name.clone()]);

    let coordinator = engine.container(&name).unwrap();
    assert_eq!(coordinator.command, vec!["sched", "v1"]);
    assert_eq!(coordinator.image, "bencher:latest");
}

#[tokio::test]
async fn test_dispatch_retries_taken_names() {
    let engine = FakeEngine::new();
    let runner = ContainerRunner::new(engine.clone());
    let config = BencherConfig::new("/tmp/bencher-test");
    engine.conflict_coordinators(3);

    dispatch(&runner, &config, "v1").await.unwrap();
    assert_eq!(engine.create_attempts(), 4);
    assert_eq!(engine.containers_named("bencher_").len(), 1);
}

#[tokio::test]
async fn test_dispatch_gives_up_after_configured_attempts() {
    let engine = FakeEngine::new();
    let runner = ContainerRunner::new(engine.clone());
    let mut config = BencherConfig::new("/tmp/bencher-test");
    config.coordinator.name_retries = 2;
    engine.conflict_coordinators(10);

    let err = dispatch(&runner, &config, "v1").await.unwrap_err();
    assert!(matches!(err, BencherError::NameRetriesExhausted(2)));
    assert_eq!(engine.create_attempts(), 2);
    assert!(engine.started().is_empty());
}

#[tokio::test]
async fn test_dispatch_rejects_invalid_name() {
    let engine = FakeEngine::new();
    let runner = ContainerRunner::new(engine.clone());
    let config = BencherConfig::new("/tmp/bencher-test");

    assert!(dispatch(&runner, &config, "a,b").await.is_err());
    assert_eq!(engine.create_attempts(), 0);
}
