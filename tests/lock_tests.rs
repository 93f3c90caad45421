
use std::sync::Arc;

use bencher::lock::{Acquisition, ExecutionLock, FileLock, LeaseLock, LockStatus};
use bencher::store::SqliteStore;
use tempfile::TempDir;

fn file_locks(dir: &TempDir) -> (FileLock, FileLock) {
    let server = dir.path().join("server");
    let lock = || FileLock::new(server.join("pid"), server.join("running"));
    (lock(), lock())
}

async fn lease_locks(dir: &TempDir) -> (LeaseLock, LeaseLock) {
    let db = dir.path().join("server").join("db");
    let first = SqliteStore::open(&db).await.unwrap();
    let second = SqliteStore::open(&db).await.unwrap();
    (
        LeaseLock::new(first.pool().clone()).await.unwrap(),
        LeaseLock::new(second.pool().clone()).await.unwrap(),
    )
}

async fn check_exclusive(first: &dyn ExecutionLock, second: &dyn ExecutionLock) {
    assert_eq!(first.status().await.unwrap(), LockStatus::Free);
    assert_eq!(first.try_acquire().await.unwrap(), Acquisition::Acquired);
    assert_eq!(second.try_acquire().await.unwrap(), Acquisition::AlreadyHeld);
    assert!(second.is_held().await.unwrap());

    first.release().await.unwrap();
    assert_eq!(second.try_acquire().await.unwrap(), Acquisition::Acquired);
    second.release().await.unwrap();
    assert!(!first.is_held().await.unwrap());
}

async fn check_running_marker(first: &dyn ExecutionLock, second: &dyn ExecutionLock) {
    first.try_acquire().await.unwrap();
    assert_eq!(
        second.status().await.unwrap(),
        LockStatus::Held { running: None }
    );

    first.set_running("v1").await.unwrap();
    let status = second.status().await.unwrap();
    assert_eq!(status.running(), Some("v1"));

    first.release().await.unwrap();
    assert_eq!(second.status().await.unwrap(), LockStatus::Free);
}

async fn check_release_without_holding(lock: &dyn ExecutionLock) {
    assert!(lock.release().await.is_err());
}

async fn check_force_release(first: &dyn ExecutionLock, second: &dyn ExecutionLock) {
    first.try_acquire().await.unwrap();
    first.set_running("crashed").await.unwrap();

    second.force_release().await.unwrap();
    assert_eq!(second.status().await.unwrap(), LockStatus::Free);
    assert_eq!(second.try_acquire().await.unwrap(), Acquisition::Acquired);

    // Clearing a free lock is fine.
    second.release().await.unwrap();
    second.force_release().await.unwrap();
}

#[tokio::test]
async fn test_file_lock_is_exclusive() {
    let dir = TempDir::new().unwrap();
    let (a, b) = file_locks(&dir);
    check_exclusive(&a, &b).await;
}

#[tokio::test]
async fn test_lease_lock_is_exclusive() {
    let dir = TempDir::new().unwrap();
    let (a, b) = lease_locks(&dir).await;
    check_exclusive(&a, &b).await;
}

#[tokio::test]
async fn test_file_lock_running_marker() {
    let dir = TempDir::new().unwrap();
    let (a, b) = file_locks(&dir);
    check_running_marker(&a, &b).await;
}

#[tokio::test]
async fn test_lease_lock_running_marker() {
    let dir = TempDir::new().unwrap();
    let (a, b) = lease_locks(&dir).await;
    check_running_marker(&a, &b).await;
}

#[tokio::test]
async fn test_file_lock_release_without_holding() {
    let dir = TempDir::new().unwrap();
    let (a, _) = file_locks(&dir);
    check_release_without_holding(&a).await;
}

#[tokio::test]
async fn test_lease_lock_release_without_holding() {
    let dir = TempDir::new().unwrap();
    let (a, _) = lease_locks(&dir).await;
    check_release_without_holding(&a).await;
}

#[tokio::test]
async fn test_file_lock_force_release() {
    let dir = TempDir::new().unwrap();
    let (a, b) = file_locks(&dir);
    check_force_release(&a, &b).await;
}

#[tokio::test]
async fn test_lease_lock_force_release() {
    let dir = TempDir::new().unwrap();
    let (a, b) = lease_locks(&dir).await;
    check_force_release(&a, &b).await;
}

#[tokio::test]
async fn test_file_lock_creates_server_dir() {
    let dir = TempDir::new().unwrap();
    let (lock, _) = file_locks(&dir);
    assert!(!dir.path().join("server").exists());

    lock.try_acquire().await.unwrap();
    assert!(lock.sentinel().exists());
    lock.release().await.unwrap();
    assert!(!lock.sentinel().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_has_one_winner() {
    let dir = TempDir::new().unwrap();
    let server = dir.path().join("server");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let lock = Arc::new(FileLock::new(server.join("pid"), server.join("running")));
        handles.push(tokio::spawn(async move { lock.try_acquire().await.unwrap() }));
    }

    let mut acquired = 0;
    for handle in handles {
        if handle.await.unwrap() == Acquisition::Acquired {
            acquired += 1;
        }
    }
    assert_eq!(acquired, 1);
}
