mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{key, pool_with, FakeTransport};
use rdock_core::error::ConnectionError;
use rdock_pool::IdleReaper;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_concurrent_acquire_establishes_once() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.set_start_delay(Duration::from_millis(50));
    let pool = pool_with(&transport, dir.path());
    let k = key("docker-1");

    let handles = futures::future::join_all((0..8).map(|_| {
        let pool = Arc::clone(&pool);
        let k = k.clone();
        tokio::spawn(async move { pool.acquire(&k).await })
    }))
    .await;

    let sessions: Vec<_> = handles
        .into_iter()
        .map(|h| h.unwrap().unwrap())
        .collect();

    assert_eq!(transport.starts(), 1);
    assert!(sessions.iter().all(|s| s == &sessions[0]));
    assert_eq!(sessions[0].key(), &k);
    assert_eq!(pool.list_active_keys().await.into_iter().collect::<Vec<_>>(), vec![k]);
}

#[tokio::test]
async fn test_distinct_keys_get_distinct_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let pool = pool_with(&transport, dir.path());

    let a = pool.acquire(&key("host-a")).await.unwrap();
    let b = pool.acquire(&key("host-b")).await.unwrap();

    assert_eq!(transport.starts(), 2);
    assert_ne!(a.control_path(), b.control_path());
    assert_eq!(pool.len().await, 2);
}

#[tokio::test]
async fn test_failed_liveness_command_tears_down_and_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.liveness_fails.store(true, Ordering::SeqCst);
    let pool = pool_with(&transport, dir.path());
    let k = key("unreachable");

    let err = pool.acquire(&k).await.unwrap_err();

    assert!(matches!(err, ConnectionError::ProbeFailed { .. }));
    assert!(err.to_string().contains("Connection refused"));
    assert_eq!(transport.starts(), 1);
    assert_eq!(transport.terminations(), 1);
    assert!(!pool.is_established(&k).await);
    assert!(pool.is_empty().await);

    // The caller decides to try again
    transport.liveness_fails.store(false, Ordering::SeqCst);
    pool.acquire(&k).await.unwrap();
    assert_eq!(transport.starts(), 2);
}

#[tokio::test]
async fn test_master_dying_during_settle_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.master_dies.store(true, Ordering::SeqCst);
    let pool = pool_with(&transport, dir.path());

    let err = pool.acquire(&key("bad-auth")).await.unwrap_err();

    match err {
        ConnectionError::MasterExited { key, detail } => {
            assert_eq!(key, "deploy@bad-auth");
            assert!(detail.contains("Permission denied"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.terminations(), 1);
}

#[tokio::test]
async fn test_is_active_rechecks_and_heals() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let pool = pool_with(&transport, dir.path());
    let k = key("flaky");

    pool.acquire(&k).await.unwrap();
    assert!(pool.is_active(&k).await);

    transport.liveness_fails.store(true, Ordering::SeqCst);
    assert!(!pool.is_active(&k).await);
    assert!(pool.list_active_keys().await.is_empty());

    // The inactive entry is torn down before its replacement is set up
    transport.liveness_fails.store(false, Ordering::SeqCst);
    pool.acquire(&k).await.unwrap();
    assert_eq!(transport.starts(), 2);
    assert_eq!(transport.exit_requests.load(Ordering::SeqCst), 1);
    assert_eq!(transport.terminations(), 1);
    assert!(pool.is_active(&k).await);
}

#[tokio::test]
async fn test_close_is_idempotent_and_close_all_counts() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let pool = pool_with(&transport, dir.path());

    pool.acquire(&key("a")).await.unwrap();
    pool.acquire(&key("b")).await.unwrap();
    pool.acquire(&key("c")).await.unwrap();

    pool.close(&key("a")).await;
    pool.close(&key("a")).await;
    assert_eq!(transport.exit_requests.load(Ordering::SeqCst), 1);

    assert_eq!(pool.close_all().await, 2);
    assert_eq!(transport.terminations(), 3);
    assert!(pool.is_empty().await);
    assert!(pool.list_active_keys().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_idle_closes_only_expired() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let pool = pool_with(&transport, dir.path());
    let old = key("old");
    let fresh = key("fresh");

    pool.acquire(&old).await.unwrap();
    tokio::time::advance(Duration::from_secs(100)).await;
    pool.acquire(&fresh).await.unwrap();
    let fresh_used = pool.last_used(&fresh).await.unwrap();
    tokio::time::advance(Duration::from_secs(50)).await;

    let closed = pool.cleanup_idle(Duration::from_secs(120)).await;

    assert_eq!(closed, vec![old.clone()]);
    assert!(!pool.is_established(&old).await);
    assert!(pool.is_established(&fresh).await);
    assert_eq!(pool.last_used(&fresh).await, Some(fresh_used));
}

#[tokio::test(start_paused = true)]
async fn test_reuse_refreshes_last_used() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let pool = pool_with(&transport, dir.path());
    let k = key("busy");

    pool.acquire(&k).await.unwrap();
    tokio::time::advance(Duration::from_secs(100)).await;
    pool.acquire(&k).await.unwrap();
    tokio::time::advance(Duration::from_secs(100)).await;

    assert!(pool.cleanup_idle(Duration::from_secs(120)).await.is_empty());
    assert_eq!(transport.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_reaper_closes_sessions_until_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let pool = pool_with(&transport, dir.path());
    let k = key("forgotten");
    pool.acquire(&k).await.unwrap();

    let cancel = CancellationToken::new();
    let reaper = IdleReaper::new(Duration::from_secs(10), Duration::from_secs(30));
    let task = reaper.spawn(Arc::clone(&pool), cancel.clone());

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(pool.is_established(&k).await);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!pool.is_established(&k).await);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_vanished_master_is_replaced_instead_of_bypassed() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let pool = pool_with(&transport, dir.path());
    let k = key("expired");

    let session = pool.acquire(&k).await.unwrap();
    transport.master_exits(session.control_path());

    // A plain command would still get through on a connection of its own,
    // but the session itself is gone
    assert!(!pool.is_active(&k).await);
    assert!(transport.commands.lock().unwrap().len() == 1);

    pool.acquire(&k).await.unwrap();
    assert_eq!(transport.starts(), 2);
    assert!(session.control_path().exists());
}

#[tokio::test]
async fn test_acquire_checks_the_master_before_reuse() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let pool = pool_with(&transport, dir.path());
    let k = key("docker-1");

    let session = pool.acquire(&k).await.unwrap();
    let checks = transport.checks();
    pool.acquire(&k).await.unwrap();
    assert_eq!(transport.checks(), checks + 1);
    assert_eq!(transport.starts(), 1);

    transport.master_exits(session.control_path());
    pool.acquire(&k).await.unwrap();
    assert_eq!(transport.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_master_that_never_answers_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.never_ready.store(true, Ordering::SeqCst);
    let pool = pool_with(&transport, dir.path());

    let err = pool.acquire(&key("slow-auth")).await.unwrap_err();

    assert!(matches!(err, ConnectionError::ProbeFailed { .. }));
    assert!(err.to_string().contains("not ready"));
    // Nothing ran before the master answered
    assert!(transport.commands.lock().unwrap().is_empty());
    assert_eq!(transport.terminations(), 1);
}

#[tokio::test]
async fn test_detached_master_is_adopted_by_the_next_pool() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let k = key("docker-1");

    let first = pool_with(&transport, dir.path());
    let session = first.acquire(&k).await.unwrap();
    assert_eq!(first.detach_all().await, 1);
    assert!(first.is_empty().await);
    assert_eq!(transport.exit_requests.load(Ordering::SeqCst), 0);
    assert_eq!(transport.terminations(), 0);
    assert!(session.control_path().exists());

    let second = pool_with(&transport, dir.path());
    let adopted = second.acquire(&k).await.unwrap();
    assert_eq!(adopted, session);
    assert_eq!(transport.starts(), 1);
    assert!(second.is_active(&k).await);

    second.close(&k).await;
    assert_eq!(transport.exit_requests.load(Ordering::SeqCst), 1);
    assert!(!session.control_path().exists());
}

#[tokio::test]
async fn test_close_reaches_a_master_left_by_another_pool() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let k = key("docker-1");

    let first = pool_with(&transport, dir.path());
    let session = first.acquire(&k).await.unwrap();
    first.detach_all().await;

    let second = pool_with(&transport, dir.path());
    second.close(&k).await;

    assert_eq!(transport.exit_requests.load(Ordering::SeqCst), 1);
    assert!(!session.control_path().exists());
    assert_eq!(transport.starts(), 1);
}

#[tokio::test]
async fn test_detach_tears_down_inactive_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let pool = pool_with(&transport, dir.path());

    pool.acquire(&key("good")).await.unwrap();
    pool.acquire(&key("broken")).await.unwrap();
    pool.mark_inactive(&key("broken")).await;

    assert_eq!(pool.detach_all().await, 1);
    assert_eq!(transport.exit_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cleanup_reaps_inactive_sessions_regardless_of_age() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let pool = pool_with(&transport, dir.path());
    let k = key("failed");

    let session = pool.acquire(&k).await.unwrap();
    pool.mark_inactive(&k).await;

    let closed = pool.cleanup_idle(Duration::from_secs(3600)).await;

    assert_eq!(closed, vec![k]);
    assert_eq!(transport.terminations(), 1);
    assert!(!session.control_path().exists());
    assert!(pool.is_empty().await);
}
