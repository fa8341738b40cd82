//! Chaos Testing for the CRM data layer
//!
//! Failure scenarios driven through [`common::FlakyStore`], which injects
//! errors at precise call counts and can stall every call:
//! 1. **Transient failures** - retried through the serialized retry queue
//! 2. **Stalls** - bounded by the request timeout
//! 3. **Listener faults** - reconnect backoff and the `failed` terminal state
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use common::{flaky_manager, init_tracing, lead, test_config, Op};
use crm_data::query::QueryOptions;
use crm_data::storage::{DocumentStore, StorageError};
use crm_data::{ConnectionState, CrmDataConfig, DataError, GetOptions, WriteOptions};

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, wanted: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| *s == wanted))
        .await
        .unwrap_or_else(|_| panic!("never reached {wanted}"))
        .expect("state channel closed");
}

// =============================================================================
// Retry queue
// =============================================================================

#[tokio::test]
async fn chaos_transient_failures_recover_after_two_retries() {
    init_tracing();
    let (manager, store) = flaky_manager(test_config());
    store.fail_next(Op::Insert, 2, StorageError::Unavailable("backend restarting".into()));

    let doc = manager.create("leads", lead("Sara Haddad"), WriteOptions::new()).await.unwrap();

    assert_eq!(store.calls(Op::Insert), 3);
    assert!(store.inner().get("leads", &doc.id).await.unwrap().is_some());
    assert_eq!(manager.retry_queue().pending(), 0);
}

#[tokio::test]
async fn chaos_retries_exhausted_after_three_attempts() {
    let (manager, store) = flaky_manager(test_config());
    store.fail_next(Op::Insert, 10, StorageError::Network("connection reset".into()));

    let err = manager.create("leads", lead("Sara Haddad"), WriteOptions::new()).await.unwrap_err();

    match &err {
        DataError::MaxRetriesExceeded { attempts, last_error, .. } => {
            assert_eq!(*attempts, 3);
            assert!(last_error.is_transient());
        }
        other => panic!("expected max retries, got {other:?}"),
    }
    assert!(err.to_string().contains("max retries exceeded"));
    assert_eq!(store.calls(Op::Insert), 3);
    assert!(store.inner().is_empty());
}

#[tokio::test]
async fn chaos_permission_error_not_retried() {
    let (manager, store) = flaky_manager(test_config());
    store.fail_next(Op::Query, 1, StorageError::PermissionDenied("rules rejected read".into()));

    let err = manager.list("leads", GetOptions::new()).await.unwrap_err();

    assert!(matches!(err, DataError::PermissionDenied(_)));
    assert_eq!(store.calls(Op::Query), 1);
}

#[tokio::test]
async fn chaos_retry_disabled_fails_fast() {
    let (manager, store) = flaky_manager(test_config());
    store.fail_next(Op::Get, 1, StorageError::Unavailable("blip".into()));

    let err = manager
        .get_document("leads", "a", GetOptions::new().no_retry())
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(store.calls(Op::Get), 1);
}

#[tokio::test(start_paused = true)]
async fn chaos_retry_spacing_is_linear() {
    let config = CrmDataConfig {
        retry_delay_ms: 1_000,
        ..test_config()
    };
    let (manager, store) = flaky_manager(config);
    store.fail_next(Op::Insert, 2, StorageError::Unavailable("blip".into()));

    let start = Instant::now();
    manager.create("leads", lead("Sara Haddad"), WriteOptions::new()).await.unwrap();
    let elapsed = start.elapsed();

    // 1s before the second attempt, 2s before the third
    assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn chaos_concurrent_failures_share_one_queue() {
    let (manager, store) = flaky_manager(test_config());
    store.fail_next(Op::Insert, 2, StorageError::DeadlineExceeded);

    let (a, b) = tokio::join!(
        manager.create("leads", lead("Aisha"), WriteOptions::new()),
        manager.create("leads", lead("Bilal"), WriteOptions::new()),
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(store.calls(Op::Insert), 4);
    assert_eq!(store.inner().collection_len("leads"), 2);
}

#[tokio::test]
async fn chaos_shutdown_cancels_queued_retry() {
    let config = CrmDataConfig {
        retry_delay_ms: 10_000,
        ..test_config()
    };
    let (manager, store) = flaky_manager(config);
    let manager = Arc::new(manager);
    store.fail_next(Op::Insert, 1, StorageError::Unavailable("blip".into()));

    let pending = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.create("leads", lead("Sara Haddad"), WriteOptions::new()).await })
    };
    while store.calls(Op::Insert) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.shutdown().await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, DataError::Cancelled(_)));
    assert_eq!(store.calls(Op::Insert), 1);
}

// =============================================================================
// Stalls
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_stalled_store_times_out() {
    let config = CrmDataConfig {
        request_timeout_ms: 500,
        ..test_config()
    };
    let (manager, store) = flaky_manager(config);
    store.set_stalled(true);

    let err = manager
        .create("leads", lead("Sara Haddad"), WriteOptions::new().no_retry())
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::Timeout { .. }));

    // With retries the timeout counts as transient and exhausts the budget
    let err = manager
        .get_document("leads", "a", GetOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::MaxRetriesExceeded { attempts: 3, .. }));
    assert_eq!(store.calls(Op::Get), 3);
}

#[tokio::test(start_paused = true)]
async fn chaos_stalled_store_fails_health_check() {
    let config = CrmDataConfig {
        request_timeout_ms: 200,
        ..test_config()
    };
    let (manager, store) = flaky_manager(config);
    store.set_stalled(true);

    let health = manager.health_check().await;
    assert!(!health.healthy);
    assert!(!health.store_connected);

    store.set_stalled(false);
    assert!(manager.health_check().await.healthy);
}

#[tokio::test(start_paused = true)]
async fn chaos_stalled_activity_writes_do_not_block_shutdown() {
    let config = CrmDataConfig {
        request_timeout_ms: 500,
        activity_log_enabled: true,
        log_validation_errors: true,
        ..test_config()
    };
    let (manager, store) = flaky_manager(config);
    store.set_stalled(true);

    // Rejected before the store; only the validation log write reaches it
    let mut bad = lead("Omar Khalil");
    bad.insert("phone".into(), "abc".into());
    let err = manager.create("leads", bad, WriteOptions::new()).await.unwrap_err();
    assert!(matches!(err, DataError::Validation(_)));

    let start = Instant::now();
    tokio::time::timeout(Duration::from_secs(3600), manager.shutdown())
        .await
        .expect("shutdown waited on a stalled log write");
    assert!(start.elapsed() <= Duration::from_millis(500));

    assert_eq!(manager.activity().failures(), 1);
    assert_eq!(manager.activity().written(), 0);
    assert_eq!(store.calls(Op::Insert), 1);
}

// =============================================================================
// Real-time listeners
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_listener_recovers_after_fault() {
    let (manager, store) = flaky_manager(test_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut state = manager.subscriptions().watch_state();

    manager
        .subscribe("leads", QueryOptions::new(), move |snapshot| {
            sink.lock().unwrap().push(snapshot.len());
        })
        .await
        .unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;

    store.inner().inject_listen_error("leads", StorageError::Unavailable("stream dropped".into()));
    wait_for_state(&mut state, ConnectionState::Reconnecting).await;
    assert_eq!(manager.subscriptions().reconnect_attempts(), 1);

    manager.create("leads", lead("Sara Haddad"), WriteOptions::new()).await.unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;

    assert_eq!(manager.subscriptions().reconnect_attempts(), 0);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn chaos_listener_gives_up_after_five_reconnects() {
    let (manager, store) = flaky_manager(test_config());
    let mut state = manager.subscriptions().watch_state();
    manager.subscribe("leads", QueryOptions::new(), |_| {}).await.unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;

    for _ in 0..6 {
        store.inner().inject_listen_error("leads", StorageError::Network("offline".into()));
    }
    wait_for_state(&mut state, ConnectionState::Failed).await;

    assert_eq!(manager.subscriptions().reconnect_attempts(), 6);
    assert!(!manager.health_check().await.healthy);

    // Deliveries resume on the same listener and clear the failure
    manager.create("leads", lead("Sara Haddad"), WriteOptions::new()).await.unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;
    assert_eq!(manager.subscriptions().reconnect_attempts(), 0);
    assert!(manager.health_check().await.healthy);
}

#[tokio::test(start_paused = true)]
async fn chaos_listener_delivers_during_reconnect_wait() {
    let config = CrmDataConfig {
        reconnect_base_delay_ms: 1000,
        ..test_config()
    };
    let (manager, store) = flaky_manager(config);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let mut state = manager.subscriptions().watch_state();
    manager
        .subscribe("leads", QueryOptions::new(), move |snapshot| {
            sink.lock().unwrap().push((snapshot.len(), Instant::now()));
        })
        .await
        .unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;

    for _ in 0..5 {
        store.inner().inject_listen_error("leads", StorageError::Network("offline".into()));
    }
    wait_for_state(&mut state, ConnectionState::Reconnecting).await;

    let written_at = Instant::now();
    manager.create("leads", lead("Sara Haddad"), WriteOptions::new()).await.unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;

    let (len, at) = *delivered.lock().unwrap().last().unwrap();
    assert_eq!(len, 1);
    assert!(at - written_at < Duration::from_secs(1));
    assert_eq!(manager.subscriptions().reconnect_attempts(), 0);
}

#[tokio::test]
async fn chaos_listen_failure_surfaces_to_caller() {
    let (manager, store) = flaky_manager(test_config());
    store.fail_next(Op::Listen, 1, StorageError::PermissionDenied("no listen".into()));

    let err = manager
        .subscribe("leads", QueryOptions::new(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::PermissionDenied(_)));
    assert!(manager.subscriptions().is_empty());

    // Nothing was registered, so a second attempt goes to the store
    manager
        .subscribe("leads", QueryOptions::new().where_eq("status", "newLead"), |_| {})
        .await
        .unwrap();
    assert_eq!(store.calls(Op::Listen), 2);
}
