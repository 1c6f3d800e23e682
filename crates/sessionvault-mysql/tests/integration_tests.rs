//! Integration tests for MySqlBackend using testcontainers
//!
//! These tests spin up real MySQL instances using Docker to exercise row
//! locks, named locks and the first-write race against a real server.

use sessionvault_core::{
    Error, LockMode, ManualClock, PoolConfig, SessionBackend, SessionConnection, SessionRecord,
    StoreConfig, StoreMetrics,
};
use sessionvault_mysql::MySqlBackend;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::mysql::Mysql;

const START: i64 = 1_700_000_000;

/// Helper to create a test MySQL container and backend
async fn create_test_backend(
    config: StoreConfig,
) -> (ContainerAsync<Mysql>, MySqlBackend, ManualClock) {
    create_test_backend_with_pool(config, PoolConfig::default().with_max_connections(5)).await
}

async fn create_test_backend_with_pool(
    config: StoreConfig,
    pool_config: PoolConfig,
) -> (ContainerAsync<Mysql>, MySqlBackend, ManualClock) {
    let container = Mysql::default()
        .start()
        .await
        .expect("Failed to start MySQL container");

    let host_port = container
        .get_host_port_ipv4(3306)
        .await
        .expect("Failed to get container port");

    let database_url = format!("mysql://root@127.0.0.1:{}/test", host_port);

    // Wait a moment for MySQL to be ready
    tokio::time::sleep(Duration::from_secs(2)).await;

    let clock = ManualClock::new(START);
    let backend = MySqlBackend::connect_with(&database_url, config, pool_config)
        .await
        .expect("Failed to create MySQL session backend")
        .with_clock(Arc::new(clock.clone()));

    backend
        .install_schema()
        .await
        .expect("Failed to create session table");

    (container, backend, clock)
}

async fn stored_expiry(backend: &MySqlBackend, id: &str) -> Option<i64> {
    sqlx::query_scalar("SELECT expiry FROM sessions WHERE sid = ?")
        .bind(id)
        .fetch_optional(backend.pool())
        .await
        .expect("Failed to query expiry")
}

async fn row_count(backend: &MySqlBackend, id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE sid = ?")
        .bind(id)
        .fetch_one(backend.pool())
        .await
        .expect("Failed to count rows")
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_install_schema_is_idempotent() {
    let (_container, backend, _clock) = create_test_backend(StoreConfig::default()).await;

    backend.install_schema().await.unwrap();
    assert!(backend.pool().size() > 0);
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_first_read_creates_record() {
    let (_container, backend, _clock) = create_test_backend(StoreConfig::default()).await;

    let mut store = backend.session().await.unwrap();
    let payload = store.read("abc").await.unwrap();
    assert!(payload.is_empty());
    store.close().await.unwrap();

    assert_eq!(stored_expiry(&backend, "abc").await, Some(START + 1440));
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_write_then_read_in_both_modes() {
    for mode in [LockMode::Transactional, LockMode::Advisory] {
        let config = StoreConfig::default().with_lock_mode(mode);
        let (_container, backend, clock) = create_test_backend(config).await;

        let mut store = backend.session().await.unwrap();
        store.read("abc").await.unwrap();
        store.write("abc", b"user=42").await.unwrap();
        assert!(!store.holds_lock());

        clock.advance(Duration::from_secs(10));
        let mut store = backend.session().await.unwrap();
        assert_eq!(store.read("abc").await.unwrap(), b"user=42".to_vec());
        store.close().await.unwrap();
    }
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_expired_record_reads_empty_until_collected() {
    let config = StoreConfig::default().with_max_lifetime(Duration::from_secs(60));
    let (_container, backend, clock) = create_test_backend(config).await;

    let mut store = backend.session().await.unwrap();
    store.read("abc").await.unwrap();
    store.write("abc", b"stale").await.unwrap();

    clock.advance(Duration::from_secs(120));
    let mut store = backend.session().await.unwrap();
    assert!(store.read("abc").await.unwrap().is_empty());
    store.close().await.unwrap();

    // Still inside the 300s grace period
    assert_eq!(backend.sweep().await.unwrap(), 0);
    assert_eq!(row_count(&backend, "abc").await, 1);

    clock.advance(Duration::from_secs(300));
    assert_eq!(backend.sweep().await.unwrap(), 1);
    assert_eq!(backend.sweep().await.unwrap(), 0);
    assert_eq!(row_count(&backend, "abc").await, 0);
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_destroy_removes_record() {
    let (_container, backend, _clock) = create_test_backend(StoreConfig::default()).await;

    let mut store = backend.session().await.unwrap();
    store.read("abc").await.unwrap();
    store.write("abc", b"data").await.unwrap();
    store.destroy("abc").await.unwrap();
    // Absent ids are fine
    store.destroy("abc").await.unwrap();

    assert_eq!(row_count(&backend, "abc").await, 0);
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_concurrent_reader_waits_for_writer() {
    for mode in [LockMode::Transactional, LockMode::Advisory] {
        let config = StoreConfig::default().with_lock_mode(mode);
        let (_container, backend, _clock) = create_test_backend(config).await;

        let mut first = backend.session().await.unwrap();
        first.read("abc").await.unwrap();

        let second_backend = backend.clone();
        let waiter = tokio::spawn(async move {
            let mut second = second_backend.session().await.unwrap();
            let payload = second.read("abc").await.unwrap();
            second.close().await.unwrap();
            payload
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!waiter.is_finished(), "second reader should be blocked");

        first.write("abc", b"from-first").await.unwrap();
        assert_eq!(waiter.await.unwrap(), b"from-first".to_vec());
    }
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_first_write_race_yields_one_record() {
    let metrics = StoreMetrics::new().unwrap();
    let (_container, backend, _clock) = create_test_backend(StoreConfig::default()).await;
    let backend = backend.with_metrics(metrics.clone());

    let mut first = backend.session().await.unwrap();
    assert!(first.read("fresh").await.unwrap().is_empty());

    // Depending on timing the second reader either blocks on the uncommitted
    // row or loses the insert and re-reads; both end with the winner's data.
    let second_backend = backend.clone();
    let waiter = tokio::spawn(async move {
        let mut second = second_backend.session().await.unwrap();
        let payload = second.read("fresh").await.unwrap();
        second.close().await.unwrap();
        payload
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    first.write("fresh", b"winner").await.unwrap();

    assert_eq!(waiter.await.unwrap(), b"winner".to_vec());
    assert_eq!(row_count(&backend, "fresh").await, 1);
    assert!(metrics.first_write_conflicts_total.get() <= 1);
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_lock_timeout_is_reported() {
    for mode in [LockMode::Transactional, LockMode::Advisory] {
        let config = StoreConfig::default()
            .with_lock_mode(mode)
            .with_lock_timeout(Duration::from_secs(1));
        let (_container, backend, _clock) = create_test_backend(config).await;

        let mut first = backend.session().await.unwrap();
        first.read("abc").await.unwrap();

        let mut second = backend.session().await.unwrap();
        let result = second.read("abc").await;
        assert!(
            matches!(result, Err(Error::LockTimeout(_))),
            "expected lock timeout, got {:?}",
            result
        );
        assert!(!second.holds_lock());

        first.close().await.unwrap();
        second.read("abc").await.unwrap();
        second.close().await.unwrap();
    }
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_dropped_store_frees_lock() {
    let config = StoreConfig::default()
        .with_lock_mode(LockMode::Advisory)
        .with_lock_timeout(Duration::from_secs(2));
    let (_container, backend, _clock) = create_test_backend(config).await;

    let mut abandoned = backend.session().await.unwrap();
    abandoned.read("abc").await.unwrap();
    drop(abandoned);

    let mut store = backend.session().await.unwrap();
    store.read("abc").await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_write_never_lowers_expiry() {
    let (_container, backend, clock) = create_test_backend(StoreConfig::default()).await;

    clock.set(START + 1000);
    let mut store = backend.session().await.unwrap();
    store.read("abc").await.unwrap();
    store.write("abc", b"late").await.unwrap();

    // A request with a lagging clock writes after it
    clock.set(START);
    let mut store = backend.session().await.unwrap();
    store.read("abc").await.unwrap();
    store.write("abc", b"early").await.unwrap();

    assert_eq!(stored_expiry(&backend, "abc").await, Some(START + 1000 + 1440));
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_duplicate_insert_is_a_conflict() {
    let (_container, backend, _clock) = create_test_backend(StoreConfig::default()).await;

    let mut conn = backend.connection().await.unwrap();
    conn.insert(&SessionRecord::new("dup", START)).await.unwrap();

    let result = conn.insert(&SessionRecord::new("dup", START + 10)).await;
    assert!(
        matches!(result, Err(Error::Conflict(_))),
        "expected conflict, got {:?}",
        result
    );
    assert_eq!(stored_expiry(&backend, "dup").await, Some(START));
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_large_payload_round_trip() {
    let (_container, backend, _clock) = create_test_backend(StoreConfig::default()).await;
    // Larger than a plain BLOB column can hold
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

    let mut store = backend.session().await.unwrap();
    store.read("big").await.unwrap();
    store.write("big", &payload).await.unwrap();

    let mut store = backend.session().await.unwrap();
    assert_eq!(store.read("big").await.unwrap(), payload);
    store.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Docker with proper networking configuration
async fn test_lock_wait_timeout_reset_after_request() {
    let config = StoreConfig::default().with_lock_timeout(Duration::from_secs(3));
    // One connection, so the follow-up query reuses the request's connection
    let (_container, backend, _clock) = create_test_backend_with_pool(
        config,
        PoolConfig::default()
            .with_max_connections(1)
            .with_min_connections(1),
    )
    .await;

    let mut store = backend.session().await.unwrap();
    store.read("abc").await.unwrap();
    store.write("abc", b"data").await.unwrap();
    drop(store);

    let mut store = backend.session().await.unwrap();
    store.read("abc").await.unwrap();
    store.close().await.unwrap();
    drop(store);

    let matches_global: i64 = sqlx::query_scalar(
        "SELECT @@SESSION.innodb_lock_wait_timeout = @@GLOBAL.innodb_lock_wait_timeout",
    )
    .fetch_one(backend.pool())
    .await
    .expect("Failed to query lock wait timeout");
    assert_eq!(matches_global, 1);
}
