use std::sync::Arc;
use std::time::Duration;

use pg_savepoint::prelude::*;
use pg_savepoint::test_utils::MemoryConnector;

fn registry() -> (PoolRegistry, PoolKey) {
    (PoolRegistry::new(), PoolKey::new("test_user", "localhost", "test_db"))
}

fn pooled(
    registry: &PoolRegistry,
    key: &PoolKey,
    connector: &MemoryConnector,
) -> ConnectionHandle {
    registry
        .pooled_with(key.clone(), 4, Arc::new(connector.clone()))
        .unwrap()
}

#[tokio::test]
async fn handles_with_same_identity_share_one_pool() {
    let connector = MemoryConnector::new();
    let (registry, key) = registry();
    let a = pooled(&registry, &key, &connector);
    let b = pooled(&registry, &key, &connector);

    let pa = a.pool().await.unwrap();
    let pb = b.pool().await.unwrap();
    assert!(pa.same_as(&pb));
    assert_eq!(registry.len(), 1);

    a.execute(&Statement::raw("SELECT 1")).await.unwrap();
    b.execute(&Statement::raw("SELECT 2")).await.unwrap();
    assert_eq!(pa.status().size, 2);
}

#[tokio::test]
async fn handle_keeps_one_connection_until_close() {
    let connector = MemoryConnector::new();
    let (registry, key) = registry();
    let handle = pooled(&registry, &key, &connector);

    for _ in 0..5 {
        handle.execute(&Statement::raw("SELECT 1")).await.unwrap();
    }
    let pool = handle.pool().await.unwrap();
    assert_eq!(connector.connects(), 1);
    assert_eq!(pool.status().available, 0);

    handle.close(false).await;
    assert_eq!(pool.status().available, 1);
    // Returned, not terminated.
    assert_eq!(connector.ended(), 0);
    assert_eq!(connector.live_links(), 1);
}

#[tokio::test]
async fn unforced_close_keeps_the_shared_pool() {
    let connector = MemoryConnector::new();
    let (registry, key) = registry();
    let a = pooled(&registry, &key, &connector);
    let b = pooled(&registry, &key, &connector);
    a.connect().await.unwrap();
    b.connect().await.unwrap();

    a.close(false).await;
    let pool = b.pool().await.unwrap();
    assert!(!pool.is_closed());
    assert!(registry.get(&key).is_some());

    // The returned connection is reused.
    a.execute(&Statement::raw("SELECT 1")).await.unwrap();
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn forced_close_shuts_down_and_unregisters_the_pool() {
    let connector = MemoryConnector::new();
    let (registry, key) = registry();
    let a = pooled(&registry, &key, &connector);
    let b = pooled(&registry, &key, &connector);
    a.connect().await.unwrap();
    let old = a.pool().await.unwrap();

    a.close(true).await;
    assert!(old.is_closed());
    assert!(registry.is_empty());
    assert_eq!(connector.live_links(), 0);

    // Both handles transparently move to a fresh pool.
    b.execute(&Statement::raw("SELECT 1")).await.unwrap();
    a.execute(&Statement::raw("SELECT 2")).await.unwrap();
    let fresh = registry.get(&key).unwrap();
    assert!(!fresh.same_as(&old));
    assert!(a.pool().await.unwrap().same_as(&fresh));
    assert!(b.pool().await.unwrap().same_as(&fresh));
}

#[tokio::test]
async fn closing_with_open_transaction_rolls_back_before_returning() {
    let connector = MemoryConnector::new();
    let (registry, key) = registry();
    let handle = pooled(&registry, &key, &connector);
    let token = handle.begin().await.unwrap();
    handle.close(false).await;

    assert_eq!(connector.statements(), ["BEGIN", "ROLLBACK"]);
    assert!(handle.commit(&token).await.unwrap_err().is_invalid_transaction());
}

#[tokio::test]
async fn pool_reports_connection_faults() {
    let connector = MemoryConnector::new();
    let (registry, key) = registry();
    let handle = pooled(&registry, &key, &connector);
    handle.connect().await.unwrap();
    let mut pool_events = handle.pool().await.unwrap().subscribe();
    let mut handle_events = handle.subscribe();

    connector.kill_all();

    let fault = tokio::time::timeout(Duration::from_secs(1), pool_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fault.pool, key);
    assert_eq!(fault.message, "terminating connection");

    let event = tokio::time::timeout(Duration::from_secs(1), handle_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ConnectionEvent::Error(_)));

    // The dead connection is discarded and a new one borrowed.
    handle.execute(&Statement::raw("SELECT 1")).await.unwrap();
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn waiting_handles_get_connections_as_others_close() {
    let connector = MemoryConnector::new();
    let (registry, key) = registry();
    let mut tasks = Vec::new();
    for i in 0..8i64 {
        let handle = registry
            .pooled_with(key.clone(), 2, Arc::new(connector.clone()))
            .unwrap();
        tasks.push(tokio::spawn(async move {
            handle
                .query("SELECT $1::bigint", &[SqlValue::Int(i)])
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.close(false).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert!(connector.connects() <= 2);
    assert_eq!(connector.statements().len(), 8);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn dropped_handle_transaction_is_rolled_back_before_reuse() {
    let connector = MemoryConnector::new();
    let (registry, key) = registry();
    let single = |c: &MemoryConnector| {
        registry
            .pooled_with(key.clone(), 1, Arc::new(c.clone()))
            .unwrap()
    };

    let a = single(&connector);
    a.begin().await.unwrap();
    a.update("t", [("a", 1i64)], true).await.unwrap();
    drop(a);

    let b = single(&connector);
    let token = b.begin().await.unwrap();
    b.commit(&token).await.unwrap();

    assert_eq!(connector.connects(), 1);
    assert_eq!(
        connector.statements(),
        [
            "BEGIN",
            r#"UPDATE "t" SET "a" = $1"#,
            "ROLLBACK",
            "BEGIN",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn connection_that_cannot_be_rolled_back_is_discarded() {
    let connector = MemoryConnector::new();
    let (registry, key) = registry();
    let a = pooled(&registry, &key, &connector);
    a.begin().await.unwrap();
    drop(a);

    connector.fail_on("ROLLBACK");
    let b = pooled(&registry, &key, &connector);
    b.execute(&Statement::raw("SELECT 1")).await.unwrap();
    assert_eq!(connector.connects(), 2);
    assert_eq!(connector.live_links(), 1);
}

#[tokio::test]
async fn finished_transactions_do_not_trigger_rollback_on_reuse() {
    let connector = MemoryConnector::new();
    let (registry, key) = registry();
    let a = pooled(&registry, &key, &connector);
    let token = a.begin().await.unwrap();
    a.commit(&token).await.unwrap();
    let token = a.begin().await.unwrap();
    a.rollback(&token).await.unwrap();
    drop(a);

    let b = pooled(&registry, &key, &connector);
    b.execute(&Statement::raw("SELECT 1")).await.unwrap();
    assert_eq!(
        connector.statements(),
        ["BEGIN", "COMMIT", "BEGIN", "ROLLBACK", "SELECT 1"]
    );
}

#[tokio::test]
async fn pooled_commit_after_server_drop_reports_lost_work() {
    let connector = MemoryConnector::new();
    let (registry, key) = registry();
    let handle = pooled(&registry, &key, &connector);
    let token = handle.begin().await.unwrap();
    connector.kill_all();

    let err = handle.commit(&token).await.unwrap_err();
    assert!(matches!(err, SqlSavepointError::ConnectionError(_)));
    assert!(!connector.statements().contains(&"COMMIT".to_string()));
    assert_eq!(handle.transaction_depth().await, 0);

    handle.execute(&Statement::raw("SELECT 1")).await.unwrap();
    assert_eq!(connector.connects(), 2);
}
