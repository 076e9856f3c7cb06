//! 分布式锁行为测试
//!
//! 使用进程内存储验证互斥、安全释放、过期回收与等待超时等性质。
//! 每个 `LockManager` 代表一个独立进程，它们共享同一个 `InMemoryStore`。

use dlock::{InMemoryStore, KeyTtl, LockManager, LockToken, StoreAdapter};
use dlock_shared::observability::tracing::init_for_tests;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

// ==================== 辅助函数 ====================

fn actor(store: &InMemoryStore) -> LockManager<InMemoryStore> {
    LockManager::with_defaults(Arc::new(store.clone()))
}

/// 断言等待时长落在 [timeout, timeout + 一个轮询间隔] 内（再留 1ms 计时余量）
fn assert_waited(elapsed: Duration, timeout: Duration) {
    assert!(elapsed >= timeout, "returned early: {elapsed:?} < {timeout:?}");
    assert!(
        elapsed <= timeout + POLL_INTERVAL + Duration::from_millis(1),
        "returned late: {elapsed:?}"
    );
}

// ==================== 场景测试 ====================

#[tokio::test(start_paused = true)]
async fn test_contend_release_reacquire_scenario() {
    init_for_tests();
    let store = InMemoryStore::new();
    let a = actor(&store);
    let b = actor(&store);
    let ttl = Duration::from_millis(5000);

    let t1 = a
        .acquire_lock_with_timeout("job", Duration::from_millis(2000), ttl)
        .await
        .unwrap()
        .expect("A should acquire a free lock");

    let started = Instant::now();
    let contended = b
        .acquire_lock_with_timeout("job", Duration::from_millis(100), ttl)
        .await
        .unwrap();
    assert!(contended.is_none());
    assert_waited(started.elapsed(), Duration::from_millis(100));
    assert_eq!(
        store.get("lock:job").await.unwrap().as_deref(),
        Some(t1.as_str())
    );

    assert!(a.release_lock("job", &t1).await.unwrap());
    assert_eq!(store.get("lock:job").await.unwrap(), None);

    let t2 = b
        .acquire_lock_with_timeout("job", Duration::from_millis(100), ttl)
        .await
        .unwrap()
        .expect("B should acquire after release");
    assert_ne!(t1, t2);
}

// ==================== 等待超时 ====================

#[tokio::test(start_paused = true)]
async fn test_timeout_bound_against_non_expiring_lock() {
    let store = InMemoryStore::new();
    let holder = actor(&store);
    let waiter = actor(&store);

    let _token = holder.acquire_lock("resource").await.unwrap().unwrap();

    for timeout in [Duration::from_millis(1), Duration::from_millis(250), Duration::from_secs(3)] {
        let started = Instant::now();
        let result = waiter
            .acquire_lock_with_wait("resource", timeout)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_waited(started.elapsed(), timeout);
    }
}

#[tokio::test(start_paused = true)]
async fn test_default_wait_is_ten_seconds() {
    let store = InMemoryStore::new();
    let holder = actor(&store);
    let waiter = actor(&store);

    let _token = holder.acquire_lock("resource").await.unwrap().unwrap();

    let started = Instant::now();
    assert!(waiter.acquire_lock("resource").await.unwrap().is_none());
    assert_waited(started.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_wait_acquires_free_lock() {
    let store = InMemoryStore::new();
    let manager = actor(&store);

    let token = manager
        .acquire_lock_with_wait("job", Duration::MAX)
        .await
        .unwrap();
    assert!(token.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_wait_outlasts_expiring_holder() {
    let store = InMemoryStore::new();
    let holder = actor(&store);
    let waiter = actor(&store);
    let ttl = Duration::from_millis(200);

    let _token = holder
        .acquire_lock_with_timeout("job", Duration::ZERO, ttl)
        .await
        .unwrap()
        .unwrap();

    let started = Instant::now();
    let token = waiter
        .acquire_lock_with_timeout("job", Duration::MAX, Duration::MAX)
        .await
        .unwrap();
    assert!(token.is_some());
    assert!(started.elapsed() >= ttl);
}

// ==================== 过期回收 ====================

#[tokio::test(start_paused = true)]
async fn test_expired_lock_becomes_acquirable() {
    let store = InMemoryStore::new();
    let crashed = actor(&store);
    let survivor = actor(&store);
    let ttl = Duration::from_millis(500);

    let t1 = crashed
        .acquire_lock_with_timeout("job", Duration::ZERO, ttl)
        .await
        .unwrap()
        .unwrap();

    // 持有者从未释放；等待者在 TTL 到期后获得锁
    let started = Instant::now();
    let t2 = survivor
        .acquire_lock_with_timeout("job", Duration::from_secs(2), ttl)
        .await
        .unwrap()
        .expect("lock should be free once the TTL elapsed");
    let waited = started.elapsed();
    assert!(waited >= ttl, "acquired before expiry: {waited:?}");
    assert!(waited <= ttl + Duration::from_millis(5), "waited {waited:?}");

    // 过期的持有者再释放时必须失败，且不能删掉新持有者的记录
    assert!(!crashed.release_lock("job", &t1).await.unwrap());
    assert_eq!(
        survivor.current_holder("job").await.unwrap().as_deref(),
        Some(t2.as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn test_lock_ttl_inspection() {
    let store = InMemoryStore::new();
    let manager = actor(&store);

    assert_eq!(manager.lock_ttl("a").await.unwrap(), KeyTtl::Missing);

    let plain = manager.acquire_lock("a").await.unwrap().unwrap();
    assert_eq!(manager.lock_ttl("a").await.unwrap(), KeyTtl::Persistent);

    let _expiring = manager
        .acquire_lock_with_timeout("b", Duration::ZERO, Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(
        manager.lock_ttl("b").await.unwrap(),
        KeyTtl::Expires(Duration::from_secs(20))
    );

    assert!(manager.release_lock("a", &plain).await.unwrap());
    assert_eq!(manager.lock_ttl("a").await.unwrap(), KeyTtl::Missing);
}

// ==================== 安全释放 ====================

#[tokio::test]
async fn test_foreign_token_cannot_release() {
    let store = InMemoryStore::new();
    let owner = actor(&store);
    let intruder = actor(&store);

    let token = owner.acquire_lock("job").await.unwrap().unwrap();

    let forged = LockToken::from_raw("intruder:not-the-token");
    assert!(!intruder.release_lock("job", &forged).await.unwrap());
    assert_eq!(
        owner.current_holder("job").await.unwrap().as_deref(),
        Some(token.as_str())
    );

    // 令牌本身就是所有权证明，与由哪个管理器发起释放无关
    assert!(intruder.release_lock("job", &token).await.unwrap());
}

#[tokio::test]
async fn test_double_release_succeeds_once() {
    let store = InMemoryStore::new();
    let manager = actor(&store);

    let token = manager.acquire_lock("job").await.unwrap().unwrap();
    assert!(manager.release_lock("job", &token).await.unwrap());
    assert!(!manager.release_lock("job", &token).await.unwrap());
}

#[tokio::test]
async fn test_release_of_never_held_lock() {
    let store = InMemoryStore::new();
    let manager = actor(&store);

    let token = LockToken::from_raw("instance:t1");
    assert!(!manager.release_lock("never-held", &token).await.unwrap());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_locks_with_different_names_are_independent() {
    let store = InMemoryStore::new();
    let manager = actor(&store);

    let a = manager.try_acquire_lock("a", None).await.unwrap();
    let b = manager.try_acquire_lock("b", None).await.unwrap();
    assert!(a.is_some());
    assert!(b.is_some());
    assert!(manager.try_acquire_lock("a", None).await.unwrap().is_none());
}

// ==================== 互斥 ====================

#[tokio::test(start_paused = true)]
async fn test_simultaneous_attempts_have_single_winner() {
    let store = InMemoryStore::new();
    let attempts = (0..16).map(|_| {
        let manager = actor(&store);
        async move {
            manager
                .try_acquire_lock("job", Some(Duration::from_secs(5)))
                .await
                .unwrap()
        }
    });

    let results = futures::future::join_all(attempts).await;
    assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_under_contention() {
    const ACTORS: usize = 8;
    const ROUNDS: usize = 5;

    let store = InMemoryStore::new();
    let in_critical = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..ACTORS)
        .map(|_| {
            let manager = actor(&store);
            let in_critical = Arc::clone(&in_critical);
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                for _ in 0..ROUNDS {
                    let token = manager
                        .acquire_lock_with_wait("shared", Duration::from_secs(10))
                        .await
                        .unwrap()
                        .expect("lock should eventually be acquired");

                    let holders = in_critical.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(holders, 0, "two actors inside the critical section");
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    in_critical.fetch_sub(1, Ordering::SeqCst);

                    assert!(manager.release_lock("shared", &token).await.unwrap());
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        result.expect("actor task panicked");
    }
    assert_eq!(completed.load(Ordering::SeqCst), ACTORS * ROUNDS);
    assert!(store.is_empty());
}

// ==================== 取消 ====================

#[tokio::test(start_paused = true)]
async fn test_abandoned_acquire_leaves_no_state() {
    let store = InMemoryStore::new();
    let holder = actor(&store);
    let waiter = actor(&store);

    let token = holder.acquire_lock("job").await.unwrap().unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        waiter.acquire_lock_with_wait("job", Duration::from_secs(10)),
    )
    .await;
    assert!(abandoned.is_err());

    assert!(holder.release_lock("job", &token).await.unwrap());
    assert!(store.is_empty());
}
