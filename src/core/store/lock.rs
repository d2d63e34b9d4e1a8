use chrono::{Duration, Utc};
use rusqlite::{Connection, params};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out acquiring lock '{0}'")]
    Timeout(String),
    #[error("lock store error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Mutual exclusion keyed by conversation id, built on the shared SQLite
/// store. A lock row auto-expires so a crashed holder cannot deadlock the
/// key. Release is unconditional: a holder that outlives its TTL can have
/// its lock released by a later legitimate holder. Accepted race; the TTL
/// is kept well above the expected critical-section duration.
pub struct LockManager {
    conn: Arc<Mutex<Connection>>,
}

impl LockManager {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Non-blocking "set if not present with expiry". Returns false when the
    /// key is currently held. Atomic under the connection mutex.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        let conn = self.conn.lock().await;
        let now = Utc::now();
        let holder = uuid::Uuid::new_v4().to_string();
        let changed = conn.execute(
            "INSERT INTO locks (key, holder, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 holder = excluded.holder,
                 expires_at = excluded.expires_at
             WHERE locks.expires_at <= ?4",
            params![key, holder, (now + ttl).to_rfc3339(), now.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Unconditional delete.
    pub async fn release(&self, key: &str) -> Result<(), LockError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM locks WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Poll `acquire` up to `max_attempts` times, run the critical section,
    /// and release on every exit path. Fails with `LockError::Timeout` when
    /// the attempts are exhausted without acquiring.
    pub async fn with_lock<F, Fut, T>(
        &self,
        key: &str,
        ttl: Duration,
        poll_interval: std::time::Duration,
        max_attempts: u32,
        section: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut acquired = false;
        for attempt in 0..max_attempts {
            if self.acquire(key, ttl).await? {
                acquired = true;
                break;
            }
            if attempt + 1 < max_attempts {
                tokio::time::sleep(poll_interval).await;
            }
        }
        if !acquired {
            return Err(LockError::Timeout(key.to_string()));
        }

        let out = section().await;

        if let Err(e) = self.release(key).await {
            warn!("Failed to release lock '{}': {}", key, e);
        }
        Ok(out)
    }

    #[cfg(test)]
    pub async fn force_expire(&self, key: &str) {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE locks SET expires_at = ?1 WHERE key = ?2",
            params![(Utc::now() - Duration::seconds(1)).to_rfc3339(), key],
        )
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_database;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn manager() -> LockManager {
        LockManager::new(test_database().conn())
    }

    #[tokio::test]
    async fn acquire_is_exclusive_per_key() {
        let locks = manager();
        assert!(locks.acquire("c1", Duration::seconds(30)).await.unwrap());
        assert!(!locks.acquire("c1", Duration::seconds(30)).await.unwrap());
        // A different key is unaffected.
        assert!(locks.acquire("c2", Duration::seconds(30)).await.unwrap());
    }

    #[tokio::test]
    async fn release_allows_reacquire() {
        let locks = manager();
        assert!(locks.acquire("c1", Duration::seconds(30)).await.unwrap());
        locks.release("c1").await.unwrap();
        assert!(locks.acquire("c1", Duration::seconds(30)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_taken_over() {
        let locks = manager();
        assert!(locks.acquire("c1", Duration::seconds(30)).await.unwrap());
        locks.force_expire("c1").await;
        assert!(locks.acquire("c1", Duration::seconds(30)).await.unwrap());
    }

    #[tokio::test]
    async fn with_lock_releases_after_the_section() {
        let locks = manager();
        let out = locks
            .with_lock(
                "c1",
                Duration::seconds(30),
                std::time::Duration::from_millis(5),
                3,
                || async { 7 },
            )
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert!(locks.acquire("c1", Duration::seconds(30)).await.unwrap());
    }

    #[tokio::test]
    async fn with_lock_times_out_when_held() {
        let locks = manager();
        assert!(locks.acquire("c1", Duration::seconds(30)).await.unwrap());
        let result = locks
            .with_lock(
                "c1",
                Duration::seconds(30),
                std::time::Duration::from_millis(1),
                3,
                || async { () },
            )
            .await;
        assert!(matches!(result, Err(LockError::Timeout(_))));
    }

    #[tokio::test]
    async fn concurrent_sections_never_overlap() {
        let db = test_database();
        let locks = Arc::new(LockManager::new(db.conn()));
        let in_section = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let locks = locks.clone();
            let in_section = in_section.clone();
            let overlaps = overlaps.clone();
            let completed = completed.clone();
            handles.push(tokio::spawn(async move {
                locks
                    .with_lock(
                        "c1",
                        Duration::seconds(30),
                        std::time::Duration::from_millis(5),
                        200,
                        || async {
                            if in_section.swap(true, Ordering::SeqCst) {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            in_section.store(false, Ordering::SeqCst);
                            completed.fetch_add(1, Ordering::SeqCst);
                        },
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(completed.load(Ordering::SeqCst), 2);
        // Both prior holders released; a third acquisition succeeds at once.
        assert!(locks.acquire("c1", Duration::seconds(30)).await.unwrap());
    }
}
