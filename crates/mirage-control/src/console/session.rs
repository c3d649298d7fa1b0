//! In-memory console sessions.
//!
//! Tokens live only in this process; a restart logs everyone out. Entries
//! have a fixed lifetime from issue and are never refreshed on read.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// What a session token resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEntry {
    pub user_id: i64,
}

#[derive(Default)]
pub struct SessionCache {
    entries: RwLock<HashMap<String, (SessionEntry, Instant)>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry` under `token` until `ttl` from now.
    pub async fn insert(&self, token: String, entry: SessionEntry, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries.write().await.insert(token, (entry, expires_at));
    }

    /// Create a fresh random token for `user_id`.
    pub async fn issue(&self, user_id: i64, ttl: Duration) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.insert(token.clone(), SessionEntry { user_id }, ttl).await;
        token
    }

    /// Raw lookup, including entries that have already expired.
    pub async fn get_with_expiration(&self, token: &str) -> Option<(SessionEntry, Instant)> {
        self.entries.read().await.get(token).copied()
    }

    /// The entry for `token` if present and not yet expired.
    ///
    /// An entry whose expiry equals the current instant is already invalid.
    pub async fn resolve(&self, token: &str) -> Option<SessionEntry> {
        let (entry, expires_at) = self.get_with_expiration(token).await?;
        (expires_at > Instant::now()).then_some(entry)
    }

    pub async fn remove(&self, token: &str) -> bool {
        self.entries.write().await.remove(token).is_some()
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, remaining = entries.len(), "Purged expired console sessions");
        }
        purged
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn valid_until_exact_expiry() {
        let cache = SessionCache::new();
        let token = cache.issue(7, TTL).await;

        assert_eq!(cache.resolve(&token).await, Some(SessionEntry { user_id: 7 }));

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert!(cache.resolve(&token).await.is_some());

        // expires_at == now is no longer valid.
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.resolve(&token).await.is_none());
        // The raw entry is still there until purged.
        assert!(cache.get_with_expiration(&token).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reads_do_not_extend_lifetime() {
        let cache = SessionCache::new();
        cache
            .insert("t".into(), SessionEntry { user_id: 1 }, TTL)
            .await;
        let (_, first) = cache.get_with_expiration("t").await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        cache.resolve("t").await.unwrap();
        let (_, second) = cache.get_with_expiration("t").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let cache = SessionCache::new();
        cache
            .insert("short".into(), SessionEntry { user_id: 1 }, Duration::from_secs(5))
            .await;
        cache
            .insert("long".into(), SessionEntry { user_id: 2 }, TTL)
            .await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.resolve("long").await.is_some());
    }

    #[tokio::test]
    async fn unknown_and_removed_tokens_do_not_resolve() {
        let cache = SessionCache::new();
        assert!(cache.resolve("nope").await.is_none());

        let token = cache.issue(3, TTL).await;
        assert!(cache.remove(&token).await);
        assert!(!cache.remove(&token).await);
        assert!(cache.resolve(&token).await.is_none());
    }

    #[tokio::test]
    async fn issued_tokens_are_unique() {
        let cache = SessionCache::new();
        let a = cache.issue(1, TTL).await;
        let b = cache.issue(1, TTL).await;
        assert_ne!(a, b);
        assert_eq!(cache.len().await, 2);
    }
}
