//! Session state storage keyed by session token.
//!
//! Entries expire after a period of inactivity: every successful [`SessionStore::get`]
//! pushes the expiry forward by the configured TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use super::token::SessionToken;
use crate::accounts::Principal;
use crate::error::StoreError;

/// Data kept for an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub begin_time: DateTime<Utc>,
    pub principal: Principal,
}

impl SessionState {
    /// State for a session starting now.
    pub fn begin(principal: Principal) -> Self {
        Self {
            begin_time: Utc::now(),
            principal,
        }
    }
}

/// TTL-backed key/value storage for [`SessionState`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store `state` under the token, setting or refreshing its TTL.
    async fn save(&self, token: &SessionToken, state: &SessionState) -> Result<(), StoreError>;

    /// Load the state and reset its TTL.
    async fn get(&self, token: &SessionToken) -> Result<SessionState, StoreError>;

    /// Remove the state. Deleting an absent entry succeeds.
    async fn delete(&self, token: &SessionToken) -> Result<(), StoreError>;
}

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl RedisSessionStore {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self {
            conn,
            ttl_secs: ttl.as_secs().max(1),
        }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save(&self, token: &SessionToken, state: &SessionState) -> Result<(), StoreError> {
        use redis::AsyncCommands;

        let value = serde_json::to_string(state)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(token.store_key(), value, self.ttl_secs).await?;
        Ok(())
    }

    async fn get(&self, token: &SessionToken) -> Result<SessionState, StoreError> {
        let key = token.store_key();
        let mut conn = self.conn.clone();

        // GET and EXPIRE in one round trip.
        let (value, _refreshed): (Option<String>, bool) = redis::pipe()
            .get(&key)
            .expire(&key, i64::try_from(self.ttl_secs).unwrap_or(i64::MAX))
            .query_async(&mut conn)
            .await?;

        let value = value.ok_or(StoreError::NotFound)?;
        Ok(serde_json::from_str(&value)?)
    }

    async fn delete(&self, token: &SessionToken) -> Result<(), StoreError> {
        use redis::AsyncCommands;

        let mut conn = self.conn.clone();
        let _: i64 = conn.del(token.store_key()).await?;
        Ok(())
    }
}

/// In-process store for tests and local development.
///
/// Values are kept as JSON so that both backends share the same
/// (de)serialization behaviour.
#[derive(Debug)]
pub struct MemorySessionStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, token: &SessionToken, state: &SessionState) -> Result<(), StoreError> {
        let value = serde_json::to_string(state)?;
        self.entries
            .lock()
            .insert(token.store_key(), (value, Instant::now() + self.ttl));
        Ok(())
    }

    async fn get(&self, token: &SessionToken) -> Result<SessionState, StoreError> {
        let key = token.store_key();
        let now = Instant::now();

        let value = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&key) {
                Some((value, expires)) if *expires > now => {
                    *expires = now + self.ttl;
                    value.clone()
                }
                Some(_) => {
                    entries.remove(&key);
                    return Err(StoreError::NotFound);
                }
                None => return Err(StoreError::NotFound),
            }
        };

        Ok(serde_json::from_str(&value)?)
    }

    async fn delete(&self, token: &SessionToken) -> Result<(), StoreError> {
        self.entries.lock().remove(&token.store_key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const KEY: &str = "store test key";

    fn principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            email: "someone@example.com".into(),
            user_name: "someone".into(),
            first_name: "Some".into(),
            last_name: "One".into(),
            photo_url: "https://www.gravatar.com/avatar/abc".into(),
        }
    }

    #[tokio::test]
    async fn test_save_get_delete() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let token = SessionToken::new(KEY).unwrap();
        let state = SessionState::begin(principal());

        store.save(&token, &state).await.unwrap();
        assert_eq!(store.get(&token).await.unwrap(), state);

        store.delete(&token).await.unwrap();
        assert!(matches!(store.get(&token).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let token = SessionToken::new(KEY).unwrap();
        assert!(store.delete(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let token = SessionToken::new(KEY).unwrap();
        let mut state = SessionState::begin(principal());
        store.save(&token, &state).await.unwrap();

        state.principal.first_name = "Changed".into();
        store.save(&token, &state).await.unwrap();

        assert_eq!(
            store.get(&token).await.unwrap().principal.first_name,
            "Changed"
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemorySessionStore::new(Duration::from_millis(50));
        let token = SessionToken::new(KEY).unwrap();
        store
            .save(&token, &SessionState::begin(principal()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(matches!(store.get(&token).await, Err(StoreError::NotFound)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_get_slides_expiry() {
        let store = MemorySessionStore::new(Duration::from_millis(200));
        let token = SessionToken::new(KEY).unwrap();
        store
            .save(&token, &SessionState::begin(principal()))
            .await
            .unwrap();

        // Each read lands inside the window and pushes it forward.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(store.get(&token).await.is_ok());
        }
    }

    #[test]
    fn test_state_json_shape() {
        let state = SessionState::begin(principal());
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("beginTime").is_some());
        assert!(json["principal"].get("userName").is_some());
    }
}
