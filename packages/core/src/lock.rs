//! Distributed lock contract consumed by the scheduler and the drivers.
//!
//! The core never owns lock storage. It only orchestrates calls against a
//! [`LockProvider`], which every driver must be able to create for its
//! own backing store. [`MemoryLockProvider`] is the process-local store
//! used by the in-process driver and by standalone schedulers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use ulid::Ulid;

use crate::error::LockError;

/// Prefix of every scheduler lock key.
pub const LOCK_KEY_PREFIX: &str = "queue:schedule";

/// Future returned by lock operations.
pub type LockFuture<'a, T> = BoxFuture<'a, Result<T, LockError>>;

/// Derive the lock key for a task name. Stable across processes.
pub fn lock_key(name: &str) -> String {
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    format!("{}:{}", LOCK_KEY_PREFIX, &digest[..8])
}

/// Transferable form of a held lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedLock {
    pub key: String,
    /// Ownership token; whoever restores it becomes the holder.
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    /// Remaining time snapshot taken when the lock was serialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}

impl SerializedLock {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// A single named lock handle.
pub trait Lock: Send + Sync {
    fn key(&self) -> &str;

    /// Validity of the lock once acquired; `None` never expires.
    fn ttl(&self) -> Option<Duration>;

    /// Try to take the lock without waiting. Re-acquiring a lock this
    /// owner already holds succeeds.
    fn acquire_immediately(&self) -> LockFuture<'_, bool>;

    /// Reset the remaining time to `ttl` (or the lock's own TTL).
    fn extend(&self, ttl: Option<Duration>) -> LockFuture<'_, ()>;

    /// Release the lock regardless of the current owner.
    fn force_release(&self) -> LockFuture<'_, ()>;

    fn serialize(&self) -> SerializedLock;

    /// Time left before expiry as last observed by this handle.
    fn remaining_time(&self) -> Option<Duration>;
}

/// Factory for locks bound to one backing store.
pub trait LockProvider: Send + Sync {
    fn create_lock(&self, key: &str, ttl: Option<Duration>) -> Arc<dyn Lock>;

    fn restore_lock(&self, serialized: &SerializedLock) -> Result<Arc<dyn Lock>, LockError>;
}

#[derive(Debug, Clone)]
struct Entry {
    owner: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

/// In-process lock store shared by every lock it creates.
#[derive(Clone, Default)]
pub struct MemoryLockProvider {
    entries: Entries,
}

impl MemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held by anyone.
    pub fn is_locked(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }
}

impl LockProvider for MemoryLockProvider {
    fn create_lock(&self, key: &str, ttl: Option<Duration>) -> Arc<dyn Lock> {
        Arc::new(MemoryLock {
            key: key.to_string(),
            owner: Ulid::new().to_string(),
            ttl,
            entries: self.entries.clone(),
            expires_at: Mutex::new(None),
        })
    }

    fn restore_lock(&self, serialized: &SerializedLock) -> Result<Arc<dyn Lock>, LockError> {
        if serialized.key.is_empty() || serialized.owner.is_empty() {
            return Err(LockError::InvalidSerialized(format!("{serialized:?}")));
        }
        let snapshot = serialized
            .remaining_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        Ok(Arc::new(MemoryLock {
            key: serialized.key.clone(),
            owner: serialized.owner.clone(),
            ttl: serialized.ttl(),
            entries: self.entries.clone(),
            expires_at: Mutex::new(snapshot),
        }))
    }
}

/// Lock handle backed by a [`MemoryLockProvider`].
pub struct MemoryLock {
    key: String,
    owner: String,
    ttl: Option<Duration>,
    entries: Entries,
    expires_at: Mutex<Option<Instant>>,
}

impl MemoryLock {
    fn set_expires_at(&self, at: Option<Instant>) {
        *self.expires_at.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(&self.key)
            && entry.owner != self.owner
            && !entry.is_expired(now)
        {
            return false;
        }
        let expires_at = self.ttl.map(|ttl| now + ttl);
        entries.insert(
            self.key.clone(),
            Entry {
                owner: self.owner.clone(),
                expires_at,
            },
        );
        drop(entries);
        self.set_expires_at(expires_at);
        true
    }

    fn try_extend(&self, ttl: Option<Duration>) -> Result<(), LockError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get_mut(&self.key)
            .filter(|entry| entry.owner == self.owner)
            .ok_or_else(|| LockError::NotOwned(self.key.clone()))?;
        if entry.is_expired(now) {
            return Err(LockError::Expired(self.key.clone()));
        }
        let expires_at = ttl.or(self.ttl).map(|ttl| now + ttl);
        entry.expires_at = expires_at;
        drop(entries);
        self.set_expires_at(expires_at);
        Ok(())
    }

    fn release(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        self.set_expires_at(None);
    }
}

impl Lock for MemoryLock {
    fn key(&self) -> &str {
        &self.key
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn acquire_immediately(&self) -> LockFuture<'_, bool> {
        let acquired = self.try_acquire();
        Box::pin(async move { Ok(acquired) })
    }

    fn extend(&self, ttl: Option<Duration>) -> LockFuture<'_, ()> {
        let result = self.try_extend(ttl);
        Box::pin(async move { result })
    }

    fn force_release(&self) -> LockFuture<'_, ()> {
        self.release();
        Box::pin(async { Ok(()) })
    }

    fn serialize(&self) -> SerializedLock {
        SerializedLock {
            key: self.key.clone(),
            owner: self.owner.clone(),
            ttl_ms: self.ttl.map(|ttl| ttl.as_millis() as u64),
            remaining_ms: self.remaining_time().map(|left| left.as_millis() as u64),
        }
    }

    fn remaining_time(&self) -> Option<Duration> {
        let expires_at = *self.expires_at.lock().unwrap_or_else(PoisonError::into_inner);
        expires_at.map(|at| at.saturating_duration_since(Instant::now()))
    }
}
