//! # In-Memory Cache Store
//!
//! A process-local stand-in for the remote store. All connections opened by one
//! [`InMemoryConnector`] share the same entry map, so data survives a reconnect
//! exactly as it would on a real server. Reachability can be toggled to rehearse
//! outages against the full reconnect and retry stack.

use super::{StoreConnector, StoreHandle};
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Stored payload with its sliding expiration window
#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    sliding_expiration: Duration,
    last_accessed: Instant,
}

impl StoredEntry {
    fn new(value: Vec<u8>, sliding_expiration: Duration) -> Self {
        Self {
            value,
            sliding_expiration,
            last_accessed: Instant::now(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_accessed) >= self.sliding_expiration
    }
}

/// State shared by the connector and every handle it opened
#[derive(Debug, Default)]
struct SharedStore {
    entries: DashMap<String, StoredEntry>,
    reachable: AtomicBool,
    failing_operations: AtomicU32,
    connects: AtomicU64,
    operations: AtomicU64,
    expired_cleanups: AtomicU64,
}

impl SharedStore {
    fn check_reachable(&self) -> CacheResult<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(CacheError::connection("in-memory store is unreachable"));
        }
        Ok(())
    }

    /// Consume one injected failure, if any are pending
    fn take_injected_failure(&self) -> bool {
        self.failing_operations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Connector for the in-memory store
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    shared: Arc<SharedStore>,
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConnector {
    pub fn new() -> Self {
        let shared = SharedStore::default();
        shared.reachable.store(true, Ordering::SeqCst);
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Make the store reachable or unreachable.
    ///
    /// While unreachable, new connections fail and every command on an existing
    /// handle fails with a connection error.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail the next `count` commands with a connection error, then recover
    pub fn fail_next_operations(&self, count: u32) {
        self.shared.failing_operations.store(count, Ordering::SeqCst);
    }

    /// Number of connections opened so far
    pub fn connect_count(&self) -> u64 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Number of commands that reached the store, failed ones included
    pub fn operation_count(&self) -> u64 {
        self.shared.operations.load(Ordering::SeqCst)
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.shared
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the raw payload of a key, bypassing serialization
    pub fn insert_raw(&self, key: &str, value: &[u8], sliding_expiration: Duration) {
        self.shared
            .entries
            .insert(key.to_string(), StoredEntry::new(value.to_vec(), sliding_expiration));
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.shared.entries.len();
        self.shared.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.shared.entries.len();
        if removed > 0 {
            self.shared
                .expired_cleanups
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Purged {} expired in-memory cache entries", removed);
        }
        removed
    }

    fn open(&self) -> CacheResult<InMemoryHandle> {
        self.shared.check_reachable()?;
        let id = self.shared.connects.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Opened in-memory store connection #{}", id);
        Ok(InMemoryHandle {
            id,
            shared: self.shared.clone(),
            released: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    type Handle = InMemoryHandle;

    async fn connect(&self) -> CacheResult<InMemoryHandle> {
        self.open()
    }

    fn connect_blocking(&self) -> CacheResult<InMemoryHandle> {
        self.open()
    }

    fn describe(&self) -> String {
        "memory://local".to_string()
    }
}

/// One connection to the in-memory store
#[derive(Debug)]
pub struct InMemoryHandle {
    id: u64,
    shared: Arc<SharedStore>,
    released: AtomicBool,
}

impl InMemoryHandle {
    /// Sequence number of this connection, starting at 1
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn begin(&self) -> CacheResult<()> {
        if self.is_released() {
            return Err(CacheError::ConnectionReleased);
        }
        self.shared.operations.fetch_add(1, Ordering::SeqCst);
        self.shared.check_reachable()?;
        if self.shared.take_injected_failure() {
            return Err(CacheError::connection("injected connection failure"));
        }
        Ok(())
    }

    fn read(&self, key: &str, sliding_expiration: Duration) -> CacheResult<Option<Vec<u8>>> {
        self.begin()?;
        let now = Instant::now();

        if let Some(mut entry) = self.shared.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.last_accessed = now;
                entry.sliding_expiration = sliding_expiration;
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }

        // Expired: the guard above is dropped, so removing cannot deadlock
        if self
            .shared
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.shared.expired_cleanups.fetch_add(1, Ordering::Relaxed);
        }
        Ok(None)
    }

    fn write(&self, key: &str, value: &[u8], sliding_expiration: Duration) -> CacheResult<()> {
        self.begin()?;
        self.shared
            .entries
            .insert(key.to_string(), StoredEntry::new(value.to_vec(), sliding_expiration));
        Ok(())
    }

    fn remove(&self, key: &str) -> CacheResult<()> {
        self.begin()?;
        self.shared.entries.remove(key);
        Ok(())
    }

    fn release(&self) -> CacheResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(CacheError::ConnectionReleased);
        }
        debug!("Closed in-memory store connection #{}", self.id);
        Ok(())
    }
}

#[async_trait]
impl StoreHandle for InMemoryHandle {
    async fn get(&self, key: &str, sliding_expiration: Duration) -> CacheResult<Option<Vec<u8>>> {
        self.read(key, sliding_expiration)
    }

    async fn set(&self, key: &str, value: &[u8], sliding_expiration: Duration) -> CacheResult<()> {
        self.write(key, value, sliding_expiration)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.remove(key)
    }

    async fn close(&self) -> CacheResult<()> {
        self.release()
    }

    fn get_blocking(&self, key: &str, sliding_expiration: Duration) -> CacheResult<Option<Vec<u8>>> {
        self.read(key, sliding_expiration)
    }

    fn set_blocking(&self, key: &str, value: &[u8], sliding_expiration: Duration) -> CacheResult<()> {
        self.write(key, value, sliding_expiration)
    }

    fn delete_blocking(&self, key: &str) -> CacheResult<()> {
        self.remove(key)
    }

    fn close_blocking(&self) -> CacheResult<()> {
        self.release()
    }
}
