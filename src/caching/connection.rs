//! # Connection Manager
//!
//! Owns the single shared connection to the remote store and decides when it is
//! worth replacing.
//!
//! ## Reconnect Gate
//! The store client recovers from most blips on its own, and every reconnect is
//! itself disruptive, so a reconnect request passes two gates:
//! 1. **Rate gate**: nothing happens until `min_reconnect_interval` has passed
//!    since the last reconnect attempt, successful or not.
//! 2. **Error persistence**: the first request after a reconnect attempt only
//!    opens an error window. A reconnect happens once errors have been reported
//!    for at least `error_threshold`, with no gap between reports longer than
//!    `error_threshold`.
//!
//! Only a manager with nothing published skips both gates: one that has never
//! connected, or one that was shut down.
//!
//! ## Concurrency
//! - The published connection is an immutable [`LiveConnection`] behind an `Arc`;
//!   readers clone the `Arc`, writers swap it. A reader sees the old or the new
//!   connection, never a mix.
//! - A reconnect dials first and swaps second. The old connection stays
//!   published, and usable, until its replacement is up; if dialling fails it
//!   stays published.
//! - The reconnect guard is a mutex acquired with a bounded wait. A caller that
//!   cannot get it within `guard_timeout` returns immediately and keeps using the
//!   current connection; whoever holds the guard is already fixing things.
//! - The async and blocking paths are separate implementations that share only
//!   [`ErrorWindow`]'s decision logic.

use super::stores::{StoreConnector, StoreHandle};
use super::{CacheError, CacheResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often the blocking path re-tries the guard while waiting for it.
///
/// The guard is a tokio mutex because the async path holds it across the
/// connect `.await`. Tokio offers no timed blocking lock, so blocking callers
/// poll `try_lock` until `guard_timeout` runs out.
const GUARD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Reconnect tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Minimum time between two reconnects
    #[serde(with = "humantime_serde")]
    pub min_reconnect_interval: Duration,

    /// How long errors must persist (and the longest tolerated gap between
    /// them) before a reconnect is attempted
    #[serde(with = "humantime_serde")]
    pub error_threshold: Duration,

    /// Bounded wait for the reconnect guard
    #[serde(with = "humantime_serde")]
    pub guard_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_reconnect_interval: Duration::from_secs(60),
            error_threshold: Duration::from_secs(30),
            guard_timeout: Duration::from_secs(15),
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> CacheResult<()> {
        if self.error_threshold.is_zero() {
            return Err(CacheError::configuration("error_threshold must be greater than zero"));
        }
        if self.guard_timeout.is_zero() {
            return Err(CacheError::configuration("guard_timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Why a reconnect request did not reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The current connection is younger than the minimum reconnect interval
    RateLimited,
    /// Another caller held the guard for the whole bounded wait
    GuardContended,
    /// Another caller reconnected while this one waited for the guard
    AlreadyReconnected,
    /// First error since the last reconnect; the error window is now open
    FirstError,
    /// Errors have not persisted long enough, or the evidence is stale
    ErrorsNotSustained,
}

/// Result of a reconnect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Reconnected { generation: u64 },
    Skipped(SkipReason),
}

impl ReconnectOutcome {
    pub fn reconnected(&self) -> bool {
        matches!(self, Self::Reconnected { .. })
    }
}

/// Error timestamps since the last reconnect. `None` means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorWindow {
    pub first_error: Option<Instant>,
    pub previous_error: Option<Instant>,
}

impl ErrorWindow {
    /// Record an error report at `now` and decide whether it justifies a reconnect.
    ///
    /// Returns `None` when the caller should reconnect, otherwise the reason not to.
    /// An initial connect always proceeds.
    pub fn evaluate(&mut self, now: Instant, threshold: Duration, initializing: bool) -> Option<SkipReason> {
        let first_error = match self.first_error {
            Some(first) => first,
            None if initializing => now,
            None => {
                self.first_error = Some(now);
                self.previous_error = Some(now);
                return Some(SkipReason::FirstError);
            }
        };
        let previous_error = self.previous_error.unwrap_or(now);

        let sustained = now.duration_since(first_error) >= threshold;
        let continuous = now.duration_since(previous_error) <= threshold;
        self.previous_error = Some(now);

        if (sustained && continuous) || initializing {
            None
        } else {
            Some(SkipReason::ErrorsNotSustained)
        }
    }

    pub fn clear(&mut self) {
        self.first_error = None;
        self.previous_error = None;
    }
}

/// A connection as published to readers
#[derive(Debug)]
pub struct LiveConnection<H> {
    handle: H,
    generation: u64,
    established_at: Instant,
}

impl<H> LiveConnection<H> {
    /// Handle used to issue commands
    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// 1 for the first connection, incremented on every reconnect
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When this connection was established (the last reconnect time)
    pub fn established_at(&self) -> Instant {
        self.established_at
    }
}

/// Connection displaced by a successful reconnect, still to be closed
type Replaced<H> = Option<Arc<LiveConnection<H>>>;

/// Connection statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub connected: bool,
    pub generation: u64,
    pub reconnects: u64,
    pub skipped: u64,
    pub guard_timeouts: u64,
    pub failed_reconnects: u64,
}

/// Owner of the shared store connection
pub struct ConnectionManager<C: StoreConnector> {
    connector: C,
    config: ReconnectConfig,

    /// Published connection; replaced, never mutated in place
    current: RwLock<Option<Arc<LiveConnection<C::Handle>>>>,

    /// When the last reconnect attempt finished, failed attempts included
    last_attempt: RwLock<Option<Instant>>,

    /// Reconnect guard; owns the error window it serializes access to
    reconnect_guard: Mutex<ErrorWindow>,

    generation: AtomicU64,
    reconnects: AtomicU64,
    skipped: AtomicU64,
    guard_timeouts: AtomicU64,
    failed_reconnects: AtomicU64,
}

impl<C: StoreConnector> ConnectionManager<C> {
    /// Create a manager without connecting; the first use connects
    pub fn new(connector: C, config: ReconnectConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            config,
            current: RwLock::new(None),
            last_attempt: RwLock::new(None),
            reconnect_guard: Mutex::new(ErrorWindow::default()),
            generation: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            guard_timeouts: AtomicU64::new(0),
            failed_reconnects: AtomicU64::new(0),
        })
    }

    /// Create a manager and establish the initial connection
    pub async fn connect(connector: C, config: ReconnectConfig) -> CacheResult<Self> {
        let manager = Self::new(connector, config)?;
        manager.reconnect(true).await?;
        Ok(manager)
    }

    /// Blocking counterpart of [`ConnectionManager::connect`]
    pub fn connect_blocking(connector: C, config: ReconnectConfig) -> CacheResult<Self> {
        let manager = Self::new(connector, config)?;
        manager.reconnect_blocking(true)?;
        Ok(manager)
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Snapshot of the published connection
    pub fn current(&self) -> Option<Arc<LiveConnection<C::Handle>>> {
        self.current.read().clone()
    }

    /// Snapshot of the published connection, or a transient error if there is none
    pub fn handle(&self) -> CacheResult<Arc<LiveConnection<C::Handle>>> {
        self.current()
            .ok_or_else(|| CacheError::connection_unavailable("no connection established"))
    }

    pub fn stats(&self) -> ConnectionStats {
        let current = self.current();
        ConnectionStats {
            connected: current.is_some(),
            generation: current.map(|c| c.generation).unwrap_or(0),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            guard_timeouts: self.guard_timeouts.load(Ordering::Relaxed),
            failed_reconnects: self.failed_reconnects.load(Ordering::Relaxed),
        }
    }

    /// Report trouble with the current connection and reconnect if warranted.
    ///
    /// Idempotent and cheap while the rate gate is closed. Connects immediately
    /// if nothing has been published yet.
    pub async fn ensure_connected(&self) -> CacheResult<ReconnectOutcome> {
        self.reconnect(false).await
    }

    /// Blocking counterpart of [`ConnectionManager::ensure_connected`]
    pub fn ensure_connected_blocking(&self) -> CacheResult<ReconnectOutcome> {
        self.reconnect_blocking(false)
    }

    /// Release the published connection. Later operations fail with a transient
    /// error until something reconnects; with nothing published, the next
    /// reconnect request connects straight away.
    pub async fn shutdown(&self) {
        let mut window = self.reconnect_guard.lock().await;
        window.clear();
        *self.last_attempt.write() = None;

        let released = self.current.write().take();
        if let Some(old) = released {
            if let Err(e) = old.handle.close().await {
                debug!("Ignoring error while closing store connection: {}", e);
            }
            info!(generation = old.generation, "Store connection released");
        }
    }

    /// Blocking counterpart of [`ConnectionManager::shutdown`]. Panics if called
    /// from within an async execution context.
    pub fn shutdown_blocking(&self) {
        let mut window = self.reconnect_guard.blocking_lock();
        window.clear();
        *self.last_attempt.write() = None;

        let released = self.current.write().take();
        if let Some(old) = released {
            if let Err(e) = old.handle.close_blocking() {
                debug!("Ignoring error while closing store connection: {}", e);
            }
            info!(generation = old.generation, "Store connection released");
        }
    }

    async fn reconnect(&self, force: bool) -> CacheResult<ReconnectOutcome> {
        let initializing = force || self.current.read().is_none();

        if let Some(reason) = self.rate_gate(initializing) {
            return Ok(self.skip(reason));
        }
        let seen_generation = self.generation.load(Ordering::SeqCst);

        let mut window = match tokio::time::timeout(self.config.guard_timeout, self.reconnect_guard.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                self.guard_timeouts.fetch_add(1, Ordering::Relaxed);
                debug!("Reconnect guard busy; continuing with the current connection");
                return Ok(self.skip(SkipReason::GuardContended));
            }
        };

        let now = Instant::now();
        if let Some(reason) = self.decide(&mut window, seen_generation, now, force) {
            return Ok(self.skip(reason));
        }
        window.clear();

        let connected = self.connector.connect().await;
        let (outcome, replaced) = self.publish(connected, now)?;
        if let Some(old) = replaced {
            if let Err(e) = old.handle.close().await {
                debug!("Ignoring error while closing old store connection: {}", e);
            }
        }
        Ok(outcome)
    }

    fn reconnect_blocking(&self, force: bool) -> CacheResult<ReconnectOutcome> {
        let initializing = force || self.current.read().is_none();

        if let Some(reason) = self.rate_gate(initializing) {
            return Ok(self.skip(reason));
        }
        let seen_generation = self.generation.load(Ordering::SeqCst);

        let mut window = match self.acquire_guard_blocking() {
            Some(guard) => guard,
            None => {
                self.guard_timeouts.fetch_add(1, Ordering::Relaxed);
                debug!("Reconnect guard busy; continuing with the current connection");
                return Ok(self.skip(SkipReason::GuardContended));
            }
        };

        let now = Instant::now();
        if let Some(reason) = self.decide(&mut window, seen_generation, now, force) {
            return Ok(self.skip(reason));
        }
        window.clear();

        let connected = self.connector.connect_blocking();
        let (outcome, replaced) = self.publish(connected, now)?;
        if let Some(old) = replaced {
            if let Err(e) = old.handle.close_blocking() {
                debug!("Ignoring error while closing old store connection: {}", e);
            }
        }
        Ok(outcome)
    }

    /// Bounded wait for the guard without an async runtime
    fn acquire_guard_blocking(&self) -> Option<MutexGuard<'_, ErrorWindow>> {
        let deadline = std::time::Instant::now() + self.config.guard_timeout;
        loop {
            if let Ok(guard) = self.reconnect_guard.try_lock() {
                return Some(guard);
            }
            if std::time::Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(GUARD_POLL_INTERVAL);
        }
    }

    /// Time since the last reconnect attempt, if there was one
    fn since_last_attempt(&self, now: Instant) -> Option<Duration> {
        self.last_attempt.read().map(|at| now.duration_since(at))
    }

    fn rate_gate(&self, initializing: bool) -> Option<SkipReason> {
        if initializing {
            return None;
        }
        match self.since_last_attempt(Instant::now()) {
            Some(elapsed) if elapsed < self.config.min_reconnect_interval => Some(SkipReason::RateLimited),
            _ => None,
        }
    }

    /// Everything that happens under the guard before any I/O
    fn decide(
        &self,
        window: &mut ErrorWindow,
        seen_generation: u64,
        now: Instant,
        force: bool,
    ) -> Option<SkipReason> {
        let initializing = force || self.current.read().is_none();
        if initializing {
            return window.evaluate(now, self.config.error_threshold, true);
        }

        // Another caller went through the guard while this one waited for it
        if self.generation.load(Ordering::SeqCst) != seen_generation {
            return Some(SkipReason::AlreadyReconnected);
        }
        if matches!(self.since_last_attempt(now), Some(elapsed) if elapsed < self.config.min_reconnect_interval) {
            return Some(SkipReason::AlreadyReconnected);
        }

        window.evaluate(now, self.config.error_threshold, false)
    }

    /// Swap in a freshly connected handle, returning the one it replaced.
    ///
    /// On failure the current connection stays published. Either way the attempt
    /// restarts the rate gate.
    fn publish(&self, connected: CacheResult<C::Handle>, now: Instant) -> CacheResult<(ReconnectOutcome, Replaced<C::Handle>)> {
        *self.last_attempt.write() = Some(Instant::now());
        match connected {
            Ok(handle) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let live = Arc::new(LiveConnection {
                    handle,
                    generation,
                    established_at: now,
                });
                let replaced = self.current.write().replace(live);

                self.reconnects.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("catalog_cache_reconnects_total").increment(1);
                info!(
                    generation,
                    store = %self.connector.describe(),
                    "Store connection established"
                );
                Ok((ReconnectOutcome::Reconnected { generation }, replaced))
            }
            Err(e) => {
                self.failed_reconnects.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("catalog_cache_failed_reconnects_total").increment(1);
                warn!(
                    store = %self.connector.describe(),
                    error = %e,
                    "Failed to establish store connection"
                );
                Err(CacheError::connection_unavailable(e.to_string()))
            }
        }
    }

    fn skip(&self, reason: SkipReason) -> ReconnectOutcome {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        debug!(?reason, "Reconnect skipped");
        ReconnectOutcome::Skipped(reason)
    }
}
