// crates/datasource-broker/src/cache.rs
// ============================================================================
// Module: Datasource Resolution Cache
// Description: Render-scoped memoization with in-flight request coalescing.
// Purpose: Fetch each distinct datasource request at most once per render.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! [`ResolutionCache`] maps a [`CacheKey`] (resolved URI plus header
//! signature) to either a ready value or a pending computation. The first
//! caller for a key becomes the leader and runs the computation; concurrent
//! callers subscribe to the leader's result through a `tokio::sync::watch`
//! channel.
//! Invariants:
//! - At most one computation per key is in flight.
//! - Only successes are stored; a failure is handed to current waiters and
//!   the slot is cleared so the next caller retries.
//! - If the leader is dropped mid-flight its slot is released and one waiter
//!   takes over. A waiter whose own token is live also takes over when the
//!   leader's render was cancelled.
//! - The map lock is only held to claim or complete a slot, never across an
//!   await point.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio::sync::watch;
use url::Url;

use crate::context::CancellationToken;
use crate::error::ResolveError;
use crate::headers::HeaderSet;
use crate::telemetry::CacheStatus;
use crate::value::ResolvedValue;

// ============================================================================
// SECTION: Keys and Entries
// ============================================================================

/// Identity of a cached resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Resolved URI.
    uri: String,
    /// Signature of the merged request headers.
    header_signature: String,
}

impl CacheKey {
    /// Builds a key from a resolved URI and its merged headers.
    #[must_use]
    pub fn new(uri: &Url, headers: &HeaderSet) -> Self {
        Self {
            uri: uri.to_string(),
            header_signature: headers.signature(),
        }
    }

    /// Returns the resolved URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// Successful resolution stored for the rest of the render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Cache identity.
    pub key: CacheKey,
    /// Decoded value.
    pub value: ResolvedValue,
    /// Content type used to decode the value.
    pub content_type: Option<String>,
}

// ============================================================================
// SECTION: Slots
// ============================================================================

/// Result published by a leader to its waiters.
type Published<V> = Option<Result<V, ResolveError>>;

/// State of one cache key.
enum Slot<V> {
    /// Value computed successfully.
    Ready(V),
    /// Computation in flight; waiters subscribe here.
    Pending(watch::Receiver<Published<V>>),
}

/// Decision taken under the lock for one attempt.
enum Claim<V> {
    /// Value was ready.
    Hit(V),
    /// Another caller is computing.
    Wait(watch::Receiver<Published<V>>),
    /// This caller computes.
    Lead(watch::Sender<Published<V>>),
}

/// Locked slot map.
type SlotMap<V> = HashMap<CacheKey, Slot<V>>;

/// Releases or completes a pending slot owned by the leader.
struct PendingGuard<'a, V> {
    /// Slot map shared with the cache.
    slots: &'a Mutex<SlotMap<V>>,
    /// Key owned by this leader.
    key: &'a CacheKey,
    /// Channel to waiters.
    sender: watch::Sender<Published<V>>,
    /// Set once the slot has been completed.
    completed: bool,
}

impl<V: Clone> PendingGuard<'_, V> {
    /// Stores a success (or clears the slot on failure) and wakes waiters.
    fn complete(&mut self, result: &Result<V, ResolveError>) {
        let mut slots = lock_slots(self.slots);
        match result {
            Ok(value) => {
                slots.insert(self.key.clone(), Slot::Ready(value.clone()));
            }
            Err(_) => {
                slots.remove(self.key);
            }
        }
        drop(slots);
        self.sender.send_replace(Some(result.clone()));
        self.completed = true;
    }
}

impl<V> Drop for PendingGuard<'_, V> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut slots = lock_slots(self.slots);
        if matches!(slots.get(self.key), Some(Slot::Pending(_))) {
            slots.remove(self.key);
        }
    }
}

/// Locks the slot map, recovering from poisoning.
fn lock_slots<V>(slots: &Mutex<SlotMap<V>>) -> MutexGuard<'_, SlotMap<V>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SECTION: Resolution Cache
// ============================================================================

/// Render-scoped memoization table with request coalescing.
pub struct ResolutionCache<V = CacheEntry> {
    /// Slots keyed by cache identity.
    slots: Mutex<SlotMap<V>>,
}

impl<V> Default for ResolutionCache<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> fmt::Debug for ResolutionCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = lock_slots(&self.slots);
        let ready = slots.values().filter(|slot| matches!(slot, Slot::Ready(_))).count();
        let pending = slots.len() - ready;
        drop(slots);
        f.debug_struct("ResolutionCache")
            .field("ready", &ready)
            .field("pending", &pending)
            .finish()
    }
}

impl<V: Clone> ResolutionCache<V> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, computing it at most once.
    ///
    /// # Errors
    ///
    /// Returns the computation's error (shared with coalesced waiters) or
    /// [`ResolveError::Cancelled`] when `cancel` fires first.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
        compute: F,
    ) -> Result<V, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ResolveError>>,
    {
        self.get_or_compute_with_status(key, cancel, compute).await.map(|(value, _)| value)
    }

    /// Like [`Self::get_or_compute`], also reporting how the cache participated.
    ///
    /// # Errors
    ///
    /// Returns the computation's error (shared with coalesced waiters) or
    /// [`ResolveError::Cancelled`] when `cancel` fires first.
    pub async fn get_or_compute_with_status<F, Fut>(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
        compute: F,
    ) -> Result<(V, CacheStatus), ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ResolveError>>,
    {
        let sender = loop {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            match self.claim(key) {
                Claim::Hit(value) => return Ok((value, CacheStatus::Hit)),
                Claim::Lead(sender) => break sender,
                Claim::Wait(mut receiver) => {
                    let published = tokio::select! {
                        () = cancel.cancelled() => return Err(ResolveError::Cancelled),
                        changed = receiver.wait_for(Option::is_some) => {
                            changed.ok().and_then(|published| published.as_ref().cloned())
                        }
                    };
                    match published {
                        // The leader was dropped or its render was cancelled; claim again.
                        None | Some(Err(ResolveError::Cancelled)) => {}
                        Some(result) => {
                            return result.map(|value| (value, CacheStatus::Coalesced));
                        }
                    }
                }
            }
        };

        let mut guard = PendingGuard {
            slots: &self.slots,
            key,
            sender,
            completed: false,
        };
        // A computation that finished is kept even if cancellation raced it.
        let result = tokio::select! {
            biased;
            result = compute() => result,
            () = cancel.cancelled() => Err(ResolveError::Cancelled),
        };
        guard.complete(&result);
        result.map(|value| (value, CacheStatus::Miss))
    }

    /// Decides, under the lock, whether this caller hits, waits, or leads.
    fn claim(&self, key: &CacheKey) -> Claim<V> {
        let mut slots = lock_slots(&self.slots);
        match slots.get(key) {
            Some(Slot::Ready(value)) => Claim::Hit(value.clone()),
            Some(Slot::Pending(receiver)) => Claim::Wait(receiver.clone()),
            None => {
                let (sender, receiver) = watch::channel(None);
                slots.insert(key.clone(), Slot::Pending(receiver));
                Claim::Lead(sender)
            }
        }
    }

    /// Returns the ready value for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        match lock_slots(&self.slots).get(key) {
            Some(Slot::Ready(value)) => Some(value.clone()),
            Some(Slot::Pending(_)) | None => None,
        }
    }
}

impl<V> ResolutionCache<V> {
    /// Returns true when a value is stored for `key`.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        matches!(lock_slots(&self.slots).get(key), Some(Slot::Ready(_)))
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        lock_slots(&self.slots).values().filter(|slot| matches!(slot, Slot::Ready(_))).count()
    }

    /// Returns true when no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
