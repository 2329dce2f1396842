//! Pending-request ledger.
//!
//! Maps each in-flight [`CallbackId`] to the single-use completion slot of
//! the caller waiting for it. A slot is resolved at most once: resolving
//! removes it.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::identifiers::CallbackId;

// ============================================================================
// Constants
// ============================================================================

/// Random draws attempted before giving up on finding a free id.
pub const MAX_ID_ATTEMPTS: usize = 10;

// ============================================================================
// Types
// ============================================================================

/// Completion slot of one pending request.
pub type Slot<T = Bytes> = oneshot::Sender<Result<T>>;

/// Source of candidate ids. Values are folded into the id space.
pub type IdSource = Arc<dyn Fn() -> u32 + Send + Sync>;

// ============================================================================
// CorrelationLedger
// ============================================================================

/// Thread-safe map of pending requests.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use duplex_rpc::CorrelationLedger;
/// use tokio::sync::oneshot;
///
/// # tokio_test::block_on(async {
/// let ledger = CorrelationLedger::new();
/// let (tx, rx) = oneshot::channel();
/// let id = ledger.append(tx);
///
/// assert!(ledger.resume_returning(id, Bytes::from_static(b"{}")));
/// assert!(!ledger.resume_returning(id, Bytes::new()));
/// assert_eq!(&rx.await.unwrap().unwrap()[..], b"{}");
/// # });
/// ```
pub struct CorrelationLedger<T = Bytes> {
    slots: Mutex<FxHashMap<CallbackId, Slot<T>>>,
    id_source: IdSource,
}

impl<T> fmt::Debug for CorrelationLedger<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationLedger")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T> Default for CorrelationLedger<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CorrelationLedger<T> {
    /// Creates an empty ledger drawing ids at random.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id_source(Arc::new(|| rand::thread_rng().gen_range(0..CallbackId::LIMIT)))
    }

    /// Creates an empty ledger drawing ids from `id_source`.
    #[must_use]
    pub fn with_id_source(id_source: IdSource) -> Self {
        Self {
            slots: Mutex::new(FxHashMap::default()),
            id_source,
        }
    }

    /// Registers `slot` under a fresh id and returns the id.
    ///
    /// # Panics
    ///
    /// Panics if no free id is found in [`MAX_ID_ATTEMPTS`] draws. With a
    /// random source this requires a pathologically full ledger.
    pub fn append(&self, slot: Slot<T>) -> CallbackId {
        let mut slots = self.slots.lock();

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = CallbackId::new((self.id_source)());
            if !slots.contains_key(&id) {
                slots.insert(id, slot);
                return id;
            }
        }

        error!(pending = slots.len(), "Callback id space exhausted");
        panic!("no free callback id after {MAX_ID_ATTEMPTS} attempts");
    }

    /// Resolves the slot for `id` with a payload.
    ///
    /// Returns `false` if no slot is registered under `id`.
    pub fn resume_returning(&self, id: CallbackId, payload: T) -> bool {
        self.resolve(id, Ok(payload))
    }

    /// Resolves the slot for `id` with an error.
    ///
    /// Returns `false` if no slot is registered under `id`.
    pub fn resume_throwing(&self, id: CallbackId, error: Error) -> bool {
        self.resolve(id, Err(error))
    }

    /// Drops the slot for `id` without resolving it.
    pub fn remove(&self, id: CallbackId) -> bool {
        self.slots.lock().remove(&id).is_some()
    }

    /// Resolves every slot with an error built by `make_error`.
    ///
    /// Returns the number of slots resolved.
    pub fn cancel_all(&self, make_error: impl Fn() -> Error) -> usize {
        let drained: Vec<_> = self.slots.lock().drain().collect();
        let count = drained.len();

        for (_, slot) in drained {
            let _ = slot.send(Err(make_error()));
        }

        if count > 0 {
            debug!(count, "Failed pending requests");
        }
        count
    }

    /// Returns `true` if a slot is registered under `id`.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: CallbackId) -> bool {
        self.slots.lock().contains_key(&id)
    }

    /// Returns the number of pending slots.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn resolve(&self, id: CallbackId, result: Result<T>) -> bool {
        // Lock released before the waiter runs.
        let slot = self.slots.lock().remove(&id);

        match slot {
            Some(slot) => {
                if slot.send(result).is_err() {
                    debug!(%id, "Waiter already gone");
                }
                true
            }
            None => {
                debug!(%id, "No pending request for callback id");
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
