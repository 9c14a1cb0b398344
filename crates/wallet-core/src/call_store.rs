use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::task::AbortHandle;

/// Identifies one occupancy of a [`CallStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTicket(u64);

struct StoredCall {
    ticket: CallTicket,
    handle: Option<AbortHandle>,
}

/// Single-slot store for an in-flight call.
///
/// `begin` aborts whatever occupied the slot. A finished call asks `finish`
/// whether it is still the current one before publishing its result.
#[derive(Default)]
pub struct CallStore {
    slot: Mutex<Option<StoredCall>>,
    counter: AtomicU64,
}

impl CallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> CallTicket {
        let ticket = CallTicket(self.counter.fetch_add(1, Ordering::Relaxed) + 1);
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(StoredCall { ticket, handle: None });

        if let Some(handle) = previous.and_then(|call| call.handle) {
            handle.abort();
        }

        ticket
    }

    /// Binds the spawned task to `ticket`; a superseded task is aborted
    pub fn attach(&self, ticket: CallTicket, handle: AbortHandle) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        match slot.as_mut() {
            Some(call) if call.ticket == ticket => call.handle = Some(handle),
            _ => handle.abort(),
        }
    }

    /// Releases the slot if `ticket` still owns it
    pub fn finish(&self, ticket: CallTicket) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        match slot.as_ref() {
            Some(call) if call.ticket == ticket => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&self) {
        let previous = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();

        if let Some(handle) = previous.and_then(|call| call.handle) {
            handle.abort();
        }
    }

    pub fn has_call(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}
