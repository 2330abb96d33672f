//! Single-value hand-off slots between the tick consumer and the I/O loop
//!
//! Each slot holds only the latest value. Locks are taken with a bounded
//! wait and released as soon as the value has been moved in or out; a slot
//! lock is never held across a socket call. Failing to get the lock in time
//! is reported as [`SyncError::LockContention`] and the caller skips the
//! cycle.

use crate::networking::protocol::RelayFrame;
use crate::networking::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug)]
pub struct MailboxSlot<T> {
    value: Mutex<Option<T>>,
}

impl<T> Default for MailboxSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MailboxSlot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    /// Replace whatever the slot holds
    pub fn post(&self, value: T, timeout: Duration) -> SyncResult<()> {
        let mut slot = self.value.try_lock_for(timeout).ok_or(SyncError::LockContention)?;
        *slot = Some(value);
        Ok(())
    }

    /// Move the value out, leaving the slot empty
    pub fn take(&self, timeout: Duration) -> SyncResult<Option<T>> {
        let mut slot = self.value.try_lock_for(timeout).ok_or(SyncError::LockContention)?;
        Ok(slot.take())
    }

    /// Edit the slot in place under its lock
    pub fn update<R>(&self, timeout: Duration, f: impl FnOnce(&mut Option<T>) -> R) -> SyncResult<R> {
        let mut slot = self.value.try_lock_for(timeout).ok_or(SyncError::LockContention)?;
        Ok(f(&mut slot))
    }
}

/// Contents of the incoming slot
///
/// `frame` is last-write-wins. `wardrobes` accumulates per avatar until the
/// consumer takes it, so a wardrobe update survives its frame being
/// overwritten.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncomingPayload {
    pub frame: Option<RelayFrame>,
    pub wardrobes: HashMap<String, Vec<String>>,
}

impl IncomingPayload {
    pub fn is_empty(&self) -> bool {
        self.frame.is_none() && self.wardrobes.is_empty()
    }
}

/// The two slots of one session
#[derive(Debug, Default)]
pub struct SessionMailboxes {
    /// Latest request body built by the consumer
    pub outgoing: MailboxSlot<String>,
    pub incoming: MailboxSlot<IncomingPayload>,
}

impl SessionMailboxes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a parsed frame and wardrobe captures to the consumer
    ///
    /// `wardrobes` is drained only when the lock was acquired.
    pub fn deliver_incoming(
        &self,
        frame: Option<RelayFrame>,
        wardrobes: &mut HashMap<String, Vec<String>>,
        timeout: Duration,
    ) -> SyncResult<()> {
        self.incoming.update(timeout, |slot| {
            let payload = slot.get_or_insert_with(IncomingPayload::default);
            if frame.is_some() {
                payload.frame = frame;
            }
            payload.wardrobes.extend(wardrobes.drain());
        })
    }
}
