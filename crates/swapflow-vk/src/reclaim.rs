// SPDX-License-Identifier: CEPL-1.0
//! Per-slot queues of destructor callbacks.
//!
//! Rendering code hands over the destruction of anything an in-flight
//! submission may still reference. The callback for slot `S` runs the next
//! time slot `S`'s fence has been observed signaled, or at shutdown after the
//! final device-idle wait. Queues are partitioned by slot, so a single writer
//! and a single reader per cycle need no locking.

use std::fmt;

use tracing::trace;

use crate::error::{FrameError, FrameResult};

pub type FreeCallback = Box<dyn FnOnce()>;

pub struct DeferredResourceReclaimer {
    queues: Vec<Vec<FreeCallback>>,
}

impl DeferredResourceReclaimer {
    pub fn new(slot_count: usize) -> Self {
        Self {
            queues: (0..slot_count).map(|_| Vec::new()).collect(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.queues.len()
    }

    pub fn pending(&self, slot: usize) -> usize {
        self.queues.get(slot).map_or(0, Vec::len)
    }

    pub fn total_pending(&self) -> usize {
        self.queues.iter().map(Vec::len).sum()
    }

    pub fn submit<F>(&mut self, slot: usize, callback: F) -> FrameResult<()>
    where
        F: FnOnce() + 'static,
    {
        let count = self.queues.len();
        let queue = self
            .queues
            .get_mut(slot)
            .ok_or(FrameError::SlotOutOfRange { slot, count })?;
        queue.push(Box::new(callback));
        Ok(())
    }

    /// Runs and clears slot `slot`'s queue in submission order. Returns how
    /// many callbacks ran.
    pub fn drain(&mut self, slot: usize) -> usize {
        let Some(queue) = self.queues.get_mut(slot) else {
            return 0;
        };
        let callbacks = std::mem::take(queue);
        let ran = callbacks.len();
        for callback in callbacks {
            callback();
        }
        if ran > 0 {
            trace!("reclaimed {} deferred frees for slot {}", ran, slot);
        }
        ran
    }

    /// Only sound once the device is idle.
    pub fn drain_all(&mut self) -> usize {
        (0..self.queues.len()).map(|slot| self.drain(slot)).sum()
    }

    /// Changes the slot count after a chain rebuild. Pending callbacks run
    /// first, so the caller must hold the device-idle barrier.
    pub fn resize(&mut self, slot_count: usize) -> usize {
        let ran = self.drain_all();
        self.queues.resize_with(slot_count, Vec::new);
        ran
    }
}

impl fmt::Debug for DeferredResourceReclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredResourceReclaimer")
            .field(
                "pending",
                &self.queues.iter().map(Vec::len).collect::<Vec<_>>(),
            )
            .finish()
    }
}
