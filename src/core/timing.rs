// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Timing Event System
//!
//! This module implements the global cycle-driven event scheduler that
//! sequences every peripheral. All timing in the core is expressed in CPU
//! cycles; there is no wall clock, so execution is fully deterministic for
//! a given outer quantum.
//!
//! # Architecture
//!
//! Components register named events once at startup and get back a stable
//! [`EventId`]. Scheduling queues an event with a parameter and a
//! cycles-until-fire counter; [`Scheduler::tick`] decrements all pending
//! counters and returns the events that came due, in deadline order, so the
//! system loop can dispatch them to their owners. Because dispatch happens
//! after `tick` returns, a handler that queues its successor — even with a
//! delay shorter than the cycles just distributed — adds it to the queue
//! undecremented and it cannot fire early.
//!
//! # Example
//!
//! ```
//! use sable::core::timing::Scheduler;
//!
//! let mut scheduler = Scheduler::new();
//! let event = scheduler.register_event("Test Event");
//!
//! // Schedule it to fire after 1000 cycles
//! scheduler.schedule(event, 0, 1000);
//!
//! let fired = scheduler.tick(1000);
//! assert_eq!(fired.len(), 1);
//! assert_eq!(fired[0].id, event);
//! ```

/// Event handle (identifier for registered events)
pub type EventId = usize;

/// A scheduled event that has come due.
///
/// `late` is the number of cycles by which the deadline was overshot
/// (0 when the tick landed exactly on the deadline). Handlers that
/// reschedule themselves subtract it from their cadence to stay in phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredEvent {
    /// Handle of the registered event
    pub id: EventId,
    /// Caller-supplied parameter
    pub param: i32,
    /// Cycles the event fired past its deadline
    pub late: i64,
}

/// A pending event in the queue.
#[derive(Debug, Clone, Copy)]
struct PendingEvent {
    id: EventId,
    param: i32,
    cycles_left: i64,
    /// Insertion order, used to break deadline ties deterministically
    seq: u64,
}

/// Cycle-driven event scheduler
///
/// Holds the multiset of pending events. Events carry no priority beyond
/// their deadline; ties resolve by insertion order.
///
/// # Example
///
/// ```
/// use sable::core::timing::Scheduler;
///
/// let mut scheduler = Scheduler::new();
/// let sector = scheduler.register_event("CDROM IRQ");
/// scheduler.schedule(sector, 1, 250_000);
///
/// // The outer loop asks how far it may run before the next deadline
/// assert_eq!(scheduler.run_cycles(128), 128);
/// ```
pub struct Scheduler {
    /// Registered event names, indexed by [`EventId`] (for trace logging)
    names: Vec<&'static str>,

    /// Active event queue
    pending: Vec<PendingEvent>,

    /// Monotonic insertion counter for tie-breaking
    next_seq: u64,
}

impl Scheduler {
    /// Create a new scheduler with no registered events
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            pending: Vec::new(),
            next_seq: 0,
        }
    }

    /// Register a new event kind
    ///
    /// # Arguments
    ///
    /// * `name` - Event name for trace logging
    ///
    /// # Returns
    ///
    /// A stable [`EventId`] used with [`schedule`](Self::schedule) and
    /// [`cancel`](Self::cancel).
    pub fn register_event(&mut self, name: &'static str) -> EventId {
        let id = self.names.len();
        self.names.push(name);
        id
    }

    /// Queue an event to fire after `cycles_until` cycles
    ///
    /// Safe to call while the fired batch of a previous [`tick`](Self::tick)
    /// is being dispatched; the new event joins the queue undecremented.
    ///
    /// # Arguments
    ///
    /// * `id` - Event handle from [`register_event`](Self::register_event)
    /// * `param` - Parameter handed back when the event fires
    /// * `cycles_until` - Cycles until the event is due (must be >= 0)
    pub fn schedule(&mut self, id: EventId, param: i32, cycles_until: i64) {
        debug_assert!(id < self.names.len(), "unregistered event id {}", id);
        debug_assert!(cycles_until >= 0);

        log::trace!(
            "Scheduler: queue '{}' param={} in {} cycles",
            self.names[id],
            param,
            cycles_until
        );

        self.pending.push(PendingEvent {
            id,
            param,
            cycles_left: cycles_until,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    /// Cancel every pending event with the given id
    ///
    /// Used by the CD-ROM drive on Pause to drop queued sector interrupts.
    pub fn cancel(&mut self, id: EventId) {
        log::trace!("Scheduler: cancel all '{}' events", self.names[id]);
        self.pending.retain(|event| event.id != id);
    }

    /// Cycles until the next pending event, or `i64::MAX` when idle
    pub fn until_next_event(&self) -> i64 {
        self.pending
            .iter()
            .map(|event| event.cycles_left)
            .min()
            .unwrap_or(i64::MAX)
    }

    /// Cycles the outer loop may run without overshooting a deadline
    ///
    /// Returns `min(quantum, cycles-until-next-event)`, never less than 2
    /// so the CPU always makes forward progress (one instruction is two
    /// cycles).
    pub fn run_cycles(&self, quantum: i64) -> i64 {
        quantum.min(self.until_next_event()).max(2)
    }

    /// Advance all pending events by `elapsed` cycles and collect the ones
    /// that came due
    ///
    /// Fired events are returned in ascending deadline order; ties resolve
    /// by insertion order.
    pub fn tick(&mut self, elapsed: i64) -> Vec<FiredEvent> {
        debug_assert!(elapsed >= 0);

        let mut due = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            self.pending[i].cycles_left -= elapsed;
            if self.pending[i].cycles_left <= 0 {
                due.push(self.pending.swap_remove(i));
            } else {
                i += 1;
            }
        }

        // Ascending deadline, insertion order on ties
        due.sort_by_key(|event| (event.cycles_left, event.seq));

        due.into_iter()
            .map(|event| {
                log::trace!(
                    "Scheduler: fire '{}' param={} late={}",
                    self.names[event.id],
                    event.param,
                    -event.cycles_left
                );
                FiredEvent {
                    id: event.id,
                    param: event.param,
                    late: -event.cycles_left,
                }
            })
            .collect()
    }

    /// Drop all pending events (system reset)
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_returns_sequential_ids() {
        let mut scheduler = Scheduler::new();
        assert_eq!(scheduler.register_event("a"), 0);
        assert_eq!(scheduler.register_event("b"), 1);
    }

    #[test]
    fn test_single_event_fires_on_deadline() {
        let mut scheduler = Scheduler::new();
        let event = scheduler.register_event("Test");
        scheduler.schedule(event, 7, 1000);

        assert!(scheduler.tick(999).is_empty());

        let fired = scheduler.tick(1);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, event);
        assert_eq!(fired[0].param, 7);
        assert_eq!(fired[0].late, 0);
    }

    #[test]
    fn test_late_event_reports_overshoot() {
        let mut scheduler = Scheduler::new();
        let event = scheduler.register_event("Test");
        scheduler.schedule(event, 0, 1000);

        let fired = scheduler.tick(1500);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].late, 500);
    }

    #[test]
    fn test_events_fire_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        let a = scheduler.register_event("a");
        let b = scheduler.register_event("b");
        let c = scheduler.register_event("c");

        scheduler.schedule(a, 0, 300);
        scheduler.schedule(b, 0, 100);
        scheduler.schedule(c, 0, 200);

        let fired = scheduler.tick(300);
        let order: Vec<EventId> = fired.iter().map(|f| f.id).collect();
        assert_eq!(order, vec![b, c, a]);
    }

    #[test]
    fn test_ties_resolve_by_insertion_order() {
        let mut scheduler = Scheduler::new();
        let a = scheduler.register_event("a");
        let b = scheduler.register_event("b");

        scheduler.schedule(b, 0, 100);
        scheduler.schedule(a, 0, 100);

        let fired = scheduler.tick(100);
        let order: Vec<EventId> = fired.iter().map(|f| f.id).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn test_cancel_removes_all_of_one_kind() {
        let mut scheduler = Scheduler::new();
        let irq = scheduler.register_event("irq");
        let other = scheduler.register_event("other");

        scheduler.schedule(irq, 1, 100);
        scheduler.schedule(irq, 2, 200);
        scheduler.schedule(other, 0, 150);

        scheduler.cancel(irq);

        let fired = scheduler.tick(200);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, other);
    }

    #[test]
    fn test_decrement_is_monotonic_by_elapsed() {
        let mut scheduler = Scheduler::new();
        let event = scheduler.register_event("e");
        scheduler.schedule(event, 0, 1000);
        scheduler.schedule(event, 0, 2000);

        let before = scheduler.until_next_event();
        scheduler.tick(250);
        assert_eq!(scheduler.until_next_event(), before - 250);
    }

    #[test]
    fn test_run_cycles_clamps_to_next_deadline() {
        let mut scheduler = Scheduler::new();
        let event = scheduler.register_event("e");

        // No events pending: full quantum
        assert_eq!(scheduler.run_cycles(64), 64);

        scheduler.schedule(event, 0, 10);
        assert_eq!(scheduler.run_cycles(64), 10);

        // Always at least one instruction of progress
        scheduler.schedule(event, 0, 0);
        assert_eq!(scheduler.run_cycles(64), 2);
    }

    #[test]
    fn test_successor_scheduled_after_fire_is_not_decremented() {
        let mut scheduler = Scheduler::new();
        let event = scheduler.register_event("chain");
        scheduler.schedule(event, 0, 100);

        let fired = scheduler.tick(100);
        assert_eq!(fired.len(), 1);

        // A handler reschedules with a delay shorter than the elapsed
        // cycles that were just distributed; it must not fire early.
        scheduler.schedule(event, 0, 50);
        assert!(scheduler.tick(49).is_empty());
        assert_eq!(scheduler.tick(1).len(), 1);
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut scheduler = Scheduler::new();
        let event = scheduler.register_event("e");
        scheduler.schedule(event, 0, 10);
        scheduler.reset();
        assert!(scheduler.tick(100).is_empty());
    }
}
