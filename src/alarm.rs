//! The alarm service (C7): an ordered-by-deadline list of callbacks fired from the clock.
//!
//! Handlers run with the gate closed, in what stands in for interrupt context here. Per §5 they
//! may only do the restricted set of things an interrupt is allowed to do: `V` a semaphore, flip
//! a flag, enqueue a thread. `AlarmHandler` is typed to exactly that vocabulary rather than an
//! arbitrary closure, so a handler that tried to block would fail to type-check.

use crate::kernel::Kernel;

/// The restricted capability an alarm handler is allowed: run once, with the gate already
/// closed, touching only kernel-owned state (never blocking, never allocating unboundedly).
pub(crate) type AlarmHandler = Box<dyn FnOnce(&mut Kernel) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId(u64);

struct Alarm {
    id: AlarmId,
    deadline: u64,
    handler: Option<AlarmHandler>,
    executed: bool,
}

/// Alarms kept in strictly ascending deadline order (ties broken by insertion order, since we
/// always insert at the first strictly-greater deadline).
#[derive(Default)]
pub(crate) struct AlarmQueue {
    alarms: Vec<Alarm>,
    next_id: u64,
}

impl AlarmQueue {
    pub(crate) fn new() -> AlarmQueue {
        AlarmQueue { alarms: Vec::new(), next_id: 0 }
    }

    /// `register(delay_ms, handler)`: deadline = current_tick + ceil(delay_ms / period_ms) + 1.
    pub(crate) fn register(&mut self, current_tick: u64, delay_ms: u64, period_ms: u64, handler: AlarmHandler) -> AlarmId {
        let ticks = delay_ms.div_ceil(period_ms.max(1));
        let deadline = current_tick + ticks + 1;
        let id = AlarmId(self.next_id);
        self.next_id += 1;
        let pos = self.alarms.iter().position(|a| a.deadline > deadline).unwrap_or(self.alarms.len());
        self.alarms.insert(pos, Alarm { id, deadline, handler: Some(handler), executed: false });
        id
    }

    /// Remove a pending alarm, or free an already-fired one. Returns `true` on success.
    ///
    /// The original C left this as `TO DO: deal with alarm removal`; this implementation does
    /// the removal the comment never got around to.
    pub(crate) fn deregister(&mut self, id: AlarmId) -> bool {
        if let Some(pos) = self.alarms.iter().position(|a| a.id == id) {
            let a = &self.alarms[pos];
            debug_assert!(!a.executed, "double-free of an alarm");
            self.alarms.remove(pos);
            true
        } else {
            false
        }
    }

    /// Pop the earliest alarm whose deadline has passed, if any.
    pub(crate) fn pop_due(&mut self, current_tick: u64) -> Option<(AlarmId, AlarmHandler)> {
        if self.alarms.first().is_some_and(|a| a.deadline <= current_tick) {
            let mut a = self.alarms.remove(0);
            a.executed = true;
            log::trace!("alarm {:?} fired at tick {}", a.id, current_tick);
            a.handler.take().map(|h| (a.id, h))
        } else {
            None
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order_ties_by_insertion() {
        let mut q = AlarmQueue::new();
        // Deadlines land at t+3, t+1, t+2 as in §8(f), registered in that order.
        let a = q.register(0, 300, 100, Box::new(|_| {}));
        let b = q.register(0, 100, 100, Box::new(|_| {}));
        let c = q.register(0, 200, 100, Box::new(|_| {}));
        let mut order = Vec::new();
        for tick in 0..10 {
            while let Some((id, _handler)) = q.pop_due(tick) {
                order.push(id);
            }
        }
        assert_eq!(order, vec![b, c, a]);
    }

    #[test]
    fn deregister_removes_pending_alarm() {
        let mut q = AlarmQueue::new();
        let id = q.register(0, 1000, 100, Box::new(|_| {}));
        assert!(q.deregister(id));
        assert!(q.is_empty());
    }

    #[test]
    fn deregister_unknown_alarm_fails() {
        let mut q = AlarmQueue::new();
        assert!(!q.deregister(AlarmId(42)));
    }
}
