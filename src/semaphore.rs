//! Counting semaphores (C8): the primitive that bridges thread code and interrupt context.
//!
//! `V` is safe to call from an alarm handler (interrupt context); `P` is not - it may suspend
//! the caller, and interrupt context must never block (§5).

use crate::kernel::{Gate, Kernel};
use crate::scheduler;
use crate::tcb::{ThreadId, ThreadState};
use crate::queue::Fifo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SemaphoreId(u32);

pub(crate) struct SemState {
    counter: i64,
    waiters: Fifo<ThreadId>,
}

#[derive(Default)]
pub(crate) struct SemaphoreTable {
    slots: Vec<Option<SemState>>,
    next_id: u32,
}

impl SemaphoreTable {
    pub(crate) fn new() -> SemaphoreTable {
        SemaphoreTable { slots: Vec::new(), next_id: 0 }
    }

    pub(crate) fn create(&mut self, initial: i64) -> SemaphoreId {
        let id = SemaphoreId(self.next_id);
        self.next_id += 1;
        let idx = id.0 as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx] = Some(SemState { counter: initial, waiters: Fifo::new() });
        id
    }

    pub(crate) fn destroy(&mut self, id: SemaphoreId) {
        self.slots[id.0 as usize] = None;
    }

    fn get_mut(&mut self, id: SemaphoreId) -> &mut SemState {
        self.slots[id.0 as usize].as_mut().expect("use of destroyed semaphore")
    }
}

/// `V`, callable from interrupt (alarm) context: the gate is already closed, so this never
/// locks on its own.
pub(crate) fn v_locked(kernel: &mut Kernel, id: SemaphoreId) {
    let woken = {
        let sem = kernel.semaphores.get_mut(id);
        sem.counter += 1;
        sem.waiters.pop_front()
    };
    if let Some(waiter) = woken {
        scheduler::start_locked(kernel, waiter);
    }
}

/// `P`, never callable from interrupt context. May suspend the caller.
pub(crate) fn p(id: SemaphoreId) {
    let mut gate = Gate::close();
    let me = gate.current.expect("P called with no current thread");
    let must_block = {
        let sem = gate.semaphores.get_mut(id);
        sem.counter -= 1;
        let must_block = sem.counter < 0;
        if must_block {
            sem.waiters.push_back(me);
        }
        must_block
    };
    if must_block {
        gate.arena.get_mut(me).state = ThreadState::Waiting;
        scheduler::reschedule(gate);
    }
}

/// User-visible counting semaphore handle (C8's public face, §6 `semaphore: create, init, P,
/// V, destroy`). Cheap to copy - it's just an index into the kernel's semaphore table.
#[derive(Debug, Clone, Copy)]
pub struct Semaphore(pub(crate) SemaphoreId);

impl Semaphore {
    /// Create and initialize a semaphore in one step (the original's `create` + `initialize`
    /// split doesn't buy anything in Rust since there's no uninitialized-handle state).
    pub fn new(initial: i64) -> Semaphore {
        let mut gate = Gate::close();
        Semaphore(gate.semaphores.create(initial))
    }

    pub fn p(&self) {
        p(self.0)
    }

    pub fn v(&self) {
        let mut gate = Gate::close();
        v_locked(&mut gate, self.0);
    }

    pub fn destroy(self) {
        let mut gate = Gate::close();
        gate.semaphores.destroy(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread;
    use crate::system::System;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn ping_pong_leaves_both_semaphores_at_initial_value() {
        let log = Arc::new(AtomicI32::new(0));
        let log1 = log.clone();
        let log2 = log.clone();

        System::run_to_completion(Default::default(), move || {
            // Semaphore::new needs a bootstrapped kernel, so it's created here rather than
            // outside run_to_completion.
            let a1 = Arc::new(Semaphore::new(1));
            let b1 = Arc::new(Semaphore::new(0));
            let (a2, b2) = (a1.clone(), b1.clone());

            thread::fork(move || {
                for _ in 0..5 {
                    a1.p();
                    log1.fetch_add(1, Ordering::SeqCst);
                    b1.v();
                }
            });
            thread::fork(move || {
                for _ in 0..5 {
                    b2.p();
                    log2.fetch_add(1, Ordering::SeqCst);
                    a2.v();
                }
            });
        });

        assert_eq!(log.load(Ordering::SeqCst), 10);
    }
}
