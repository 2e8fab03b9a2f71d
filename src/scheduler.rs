//! Multi-level feedback scheduling (C5) and the reaper (C6).
//!
//! The one subtlety worth stating up front: true interrupt-driven preemption (a signal landing
//! mid-instruction) has no safe equivalent without inline asm well beyond a stack swap, so
//! preemption here is cooperative at *safepoints* - `reschedule` is only ever called by the
//! thread that's currently running, voluntarily (`yield_now`, blocking on a semaphore, sleeping,
//! finishing). The clock still advances `quanta_count` on real wall-clock ticks; a thread whose
//! quantum has expired just doesn't actually get switched out until its next safepoint. A
//! thread that never calls anything and never returns monopolizes the CPU, same as it would
//! without real preemption in any cooperative scheduler.

use crate::kernel::{Gate, Kernel};
use crate::queue::MultilevelQueue;
use crate::stack::{self, StackPointer};
use crate::tcb::{ThreadId, ThreadState};

/// Ticks a thread may run at each level before being demoted one level (clamped at the bottom).
pub(crate) const QUANTA_DURATIONS: [u32; 4] = [1, 2, 4, 8];

/// Cumulative thresholds (out of 100) used to pick which level to try dequeuing from first.
/// `freq_count < 50` picks level 0, `< 75` picks level 1, `< 90` picks level 2, else level 3.
pub(crate) const LEVEL_THRESHOLDS: [u32; 4] = [50, 75, 90, 100];

pub(crate) const NUM_LEVELS: usize = QUANTA_DURATIONS.len();

#[derive(Default)]
pub(crate) struct SchedulerState {
    pub(crate) ready: MultilevelQueue<ThreadId>,
    pub(crate) finished: crate::queue::Fifo<ThreadId>,
    freq_count: u32,
    pub(crate) quanta_count: u32,
}

impl SchedulerState {
    pub(crate) fn new() -> SchedulerState {
        SchedulerState {
            ready: MultilevelQueue::new(NUM_LEVELS),
            finished: crate::queue::Fifo::new(),
            freq_count: 0,
            quanta_count: 0,
        }
    }

    fn pick_level(&mut self) -> usize {
        let f = self.freq_count;
        self.freq_count = (self.freq_count + 1) % 100;
        LEVEL_THRESHOLDS.iter().position(|&t| f < t).unwrap_or(NUM_LEVELS - 1)
    }
}

/// Put a thread on the ready queue at level 0, unless it's the thread currently busy-waiting
/// for work (see the idling branch of [`reschedule`]) - that one is woken in place, without ever
/// touching the ready queue, because it was never switched away from to begin with.
pub(crate) fn start_locked(kernel: &mut Kernel, id: ThreadId) {
    let tcb = kernel.arena.get_mut(id);
    if tcb.idling {
        tcb.state = ThreadState::Running;
        return;
    }
    match tcb.state {
        ThreadState::Ready | ThreadState::Running => return,
        ThreadState::Waiting | ThreadState::Finished => {}
    }
    tcb.state = ThreadState::Ready;
    tcb.level = 0;
    kernel.scheduler.ready.enqueue(0, id);
}

/// The scheduling decision (§4.2). Consumes the gate: on the path that actually switches stacks
/// the lock is dropped *before* the unsafe call, and never re-acquired by this function - by the
/// time control returns here (possibly much later, on a resumed thread's call stack) there is
/// nothing left to do.
pub(crate) fn reschedule(mut gate: Gate) {
    let current = gate.current;

    if let Some(id) = current {
        if gate.arena.get(id).state == ThreadState::Finished {
            gate.scheduler.finished.push_back(id);
            if gate.arena.get(id).counts_as_live {
                gate.live_threads -= 1;
            }
            gate.cleanup_sema_v();
            if gate.live_threads == 0 {
                let main_sp = gate.main_return;
                let outgoing_ptr = gate.arena.sp_ptr(id);
                drop(gate);
                // SAFETY: `main_sp` was saved by the matching `switch` call in
                // `System::run_to_completion`, which is still on its own call stack waiting for
                // this to resume it.
                unsafe { stack::switch(&mut *outgoing_ptr, main_sp) };
                return;
            }
        }
    }

    let quantum_len = current
        .map(|id| QUANTA_DURATIONS[gate.arena.get(id).level])
        .unwrap_or(0);
    let must_switch = current.is_none()
        || gate.scheduler.quanta_count >= quantum_len
        || current.is_some_and(|id| {
            matches!(gate.arena.get(id).state, ThreadState::Finished | ThreadState::Waiting)
        });

    if !must_switch {
        return;
    }

    let start_level = gate.scheduler.pick_level();
    let dequeued = gate
        .scheduler
        .ready
        .dequeue_from(start_level)
        .or_else(|| gate.scheduler.ready.dequeue_from(0));

    let Some((deq_level, next_id)) = dequeued else {
        match current {
            Some(id) if gate.arena.get(id).state == ThreadState::Running => {
                // Nobody else is ready; keep running, nothing to switch.
            }
            Some(id) => {
                gate.arena.get_mut(id).idling = true;
                drop(gate);
                loop {
                    {
                        let g = Gate::close();
                        if g.arena.get(id).state == ThreadState::Running {
                            break;
                        }
                    }
                    std::hint::spin_loop();
                }
                let mut g = Gate::close();
                g.arena.get_mut(id).idling = false;
                g.current = Some(id);
            }
            None => {
                // Bootstrapped with nothing ready at all - there's no thread to run and no
                // switch has happened yet, so just return straight back to
                // `System::run_to_completion`.
            }
        }
        return;
    };

    if let Some(id) = current {
        let still_outgoing = id != next_id
            && !gate.arena.get(id).idling
            && matches!(gate.arena.get(id).state, ThreadState::Running | ThreadState::Ready);
        if still_outgoing {
            let demote_to = (gate.arena.get(id).level + 1).min(NUM_LEVELS - 1);
            let tcb = gate.arena.get_mut(id);
            tcb.state = ThreadState::Ready;
            tcb.level = demote_to;
            gate.scheduler.ready.enqueue(demote_to, id);
        }
    }

    gate.scheduler.quanta_count = 0;
    let next_tcb = gate.arena.get_mut(next_id);
    next_tcb.state = ThreadState::Running;
    next_tcb.level = deq_level;
    gate.current = Some(next_id);
    // `switch` resumes the next thread's own call stack directly, bypassing `trampoline` if
    // it's not the thread's first run - so the thread-local "who am I" marker must be set here,
    // on every switch, rather than only once when a thread is first entered.
    crate::thread::set_local_current(next_id);

    // When there's no outgoing thread, this is the initial bootstrap switch out of
    // `System::run_to_completion`'s own call stack - save into `main_return` instead of a TCB,
    // so the eventual zero-`live_threads` switch (above) has something to resume.
    let old_ptr: *mut StackPointer = match current {
        Some(id) => gate.arena.sp_ptr(id),
        None => &mut gate.main_return as *mut StackPointer,
    };
    let new_sp = gate.arena.get(next_id).sp;
    drop(gate);

    // SAFETY: `new_sp` was produced either by `stack::seed` (first run) or by a previous
    // `switch` that suspended exactly this thread. `old_ptr` points into either the arena-boxed
    // outgoing `Tcb` (stable until the reaper frees it, which never happens while `Running`) or
    // `Kernel.main_return` (stable for the static's lifetime).
    unsafe { stack::switch(&mut *old_ptr, new_sp) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_thresholds_cover_0_to_99() {
        for f in 0..100u32 {
            let level = LEVEL_THRESHOLDS.iter().position(|&t| f < t).unwrap();
            assert!(level < NUM_LEVELS);
        }
        assert_eq!(LEVEL_THRESHOLDS[NUM_LEVELS - 1], 100);
    }
}
