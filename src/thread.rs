//! The public thread API (C3/C4): `fork`, `yield_now`, `stop`, `start`, `self_id`.

use crate::kernel::Gate;
use crate::scheduler;
use crate::tcb::{Tcb, ThreadId, ThreadState};

/// Handle to a forked minithread. Unlike [`crate::Semaphore`] this carries no behavior beyond
/// identity - `stop`/`start` take a `ThreadId` directly, matching the original's `minithread_t`.
pub type ThreadHandle = ThreadId;

thread_local! {
    /// Set once, by the one real OS thread that ever runs minithread bodies, so a body can find
    /// out which minithread it's currently executing without needing the gate.
    static CURRENT: std::cell::Cell<Option<ThreadId>> = const { std::cell::Cell::new(None) };
}

pub(crate) fn set_local_current(id: ThreadId) {
    CURRENT.with(|c| c.set(Some(id)));
}

/// Fork a new minithread running `body`. It starts on the ready queue and runs whenever the
/// scheduler gets to it - possibly before `fork` returns, if the caller happens to be preempted
/// at its very next safepoint (it isn't preempted *by* this call; `fork` itself never switches).
pub fn fork(body: impl FnOnce() + Send + 'static) -> ThreadHandle {
    fork_internal(body, true)
}

/// Like `fork`, but the new thread doesn't count toward the run's liveness total. Used for the
/// reaper, which must keep running after every user thread has finished.
pub(crate) fn fork_internal(body: impl FnOnce() + Send + 'static, counts_as_live: bool) -> ThreadHandle {
    let mut gate = Gate::close();
    let stack_size = gate.config.stack_size;
    let id = gate
        .arena
        .insert(|id| Tcb::new(id, stack_size, trampoline, Box::new(body), counts_as_live));
    gate.arena.get_mut(id).state = ThreadState::Ready;
    gate.scheduler.ready.enqueue(0, id);
    if counts_as_live {
        gate.live_threads += 1;
    }
    id
}

/// The thread entry point every minithread stack is seeded with. Never returns: once the body
/// finishes it marks itself `Finished` and falls straight into the scheduler, which switches
/// away for good.
unsafe extern "C" fn trampoline() -> ! {
    let (id, body) = {
        let mut gate = Gate::close();
        let id = gate.current.expect("trampoline entered with no current thread");
        let body = gate.arena.get_mut(id).body.take().expect("trampoline entered twice");
        (id, body)
    };
    body();
    let mut gate = Gate::close();
    gate.arena.get_mut(id).state = ThreadState::Finished;
    scheduler::reschedule(gate);
    unreachable!("a finished thread was switched back into");
}

/// Identity of whichever minithread called this.
pub fn self_id() -> ThreadHandle {
    CURRENT.with(|c| c.get()).expect("self_id called outside a minithread")
}

/// Voluntarily give up the remainder of the current quantum. The scheduler may or may not
/// actually switch away, depending on whether anything else is ready (§4.1).
pub fn yield_now() {
    let gate = Gate::close();
    scheduler::reschedule(gate);
}

/// Move `id` from `Waiting` to `Ready`. A no-op if it's already runnable.
pub fn start(id: ThreadHandle) {
    let mut gate = Gate::close();
    scheduler::start_locked(&mut gate, id);
}

/// Move the current thread to `Waiting`, then invoke the scheduler. The caller only resumes
/// once some other code calls [`start`] on it.
pub fn stop() {
    let mut gate = Gate::close();
    let id = gate.current.expect("stop called outside a minithread");
    gate.arena.get_mut(id).state = ThreadState::Waiting;
    scheduler::reschedule(gate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::System;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn forked_threads_all_run_to_completion() {
        let counter = Arc::new(AtomicUsize::new(0));
        System::run_to_completion(Default::default(), {
            let counter = counter.clone();
            move || {
                for _ in 0..8 {
                    let counter = counter.clone();
                    fork(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        yield_now();
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                }
            }
        });
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn stop_then_start_resumes_the_thread() {
        let ran = Arc::new(AtomicUsize::new(0));
        let handle: Arc<std::sync::Mutex<Option<ThreadHandle>>> = Arc::new(std::sync::Mutex::new(None));
        System::run_to_completion(Default::default(), {
            let ran = ran.clone();
            let handle = handle.clone();
            move || {
                let h = fork(move || {
                    stop();
                    ran.fetch_add(1, Ordering::SeqCst);
                });
                *handle.lock().unwrap() = Some(h);
                fork(move || {
                    yield_now();
                    let id = handle.lock().unwrap().take().unwrap();
                    start(id);
                });
            }
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
