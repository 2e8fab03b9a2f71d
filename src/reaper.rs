//! The reaper (C6, `vaccum_cleaner` in the original): a minithread that frees finished TCBs.
//!
//! Stacks can't be freed by the thread that was running on them - the original handles this by
//! forking a dedicated cleanup thread that `P`s a semaphore `V`'d every time a thread finishes,
//! and here we do the same.

use crate::kernel::{self, Gate};
use crate::semaphore::{self, Semaphore};
use crate::thread;

pub(crate) fn install() {
    let sema = Semaphore::new(0);
    kernel::set_cleanup_sema(sema.0);
    thread::fork_internal(move || loop {
        semaphore::p(sema.0);
        let done = {
            let mut gate = Gate::close();
            let mut done = Vec::new();
            while let Some(id) = gate.scheduler.finished.pop_front() {
                done.push(id);
            }
            done
        };
        if done.is_empty() {
            // Spurious wakeup: cleanup_sema is `V`'d once per finished thread, but a previous
            // pass through this loop may have already drained everything it was meant to cover.
            continue;
        }
        let mut gate = Gate::close();
        for id in done {
            gate.arena.free(id);
        }
    }, false);
}
