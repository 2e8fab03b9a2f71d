//! `sleep_with_timeout` (C9): built from an alarm and a private semaphore, exactly as the
//! original's `minithread_sleep_with_timeout` combines `register_alarm` with a semaphore `P`.

use crate::kernel::Gate;
use crate::semaphore::{self, Semaphore};
use crate::thread;

/// Suspend the calling thread for approximately `delay_ms` milliseconds.
///
/// Implemented as: create a semaphore, register an alarm that `V`s it, `P` it. The alarm fires
/// from the clock's tick processing with the gate already closed, so its handler can `V` the
/// semaphore directly without re-locking (see [`crate::semaphore::v_locked`]).
pub fn sleep_with_timeout(delay_ms: u64) {
    let sema = Semaphore::new(0);
    {
        let mut gate = Gate::close();
        let period_ms = gate.config.period_ms;
        let current_tick = gate.current_tick;
        let sema_id = sema.0;
        gate.alarms.register(
            current_tick,
            delay_ms,
            period_ms,
            Box::new(move |kernel| semaphore::v_locked(kernel, sema_id)),
        );
    }
    sema.p();
    sema.destroy();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::System;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn sleepers_wake_in_deadline_order() {
        // Mirrors §8(a): three threads sleeping for 300ms, 100ms, 200ms should record their
        // wakeups in 100/200/300 order regardless of fork order.
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let delays = [(1, 300u64), (2, 100u64), (3, 200u64)];
        System::run_to_completion(Default::default(), {
            let order = order.clone();
            move || {
                for (tag, delay) in delays {
                    let order = order.clone();
                    thread::fork(move || {
                        sleep_with_timeout(delay);
                        order.lock().unwrap().push(tag);
                    });
                }
            }
        });
        assert_eq!(*order.lock().unwrap(), vec![2, 3, 1]);
    }
}
