//! The clock (C12): a dedicated OS thread that stands in for the original's periodic timer
//! interrupt. Every `period_ms` it closes the gate, advances `current_tick`, bumps the
//! scheduler's quantum counter, and fires any alarms that are now due.
//!
//! This is the one piece of the design that can't be purely cooperative: something has to
//! advance wall-clock time even while a minithread is deep inside a long `P()` wait. A second OS
//! thread that only ever touches bookkeeping (never a stack, never `stack::switch`) is the
//! smallest way to get that without real signal-based preemption.
//!
//! That also means a tick never switches threads itself - it can't call
//! [`crate::scheduler::reschedule`] without being the thread being switched away from. Quantum
//! expiry is enforced lazily instead, the next time the running thread hits a safepoint after
//! `quanta_count` has crossed its level's quantum; see DESIGN.md's "Clock-tick preemption" entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::kernel::Gate;

pub(crate) struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Ticker {
    pub(crate) fn spawn(period_ms: u64) -> Ticker {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_reader = stop.clone();
        let handle = std::thread::Builder::new()
            .name("minithread-clock".into())
            .spawn(move || {
                let period = Duration::from_millis(period_ms.max(1));
                while !stop_reader.load(Ordering::Relaxed) {
                    std::thread::sleep(period);
                    tick();
                }
            })
            .expect("failed to spawn clock thread");
        Ticker { stop, handle: Some(handle) }
    }

    pub(crate) fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// One clock tick's worth of bookkeeping (`clock_handler` in the original), run with the gate
/// closed throughout.
fn tick() {
    let mut gate = Gate::close();
    gate.current_tick += 1;
    gate.scheduler.quanta_count += 1;
    loop {
        let current_tick = gate.current_tick;
        match gate.alarms.pop_due(current_tick) {
            Some((_, handler)) => handler(&mut gate),
            None => break,
        }
    }
}
