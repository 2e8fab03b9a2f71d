//! The kernel singleton and the interrupt gate (C1).
//!
//! Every piece of kernel state - the TCB arena, the scheduler's queues, alarms, semaphores,
//! port and socket tables - lives behind one `Mutex`. Closing the gate is locking it; opening
//! it is dropping the guard. This crate has no real interrupts to mask, so the mutex *is* the
//! gate: anything that would corrupt kernel state if two logical threads touched it at once
//! must hold the gate first.
//!
//! The one place this needs care is [`crate::scheduler::reschedule`], which must drop the gate
//! before handing control to [`crate::stack::switch`] - holding a `MutexGuard` across a stack
//! swap would mean the *next* thread to run starts out with the gate already (and permanently)
//! closed.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::address::Address;
use crate::alarm::AlarmQueue;
use crate::miniport::PortTable;
use crate::minisocket::SocketTable;
use crate::scheduler::SchedulerState;
use crate::semaphore::{self, SemaphoreId, SemaphoreTable};
use crate::stack::StackPointer;
use crate::tcb::{Arena, ThreadId};
use crate::transport::Transport;

/// Replaces the original's compile-time macros (`PERIOD`, `QUANTA_ADDRESSES`, ...) with ordinary
/// runtime configuration (§ ambient stack - configuration).
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Length of one clock tick, in milliseconds. Drives both scheduling quanta and alarms.
    pub period_ms: u64,
    /// Default stack size for a forked thread.
    pub stack_size: usize,
    /// Initial retransmission timeout for a reliable socket, in milliseconds.
    pub initial_timeout_ms: u64,
    /// Maximum number of retransmission attempts before a reliable send gives up.
    pub max_send_attempts: u32,
    /// Largest network packet this kernel will send or accept, in bytes.
    pub max_network_packet_size: usize,
    /// How long a reliable socket waits in `Closing` for in-flight traffic before freeing itself.
    pub close_grace_period_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> KernelConfig {
        KernelConfig {
            period_ms: 100,
            stack_size: crate::stack::DEFAULT_STACK_SIZE,
            initial_timeout_ms: 100,
            max_send_attempts: 7,
            max_network_packet_size: 4096,
            close_grace_period_ms: 1000,
        }
    }
}

pub(crate) struct Kernel {
    pub(crate) arena: Arena,
    pub(crate) scheduler: SchedulerState,
    pub(crate) alarms: AlarmQueue,
    pub(crate) semaphores: SemaphoreTable,
    pub(crate) ports: PortTable,
    pub(crate) sockets: SocketTable,
    pub(crate) current: Option<ThreadId>,
    pub(crate) current_tick: u64,
    pub(crate) config: KernelConfig,
    cleanup_sema: Option<SemaphoreId>,
    /// Number of forked threads that count toward completion (everything except the reaper)
    /// which haven't finished yet. Reaching zero ends a `System::run_to_completion` call.
    pub(crate) live_threads: u32,
    /// The saved context of whichever OS thread called `System::run_to_completion` - switched
    /// back into once `live_threads` reaches zero.
    pub(crate) main_return: StackPointer,
    /// The packet sink/source this kernel is wired to. `None` only between `Kernel::new` and
    /// [`install`] finishing, which nothing outside this module can observe.
    transport: Option<Arc<dyn Transport>>,
}

impl Kernel {
    fn new(config: KernelConfig) -> Kernel {
        Kernel {
            arena: Arena::new(),
            scheduler: SchedulerState::new(),
            alarms: AlarmQueue::new(),
            semaphores: SemaphoreTable::new(),
            ports: PortTable::new(),
            sockets: SocketTable::new(),
            current: None,
            current_tick: 0,
            config,
            cleanup_sema: None,
            live_threads: 0,
            main_return: StackPointer::bootstrap_placeholder(),
            transport: None,
        }
    }

    /// `V` the reaper's semaphore. Called with the gate already closed (from inside
    /// `reschedule`), so it must not try to lock again.
    pub(crate) fn cleanup_sema_v(&mut self) {
        if let Some(id) = self.cleanup_sema {
            semaphore::v_locked(self, id);
        }
    }

    /// This kernel's own address on its transport (§6 `Address`: `my_address`).
    pub(crate) fn my_address(&self) -> Address {
        self.transport.as_ref().expect("kernel not bootstrapped with a transport").local_address()
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        self.transport.as_ref().expect("kernel not bootstrapped with a transport").clone()
    }
}

lazy_static::lazy_static! {
    static ref KERNEL: Mutex<Option<Kernel>> = Mutex::new(None);
}

/// A closed gate: exclusive access to kernel state, modeling "interrupts masked."
pub(crate) struct Gate(MutexGuard<'static, Option<Kernel>>);

impl Gate {
    /// Lock the kernel. Panics if called before [`install`] - there is no kernel state to
    /// close the gate on yet.
    pub(crate) fn close() -> Gate {
        let guard = KERNEL.lock().unwrap_or_else(|e| e.into_inner());
        assert!(guard.is_some(), "kernel not bootstrapped - call System::run_to_completion first");
        Gate(guard)
    }
}

impl std::ops::Deref for Gate {
    type Target = Kernel;
    fn deref(&self) -> &Kernel {
        self.0.as_ref().expect("gate open with no kernel")
    }
}

impl std::ops::DerefMut for Gate {
    fn deref_mut(&mut self) -> &mut Kernel {
        self.0.as_mut().expect("gate open with no kernel")
    }
}

/// Install a fresh kernel, replacing any previous one. Used once per `System::run_to_completion`
/// (or `run_on_udp`) call; exists as its own function so tests can reset kernel state between
/// runs without restarting the process.
pub(crate) fn install(config: KernelConfig, transport: Arc<dyn Transport>) {
    let mut guard = KERNEL.lock().unwrap_or_else(|e| e.into_inner());
    let mut kernel = Kernel::new(config);
    kernel.transport = Some(transport);
    *guard = Some(kernel);
    drop(guard);
    crate::reaper::install();
}

/// Tear down the kernel installed by [`install`]. Drops every still-allocated stack (the reaper's
/// included - it is always parked in a `P()` at this point, never mid-instruction on its stack in
/// a way that matters once nothing will ever switch back into it).
pub(crate) fn teardown() {
    let mut guard = KERNEL.lock().unwrap_or_else(|e| e.into_inner());
    *guard = None;
}

pub(crate) fn set_cleanup_sema(id: SemaphoreId) {
    let mut gate = Gate::close();
    gate.cleanup_sema = Some(id);
}
