/*!
A user-space cooperative-threading microkernel: minithreads with their own stacks, a
multi-level-feedback scheduler driven by a periodic clock, an alarm/timer service, counting
semaphores, and both an unreliable datagram layer and a reliable stop-and-wait socket layer built
on top.

Everything here runs inside a single host process. There's no real preemption - no signal landing
mid-instruction - so a forked [`thread::fork`] body only gets switched away from at a safepoint:
`yield_now`, `sleep`, a blocking semaphore `P`, or a socket send/receive wait. The clock still
ticks the scheduler's quanta forward on every period, so a thread that hits safepoints regularly
gets demoted and switched out at its current level's quantum boundary just as it would under real
interrupt-driven preemption - but a thread that never calls anything and never returns monopolizes
the CPU, same as in any cooperative scheduler without OS-signal support. See `DESIGN.md`'s
"Clock-tick preemption" entry for why.

## Usage

```
use minithread::{System, thread};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

let counter = Arc::new(AtomicUsize::new(0));
let counter1 = counter.clone();

System::run_to_completion(Default::default(), move || {
    thread::fork(move || {
        counter1.fetch_add(1, Ordering::SeqCst);
    });
});

assert_eq!(counter.load(Ordering::SeqCst), 1);
```

`System::run_to_completion` blocks the calling OS thread until the forked minithread tree has
entirely finished - there's no way to leave minithreads running in the background once it
returns.

## Design

The kernel singleton ([`crate::kernel`]) is a `Mutex<Kernel>`; locking it is "closing the
interrupt gate" and dropping the guard is "opening" it, since this crate has no real interrupts to
mask and a single-CPU cooperative model makes mutual exclusion equivalent to "nothing preempted
me." Two auxiliary OS threads exist purely to drive time and the network forward:
[`crate::clock::Ticker`] plays the role of the periodic timer interrupt, and
[`crate::transport::Receiver`] plays the role of the NIC's receive interrupt. Neither ever touches
a minithread's stack.

See `DESIGN.md` in the repository for how each module is grounded and why.
*/

mod address;
mod alarm;
mod clock;
mod error;
mod kernel;
mod miniport;
mod minisocket;
mod queue;
mod reaper;
mod scheduler;
mod semaphore;
mod sleep;
mod stack;
mod system;
mod tcb;
mod thread;
mod transport;
mod wire;

pub use address::Address;
pub use error::{MinithreadError, Result};
pub use kernel::KernelConfig;
pub use semaphore::Semaphore;
pub use sleep::sleep_with_timeout;
pub use system::System;

/// Minithread identity and lifecycle: `fork`, `self_id`, `yield_now`, `stop`, `start` (C4).
pub mod thread {
    pub use crate::thread::{fork, self_id, start, stop, yield_now, ThreadHandle};
}

/// Datagram ("miniport") ports: unbound listening endpoints and bound sending endpoints, each
/// carrying an unreliable, best-effort payload (C10).
pub mod miniport {
    pub use crate::miniport::{create_bound, create_unbound, destroy_bound, destroy_unbound, receive, send, BoundPort, UnboundPort};
}

/// Reliable, connection-oriented sockets: three-way handshake, stop-and-wait retransmission, and
/// graceful close (C11).
pub mod minisocket {
    pub use crate::minisocket::{close, connect, listen, receive, send, SocketId};
}
