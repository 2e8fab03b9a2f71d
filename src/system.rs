//! The system facade: wires a kernel, a clock, and a transport together and runs minithread
//! bodies to completion on the calling OS thread.
//!
//! Two OS threads exist alongside the one running minithread code: [`crate::clock::Ticker`]
//! (stands in for the periodic timer interrupt, C12) and [`crate::transport::Receiver`] (stands
//! in for the NIC's receive interrupt). Neither ever touches a minithread stack; both only ever
//! close the gate, mutate kernel state, and release it.

use std::net::SocketAddrV4;
use std::sync::Arc;

use crate::address::Address;
use crate::clock::Ticker;
use crate::kernel::{self, Gate, KernelConfig};
use crate::scheduler;
use crate::transport::{LoopbackNetworkHandle, Receiver, Transport, UdpTransport};

/// The address a [`System::run_to_completion`] kernel reports as its own. There's exactly one
/// node on that kernel's loopback network, so the value only matters in that it's stable across
/// calls (tests that stash it as a destination address need it to keep meaning the same thing).
const LOOPBACK_SELF: Address = Address::from_bytes([1u8; crate::address::ADDRESS_LEN]);

/// Bootstraps a kernel and runs minithread code on the calling OS thread.
///
/// There is deliberately no `System` value to hold onto: exactly one kernel can be installed at
/// a time (it lives behind a process-wide singleton, §9 "global mutable scheduler state"), and
/// `run_to_completion`/`run_on_udp` each own that kernel's entire lifetime, start to finish.
pub struct System;

impl System {
    /// Bring up a fresh kernel over an in-process loopback transport (no real network I/O),
    /// fork `entry` as the first minithread, and block the calling OS thread until every thread
    /// it transitively forks has finished.
    ///
    /// This is what every test in this crate uses instead of real sockets.
    pub fn run_to_completion(config: KernelConfig, entry: impl FnOnce() + Send + 'static) {
        let network = LoopbackNetworkHandle::new();
        let transport = network.join(LOOPBACK_SELF, 0.0);
        Self::run_with_transport(config, Arc::new(transport), entry);
    }

    /// Like [`Self::run_to_completion`], but packets between `entry` and whatever it forks are
    /// dropped with probability `loss_rate` (0.0..=1.0) - used to exercise retransmission (§8(d))
    /// deterministically without a real flaky network.
    pub fn run_to_completion_lossy(config: KernelConfig, loss_rate: f64, entry: impl FnOnce() + Send + 'static) {
        let network = LoopbackNetworkHandle::new();
        let transport = network.join(LOOPBACK_SELF, loss_rate);
        Self::run_with_transport(config, Arc::new(transport), entry);
    }

    /// Bring up a kernel bound to a real UDP socket and run `entry` on it.
    pub fn run_on_udp(
        config: KernelConfig,
        addr: SocketAddrV4,
        entry: impl FnOnce() + Send + 'static,
    ) -> std::io::Result<()> {
        let transport = UdpTransport::bind(addr)?;
        Self::run_with_transport(config, Arc::new(transport), entry);
        Ok(())
    }

    /// The address [`Self::run_to_completion`]'s kernel reports as its own - useful in tests that
    /// need to address a bound port or socket back at the single node the loopback network runs
    /// on.
    pub fn test_self_address() -> Address {
        LOOPBACK_SELF
    }

    fn run_with_transport(config: KernelConfig, transport: Arc<dyn Transport>, entry: impl FnOnce() + Send + 'static) {
        let period_ms = config.period_ms;
        kernel::install(config, transport.clone());
        let receiver = Receiver::spawn(transport.clone());
        let ticker = Ticker::spawn(period_ms);

        crate::thread::fork(entry);

        // The bootstrap switch (§4.2 "no TCB is currently running"): `reschedule` saves this OS
        // thread's context into `Kernel::main_return` and switches into whichever minithread runs
        // first. Control returns here only once `live_threads` reaches zero and the reaper's
        // cleanup of the last finished thread switches back into `main_return`.
        let gate = Gate::close();
        scheduler::reschedule(gate);

        ticker.stop();
        drop(transport);
        receiver.stop();
        kernel::teardown();
    }
}
