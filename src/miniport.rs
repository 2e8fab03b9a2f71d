//! Datagram ports ("miniports", C10): unbound (listening) ports in `0..32768` and bound
//! (sending) ports in `32768..=65535`, each with a mailbox behind a semaphore.

use std::collections::HashMap;

use crate::address::Address;
use crate::error::{MinithreadError, Result};
use crate::kernel::{Gate, Kernel};
use crate::queue::Fifo;
use crate::semaphore::{self, Semaphore, SemaphoreId};
use crate::wire::{self, DatagramHeader};

pub const UNBOUND_RANGE_END: u16 = 32768;

/// A listening port: created at a fixed, caller-chosen number, and read from with `receive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnboundPort(u16);

/// A sending port: bound to one specific remote address + port, minted either explicitly (to
/// initiate a conversation) or implicitly by `receive` (to reply to whoever just sent something).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundPort(u16);

struct Mailbox {
    sema: SemaphoreId,
    queue: Fifo<(Address, u16, Vec<u8>)>,
}

#[derive(Default)]
pub(crate) struct PortTable {
    unbound: HashMap<u16, Mailbox>,
    bound: HashMap<u16, (Address, u16)>,
    next_bound: u16,
}

impl PortTable {
    pub(crate) fn new() -> PortTable {
        PortTable { unbound: HashMap::new(), bound: HashMap::new(), next_bound: UNBOUND_RANGE_END }
    }
}

/// Create (or re-open) a listening port at a fixed number in `0..32768`. A number already in use
/// returns the existing port rather than failing - `create_unbound` is idempotent per number.
pub fn create_unbound(port_number: u16) -> Result<UnboundPort> {
    if port_number >= UNBOUND_RANGE_END {
        return Err(MinithreadError::InvalidParams);
    }
    let mut gate = Gate::close();
    if !gate.ports.unbound.contains_key(&port_number) {
        let sema_id = gate.semaphores.create(0);
        gate.ports.unbound.insert(port_number, Mailbox { sema: sema_id, queue: Fifo::new() });
    }
    Ok(UnboundPort(port_number))
}

pub fn destroy_unbound(port: UnboundPort) {
    let mut gate = Gate::close();
    if let Some(mailbox) = gate.ports.unbound.remove(&port.0) {
        gate.semaphores.destroy(mailbox.sema);
    }
}

/// Bind a fresh sending port to `(remote, remote_port)`, scanning `32768..=65535` round-robin
/// for a free slot (mirrors the original's `get_next_bound_pn`).
pub fn create_bound(remote: Address, remote_port: u16) -> Result<BoundPort> {
    let mut gate = Gate::close();
    create_bound_locked(&mut gate, remote, remote_port)
}

fn create_bound_locked(gate: &mut Kernel, remote: Address, remote_port: u16) -> Result<BoundPort> {
    let start = gate.ports.next_bound;
    loop {
        let candidate = gate.ports.next_bound;
        gate.ports.next_bound = if candidate == u16::MAX { UNBOUND_RANGE_END } else { candidate + 1 };
        if !gate.ports.bound.contains_key(&candidate) {
            gate.ports.bound.insert(candidate, (remote, remote_port));
            return Ok(BoundPort(candidate));
        }
        if gate.ports.next_bound == start {
            return Err(MinithreadError::NoMoreSockets);
        }
    }
}

pub fn destroy_bound(port: BoundPort) {
    let mut gate = Gate::close();
    gate.ports.bound.remove(&port.0);
}

/// Send `msg` from `local` to whatever `dest` is bound to.
pub fn send(local: UnboundPort, dest: BoundPort, msg: &[u8]) -> Result<()> {
    let gate = Gate::close();
    let &(remote, remote_port) = gate.ports.bound.get(&dest.0).ok_or(MinithreadError::InvalidParams)?;
    if msg.len() > gate.config.max_network_packet_size {
        return Err(MinithreadError::InvalidParams);
    }
    let header = DatagramHeader {
        source: gate.my_address(),
        source_port: local.0,
        dest: remote,
        dest_port: remote_port,
    };
    let mut buf = vec![0u8; wire::DATAGRAM_HEADER_LEN + msg.len()];
    header.pack(wire::PROTOCOL_DATAGRAM, &mut buf);
    buf[wire::DATAGRAM_HEADER_LEN..].copy_from_slice(msg);
    let transport = gate.transport();
    drop(gate);
    transport.send_to(remote, &buf).map_err(|_| MinithreadError::SendError)
}

/// Block until a datagram arrives at `local`. Returns the payload and a freshly-minted
/// [`BoundPort`] addressed back at whoever sent it, so the caller can reply.
pub fn receive(local: UnboundPort) -> Result<(Vec<u8>, BoundPort)> {
    let sema = {
        let gate = Gate::close();
        let mailbox = gate.ports.unbound.get(&local.0).ok_or(MinithreadError::InvalidParams)?;
        Semaphore(mailbox.sema)
    };
    sema.p();
    let mut gate = Gate::close();
    let mailbox = gate.ports.unbound.get_mut(&local.0).ok_or(MinithreadError::InvalidParams)?;
    let (from, from_port, payload) = mailbox.queue.pop_front().ok_or(MinithreadError::ReceiveError)?;
    let reply_port = create_bound_locked(&mut gate, from, from_port)?;
    Ok((payload, reply_port))
}

/// Route an arrived datagram to its destination mailbox, if one is listening. Called from the
/// network receiver thread with the gate already closed.
pub(crate) fn deliver(gate: &mut Kernel, header: DatagramHeader, full_packet: &[u8]) {
    let Some(mailbox) = gate.ports.unbound.get_mut(&header.dest_port) else {
        log::debug!("dropping datagram for unknown unbound port {}", header.dest_port);
        return;
    };
    let payload = full_packet[wire::DATAGRAM_HEADER_LEN..].to_vec();
    mailbox.queue.push_back((header.source, header.source_port, payload));
    let sema_id = mailbox.sema;
    semaphore::v_locked(gate, sema_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::System;

    #[test]
    fn send_then_receive_round_trips_the_payload() {
        System::run_to_completion(Default::default(), || {
            let server = create_unbound(7000).unwrap();
            let client_dest = create_bound(System::test_self_address(), 7000).unwrap();
            let client_reply_port = create_unbound(7001).unwrap();

            crate::thread::fork(move || {
                send(client_reply_port, client_dest, b"hello").unwrap();
            });

            let (payload, _reply_to) = receive(server).unwrap();
            assert_eq!(payload, b"hello");
        });
    }

    #[test]
    fn create_unbound_is_idempotent_for_an_in_use_number() {
        System::run_to_completion(Default::default(), || {
            let first = create_unbound(7002).unwrap();
            let second = create_unbound(7002).unwrap();
            assert_eq!(first, second);
        });
    }
}
