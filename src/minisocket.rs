//! Reliable sockets (C11), grounded directly in the original's `minisocket_utils.c`: a
//! three-way handshake, stop-and-wait transmission with exponential-backoff retransmission, and
//! an alarm-driven graceful close.
//!
//! Both ends of the handshake spend time in [`ConnState::Handshaking`] before the socket is
//! usable: a socket only becomes [`ConnState::Connected`] once a real ack for its own half of the
//! exchange has come back, never merely because a SYN or SYNACK arrived. `listen`'s SYNACK is
//! sent through the same retry-with-backoff path as any other reliable send
//! (`minisocket_utils_wait_for_client` drives its own retransmissions the same way the original's
//! `minisocket_utils_send_packet_and_wait` does); exhausting those retries drops the half-open
//! attempt and returns to waiting for the next SYN rather than handing back a socket nobody ever
//! acked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::address::Address;
use crate::error::{MinithreadError, Result};
use crate::kernel::{Gate, Kernel};
use crate::queue::Fifo;
use crate::semaphore::{self, Semaphore, SemaphoreId};
use crate::wire::{self, DatagramHeader, MessageType, ReliableHeader};

const CLIENT_PORT_RANGE_START: u16 = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketKind {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    /// SYN/SYNACK sent (or SYN received and a SYNACK attempt underway), real ack not yet seen.
    Handshaking,
    Connected,
    Closing,
    Closed,
}

struct SocketState {
    kind: SocketKind,
    local_port: u16,
    remote: Address,
    remote_port: u16,
    state: ConnState,
    send_seq: u32,
    recv_expected_seq: u32,
    ack_sema: SemaphoreId,
    last_ack_seen: Option<u32>,
    recv_queue: Fifo<Vec<u8>>,
    recv_sema: SemaphoreId,
}

#[derive(Default)]
pub(crate) struct SocketTable {
    sockets: HashMap<u32, SocketState>,
    listeners: HashMap<u16, SemaphoreId>,
    pending_connections: HashMap<u16, Fifo<(Address, u16, u32)>>,
    next_id: u32,
    next_client_port: u16,
}

impl SocketTable {
    pub(crate) fn new() -> SocketTable {
        SocketTable {
            sockets: HashMap::new(),
            listeners: HashMap::new(),
            pending_connections: HashMap::new(),
            next_id: 0,
            next_client_port: CLIENT_PORT_RANGE_START,
        }
    }
}

static SEQ_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Server side of the handshake (§4.8, `minisocket_utils_wait_for_client`): block until a SYN
/// arrives at `port`, drive the SYNACK through the same retry-with-backoff path as any other
/// reliable send, and return a socket only once a real ACK for that SYNACK has come back. A SYNACK
/// that never gets acked drops the half-open attempt and goes back to waiting for the next SYN
/// (Handshaking --SYNACK retry exhausted--> OpenServer), rather than handing back a socket nobody
/// on the other end actually agreed to.
pub fn listen(port: u16) -> Result<SocketId> {
    let sema = {
        let mut gate = Gate::close();
        if gate.sockets.listeners.contains_key(&port) {
            return Err(MinithreadError::PortInUse);
        }
        let sema_id = gate.semaphores.create(0);
        gate.sockets.listeners.insert(port, sema_id);
        gate.sockets.pending_connections.insert(port, Fifo::new());
        Semaphore(sema_id)
    };
    loop {
        sema.p();
        let popped = {
            let mut gate = Gate::close();
            gate.sockets.pending_connections.get_mut(&port).and_then(|q| q.pop_front())
        };
        let Some((remote, remote_port, client_seq)) = popped else {
            continue;
        };
        let already_in_flight = {
            let gate = Gate::close();
            gate.sockets.sockets.values().any(|s| {
                s.local_port == port
                    && s.remote == remote
                    && s.remote_port == remote_port
                    && matches!(s.state, ConnState::Handshaking | ConnState::Connected)
            })
        };
        if already_in_flight {
            // A retransmitted SYN for a handshake already underway (or already established) -
            // the in-flight attempt's own send_and_wait loop is already handling it.
            continue;
        }
        let id = {
            let mut gate = Gate::close();
            new_socket(&mut gate, SocketKind::Server, ConnState::Handshaking, port, remote, remote_port)
        };
        let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
        match send_and_wait(id, MessageType::SynAck, seq, client_seq, &[]) {
            Ok(_) => {
                let mut gate = Gate::close();
                if let Some(s) = gate.sockets.sockets.get_mut(&id.0) {
                    s.state = ConnState::Connected;
                }
                return Ok(id);
            }
            Err(_) => {
                let mut gate = Gate::close();
                if let Some(s) = gate.sockets.sockets.remove(&id.0) {
                    gate.semaphores.destroy(s.ack_sema);
                    gate.semaphores.destroy(s.recv_sema);
                }
            }
        }
    }
}

/// Client side (§4.8, `minisocket_utils_client_get_valid_port` + the SYN/SYNACK/ACK exchange):
/// pick a fresh local port and connect to `remote:remote_port`. Only returns `Ok` once the SYN has
/// actually been acked by a SYNACK; exhausting retries tears the half-open socket back down.
pub fn connect(remote: Address, remote_port: u16) -> Result<SocketId> {
    let local_port = {
        let mut gate = Gate::close();
        allocate_client_port(&mut gate)?
    };
    let id = {
        let mut gate = Gate::close();
        new_socket(&mut gate, SocketKind::Client, ConnState::Handshaking, local_port, remote, remote_port)
    };
    let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
    match send_and_wait(id, MessageType::Syn, seq, 0, &[]) {
        Ok(_) => {
            let mut gate = Gate::close();
            if let Some(s) = gate.sockets.sockets.get_mut(&id.0) {
                s.state = ConnState::Connected;
            }
            Ok(id)
        }
        Err(e) => {
            let mut gate = Gate::close();
            if let Some(s) = gate.sockets.sockets.remove(&id.0) {
                gate.semaphores.destroy(s.ack_sema);
                gate.semaphores.destroy(s.recv_sema);
            }
            Err(e)
        }
    }
}

fn allocate_client_port(gate: &mut Kernel) -> Result<u16> {
    let start = gate.sockets.next_client_port;
    loop {
        let candidate = gate.sockets.next_client_port;
        gate.sockets.next_client_port = if candidate == u16::MAX { CLIENT_PORT_RANGE_START } else { candidate + 1 };
        let in_use = gate.sockets.sockets.values().any(|s| s.local_port == candidate);
        if !in_use {
            return Ok(candidate);
        }
        if gate.sockets.next_client_port == start {
            return Err(MinithreadError::NoMoreSockets);
        }
    }
}

fn new_socket(gate: &mut Kernel, kind: SocketKind, state: ConnState, local_port: u16, remote: Address, remote_port: u16) -> SocketId {
    let id = gate.sockets.next_id;
    gate.sockets.next_id += 1;
    let ack_sema = gate.semaphores.create(0);
    let recv_sema = gate.semaphores.create(0);
    gate.sockets.sockets.insert(
        id,
        SocketState {
            kind,
            local_port,
            remote,
            remote_port,
            state,
            send_seq: 0,
            recv_expected_seq: 0,
            ack_sema,
            last_ack_seen: None,
            recv_queue: Fifo::new(),
            recv_sema,
        },
    );
    SocketId(id)
}

/// Stop-and-wait send with exponential backoff (§4.8,
/// `minisocket_utils_send_packet_and_wait`): start at `initial_timeout_ms`, double on every
/// timeout, give up after `max_send_attempts`. Returns the number of payload bytes accepted.
/// `ack_number` lets the server's SYNACK echo the client's SYN sequence number the same way
/// `deliver`'s other replies do; plain data/SYN sends have nothing to echo and pass `0`.
fn send_and_wait(socket: SocketId, message_type: MessageType, seq: u32, ack_number: u32, payload: &[u8]) -> Result<usize> {
    let (header, ack_sema, initial_timeout_ms, max_attempts) = {
        let gate = Gate::close();
        let s = gate.sockets.sockets.get(&socket.0).ok_or(MinithreadError::InvalidParams)?;
        let header = ReliableHeader {
            datagram: DatagramHeader {
                source: gate.my_address(),
                source_port: s.local_port,
                dest: s.remote,
                dest_port: s.remote_port,
            },
            message_type,
            seq_number: seq,
            ack_number,
        };
        (header, Semaphore(s.ack_sema), gate.config.initial_timeout_ms, gate.config.max_send_attempts)
    };

    let mut buf = vec![0u8; wire::RELIABLE_HEADER_LEN + payload.len()];
    header.pack(&mut buf);
    buf[wire::RELIABLE_HEADER_LEN..].copy_from_slice(payload);

    let mut timeout_ms = initial_timeout_ms;
    for attempt in 0..max_attempts {
        {
            let gate = Gate::close();
            let transport = gate.transport();
            drop(gate);
            let _ = transport.send_to(header.datagram.dest, &buf);
        }
        match wait_for_ack_with_timeout(socket, &ack_sema, timeout_ms) {
            AckWait::Acked => return Ok(payload.len()),
            AckWait::Closed => return Err(MinithreadError::ConnectionClosed),
            AckWait::TimedOut => {
                log::debug!("minisocket retransmit attempt {attempt} timed out after {timeout_ms}ms");
                timeout_ms *= 2;
            }
        }
    }
    Err(MinithreadError::Timeout)
}

enum AckWait {
    Acked,
    TimedOut,
    Closed,
}

/// `P` the ack semaphore with a timeout, implemented with a companion alarm that `V`s it if the
/// real ack never arrives in time (mirrors the original's `minisocket_utils_wait_for_ack`).
///
/// Three things can wake this `P`: a real ack via [`deliver`], the timeout alarm below, or
/// [`close`] signalling a concurrent close. All three share one semaphore, so the wake has to be
/// disambiguated by re-checking `timeout_fired` and the socket's state afterwards rather than by
/// trusting "woke up" to mean "acked".
fn wait_for_ack_with_timeout(socket: SocketId, sema: &Semaphore, timeout_ms: u64) -> AckWait {
    let timeout_fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let alarm_id = {
        let mut gate = Gate::close();
        let period_ms = gate.config.period_ms;
        let current_tick = gate.current_tick;
        let sema_id = sema.0;
        let flag = timeout_fired.clone();
        gate.alarms.register(
            current_tick,
            timeout_ms,
            period_ms,
            Box::new(move |kernel| {
                flag.store(true, Ordering::SeqCst);
                semaphore::v_locked(kernel, sema_id);
            }),
        )
    };
    sema.p();
    if timeout_fired.load(Ordering::SeqCst) {
        return AckWait::TimedOut;
    }
    let mut gate = Gate::close();
    gate.alarms.deregister(alarm_id);
    let closed = gate
        .sockets
        .sockets
        .get(&socket.0)
        .map_or(true, |s| matches!(s.state, ConnState::Closing | ConnState::Closed));
    if closed {
        AckWait::Closed
    } else {
        AckWait::Acked
    }
}

/// Send without waiting for an ack (used for plain ACKs themselves, per
/// `minisocket_utils_send_packet_no_wait`).
fn send_no_wait(gate: &Kernel, header: &ReliableHeader) {
    let mut buf = vec![0u8; wire::RELIABLE_HEADER_LEN];
    header.pack(&mut buf);
    let transport = gate.transport();
    let _ = transport.send_to(header.datagram.dest, &buf);
}

/// Send `data` reliably and block until it's acknowledged. Returns the number of bytes sent.
pub fn send(socket: SocketId, data: &[u8]) -> Result<usize> {
    let seq = {
        let mut gate = Gate::close();
        if data.len() > gate.config.max_network_packet_size {
            return Err(MinithreadError::InvalidParams);
        }
        let s = gate.sockets.sockets.get_mut(&socket.0).ok_or(MinithreadError::InvalidParams)?;
        if s.state != ConnState::Connected {
            return Err(MinithreadError::ConnectionClosed);
        }
        s.send_seq += 1;
        s.send_seq
    };
    send_and_wait(socket, MessageType::Data, seq, 0, data)
}

/// Block until the next in-order payload arrives.
pub fn receive(socket: SocketId) -> Result<Vec<u8>> {
    let sema = {
        let gate = Gate::close();
        let s = gate.sockets.sockets.get(&socket.0).ok_or(MinithreadError::InvalidParams)?;
        Semaphore(s.recv_sema)
    };
    sema.p();
    let mut gate = Gate::close();
    let s = gate.sockets.sockets.get_mut(&socket.0).ok_or(MinithreadError::InvalidParams)?;
    s.recv_queue.pop_front().ok_or(MinithreadError::ConnectionClosed)
}

/// Graceful close (§4.8, `minisocket_utils_close_socket`): send a FIN, wait out the grace
/// period via an alarm for straggling in-flight packets, then free the socket.
pub fn close(socket: SocketId) {
    let remote_port_and_header = {
        let gate = Gate::close();
        gate.sockets.sockets.get(&socket.0).map(|s| ReliableHeader {
            datagram: DatagramHeader { source: gate.my_address(), source_port: s.local_port, dest: s.remote, dest_port: s.remote_port },
            message_type: MessageType::Fin,
            seq_number: 0,
            ack_number: 0,
        })
    };
    if let Some(header) = remote_port_and_header {
        let gate = Gate::close();
        send_no_wait(&gate, &header);
    }
    {
        // Flip the state flag and wake anything already parked in `send`/`receive` right away -
        // otherwise a pending send would sit out its full retransmit timeout before ever
        // noticing the socket closed underneath it (§5 "a closing socket signals in-flight
        // operations via a state flag which they check after each wake").
        let mut gate = Gate::close();
        if let Some(s) = gate.sockets.sockets.get_mut(&socket.0) {
            s.state = ConnState::Closing;
            let (ack_sema, recv_sema) = (s.ack_sema, s.recv_sema);
            semaphore::v_locked(&mut gate, ack_sema);
            semaphore::v_locked(&mut gate, recv_sema);
        }
    }
    let done = Semaphore::new(0);
    {
        let mut gate = Gate::close();
        let period_ms = gate.config.period_ms;
        let current_tick = gate.current_tick;
        let grace_ms = gate.config.close_grace_period_ms;
        let done_id = done.0;
        gate.alarms.register(current_tick, grace_ms, period_ms, Box::new(move |kernel| semaphore::v_locked(kernel, done_id)));
    }
    done.p();
    done.destroy();
    let mut gate = Gate::close();
    if let Some(s) = gate.sockets.sockets.remove(&socket.0) {
        gate.semaphores.destroy(s.ack_sema);
        gate.semaphores.destroy(s.recv_sema);
    }
}

fn find_socket_mut(gate: &mut Kernel, local_port: u16, remote: Address, remote_port: u16) -> Option<u32> {
    gate.sockets
        .sockets
        .iter()
        .find(|(_, s)| s.local_port == local_port && s.remote == remote && s.remote_port == remote_port)
        .map(|(id, _)| *id)
}

/// Route an arrived reliable-protocol packet. Called from the network receiver thread with the
/// gate already closed - this is the reassembly/handshake/ack logic that in the original lives
/// across `minisocket_utils.c` and the `minisocket_*` entry points, folded into one dispatcher.
pub(crate) fn deliver(gate: &mut Kernel, bytes: &[u8]) {
    let Some(header) = ReliableHeader::unpack(bytes) else {
        log::warn!("dropping malformed reliable packet");
        return;
    };
    let h = header.datagram;

    match header.message_type {
        MessageType::Syn => {
            // Just queue it and wake whoever's in `listen` - the SYNACK itself is sent from
            // there, through the same retry-with-backoff path as any other reliable send, not
            // fired off unconditionally here.
            if let Some(listener_sema) = gate.sockets.listeners.get(&h.dest_port).copied() {
                gate.sockets
                    .pending_connections
                    .entry(h.dest_port)
                    .or_default()
                    .push_back((h.source, h.source_port, header.seq_number));
                semaphore::v_locked(gate, listener_sema);
            }
        }
        MessageType::SynAck => {
            if let Some(id) = find_socket_mut(gate, h.dest_port, h.source, h.source_port) {
                let s = gate.sockets.sockets.get(&id).expect("socket vanished between find_socket_mut and lookup");
                let ack_sema = s.ack_sema;
                semaphore::v_locked(gate, ack_sema);
                let reply = ReliableHeader {
                    datagram: DatagramHeader { source: h.dest, source_port: h.dest_port, dest: h.source, dest_port: h.source_port },
                    message_type: MessageType::Ack,
                    seq_number: 0,
                    ack_number: header.seq_number,
                };
                send_no_wait(gate, &reply);
            }
        }
        MessageType::Ack => {
            if let Some(id) = find_socket_mut(gate, h.dest_port, h.source, h.source_port) {
                let s = gate.sockets.sockets.get_mut(&id).expect("socket vanished between find_socket_mut and lookup");
                if s.last_ack_seen != Some(header.ack_number) {
                    s.last_ack_seen = Some(header.ack_number);
                    let ack_sema = s.ack_sema;
                    semaphore::v_locked(gate, ack_sema);
                }
            }
        }
        MessageType::Data => {
            if let Some(id) = find_socket_mut(gate, h.dest_port, h.source, h.source_port) {
                let payload = bytes[wire::RELIABLE_HEADER_LEN..].to_vec();
                let s = gate.sockets.sockets.get_mut(&id).expect("socket vanished between find_socket_mut and lookup");
                if header.seq_number == s.recv_expected_seq + 1 {
                    s.recv_expected_seq = header.seq_number;
                    s.recv_queue.push_back(payload);
                    let recv_sema = s.recv_sema;
                    semaphore::v_locked(gate, recv_sema);
                }
                let reply = ReliableHeader {
                    datagram: DatagramHeader { source: h.dest, source_port: h.dest_port, dest: h.source, dest_port: h.source_port },
                    message_type: MessageType::Ack,
                    seq_number: 0,
                    ack_number: header.seq_number,
                };
                send_no_wait(gate, &reply);
            }
        }
        MessageType::Fin | MessageType::FinAck => {
            if let Some(id) = find_socket_mut(gate, h.dest_port, h.source, h.source_port) {
                let s = gate.sockets.sockets.get_mut(&id).expect("socket vanished between find_socket_mut and lookup");
                s.state = ConnState::Closed;
                let recv_sema = s.recv_sema;
                semaphore::v_locked(gate, recv_sema);
            }
        }
    }
}
