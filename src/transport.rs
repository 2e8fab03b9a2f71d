//! Transports: how packets actually leave and arrive. A real kernel only has one (the NIC); this
//! one is swappable so §8's retransmit/loss scenarios can be driven deterministically instead of
//! over a real, flaky network.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddrV4, UdpSocket};
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::address::Address;
use crate::kernel::Gate;
use crate::miniport;
use crate::wire::{self, DatagramHeader};

/// Something that can send and receive raw, already-framed packets between addresses.
pub(crate) trait Transport: Send + Sync {
    fn local_address(&self) -> Address;
    fn send_to(&self, dest: Address, bytes: &[u8]) -> io::Result<()>;
    /// Block until a packet arrives. Returns its sender's address and the bytes received.
    fn recv(&self) -> io::Result<(Address, Vec<u8>)>;
}

/// A real UDP socket. `nix` sets `SO_REUSEADDR` so repeated test runs against the same port
/// don't hit `EADDRINUSE` while a previous socket is in `TIME_WAIT` - the teacher's tests used
/// `net2::UdpBuilder` for the same reason; `net2` is unmaintained, so this crate uses `nix`'s
/// socket-option API on the already-bound `std::net::UdpSocket` instead.
pub(crate) struct UdpTransport {
    socket: UdpSocket,
    local: Address,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddrV4) -> io::Result<UdpTransport> {
        let socket = UdpSocket::bind(addr)?;
        nix::sys::socket::setsockopt(&socket, nix::sys::socket::sockopt::ReuseAddr, &true)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let local = match socket.local_addr()? {
            std::net::SocketAddr::V4(v4) => Address::from_socket_addr(v4),
            std::net::SocketAddr::V6(_) => Address::from_socket_addr(addr),
        };
        Ok(UdpTransport { socket, local })
    }
}

impl Transport for UdpTransport {
    fn local_address(&self) -> Address {
        self.local
    }

    fn send_to(&self, dest: Address, bytes: &[u8]) -> io::Result<()> {
        self.socket.send_to(bytes, dest.to_socket_addr())?;
        Ok(())
    }

    fn recv(&self) -> io::Result<(Address, Vec<u8>)> {
        let mut buf = vec![0u8; 65536];
        let (n, from) = self.socket.recv_from(&mut buf)?;
        buf.truncate(n);
        let from = match from {
            std::net::SocketAddr::V4(v4) => Address::from_socket_addr(v4),
            std::net::SocketAddr::V6(_) => Address::blank(),
        };
        Ok((from, buf))
    }
}

/// An in-process transport for tests (§ ambient stack - test tooling): addresses are just
/// distinguishing tags, "packets" are handed directly between registered peers via channels, and
/// `loss_rate` lets a test inject drops to exercise retransmission deterministically.
pub(crate) struct LoopbackTransport {
    local: Address,
    loss_rate: f64,
    network: Arc<LoopbackNetwork>,
    inbox: std::sync::mpsc::Receiver<(Address, Vec<u8>)>,
}

#[derive(Default)]
struct LoopbackNetwork {
    peers: Mutex<HashMap<Address, std::sync::mpsc::Sender<(Address, Vec<u8>)>>>,
}

/// Shared registry used to wire up a set of `LoopbackTransport`s that can see each other.
#[derive(Clone, Default)]
pub(crate) struct LoopbackNetworkHandle(Arc<LoopbackNetwork>);

impl LoopbackNetworkHandle {
    pub(crate) fn new() -> LoopbackNetworkHandle {
        LoopbackNetworkHandle::default()
    }

    /// Register a new endpoint on this network, with an independent packet-loss rate
    /// (0.0 = never drop, 1.0 = always drop).
    pub(crate) fn join(&self, local: Address, loss_rate: f64) -> LoopbackTransport {
        let (tx, rx) = std::sync::mpsc::channel();
        self.0.peers.lock().unwrap().insert(local, tx);
        LoopbackTransport { local, loss_rate, network: self.0.clone(), inbox: rx }
    }
}

impl Transport for LoopbackTransport {
    fn local_address(&self) -> Address {
        self.local
    }

    fn send_to(&self, dest: Address, bytes: &[u8]) -> io::Result<()> {
        if self.loss_rate > 0.0 && rand::thread_rng().gen_bool(self.loss_rate) {
            log::debug!("loopback transport dropping packet {:?} -> {:?}", self.local, dest);
            return Ok(());
        }
        let peers = self.network.peers.lock().unwrap();
        if let Some(tx) = peers.get(&dest) {
            let _ = tx.send((self.local, bytes.to_vec()));
        }
        Ok(())
    }

    fn recv(&self) -> io::Result<(Address, Vec<u8>)> {
        self.inbox
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "loopback network shut down"))
    }
}

/// Dedicated receiver OS thread: blocks on `transport.recv()` and, for each packet, closes the
/// gate and routes it to the port or socket it's addressed to. This is the moral equivalent of
/// the NIC's receive interrupt.
pub(crate) struct Receiver {
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Receiver {
    pub(crate) fn spawn(transport: Arc<dyn Transport>) -> Receiver {
        let handle = std::thread::Builder::new()
            .name("minithread-net-rx".into())
            .spawn(move || loop {
                match transport.recv() {
                    Ok((_from, bytes)) => dispatch(&bytes),
                    Err(e) => {
                        log::debug!("transport receive loop exiting: {e}");
                        break;
                    }
                }
            })
            .expect("failed to spawn network receiver thread");
        Receiver { handle: Some(handle) }
    }

    /// The receiver thread exits on its own once `transport.recv()` starts erroring - callers
    /// drop the `Arc<dyn Transport>` (closing the loopback channel or UDP socket) before calling
    /// this, then join here.
    pub(crate) fn stop(mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn dispatch(bytes: &[u8]) {
    let Some((protocol, header)) = DatagramHeader::unpack(bytes) else {
        log::warn!("dropping malformed packet ({} bytes)", bytes.len());
        return;
    };
    match protocol {
        wire::PROTOCOL_DATAGRAM => {
            let mut gate = Gate::close();
            miniport::deliver(&mut gate, header, bytes);
        }
        wire::PROTOCOL_RELIABLE => {
            let mut gate = Gate::close();
            crate::minisocket::deliver(&mut gate, bytes);
        }
        other => log::warn!("dropping packet with unknown protocol byte {other}"),
    }
}
