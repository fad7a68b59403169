//! Ring-buffered UDP endpoint shared by client and server.
//!
//! Each endpoint owns one socket and three OS threads:
//! - the receive loop reads datagrams into the incoming ring buffer,
//! - the process loop pops them and hands them to a [`PacketHandler`],
//! - the send loop pops the outgoing ring buffer and performs one `send_to`
//!   per datagram.
//!
//! Nothing blocks on a ring buffer. A full buffer drops the datagram, an
//! empty one makes the loop back off for a millisecond.

use crate::protocol::{encode, WireMessage};
use crate::ring_buffer::RingBuffer;
use log::{debug, info, trace, warn};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub use crate::protocol::MAX_DATAGRAM_SIZE;

/// Socket read timeout; bounds how long `stop` waits for the receive loop.
const RECV_TIMEOUT: Duration = Duration::from_millis(50);
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// One datagram and the peer it came from or goes to.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub data: [u8; MAX_DATAGRAM_SIZE],
    pub len: usize,
    pub addr: SocketAddr,
}

impl Datagram {
    /// Copies `payload`, truncated to [`MAX_DATAGRAM_SIZE`].
    pub fn new(payload: &[u8], addr: SocketAddr) -> Self {
        let len = payload.len().min(MAX_DATAGRAM_SIZE);
        let mut data = [0u8; MAX_DATAGRAM_SIZE];
        data[..len].copy_from_slice(&payload[..len]);
        Self { data, len, addr }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// Consumer of incoming datagrams, called from the process loop.
pub trait PacketHandler: Send + Sync + 'static {
    fn handle_packet(&self, data: &[u8], from: SocketAddr, outbox: &Outbox);
}

/// Write side of an endpoint: the only way to get bytes onto the socket.
#[derive(Clone)]
pub struct Outbox {
    queue: Arc<RingBuffer<Datagram>>,
}

impl Outbox {
    /// A detached outbox; the simulation tests drain it by hand.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(RingBuffer::new(capacity)),
        }
    }

    /// Encodes and queues a typed message. Messages that cannot fit in a
    /// datagram are rejected at compile time.
    pub fn queue_message<M: WireMessage>(&self, message: &M, addr: SocketAddr) -> bool {
        const { assert!(M::SIZE <= MAX_DATAGRAM_SIZE) };

        match encode(message) {
            Ok(bytes) => self.enqueue(Datagram::new(&bytes, addr)),
            Err(e) => {
                warn!("Failed to encode message for {}: {}", addr, e);
                false
            }
        }
    }

    /// Queues an already encoded payload, truncating anything past the
    /// datagram size.
    pub fn queue_raw(&self, payload: &[u8], addr: SocketAddr) -> bool {
        if payload.len() > MAX_DATAGRAM_SIZE {
            warn!(
                "Truncating {} byte payload to {} bytes for {}",
                payload.len(),
                MAX_DATAGRAM_SIZE,
                addr
            );
        }
        self.enqueue(Datagram::new(payload, addr))
    }

    pub fn pop(&self) -> Option<Datagram> {
        self.queue.pop()
    }

    /// Removes every queued datagram.
    pub fn drain(&self) -> Vec<Datagram> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn enqueue(&self, datagram: Datagram) -> bool {
        match self.queue.push(datagram) {
            Ok(()) => true,
            Err(dropped) => {
                warn!("Outgoing queue full, dropping datagram to {}", dropped.addr);
                false
            }
        }
    }
}

pub struct UdpEndpoint {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    incoming: Arc<RingBuffer<Datagram>>,
    outbox: Outbox,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl UdpEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A, ring_capacity: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        debug!("UDP endpoint bound to {}", local_addr);

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            incoming: Arc::new(RingBuffer::new(ring_capacity)),
            outbox: Outbox::new(ring_capacity),
            running: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        })
    }

    /// Spawns the receive, process and send loops. Calling it on a running
    /// endpoint does nothing.
    pub fn start(&mut self, handler: Arc<dyn PacketHandler>) -> io::Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let socket = Arc::clone(&self.socket);
        let incoming = Arc::clone(&self.incoming);
        let running = Arc::clone(&self.running);
        self.threads.push(
            thread::Builder::new()
                .name("udp-recv".into())
                .spawn(move || receive_loop(&socket, &incoming, &running))?,
        );

        let incoming = Arc::clone(&self.incoming);
        let outbox = self.outbox.clone();
        let running = Arc::clone(&self.running);
        self.threads.push(
            thread::Builder::new()
                .name("udp-process".into())
                .spawn(move || process_loop(&incoming, handler.as_ref(), &outbox, &running))?,
        );

        let socket = Arc::clone(&self.socket);
        let outbox = self.outbox.clone();
        let running = Arc::clone(&self.running);
        self.threads.push(
            thread::Builder::new()
                .name("udp-send".into())
                .spawn(move || send_loop(&socket, &outbox, &running))?,
        );

        info!("UDP endpoint running on {}", self.local_addr);
        Ok(())
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flips the running flag and joins the three loops.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("UDP worker thread panicked");
            }
        }
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(socket: &UdpSocket, incoming: &RingBuffer<Datagram>, running: &AtomicBool) {
    let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buffer) {
            Ok((0, _)) => {}
            Ok((len, addr)) => {
                if incoming.push(Datagram::new(&buffer[..len], addr)).is_err() {
                    debug!("Incoming queue full, dropping datagram from {}", addr);
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => trace!("UDP receive error: {}", e),
        }
    }
}

fn process_loop(
    incoming: &RingBuffer<Datagram>,
    handler: &dyn PacketHandler,
    outbox: &Outbox,
    running: &AtomicBool,
) {
    while running.load(Ordering::Acquire) {
        match incoming.pop() {
            Some(datagram) => handler.handle_packet(datagram.payload(), datagram.addr, outbox),
            None => thread::sleep(IDLE_BACKOFF),
        }
    }
}

fn send_loop(socket: &UdpSocket, outbox: &Outbox, running: &AtomicBool) {
    while running.load(Ordering::Acquire) {
        match outbox.pop() {
            Some(datagram) => {
                if let Err(e) = socket.send_to(datagram.payload(), datagram.addr) {
                    debug!("Failed to send datagram to {}: {}", datagram.addr, e);
                }
            }
            None => thread::sleep(IDLE_BACKOFF),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;
    use crate::protocol::udp::{Ping, Pong};
    use parking_lot::Mutex;
    use std::time::Instant;

    struct Collector {
        received: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
    }

    impl PacketHandler for Collector {
        fn handle_packet(&self, data: &[u8], from: SocketAddr, _outbox: &Outbox) {
            self.received.lock().push((data.to_vec(), from));
        }
    }

    /// Answers every ping with a pong carrying the same timestamp.
    struct PingResponder;

    impl PacketHandler for PingResponder {
        fn handle_packet(&self, data: &[u8], from: SocketAddr, outbox: &Outbox) {
            if let Ok(ping) = decode::<Ping>(data) {
                outbox.queue_message(
                    &Pong {
                        timestamp: ping.timestamp,
                    },
                    from,
                );
            }
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_datagram_truncates() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let datagram = Datagram::new(&[7u8; MAX_DATAGRAM_SIZE + 10], addr);
        assert_eq!(datagram.len, MAX_DATAGRAM_SIZE);
        assert_eq!(datagram.payload().len(), MAX_DATAGRAM_SIZE);
    }

    #[test]
    fn test_outbox_drops_when_full() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let outbox = Outbox::new(2);

        assert!(outbox.queue_message(&Ping { timestamp: 1 }, addr));
        assert!(outbox.queue_raw(&[6, 2, 0, 0, 0], addr));
        assert!(!outbox.queue_message(&Ping { timestamp: 3 }, addr));

        let queued = outbox.drain();
        assert_eq!(queued.len(), 2);
        assert_eq!(decode::<Ping>(queued[0].payload()).unwrap().timestamp, 1);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_ping_pong_between_endpoints() {
        let mut server = UdpEndpoint::bind("127.0.0.1:0", 64).unwrap();
        server.start(Arc::new(PingResponder)).unwrap();

        let collector = Arc::new(Collector {
            received: Mutex::new(Vec::new()),
        });
        let mut client = UdpEndpoint::bind("127.0.0.1:0", 64).unwrap();
        client.start(collector.clone()).unwrap();

        for timestamp in 0..5 {
            client
                .outbox()
                .queue_message(&Ping { timestamp }, server.local_addr());
        }

        assert!(wait_until(Duration::from_secs(2), || {
            collector.received.lock().len() == 5
        }));

        let received = collector.received.lock();
        for (bytes, from) in received.iter() {
            assert_eq!(*from, server.local_addr());
            assert!(decode::<Pong>(bytes).is_ok());
        }
    }

    #[test]
    fn test_stop_joins_threads() {
        let mut endpoint = UdpEndpoint::bind("127.0.0.1:0", 8).unwrap();
        endpoint.start(Arc::new(PingResponder)).unwrap();
        assert!(endpoint.is_running());

        let started = Instant::now();
        endpoint.stop();
        assert!(!endpoint.is_running());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
