use crate::error::{Error, ErrorKind, Result};
use crate::event::Events;
use crate::logging::{self, Logger};
use crate::net::buffer::Buffer;
use crate::net::io_socket::IoShared;
use crate::threading::handler::Handler;
use mio::net::{TcpListener, TcpStream};
use parking_lot::Mutex;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Hook run on the read worker before reception completions are posted.
/// Returning `None` captures the buffer: no `Received` event is delivered.
/// A TLS adapter plugs in here, upstream of the application byte stream.
pub trait Decoder: Send {
    fn decode(&mut self, packet: Vec<u8>) -> Option<Vec<u8>>;
}

/// Events a socket raises on its owner handler thread.
pub enum SocketEvent {
    Received(Vec<u8>),
    Flush,
    Disconnection(SocketAddr),
    Accept(Arc<Socket>),
    Error(Error),
}

// Initial send buffer reservation.
const SEND_BUF_CAPACITY: usize = 65536;

pub(crate) enum Device {
    Stream(TcpStream),
    Listener(TcpListener),
}

/// Registration hand-back: the notifier's token, the shared selector state
/// and the owner handler completions are posted to.
pub(crate) struct IoLink {
    pub(crate) token: usize,
    pub(crate) shared: Weak<IoShared>,
    pub(crate) handler: Arc<Handler>,
}

/// Non-blocking TCP socket wrapper. All transmission happens on the worker
/// pinned by the write track, all reception on the read track; completions
/// are re-emitted to subscribers through the owner handler. The descriptor
/// is released with the last `Arc` clone, after every in-flight runner has
/// finished.
pub struct Socket {
    pub(crate) log: Logger,
    pub(crate) device: Mutex<Option<Device>>,
    peer: Mutex<Option<SocketAddr>>,
    local: Mutex<Option<SocketAddr>>,
    pub(crate) send: Mutex<Buffer>,
    queueing: AtomicU64,
    pub(crate) flushing: AtomicBool,
    pub(crate) connecting: AtomicBool,
    shutdown_pending: AtomicBool,
    disconnection_posted: AtomicBool,
    error_posted: AtomicBool,
    pub(crate) read_track: AtomicU16,
    pub(crate) write_track: AtomicU16,
    pub(crate) decoder: Mutex<Option<Box<dyn Decoder>>>,
    error: Mutex<Option<Error>>,
    events: Events<SocketEvent>,
    pub(crate) io: Mutex<Option<IoLink>>,
    pub(crate) weak_self: Mutex<Weak<Socket>>,
}

impl Socket {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(log: L) -> Socket {
        let log = match log.into() {
            Some(log) => log.new(logging::o!("component" => "socket")),
            None => Logger::root(logging::Discard, logging::o!()),
        };

        Socket {
            log,
            device: Mutex::new(None),
            peer: Mutex::new(None),
            local: Mutex::new(None),
            send: Mutex::new(Buffer::with_capacity(SEND_BUF_CAPACITY)),
            queueing: AtomicU64::new(0),
            flushing: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            shutdown_pending: AtomicBool::new(false),
            disconnection_posted: AtomicBool::new(false),
            error_posted: AtomicBool::new(false),
            read_track: AtomicU16::new(0),
            write_track: AtomicU16::new(0),
            decoder: Mutex::new(None),
            error: Mutex::new(None),
            events: Events::new(),
            io: Mutex::new(None),
            weak_self: Mutex::new(Weak::new()),
        }
    }

    /// Wraps a freshly accepted stream.
    pub(crate) fn adopt(stream: TcpStream, peer: SocketAddr, log: &Logger) -> Socket {
        let socket = Socket::new(log);
        *socket.local.lock() = stream.local_addr().ok();
        *socket.peer.lock() = Some(peer);
        *socket.device.lock() = Some(Device::Stream(stream));
        socket
    }

    #[inline]
    pub fn events(&self) -> &Events<SocketEvent> {
        &self.events
    }

    #[inline]
    pub fn peer_address(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    #[inline]
    pub fn local_address(&self) -> Option<SocketAddr> {
        *self.local.lock()
    }

    /// Bytes accepted by `write` but not yet handed to the kernel.
    #[inline]
    pub fn queueing(&self) -> u64 {
        self.queueing.load(Ordering::Acquire)
    }

    #[inline]
    pub fn flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    pub fn set_decoder(&self, decoder: Box<dyn Decoder>) {
        *self.decoder.lock() = Some(decoder);
    }

    pub fn last_error(&self) -> Option<Error> {
        self.error.lock().clone()
    }

    /// Start a non-blocking connect. The completion is observed through the
    /// owner handler once the socket is registered: a `Flush` event when the
    /// peer accepted (writable means connected), an `Error` event otherwise.
    pub fn connect(&self, address: SocketAddr) -> Result<()> {
        self.fail_fast()?;

        let mut device = self.device.lock();
        if device.is_some() {
            return Err(Error::new(ErrorKind::Argument, "socket already open"));
        }

        logging::debug!(self.log, "connecting"; "peer" => %address);

        let stream = TcpStream::connect(&address).map_err(Error::from)?;
        *self.local.lock() = stream.local_addr().ok();
        *self.peer.lock() = Some(address);
        self.connecting.store(true, Ordering::Release);
        // The first writability completion doubles as the connect flush.
        self.flushing.store(true, Ordering::Release);
        *device = Some(Device::Stream(stream));

        Ok(())
    }

    /// Bind a listening socket. Readiness delivers `Accept` events carrying
    /// the new connection.
    pub fn listen(&self, address: SocketAddr) -> Result<()> {
        self.fail_fast()?;

        let mut device = self.device.lock();
        if device.is_some() {
            return Err(Error::new(ErrorKind::Argument, "socket already open"));
        }

        let listener = TcpListener::bind(&address).map_err(Error::from)?;
        *self.local.lock() = listener.local_addr().ok();
        *device = Some(Device::Listener(listener));

        logging::debug!(self.log, "listening"; "local" => %address);

        Ok(())
    }

    /// Append to the send buffer and arm the write track when not already
    /// flushing. Returns the bytes transmitted synchronously — always 0
    /// here: transmission belongs to the pinned write worker, which keeps a
    /// single writer per socket. Never blocks; back-pressure is the caller's
    /// business, observed through `queueing()`.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.fail_fast()?;

        if data.is_empty() {
            return Ok(0);
        }

        self.queueing.fetch_add(data.len() as u64, Ordering::AcqRel);
        self.send.lock().push(data);
        self.arm_write();

        Ok(0)
    }

    /// Pull bytes directly off the socket. `Some(n)` delivers data, `Some(0)`
    /// means nothing is available right now, `None` is the distinct
    /// end-of-stream return.
    pub fn read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.fail_fast()?;

        let device = self.device.lock();
        let stream = match device.as_ref() {
            Some(Device::Stream(stream)) => stream,
            Some(Device::Listener(_)) => {
                return Err(Error::new(ErrorKind::Argument, "read on a listening socket"))
            }
            None => return Err(Error::new(ErrorKind::Argument, "socket not open")),
        };

        let mut stream = stream;
        loop {
            match stream.read(buf) {
                Ok(0) if !buf.is_empty() => return Ok(None),
                Ok(count) => return Ok(Some(count)),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Some(0)),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.record(Error::from(err))),
            }
        }
    }

    /// Half-close. A write-side shutdown with data still queued is deferred
    /// until the send buffer has drained, so pending writes reach the peer
    /// before the FIN.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        match how {
            Shutdown::Read => self.device_shutdown(Shutdown::Read),
            how => {
                if !self.send.lock().is_empty() {
                    self.shutdown_pending.store(true, Ordering::Release);
                    if how == Shutdown::Both {
                        self.device_shutdown(Shutdown::Read)?;
                    }
                    Ok(())
                } else {
                    self.device_shutdown(how)
                }
            }
        }
    }

    /// Deregister from the notifier and half-close both directions. The
    /// descriptor itself is dropped with the last `Arc` clone — after the
    /// last in-flight runner for this socket has completed — and no further
    /// events reach subscribers.
    pub fn close(&self) {
        logging::debug!(self.log, "closing"; "peer" => ?self.peer_address());

        let link = self.io.lock().take();
        if let Some(link) = link {
            if let Some(shared) = link.shared.upgrade() {
                shared.forget(link.token, self);
            }
        }

        let device = self.device.lock();
        if let Some(Device::Stream(stream)) = device.as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        drop(device);

        let mut error = self.error.lock();
        if error.is_none() {
            *error = Some(Error::new(ErrorKind::Network, "socket closed"));
        }
    }

    fn device_shutdown(&self, how: Shutdown) -> Result<()> {
        let device = self.device.lock();
        match device.as_ref() {
            Some(Device::Stream(stream)) => stream.shutdown(how).map_err(Error::from),
            Some(Device::Listener(_)) => Err(Error::new(ErrorKind::Argument, "shutdown on a listening socket")),
            None => Err(Error::new(ErrorKind::Argument, "socket not open")),
        }
    }

    /// Arm the write track: first writer in transitions the flushing flag
    /// and submits a write runner; while armed, later writers just buffer.
    fn arm_write(&self) {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.kick_write();
    }

    pub(crate) fn kick_write(&self) {
        let shared = {
            let link = self.io.lock();
            link.as_ref().and_then(|link| link.shared.upgrade())
        };
        // Unregistered sockets stay armed; registration submits the kick.
        if let Some(shared) = shared {
            if let Some(socket) = self.weak_self.lock().upgrade() {
                shared.submit_write(socket);
            }
        }
    }

    pub(crate) fn take_deferred_shutdown(&self) -> bool {
        self.shutdown_pending.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_transmitted(&self, count: u64) {
        self.queueing.fetch_sub(count, Ordering::AcqRel);
    }

    fn fail_fast(&self) -> Result<()> {
        match self.error.lock().as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Keep the first fatal error; later operations repeat it.
    pub(crate) fn record(&self, err: Error) -> Error {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err.clone());
        }
        err
    }
}

impl Socket {
    /// Raise `event` on the owner handler thread. The completion holds a
    /// strong reference, so the subject outlives every queued raise.
    pub(crate) fn post(socket: &Arc<Socket>, event: SocketEvent) {
        let handler = {
            let link = socket.io.lock();
            link.as_ref().map(|link| link.handler.clone())
        };

        if let Some(handler) = handler {
            let subject = socket.clone();
            handler.queue(move || {
                subject.events.raise(&event);
                Ok(())
            });
        }
    }

    pub(crate) fn post_error(socket: &Arc<Socket>, err: Error) {
        let err = socket.record(err);
        logging::warn!(socket.log, "socket error"; "peer" => ?socket.peer_address(), "error" => %err);

        if !socket.error_posted.swap(true, Ordering::AcqRel) {
            Socket::post(socket, SocketEvent::Error(err));
        }
    }

    pub(crate) fn post_disconnection(socket: &Arc<Socket>) {
        if socket.disconnection_posted.swap(true, Ordering::AcqRel) {
            return;
        }

        let peer = socket.peer_address();
        logging::debug!(socket.log, "peer disconnected"; "peer" => ?peer);
        if let Some(peer) = peer {
            Socket::post(socket, SocketEvent::Disconnection(peer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_buffers_and_counts_queueing() {
        let socket = Socket::new(None);

        assert_eq!(socket.write(b"hello").unwrap(), 0);
        assert_eq!(socket.write(b" world").unwrap(), 0);

        assert_eq!(socket.queueing(), 11);
        assert!(socket.flushing());
        assert_eq!(socket.send.lock().read_slice(), b"hello world");
    }

    #[test]
    fn test_empty_write_is_a_noop() {
        let socket = Socket::new(None);

        assert_eq!(socket.write(b"").unwrap(), 0);
        assert_eq!(socket.queueing(), 0);
        assert!(!socket.flushing());
    }

    #[test]
    fn test_read_on_unopened_socket_is_an_argument_error() {
        let socket = Socket::new(None);
        let mut buf = [0u8; 16];

        let err = socket.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let socket = Socket::new(None);
        let address: SocketAddr = "127.0.0.1:1".parse().unwrap();

        // The kernel accepts a non-blocking connect attempt even to a dead
        // port; the failure arrives later through readiness.
        socket.connect(address).unwrap();
        let err = socket.connect(address).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn test_shutdown_with_queued_data_is_deferred() {
        let socket = Socket::new(None);
        let address: SocketAddr = "127.0.0.1:1".parse().unwrap();
        socket.connect(address).unwrap();

        socket.write(b"tail").unwrap();
        socket.shutdown(Shutdown::Write).unwrap();

        assert!(socket.take_deferred_shutdown());
        assert!(!socket.take_deferred_shutdown());
    }

    #[test]
    fn test_close_makes_later_operations_fail() {
        let socket = Socket::new(None);
        socket.close();

        let err = socket.write(b"late").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(socket.last_error().map(|err| err.kind()), Some(ErrorKind::Network));
    }
}
