use crate::error::{Error, ErrorKind, Result};
use crate::logging::{self, Logger};
use crate::net::socket::{Device, IoLink, Socket, SocketEvent};
use crate::threading::handler::Handler;
use crate::threading::pool::ThreadPool;
use crate::threading::queue::Runner;
use crate::threading::terminate;
use hashbrown::HashMap;
use mio::{Events, Poll, PollOpt, Ready, Registration, SetReadiness, Token};
use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

const WAKE_TOKEN: usize = 0;
const FIRST_TOKEN: usize = 1;
const EVENTS_CAPACITY: usize = 1024;
const READ_BUF_SIZE: usize = 65536;

/// Selector state shared between the notifier thread, registered sockets and
/// in-flight runners. Holds only weak references to subjects: a socket that
/// the application dropped is skipped, never revived.
pub(crate) struct IoShared {
    poll: Poll,
    pool: Arc<ThreadPool>,
    sockets: Mutex<HashMap<usize, Weak<Socket>>>,
    next_token: AtomicUsize,
    stop: AtomicBool,
    wake: SetReadiness,
    log: Logger,
}

impl IoShared {
    pub(crate) fn submit_read(&self, socket: Arc<Socket>) {
        let runner = Box::new(ReadRunner {
            socket: socket.clone(),
        });
        self.pool.queue(&socket.read_track, runner);
    }

    pub(crate) fn submit_write(&self, socket: Arc<Socket>) {
        let runner = Box::new(WriteRunner {
            socket: socket.clone(),
        });
        self.pool.queue(&socket.write_track, runner);
    }

    /// Synchronous deregistration; in-flight runners keep the socket itself
    /// alive until they finish.
    pub(crate) fn forget(&self, token: usize, socket: &Socket) {
        self.sockets.lock().remove(&token);

        let device = socket.device.lock();
        let result = match device.as_ref() {
            Some(Device::Stream(stream)) => self.poll.deregister(stream),
            Some(Device::Listener(listener)) => self.poll.deregister(listener),
            None => Ok(()),
        };
        if let Err(err) = result {
            logging::trace!(self.log, "deregistration failed"; "token" => token, "error" => %err);
        }
    }

    fn lookup(&self, token: usize) -> Option<Arc<Socket>> {
        self.sockets.lock().get(&token).and_then(Weak::upgrade)
    }
}

#[cfg(unix)]
fn reads(ready: Ready) -> bool {
    use mio::unix::UnixReady;
    let unix = UnixReady::from(ready);
    ready.is_readable() || unix.is_hup() || unix.is_error()
}

#[cfg(not(unix))]
fn reads(ready: Ready) -> bool {
    ready.is_readable()
}

/// Owns the OS readiness notifier and the selector thread. Readiness never
/// performs I/O itself: it submits runners on the subject's pinned tracks,
/// and the runners post completions to the owner handler. For one socket the
/// completions therefore arrive in the order the worker finished them, which
/// is wire order.
pub struct IOSocket {
    shared: Arc<IoShared>,
    selector: Mutex<Option<JoinHandle<()>>>,
}

impl IOSocket {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(pool: Arc<ThreadPool>, log: L) -> Result<IOSocket> {
        let log = match log.into() {
            Some(log) => log.new(logging::o!("component" => "io-socket")),
            None => Logger::root(logging::Discard, logging::o!()),
        };

        terminate::neutralise_sigpipe();

        let poll = Poll::new().map_err(Error::from)?;
        let (registration, wake) = Registration::new2();
        poll.register(&registration, Token(WAKE_TOKEN), Ready::readable(), PollOpt::edge())
            .map_err(Error::from)?;

        let shared = Arc::new(IoShared {
            poll,
            pool,
            sockets: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(FIRST_TOKEN),
            stop: AtomicBool::new(false),
            wake,
            log,
        });

        let selector = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("mona-io-socket".into())
                .spawn(move || run_selector(shared, registration))
                .map_err(Error::from)?
        };

        Ok(IOSocket {
            shared,
            selector: Mutex::new(Some(selector)),
        })
    }

    /// Register an open socket with the notifier. The registration remembers
    /// the owner handler; every completion for this socket funnels through
    /// it.
    pub fn register(&self, socket: &Arc<Socket>, handler: &Arc<Handler>) -> Result<()> {
        if socket.io.lock().is_some() {
            return Err(Error::new(ErrorKind::Argument, "socket already registered"));
        }

        let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);

        // The selector can report readiness the instant the device joins the
        // interest set; the table and the back-link must already resolve by
        // then, or an edge-triggered initial event would be dropped.
        *socket.weak_self.lock() = Arc::downgrade(socket);
        *socket.io.lock() = Some(IoLink {
            token,
            shared: Arc::downgrade(&self.shared),
            handler: handler.clone(),
        });
        self.shared.sockets.lock().insert(token, Arc::downgrade(socket));

        let registered = {
            let device = socket.device.lock();
            match device.as_ref() {
                Some(Device::Stream(stream)) => self
                    .shared
                    .poll
                    .register(
                        stream,
                        Token(token),
                        Ready::readable() | Ready::writable(),
                        PollOpt::edge(),
                    )
                    .map_err(Error::from),
                Some(Device::Listener(listener)) => self
                    .shared
                    .poll
                    .register(listener, Token(token), Ready::readable(), PollOpt::edge())
                    .map_err(Error::from),
                None => Err(Error::new(ErrorKind::Argument, "socket not open")),
            }
        };

        if let Err(err) = registered {
            self.shared.sockets.lock().remove(&token);
            socket.io.lock().take();
            *socket.weak_self.lock() = Weak::new();
            return Err(err);
        }

        logging::debug!(self.shared.log, "socket registered"; "token" => token, "peer" => ?socket.peer_address());

        // Data buffered before registration needs its first kick; a
        // connecting socket instead gets its kick from the connect edge.
        if socket.flushing.load(Ordering::Acquire) && !socket.connecting.load(Ordering::Acquire) {
            self.shared.submit_write(socket.clone());
        }

        Ok(())
    }

    pub fn deregister(&self, socket: &Arc<Socket>) {
        let link = socket.io.lock().take();
        if let Some(link) = link {
            self.shared.forget(link.token, socket);
        }
    }

    /// Wake and join the selector thread. Registered sockets stay usable for
    /// direct reads/writes but receive no further readiness.
    pub fn stop(&self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shared.wake.set_readiness(Ready::readable());

        let handle = self.selector.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for IOSocket {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_selector(shared: Arc<IoShared>, _wake_registration: Registration) {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    logging::debug!(shared.log, "selector started");

    loop {
        if let Err(err) = shared.poll.poll(&mut events, None) {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            logging::error!(shared.log, "poll failed"; "error" => %err);
            break;
        }

        for event in &events {
            let token = usize::from(event.token());
            if token == WAKE_TOKEN {
                continue;
            }

            let socket = match shared.lookup(token) {
                Some(socket) => socket,
                None => continue,
            };

            let ready = event.readiness();
            if reads(ready) {
                shared.submit_read(socket.clone());
            }
            if ready.is_writable() {
                shared.submit_write(socket);
            }
        }

        if shared.stop.load(Ordering::Acquire) {
            break;
        }
    }

    logging::debug!(shared.log, "selector stopped");
}

/// Pulls bytes (or connections) until the kernel would block, posting one
/// completion per chunk. Runs on the socket's read track.
struct ReadRunner {
    socket: Arc<Socket>,
}

impl Runner for ReadRunner {
    fn name(&self) -> &'static str {
        "socket-read"
    }

    fn run(&mut self) -> Result<()> {
        loop {
            let device = self.socket.device.lock();
            match device.as_ref() {
                None => return Ok(()),
                Some(Device::Listener(listener)) => match listener.accept() {
                    Ok((stream, peer)) => {
                        let child = Arc::new(Socket::adopt(stream, peer, &self.socket.log));
                        drop(device);
                        Socket::post(&self.socket, SocketEvent::Accept(child));
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        drop(device);
                        Socket::post_error(&self.socket, Error::from(err));
                        return Ok(());
                    }
                },
                Some(Device::Stream(stream)) => {
                    let mut buf = vec![0u8; READ_BUF_SIZE];
                    let mut stream = stream;
                    match stream.read(&mut buf) {
                        Ok(0) => {
                            drop(device);
                            Socket::post_disconnection(&self.socket);
                            return Ok(());
                        }
                        Ok(count) => {
                            drop(device);
                            buf.truncate(count);

                            // The decoder runs here, on the read worker.
                            let delivered = {
                                let mut decoder = self.socket.decoder.lock();
                                match decoder.as_mut() {
                                    Some(decoder) => decoder.decode(buf),
                                    None => Some(buf),
                                }
                            };

                            if let Some(packet) = delivered {
                                Socket::post(&self.socket, SocketEvent::Received(packet));
                            }
                        }
                        Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                        Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            drop(device);
                            Socket::post_error(&self.socket, Error::from(err));
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Drains the send buffer on the socket's write track. The first writability
/// of a connecting socket doubles as the connect completion.
struct WriteRunner {
    socket: Arc<Socket>,
}

impl Runner for WriteRunner {
    fn name(&self) -> &'static str {
        "socket-write"
    }

    fn run(&mut self) -> Result<()> {
        let socket = &self.socket;

        if socket.connecting.swap(false, Ordering::AcqRel) {
            let failure = {
                let device = socket.device.lock();
                match device.as_ref() {
                    Some(Device::Stream(stream)) => match stream.take_error() {
                        Ok(Some(err)) | Err(err) => Some(err),
                        Ok(None) => None,
                    },
                    _ => None,
                }
            };
            if let Some(err) = failure {
                socket.flushing.store(false, Ordering::Release);
                Socket::post_error(socket, Error::from(err));
                return Ok(());
            }
        }

        // Spurious writability with nothing armed.
        if !socket.flushing.load(Ordering::Acquire) && socket.send.lock().is_empty() {
            return Ok(());
        }

        loop {
            let mut send = socket.send.lock();
            let device = socket.device.lock();
            let stream = match device.as_ref() {
                Some(Device::Stream(stream)) => stream,
                _ => {
                    send.clear();
                    socket.flushing.store(false, Ordering::Release);
                    return Ok(());
                }
            };

            let before = send.len();
            let mut stream_ref = stream;
            let result = send.egress(&mut stream_ref);
            socket.mark_transmitted((before - send.len()) as u64);

            match result {
                Ok(_) => {}
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    // Remainder stays queued; the next writable edge resumes.
                    return Ok(());
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    drop(device);
                    drop(send);
                    socket.flushing.store(false, Ordering::Release);
                    Socket::post_error(socket, Error::from(err));
                    return Ok(());
                }
            }
            drop(device);
            drop(send);

            if socket.take_deferred_shutdown() {
                let device = socket.device.lock();
                if let Some(Device::Stream(stream)) = device.as_ref() {
                    let _ = stream.shutdown(std::net::Shutdown::Write);
                }
            }

            socket.flushing.store(false, Ordering::Release);

            // A producer may have appended between the drain and the flag
            // store; reclaim the arm or leave it to the runner that took it.
            if socket.send.lock().is_empty() {
                break;
            }
            if socket
                .flushing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Ok(());
            }
        }

        Socket::post(socket, SocketEvent::Flush);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threading::queue::Priority;
    use crate::threading::signal::Signal;
    use parking_lot::Mutex;
    use std::io::{Read, Write};
    use std::net::{Shutdown, SocketAddr};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    struct Owner {
        wakeup: Arc<Signal>,
        handler: Arc<Handler>,
    }

    impl Owner {
        fn new() -> Owner {
            let wakeup = Arc::new(Signal::new());
            let handler = Arc::new(Handler::new(wakeup.clone(), None));
            Owner { wakeup, handler }
        }

        /// Drive the owner loop until the condition holds or the deadline
        /// passes.
        fn pump_until<F: FnMut() -> bool>(&self, mut done: F) -> bool {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                self.handler.flush();
                if done() {
                    return true;
                }
                if Instant::now() >= deadline {
                    return false;
                }
                self.wakeup.wait(Duration::from_millis(20));
            }
        }
    }

    #[derive(Default)]
    struct Observed {
        received: Vec<u8>,
        flushes: usize,
        disconnected: Option<SocketAddr>,
        errors: Vec<Error>,
        accepted: Vec<Arc<Socket>>,
    }

    fn observe(socket: &Socket) -> Arc<Mutex<Observed>> {
        let observed = Arc::new(Mutex::new(Observed::default()));
        let sink = observed.clone();
        socket.events().listen(move |event| {
            let mut sink = sink.lock();
            match event {
                SocketEvent::Received(packet) => sink.received.extend_from_slice(packet),
                SocketEvent::Flush => sink.flushes += 1,
                SocketEvent::Disconnection(peer) => sink.disconnected = Some(*peer),
                SocketEvent::Accept(child) => sink.accepted.push(child.clone()),
                SocketEvent::Error(err) => sink.errors.push(err.clone()),
            }
        });
        observed
    }

    /// Blocking echo peer: accepts one connection and mirrors bytes until
    /// EOF.
    fn spawn_echo_peer() -> (SocketAddr, thread::JoinHandle<()>) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(count) => {
                        if stream.write_all(&buf[..count]).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        (address, handle)
    }

    /// Blocking sink peer: accepts one connection, collects everything until
    /// EOF and reports it on the channel.
    fn spawn_sink_peer() -> (SocketAddr, mpsc::Receiver<Vec<u8>>) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut collected = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(count) => collected.extend_from_slice(&buf[..count]),
                }
            }
            let _ = tx.send(collected);
        });

        (address, rx)
    }

    fn runtime() -> (Arc<ThreadPool>, Owner, IOSocket) {
        let pool = Arc::new(ThreadPool::init(2, Priority::Normal, None).unwrap());
        let owner = Owner::new();
        let io = IOSocket::new(pool.clone(), None).unwrap();
        (pool, owner, io)
    }

    #[test]
    fn test_connect_write_echo_disconnect() {
        let (address, peer) = spawn_echo_peer();
        let (pool, owner, io) = runtime();

        let socket = Arc::new(Socket::new(None));
        let observed = observe(&socket);

        socket.connect(address).unwrap();
        io.register(&socket, &owner.handler).unwrap();

        // Writable readiness reported the connect as a flush.
        assert!(owner.pump_until(|| observed.lock().flushes > 0));

        assert_eq!(socket.write(b"ping").unwrap(), 0);
        assert!(owner.pump_until(|| observed.lock().received == b"ping"));
        assert_eq!(socket.queueing(), 0);

        // Half-close towards the peer; the echo thread exits on EOF and the
        // closing stream surfaces as a disconnection with the peer address.
        socket.shutdown(Shutdown::Write).unwrap();
        assert!(owner.pump_until(|| observed.lock().disconnected.is_some()));
        assert_eq!(observed.lock().disconnected, Some(address));

        peer.join().unwrap();
        io.stop();
        pool.join();
        assert!(observed.lock().errors.is_empty());
    }

    #[test]
    fn test_writes_preserve_wire_order() {
        let (address, collected) = spawn_sink_peer();
        let (pool, owner, io) = runtime();

        let socket = Arc::new(Socket::new(None));
        let observed = observe(&socket);

        socket.connect(address).unwrap();
        io.register(&socket, &owner.handler).unwrap();
        assert!(owner.pump_until(|| observed.lock().flushes > 0));

        let mut expected = Vec::new();
        for index in 0..10u8 {
            let payload = vec![b'a' + index; 512];
            expected.extend_from_slice(&payload);
            socket.write(&payload).unwrap();
        }

        assert!(owner.pump_until(|| socket.queueing() == 0));
        socket.shutdown(Shutdown::Write).unwrap();

        let bytes = collected.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(bytes, expected);

        io.stop();
        pool.join();
    }

    #[test]
    fn test_pool_join_drains_pending_writes() {
        let (address, collected) = spawn_sink_peer();
        let (pool, owner, io) = runtime();

        let socket = Arc::new(Socket::new(None));
        let observed = observe(&socket);

        socket.connect(address).unwrap();
        io.register(&socket, &owner.handler).unwrap();
        assert!(owner.pump_until(|| observed.lock().flushes > 0));

        let mut expected = Vec::new();
        for index in 0..10u8 {
            let payload = vec![index; 128];
            expected.extend_from_slice(&payload);
            socket.write(&payload).unwrap();
        }

        io.stop();
        pool.join();

        // The clean drain transmitted everything before join returned.
        assert_eq!(socket.queueing(), 0);
        socket.shutdown(Shutdown::Write).unwrap();
        let bytes = collected.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(bytes, expected);

        // Whatever completions were posted before the join are final.
        owner.handler.flush();
        assert_eq!(owner.handler.pending(), 0);
    }

    #[test]
    fn test_listener_accepts_and_child_carries_data() {
        let (pool, owner, io) = runtime();

        let listener = Arc::new(Socket::new(None));
        let observed = observe(&listener);
        listener.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let address = listener.local_address().unwrap();
        io.register(&listener, &owner.handler).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let peer = thread::spawn(move || {
            let mut stream = std::net::TcpStream::connect(address).unwrap();
            stream.write_all(b"hi").unwrap();
            let mut reply = [0u8; 2];
            stream.read_exact(&mut reply).unwrap();
            let _ = done_tx.send(reply);
        });

        assert!(owner.pump_until(|| !observed.lock().accepted.is_empty()));
        let child = observed.lock().accepted[0].clone();
        assert!(child.peer_address().is_some());

        let child_observed = observe(&child);
        {
            let echo = Arc::downgrade(&child);
            child.events().listen(move |event| {
                if let SocketEvent::Received(packet) = event {
                    if let Some(socket) = echo.upgrade() {
                        let _ = socket.write(&{
                            let mut reply = packet.clone();
                            reply.reverse();
                            reply
                        });
                    }
                }
            });
        }
        io.register(&child, &owner.handler).unwrap();

        assert!(owner.pump_until(|| child_observed.lock().received == b"hi"));

        let reply = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(&reply, b"ih");

        peer.join().unwrap();
        io.stop();
        pool.join();
    }

    #[test]
    fn test_connect_refused_surfaces_one_network_error() {
        let (pool, owner, io) = runtime();

        // Grab a port with no listener behind it.
        let address = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let socket = Arc::new(Socket::new(None));
        let observed = observe(&socket);

        socket.connect(address).unwrap();
        io.register(&socket, &owner.handler).unwrap();

        assert!(owner.pump_until(|| !observed.lock().errors.is_empty()));
        // Extra readiness for the failed connect must not duplicate the
        // error event.
        owner.handler.flush();
        let observed = observed.lock();
        assert_eq!(observed.errors.len(), 1);
        assert_eq!(observed.errors[0].kind(), ErrorKind::Network);

        io.stop();
        pool.join();
    }

    #[test]
    fn test_unregistered_child_supports_direct_reads() {
        let (pool, owner, io) = runtime();

        let listener = Arc::new(Socket::new(None));
        let observed = observe(&listener);
        listener.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let address = listener.local_address().unwrap();
        io.register(&listener, &owner.handler).unwrap();

        let peer = thread::spawn(move || {
            let mut stream = std::net::TcpStream::connect(address).unwrap();
            stream.write_all(b"hello").unwrap();
            let _ = stream.shutdown(Shutdown::Write);
            thread::sleep(Duration::from_millis(100));
        });

        assert!(owner.pump_until(|| !observed.lock().accepted.is_empty()));
        let child = observed.lock().accepted[0].clone();

        // Never registered: the push pipeline stays out of the way and the
        // socket is pulled directly. `Some(0)` is nothing-available, `None`
        // the end of the stream.
        let mut collected = Vec::new();
        let mut buf = [0u8; 16];
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match child.read(&mut buf).unwrap() {
                Some(0) => {
                    assert!(Instant::now() < deadline);
                    thread::sleep(Duration::from_millis(10));
                }
                Some(count) => collected.extend_from_slice(&buf[..count]),
                None => break,
            }
        }
        assert_eq!(collected, b"hello");

        peer.join().unwrap();
        io.stop();
        pool.join();
    }

    #[test]
    fn test_deregistered_listener_receives_no_accepts() {
        let (pool, owner, io) = runtime();

        let listener = Arc::new(Socket::new(None));
        let observed = observe(&listener);
        listener.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let address = listener.local_address().unwrap();

        io.register(&listener, &owner.handler).unwrap();
        io.deregister(&listener);

        // The kernel backlog still takes the connection, but no readiness
        // reaches the subject any more.
        let _stream = std::net::TcpStream::connect(address).unwrap();
        owner.wakeup.wait(Duration::from_millis(200));
        owner.handler.flush();
        assert!(observed.lock().accepted.is_empty());

        io.stop();
        pool.join();
    }

    #[test]
    fn test_decoder_capture_suppresses_delivery() {
        struct DropOdd {
            count: usize,
        }

        impl crate::net::socket::Decoder for DropOdd {
            fn decode(&mut self, packet: Vec<u8>) -> Option<Vec<u8>> {
                self.count += 1;
                if self.count % 2 == 1 {
                    None
                } else {
                    Some(packet)
                }
            }
        }

        let (address, peer) = spawn_echo_peer();
        let (pool, owner, io) = runtime();

        let socket = Arc::new(Socket::new(None));
        let observed = observe(&socket);
        socket.set_decoder(Box::new(DropOdd { count: 0 }));

        socket.connect(address).unwrap();
        io.register(&socket, &owner.handler).unwrap();
        assert!(owner.pump_until(|| observed.lock().flushes > 0));

        // First echo is captured by the decoder, second one is delivered.
        socket.write(b"one").unwrap();
        thread::sleep(Duration::from_millis(100));
        socket.write(b"two").unwrap();

        assert!(owner.pump_until(|| observed.lock().received == b"two"));

        socket.shutdown(Shutdown::Write).unwrap();
        assert!(owner.pump_until(|| observed.lock().disconnected.is_some()));

        peer.join().unwrap();
        io.stop();
        pool.join();
    }
}
