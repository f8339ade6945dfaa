use crate::error::{Error, ErrorKind, Result};
use crate::event::Events;
use crate::logging::{self, Logger};
use crate::net::buffer::Buffer;
use crate::net::io_socket::IOSocket;
use crate::net::socket::{Decoder, Socket, SocketEvent};
use crate::threading::handler::Handler;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

/// Connection lifecycle superimposed on a socket.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Events a client raises on its owner handler thread. Inbound data goes
/// through the stream callback instead (`on_data`), which reports how much
/// of the presented buffer it consumed.
pub enum ClientEvent {
    Flush,
    Disconnection(SocketAddr),
    Error(Error),
}

type DataCallback = Box<dyn FnMut(&[u8]) -> usize + Send>;
type DecoderFactory = Box<dyn Fn() -> Box<dyn Decoder> + Send>;

/// State shared with the subscriptions installed on the underlying socket.
struct ClientShared {
    log: Logger,
    state: Mutex<ClientState>,
    peer: Mutex<Option<SocketAddr>>,
    residual: Mutex<Buffer>,
    on_data: Mutex<Option<DataCallback>>,
    events: Events<ClientEvent>,
}

impl ClientShared {
    /// Runs on the owner handler thread, driven by the socket events.
    fn on_socket_event(&self, event: &SocketEvent) {
        match event {
            SocketEvent::Flush => {
                let mut state = self.state.lock();
                match *state {
                    ClientState::Connecting => {
                        *state = ClientState::Connected;
                        drop(state);
                        logging::debug!(self.log, "connected"; "peer" => ?*self.peer.lock());
                        self.events.raise(&ClientEvent::Flush);
                    }
                    ClientState::Connected => {
                        drop(state);
                        self.events.raise(&ClientEvent::Flush);
                    }
                    _ => {}
                }
            }
            SocketEvent::Received(packet) => self.assemble(packet),
            SocketEvent::Disconnection(peer) => {
                let mut state = self.state.lock();
                if *state == ClientState::Disconnected {
                    return;
                }
                *state = ClientState::Disconnected;
                drop(state);

                self.residual.lock().clear();
                logging::debug!(self.log, "disconnected"; "peer" => %peer);
                self.events.raise(&ClientEvent::Disconnection(*peer));
            }
            SocketEvent::Error(err) => {
                // A fatal socket error ends the connection attempt or the
                // connection itself.
                let was_active = {
                    let mut state = self.state.lock();
                    match *state {
                        ClientState::Connecting | ClientState::Connected => {
                            *state = ClientState::Disconnected;
                            true
                        }
                        _ => false,
                    }
                };

                self.events.raise(&ClientEvent::Error(err.clone()));

                if was_active {
                    self.residual.lock().clear();
                    let peer = *self.peer.lock();
                    if let Some(peer) = peer {
                        self.events.raise(&ClientEvent::Disconnection(peer));
                    }
                }
            }
            SocketEvent::Accept(_) => {}
        }
    }

    /// Stream assembler: concatenate the residual of the previous reception
    /// with the new bytes (in place when there is no residual), hand the
    /// result to the stream callback until it stops consuming, and keep the
    /// unconsumed tail.
    fn assemble(&self, packet: &[u8]) {
        let mut residual = self.residual.lock();

        if residual.is_empty() {
            let consumed = self.dispatch(packet);
            if consumed < packet.len() {
                residual.push(&packet[consumed..]);
            }
        } else {
            residual.push(packet);
            let consumed = self.dispatch(residual.read_slice());
            residual.consume(consumed);
        }
    }

    fn dispatch(&self, mut data: &[u8]) -> usize {
        let mut slot = self.on_data.lock();
        let callback = match slot.as_mut() {
            Some(callback) => callback,
            None => return 0,
        };

        let mut total = 0;
        while !data.is_empty() {
            let consumed = callback(data).min(data.len());
            if consumed == 0 {
                break;
            }
            total += consumed;
            data = &data[consumed..];
        }

        total
    }
}

/// TCP client: a connection state machine over `Socket`/`IOSocket` plus
/// stream buffering. The application owns the client exclusively; the
/// underlying socket is shared with the in-flight runners and dropped after
/// the last of them finishes.
pub struct TCPClient {
    io: Arc<IOSocket>,
    handler: Arc<Handler>,
    shared: Arc<ClientShared>,
    socket: Mutex<Option<Arc<Socket>>>,
    decoder_factory: Mutex<Option<DecoderFactory>>,
}

impl TCPClient {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(
        io: Arc<IOSocket>,
        handler: Arc<Handler>,
        log: L,
    ) -> TCPClient {
        let log = match log.into() {
            Some(log) => log.new(logging::o!("component" => "tcp-client")),
            None => Logger::root(logging::Discard, logging::o!()),
        };

        TCPClient {
            io,
            handler,
            shared: Arc::new(ClientShared {
                log,
                state: Mutex::new(ClientState::Idle),
                peer: Mutex::new(None),
                residual: Mutex::new(Buffer::new()),
                on_data: Mutex::new(None),
                events: Events::new(),
            }),
            socket: Mutex::new(None),
            decoder_factory: Mutex::new(None),
        }
    }

    #[inline]
    pub fn events(&self) -> &Events<ClientEvent> {
        &self.shared.events
    }

    #[inline]
    pub fn state(&self) -> ClientState {
        *self.shared.state.lock()
    }

    #[inline]
    pub fn connecting(&self) -> bool {
        self.state() == ClientState::Connecting
    }

    #[inline]
    pub fn connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    pub fn peer_address(&self) -> Option<SocketAddr> {
        *self.shared.peer.lock()
    }

    /// The shared socket while a connection exists.
    pub fn socket(&self) -> Option<Arc<Socket>> {
        self.socket.lock().clone()
    }

    /// Install the stream callback invoked with assembled inbound bytes; it
    /// returns how many it consumed, the rest is retained for the next
    /// reception.
    pub fn on_data<F>(&self, callback: F)
    where
        F: FnMut(&[u8]) -> usize + Send + 'static,
    {
        *self.shared.on_data.lock() = Some(Box::new(callback));
    }

    /// Install a decoder factory applied to every new connection; this is
    /// where a TLS adapter hooks into the byte path.
    pub fn set_decoder_factory<F>(&self, factory: F)
    where
        F: Fn() -> Box<dyn Decoder> + Send + 'static,
    {
        *self.decoder_factory.lock() = Some(Box::new(factory));
    }

    /// Start connecting. A connect to the address already being connected
    /// (or connected) to is a no-op; a different address requires a
    /// disconnect first.
    pub fn connect(&self, address: SocketAddr) -> Result<()> {
        {
            let state = self.shared.state.lock();
            if matches!(*state, ClientState::Connecting | ClientState::Connected) {
                if *self.shared.peer.lock() == Some(address) {
                    return Ok(());
                }
                return Err(Error::new(ErrorKind::Argument, "client already connected"));
            }
        }

        let socket = Arc::new(Socket::new(&self.shared.log));
        if let Some(factory) = self.decoder_factory.lock().as_ref() {
            socket.set_decoder(factory());
        }

        {
            let shared = self.shared.clone();
            socket.events().listen(move |event| shared.on_socket_event(event));
        }

        socket.connect(address)?;
        self.io.register(&socket, &self.handler)?;

        *self.socket.lock() = Some(socket);
        *self.shared.peer.lock() = Some(address);
        *self.shared.state.lock() = ClientState::Connecting;

        Ok(())
    }

    /// Queue bytes for transmission on the connection's write track. Returns
    /// the count transmitted synchronously (0; the pinned worker performs
    /// the syscalls). Throttle by watching `queueing()`.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        let socket = self.socket.lock().clone();
        let socket = match socket {
            Some(socket) => socket,
            None => return Err(Error::new(ErrorKind::Network, "client not connected")),
        };

        if !matches!(self.state(), ClientState::Connecting | ClientState::Connected) {
            return Err(Error::new(ErrorKind::Network, "client not connected"));
        }

        socket.write(data)
    }

    /// Bytes accepted by `send` but not yet on the wire.
    pub fn queueing(&self) -> u64 {
        self.socket
            .lock()
            .as_ref()
            .map(|socket| socket.queueing())
            .unwrap_or(0)
    }

    /// Tear the connection down. Raises `Disconnection` exactly once for an
    /// active connection; afterwards no further events reach subscribers and
    /// the client may connect again.
    pub fn disconnect(&self) {
        let socket = self.socket.lock().take();
        let socket = match socket {
            Some(socket) => socket,
            None => return,
        };

        socket.close();

        let was_active = {
            let mut state = self.shared.state.lock();
            let was = *state;
            *state = ClientState::Disconnected;
            matches!(was, ClientState::Connecting | ClientState::Connected)
        };
        self.shared.residual.lock().clear();

        if was_active {
            let peer = *self.shared.peer.lock();
            if let Some(peer) = peer {
                self.shared.events.raise(&ClientEvent::Disconnection(peer));
            }
        }
    }
}

impl Drop for TCPClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
