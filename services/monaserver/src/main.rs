mod config;

use config::ServerConfig;
use mona::logging;
use mona::prelude::*;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Accepted sockets are owned here; dropping the entry releases the
/// descriptor once the last in-flight runner finished.
type Connections = Arc<Mutex<Vec<Arc<Socket>>>>;

/// Echo server exercising the whole base layer: a listening socket fans
/// accepted connections out to the worker pool, and every completion funnels
/// through one owner handler drained by the main thread.
fn main() {
    let config = ServerConfig::load_or_default("monaserver.toml");
    let log = logging::init(config.severity()).expect("Error building the logger");

    let address: SocketAddr = config
        .address()
        .parse()
        .expect("Error parsing the listen address");

    let terminate = TerminateSignal::new();

    let pool = Arc::new(
        ThreadPool::init(config.threads, Priority::Normal, &log).expect("Error starting the pool"),
    );
    let wakeup = Arc::new(Signal::new());
    let handler = Arc::new(Handler::new(wakeup.clone(), &log));
    pool.back_handler(&handler);

    let io = Arc::new(IOSocket::new(pool.clone(), &log).expect("Error starting the selector"));

    let connections: Connections = Arc::new(Mutex::new(Vec::new()));

    let listener = Arc::new(Socket::new(&log));
    listener.listen(address).expect("Error binding the listener");

    {
        let io = io.clone();
        let handler = handler.clone();
        let log = log.clone();
        let connections = connections.clone();
        listener.events().listen(move |event| {
            if let SocketEvent::Accept(connection) = event {
                serve(connection, &connections, &io, &handler, &log);
            }
        });
    }
    io.register(&listener, &handler)
        .expect("Error registering the listener");

    logging::info!(log, "listening"; "address" => %address, "workers" => pool.size());

    // Wake the owner loop once the OS (or anyone else) asks us to stop.
    let stopping = Arc::new(AtomicBool::new(false));
    {
        let stopping = stopping.clone();
        let wakeup = wakeup.clone();
        thread::spawn(move || {
            terminate.wait(Duration::ZERO);
            stopping.store(true, Ordering::Release);
            wakeup.set();
        });
    }

    // The owner loop: every application callback in this process runs here.
    while !stopping.load(Ordering::Acquire) {
        wakeup.wait(Duration::from_millis(500));
        handler.flush();
    }

    logging::info!(log, "shutting down");

    for connection in connections.lock().drain(..) {
        connection.close();
    }
    listener.close();
    io.stop();
    pool.join();
    handler.flush();
}

/// Wire an accepted connection: own it, echo everything back, release it on
/// disconnection or error.
fn serve(
    connection: &Arc<Socket>,
    connections: &Connections,
    io: &Arc<IOSocket>,
    handler: &Arc<Handler>,
    log: &Logger,
) {
    let peer = connection.peer_address();
    logging::info!(log, "connection accepted"; "peer" => ?peer);

    {
        let weak = Arc::downgrade(connection);
        let connections = connections.clone();
        let log = log.clone();
        connection.events().listen(move |event| match event {
            SocketEvent::Received(packet) => {
                if let Some(connection) = weak.upgrade() {
                    if let Err(err) = connection.write(packet) {
                        logging::warn!(log, "echo failed"; "error" => %err);
                    }
                }
            }
            SocketEvent::Disconnection(peer) => {
                logging::info!(log, "connection closed"; "peer" => %peer);
                release(&weak, &connections);
            }
            SocketEvent::Error(err) => {
                logging::warn!(log, "connection error"; "error" => %err);
                release(&weak, &connections);
            }
            _ => {}
        });
    }

    connections.lock().push(connection.clone());

    if let Err(err) = io.register(connection, handler) {
        logging::warn!(log, "registration failed"; "peer" => ?peer, "error" => %err);
        release(&Arc::downgrade(connection), connections);
    }
}

fn release(socket: &Weak<Socket>, connections: &Connections) {
    if let Some(socket) = socket.upgrade() {
        socket.close();
        connections.lock().retain(|held| !Arc::ptr_eq(held, &socket));
    }
}
