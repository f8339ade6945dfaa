//! Base layer for building network servers: a fixed pool of worker threads
//! onto which socket and file operations are dispatched, combined with a
//! handler-thread callback bus that delivers completions back to an owner
//! thread in a well-defined order.
//!
//! The pieces compose bottom-up: [`threading::Signal`] is the latch
//! everything blocks on, [`threading::Handler`] serialises completions onto
//! the owner thread, [`threading::ThreadPool`] routes runners to workers by
//! *track* (pinning one subject's I/O to one thread), and
//! [`net::IOSocket`]/[`disk::IOFile`] tie readiness and file operations into
//! that fabric. Applications own their subjects ([`net::Socket`],
//! [`net::TCPClient`], [`disk::File`]), subscribe to their events and drain
//! their handler; in-flight runners share ownership, so a descriptor can
//! never close mid-operation and callbacks only ever reach live subjects.

pub mod disk;
pub mod error;
pub mod event;
pub mod logging;
pub mod net;
pub mod threading;

pub mod prelude;
