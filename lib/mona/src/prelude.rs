//! Single-import surface for applications built on the base layer.

pub use crate::disk::{File, FileDecoder, FileEvent, IOFile, Mode};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::event::{Events, Flow, Subscription};
pub use crate::logging::Logger;
pub use crate::net::{Buffer, ClientEvent, ClientState, Decoder, IOSocket, Socket, SocketEvent, TCPClient};
pub use crate::threading::{Action, Handler, Priority, Runner, Signal, TerminateSignal, ThreadPool};
