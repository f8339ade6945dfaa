//! Non-blocking sockets, the readiness selector and the TCP client built on
//! top of them.

pub mod buffer;
pub mod io_socket;
pub mod socket;
pub mod tcp_client;

pub use buffer::Buffer;
pub use io_socket::IOSocket;
pub use socket::{Decoder, Socket, SocketEvent};
pub use tcp_client::{ClientEvent, ClientState, TCPClient};
