//! Control protocol subsystem
//!
//! Text request/response protocol used to negotiate a streaming session,
//! plus the session object that owns the UDP audio path.

pub mod client;
pub mod codec;
pub mod message;
pub mod server;
pub mod session;

pub use client::Client;
pub use codec::{encode_request, encode_response, read_request, read_response, write_request, write_response};
pub use message::{Headers, Method, Request, Response, Status, Transport};
pub use server::{ConnectionInfo, Server, StopHandle};
pub use session::{Decrypter, PacketStream, PortSet, Session, SessionState};
