//! Remote audio receiver protocol
//!
//! Device authentication, stream decryption, metadata and volume encodings,
//! the receiver's control handlers and the client handshake used to forward
//! a stream to another node.

pub mod crypto;
pub mod dmap;
pub mod establish;
pub mod server;
pub mod volume;

pub use crypto::{AesDecrypter, DeviceKey, HardwareAddr};
pub use establish::{establish_session, send_control};
pub use server::{Receiver, ReceiverSettings};
