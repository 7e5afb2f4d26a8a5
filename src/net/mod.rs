//! Connection layer to the remote service
//!
//! Every channel is a plain TCP stream that starts with the same handshake: the client sends
//! its key and identity, the remote answers with an accept flag (plus a reason on reject).
//! The primary connection stays open for the life of the process. Secondary connections are
//! opened on demand, write a one-byte [`SecondaryKind`] after the handshake, and at most one
//! per kind may be alive at a time.

pub mod codec;
pub mod connection;
pub mod console;
pub mod error;
pub mod registry;

pub use codec::{WireReader, WireWriter};
pub use connection::{
    Connection, ConnectionState, Connections, Credentials, Endpoint, SecondaryConnection, SecondaryConnector,
    TcpReader, TcpWriter, TransportOptions, handshake,
};
pub use console::{CommandSink, OnlineConsole};
pub use error::{NetError, Result};
pub use registry::{KindLease, KindRegistry, SecondaryKind};
