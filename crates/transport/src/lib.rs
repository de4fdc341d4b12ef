//! Wire layer for talking the Debug Adapter Protocol to a kernel.
//!
//! This crate frames messages (`Content-Length` headers followed by JSON),
//! exposes the framed connection as a [`DapReader`] stream and a
//! [`DapWriter`] sink, and defines the typed protocol surface used by kernel
//! debuggers: [`requests`] with their argument types, the matching reply
//! bodies in [`responses`], and unsolicited [`events`].
//!
//! Correlating requests with replies and reacting to events is left to the
//! `debugger` crate.

mod codec;
mod connection;
mod error;
mod message;
mod stream;

pub mod events;
pub mod requests;
pub mod responses;
pub mod testing;
pub mod types;

pub use codec::{DEFAULT_MAX_MESSAGE_SIZE, DapCodec};
pub use connection::{DapTransport, split, split_with_codec};
pub use error::CodecError;
pub use message::{Event as RawEvent, Message, OutgoingMessage, Request, Response, Seq};
pub use stream::{DapReader, DapWriter};

use tokio::net::{TcpStream, ToSocketAddrs};

/// Open a TCP connection to a kernel's debug adapter.
pub async fn connect(addr: impl ToSocketAddrs) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
