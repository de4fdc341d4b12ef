//! Byte streams that can carry a DAP conversation.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::codec::DapCodec;
use crate::stream::{DapReader, DapWriter};

/// A bidirectional byte stream that splits into owned halves.
pub trait DapTransport: Send + 'static {
    type Read: AsyncRead + Unpin + Send + 'static;
    type Write: AsyncWrite + Unpin + Send + 'static;

    fn into_split(self) -> (Self::Read, Self::Write);
}

impl DapTransport for TcpStream {
    type Read = OwnedReadHalf;
    type Write = OwnedWriteHalf;

    fn into_split(self) -> (Self::Read, Self::Write) {
        TcpStream::into_split(self)
    }
}

/// Split a transport into framed halves using the default codec.
pub fn split<T: DapTransport>(transport: T) -> (DapReader<T::Read>, DapWriter<T::Write>) {
    split_with_codec(transport, DapCodec::new())
}

/// Split a transport into framed halves sharing the codec settings.
pub fn split_with_codec<T: DapTransport>(
    transport: T,
    codec: DapCodec,
) -> (DapReader<T::Read>, DapWriter<T::Write>) {
    let (read, write) = transport.into_split();
    (
        DapReader::with_codec(read, codec.clone()),
        DapWriter::with_codec(write, codec),
    )
}
