//! Typed halves of a framed connection.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Sink, SinkExt, Stream};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::DapCodec;
use crate::error::CodecError;
use crate::message::{Message, OutgoingMessage};

pin_project! {
    /// Stream of messages decoded from the adapter's output.
    pub struct DapReader<R> {
        #[pin]
        inner: FramedRead<R, DapCodec>,
    }
}

impl<R> DapReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self::with_codec(reader, DapCodec::new())
    }

    pub fn with_codec(reader: R, codec: DapCodec) -> Self {
        Self {
            inner: FramedRead::new(reader, codec),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R> Stream for DapReader<R>
where
    R: AsyncRead + Unpin,
{
    type Item = Result<Message, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

pin_project! {
    /// Sink encoding messages onto the adapter's input.
    pub struct DapWriter<W> {
        #[pin]
        inner: FramedWrite<W, DapCodec>,
    }
}

impl<W> DapWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self::with_codec(writer, DapCodec::new())
    }

    pub fn with_codec(writer: W, codec: DapCodec) -> Self {
        Self {
            inner: FramedWrite::new(writer, codec),
        }
    }

    /// Encode, write and flush one message.
    pub async fn send(&mut self, message: OutgoingMessage) -> Result<(), CodecError> {
        SinkExt::send(&mut self.inner, message).await
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

impl<W> Sink<OutgoingMessage> for DapWriter<W>
where
    W: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: OutgoingMessage) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}
