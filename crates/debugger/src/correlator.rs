//! Request/reply correlation over one DAP connection.
//!
//! A [`Correlator`] owns the write half of the connection and a reader task
//! draining the read half. Replies are routed to the request that produced
//! them by sequence number; events are decoded and broadcast to every
//! subscriber.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::Duration,
};

use futures::StreamExt;
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{broadcast, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use transport::{
    CodecError, DapCodec, DapReader, DapTransport, DapWriter, Message, OutgoingMessage, Request,
    Response,
    events::Event,
    requests::Command,
    responses::{self, Reply},
};

use crate::{
    config::DebuggerConfig,
    pending_requests::{Closed, PendingRequests},
};

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// A request that did not get an answer from the adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request cancelled because the correlator was stopped")]
    Stopped,
    #[error("correlator has been disposed")]
    Disposed,
    #[error("connection to the debug adapter closed")]
    Disconnected,
    #[error("no reply to `{command}` within {timeout:?}")]
    Timeout {
        command: String,
        timeout: Duration,
    },
    #[error("writing request")]
    Write(#[source] CodecError),
    #[error("encoding arguments of `{command}`")]
    Encode {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("decoding reply to `{command}`")]
    Decode {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// State shared between the correlator and its reader task.
struct Shared {
    pending: Mutex<PendingRequests>,
    events_tx: Mutex<Option<broadcast::Sender<Event>>>,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, PendingRequests> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn events_tx(&self) -> std::sync::MutexGuard<'_, Option<broadcast::Sender<Event>>> {
        self.events_tx.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Settle every caller and end every event stream.
    fn close(&self, reason: Closed) {
        self.pending().close(reason);
        self.events_tx().take();
    }
}

pub struct Correlator {
    writer: tokio::sync::Mutex<DapWriter<BoxedWrite>>,
    sequence_number: AtomicI64,
    shared: Arc<Shared>,
    request_timeout: Option<Duration>,
    cancel_token: CancellationToken,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Correlator {
    /// Take over a connection and start reading from it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<T: DapTransport>(transport: T, config: &DebuggerConfig) -> Self {
        let codec = DapCodec::with_max_size(config.max_message_size);
        let (read, write) = transport.into_split();
        let reader = DapReader::with_codec(read, codec.clone());
        let writer = DapWriter::with_codec(Box::new(write) as BoxedWrite, codec);

        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingRequests::new()),
            events_tx: Mutex::new(Some(events_tx)),
        });

        let cancel_token = CancellationToken::new();
        let reader_handle = spawn_reader_task(reader, Arc::clone(&shared), cancel_token.clone());

        Self {
            writer: tokio::sync::Mutex::new(writer),
            sequence_number: AtomicI64::new(1),
            shared,
            request_timeout: config.request_timeout(),
            cancel_token,
            reader_handle: Mutex::new(Some(reader_handle)),
            disposed: AtomicBool::new(false),
        }
    }

    /// Send a request and wait for the matching reply.
    ///
    /// A reply with `success = false` is returned as-is; only requests that
    /// never got a reply are errors.
    #[tracing::instrument(skip(self, arguments))]
    pub async fn send_request(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<Response, TransportError> {
        if self.is_disposed() {
            return Err(TransportError::Disposed);
        }

        let seq = self.sequence_number.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending().add(seq, command, reply_tx)?;

        let message = OutgoingMessage::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });
        tracing::debug!(seq, "sending request");
        let written = self.writer.lock().await.send(message).await;
        if let Err(e) = written {
            self.shared.pending().remove(seq);
            return Err(TransportError::Write(e));
        }

        let reply = match self.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.shared.pending().remove(seq);
                    tracing::warn!(seq, ?timeout, "request timed out");
                    return Err(TransportError::Timeout {
                        command: command.to_string(),
                        timeout,
                    });
                }
            },
            None => reply_rx.await,
        };

        // a dropped sender means the map went away with the correlator
        let response = reply.map_err(|_| TransportError::Disposed)??;
        tracing::debug!(seq, success = response.success, "received reply");
        Ok(response)
    }

    /// Send a typed request and decode the reply body.
    pub async fn request<C: Command>(
        &self,
        arguments: C::Arguments,
    ) -> Result<Reply<C::Body>, TransportError> {
        let arguments = serde_json::to_value(arguments).map_err(|source| {
            TransportError::Encode {
                command: C::COMMAND,
                source,
            }
        })?;
        let response = self.send_request(C::COMMAND, Some(arguments)).await?;
        responses::decode::<C>(response).map_err(|source| TransportError::Decode {
            command: C::COMMAND,
            source,
        })
    }

    /// Receive every event decoded from now on.
    ///
    /// After disposal or disconnection the receiver is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        match self.shared.events_tx().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Settle every waiting request with [`TransportError::Stopped`].
    ///
    /// The connection stays open and new requests may be sent.
    pub fn stop(&self) {
        tracing::debug!("stopping correlator");
        self.shared.pending().reject_all(|| TransportError::Stopped);
    }

    /// Tear down the connection. Calling this more than once is harmless.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("disposing correlator");
        self.cancel_token.cancel();
        self.shared.close(Closed::Disposed);
        let handle = self
            .reader_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending().len()
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn spawn_reader_task<R>(
    mut reader: DapReader<R>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("reader task cancelled");
                    return;
                }
                msg = reader.next() => {
                    match msg {
                        Some(Ok(message)) => dispatch(&shared, message),
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "transport error");
                            break;
                        }
                        None => {
                            tracing::debug!("transport closed");
                            break;
                        }
                    }
                }
            }
        }
        shared.close(Closed::Disconnected);
    })
}

fn dispatch(shared: &Shared, message: Message) {
    match message {
        Message::Response(response) => {
            tracing::debug!(request_seq = response.request_seq, command = %response.command, "received response");
            if let Err(response) = shared.pending().resolve(response) {
                tracing::warn!(
                    request_seq = response.request_seq,
                    command = %response.command,
                    "reply to unknown request"
                );
            }
        }
        Message::Event(raw) => {
            tracing::debug!(event = %raw.event, "received event");
            let event = Event::from(raw);
            if let Some(tx) = shared.events_tx().as_ref() {
                // no subscribers is fine
                let _ = tx.send(event);
            }
        }
        Message::Request(request) => {
            tracing::warn!(command = %request.command, "ignoring reverse request from adapter");
        }
    }
}

/// Next sequence number that would be allocated, for tests.
#[cfg(test)]
impl Correlator {
    fn next_seq(&self) -> transport::Seq {
        self.sequence_number.load(Ordering::SeqCst)
    }
}
