//! Tracking requests that are waiting for a reply
//!
//! Each request is registered under its sequence number before it is
//! written. The reader task hands a reply to the caller whose sequence
//! number matches the reply's `request_seq`, in whatever order replies
//! arrive.

use std::collections::HashMap;

use tokio::sync::oneshot;
use transport::{Response, Seq};

use crate::correlator::TransportError;

pub(crate) type ReplySender = oneshot::Sender<Result<Response, TransportError>>;

struct PendingRequest {
    command: String,
    reply_tx: ReplySender,
}

/// Why the map stopped accepting requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Closed {
    Disposed,
    Disconnected,
}

impl Closed {
    pub(crate) fn error(self) -> TransportError {
        match self {
            Closed::Disposed => TransportError::Disposed,
            Closed::Disconnected => TransportError::Disconnected,
        }
    }
}

pub(crate) struct PendingRequests {
    pending: HashMap<Seq, PendingRequest>,
    closed: Option<Closed>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            pending: HashMap::new(),
            closed: None,
        }
    }

    /// Register a caller waiting for the reply to `seq`.
    ///
    /// Fails once the connection has been disposed or has gone away.
    pub(crate) fn add(
        &mut self,
        seq: Seq,
        command: &str,
        reply_tx: ReplySender,
    ) -> Result<(), TransportError> {
        if let Some(closed) = self.closed {
            return Err(closed.error());
        }
        self.pending.insert(
            seq,
            PendingRequest {
                command: command.to_string(),
                reply_tx,
            },
        );
        Ok(())
    }

    /// Hand a reply to its caller. Returns the reply back if nobody is
    /// waiting for it.
    pub(crate) fn resolve(&mut self, response: Response) -> Result<(), Response> {
        match self.pending.remove(&response.request_seq) {
            Some(request) => {
                if request.command != response.command {
                    tracing::warn!(
                        request_seq = response.request_seq,
                        sent = %request.command,
                        received = %response.command,
                        "reply command does not match request"
                    );
                }
                // the caller may have timed out and gone away
                let _ = request.reply_tx.send(Ok(response));
                Ok(())
            }
            None => Err(response),
        }
    }

    pub(crate) fn remove(&mut self, seq: Seq) {
        self.pending.remove(&seq);
    }

    /// Settle every waiting caller with an error produced by `error`.
    pub(crate) fn reject_all(&mut self, error: impl Fn() -> TransportError) {
        for (seq, request) in self.pending.drain() {
            tracing::debug!(seq, command = %request.command, "rejecting pending request");
            let _ = request.reply_tx.send(Err(error()));
        }
    }

    /// Reject everything and refuse later registrations.
    ///
    /// The first reason wins, so disposing after a disconnect keeps
    /// reporting the disconnect.
    pub(crate) fn close(&mut self, reason: Closed) {
        let reason = *self.closed.get_or_insert(reason);
        self.reject_all(|| reason.error());
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
