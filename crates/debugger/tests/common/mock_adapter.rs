//! Scriptable adapter: tests decide what to answer and when.

use std::sync::atomic::{AtomicI64, Ordering};

use futures::StreamExt;
use serde_json::{Value, json};
use tokio::io::DuplexStream;
use tokio::sync::Mutex;
use tokio::time::{Duration, timeout};
use transport::testing::MemoryTransport;
use transport::{
    DapReader, DapWriter, Message, OutgoingMessage, RawEvent, Request, Response, split,
};

pub struct MockAdapter {
    reader: Mutex<DapReader<DuplexStream>>,
    writer: Mutex<DapWriter<DuplexStream>>,
    sequence: AtomicI64,
}

impl MockAdapter {
    pub fn new(reader: DapReader<DuplexStream>, writer: DapWriter<DuplexStream>) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            sequence: AtomicI64::new(1),
        }
    }

    fn next_seq(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Wait for the next request, which must be `expected_command`.
    pub async fn expect_request(&self, expected_command: &str) -> Request {
        let mut reader = self.reader.lock().await;
        match timeout(Duration::from_secs(5), reader.next()).await {
            Ok(Some(Ok(Message::Request(req)))) if req.command == expected_command => req,
            Ok(other) => panic!("expected '{expected_command}' request, got {other:?}"),
            Err(_) => panic!("timeout waiting for '{expected_command}' request"),
        }
    }

    /// Wait for the next request, whatever it is.
    pub async fn expect_any_request(&self) -> Request {
        let mut reader = self.reader.lock().await;
        match timeout(Duration::from_secs(5), reader.next()).await {
            Ok(Some(Ok(Message::Request(req)))) => req,
            Ok(other) => panic!("expected a request, got {other:?}"),
            Err(_) => panic!("timeout waiting for a request"),
        }
    }

    async fn send(&self, message: OutgoingMessage) {
        let mut writer = self.writer.lock().await;
        writer.send(message).await.expect("failed to send message");
    }

    pub async fn send_success_response(&self, request: &Request, body: Option<Value>) {
        self.send(OutgoingMessage::Response(Response {
            seq: self.next_seq(),
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        }))
        .await;
    }

    pub async fn send_error_response(&self, request: &Request, message: &str) {
        self.send(OutgoingMessage::Response(Response {
            seq: self.next_seq(),
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message.to_string()),
            body: None,
        }))
        .await;
    }

    pub async fn send_event(&self, event: &str, body: Option<Value>) {
        self.send(OutgoingMessage::Event(RawEvent {
            seq: self.next_seq(),
            event: event.to_string(),
            body,
        }))
        .await;
    }

    pub async fn send_stopped_event(&self, thread_id: i64, reason: &str) {
        self.send_event(
            "stopped",
            Some(json!({
                "reason": reason,
                "threadId": thread_id,
            })),
        )
        .await;
    }

    /// Answer `initialize` and `attach` as a kernel would.
    pub async fn handle_start(&self) {
        let req = self.expect_request("initialize").await;
        self.send_success_response(&req, Some(json!({"supportsConfigurationDoneRequest": true})))
            .await;
        let req = self.expect_request("attach").await;
        self.send_success_response(&req, None).await;
    }
}

/// Client end of an in-memory connection, and the adapter serving it.
pub fn create_mock_adapter() -> (MemoryTransport, MockAdapter) {
    let (client, adapter) = MemoryTransport::pair();
    let (reader, writer) = split(adapter);
    (client, MockAdapter::new(reader, writer))
}
