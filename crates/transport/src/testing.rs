//! Helpers for exercising DAP code without a real adapter.

use serde::Serialize;
use tokio::io::{DuplexStream, duplex};

use crate::connection::DapTransport;

/// One end of an in-memory duplex connection.
///
/// Bytes written by one end are read by the other, like the two sides of a
/// socket between a front-end and a kernel.
pub struct MemoryTransport {
    read: DuplexStream,
    write: DuplexStream,
}

impl MemoryTransport {
    pub fn pair() -> (Self, Self) {
        Self::pair_with_buffer_size(64 * 1024)
    }

    pub fn pair_with_buffer_size(buffer_size: usize) -> (Self, Self) {
        let (client_write, adapter_read) = duplex(buffer_size);
        let (adapter_write, client_read) = duplex(buffer_size);

        (
            MemoryTransport {
                read: client_read,
                write: client_write,
            },
            MemoryTransport {
                read: adapter_read,
                write: adapter_write,
            },
        )
    }
}

impl DapTransport for MemoryTransport {
    type Read = DuplexStream;
    type Write = DuplexStream;

    fn into_split(self) -> (Self::Read, Self::Write) {
        (self.read, self.write)
    }
}

/// Frame a JSON-serialisable message the way it appears on the wire.
pub fn frame_message(msg: &impl Serialize) -> Vec<u8> {
    let json = serde_json::to_string(msg).expect("test message serialises");
    format!("Content-Length: {}\r\n\r\n{}", json.len(), json).into_bytes()
}
