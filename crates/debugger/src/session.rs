//! One debugging conversation with a kernel.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use serde_json::Value;
use tokio::sync::broadcast;
use transport::{
    DapTransport, Response,
    events::Event,
    requests::{self, Command, DisconnectArguments, Empty},
    responses::{Capabilities, DebugInfoResponse, Reply, RequestFailed},
};

use crate::{
    config::DebuggerConfig,
    correlator::{Correlator, TransportError},
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connecting to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("initialize request failed: {0}")]
    InitializeFailed(String),
    #[error(transparent)]
    Request(#[from] RequestFailed),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Lifecycle of one connection to a kernel's debug adapter.
pub struct Session {
    correlator: Correlator,
    config: DebuggerConfig,
    started: AtomicBool,
    capabilities: Mutex<Option<Capabilities>>,
}

impl Session {
    /// Connect to a debug adapter listening on `addr`.
    pub async fn connect(addr: &str, config: &DebuggerConfig) -> Result<Self, SessionError> {
        tracing::debug!(%addr, "connecting to debug adapter");
        let stream = transport::connect(addr)
            .await
            .map_err(|source| SessionError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self::from_transport(stream, config))
    }

    /// Wrap an existing connection (useful for testing).
    pub fn from_transport<T: DapTransport>(transport: T, config: &DebuggerConfig) -> Self {
        Self {
            correlator: Correlator::new(transport, config),
            config: config.clone(),
            started: AtomicBool::new(false),
            capabilities: Mutex::new(None),
        }
    }

    /// Initialize the adapter and attach to the kernel.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SessionError> {
        let reply = self
            .request::<requests::Initialize>(self.config.initialize_arguments())
            .await?;
        let capabilities = match reply {
            Reply::Success(capabilities) => capabilities,
            Reply::Failure { message, .. } => return Err(SessionError::InitializeFailed(message)),
        };
        *self
            .capabilities
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(capabilities);

        self.started.store(true, Ordering::SeqCst);

        if let Reply::Failure { message, .. } = self.request::<requests::Attach>(Empty {}).await? {
            tracing::warn!(%message, "attach request failed");
        }
        Ok(())
    }

    /// Detach from the kernel and settle every request still in flight.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.started.store(false, Ordering::SeqCst);
        let reply = self
            .request::<requests::Disconnect>(DisconnectArguments {
                restart: false,
                terminate_debuggee: true,
            })
            .await;
        self.correlator.stop();

        if let Reply::Failure { message, .. } = reply? {
            tracing::warn!(%message, "disconnect request failed");
        }
        Ok(())
    }

    /// Ask the kernel for the debugging state it kept while no front-end
    /// was attached.
    #[tracing::instrument(skip(self))]
    pub async fn restore_state(&self) -> Result<DebugInfoResponse, SessionError> {
        let info = self
            .request::<requests::DebugInfo>(Empty {})
            .await?
            .into_result()?;
        self.started.store(info.is_started, Ordering::SeqCst);
        Ok(info)
    }

    pub async fn send_request(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<Response, TransportError> {
        self.correlator.send_request(command, arguments).await
    }

    pub async fn request<C: Command>(
        &self,
        arguments: C::Arguments,
    ) -> Result<Reply<C::Body>, TransportError> {
        self.correlator.request::<C>(arguments).await
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.correlator.subscribe()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.correlator.is_disposed()
    }

    pub fn dispose(&self) {
        self.correlator.dispose();
    }

    /// What the adapter reported it supports, once started.
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
