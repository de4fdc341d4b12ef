//! Shared helpers for the integration tests.
#![allow(dead_code)]

pub mod fake_kernel;
pub mod mock_adapter;

use std::{io::IsTerminal, sync::Arc, time::Duration};

use debugger::{DebugService, DebuggerConfig, Model, ServiceEvent, Session};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use fake_kernel::FakeKernel;

pub fn init_test_logging() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    // error traces
    let _ = color_eyre::install();
}

/// A service with a fresh model, and the receiving end of its notifications.
pub fn new_service() -> (DebugService, Notifications) {
    let (tx, rx) = mpsc::unbounded_channel();
    let service = DebugService::new(Arc::new(Model::new()), tx, DebuggerConfig::default());
    (service, Notifications { rx })
}

/// Attach a service to a fresh connection of `kernel`.
pub fn connect_service(kernel: &FakeKernel) -> (DebugService, Notifications, Arc<Session>) {
    let (service, mut notifications) = new_service();
    let session = Arc::new(Session::from_transport(
        kernel.connect(),
        &DebuggerConfig::default(),
    ));
    service.set_session(Some(Arc::clone(&session)));
    assert_eq!(notifications.try_next(), Some(ServiceEvent::SessionChanged));
    (service, notifications, session)
}

pub struct Notifications {
    rx: mpsc::UnboundedReceiver<ServiceEvent>,
}

impl Notifications {
    /// Wait for a notification matching `pred`, dropping the ones before it.
    pub async fn wait_for<F>(&mut self, message: &str, pred: F) -> ServiceEvent
    where
        F: Fn(&ServiceEvent) -> bool,
    {
        tracing::debug!("waiting for {message}");
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), self.rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timeout waiting for {message}"))
                .unwrap_or_else(|| panic!("service went away while waiting for {message}"));
            if pred(&event) {
                return event;
            }
            tracing::trace!(?event, "skipping notification");
        }
    }

    pub async fn wait_for_event(&mut self, name: &str) -> debugger::Event {
        let ServiceEvent::Event(event) = self
            .wait_for(name, |e| matches!(e, ServiceEvent::Event(ev) if ev.name() == name))
            .await
        else {
            unreachable!()
        };
        event
    }

    pub fn try_next(&mut self) -> Option<ServiceEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything received so far.
    pub fn drain(&mut self) -> Vec<ServiceEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
