//! Orchestration of a debug session on behalf of a front-end.
//!
//! The [`DebugService`] owns at most one [`Session`], reacts to its events
//! by refreshing the shared [`Model`], and exposes the operations a
//! notebook front-end needs: starting and stopping the debugger, managing
//! breakpoints of code cells, stepping, and inspecting the paused program.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use eyre::WrapErr;
use futures::future::join_all;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use transport::{
    events::Event,
    requests::{
        self, Command, DumpCellArguments, Empty, EvaluateArguments, ScopesArguments,
        SetBreakpointsArguments, SourceArguments, StackTraceArguments, ThreadArguments,
        VariablesArguments,
    },
    responses::{DumpCellResponse, EvaluateResponse, Reply},
    types::{self, Source, SourceBreakpoint, StackFrameId, ThreadId, VariablesReference},
};

use crate::{
    config::DebuggerConfig,
    hash::{HashError, SourceIdentity},
    model::{Breakpoint, Model, ModelChange, Scope, Variable},
    session::Session,
};

/// Notifications for the front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    SessionChanged,
    ModelChanged,
    /// An adapter event, forwarded once the service has reacted to it.
    Event(Event),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContent {
    pub path: Option<String>,
    pub content: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluateOutcome {
    pub result: String,
    pub type_name: Option<String>,
    pub variables_reference: VariablesReference,
}

impl From<EvaluateResponse> for EvaluateOutcome {
    fn from(response: EvaluateResponse) -> Self {
        Self {
            result: response.result,
            type_name: response.type_name,
            variables_reference: response.variables_reference,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Inner {
    config: DebuggerConfig,
    notify_tx: mpsc::UnboundedSender<ServiceEvent>,
    model: Mutex<Arc<Model>>,
    session: Mutex<Option<Arc<Session>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    /// Task answering frame selection and variable expansion while paused.
    handlers: Mutex<Option<JoinHandle<()>>>,
    current_thread: Mutex<Option<ThreadId>>,
    /// Bumped on every `stopped` and `continued` event.
    execution_epoch: AtomicU64,
    identity: Mutex<Option<SourceIdentity>>,
    disposed: AtomicBool,
}

impl Inner {
    fn notify(&self, event: ServiceEvent) {
        if self.notify_tx.send(event).is_err() {
            tracing::trace!("nobody is listening to service notifications");
        }
    }

    fn abort_tasks(&self) {
        if let Some(task) = lock(&self.event_task).take() {
            task.abort();
        }
        if let Some(task) = lock(&self.handlers).take() {
            task.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.abort_tasks();
        if let Some(session) = lock(&self.session).take() {
            session.dispose();
        }
    }
}

/// Handle to the debugger of one kernel. Cheap to clone.
#[derive(Clone)]
pub struct DebugService {
    inner: Arc<Inner>,
}

impl DebugService {
    pub fn new(
        model: Arc<Model>,
        notify_tx: mpsc::UnboundedSender<ServiceEvent>,
        config: DebuggerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                notify_tx,
                model: Mutex::new(model),
                session: Mutex::new(None),
                event_task: Mutex::new(None),
                handlers: Mutex::new(None),
                current_thread: Mutex::new(None),
                execution_epoch: AtomicU64::new(0),
                identity: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        lock(&self.inner.session).clone()
    }

    /// Replace the session. The previous one is disposed and its events are
    /// no longer handled before the new one is listened to.
    pub fn set_session(&self, session: Option<Arc<Session>>) {
        let previous = {
            let mut current = lock(&self.inner.session);
            let same = match (current.as_ref(), session.as_ref()) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if same {
                return;
            }
            std::mem::replace(&mut *current, session.clone())
        };

        self.inner.abort_tasks();
        if let Some(previous) = previous {
            tracing::debug!("disposing previous session");
            previous.dispose();
        }

        if let Some(session) = session {
            let task = self.spawn_event_task(session);
            *lock(&self.inner.event_task) = Some(task);
        }
        self.inner.notify(ServiceEvent::SessionChanged);
    }

    pub fn model(&self) -> Arc<Model> {
        Arc::clone(&lock(&self.inner.model))
    }

    /// Replace the model. Frame and variable handlers reconnect to the new
    /// model on the next stop.
    pub fn set_model(&self, model: Arc<Model>) {
        *lock(&self.inner.model) = model;
        self.disconnect_handlers();
        self.inner.notify(ServiceEvent::ModelChanged);
    }

    pub fn is_started(&self) -> bool {
        self.session().is_some_and(|s| s.is_started())
    }

    pub fn has_stopped_threads(&self) -> bool {
        self.model().has_stopped_threads()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Drop the session and stop reacting to events. Calling this more than
    /// once is harmless.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("disposing debug service");
        self.set_session(None);
    }

    /// Thread that execution requests apply to.
    pub fn current_thread_id(&self) -> ThreadId {
        lock(&self.inner.current_thread).unwrap_or(self.inner.config.default_thread_id)
    }

    fn set_current_thread(&self, thread_id: ThreadId) {
        *lock(&self.inner.current_thread) = Some(thread_id);
    }

    fn require_session(&self) -> eyre::Result<Arc<Session>> {
        self.session()
            .ok_or_else(|| eyre::eyre!("no debug session"))
    }

    /// Start the debugger. Must not already be started.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> eyre::Result<()> {
        let session = self.require_session()?;
        debug_assert!(!session.is_started(), "debugger already started");
        if session.is_started() {
            eyre::bail!("debugger already started");
        }
        session.start().await.wrap_err("starting debugger")?;
        Ok(())
    }

    /// Stop the debugger and forget everything about the paused program.
    /// Must be started.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) -> eyre::Result<()> {
        let session = self.require_session()?;
        debug_assert!(session.is_started(), "debugger not started");
        if !session.is_started() {
            eyre::bail!("debugger not started");
        }
        let stopped = session.stop().await;

        // the session counts as stopped even if the kernel never answered
        let model = self.model();
        model.set_stopped_threads([]);
        model.breakpoints.restore_breakpoints(HashMap::new());
        model.clear_frames();
        stopped.wrap_err("stopping debugger")
    }

    /// Stop and start again, keeping the breakpoints.
    #[tracing::instrument(skip(self))]
    pub async fn restart(&self) -> eyre::Result<()> {
        let breakpoints = self.model().breakpoints.breakpoints();
        self.stop().await?;
        self.start().await?;

        // cells are already known to the kernel, only the breakpoints are lost
        let session = self.require_session()?;
        for (path, bps) in &breakpoints {
            let lines = bps.iter().map(|bp| SourceBreakpoint { line: bp.line }).collect();
            let reply = session
                .request::<requests::SetBreakpoints>(SetBreakpointsArguments::new(path, lines))
                .await
                .wrap_err_with(|| format!("restoring breakpoints of {path}"))?;
            if let Reply::Failure { message, .. } = reply {
                tracing::warn!(%path, %message, "kernel refused breakpoints");
            }
        }
        self.model().breakpoints.restore_breakpoints(breakpoints);
        Ok(())
    }

    /// Pick up the state the kernel kept for this notebook: hashing
    /// parameters, breakpoints and paused threads.
    #[tracing::instrument(skip(self))]
    pub async fn restore_state(&self, auto_start: bool) -> eyre::Result<()> {
        let Some(session) = self.session() else {
            return Ok(());
        };
        let info = session
            .restore_state()
            .await
            .wrap_err("restoring debugger state")?;

        let identity = SourceIdentity::new(
            &info.hash_method,
            info.hash_seed,
            info.tmp_file_prefix.as_str(),
            info.tmp_file_suffix.as_str(),
        )?;
        *lock(&self.inner.identity) = Some(identity);

        let breakpoints: HashMap<String, Vec<Breakpoint>> = info
            .breakpoints
            .iter()
            .map(|source| {
                let bps = source
                    .breakpoints
                    .iter()
                    .filter_map(|bp| {
                        bp.line
                            .map(|line| Breakpoint::from_kernel(&source.source, line, bp))
                    })
                    .collect();
                (source.source.clone(), bps)
            })
            .collect();

        let model = self.model();
        model.set_stopped_threads(info.stopped_threads.iter().copied());
        let paused = !info.stopped_threads.is_empty();

        if !self.is_started() && (auto_start || paused) {
            self.start().await?;
        }

        model.breakpoints.restore_breakpoints(breakpoints);
        if paused {
            let current = *lock(&self.inner.current_thread);
            if current.is_none_or(|t| !info.stopped_threads.contains(&t)) {
                self.set_current_thread(info.stopped_threads[0]);
            }
            self.connect_handlers(&session);
            self.refresh(&session).await?;
        } else {
            model.clear_frames();
            self.disconnect_handlers();
        }
        Ok(())
    }

    /// Resume the current thread.
    ///
    /// The thread leaves StoppedThreads before the request is sent. It is
    /// put back only if the kernel refuses and no `stopped` or `continued`
    /// event arrived in the meantime.
    #[tracing::instrument(skip(self))]
    pub async fn continue_(&self) {
        let thread_id = self.current_thread_id();
        let model = self.model();
        let was_stopped = model.stopped_threads().contains(&thread_id);
        let epoch = self.inner.execution_epoch.load(Ordering::SeqCst);
        model.remove_stopped_thread(thread_id);

        let accepted = self
            .execution_request::<requests::Continue>(thread_id)
            .await;
        if !accepted
            && was_stopped
            && self.inner.execution_epoch.load(Ordering::SeqCst) == epoch
        {
            model.add_stopped_thread(thread_id);
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn next(&self) {
        self.execution_request::<requests::Next>(self.current_thread_id())
            .await;
    }

    #[tracing::instrument(skip(self))]
    pub async fn step_in(&self) {
        self.execution_request::<requests::StepIn>(self.current_thread_id())
            .await;
    }

    #[tracing::instrument(skip(self))]
    pub async fn step_out(&self) {
        self.execution_request::<requests::StepOut>(self.current_thread_id())
            .await;
    }

    /// Send an execution control request. Returns whether the kernel
    /// accepted it.
    async fn execution_request<C>(&self, thread_id: ThreadId) -> bool
    where
        C: Command<Arguments = ThreadArguments>,
    {
        let Some(session) = self.session() else {
            tracing::warn!(command = C::COMMAND, "no debug session");
            return false;
        };
        match session.request::<C>(ThreadArguments { thread_id }).await {
            Ok(Reply::Success(_)) => true,
            Ok(Reply::Failure { message, .. }) => {
                tracing::error!(command = C::COMMAND, thread_id, %message, "request failed");
                false
            }
            Err(e) => {
                tracing::error!(command = C::COMMAND, thread_id, error = %e, "request not answered");
                false
            }
        }
    }

    /// Replace the breakpoints of a cell. Without a `path` the cell is
    /// registered with the kernel first.
    ///
    /// Returns the breakpoints the kernel accepted.
    #[tracing::instrument(skip(self, code))]
    pub async fn update_breakpoints(
        &self,
        code: &str,
        breakpoints: &[SourceBreakpoint],
        path: Option<&str>,
    ) -> eyre::Result<Vec<Breakpoint>> {
        let Some(session) = self.session().filter(|s| s.is_started()) else {
            return Ok(Vec::new());
        };
        let path = match path {
            Some(path) => path.to_string(),
            None => self.dump_cell(code).await?.source_path,
        };

        let reply = session
            .request::<requests::SetBreakpoints>(SetBreakpointsArguments::new(
                &path,
                breakpoints.to_vec(),
            ))
            .await?
            .into_result()?;

        let accepted = reply
            .breakpoints
            .iter()
            .enumerate()
            .filter_map(|(i, bp)| {
                let line = bp.line.or_else(|| breakpoints.get(i).map(|b| b.line))?;
                Some(Breakpoint::from_kernel(&path, line, bp))
            })
            .collect();
        let model = self.model();
        model.breakpoints.set_breakpoints(&path, accepted);

        if let Reply::Failure { message, .. } = session
            .request::<requests::ConfigurationDone>(Empty {})
            .await?
        {
            tracing::warn!(%message, "configurationDone request failed");
        }
        Ok(model.breakpoints.get_breakpoints(&path))
    }

    /// Remove every breakpoint of every cell. Completes once the kernel has
    /// answered every clear.
    #[tracing::instrument(skip(self))]
    pub async fn clear_breakpoints(&self) -> eyre::Result<()> {
        let Some(session) = self.session().filter(|s| s.is_started()) else {
            return Ok(());
        };
        let model = self.model();

        if !session.is_disposed() {
            let paths: Vec<String> = model.breakpoints.breakpoints().into_keys().collect();
            let clears = paths.iter().map(|path| {
                session.request::<requests::SetBreakpoints>(SetBreakpointsArguments::new(
                    path.as_str(),
                    Vec::new(),
                ))
            });
            let results = join_all(clears).await;
            for (path, result) in paths.iter().zip(results) {
                match result {
                    Ok(Reply::Success(_)) => {}
                    Ok(Reply::Failure { message, .. }) => {
                        tracing::warn!(%path, %message, "kernel refused to clear breakpoints");
                    }
                    Err(e) => tracing::warn!(%path, error = %e, "clearing breakpoints"),
                }
            }
        }

        model.breakpoints.restore_breakpoints(HashMap::new());
        Ok(())
    }

    /// Fetch the content of a source the kernel knows about.
    pub async fn get_source(&self, source: &Source) -> eyre::Result<SourceContent> {
        let session = self.require_session()?;
        let reply = session
            .request::<requests::LoadSource>(SourceArguments {
                source: source.clone(),
                source_reference: source.source_reference.unwrap_or(0),
            })
            .await?
            .into_result()?;
        Ok(SourceContent {
            path: source.path.clone(),
            content: reply.content,
            mime_type: reply.mime_type,
        })
    }

    /// Register a cell with the kernel.
    #[tracing::instrument(skip(self, code))]
    pub async fn dump_cell(&self, code: &str) -> eyre::Result<DumpCellResponse> {
        let session = self.require_session()?;
        let reply = session
            .request::<requests::DumpCell>(DumpCellArguments {
                code: code.to_string(),
            })
            .await?
            .into_result()?;
        Ok(reply)
    }

    /// Path the kernel uses for a cell with this code, without asking it.
    pub fn code_id(&self, code: &str) -> Result<String, HashError> {
        lock(&self.inner.identity)
            .as_ref()
            .map(|identity| identity.code_id(code))
            .ok_or(HashError::NotNegotiated)
    }

    /// Evaluate an expression in the selected frame.
    #[tracing::instrument(skip(self))]
    pub async fn evaluate(&self, expression: &str) -> eyre::Result<EvaluateOutcome> {
        let session = self.require_session()?;
        let frame_id = self.model().callstack.current_frame().map(|f| f.id);
        let reply = session
            .request::<requests::Evaluate>(EvaluateArguments {
                expression: expression.to_string(),
                frame_id,
                context: Some("repl".to_string()),
            })
            .await?
            .into_result()?;
        Ok(reply.into())
    }

    fn spawn_event_task(&self, session: Arc<Session>) -> JoinHandle<()> {
        let mut events = session.events();
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event handler fell behind");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("session event stream ended");
                        break;
                    }
                };
                let Some(service) = upgrade(&inner) else {
                    break;
                };
                service.handle_event(&session, event).await;
            }
        })
    }

    async fn handle_event(&self, session: &Arc<Session>, event: Event) {
        tracing::debug!(event = event.name(), "handling event");
        match &event {
            Event::Stopped(body) => {
                self.inner.execution_epoch.fetch_add(1, Ordering::SeqCst);
                let thread_id = body
                    .thread_id
                    .unwrap_or(self.inner.config.default_thread_id);
                self.set_current_thread(thread_id);
                self.model().add_stopped_thread(thread_id);
                self.connect_handlers(session);
                if let Err(e) = self.refresh(session).await {
                    tracing::warn!(error = %e, "refreshing paused program");
                }
            }
            Event::Continued(body) => {
                self.inner.execution_epoch.fetch_add(1, Ordering::SeqCst);
                let model = self.model();
                model.remove_stopped_thread(body.thread_id);
                model.clear_frames();
                self.disconnect_handlers();
            }
            Event::Thread(body) => self.set_current_thread(body.thread_id),
            _ => {}
        }
        self.inner.notify(ServiceEvent::Event(event));
    }

    /// Fetch the frames of the current thread, then the scopes and
    /// variables of the innermost frame.
    async fn refresh(&self, session: &Session) -> eyre::Result<()> {
        let thread_id = self.current_thread_id();
        let frames = session
            .request::<requests::StackTrace>(StackTraceArguments {
                thread_id,
                start_frame: None,
                levels: None,
            })
            .await?
            .into_result()?
            .stack_frames;

        let model = self.model();
        model.callstack.set_frames(frames);
        match model.callstack.current_frame() {
            Some(frame) => refresh_scopes(session, &model, frame.id).await,
            None => {
                model.variables.set_scopes(Vec::new());
                Ok(())
            }
        }
    }

    fn connect_handlers(&self, session: &Arc<Session>) {
        let mut handlers = lock(&self.inner.handlers);
        if handlers.is_some() {
            return;
        }

        let model = self.model();
        let mut changes = model.subscribe();
        let session = Arc::clone(session);
        *handlers = Some(tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "model handler fell behind");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let result = match change {
                    ModelChange::CurrentFrameChanged(frame_id) => {
                        refresh_scopes(&session, &model, frame_id).await
                    }
                    ModelChange::VariableExpanded(reference) => {
                        expand_variable(&session, &model, reference).await
                    }
                    _ => Ok(()),
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "updating variables");
                }
            }
        }));
    }

    fn disconnect_handlers(&self) {
        if let Some(task) = lock(&self.inner.handlers).take() {
            task.abort();
        }
    }
}

fn upgrade(inner: &Weak<Inner>) -> Option<DebugService> {
    inner.upgrade().map(|inner| DebugService { inner })
}

/// Fetch the scopes of a frame and the variables of its first scope.
async fn refresh_scopes(session: &Session, model: &Model, frame_id: StackFrameId) -> eyre::Result<()> {
    let scopes = session
        .request::<requests::Scopes>(ScopesArguments { frame_id })
        .await?
        .into_result()?
        .scopes;

    let variables = match scopes.first() {
        Some(scope) => {
            session
                .request::<requests::Variables>(VariablesArguments {
                    variables_reference: scope.variables_reference,
                })
                .await?
                .into_result()?
                .variables
        }
        None => Vec::new(),
    };

    model.variables.set_scopes(convert_scopes(&scopes, &variables));
    Ok(())
}

async fn expand_variable(
    session: &Session,
    model: &Model,
    reference: VariablesReference,
) -> eyre::Result<()> {
    let children = session
        .request::<requests::Variables>(VariablesArguments {
            variables_reference: reference,
        })
        .await?
        .into_result()?
        .variables;
    model.variables.set_children(reference, children);
    Ok(())
}

/// Pair every scope with the variables fetched for the first one.
fn convert_scopes(scopes: &[types::Scope], variables: &[types::Variable]) -> Vec<Scope> {
    scopes
        .iter()
        .map(|scope| Scope {
            name: scope.name.clone(),
            variables: variables.iter().cloned().map(Variable::from).collect(),
        })
        .collect()
}
