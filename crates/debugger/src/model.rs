//! Client side view of the program being debugged.
//!
//! The [`Model`] is shared between the service, which writes kernel state
//! into it, and a front-end, which reads it and reacts to [`ModelChange`]
//! notifications. Front-ends drive navigation by calling
//! [`CallstackModel::set_current_frame`] and
//! [`VariablesModel::expand_variable`]; the service answers those by
//! fetching the data from the kernel.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::broadcast;
use transport::types::{self, BreakpointId, StackFrame, StackFrameId, ThreadId, VariablesReference};

const CHANGE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelChange {
    BreakpointsChanged,
    FramesChanged,
    /// The user picked another frame.
    CurrentFrameChanged(StackFrameId),
    ScopesChanged,
    /// The user asked to see the children of a variable.
    VariableExpanded(VariablesReference),
    StoppedThreadsChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: Option<BreakpointId>,
    pub line: i64,
    pub active: bool,
    pub verified: bool,
    pub source_path: String,
}

impl Breakpoint {
    /// Adopt a breakpoint reported by the kernel for `source_path`.
    pub fn from_kernel(source_path: &str, line: i64, breakpoint: &types::Breakpoint) -> Self {
        Self {
            id: breakpoint.id,
            line,
            active: true,
            verified: breakpoint.verified,
            source_path: source_path.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub name: String,
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub variable: types::Variable,
    pub expanded: bool,
    pub children: Vec<Variable>,
}

impl From<types::Variable> for Variable {
    fn from(variable: types::Variable) -> Self {
        Self {
            variable,
            expanded: false,
            children: Vec::new(),
        }
    }
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.variable.name
    }

    pub fn value(&self) -> &str {
        &self.variable.value
    }

    pub fn type_name(&self) -> Option<&str> {
        self.variable.type_name.as_deref()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Clone)]
struct Notifier(broadcast::Sender<ModelChange>);

impl Notifier {
    fn emit(&self, change: ModelChange) {
        tracing::trace!(?change, "model changed");
        let _ = self.0.send(change);
    }
}

pub struct BreakpointsModel {
    breakpoints: Mutex<HashMap<String, Vec<Breakpoint>>>,
    notifier: Notifier,
}

impl BreakpointsModel {
    /// Replace the breakpoints of one source. Later duplicates of a line are
    /// dropped.
    pub fn set_breakpoints(&self, path: &str, breakpoints: Vec<Breakpoint>) {
        lock(&self.breakpoints).insert(path.to_string(), dedup_lines(breakpoints));
        self.notifier.emit(ModelChange::BreakpointsChanged);
    }

    /// Replace every breakpoint of every source.
    pub fn restore_breakpoints(&self, breakpoints: HashMap<String, Vec<Breakpoint>>) {
        let breakpoints = breakpoints
            .into_iter()
            .map(|(path, bps)| (path, dedup_lines(bps)))
            .collect();
        *lock(&self.breakpoints) = breakpoints;
        self.notifier.emit(ModelChange::BreakpointsChanged);
    }

    pub fn breakpoints(&self) -> HashMap<String, Vec<Breakpoint>> {
        lock(&self.breakpoints).clone()
    }

    pub fn get_breakpoints(&self, path: &str) -> Vec<Breakpoint> {
        lock(&self.breakpoints)
            .get(path)
            .cloned()
            .unwrap_or_default()
    }
}

fn dedup_lines(breakpoints: Vec<Breakpoint>) -> Vec<Breakpoint> {
    let mut seen = BTreeSet::new();
    breakpoints
        .into_iter()
        .filter(|bp| seen.insert(bp.line))
        .collect()
}

#[derive(Default)]
struct Callstack {
    frames: Vec<StackFrame>,
    current: Option<StackFrameId>,
}

pub struct CallstackModel {
    state: Mutex<Callstack>,
    notifier: Notifier,
}

impl CallstackModel {
    /// Install the frames of a stopped thread, innermost first. The
    /// innermost frame becomes current without a
    /// [`ModelChange::CurrentFrameChanged`] notification.
    pub fn set_frames(&self, frames: Vec<StackFrame>) {
        {
            let mut state = lock(&self.state);
            state.current = frames.first().map(|f| f.id);
            state.frames = frames;
        }
        self.notifier.emit(ModelChange::FramesChanged);
    }

    pub fn frames(&self) -> Vec<StackFrame> {
        lock(&self.state).frames.clone()
    }

    pub fn current_frame(&self) -> Option<StackFrame> {
        let state = lock(&self.state);
        let current = state.current?;
        state.frames.iter().find(|f| f.id == current).cloned()
    }

    /// Select a frame on behalf of the user.
    ///
    /// Returns `false` if no frame has this id.
    pub fn set_current_frame(&self, frame_id: StackFrameId) -> bool {
        {
            let mut state = lock(&self.state);
            if !state.frames.iter().any(|f| f.id == frame_id) {
                return false;
            }
            state.current = Some(frame_id);
        }
        self.notifier.emit(ModelChange::CurrentFrameChanged(frame_id));
        true
    }
}

pub struct VariablesModel {
    scopes: Mutex<Arc<Vec<Scope>>>,
    notifier: Notifier,
}

impl VariablesModel {
    /// Install a new scope sequence.
    pub fn set_scopes(&self, scopes: Vec<Scope>) {
        *lock(&self.scopes) = Arc::new(scopes);
        self.notifier.emit(ModelChange::ScopesChanged);
    }

    /// Current scopes. A new `Arc` is installed on every change, so
    /// comparing with [`Arc::ptr_eq`] tells whether anything changed.
    pub fn scopes(&self) -> Arc<Vec<Scope>> {
        Arc::clone(&lock(&self.scopes))
    }

    /// Ask for the children of the variable with this reference.
    pub fn expand_variable(&self, reference: VariablesReference) {
        if reference == 0 {
            return;
        }
        self.notifier.emit(ModelChange::VariableExpanded(reference));
    }

    /// Attach fetched children to every variable with this reference and
    /// mark it expanded.
    pub(crate) fn set_children(&self, reference: VariablesReference, children: Vec<types::Variable>) {
        let children: Vec<Variable> = children.into_iter().map(Variable::from).collect();
        {
            let mut scopes = lock(&self.scopes);
            let mut updated = scopes.as_ref().clone();
            for scope in &mut updated {
                attach_children(&mut scope.variables, reference, &children);
            }
            *scopes = Arc::new(updated);
        }
        self.notifier.emit(ModelChange::ScopesChanged);
    }
}

fn attach_children(variables: &mut [Variable], reference: VariablesReference, children: &[Variable]) {
    for variable in variables {
        if variable.variable.variables_reference == reference {
            variable.expanded = true;
            variable.children = children.to_vec();
        } else {
            attach_children(&mut variable.children, reference, children);
        }
    }
}

pub struct Model {
    pub breakpoints: BreakpointsModel,
    pub callstack: CallstackModel,
    pub variables: VariablesModel,
    stopped_threads: Mutex<BTreeSet<ThreadId>>,
    notifier: Notifier,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CAPACITY);
        let notifier = Notifier(tx);
        Self {
            breakpoints: BreakpointsModel {
                breakpoints: Mutex::default(),
                notifier: notifier.clone(),
            },
            callstack: CallstackModel {
                state: Mutex::default(),
                notifier: notifier.clone(),
            },
            variables: VariablesModel {
                scopes: Mutex::default(),
                notifier: notifier.clone(),
            },
            stopped_threads: Mutex::default(),
            notifier,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelChange> {
        self.notifier.0.subscribe()
    }

    pub fn stopped_threads(&self) -> BTreeSet<ThreadId> {
        lock(&self.stopped_threads).clone()
    }

    pub fn has_stopped_threads(&self) -> bool {
        !lock(&self.stopped_threads).is_empty()
    }

    pub fn add_stopped_thread(&self, thread_id: ThreadId) {
        lock(&self.stopped_threads).insert(thread_id);
        self.notifier.emit(ModelChange::StoppedThreadsChanged);
    }

    pub fn remove_stopped_thread(&self, thread_id: ThreadId) {
        lock(&self.stopped_threads).remove(&thread_id);
        self.notifier.emit(ModelChange::StoppedThreadsChanged);
    }

    pub fn set_stopped_threads(&self, threads: impl IntoIterator<Item = ThreadId>) {
        *lock(&self.stopped_threads) = threads.into_iter().collect();
        self.notifier.emit(ModelChange::StoppedThreadsChanged);
    }

    /// Forget frames and scopes, e.g. once execution resumes.
    pub fn clear_frames(&self) {
        self.callstack.set_frames(Vec::new());
        self.variables.set_scopes(Vec::new());
    }
}
