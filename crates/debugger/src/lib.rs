//! Debug Adapter Protocol client for kernels that debug notebook cells.
//!
//! The layers, from the wire up:
//!
//! * [`Correlator`] matches replies to requests over one connection and
//!   broadcasts events.
//! * [`Session`] drives the lifecycle of one connection: initialize and
//!   attach, disconnect, and restoring state kept by the kernel.
//! * [`DebugService`] reacts to events by keeping a shared [`Model`] up to
//!   date and offers the operations a front-end needs.
//!
//! Cells are addressed by the path the kernel stores them under, see
//! [`SourceIdentity`].

mod config;
mod correlator;
mod hash;
mod model;
mod pending_requests;
mod service;
mod session;

pub use config::{ConfigError, DebuggerConfig};
pub use correlator::{Correlator, TransportError};
pub use hash::{HashError, HashMethod, SourceIdentity, murmur2};
pub use model::{
    Breakpoint, BreakpointsModel, CallstackModel, Model, ModelChange, Scope, Variable,
    VariablesModel,
};
pub use service::{DebugService, EvaluateOutcome, ServiceEvent, SourceContent};
pub use session::{Session, SessionError};

// re-export
pub use transport::events::Event;
