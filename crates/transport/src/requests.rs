//! Requests understood by kernel debug adapters.
//!
//! Every command is a marker type implementing [`Command`], tying the wire
//! command name to its argument type and to the body of a successful reply.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::responses;
use crate::types::{self, SourceBreakpoint, StackFrameId, ThreadId, VariablesReference};

pub trait Command {
    const COMMAND: &'static str;
    type Arguments: Serialize;
    type Body: DeserializeOwned;
}

/// Arguments or body with no fields, encoded as `{}`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Empty {}

macro_rules! command {
    ($(#[$meta:meta])* $name:ident, $command:literal, $arguments:ty, $body:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub enum $name {}

        impl Command for $name {
            const COMMAND: &'static str = $command;
            type Arguments = $arguments;
            type Body = $body;
        }
    };
}

command!(Initialize, "initialize", InitializeArguments, responses::Capabilities);
command!(Attach, "attach", Empty, Empty);
command!(Disconnect, "disconnect", DisconnectArguments, Empty);
command!(
    /// Register a code cell with the kernel and learn its source path.
    DumpCell,
    "dumpCell",
    DumpCellArguments,
    responses::DumpCellResponse
);
command!(
    /// Replace every breakpoint of one source with the given set.
    SetBreakpoints,
    "setBreakpoints",
    SetBreakpointsArguments,
    responses::SetBreakpointsResponse
);
command!(ConfigurationDone, "configurationDone", Empty, Empty);
command!(
    StackTrace,
    "stackTrace",
    StackTraceArguments,
    responses::StackTraceResponse
);
command!(Scopes, "scopes", ScopesArguments, responses::ScopesResponse);
command!(
    Variables,
    "variables",
    VariablesArguments,
    responses::VariablesResponse
);
command!(Continue, "continue", ThreadArguments, responses::ContinueResponse);
command!(Next, "next", ThreadArguments, Empty);
command!(StepIn, "stepIn", ThreadArguments, Empty);
command!(StepOut, "stepOut", ThreadArguments, Empty);
command!(
    LoadSource,
    "source",
    SourceArguments,
    responses::SourceResponse
);
command!(
    Evaluate,
    "evaluate",
    EvaluateArguments,
    responses::EvaluateResponse
);
command!(
    /// State the kernel retains across front-end restarts.
    DebugInfo,
    "debugInfo",
    Empty,
    responses::DebugInfoResponse
);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_name: String,
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    pub path_format: String,
    pub lines_start_at1: bool,
    pub columns_start_at1: bool,
    pub supports_variable_type: bool,
    pub supports_variable_paging: bool,
    pub supports_run_in_terminal_request: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    pub restart: bool,
    pub terminate_debuggee: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DumpCellArguments {
    pub code: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: types::Source,
    pub breakpoints: Vec<SourceBreakpoint>,
    pub source_modified: bool,
}

impl SetBreakpointsArguments {
    pub fn new(path: impl Into<String>, breakpoints: Vec<SourceBreakpoint>) -> Self {
        Self {
            source: types::Source::from_path(path),
            breakpoints,
            source_modified: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: ThreadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_frame: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub levels: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: StackFrameId,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: VariablesReference,
}

/// Arguments of the execution control requests.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArguments {
    pub thread_id: ThreadId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceArguments {
    pub source: types::Source,
    pub source_reference: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<StackFrameId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}
