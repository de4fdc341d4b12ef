//! Bodies of successful replies, and decoding of a raw [`Response`].
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Response;
use crate::requests::Command;
use crate::types::{Breakpoint, Scope, StackFrame, ThreadId, Variable, VariablesReference};

/// Outcome of a request that reached the adapter and got an answer.
///
/// A failed reply is a normal outcome: the adapter understood the request
/// and declined it, e.g. because no thread is stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Success(T),
    Failure { command: String, message: String },
}

impl<T> Reply<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Reply::Success(body) => Some(body),
            Reply::Failure { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success(_))
    }

    /// Turn a declined request into an error for callers that cannot
    /// continue without the body.
    pub fn into_result(self) -> Result<T, RequestFailed> {
        match self {
            Reply::Success(body) => Ok(body),
            Reply::Failure { command, message } => Err(RequestFailed { command, message }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{command} request failed: {message}")]
pub struct RequestFailed {
    pub command: String,
    pub message: String,
}

/// Decode a raw reply into the body type of command `C`.
pub fn decode<C: Command>(response: Response) -> Result<Reply<C::Body>, serde_json::Error> {
    if !response.success {
        let message = response.failure_message();
        return Ok(Reply::Failure {
            command: response.command,
            message,
        });
    }

    let body = response
        .body
        .unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(body).map(Reply::Success)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_configuration_done_request: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_conditional_breakpoints: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_evaluate_for_hovers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_loaded_sources_request: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_set_variable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_terminate_request: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_step_in_targets_request: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpCellResponse {
    pub source_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBreakpointsResponse {
    #[serde(default)]
    pub breakpoints: Vec<Breakpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponse {
    #[serde(default)]
    pub stack_frames: Vec<StackFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopesResponse {
    #[serde(default)]
    pub scopes: Vec<Scope>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariablesResponse {
    #[serde(default)]
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_threads_continued: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    pub result: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: VariablesReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfoResponse {
    pub is_started: bool,
    pub hash_method: String,
    pub hash_seed: u32,
    pub tmp_file_prefix: String,
    pub tmp_file_suffix: String,
    #[serde(default)]
    pub breakpoints: Vec<SourceBreakpoints>,
    #[serde(default)]
    pub stopped_threads: Vec<ThreadId>,
}

/// Breakpoints the kernel holds for one source path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBreakpoints {
    pub source: String,
    #[serde(default)]
    pub breakpoints: Vec<Breakpoint>,
}
