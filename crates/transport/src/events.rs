//! Events emitted by a kernel debug adapter
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message;
use crate::types::{Breakpoint, BreakpointId, Source, ThreadId};

/// Unsolicited adapter message, decoded by event name.
///
/// Names the client does not model, and known names whose body does not
/// match the expected shape, are kept verbatim as [`Event::Other`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Initialized,
    Stopped(StoppedEventBody),
    Continued(ContinuedEventBody),
    Thread(ThreadEventBody),
    Output(OutputEventBody),
    Process(ProcessEventBody),
    Breakpoint(BreakpointEventBody),
    Exited(ExitedEventBody),
    Terminated,
    Other { event: String, body: Option<Value> },
}

impl Event {
    pub fn name(&self) -> &str {
        match self {
            Event::Initialized => "initialized",
            Event::Stopped(_) => "stopped",
            Event::Continued(_) => "continued",
            Event::Thread(_) => "thread",
            Event::Output(_) => "output",
            Event::Process(_) => "process",
            Event::Breakpoint(_) => "breakpoint",
            Event::Exited(_) => "exited",
            Event::Terminated => "terminated",
            Event::Other { event, .. } => event,
        }
    }
}

impl From<message::Event> for Event {
    fn from(raw: message::Event) -> Self {
        fn body<T: serde::de::DeserializeOwned>(raw: &message::Event) -> serde_json::Result<T> {
            serde_json::from_value(raw.body.clone().unwrap_or(Value::Null))
        }

        let decoded = match raw.event.as_str() {
            "initialized" => Ok(Event::Initialized),
            "terminated" => Ok(Event::Terminated),
            "stopped" => body(&raw).map(Event::Stopped),
            "continued" => body(&raw).map(Event::Continued),
            "thread" => body(&raw).map(Event::Thread),
            "output" => body(&raw).map(Event::Output),
            "process" => body(&raw).map(Event::Process),
            "breakpoint" => body(&raw).map(Event::Breakpoint),
            "exited" => body(&raw).map(Event::Exited),
            _ => {
                return Event::Other {
                    event: raw.event,
                    body: raw.body,
                };
            }
        };

        decoded.unwrap_or_else(|error| {
            tracing::warn!(event = %raw.event, %error, "event body does not match its schema");
            Event::Other {
                event: raw.event,
                body: raw.body,
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub all_threads_stopped: Option<bool>,
    #[serde(default)]
    pub hit_breakpoint_ids: Option<Vec<BreakpointId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuedEventBody {
    pub thread_id: ThreadId,
    #[serde(default)]
    pub all_threads_continued: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEventBody {
    pub reason: String,
    pub thread_id: ThreadId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEventBody {
    #[serde(default)]
    pub category: Option<String>,
    pub output: String,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub line: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEventBody {
    pub name: String,
    #[serde(default)]
    pub system_process_id: Option<i64>,
    #[serde(default)]
    pub start_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointEventBody {
    pub reason: String,
    pub breakpoint: Breakpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEventBody {
    pub exit_code: i64,
}
