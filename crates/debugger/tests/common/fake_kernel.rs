//! A kernel double that behaves like a debug-enabled notebook kernel.
//!
//! It names cells by hashing their code, keeps breakpoints across
//! disconnects, reports its state through `debugInfo`, and runs cells with
//! a tiny line interpreter so that stops, stack frames and variables are
//! real.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use transport::{
    Message, OutgoingMessage, RawEvent, Request, Response, split, testing::MemoryTransport,
};

pub const HASH_SEED: u32 = 3339675911;
const THREAD_ID: i64 = 1;
const FRAME_ID: i64 = 1;
const LOCALS: i64 = 1;
const GLOBALS: i64 = 2;
/// Lists get references from here on, one per variable.
const LIST_REFERENCES: i64 = 1000;

#[derive(Clone)]
pub struct FakeKernel {
    state: Arc<Mutex<KernelState>>,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(KernelState {
                prefix: format!("/tmp/ipykernel_{}/", std::process::id()),
                suffix: ".py".to_string(),
                seq: 1,
                started: false,
                cells: HashMap::new(),
                breakpoints: BTreeMap::new(),
                next_breakpoint_id: 1,
                stopped_threads: BTreeSet::new(),
                execution: None,
                attached: None,
                received: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().unwrap()
    }

    /// Open a new front-end connection to the kernel.
    pub fn connect(&self) -> MemoryTransport {
        let (client, adapter) = MemoryTransport::pair();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutgoingMessage>();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let (mut reader, mut writer) = split(adapter);
            loop {
                tokio::select! {
                    msg = reader.next() => match msg {
                        Some(Ok(Message::Request(request))) => {
                            state.lock().unwrap().handle(request, &out_tx);
                        }
                        Some(Ok(other)) => tracing::warn!(?other, "kernel ignoring message"),
                        Some(Err(_)) | None => break,
                    },
                    Some(out) = out_rx.recv() => {
                        if writer.send(out).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        client
    }

    /// Run a cell, as if the user executed it in the notebook. Returns the
    /// path the cell is stored under.
    pub fn execute(&self, code: &str) -> String {
        let mut state = self.state();
        let path = state.code_id(code);
        state.cells.insert(path.clone(), code.to_string());
        assert!(state.execution.is_none(), "a cell is already running");
        state.execution = Some(Execution {
            path: path.clone(),
            lines: code.lines().map(str::to_string).collect(),
            pc: 0,
            vars: BTreeMap::new(),
        });
        state.advance(false, false);
        path
    }

    pub fn code_id(&self, code: &str) -> String {
        self.state().code_id(code)
    }

    pub fn is_running(&self) -> bool {
        self.state().execution.is_some()
    }

    /// Commands received so far, in order.
    pub fn received(&self) -> Vec<String> {
        self.state().received.clone()
    }

    /// Lines the kernel holds breakpoints on for `path`.
    pub fn breakpoint_lines(&self, path: &str) -> Vec<i64> {
        self.state().breakpoint_lines(path).into_iter().collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
enum PyValue {
    Int(i64),
    List(Vec<i64>),
}

impl PyValue {
    fn display(&self) -> String {
        match self {
            PyValue::Int(n) => n.to_string(),
            PyValue::List(items) => format!(
                "[{}]",
                items
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            PyValue::Int(_) => "int",
            PyValue::List(_) => "list",
        }
    }
}

struct Execution {
    path: String,
    lines: Vec<String>,
    /// Index of the next line to run.
    pc: usize,
    vars: BTreeMap<String, PyValue>,
}

struct KernelState {
    prefix: String,
    suffix: String,
    seq: i64,
    started: bool,
    cells: HashMap<String, String>,
    breakpoints: BTreeMap<String, Vec<Value>>,
    next_breakpoint_id: i64,
    stopped_threads: BTreeSet<i64>,
    execution: Option<Execution>,
    /// Connection that receives events.
    attached: Option<mpsc::UnboundedSender<OutgoingMessage>>,
    received: Vec<String>,
}

impl KernelState {
    fn code_id(&self, code: &str) -> String {
        format!(
            "{}{}{}",
            self.prefix,
            debugger::murmur2(code.as_bytes(), HASH_SEED),
            self.suffix
        )
    }

    fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn breakpoint_lines(&self, path: &str) -> BTreeSet<i64> {
        self.breakpoints
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(|bp| bp["line"].as_i64())
            .collect()
    }

    fn emit(&mut self, event: &str, body: Value) {
        let seq = self.next_seq();
        if let Some(tx) = &self.attached {
            let _ = tx.send(OutgoingMessage::Event(RawEvent {
                seq,
                event: event.to_string(),
                body: Some(body),
            }));
        }
    }

    fn handle(&mut self, request: Request, out: &mpsc::UnboundedSender<OutgoingMessage>) {
        self.received.push(request.command.clone());
        let args = request.arguments.clone().unwrap_or(Value::Null);

        // events caused by a request follow its reply
        let mut after: Option<Box<dyn FnOnce(&mut KernelState)>> = None;

        let result: Result<Value, String> = match request.command.as_str() {
            "initialize" => Ok(json!({
                "supportsConfigurationDoneRequest": true,
                "supportsEvaluateForHovers": true,
                "supportsSetVariable": true,
            })),
            "attach" => {
                self.started = true;
                self.attached = Some(out.clone());
                Ok(json!({}))
            }
            "disconnect" => {
                self.started = false;
                self.stopped_threads.clear();
                after = Some(Box::new(|k: &mut KernelState| {
                    // without a debugger the cell runs to completion
                    if k.execution.is_some() {
                        k.advance(true, false);
                    }
                    k.attached = None;
                }));
                Ok(json!({}))
            }
            "dumpCell" => {
                let code = args["code"].as_str().unwrap_or_default().to_string();
                let path = self.code_id(&code);
                self.cells.insert(path.clone(), code);
                Ok(json!({"sourcePath": path}))
            }
            "setBreakpoints" => {
                let path = args["source"]["path"].as_str().unwrap_or_default().to_string();
                let mut breakpoints = Vec::new();
                for bp in args["breakpoints"].as_array().into_iter().flatten() {
                    let id = self.next_breakpoint_id;
                    self.next_breakpoint_id += 1;
                    breakpoints.push(json!({
                        "id": id,
                        "verified": true,
                        "line": bp["line"],
                        "source": {"path": path},
                    }));
                }
                if breakpoints.is_empty() {
                    self.breakpoints.remove(&path);
                } else {
                    self.breakpoints.insert(path, breakpoints.clone());
                }
                Ok(json!({"breakpoints": breakpoints}))
            }
            "configurationDone" => Ok(json!({})),
            "debugInfo" => Ok(json!({
                "isStarted": self.started,
                "hashMethod": "Murmur2",
                "hashSeed": HASH_SEED,
                "tmpFilePrefix": self.prefix,
                "tmpFileSuffix": self.suffix,
                "breakpoints": self
                    .breakpoints
                    .iter()
                    .map(|(source, bps)| json!({"source": source, "breakpoints": bps}))
                    .collect::<Vec<_>>(),
                "stoppedThreads": self.stopped_threads.iter().collect::<Vec<_>>(),
            })),
            "stackTrace" => self.paused().map(|exec| {
                json!({
                    "stackFrames": [{
                        "id": FRAME_ID,
                        "name": "<module>",
                        "source": {"path": exec.path},
                        "line": exec.pc + 1,
                        "column": 1,
                    }],
                    "totalFrames": 1,
                })
            }),
            "scopes" => self.paused().map(|_| {
                json!({"scopes": [
                    {"name": "Locals", "variablesReference": LOCALS, "expensive": false},
                    {"name": "Globals", "variablesReference": GLOBALS, "expensive": false},
                ]})
            }),
            "variables" => {
                let reference = args["variablesReference"].as_i64().unwrap_or_default();
                self.paused()
                    .and_then(|exec| variables(&exec.vars, reference))
                    .map(|variables| json!({"variables": variables}))
            }
            "evaluate" => {
                let expression = args["expression"].as_str().unwrap_or_default();
                self.paused()
                    .and_then(|exec| eval(expression, &exec.vars))
                    .map(|value| {
                        json!({
                            "result": value.display(),
                            "type": value.type_name(),
                            "variablesReference": 0,
                        })
                    })
            }
            "source" => {
                let path = args["source"]["path"].as_str().unwrap_or_default();
                self.cells
                    .get(path)
                    .map(|code| json!({"content": code, "mimeType": "text/x-python"}))
                    .ok_or_else(|| format!("no source for {path}"))
            }
            "continue" | "next" | "stepIn" | "stepOut" => {
                if self.stopped_threads.remove(&THREAD_ID) {
                    let step = request.command != "continue";
                    after = Some(Box::new(move |k: &mut KernelState| {
                        k.emit(
                            "continued",
                            json!({"threadId": THREAD_ID, "allThreadsContinued": true}),
                        );
                        k.advance(true, step);
                    }));
                    Ok(json!({"allThreadsContinued": true}))
                } else {
                    Err("thread is not paused".to_string())
                }
            }
            other => Err(format!("unsupported request {other}")),
        };

        let seq = self.next_seq();
        let (success, message, body) = match result {
            Ok(body) => (true, None, Some(body)),
            Err(message) => (false, Some(message), None),
        };
        let _ = out.send(OutgoingMessage::Response(Response {
            seq,
            request_seq: request.seq,
            success,
            command: request.command,
            message,
            body,
        }));

        if let Some(after) = after {
            after(self);
        }
    }

    fn paused(&self) -> Result<&Execution, String> {
        match &self.execution {
            Some(exec) if self.stopped_threads.contains(&THREAD_ID) => Ok(exec),
            _ => Err("thread is not paused".to_string()),
        }
    }

    /// Run lines until a breakpoint, the end of a step, or the end of the
    /// cell. With `resume` the line execution is paused at runs first.
    fn advance(&mut self, resume: bool, step: bool) {
        let mut run_current = resume;
        loop {
            let Some(exec) = &self.execution else {
                return;
            };
            if exec.pc >= exec.lines.len() {
                self.execution = None;
                return;
            }
            if !run_current {
                let line = exec.pc as i64 + 1;
                let reason = if step && resume {
                    Some("step")
                } else if self.started && self.breakpoint_lines(&exec.path).contains(&line) {
                    Some("breakpoint")
                } else {
                    None
                };
                if let Some(reason) = reason {
                    if self.started {
                        self.stopped_threads.insert(THREAD_ID);
                        self.emit(
                            "stopped",
                            json!({"reason": reason, "threadId": THREAD_ID, "allThreadsStopped": true}),
                        );
                        return;
                    }
                }
            }
            run_current = false;

            let Some(exec) = self.execution.as_mut() else {
                return;
            };
            let line = exec.lines[exec.pc].clone();
            exec.pc += 1;
            if let Some(output) = run_line(&line, &mut exec.vars) {
                self.emit("output", json!({"category": "stdout", "output": output}));
            }
        }
    }
}

fn variables(vars: &BTreeMap<String, PyValue>, reference: i64) -> Result<Vec<Value>, String> {
    match reference {
        LOCALS | GLOBALS => Ok(vars
            .iter()
            .enumerate()
            .map(|(i, (name, value))| {
                let reference = match value {
                    PyValue::List(_) => LIST_REFERENCES + i as i64,
                    PyValue::Int(_) => 0,
                };
                json!({
                    "name": name,
                    "value": value.display(),
                    "type": value.type_name(),
                    "evaluateName": name,
                    "variablesReference": reference,
                })
            })
            .collect()),
        r if r >= LIST_REFERENCES => match vars.values().nth((r - LIST_REFERENCES) as usize) {
            Some(PyValue::List(items)) => Ok(items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    json!({
                        "name": i.to_string(),
                        "value": item.to_string(),
                        "type": "int",
                        "variablesReference": 0,
                    })
                })
                .collect()),
            _ => Err(format!("unknown variables reference {r}")),
        },
        r => Err(format!("unknown variables reference {r}")),
    }
}

/// Run one statement, returning anything it printed.
fn run_line(line: &str, vars: &mut BTreeMap<String, PyValue>) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if let Some(args) = line
        .strip_prefix("print(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let values: Vec<String> = args
            .split(',')
            .filter_map(|arg| eval(arg, vars).ok())
            .map(|v| v.display())
            .collect();
        return Some(format!("{}\n", values.join(" ")));
    }
    if let Some((name, expr)) = line.split_once("+=") {
        let name = name.trim().to_string();
        let rhs = eval(expr, vars).ok()?;
        let lhs = vars.get(&name).cloned()?;
        if let (PyValue::Int(a), PyValue::Int(b)) = (lhs, rhs) {
            vars.insert(name, PyValue::Int(a + b));
        }
        return None;
    }
    if let Some((name, expr)) = line.split_once('=') {
        if let Ok(value) = eval(expr, vars) {
            vars.insert(name.trim().to_string(), value);
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Name(String),
    Op(&'static str),
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            tokens.push(Token::Int(digits.parse().map_err(|_| "bad int")?));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Name(chars[start..i].iter().collect()));
        } else if c == '*' && chars.get(i + 1) == Some(&'*') {
            tokens.push(Token::Op("**"));
            i += 2;
        } else {
            let op = match c {
                '+' => "+",
                '-' => "-",
                '*' => "*",
                '(' => "(",
                ')' => ")",
                '[' => "[",
                ']' => "]",
                ',' => ",",
                other => return Err(format!("unexpected character {other:?}")),
            };
            tokens.push(Token::Op(op));
            i += 1;
        }
    }
    Ok(tokens)
}

fn eval(expr: &str, vars: &BTreeMap<String, PyValue>) -> Result<PyValue, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        vars,
    };
    let value = parser.sum()?;
    if parser.pos != tokens.len() {
        return Err(format!("cannot evaluate {expr:?}"));
    }
    Ok(value)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    vars: &'a BTreeMap<String, PyValue>,
}

impl Parser<'_> {
    fn eat(&mut self, op: &'static str) -> bool {
        if self.tokens.get(self.pos) == Some(&Token::Op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn sum(&mut self) -> Result<PyValue, String> {
        let mut value = self.product()?;
        loop {
            if self.eat("+") {
                value = PyValue::Int(as_int(value)? + as_int(self.product()?)?);
            } else if self.eat("-") {
                value = PyValue::Int(as_int(value)? - as_int(self.product()?)?);
            } else {
                return Ok(value);
            }
        }
    }

    fn product(&mut self) -> Result<PyValue, String> {
        let mut value = self.power()?;
        while self.eat("*") {
            value = PyValue::Int(as_int(value)? * as_int(self.power()?)?);
        }
        Ok(value)
    }

    fn power(&mut self) -> Result<PyValue, String> {
        let base = self.atom()?;
        if self.eat("**") {
            let exponent = self.power().and_then(as_int)?;
            return Ok(PyValue::Int(as_int(base)?.pow(exponent as u32)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<PyValue, String> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        match token {
            Some(Token::Int(n)) => Ok(PyValue::Int(n)),
            Some(Token::Name(name)) => self
                .vars
                .get(&name)
                .cloned()
                .ok_or_else(|| format!("name '{name}' is not defined")),
            Some(Token::Op("(")) => {
                let value = self.sum()?;
                if !self.eat(")") {
                    return Err("expected ')'".to_string());
                }
                Ok(value)
            }
            Some(Token::Op("[")) => {
                let mut items = Vec::new();
                if !self.eat("]") {
                    loop {
                        items.push(self.sum().and_then(as_int)?);
                        if self.eat("]") {
                            break;
                        }
                        if !self.eat(",") {
                            return Err("expected ',' or ']'".to_string());
                        }
                    }
                }
                Ok(PyValue::List(items))
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

fn as_int(value: PyValue) -> Result<i64, String> {
    match value {
        PyValue::Int(n) => Ok(n),
        other => Err(format!("expected a number, got {}", other.display())),
    }
}
