use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use color_eyre::eyre::{self, Context};
use debugger::{DebugService, DebuggerConfig, Event, Model, ServiceEvent, Session};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::filter::EnvFilter;
use transport::types::SourceBreakpoint;

#[derive(Debug, Parser)]
struct Args {
    /// Port the kernel's debug adapter listens on
    #[clap(short, long)]
    port: u16,

    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// File with the code of the cell to debug
    #[clap(short, long)]
    cell: Option<PathBuf>,

    /// Lines of the cell to break on
    #[clap(short, long)]
    breakpoints: Vec<i64>,

    /// Configuration file, instead of the user's default one
    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(long, default_value = "kdap.log")]
    log_file: PathBuf,
}

enum ShouldQuit {
    True,
    False,
}

struct App {
    service: DebugService,
    notifications: mpsc::UnboundedReceiver<ServiceEvent>,
    cell: Option<String>,
}

impl App {
    async fn run(&mut self) -> eyre::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let should_quit = tokio::select! {
                line = lines.next_line() => match line.context("reading from stdin")? {
                    Some(line) => self.handle_input(line.trim()).await.context("handling command")?,
                    None => ShouldQuit::True,
                },
                notification = self.notifications.recv() => match notification {
                    Some(notification) => self.handle_notification(notification),
                    None => ShouldQuit::True,
                },
            };
            if let ShouldQuit::True = should_quit {
                return Ok(());
            }
        }
    }

    #[tracing::instrument(skip(self))]
    fn handle_notification(&mut self, notification: ServiceEvent) -> ShouldQuit {
        let ServiceEvent::Event(event) = notification else {
            return ShouldQuit::False;
        };
        match event {
            Event::Stopped(body) => {
                println!();
                println!("paused ({})", body.reason);
                self.print_location();
            }
            Event::Continued(_) => println!("\nrunning"),
            Event::Output(body) => print!("\n{}", body.output),
            Event::Terminated | Event::Exited(_) => {
                println!("\nkernel finished");
                return ShouldQuit::True;
            }
            other => tracing::debug!(event = other.name(), "ignoring event"),
        }
        ShouldQuit::False
    }

    fn print_location(&self) {
        match self.service.model().callstack.current_frame() {
            Some(frame) => {
                let path = frame
                    .source
                    .as_ref()
                    .and_then(|s| s.path.as_deref())
                    .unwrap_or("<unknown>");
                println!("{path}:{} in {}", frame.line, frame.name);
            }
            None => println!("???"),
        }
    }

    fn print_variables(&self) {
        let scopes = self.service.model().variables.scopes();
        let Some(scope) = scopes.first() else {
            println!("no variables");
            return;
        };
        println!("{}:", scope.name);
        for variable in &scope.variables {
            let type_name = variable.type_name().unwrap_or("?");
            println!("  {} ({type_name}) = {}", variable.name(), variable.value());
        }
    }

    async fn handle_input(&mut self, input: &str) -> eyre::Result<ShouldQuit> {
        let (command, rest) = input.split_once(' ').unwrap_or((input, ""));
        match command {
            "q" => return Ok(ShouldQuit::True),
            "" => {}
            "c" => self.service.continue_().await,
            "n" => self.service.next().await,
            "s" => self.service.step_in().await,
            "o" => self.service.step_out().await,
            "w" => self.print_location(),
            "v" => self.print_variables(),
            "e" => match self.service.evaluate(rest).await {
                Ok(outcome) => println!("{}", outcome.result),
                Err(e) => println!("error: {e}"),
            },
            "b" => {
                let Some(code) = &self.cell else {
                    println!("no cell given");
                    return Ok(ShouldQuit::False);
                };
                let lines = parse_lines(rest)?;
                let accepted = self
                    .service
                    .update_breakpoints(code, &lines, None)
                    .await
                    .context("setting breakpoints")?;
                for bp in accepted {
                    println!("breakpoint at {}:{}", bp.source_path, bp.line);
                }
            }
            "clear" => self
                .service
                .clear_breakpoints()
                .await
                .context("clearing breakpoints")?,
            "restart" => self.service.restart().await.context("restarting")?,
            other => println!("Unhandled command: '{other}'"),
        }
        Ok(ShouldQuit::False)
    }
}

fn parse_lines(input: &str) -> eyre::Result<Vec<SourceBreakpoint>> {
    input
        .split_whitespace()
        .map(|line| {
            line.parse()
                .map(|line| SourceBreakpoint { line })
                .wrap_err_with(|| format!("invalid line number '{line}'"))
        })
        .collect()
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install().context("installing color_eyre")?;
    let args = Args::parse();

    let log_file = std::fs::File::create(&args.log_file).context("creating log file")?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(Mutex::new(log_file))
        .init();

    let config = match &args.config {
        Some(path) => DebuggerConfig::load_from(path),
        None => DebuggerConfig::load(),
    }
    .context("loading configuration")?;

    let addr = format!("{}:{}", args.host, args.port);
    let session = Session::connect(&addr, &config)
        .await
        .context("connecting to kernel")?;

    let (notify_tx, notifications) = mpsc::unbounded_channel();
    let service = DebugService::new(Arc::new(Model::new()), notify_tx, config);
    service.set_session(Some(Arc::new(session)));
    service
        .restore_state(true)
        .await
        .context("restoring debugger state")?;
    tracing::debug!("debugger started");

    let cell = match &args.cell {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading cell {}", path.display()))?,
        ),
        None => None,
    };
    if let Some(code) = &cell {
        let lines: Vec<_> = args
            .breakpoints
            .iter()
            .map(|&line| SourceBreakpoint { line })
            .collect();
        let accepted = service
            .update_breakpoints(code, &lines, None)
            .await
            .context("adding breakpoints")?;
        tracing::debug!(count = accepted.len(), "breakpoints added");
        println!("cell registered as {}", service.code_id(code)?);
    }

    let mut app = App {
        service: service.clone(),
        notifications,
        cell,
    };
    let result = app.run().await;

    if service.is_started() {
        if let Err(e) = service.stop().await {
            tracing::warn!(error = %e, "stopping debugger");
        }
    }
    service.dispose();
    result
}
