//! kernel-console - interactive terminal console for a statistical kernel.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kernel_interop::config::KernelConfig;
use kernel_interop::display;
use kernel_interop::protocol::{AsyncEvent, OutputStream};
use kernel_interop::repl::{Console, ConsoleError, ConsoleOutput, ExecutionState};
use kernel_interop::session::Session;

#[derive(Parser)]
#[command(
    name = "kernel-console",
    about = "Interactive console for a statistical-language kernel",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a kernel and run an interactive console on it.
    Console {
        /// Path to the kernel wrapper binary.
        #[arg(short, long)]
        interpreter: Option<PathBuf>,
        /// Working directory for the interpreter.
        #[arg(short, long)]
        workdir: Option<PathBuf>,
        /// Config file; defaults to the user config directory.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

struct CliOutput;

impl ConsoleOutput for CliOutput {
    fn print(&self, text: &str, stream: OutputStream) {
        display::print_output(text, stream);
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Console {
            interpreter,
            workdir,
            config,
        } => match run_console(interpreter, workdir, config).await {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "Console failed");
                std::process::ExitCode::FAILURE
            }
        },
    }
}

async fn run_console(
    interpreter: Option<PathBuf>,
    workdir: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => KernelConfig::load(&path)?,
        None => KernelConfig::load_default()?,
    };
    if let Some(interpreter) = interpreter {
        config.interpreter = interpreter;
    }
    if let Some(workdir) = workdir {
        config.working_dir = Some(workdir);
    }

    let session = Session::launch(&config).await?;
    let console = Console::new(session.clone(), Arc::new(CliOutput));
    spawn_side_event_handler(&session);

    run_input_loop(&console).await?;

    if config.snapshot.save_on_exit {
        if let Some(snapshot) = &config.snapshot.file {
            if let Err(e) = session.save_environment(snapshot).await {
                tracing::warn!(error = %e, "Failed to save environment snapshot");
            }
        }
    }
    session.terminate().await;
    Ok(())
}

/// Handle events that are not plain console output: exceptions with
/// their stacks, and view/help/file requests from the kernel.
fn spawn_side_event_handler(session: &Session) {
    let mut events = session.events();
    let session = session.clone();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                AsyncEvent::Exception {
                    message,
                    stack,
                    interrupted,
                } if !interrupted => display::print_exception(&message, &stack),
                AsyncEvent::ShowHelp { url, .. } => match url::Url::parse(&url) {
                    Ok(parsed) => {
                        display::print_output(&format!("Help: {parsed}\n"), OutputStream::System);
                    }
                    Err(e) => tracing::warn!(url = %url, error = %e, "Kernel sent an invalid help URL"),
                },
                AsyncEvent::BrowseUrl { url } => {
                    display::print_output(&format!("Open: {url}\n"), OutputStream::System);
                }
                AsyncEvent::SubprocessInput => {
                    display::print_output(
                        "The running process is reading from standard input\n",
                        OutputStream::System,
                    );
                }
                AsyncEvent::ShowFile { path, title } => {
                    display::print_output(
                        &format!("File requested ({title}): {path}\n"),
                        OutputStream::System,
                    );
                    let _ = session.client_request_finished();
                }
                AsyncEvent::ViewRequest { title, .. }
                | AsyncEvent::ViewTableRequest { title, .. } => {
                    display::print_output(
                        &format!("View requested: {title} (not available in the terminal)\n"),
                        OutputStream::System,
                    );
                    let _ = session.client_request_finished();
                }
                AsyncEvent::Termination => break,
                _ => {}
            }
        }
    });
}

async fn run_input_loop(console: &Console) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state_rx = console.watch_state();

    loop {
        // Wait until the console accepts input or is gone. Ctrl-C while
        // busy maps to a kernel interrupt.
        let state = loop {
            let state = *state_rx.borrow_and_update();
            match state {
                ExecutionState::Terminated => return Ok(()),
                ExecutionState::Prompt | ExecutionState::DebugPrompt | ExecutionState::ReadLine => {
                    break state;
                }
                ExecutionState::Busy => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            let _ = console.interrupt();
                        }
                        changed = state_rx.changed() => {
                            if changed.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        };

        display::print_output(display::prompt_for(state), OutputStream::Stdout);
        let Some(line) = lines.next_line().await? else {
            return Ok(()); // stdin closed
        };

        if line.trim() == ":quit" {
            return Ok(());
        }

        let result = match console.state() {
            ExecutionState::ReadLine => console.read_line_reply(&line),
            _ => console.execute_text(&line).map(|pending| {
                // Output and the next prompt arrive as events; the
                // outcome itself is not needed here.
                drop(pending);
            }),
        };
        match result {
            Ok(()) => {}
            Err(ConsoleError::Terminated) => return Ok(()),
            Err(e) => display::print_output(&format!("{e}\n"), OutputStream::Stderr),
        }
    }
}
