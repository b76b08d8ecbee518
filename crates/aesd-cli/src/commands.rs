use std::ffi::OsString;
use std::io::{BufRead, BufReader, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::process::Stdio;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context};
use colored::Colorize;
use tracing::{debug, info};

use aesd_server::{
    termination_signal, BackingConfig, LogServer, RunSummary, ServerConfig, ServerResult,
};
use aesd_store::DEFAULT_CAPACITY;

use crate::cli::*;

const NOTIFY_READY_FLAG: &str = "--notify-ready";
const READY_LINE: &str = "aesd:ready";
const FAILED_PREFIX: &str = "aesd:failed:";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args),
        Command::Write(args) => cmd_write(args),
        Command::Config(args) => cmd_config(args, cli.format),
    }
}

impl ConfigSource {
    /// Start from the config file (or defaults) and apply flag overrides.
    pub fn resolve(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind_addr = bind
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid listen address {bind:?}"))?;
        }
        if let Some(port) = self.port {
            config.bind_addr.set_port(port);
        }

        config.backing = match (self.backing, config.backing) {
            (Some(BackingKind::Ring), BackingConfig::Ring { capacity })
            | (None, BackingConfig::Ring { capacity }) => BackingConfig::Ring {
                capacity: self.capacity.unwrap_or(capacity),
            },
            (Some(BackingKind::Ring), BackingConfig::File { .. }) => BackingConfig::Ring {
                capacity: self.capacity.unwrap_or(DEFAULT_CAPACITY),
            },
            (Some(BackingKind::File) | None, BackingConfig::File { path, remove_on_exit }) => {
                BackingConfig::File {
                    path: self.data_file.clone().unwrap_or(path),
                    remove_on_exit: remove_on_exit && !self.keep_data_file,
                }
            }
            (Some(BackingKind::File), BackingConfig::Ring { .. }) => BackingConfig::File {
                path: self
                    .data_file
                    .clone()
                    .unwrap_or_else(|| aesd_server::config::DEFAULT_DATA_FILE.into()),
                remove_on_exit: !self.keep_data_file,
            },
        };

        if self.no_timestamps {
            config.timestamp.enabled = false;
        }
        config.validate()?;
        Ok(config)
    }
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.source.resolve()?;
    if args.daemon {
        return spawn_detached();
    }

    let server = match LogServer::bind(config) {
        Ok(server) => server,
        Err(e) => {
            if args.notify_ready {
                notify(&format!("{FAILED_PREFIX}{e}"));
            }
            return Err(e.into());
        }
    };
    if args.notify_ready {
        notify(READY_LINE);
    }
    let handle = server.shutdown_handle();
    let worker = std::thread::Builder::new()
        .name("accept".into())
        .spawn(move || server.run())
        .context("cannot start accept loop")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start signal runtime")?;
    runtime.block_on(wait_for_stop(&worker))?;

    handle.shutdown();
    let summary = worker
        .join()
        .map_err(|_| anyhow!("accept loop panicked"))??;
    // The launching process has exited and stdout is gone.
    if !args.notify_ready {
        print_summary(&summary);
    }
    Ok(())
}

/// Resolve on SIGINT/SIGTERM, or when the accept loop exits by itself.
async fn wait_for_stop(worker: &JoinHandle<ServerResult<RunSummary>>) -> anyhow::Result<()> {
    let signal = termination_signal();
    tokio::pin!(signal);
    let mut poll = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            caught = &mut signal => {
                let kind = caught.context("cannot install signal handlers")?;
                info!(signal = %kind, "caught signal, exiting");
                return Ok(());
            }
            _ = poll.tick() => {
                if worker.is_finished() {
                    return Ok(());
                }
            }
        }
    }
}

/// Re-run this command without the daemon flag, detached from the
/// terminal. Returns once the child has bound its listener, or with the
/// child's error if it could not start.
fn spawn_detached() -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let mut command = std::process::Command::new(exe);
    command
        .args(detached_args(std::env::args_os().skip(1)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let mut child = command.spawn().context("cannot start background process")?;
    let pid = child.id();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("background process has no stdout"))?;

    if let Err(e) = await_ready(BufReader::new(stdout)) {
        let status = child.wait().context("cannot reap background process")?;
        return Err(e.context(format!("background server did not start ({status})")));
    }
    info!(pid, "running in background");
    println!("{} aesd running in background (pid {pid})", "✓".green().bold());
    Ok(())
}

/// Arguments for the background child: the daemon flag is replaced by the
/// readiness flag.
fn detached_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .filter(|arg| arg != "-d" && arg != "--daemon")
        .chain(std::iter::once(OsString::from(NOTIFY_READY_FLAG)))
        .collect()
}

/// Wait for the child's readiness line. Other output (log lines) is skipped.
fn await_ready(reader: impl BufRead) -> anyhow::Result<()> {
    for line in reader.lines() {
        let line = line.context("cannot read from background process")?;
        let line = line.trim_end();
        if line == READY_LINE {
            return Ok(());
        }
        if let Some(reason) = line.strip_prefix(FAILED_PREFIX) {
            return Err(anyhow!("{reason}"));
        }
    }
    Err(anyhow!("background process exited before binding"))
}

/// Best effort: the launching process may already be gone.
fn notify(line: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{line}").and_then(|()| stdout.flush());
}

fn print_summary(summary: &RunSummary) {
    println!("{} aesd stopped", "✓".green().bold());
    println!("  Connections: {}", summary.connections.to_string().bold());
    println!("  Drained at shutdown: {}", summary.drained);
    if summary.timestamps > 0 {
        println!("  Timestamps written: {}", summary.timestamps);
    }
}

/// Create or truncate `path` and write `text` to it.
pub fn write_file(path: &Path, text: &str) -> anyhow::Result<()> {
    std::fs::write(path, text).with_context(|| format!("cannot write {}", path.display()))?;
    debug!(path = %path.display(), text, "wrote file");
    Ok(())
}

fn cmd_write(args: WriteArgs) -> anyhow::Result<()> {
    write_file(&args.path, &args.text)?;
    println!(
        "{} Wrote {} bytes to {}",
        "✓".green(),
        args.text.len(),
        args.path.display().to_string().bold()
    );
    Ok(())
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = args.source.resolve()?;
    match format {
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}
