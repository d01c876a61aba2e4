//! `mpyctl`: list, copy and run files on a MicroPython device.

mod config;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use mpy_device::{CancelFlag, DeviceError, DeviceManager, DeviceSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::config::{parse_usb_id, CliConfig};

#[derive(Parser, Debug)]
#[command(name = "mpyctl")]
#[command(about = "Talk to a MicroPython device over its serial REPL")]
#[command(version)]
struct Cli {
    /// Serial port path, or tcp://host:port
    #[arg(short, long)]
    port: String,

    /// Baud rate (overrides the config file)
    #[arg(short, long)]
    baud: Option<u32>,

    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// USB VID:PID of the board, to look up its capabilities
    #[arg(long, value_parser = parse_usb_id)]
    usb: Option<(u16, u16)>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Copy a device file to the host
    Get { remote: String, local: Option<PathBuf> },
    /// Copy a host file to the device
    Put { local: PathBuf, remote: Option<String> },
    /// Create an empty file
    Touch { path: String },
    /// Delete a file
    Rm { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Delete an empty directory
    Rmdir { path: String },
    /// Rename a file or directory
    Mv { old: String, new: String },
    /// Print the size of a file
    Size { path: String },
    /// Run a script stored on the device
    Run { path: String },
    /// Run Python source in raw mode
    Exec { source: String },
    /// Send one line on a temporary connection and print the reply
    Send { line: String },
    /// Interactive REPL passthrough
    Repl,
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("MPY_LOG") {
        v
    } else {
        "warn".to_string()
    };
    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();
    mpy_device::metrics::describe_metrics();

    let config = CliConfig::load(cli.config.as_deref())?;
    let identity = config.identity(&cli.port, cli.baud, cli.usb);
    let manager = DeviceManager::new(config.session_config(cli.baud));

    if let Command::Send { line } = &cli.command {
        let reply = manager
            .connect_and_execute(&identity, &format!("{}\r", line))
            .await
            .map_err(|e| anyhow!(e.user_message("send")))?;
        print!("{}", reply);
        return Ok(());
    }

    let session = manager
        .connect(identity)
        .await
        .with_context(|| format!("connecting to {}", cli.port))?;
    let result = run(&session, cli.command).await;
    manager.disconnect_all().await;
    result
}

fn failed(operation: &'static str) -> impl Fn(DeviceError) -> anyhow::Error {
    move |e| anyhow!(e.user_message(operation))
}

fn progress_bar(label: &'static str) -> impl FnMut(u64, u64) + Send {
    move |done, total| {
        eprint!("\r{} {}/{} bytes", label, done, total);
        if done >= total {
            eprintln!();
        }
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

async fn run(session: &DeviceSession, command: Command) -> Result<()> {
    let fs = session.fs();
    match command {
        Command::Ls { path } => {
            for entry in fs.list_directory(&path).await.map_err(failed("list"))? {
                println!("{:>5} {:>8} {}", entry.kind, entry.size, entry.path);
            }
        }
        Command::Get { remote, local } => {
            let local = local.unwrap_or_else(|| PathBuf::from(basename(&remote)));
            let cancel = CancelFlag::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });
            let mut progress = progress_bar("reading");
            let data = fs
                .read_file(&remote, None, Some(&cancel), Some(&mut progress))
                .await
                .map_err(failed("read"))?;
            std::fs::write(&local, &data).with_context(|| format!("writing {}", local.display()))?;
        }
        Command::Put { local, remote } => {
            let data = std::fs::read(&local).with_context(|| format!("reading {}", local.display()))?;
            let remote = match remote {
                Some(remote) => remote,
                None => {
                    let name = local
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .ok_or_else(|| anyhow!("{} has no file name", local.display()))?;
                    format!("/{}", name)
                }
            };
            let mut progress = progress_bar("writing");
            fs.write_file(&remote, &data, Some(&mut progress))
                .await
                .map_err(failed("write"))?;
        }
        Command::Touch { path } => fs.create_file(&path, None).await.map_err(failed("create"))?,
        Command::Rm { path } => fs.delete_file(&path).await.map_err(failed("delete"))?,
        Command::Mkdir { path } => fs.create_folder(&path).await.map_err(failed("mkdir"))?,
        Command::Rmdir { path } => fs.delete_folder(&path).await.map_err(failed("rmdir"))?,
        Command::Mv { old, new } => fs.rename(&old, &new).await.map_err(failed("rename"))?,
        Command::Size { path } => println!("{}", fs.file_size(&path).await.map_err(failed("stat"))?),
        Command::Run { path } => print!("{}", fs.run_file(&path).await.map_err(failed("run"))?),
        Command::Exec { source } => print!("{}", fs.exec_raw(&source).await.map_err(failed("exec"))?),
        Command::Send { .. } => return Err(anyhow!("send uses its own connection")),
        Command::Repl => repl(session).await?,
    }
    Ok(())
}

/// Pass stdin lines to the device and echo its output until EOF.
async fn repl(session: &DeviceSession) -> Result<()> {
    let mut terminal = session.terminal();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        loop {
            match terminal.recv().await {
                Ok(chunk) => {
                    let _ = stdout.write_all(&chunk);
                    let _ = stdout.flush();
                }
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "terminal output dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    session.write_raw("\r").map_err(failed("write"))?;
    while let Some(line) = lines.next_line().await? {
        session.write_raw(&format!("{}\r", line)).map_err(failed("write"))?;
    }
    printer.abort();
    Ok(())
}
