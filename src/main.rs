use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ptz_wrap::{
    AppConfig, ControllerError, ControllerEvent, ControllerHandle, EventSink, LogLevel,
    Recalibration, TurnLimit,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ptz-bridge",
    version,
    about = "GS-232 to Pelco-D bridge with cable-wrap protection"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bridge a tracker to a mount until Ctrl-C or end of input
    Run {
        #[arg(short, long, default_value = "ptz-bridge.toml")]
        config: PathBuf,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
}

enum Console {
    Forward(String),
    Recalibrate(Recalibration),
    Limits(TurnLimit),
    Status,
}

fn parse_console(line: &str) -> Result<Console> {
    let Some(rest) = line.strip_prefix('!') else {
        return Ok(Console::Forward(line.to_string()));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<f64> = words
        .map(|word| word.parse::<f64>().with_context(|| format!("bad number {:?}", word)))
        .collect::<Result<_>>()?;

    match (name, args.as_slice()) {
        ("cal", [heading, turns]) if turns.fract() == 0.0 && turns.abs() <= i32::MAX as f64 => {
            Ok(Console::Recalibrate(Recalibration::new(*heading, *turns as i32)))
        }
        ("limits", [negative, positive]) => {
            Ok(Console::Limits(TurnLimit::from_degrees(*negative, *positive)))
        }
        ("status", []) => Ok(Console::Status),
        _ => bail!("usage: !cal <heading> <turns> | !limits <neg_deg> <pos_deg> | !status"),
    }
}

async fn console(handle: &ControllerHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result: Result<()> = match parse_console(line) {
            Ok(Console::Forward(command)) => handle.submit(command).await.map_err(Into::into),
            Ok(Console::Recalibrate(recalibration)) => {
                handle.recalibrate(recalibration).await.map_err(Into::into)
            }
            Ok(Console::Limits(limits)) => handle.set_limits(limits).await.map_err(Into::into),
            Ok(Console::Status) => {
                let snapshot = handle.snapshot();
                println!(
                    "{}: heading {:.1}° turn {} ({:.1}° cumulative), elevation {:.1}°{}",
                    handle.state(),
                    snapshot.heading_deg,
                    snapshot.turns,
                    snapshot.cumulative_deg,
                    snapshot.elevation_deg,
                    if snapshot.jogging { ", jogging" } else { "" }
                );
                if !snapshot.limits.contains(snapshot.cumulative_deg) {
                    println!("outside azimuth limits, only motion back toward range is allowed");
                }
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            eprintln!("{:#}", e);
            if matches!(
                e.downcast_ref::<ControllerError>(),
                Some(ControllerError::NotRunning)
            ) {
                return Ok(());
            }
        }
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (sink, mut events) = EventSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ControllerEvent::Log(log) if log.level != LogLevel::Info => {
                    eprintln!("[{}] {}", log.level, log.message)
                }
                ControllerEvent::StateChanged(state) => eprintln!("[state] {}", state),
                ControllerEvent::ConnectionLost(reason) => {
                    eprintln!("[lost] {}", reason)
                }
                ControllerEvent::Log(_) => {}
            }
        }
    });

    let handle = ControllerHandle::start(&config, sink).await?;
    info!(
        "command link {}, mount link {}",
        config.command_link, config.mount_link
    );

    let outcome = console(&handle).await;
    handle.shutdown().await?;
    printer.await?;
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config } => run(config).await,
        Command::DefaultConfig => {
            print!("{}", AppConfig::default().to_toml()?);
            Ok(())
        }
    }
}
