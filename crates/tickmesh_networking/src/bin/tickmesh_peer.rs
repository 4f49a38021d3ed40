//! # Tickmesh Peer
//!
//! Runs one peer of a session from the command line. The "game state" is a
//! line of text: every slave reports `name@tick`, the master joins the
//! reports and broadcasts them back.
//!
//! ## Usage
//!
//! ```bash
//! tickmesh_peer --name ada                      # master
//! tickmesh_peer --name bob --master 10.0.0.1    # slave
//! RUST_LOG=debug tickmesh_peer --name eve --master 10.0.0.1:4507 --ticks 50
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tickmesh_networking::{ExitReason, Session, SessionConfig, SessionResult, StatusLevel};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run one peer of a tickmesh session", long_about = None)]
struct Args {
    /// Player name announced to the master
    #[arg(short, long, default_value = "Unknown")]
    name: String,

    /// Master host (`host`, `ip` or `ip:port`); omit to start a session
    #[arg(short, long)]
    master: Option<String>,

    /// TOML file with session settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP port to bind, overriding the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// Ticks to play before leaving
    #[arg(short, long, default_value_t = 20)]
    ticks: u32,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> SessionResult<()> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    let mut session = match &args.master {
        Some(host) => Session::init_as_slave(config, host, &args.name)?,
        None => Session::init_as_master(config, &args.name)?,
    };
    report_status(&session);

    for tick in 0..args.ticks {
        if session.is_master() {
            let round = session.tick_master()?;
            report_status(&session);

            let mut world = format!("tick={tick}");
            for (index, report) in round.reports() {
                world.push_str(&format!(" {index}={}", String::from_utf8_lossy(report.as_slice())));
            }
            if round.resync {
                tracing::info!("Full refresh: {}", world);
            }
            session.send_master(world.as_bytes())?;
        } else {
            let mine = format!("{}@{tick}", session.player_name());
            let update = session.tick_slave(mine.as_bytes())?;
            report_status(&session);

            if let Some(world) = update.payload {
                tracing::info!(
                    resync = update.resync,
                    "{}",
                    String::from_utf8_lossy(world.as_slice())
                );
            }
            if update.promoted {
                tracing::info!("Now mastering the session");
            }
        }
    }

    let stats = *session.stats();
    session.leave(ExitReason::Quit)?;
    println!(
        "sent {} msgs / {} bytes, received {} msgs / {} bytes, {} malformed",
        stats.messages_sent,
        stats.bytes_sent,
        stats.messages_received,
        stats.bytes_received,
        stats.decode_errors
    );
    Ok(())
}

fn report_status(session: &Session) {
    let status = session.status();
    if status.level == StatusLevel::Info {
        tracing::info!("{}", status.message);
    }
}
