//! Binary entrypoint for the meshping CLI.
//!
//! Commands:
//! - `start [--port <path> | --host <addr>] [--daemon]` - run the responder until interrupted
//! - `init [--force]` - write a starter `config.toml`
//! - `nodes [--port <path> | --host <addr>]` - connect once and print the node directory as JSON
//!
//! See the library crate docs for module-level details: `meshping::`.
use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use log::{error, info};

use meshping::config::{Config, TransportKind};

#[derive(Parser)]
#[command(name = "meshping")]
#[command(about = "Keyword auto-responder (ping / info / infotest) for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the responder
    Start {
        /// Serial device of the radio (e.g., /dev/ttyUSB0); selects the serial transport
        #[arg(short, long)]
        port: Option<String>,

        /// Radio host or host:port; selects the TCP transport
        #[arg(long, conflicts_with = "port")]
        host: Option<String>,

        /// Run as a background daemon (Unix only)
        #[arg(short, long)]
        daemon: bool,

        /// PID file location (for daemon mode)
        #[arg(long, default_value = "/tmp/meshping.pid")]
        pid_file: String,
    },
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Connect once and print the radio's node directory as JSON
    Nodes {
        #[arg(short, long)]
        port: Option<String>,

        #[arg(long, conflicts_with = "port")]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { force } => {
            init_logging(None, cli.verbose);
            if !force && tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                bail!("{} already exists (use --force to overwrite)", cli.config);
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Start {
            port,
            host,
            daemon,
            pid_file,
        } => {
            let mut config = load_config(&cli.config).await?;
            apply_address_overrides(&mut config, port, host)?;
            config.validate()?;

            #[cfg(all(unix, feature = "daemon"))]
            if daemon {
                // parent exits here; the respawned child runs without --daemon
                daemonize_process(&config, &pid_file)?;
            }

            #[cfg(not(all(unix, feature = "daemon")))]
            if daemon {
                let _ = pid_file;
                bail!("daemon mode requires a Unix platform and the 'daemon' feature");
            }

            init_logging(Some(&config), cli.verbose);
            info!("Starting meshping v{}", env!("CARGO_PKG_VERSION"));
            start_responder(config).await?;
        }
        Commands::Nodes { port, host } => {
            let mut config = load_config_or_default(&cli.config).await?;
            apply_address_overrides(&mut config, port, host)?;
            config.validate()?;
            // keep stdout clean for the JSON dump
            config.logging.file = None;
            init_logging(Some(&config), cli.verbose);
            print_nodes(config).await?;
        }
    }
    Ok(())
}

async fn load_config(path: &str) -> Result<Config> {
    Config::load(path)
        .await
        .map_err(|e| anyhow!("{} (run `meshping init` to create one)", e))
}

/// Defaults only when `path` does not exist; a file that cannot be read or parsed is an error.
async fn load_config_or_default(path: &str) -> Result<Config> {
    match tokio::fs::try_exists(path).await {
        Ok(false) => Ok(Config::default()),
        _ => load_config(path).await,
    }
}

/// `--port` selects serial, `--host` selects TCP; either overrides the config file.
fn apply_address_overrides(
    config: &mut Config,
    port: Option<String>,
    host: Option<String>,
) -> Result<()> {
    if let Some(port) = port {
        config.meshtastic.transport = TransportKind::Serial;
        config.meshtastic.port = port;
    }
    if let Some(host) = host {
        config.meshtastic.transport = TransportKind::Tcp;
        match host.rsplit_once(':') {
            Some((h, p)) if !h.contains(':') => {
                config.meshtastic.host = h.to_string();
                config.meshtastic.tcp_port = p
                    .parse()
                    .map_err(|_| anyhow!("invalid TCP port in --host {}", host))?;
            }
            _ => config.meshtastic.host = host,
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
#[cfg(feature = "meshtastic-proto")]
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(feature = "meshtastic-proto")]
async fn start_responder(config: Config) -> Result<()> {
    use meshping::meshtastic::MeshtasticConnector;
    use meshping::responder::ResponderServer;

    let connector = MeshtasticConnector::from_config(&config.meshtastic)?;
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = stop_tx.send(true);
    });

    let server = ResponderServer::new(&config, connector, stop_rx);
    let summary = server.run().await?;
    info!(
        "Handled {} packets, sent {} replies ({} failed), {} reconnects",
        summary.packets_handled, summary.replies_sent, summary.reply_failures, summary.reconnects
    );
    Ok(())
}

#[cfg(not(feature = "meshtastic-proto"))]
async fn start_responder(_config: Config) -> Result<()> {
    bail!("built without the 'meshtastic-proto' feature; no radio transport available")
}

#[cfg(feature = "meshtastic-proto")]
async fn print_nodes(config: Config) -> Result<()> {
    use meshping::directory::NodeDirectory;
    use meshping::meshtastic::MeshtasticConnector;
    use meshping::transport::{Connector, RadioTransport};

    let mut connector = MeshtasticConnector::from_config(&config.meshtastic)?;
    let mut device = connector
        .open()
        .await
        .map_err(|e| anyhow!("cannot connect to radio at {}: {}", connector.describe(), e))?;
    let directory = NodeDirectory::refresh(&device, config.logging.log_node_telemetry);
    device.close().await;
    println!("{}", serde_json::to_string_pretty(&directory)?);
    Ok(())
}

#[cfg(not(feature = "meshtastic-proto"))]
async fn print_nodes(_config: Config) -> Result<()> {
    bail!("built without the 'meshtastic-proto' feature; no radio transport available")
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // -v beats the configured level
    let base_level = match verbosity {
        0 => config
            .and_then(|c| c.logging.level_filter())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    match log_file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            // In daemon mode stdout is redirected to the log file; avoid writing twice
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}

/// Daemonize the process (Unix only)
///
/// Respawns the current executable without `--daemon`, detached from the terminal
/// with stdout/stderr appended to the log file, writes the child's PID and exits.
#[cfg(all(unix, feature = "daemon"))]
fn daemonize_process(config: &Config, pid_file: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::process::{Command, Stdio};

    let log_path = config.logging.file.as_deref().unwrap_or("meshping.log");

    let current_exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|arg| arg != "--daemon" && arg != "-d")
        .collect();

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let child = Command::new(&current_exe)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()?;

    std::fs::write(pid_file, format!("{}", child.id()))?;
    println!("meshping started in background (pid {})", child.id());
    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_override_splits_port() {
        let mut config = Config::default();
        apply_address_overrides(&mut config, None, Some("192.168.15.10:4500".into())).unwrap();
        assert_eq!(config.meshtastic.transport, TransportKind::Tcp);
        assert_eq!(config.meshtastic.host, "192.168.15.10");
        assert_eq!(config.meshtastic.tcp_port, 4500);

        let mut config = Config::default();
        apply_address_overrides(&mut config, None, Some("radio.local".into())).unwrap();
        assert_eq!(config.meshtastic.host, "radio.local");
        assert_eq!(config.meshtastic.tcp_port, 4403);

        assert!(apply_address_overrides(&mut config, None, Some("radio:x".into())).is_err());
    }

    #[tokio::test]
    async fn missing_config_defaults_but_broken_config_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        let config = load_config_or_default(missing.to_str().unwrap()).await.unwrap();
        assert_eq!(config, Config::default());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[meshtastic]\nport = 5\n").unwrap();
        let err = load_config_or_default(broken.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"), "got {}", err);

        let good = dir.path().join("good.toml");
        std::fs::write(&good, "[meshtastic]\nport = \"/dev/ttyACM1\"\n").unwrap();
        let config = load_config_or_default(good.to_str().unwrap()).await.unwrap();
        assert_eq!(config.meshtastic.port, "/dev/ttyACM1");
    }

    #[test]
    fn port_override_selects_serial() {
        let mut config = Config::default();
        config.meshtastic.transport = TransportKind::Tcp;
        apply_address_overrides(&mut config, Some("/dev/ttyACM0".into()), None).unwrap();
        assert_eq!(config.meshtastic.transport, TransportKind::Serial);
        assert_eq!(config.meshtastic.port, "/dev/ttyACM0");
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["meshping", "start", "--host", "10.0.0.2", "-c", "x.toml", "-vv"]).unwrap();
        assert_eq!(cli.config, "x.toml");
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Start { host: Some(_), port: None, .. }));
        assert!(Cli::try_parse_from(["meshping", "start", "--host", "a", "--port", "b"]).is_err());
    }
}
