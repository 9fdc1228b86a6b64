//! juiced-rcon - standalone remote console gateway
//!
//! Serves the configured profiles over WebSockets and reads console
//! commands from stdin, running them with root privileges.

use anyhow::{Context, Result};
use clap::Parser;
use juiced::gateway::host::{CommandInterpreter, ProcessInterpreter};
use juiced::gateway::log_tap::{LogBus, TracingForwarder};
use juiced::gateway::storage::{self, JsonFilePersistence};
use juiced::{CommandRouter, Gateway, GatewayConfig, Host};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "juiced-rcon")]
#[command(about = "Multi-profile authenticated remote console gateway", long_about = None)]
struct Cli {
    /// Gateway configuration file
    #[arg(short, long, default_value = "juiced/config.json")]
    config: PathBuf,

    /// Address to listen on
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Root RCON password
    #[arg(long)]
    password: Option<String>,

    /// Profile store file
    #[arg(long)]
    profiles: Option<PathBuf>,

    /// Program that executes console commands
    #[arg(long)]
    exec: Option<PathBuf>,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    fn gateway_config(&self) -> Result<GatewayConfig> {
        let mut config = if self.config.exists() {
            storage::load_config(&self.config)
                .with_context(|| format!("failed to read {}", self.config.display()))?
        } else {
            GatewayConfig::default()
        };

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(profiles) = &self.profiles {
            config.profiles_path = profiles.clone();
        }
        Ok(config)
    }
}

/// Fallback interpreter used when no `--exec` program is configured
fn console(command: &str, args: &[String]) -> Option<String> {
    match command {
        "say" | "echo" => Some(args.join(" ")),
        "version" => Some(format!("juiced {}", juiced::VERSION)),
        _ => Some(format!("Unknown command: {}", command)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let bus = Arc::new(LogBus::new());

    // Initialize tracing; INFO and above also reach connected sessions
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(TracingForwarder::new(bus.clone()))
        .init();

    let cli = Cli::parse();
    let config = cli.gateway_config()?;
    if cli.save_config {
        storage::write_config(&cli.config, &config)
            .with_context(|| format!("failed to write {}", cli.config.display()))?;
    }

    let interpreter: Arc<dyn CommandInterpreter> = match &cli.exec {
        Some(program) => Arc::new(ProcessInterpreter::new(program.clone())),
        None => Arc::new(console),
    };
    let host = Host {
        interpreter,
        persistence: Arc::new(JsonFilePersistence::new(config.profiles_path.clone())),
        hook: None,
        log: None,
    }
    .with_log(bus);

    let gateway = Gateway::new(config, host).context("failed to load rcon profiles")?;
    gateway.start().context("failed to start rcon gateway")?;

    let router = CommandRouter::new(gateway.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    // Detached from a terminal: serve until interrupted.
                    tokio::signal::ctrl_c().await?;
                    break;
                };
                let router = router.clone();
                let output = tokio::task::spawn_blocking(move || router.execute_console(&line)).await?;
                if let Some(output) = output {
                    println!("{}", output);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    gateway.stop().await;
    Ok(())
}
