//! lockstep CLI: run the signaling server, or a leader or follower client.

mod settings;
mod stdio;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lockstep_client::follower::Follower;
use lockstep_client::leader::Leader;
use lockstep_protocol::WsTransport;
use lockstep_server::{Server, ServerEvent};
use tracing::{debug, info};

use crate::settings::{FileConfig, ServeOverrides};
use crate::stdio::{StdinRecorder, StdoutApplier};

#[derive(Parser)]
#[command(
    name = "lockstep",
    about = "Mirror one leader's UI actions to any number of followers",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling server.
    Serve {
        /// Address to listen on.
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on.
        #[arg(short, long)]
        port: Option<u16>,

        /// Followers required before the session starts.
        #[arg(short = 'n', long)]
        expected_followers: Option<usize>,

        /// Keep the session running when parties change instead of restarting it.
        #[arg(long)]
        non_strict: bool,

        /// Action name to drop instead of relaying. May be repeated.
        #[arg(long = "block", value_name = "ACTION")]
        block: Vec<String>,
    },

    /// Lead a session, reading recorded changes as JSON lines from stdin.
    Lead {
        /// Server URL.
        #[arg(long)]
        url: Option<String>,
    },

    /// Follow a session, writing relayed changes as JSON lines to stdout.
    Follow {
        /// Server URL.
        #[arg(long)]
        url: Option<String>,
    },

    /// Print the effective configuration.
    CheckConfig,
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        debug!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config: FileConfig = lockstep_server::setup::load_config(cli.config.as_deref())?;
    init_tracing(&config.core.server.log_level);

    match cli.command {
        Commands::Serve {
            host,
            port,
            expected_followers,
            non_strict,
            block,
        } => {
            config.apply_serve(ServeOverrides {
                host,
                port,
                expected_followers,
                non_strict,
                block,
            });
            serve(config).await?;
        }
        Commands::Lead { url } => {
            config.apply_url(url);
            let mut leader = Leader::new(config.client, Box::new(StdinRecorder::new()));
            let summary = leader.run(ctrl_c()).await?;
            info!(recorded = summary.recorded, sent = summary.sent, "leader finished");
        }
        Commands::Follow { url } => {
            config.apply_url(url);
            let mut follower = Follower::new(config.client, Box::new(StdoutApplier::new()));
            let summary = follower.run(ctrl_c()).await?;
            info!(applied = summary.applied, failed = summary.failed, "follower finished");
        }
        Commands::CheckConfig => {
            let text =
                toml::to_string_pretty(&config).context("failed to render configuration")?;
            print!("{text}");
        }
    }

    Ok(())
}

async fn serve(config: FileConfig) -> anyhow::Result<()> {
    let server_config = config.core;
    let transport = WsTransport::bind(&server_config.server.host, server_config.server.port)
        .await
        .context("failed to start listener")?;
    let mut server = Server::new(server_config, transport);

    server.bus().subscribe(|event| {
        info!(
            sequence = event.sequence_id,
            event = event.kind.name(),
            "session event"
        );
    });

    let events = server.event_sender();
    tokio::spawn(async move {
        ctrl_c().await;
        let _ = events.send(ServerEvent::Shutdown).await;
    });

    server.run().await?;
    Ok(())
}
