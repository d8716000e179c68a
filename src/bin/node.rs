//! Node daemon binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worldsync::{Config, NodeServer};

#[derive(Parser)]
#[command(name = "worldsync-node")]
#[command(about = "worldsync cluster node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Serve {
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address peers use to reach this node
        #[arg(long)]
        address: Option<String>,

        /// Interface to bind
        #[arg(long)]
        bind: Option<String>,

        /// Coordination API port
        #[arg(long)]
        port: Option<u16>,

        /// Game server port advertised to players
        #[arg(long)]
        workload_port: Option<u16>,

        /// Node state file
        #[arg(long)]
        state: Option<PathBuf>,

        /// Replicated world directory
        #[arg(long)]
        world_dir: Option<PathBuf>,

        /// Replication queue file
        #[arg(long)]
        queue: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            address,
            bind,
            port,
            workload_port,
            state,
            world_dir,
            queue,
        } => {
            // File and environment first, flags on top
            let mut config = Config::load(config.as_deref())?;
            if let Some(address) = address {
                config.node.address = address;
            }
            if let Some(bind) = bind {
                config.node.bind_address = bind;
            }
            if let Some(port) = port {
                config.node.coordination_port = port;
            }
            if let Some(workload_port) = workload_port {
                config.node.workload_port = workload_port;
            }
            if let Some(state) = state {
                config.node.state_path = state;
            }
            if let Some(world_dir) = world_dir {
                config.replication.world_dir = world_dir;
            }
            if let Some(queue) = queue {
                config.replication.queue_path = queue;
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            tracing::info!("worldsync {}", worldsync::BUILD_INFO);
            NodeServer::bind(config).await?.serve().await?;
        }
    }

    Ok(())
}
