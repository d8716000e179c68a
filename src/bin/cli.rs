//! Front-end CLI: drives a local node

use clap::{Parser, Subcommand};
use std::time::Duration;
use worldsync::ops::{describe, FrontendClient};

#[derive(Parser)]
#[command(name = "worldsync")]
#[command(about = "worldsync front-end CLI")]
#[command(version)]
struct Cli {
    /// Local node URL
    #[arg(long, default_value = "http://localhost:8080")]
    node: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new cluster with the local node as primary
    Create {
        /// Display name
        #[arg(long)]
        username: String,
    },

    /// Join the cluster of another node
    Join {
        /// host:port of any cluster member
        address: String,

        /// Display name
        #[arg(long)]
        username: String,
    },

    /// Leave the current cluster
    Leave,

    /// Show the local node's view of the cluster
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = FrontendClient::new(&cli.node, Duration::from_secs(cli.timeout))?;

    match cli.command {
        Commands::Create { username } => {
            let info = client.create(&username).await?;
            println!("Cluster created");
            print!("{}", describe(&info));
        }

        Commands::Join { address, username } => {
            let info = client.join(&address, &username).await?;
            println!("Joined cluster via {}", address);
            print!("{}", describe(&info));
        }

        Commands::Leave => {
            client.leave().await?;
            println!("Left the cluster");
        }

        Commands::Status => {
            let info = client.status().await?;
            print!("{}", describe(&info));
        }
    }

    Ok(())
}
