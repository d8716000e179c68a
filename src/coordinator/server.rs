//! Node server: binds the coordination API, then recovers

use crate::common::{Config, Result};
use crate::coordinator::http::create_router;
use crate::coordinator::node::CoordinationNode;
use crate::coordinator::recovery::RecoveryOutcome;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct NodeServer {
    node: CoordinationNode,
    listener: TcpListener,
}

impl NodeServer {
    /// Bind the coordination port and build the node.
    ///
    /// Port 0 picks a free port, which then becomes the port advertised to peers.
    pub async fn bind(mut config: Config) -> Result<Self> {
        let listener = TcpListener::bind((
            config.node.bind_address.as_str(),
            config.node.coordination_port,
        ))
        .await?;
        config.node.coordination_port = listener.local_addr()?.port();

        let node = CoordinationNode::new(config)?;
        Ok(Self { node, listener })
    }

    pub fn node(&self) -> &CoordinationNode {
        &self.node
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve in the background and run startup recovery
    pub async fn start(self) -> Result<RunningNode> {
        let addr = self.local_addr()?;
        let config = self.node.config();
        tracing::info!("Starting worldsync node on {}", addr);
        tracing::info!(
            "  Advertised as: {}:{}",
            config.node.address,
            config.node.coordination_port
        );
        tracing::info!("  World dir: {}", config.replication.world_dir.display());
        tracing::info!("  State: {}", config.node.state_path.display());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = create_router(self.node.clone());
        let listener = self.listener;
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let recovery = self.node.recover().await;
        tracing::info!("✓ Node ready ({}, {:?})", self.node.role(), recovery);

        Ok(RunningNode {
            node: self.node,
            addr,
            recovery,
            shutdown: Some(shutdown_tx),
            server,
        })
    }

    /// Serve until Ctrl-C
    pub async fn serve(self) -> Result<()> {
        let mut running = self.start().await?;

        let server_stopped = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                false
            }
            res = &mut running.server => {
                match res {
                    Ok(Err(e)) => tracing::error!("HTTP server error: {}", e),
                    Err(e) => tracing::error!("HTTP server task failed: {}", e),
                    Ok(Ok(())) => {}
                }
                true
            }
        };

        if server_stopped {
            running.node.shutdown();
        } else {
            running.shutdown().await;
        }
        Ok(())
    }
}

/// A node whose API is being served
pub struct RunningNode {
    node: CoordinationNode,
    addr: SocketAddr,
    recovery: RecoveryOutcome,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<std::io::Result<()>>,
}

impl RunningNode {
    pub fn node(&self) -> &CoordinationNode {
        &self.node
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }

    /// What startup recovery decided
    pub fn recovery(&self) -> &RecoveryOutcome {
        &self.recovery
    }

    /// Stop timers and the workload, then the HTTP server
    pub async fn shutdown(mut self) {
        self.node.shutdown();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(Duration::from_secs(5), &mut self.server)
            .await
            .is_err()
        {
            tracing::warn!("HTTP server did not stop in time, aborting");
            self.server.abort();
        }
    }
}
