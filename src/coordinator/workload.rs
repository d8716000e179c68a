//! Game-server process owned by the primary
//!
//! Only the primary runs the workload. Without a configured command the hook just
//! logs its transitions, which is what tests and headless nodes use.

use crate::common::config::WorkloadConfig;
use crate::common::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::process::{Child, Command};

#[derive(Debug)]
pub struct Workload {
    config: WorkloadConfig,
    default_dir: PathBuf,
    child: Mutex<Option<Child>>,
    running: AtomicBool,
}

impl Workload {
    pub fn new(config: WorkloadConfig, world_dir: impl AsRef<Path>) -> Self {
        Self {
            config,
            default_dir: world_dir.as_ref().to_path_buf(),
            child: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the workload; a running workload is left alone
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let program = match &self.config.command {
            Some(program) => program,
            None => {
                tracing::info!("Workload started (no command configured)");
                return Ok(());
            }
        };

        let dir = self
            .config
            .working_dir
            .clone()
            .unwrap_or_else(|| self.default_dir.clone());
        let child = Command::new(program)
            .args(&self.config.args)
            .current_dir(&dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                Error::Internal(format!("failed to start workload {}: {}", program, e))
            })?;

        tracing::info!(
            "Workload started: {} (pid {:?}) in {}",
            program,
            child.id(),
            dir.display()
        );
        *self.lock() = Some(child);
        Ok(())
    }

    /// Stop the workload if it runs
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        match self.lock().take() {
            Some(mut child) => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!("Failed to stop workload: {}", e);
                } else {
                    tracing::info!("Workload stopped (pid {:?})", child.id());
                }
            }
            None => tracing::info!("Workload stopped"),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Workload {
    fn drop(&mut self) {
        self.stop();
    }
}
