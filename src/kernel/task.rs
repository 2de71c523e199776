/*!
 * Kernel Task - Autonomous Stepping Loop
 *
 * Background task that drives the kernel without an external caller in the
 * loop: it dispatches and steps agents at a fixed cadence and reacts to
 * control commands.
 *
 * Shutdown is graceful-with-fallback: `shutdown().await` is the preferred
 * path and waits for the loop to exit; if the handle is dropped without it,
 * `Drop` aborts the task and logs a warning. An atomic flag distinguishes
 * the two so the fallback never fires after a graceful shutdown.
 */

use super::Kernel;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Control messages for the kernel task
#[derive(Debug, Clone)]
pub enum KernelCommand {
    /// Change the stepping cadence
    SetInterval(Duration),
    /// Pause autonomous stepping
    Pause,
    /// Resume autonomous stepping
    Resume,
    /// Run one dispatch immediately
    Trigger,
    /// Stop the loop
    Shutdown,
}

/// Handle to the kernel background task
pub struct KernelTask {
    command_tx: mpsc::UnboundedSender<KernelCommand>,
    handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl KernelTask {
    /// Spawn the stepping loop on the current tokio runtime
    pub fn spawn(kernel: Kernel, interval: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shutdown_initiated = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(async move {
            run_kernel_loop(kernel, interval, command_rx).await;
        });

        info!("Kernel task spawned ({}ms cadence)", interval.as_millis());
        Self {
            command_tx,
            handle: Some(handle),
            shutdown_initiated,
        }
    }

    pub fn set_interval(&self, interval: Duration) {
        let _ = self.command_tx.send(KernelCommand::SetInterval(interval));
    }

    pub fn pause(&self) {
        let _ = self.command_tx.send(KernelCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.command_tx.send(KernelCommand::Resume);
    }

    pub fn trigger(&self) {
        let _ = self.command_tx.send(KernelCommand::Trigger);
    }

    /// Graceful shutdown; waits for the loop to drain. Consumes self so the
    /// handle cannot be used afterwards.
    pub async fn shutdown(mut self) {
        self.shutdown_initiated.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(KernelCommand::Shutdown);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Kernel task shutdown error: {}", e);
            } else {
                info!("Kernel task shutdown complete");
            }
        }
    }
}

async fn run_kernel_loop(
    kernel: Kernel,
    interval: Duration,
    mut command_rx: mpsc::UnboundedReceiver<KernelCommand>,
) {
    let mut active = true;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Kernel loop started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if active && !kernel.is_idle() {
                    if let Err(e) = kernel.run_once() {
                        warn!("Kernel dispatch failed: {}", e);
                    }
                }
            }

            Some(cmd) = command_rx.recv() => {
                match cmd {
                    KernelCommand::SetInterval(new_interval) => {
                        info!("Kernel cadence set to {}ms", new_interval.as_millis());
                        ticker = tokio::time::interval(new_interval);
                        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    }
                    KernelCommand::Pause => {
                        info!("Kernel task paused");
                        active = false;
                    }
                    KernelCommand::Resume => {
                        info!("Kernel task resumed");
                        active = true;
                    }
                    KernelCommand::Trigger => {
                        if let Err(e) = kernel.run_once() {
                            warn!("Kernel dispatch failed: {}", e);
                        }
                    }
                    KernelCommand::Shutdown => {
                        info!("Kernel task shutting down");
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for KernelTask {
    fn drop(&mut self) {
        if self.shutdown_initiated.load(Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.take() {
            warn!(
                "KernelTask dropped without shutdown() - aborting task. \
                 Use `task.shutdown().await` for graceful cleanup."
            );
            handle.abort();
        }
    }
}
