use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::services::pause::PauseGate;
use crate::services::workflow::{Operation, WorkflowManager};

/// Single consumer that owns the [`WorkflowManager`]. Operations run one at
/// a time in submission order; pausing goes straight to the gate.
pub struct PipelineWorker {
    tx: mpsc::UnboundedSender<Operation>,
    busy: watch::Receiver<bool>,
    gate: PauseGate,
    stop_timeout: Duration,
    handle: JoinHandle<()>,
}

impl PipelineWorker {
    pub fn spawn(mut manager: WorkflowManager, stop_timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Operation>();
        let (busy_tx, busy) = watch::channel(false);
        let gate = manager.gate();

        let handle = tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                busy_tx.send_replace(true);
                manager.execute(op).await;
                busy_tx.send_replace(false);
            }
            debug!("Worker queue closed");
        });

        Self {
            tx,
            busy,
            gate,
            stop_timeout,
            handle,
        }
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Queues `op`. While another operation is running this first waits up
    /// to the stop timeout for it to finish; after that `op` is queued
    /// behind it anyway.
    pub async fn submit(&self, op: Operation) -> Result<()> {
        if self.is_busy() {
            info!("Waiting for the running operation before {}", op.label());
            let mut busy = self.busy.clone();
            let finished = timeout(self.stop_timeout, busy.wait_for(|running| !*running))
                .await
                .map(|changed| changed.is_ok())
                .unwrap_or(false);
            if !finished {
                warn!(
                    "Previous operation did not finish in time, queueing {} behind it",
                    op.label()
                );
            }
        }

        self.tx
            .send(op)
            .map_err(|_| anyhow!("Pipeline worker has stopped"))
    }

    pub fn set_paused(&self, paused: bool) {
        self.gate.set_paused(paused);
    }

    /// Lets queued operations finish, then stops the worker. A paused
    /// operation keeps this waiting until it is resumed.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.tx);
        self.handle.await?;
        Ok(())
    }
}
