use tokio::sync::watch;

/// Cooperative pause flag shared between the worker and whoever drives it.
/// Only the latest value matters; toggles are not queued.
#[derive(Clone, Debug)]
pub struct PauseGate {
    tx: watch::Sender<bool>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn set_paused(&self, paused: bool) {
        let previous = self.tx.send_replace(paused);
        if previous != paused {
            log::info!("{}", if paused { "Generation paused" } else { "Generation resumed" });
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns immediately when not paused, otherwise parks until resumed.
    pub async fn await_resume(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_not_paused_passes_through() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());
        timeout(Duration::from_millis(100), gate.await_resume())
            .await
            .expect("gate should be open");
    }

    #[tokio::test]
    async fn test_blocks_until_resumed_from_other_task() {
        let gate = PauseGate::new();
        gate.set_paused(true);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.await_resume().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let toggler = gate.clone();
        std::thread::spawn(move || toggler.set_paused(false))
            .join()
            .expect("toggle thread");

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resume")
            .expect("waiter task");
    }

    #[tokio::test]
    async fn test_rapid_toggles_keep_last_value() {
        let gate = PauseGate::new();
        gate.set_paused(true);
        gate.set_paused(false);
        gate.set_paused(true);
        assert!(gate.is_paused());
        gate.set_paused(false);
        assert!(!gate.is_paused());
    }
}
