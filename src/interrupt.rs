//! Operator interrupt signalling.
//!
//! Ctrl-C is translated into a generation counter on a `watch` channel. Each
//! listener remembers the generation it was created at, so an interrupt raised
//! while the session sat at a prompt does not leak into the next run.

use std::sync::Arc;
use tokio::sync::watch;

/// Raises interrupts. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Interrupt {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Signal every listener created before this call.
    pub fn trigger(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }

    /// A listener that only observes interrupts raised from now on.
    pub fn listener(&self) -> InterruptListener {
        InterruptListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Forward process-level Ctrl-C into this interrupt until the runtime stops.
    pub fn forward_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let interrupt = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("operator interrupt received");
                interrupt.trigger();
            }
        })
    }
}

/// Observes interrupts raised after its creation.
#[derive(Debug)]
pub struct InterruptListener {
    rx: watch::Receiver<u64>,
}

impl InterruptListener {
    /// Non-blocking check; consumes the pending interrupt.
    pub fn is_triggered(&mut self) -> bool {
        match self.rx.has_changed() {
            Ok(true) => {
                self.rx.borrow_and_update();
                true
            }
            _ => false,
        }
    }

    /// Resolves on the next interrupt. Never resolves once the sender is gone.
    pub async fn triggered(&mut self) {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listener_ignores_earlier_interrupts() {
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let mut listener = interrupt.listener();
        assert!(!listener.is_triggered());

        interrupt.trigger();
        assert!(listener.is_triggered());
        // consumed
        assert!(!listener.is_triggered());
    }

    #[tokio::test]
    async fn test_triggered_resolves() {
        let interrupt = Interrupt::new();
        let mut listener = interrupt.listener();

        let raiser = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            raiser.trigger();
        });

        tokio::time::timeout(Duration::from_secs(2), listener.triggered())
            .await
            .expect("interrupt not observed");
    }
}
