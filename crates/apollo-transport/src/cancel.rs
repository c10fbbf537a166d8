//! Cancellation of a running consumer.
//!
//! The transport holds the [`CancelHandle`] of whichever consumer is
//! currently feeding it; the consumer task selects on the matching
//! [`CancelSignal`]. Dropping the handle cancels too, so replacing a
//! transport's consumer can never leave the old one running.

use tokio::sync::oneshot;

/// Owner side: cancel once, or drop.
#[derive(Debug)]
pub struct CancelHandle(oneshot::Sender<()>);

/// Task side: resolves when the handle is used or dropped.
#[derive(Debug)]
pub struct CancelSignal {
    rx: oneshot::Receiver<()>,
    fired: bool,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = oneshot::channel();
    (CancelHandle(tx), CancelSignal { rx, fired: false })
}

impl CancelHandle {
    pub fn cancel(self) {
        let _ = self.0.send(());
    }

    /// Whether the task side has already finished.
    pub fn is_finished(&self) -> bool {
        self.0.is_closed()
    }
}

impl CancelSignal {
    /// Waits for cancellation. Returns immediately once it has fired.
    pub async fn cancelled(&mut self) {
        if !self.fired {
            let _ = (&mut self.rx).await;
            self.fired = true;
        }
    }
}
