//! Suspension gate for inbound delivery.
//!
//! Suspension pauses inbound delivery without tearing down the transport
//! session or losing subscription state. The gate is a watch channel holding
//! a single boolean: the receive loop checks it at the top of each iteration
//! and parks on [`SuspendGate::wait_open`] while closed, and transports that
//! hold a request open against the remote (long-poll) additionally race the
//! in-flight request against [`SuspendGate::wait_closed`] so suspension
//! takes effect immediately instead of after the next timeout.

use std::sync::Arc;

use tokio::sync::watch;

/// Gate controlling whether inbound delivery is active.
///
/// Clones share the same gate. Created open.
#[derive(Debug, Clone)]
pub struct SuspendGate {
    tx: Arc<watch::Sender<bool>>,
}

impl SuspendGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    /// Opens the gate, resuming inbound delivery. Idempotent.
    pub fn open(&self) {
        self.tx.send_if_modified(|open| {
            let changed = !*open;
            *open = true;
            changed
        });
    }

    /// Closes the gate, pausing inbound delivery. Idempotent.
    pub fn close(&self) {
        self.tx.send_if_modified(|open| {
            let changed = *open;
            *open = false;
            changed
        });
    }

    /// Whether delivery is currently allowed.
    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until the gate is open. Returns immediately if it already is.
    pub async fn wait_open(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for never errors here: we hold the sender ourselves.
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Waits until the gate is closed. Returns immediately if it already is.
    ///
    /// Receive loops with an in-flight remote request select on this to
    /// abort the request the moment suspension is requested.
    pub async fn wait_closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| !*open).await;
    }
}

impl Default for SuspendGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_starts_open() {
        let gate = SuspendGate::new();
        assert!(gate.is_open());
        // Does not block.
        tokio::time::timeout(Duration::from_millis(100), gate.wait_open())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_then_open_is_observed() {
        let gate = SuspendGate::new();
        gate.close();
        assert!(!gate.is_open());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_open().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        gate.open();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_closed_fires_on_close() {
        let gate = SuspendGate::new();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_closed().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        gate.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_idempotent_transitions() {
        let gate = SuspendGate::new();
        gate.open();
        gate.open();
        assert!(gate.is_open());
        gate.close();
        gate.close();
        assert!(!gate.is_open());
    }
}
