//! Cooperative shutdown token.
//!
//! [`ShutdownHandle`] is the trigger side: cheap to clone, usable from any
//! thread or task (the binary wires it to Ctrl-C).  [`Shutdown`] is held by
//! the event loop, which checks it once per turn and also races
//! [`Shutdown::requested`] against its readiness wait so an idle loop exits
//! promptly.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a linked trigger/token pair.
pub fn channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

impl ShutdownHandle {
    /// Ask the loop to stop.  Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Shutdown {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested.
    ///
    /// Stays pending forever if every [`ShutdownHandle`] is dropped without
    /// triggering.
    pub async fn requested(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_is_observed() {
        let (handle, mut token) = channel();
        assert!(!token.is_requested());
        handle.trigger();
        assert!(token.is_requested());
        assert!(handle.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), token.requested())
            .await
            .expect("requested() should resolve after trigger");
    }

    #[tokio::test]
    async fn trigger_from_another_thread_wakes_waiter() {
        let (handle, mut token) = channel();
        std::thread::spawn(move || handle.trigger());
        tokio::time::timeout(Duration::from_secs(5), token.requested())
            .await
            .expect("cross-thread trigger");
        assert!(token.is_requested());
    }
}
