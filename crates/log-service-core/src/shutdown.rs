//! Process-wide shutdown signal.
//!
//! A [`Shutdown`] can be cloned and triggered from anywhere (signal handler,
//! tests, a failing server). Listeners obtained from it can be awaited inside
//! `tokio::select!` or polled.

use tokio::sync::watch;

/// Trigger side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create a listener that resolves once shutdown is requested.
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    ///
    /// Returns immediately if it already was. Cancel safe.
    pub async fn recv(&mut self) {
        // wait_for only errs if every sender is gone, which also means shutdown.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }

    /// Owned variant for APIs that take a `'static` future.
    pub async fn recv_owned(mut self) {
        self.recv().await
    }
}
