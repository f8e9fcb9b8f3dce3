//! Signal handling for keeld.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

/// Shutdown notification shared by every server task.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// A handle that only [`Shutdown::trigger`] resolves.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request shutdown of every task holding a clone.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(mut self) {
        // Every clone holds the sender, so the channel cannot close first.
        let _ = self.rx.wait_for(|requested| *requested).await;
    }
}

/// Install SIGINT and SIGTERM handlers.
///
/// The returned handle resolves on the first signal received, or once a
/// clone calls [`Shutdown::trigger`].
pub fn listen() -> Shutdown {
    let shutdown = Shutdown::new();
    let signalled = shutdown.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install SIGINT handler");
                std::future::pending::<()>().await;
            }
        };

        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            () = ctrl_c => info!("Received SIGINT"),
            () = terminate => info!("Received SIGTERM"),
        }

        signalled.trigger();
    });

    shutdown
}
