//! OS signal handling for graceful shutdown

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dbtn_core::prelude::*;

/// Spawn a task that cancels `shutdown` on SIGINT or SIGTERM (Ctrl+C on Windows)
pub fn spawn_signal_handler(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            result = wait_for_signal() => {
                if let Err(e) = result {
                    error!("Signal handler error: {}", e);
                    return;
                }
            }
        }

        info!("Shutdown signal received");
        shutdown.cancel();
    })
}

/// Wait for a termination signal
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| Error::signal(format!("Failed to create SIGINT handler: {}", e)))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| Error::signal(format!("Failed to create SIGTERM handler: {}", e)))?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        Ok(())
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::signal(format!("Failed to listen for Ctrl+C: {}", e)))?;
        info!("Received Ctrl+C");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_handler_does_not_cancel_without_signal() {
        let token = CancellationToken::new();
        let _handle = spawn_signal_handler(token.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!token.is_cancelled());
        token.cancel();
    }

    #[tokio::test]
    async fn test_signal_handler_exits_on_shutdown() {
        let token = CancellationToken::new();
        let handle = spawn_signal_handler(token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
