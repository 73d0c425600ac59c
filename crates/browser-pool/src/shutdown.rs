//! Process shutdown - release every browser resource on Ctrl-C / SIGTERM

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::manager::ResourceManager;

/// Spawn a task that runs `cleanup_all` once the process is asked to stop
pub fn install_shutdown_handler(manager: Arc<ResourceManager>) -> JoinHandle<()> {
    tokio::spawn(shutdown_on(manager, termination()))
}

/// Run `cleanup_all` when `signal` resolves
pub async fn shutdown_on<F>(manager: Arc<ResourceManager>, signal: F)
where
    F: Future<Output = ()>,
{
    signal.await;
    tracing::info!("[Shutdown] Termination requested, releasing browser resources");
    manager.cleanup_all().await;
}

#[cfg(unix)]
async fn termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!("[Shutdown] Failed to install SIGTERM handler: {}", e);
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = ctrl_c() => {}
        _ = sigterm.recv() => tracing::info!("[Shutdown] Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn termination() {
    ctrl_c().await
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("[Shutdown] Received Ctrl+C"),
        Err(e) => {
            // Without a handler there is nothing to wait for
            tracing::warn!("[Shutdown] Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::test_manager;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_cleanup_runs_on_signal() {
        let (manager, _control) = test_manager(3);
        let id = manager.create_resource(None).await.unwrap();
        manager.create_child(&id).await.unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(shutdown_on(manager.clone(), async move {
            let _ = rx.await;
        }));

        assert_eq!(manager.live_pages(), 1);
        tx.send(()).unwrap();
        task.await.unwrap();

        assert_eq!(manager.live_pages(), 0);
        assert!(manager.list_resources().is_empty());
        assert!(!manager.stats().await.connected);
    }
}
