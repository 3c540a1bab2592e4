//! Shutdown: one token observed by every task, plus a tracker for live
//! drinker connections so the drain waits for their close frames.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

pub struct ShutdownCoordinator {
    token: CancellationToken,
    connections: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            connections: TaskTracker::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wrap a connection's future so [`ShutdownCoordinator::drain`] waits for it.
    pub fn track_connection<F>(&self, connection: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        self.connections.track_future(connection)
    }

    /// Connections currently tracked.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Cancel the token, then wait up to `timeout` for every tracked
    /// connection and every task in `background`. Returns `false` if the
    /// timeout expired first.
    pub async fn drain(&self, background: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.shutdown();
        self.connections.close();
        info!(
            connections = self.connections.len(),
            background = background.len(),
            timeout_ms = timeout.as_millis() as u64,
            "draining"
        );

        let everything = async {
            let _ = futures::future::join_all(background).await;
            self.connections.wait().await;
        };
        match tokio::time::timeout(timeout, everything).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    connections = self.connections.len(),
                    "drain timed out, abandoning remaining tasks"
                );
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_cancels_every_token() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn tracked_connections_are_counted_until_done() {
        let coord = ShutdownCoordinator::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(coord.track_connection(async move {
            let _ = rx.await;
        }));
        assert_eq!(coord.connection_count(), 1);

        tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(coord.connection_count(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_connections_that_flush_on_cancel() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let (flushed_tx, mut flushed_rx) = tokio::sync::oneshot::channel();
        let _conn = tokio::spawn(coord.track_connection(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = flushed_tx.send(());
        }));

        assert!(coord.drain(Vec::new(), Duration::from_secs(2)).await);
        // The connection had finished its teardown before drain returned.
        assert!(flushed_rx.try_recv().is_ok());
        assert_eq!(coord.connection_count(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_background_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });
        assert!(coord.drain(vec![handle], Duration::from_secs(1)).await);
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_stuck_connection() {
        let coord = ShutdownCoordinator::new();
        let _stuck = tokio::spawn(coord.track_connection(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));
        assert!(!coord.drain(Vec::new(), Duration::from_millis(50)).await);
        assert_eq!(coord.connection_count(), 1);
    }
}
