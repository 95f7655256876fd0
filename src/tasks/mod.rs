//! Fire-and-forget background work, joined before process exit.

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Collects named background tasks (currently the cache save) so they can
/// be awaited at shutdown without ever blocking the critical path.
#[derive(Default)]
pub struct BackgroundTaskCoordinator {
    pending: Vec<(String, JoinHandle<()>)>,
}

impl BackgroundTaskCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, "Spawning background task");
        self.pending.push((name, tokio::spawn(future)));
    }

    pub fn in_flight(&self) -> usize {
        self.pending.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Await every pending task. Individual failures are logged and never
    /// propagate; the primary session outcome is already decided.
    pub async fn drain(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let outstanding = self.in_flight();
        info!(
            total = self.pending.len(),
            outstanding, "Draining background tasks"
        );

        let (names, handles): (Vec<_>, Vec<_>) = self.pending.drain(..).unzip();
        let results = join_all(handles).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                warn!(task = %name, error = %e, "Background task panicked");
            }
        }
    }
}
