//! Live-run registry
//!
//! In-memory map from run id to the execution handle of a currently-live
//! run. The map is owned by a single actor task; engine code talks to it
//! through messages, so cancellation and subscription never contend on a
//! lock shared with the log path. Entries are registered when a run is
//! created and removed at terminal state regardless of outcome.
//!
//! The registry is the sole source of truth for live log subscription and
//! cancellation; the persistent store is authoritative for historical reads.

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Execution handle for a live run.
#[derive(Clone)]
pub struct RunHandle {
    pub cancel: CancellationToken,
    pub log_tx: broadcast::Sender<String>,
}

enum Command {
    Register { run_id: Uuid, handle: RunHandle },
    Deregister { run_id: Uuid },
    Cancel { run_id: Uuid, reply: oneshot::Sender<bool> },
    Subscribe { run_id: Uuid, reply: oneshot::Sender<Option<broadcast::Receiver<String>>> },
    LiveCount { reply: oneshot::Sender<usize> },
}

/// Client handle to the registry actor. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    tx: mpsc::Sender<Command>,
}

impl Registry {
    /// Spawns the owner task and returns a client handle.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_actor(rx));
        Self { tx }
    }

    pub async fn register(&self, run_id: Uuid, handle: RunHandle) {
        let _ = self.tx.send(Command::Register { run_id, handle }).await;
    }

    pub async fn deregister(&self, run_id: Uuid) {
        let _ = self.tx.send(Command::Deregister { run_id }).await;
    }

    /// Triggers the run's cancellation token. Returns false when the run is
    /// not live (already terminal or never admitted).
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        let (reply, response) = oneshot::channel();
        if self.tx.send(Command::Cancel { run_id, reply }).await.is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Attaches a live log subscriber to the run, if it is live.
    pub async fn subscribe(&self, run_id: Uuid) -> Option<broadcast::Receiver<String>> {
        let (reply, response) = oneshot::channel();
        self.tx.send(Command::Subscribe { run_id, reply }).await.ok()?;
        response.await.ok().flatten()
    }

    /// Number of currently registered runs.
    pub async fn live_count(&self) -> usize {
        let (reply, response) = oneshot::channel();
        if self.tx.send(Command::LiveCount { reply }).await.is_err() {
            return 0;
        }
        response.await.unwrap_or(0)
    }
}

async fn run_actor(mut rx: mpsc::Receiver<Command>) {
    let mut runs: HashMap<Uuid, RunHandle> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Register { run_id, handle } => {
                runs.insert(run_id, handle);
            }
            Command::Deregister { run_id } => {
                runs.remove(&run_id);
            }
            Command::Cancel { run_id, reply } => {
                let found = match runs.get(&run_id) {
                    Some(handle) => {
                        handle.cancel.cancel();
                        true
                    }
                    None => false,
                };
                let _ = reply.send(found);
            }
            Command::Subscribe { run_id, reply } => {
                let receiver = runs.get(&run_id).map(|handle| handle.log_tx.subscribe());
                let _ = reply.send(receiver);
            }
            Command::LiveCount { reply } => {
                let _ = reply.send(runs.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> RunHandle {
        let (log_tx, _) = broadcast::channel(16);
        RunHandle { cancel: CancellationToken::new(), log_tx }
    }

    #[tokio::test]
    async fn test_register_and_cancel() {
        let registry = Registry::spawn();
        let run_id = Uuid::new_v4();
        let h = handle();
        let token = h.cancel.clone();

        registry.register(run_id, h).await;
        assert_eq!(registry.live_count().await, 1);

        assert!(registry.cancel(run_id).await);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_reports_not_found() {
        let registry = Registry::spawn();
        assert!(!registry.cancel(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_deregister_removes_entry() {
        let registry = Registry::spawn();
        let run_id = Uuid::new_v4();

        registry.register(run_id, handle()).await;
        registry.deregister(run_id).await;

        assert_eq!(registry.live_count().await, 0);
        assert!(!registry.cancel(run_id).await);
        assert!(registry.subscribe(run_id).await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_receives_lines() {
        let registry = Registry::spawn();
        let run_id = Uuid::new_v4();
        let h = handle();
        let tx = h.log_tx.clone();

        registry.register(run_id, h).await;
        let mut rx = registry.subscribe(run_id).await.unwrap();

        tx.send("line".to_string()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), "line");
    }
}
