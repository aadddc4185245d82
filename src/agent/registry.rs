//! Periodic refresh of the agent list and reconciliation of stored sessions.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::error::Result;
use super::message::AgentInfo;
use super::session::SessionStore;
use super::transport::DeckClient;

/// Default delay between two background refreshes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(6000);

struct RegistryShared {
    client: DeckClient,
    sessions: Arc<SessionStore>,
    agents: RwLock<Vec<AgentInfo>>,
    last_error: Mutex<Option<String>>,
    paused: AtomicUsize,
    /// Bumped whenever a pause begins; a fetch that started under an older
    /// epoch may carry a pre-rotation session id and is discarded.
    epoch: AtomicU64,
}

impl RegistryShared {
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst) > 0
    }

    async fn refresh(&self) -> Result<Vec<AgentInfo>> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let result = self.client.list_agents().await;
        let agents = match result {
            Ok(agents) => agents,
            Err(err) => {
                self.set_last_error(Some(err.to_string()));
                return Err(err);
            }
        };
        self.set_last_error(None);

        if self.is_paused() || self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Discarding agent list fetched across a config reload");
            return Ok(agents);
        }
        let changed = self.sessions.reconcile(&agents);
        if changed > 0 {
            debug!("Reconciled {} session ids", changed);
        }
        if let Ok(mut slot) = self.agents.write() {
            *slot = agents.clone();
        }
        Ok(agents)
    }

    fn set_last_error(&self, error: Option<String>) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = error;
        }
    }
}

/// Keeps the known agent list fresh and the session store in sync with it.
pub struct AgentRegistry {
    shared: Arc<RegistryShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AgentRegistry {
    pub fn new(client: DeckClient, sessions: Arc<SessionStore>) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                client,
                sessions,
                agents: RwLock::new(Vec::new()),
                last_error: Mutex::new(None),
                paused: AtomicUsize::new(0),
                epoch: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Snapshot of the agent list from the last applied refresh.
    pub fn agents(&self) -> Vec<AgentInfo> {
        self.shared
            .agents
            .read()
            .map(|agents| agents.clone())
            .unwrap_or_default()
    }

    pub fn find(&self, agent_id: &str) -> Option<AgentInfo> {
        self.shared
            .agents
            .read()
            .ok()?
            .iter()
            .find(|agent| agent.agent_id == agent_id)
            .cloned()
    }

    /// Message of the last failed refresh, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    pub fn is_running(&self) -> bool {
        self.task_slot()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Fetches the list once and reconciles sessions.
    ///
    /// A list fetched while paused, or one whose fetch overlapped the start of a
    /// pause, is returned but neither published nor reconciled.
    pub async fn refresh(&self) -> Result<Vec<AgentInfo>> {
        self.shared.refresh().await
    }

    /// Suspends reconciliation until the returned guard is dropped.
    ///
    /// Pauses nest; polling resumes when the last guard goes away.
    pub fn pause(&self) -> PauseGuard {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.paused.fetch_add(1, Ordering::SeqCst);
        PauseGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Starts background polling; the first refresh runs immediately.
    /// Restarting replaces the previous loop.
    pub fn start(&self, interval: Duration) {
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if shared.is_paused() {
                    continue;
                }
                if let Err(err) = shared.refresh().await {
                    warn!("Agent list refresh failed: {}", err);
                }
            }
        });
        if let Some(previous) = self.task_slot().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self.task_slot().take() {
            task.abort();
        }
    }

    /// A panic while the slot was held must not leave a loop nobody can abort.
    fn task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AgentRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Holds the registry paused; dropping it releases the pause.
pub struct PauseGuard {
    shared: Arc<RegistryShared>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.shared.paused.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn registry(url: String) -> (Arc<SessionStore>, AgentRegistry) {
        let sessions = Arc::new(SessionStore::in_memory());
        let registry = AgentRegistry::new(DeckClient::new(url), Arc::clone(&sessions));
        (sessions, registry)
    }

    #[tokio::test]
    async fn refresh_reconciles_session_ids_and_keeps_tokens() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/agents")
            .with_status(200)
            .with_body(r#"[{"agent_id":"a1","status":"running","session_id":"sid2"}]"#)
            .create_async()
            .await;
        let (sessions, registry) = registry(server.url());
        sessions.put("a1", "sid1", "tok1");

        let agents = registry.refresh().await.unwrap();

        assert_eq!(agents.len(), 1);
        assert_eq!(registry.agents(), agents);
        let session = sessions.get("a1").unwrap();
        assert_eq!(session.session_id, "sid2");
        assert_eq!(session.session_token.as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn paused_refresh_is_not_applied() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/agents")
            .with_status(200)
            .with_body(r#"[{"agent_id":"a1","status":"running","session_id":"stale"}]"#)
            .create_async()
            .await;
        let (sessions, registry) = registry(server.url());
        sessions.put("a1", "fresh", "tok");

        {
            let _guard = registry.pause();
            assert!(registry.is_paused());
            registry.refresh().await.unwrap();
        }

        assert!(!registry.is_paused());
        assert_eq!(sessions.get("a1").unwrap().session_id, "fresh");
        assert!(registry.agents().is_empty());
    }

    #[tokio::test]
    async fn pauses_nest() {
        let (_, registry) = registry("http://127.0.0.1:9".into());
        let outer = registry.pause();
        let inner = registry.pause();
        drop(inner);
        assert!(registry.is_paused());
        drop(outer);
        assert!(!registry.is_paused());
    }

    #[tokio::test]
    async fn failed_refresh_is_recorded() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/agents")
            .with_status(500)
            .create_async()
            .await;
        let (_, registry) = registry(server.url());
        assert!(registry.refresh().await.is_err());
        assert_eq!(registry.last_error().as_deref(), Some("Failed to load agents (500)"));
    }

    #[tokio::test]
    async fn background_loop_fetches_immediately_and_stops() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/agents")
            .with_status(200)
            .with_body(r#"[{"agent_id":"a1","status":"exited"}]"#)
            .expect_at_least(1)
            .create_async()
            .await;
        let (_, registry) = registry(server.url());
        registry.start(Duration::from_secs(60));
        assert!(registry.is_running());

        for _ in 0..50 {
            if !registry.agents().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        registry.stop();

        mock.assert_async().await;
        assert_eq!(registry.agents()[0].agent_id, "a1");
        assert!(!registry.is_running());
    }

    #[tokio::test]
    async fn poisoned_task_slot_still_tracks_the_loop() {
        let server = Server::new_async().await;
        let (_, registry) = registry(server.url());
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _slot = registry.task.lock().unwrap();
            panic!("poison the task slot");
        }));
        assert!(poisoned.is_err());
        assert!(registry.task.is_poisoned());

        registry.start(Duration::from_secs(60));
        assert!(registry.is_running());
        registry.stop();
        assert!(!registry.is_running());
    }
}
