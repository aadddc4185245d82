use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::message::AgentInfo;

/// 單一代理目前有效的會話憑證。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSession {
    pub agent_id: String,
    pub session_id: String,
    /// 只透過列表得知的代理沒有權杖，後端不會在列表中回傳權杖。
    pub session_token: Option<String>,
}

/// 持久化時的單筆資料格式：`{ "sessionId": ..., "sessionToken": ... }`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    #[serde(default)]
    session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_token: Option<String>,
}

/// 會話對照表的持久化後端，整份對照表以單一 JSON 字串讀寫。
pub trait SessionStorage: Send + Sync {
    /// 讀取先前儲存的內容；不存在時回傳 `None`。
    fn load(&self) -> io::Result<Option<String>>;
    /// 以 `raw` 取代目前儲存的內容。
    fn save(&self, raw: &str) -> io::Result<()>;
}

/// 把對照表寫入單一 JSON 檔案，寫入時先寫暫存檔再改名。
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn save(&self, raw: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, raw)?;
        fs::rename(&temp_path, &self.path)
    }
}

/// 只存在記憶體中的儲存後端。
#[derive(Default)]
pub struct MemorySessionStorage {
    raw: Mutex<Option<String>>,
}

impl MemorySessionStorage {
    pub fn with_contents(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.raw.lock().ok().and_then(|raw| raw.clone())
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.contents())
    }

    fn save(&self, raw: &str) -> io::Result<()> {
        let mut slot = self
            .raw
            .lock()
            .map_err(|_| io::Error::other("session storage lock poisoned"))?;
        *slot = Some(raw.to_string());
        Ok(())
    }
}

/// 代理 ID 到會話憑證的持久對照表，是所有代理相關呼叫的驗證來源。
///
/// 每個操作都在鎖內對最新的對照表做「讀取－修改－寫回」，並在變更後把整份
/// 對照表寫入儲存後端，因此不會有寫入者拿著過期的副本覆蓋別人的更新。
pub struct SessionStore {
    sessions: Mutex<BTreeMap<String, StoredSession>>,
    storage: Box<dyn SessionStorage>,
}

impl SessionStore {
    /// 從儲存後端載入；內容不存在或損毀時從空表開始，不會失敗。
    pub fn load(storage: impl SessionStorage + 'static) -> Self {
        let sessions = match storage.load() {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!("Ignoring corrupt session store: {}", err);
                BTreeMap::new()
            }),
            Ok(None) => BTreeMap::new(),
            Err(err) => {
                warn!("Failed to read session store: {}", err);
                BTreeMap::new()
            }
        };
        debug!("Loaded {} stored agent sessions", sessions.len());
        Self {
            sessions: Mutex::new(sessions),
            storage: Box::new(storage),
        }
    }

    /// 不落地的對照表。
    pub fn in_memory() -> Self {
        Self::load(MemorySessionStorage::default())
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentSession> {
        self.lock().get(agent_id).map(|stored| AgentSession {
            agent_id: agent_id.to_string(),
            session_id: stored.session_id.clone(),
            session_token: stored.session_token.clone(),
        })
    }

    /// 同時取代會話 ID 與權杖，兩者永遠一起前進。
    pub fn put(
        &self,
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        session_token: impl Into<String>,
    ) {
        let mut sessions = self.lock();
        sessions.insert(
            agent_id.into(),
            StoredSession {
                session_id: session_id.into(),
                session_token: Some(session_token.into()),
            },
        );
        self.persist(&sessions);
    }

    pub fn remove(&self, agent_id: &str) -> Option<AgentSession> {
        let mut sessions = self.lock();
        let removed = sessions.remove(agent_id)?;
        self.persist(&sessions);
        Some(AgentSession {
            agent_id: agent_id.to_string(),
            session_id: removed.session_id,
            session_token: removed.session_token,
        })
    }

    /// 依代理列表更新會話 ID，權杖保持不變。回傳變更的筆數。
    ///
    /// 沒有回報 `session_id` 的代理會被略過；只有在有變更時才寫回儲存後端。
    pub fn reconcile(&self, observed: &[AgentInfo]) -> usize {
        let mut sessions = self.lock();
        let mut changed = 0;
        for agent in observed {
            let Some(session_id) = agent.session_id.as_deref() else {
                continue;
            };
            let entry = sessions
                .entry(agent.agent_id.clone())
                .or_insert_with(|| StoredSession {
                    session_id: String::new(),
                    session_token: None,
                });
            if entry.session_id != session_id {
                debug!(
                    "Session for {} moved {} -> {}",
                    agent.agent_id, entry.session_id, session_id
                );
                entry.session_id = session_id.to_string();
                changed += 1;
            }
        }
        if changed > 0 {
            self.persist(&sessions);
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredSession>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, sessions: &BTreeMap<String, StoredSession>) {
        let raw = match serde_json::to_string(sessions) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Failed to serialize session store: {}", err);
                return;
            }
        };
        if let Err(err) = self.storage.save(&raw) {
            warn!("Failed to persist session store: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn observed(agent_id: &str, session_id: Option<&str>) -> AgentInfo {
        AgentInfo {
            agent_id: agent_id.into(),
            session_id: session_id.map(String::from),
            ..AgentInfo::default()
        }
    }

    /// 讓測試在交出所有權後仍能檢查寫入內容。
    struct SharedMemory(Arc<MemorySessionStorage>);

    impl SessionStorage for SharedMemory {
        fn load(&self) -> io::Result<Option<String>> {
            self.0.load()
        }
        fn save(&self, raw: &str) -> io::Result<()> {
            self.0.save(raw)
        }
    }

    #[test]
    fn put_replaces_both_fields_together() {
        let store = SessionStore::in_memory();
        store.put("agent-1", "s1", "t1");
        store.put("agent-1", "s2", "t2");
        let session = store.get("agent-1").unwrap();
        assert_eq!(session.session_id, "s2");
        assert_eq!(session.session_token.as_deref(), Some("t2"));
    }

    #[test]
    fn reconcile_updates_session_id_and_keeps_token() {
        let store = SessionStore::in_memory();
        store.put("agent-1", "sid1", "tok1");

        let changed = store.reconcile(&[observed("agent-1", Some("sid2"))]);

        assert_eq!(changed, 1);
        let session = store.get("agent-1").unwrap();
        assert_eq!(session.session_id, "sid2");
        assert_eq!(session.session_token.as_deref(), Some("tok1"));
    }

    #[test]
    fn reconcile_ignores_matching_and_missing_session_ids() {
        let memory = Arc::new(MemorySessionStorage::default());
        let store = SessionStore::load(SharedMemory(Arc::clone(&memory)));
        store.put("agent-1", "sid1", "tok1");
        let before = memory.contents();

        let changed = store.reconcile(&[observed("agent-1", Some("sid1")), observed("agent-2", None)]);

        assert_eq!(changed, 0);
        assert!(store.get("agent-2").is_none());
        assert_eq!(memory.contents(), before);
    }

    #[test]
    fn reconcile_learns_unknown_agents_without_token() {
        let store = SessionStore::in_memory();
        store.reconcile(&[observed("agent-9", Some("sid9"))]);
        let session = store.get("agent-9").unwrap();
        assert_eq!(session.session_id, "sid9");
        assert_eq!(session.session_token, None);
    }

    #[test]
    fn every_mutation_persists_the_full_map() {
        let memory = Arc::new(MemorySessionStorage::default());
        let store = SessionStore::load(SharedMemory(Arc::clone(&memory)));
        store.put("agent-1", "s1", "t1");
        store.put("agent-2", "s2", "t2");
        let saved: serde_json::Value = serde_json::from_str(&memory.contents().unwrap()).unwrap();
        assert_eq!(
            saved,
            serde_json::json!({
                "agent-1": { "sessionId": "s1", "sessionToken": "t1" },
                "agent-2": { "sessionId": "s2", "sessionToken": "t2" }
            })
        );

        store.remove("agent-1");
        let saved: serde_json::Value = serde_json::from_str(&memory.contents().unwrap()).unwrap();
        assert!(saved.get("agent-1").is_none());
    }

    #[test]
    fn corrupt_storage_loads_as_empty() {
        let store = SessionStore::load(MemorySessionStorage::with_contents("{not json"));
        assert!(store.is_empty());
    }

    #[test]
    fn file_storage_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.json");

        let store = SessionStore::load(FileSessionStorage::new(&path));
        store.put("agent-1", "s1", "t1");
        drop(store);

        let reloaded = SessionStore::load(FileSessionStorage::new(&path));
        let session = reloaded.get("agent-1").unwrap();
        assert_eq!(session.session_id, "s1");
        assert_eq!(session.session_token.as_deref(), Some("t1"));
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let store = SessionStore::load(FileSessionStorage::new(dir.path().join("absent.json")));
        assert!(store.is_empty());
    }
}
