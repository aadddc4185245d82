use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use super::config::{AgentConfig, SharedDraft, lock_draft};
use super::error::{DeckError, Result};
use super::genesis::{FillOutcome, GenesisScheduler, build_genesis_steps};
use super::message::ToolSuggestion;
use super::registry::AgentRegistry;
use super::session::SessionStore;
use super::transport::DeckClient;

/// 工具建議請求的上限時間，逾時視同沒有建議。
const TOOL_SUGGESTION_TIMEOUT: Duration = Duration::from_secs(15);

type SuggestionSlot = Arc<Mutex<Option<ToolSuggestion>>>;

/// 工作台的生命週期狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkbenchState {
    #[default]
    Draft,
    Launching,
    Running,
    Reloading,
}

impl WorkbenchState {
    pub fn label(self) -> &'static str {
        match self {
            WorkbenchState::Draft => "draft",
            WorkbenchState::Launching => "launching",
            WorkbenchState::Running => "running",
            WorkbenchState::Reloading => "reloading",
        }
    }

    fn is_busy(self) -> bool {
        matches!(self, WorkbenchState::Launching | WorkbenchState::Reloading)
    }
}

impl fmt::Display for WorkbenchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 以目前草稿啟動新代理的能力，回傳新代理的 ID。
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<String>;
}

/// 架構師提交的結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchitectOutcome {
    Launched { agent_id: String },
    /// 後端缺少 API 金鑰，已顯示金鑰提示。
    NeedsApiKey,
    /// 產生或啟動失敗，訊息在 `architect_error`。
    Failed,
    /// genesis 填入被較新的排程取代，未啟動。
    Superseded,
    /// 目前狀態或輸入不接受提交。
    Ignored,
}

/// 套用設定的結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// 失敗訊息在 `reload_error`。
    Failed,
    Ignored,
}

/// 草稿、啟動、熱重載的狀態機。
///
/// ```text
/// Draft --submit--> Launching --ok--> Running
///   ^                   |               |
///   +------fail---------+            apply
///   |                                   v
///   +------------fail-------------- Reloading --ok--> Running
/// ```
pub struct WorkbenchController {
    client: DeckClient,
    sessions: Arc<SessionStore>,
    registry: Arc<AgentRegistry>,
    draft: SharedDraft,
    genesis: Option<GenesisScheduler>,
    state: WorkbenchState,
    architect_prompt: String,
    api_key: Option<String>,
    show_key_prompt: bool,
    architect_error: Option<String>,
    last_good_config: Option<AgentConfig>,
    reload_error: Option<String>,
    tool_suggestion: SuggestionSlot,
    suggestion_task: Option<JoinHandle<()>>,
}

impl WorkbenchController {
    pub fn new(
        client: DeckClient,
        sessions: Arc<SessionStore>,
        registry: Arc<AgentRegistry>,
        draft: SharedDraft,
    ) -> Self {
        Self {
            client,
            sessions,
            registry,
            draft,
            genesis: None,
            state: WorkbenchState::Draft,
            architect_prompt: String::new(),
            api_key: None,
            show_key_prompt: false,
            architect_error: None,
            last_good_config: None,
            reload_error: None,
            tool_suggestion: Arc::new(Mutex::new(None)),
            suggestion_task: None,
        }
    }

    /// 產生的藍圖改以 genesis 排程逐段寫入草稿。
    pub fn with_genesis(mut self, scheduler: GenesisScheduler) -> Self {
        self.genesis = Some(scheduler);
        self
    }

    pub fn state(&self) -> WorkbenchState {
        self.state
    }

    pub fn draft(&self) -> &SharedDraft {
        &self.draft
    }

    pub fn architect_prompt(&self) -> &str {
        &self.architect_prompt
    }

    pub fn set_architect_prompt(&mut self, prompt: impl Into<String>) {
        self.architect_prompt = prompt.into();
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// 設定架構師 API 金鑰；空字串視為清除。
    pub fn set_api_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.api_key = if key.trim().is_empty() { None } else { Some(key) };
    }

    pub fn show_key_prompt(&self) -> bool {
        self.show_key_prompt
    }

    pub fn dismiss_key_prompt(&mut self) {
        self.show_key_prompt = false;
    }

    pub fn architect_error(&self) -> Option<&str> {
        self.architect_error.as_deref()
    }

    pub fn reload_error(&self) -> Option<&str> {
        self.reload_error.as_deref()
    }

    pub fn last_good_config(&self) -> Option<&AgentConfig> {
        self.last_good_config.as_ref()
    }

    pub fn can_rollback(&self) -> bool {
        self.last_good_config.is_some()
    }

    pub fn polling_paused(&self) -> bool {
        self.registry.is_paused()
    }

    /// 最近一次完成的工具建議；請求仍在背景進行時為 `None`。
    pub fn tool_suggestion(&self) -> Option<ToolSuggestion> {
        lock_slot(&self.tool_suggestion).clone()
    }

    pub fn clear_tool_suggestion(&mut self) {
        lock_slot(&self.tool_suggestion).take();
    }

    /// 由架構師描述產生藍圖、寫入草稿並啟動代理。
    pub async fn submit_architect_prompt(&mut self, launcher: &dyn Launcher) -> ArchitectOutcome {
        if self.state != WorkbenchState::Draft {
            debug!("Architect submit ignored while {}", self.state);
            return ArchitectOutcome::Ignored;
        }
        if self.architect_prompt.trim().is_empty() {
            return ArchitectOutcome::Ignored;
        }
        self.architect_error = None;
        self.state = WorkbenchState::Launching;

        match self.generate_and_launch(launcher).await {
            Ok(Some(agent_id)) => {
                info!("Architect launched agent {}", agent_id);
                self.state = WorkbenchState::Running;
                ArchitectOutcome::Launched { agent_id }
            }
            Ok(None) => {
                self.state = WorkbenchState::Draft;
                ArchitectOutcome::Superseded
            }
            Err(DeckError::ApiKeyRequired) => {
                self.show_key_prompt = true;
                self.state = WorkbenchState::Draft;
                ArchitectOutcome::NeedsApiKey
            }
            Err(err) => {
                warn!("Architect submit failed: {}", err);
                let message = err.to_string();
                self.architect_error = Some(if message.trim().is_empty() {
                    "Blueprint generation failed".to_string()
                } else {
                    message
                });
                self.state = WorkbenchState::Draft;
                ArchitectOutcome::Failed
            }
        }
    }

    async fn generate_and_launch(&self, launcher: &dyn Launcher) -> Result<Option<String>> {
        let config = self
            .client
            .preview_blueprint(&self.architect_prompt, self.api_key.as_deref())
            .await?;

        match &self.genesis {
            Some(scheduler) => {
                lock_draft(&self.draft).hydrate_identity(&config);
                let fill = scheduler.schedule(build_genesis_steps(&config));
                if fill.await == FillOutcome::Superseded {
                    return Ok(None);
                }
            }
            None => {
                lock_draft(&self.draft).hydrate(&config);
            }
        }

        launcher.launch().await.map(Some)
    }

    /// 將設定熱重載到 `agent_id`；未指定設定時使用目前的草稿。
    ///
    /// 期間會暫停輪詢，避免舊的會話 ID 覆蓋輪換後的會話。
    pub async fn apply_config(
        &mut self,
        agent_id: Option<&str>,
        override_config: Option<AgentConfig>,
    ) -> ApplyOutcome {
        let Some(agent_id) = agent_id else {
            return ApplyOutcome::Ignored;
        };
        if self.state.is_busy() {
            debug!("Apply ignored while {}", self.state);
            return ApplyOutcome::Ignored;
        }
        self.reload_error = None;
        self.state = WorkbenchState::Reloading;
        let _pause = self.registry.pause();

        let config = override_config.unwrap_or_else(|| lock_draft(&self.draft).to_config());
        match self.patch(agent_id, &config).await {
            Ok(()) => {
                info!("Config applied to {}", agent_id);
                self.last_good_config = Some(config);
                self.state = WorkbenchState::Running;
                ApplyOutcome::Applied
            }
            Err(err) => {
                warn!("Config apply to {} failed: {}", agent_id, err);
                self.reload_error = Some(err.to_string());
                self.state = WorkbenchState::Draft;
                ApplyOutcome::Failed
            }
        }
    }

    /// 以最後一次成功套用的設定再送一次 PATCH；不改變狀態，也不清除 `reload_error`。
    pub async fn rollback(&mut self, agent_id: Option<&str>) -> Result<ApplyOutcome> {
        let (Some(agent_id), Some(snapshot)) = (agent_id, self.last_good_config.clone()) else {
            return Ok(ApplyOutcome::Ignored);
        };
        if self.state.is_busy() {
            return Ok(ApplyOutcome::Ignored);
        }
        let _pause = self.registry.pause();
        self.patch(agent_id, &snapshot).await?;
        info!("Rolled {} back to last good config", agent_id);
        Ok(ApplyOutcome::Applied)
    }

    async fn patch(&self, agent_id: &str, config: &AgentConfig) -> Result<()> {
        let token = self
            .sessions
            .get(agent_id)
            .and_then(|session| session.session_token);
        let reloaded = self
            .client
            .patch_config(agent_id, token.as_deref(), config)
            .await?;
        self.sessions
            .put(agent_id, reloaded.session_id, reloaded.session_token);
        Ok(())
    }

    /// 在背景請後端建議可加入的工具，立即返回。
    ///
    /// 新的請求會取消尚未完成的舊請求。失敗、逾時或 `400` 只會留下空的建議，
    /// 不會回報錯誤，也不會拖住呼叫端的對話流程。
    pub fn request_tool_suggestion(&mut self, user_text: &str, assistant_text: &str) {
        if user_text.is_empty() || assistant_text.is_empty() {
            return;
        }
        self.cancel_tool_suggestion();
        lock_slot(&self.tool_suggestion).take();

        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let slot = Arc::clone(&self.tool_suggestion);
        let user_text = user_text.to_string();
        let assistant_text = assistant_text.to_string();
        self.suggestion_task = Some(tokio::spawn(async move {
            let request = client.suggest_tools(&user_text, &assistant_text, api_key.as_deref());
            match tokio::time::timeout(TOOL_SUGGESTION_TIMEOUT, request).await {
                Ok(Ok(suggestion)) if !suggestion.suggested_tools.is_empty() => {
                    *lock_slot(&slot) = Some(suggestion);
                }
                Ok(Ok(_)) => {}
                Ok(Err(DeckError::ApiKeyRequired)) => {
                    debug!("Tool suggestions unavailable without API key")
                }
                Ok(Err(err)) => debug!("Tool suggestion failed: {}", err),
                Err(_) => debug!("Tool suggestion timed out"),
            }
        }));
    }

    /// 等待背景的工具建議請求結束。
    #[cfg(test)]
    pub(crate) async fn settle_tool_suggestion(&mut self) {
        if let Some(task) = self.suggestion_task.take() {
            let _ = task.await;
        }
    }

    fn cancel_tool_suggestion(&mut self) {
        if let Some(task) = self.suggestion_task.take() {
            task.abort();
        }
    }
}

impl Drop for WorkbenchController {
    fn drop(&mut self) {
        self.cancel_tool_suggestion();
    }
}

fn lock_slot(slot: &SuggestionSlot) -> MutexGuard<'_, Option<ToolSuggestion>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
