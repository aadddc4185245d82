use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::agent::config::{SharedDraft, lock_draft};
use crate::agent::conversation::{ConversationThread, Conversations};
use crate::agent::error::{DeckError, Result};
use crate::agent::genesis::GenesisScheduler;
use crate::agent::message::{AgentInfo, WireMessage};
use crate::agent::registry::AgentRegistry;
use crate::agent::session::{AgentSession, SessionStore};
use crate::agent::transport::{ChatEvent, ChatTransport, DeckClient, LogStream};
use crate::agent::workbench::{
    ApplyOutcome, ArchitectOutcome, Launcher, WorkbenchController,
};

/// Result of a chat turn that passed its preconditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream completed; carries the concatenated assistant text.
    Replied(String),
    /// The request or stream failed; an `[error] ...` entry was appended.
    Failed(String),
    /// Nothing to send (blank input, or no earlier user message to retry).
    Skipped,
}

/// Launches agents from the shared draft.
///
/// Kept apart from [`AgentDeck`] so the workbench can borrow it while the
/// deck holds the controller mutably.
pub struct DeckOps {
    client: DeckClient,
    sessions: Arc<SessionStore>,
    registry: Arc<AgentRegistry>,
    draft: SharedDraft,
}

#[async_trait]
impl Launcher for DeckOps {
    async fn launch(&self) -> Result<String> {
        let (config, mcp_env) = {
            let form = lock_draft(&self.draft);
            form.validate().map_err(DeckError::Config)?;
            (form.to_config(), form.mcp_env().map_err(DeckError::Config)?)
        };
        let created = self.client.launch(&config, mcp_env.as_ref()).await?;
        self.sessions
            .put(&created.agent_id, &created.session_id, &created.session_token);
        if let Err(err) = self.registry.refresh().await {
            warn!("Agent list refresh after launch failed: {}", err);
        }
        Ok(created.agent_id)
    }
}

/// The client core: agent selection, lifecycle calls, chat, and the workbench.
///
/// `AgentDeck` is the single entry point the console drives. All session
/// credentials flow through the shared [`SessionStore`].
pub struct AgentDeck {
    ops: DeckOps,
    workbench: WorkbenchController,
    chat: ChatTransport,
    conversations: Conversations,
    selected: Option<String>,
}

impl AgentDeck {
    pub fn new(client: DeckClient, sessions: Arc<SessionStore>, draft: SharedDraft) -> Self {
        let registry = Arc::new(AgentRegistry::new(client.clone(), Arc::clone(&sessions)));
        let workbench = WorkbenchController::new(
            client.clone(),
            Arc::clone(&sessions),
            Arc::clone(&registry),
            Arc::clone(&draft),
        );
        Self {
            ops: DeckOps {
                client: client.clone(),
                sessions,
                registry,
                draft,
            },
            workbench,
            chat: ChatTransport::new(client),
            conversations: Conversations::new(),
            selected: None,
        }
    }

    /// Replays generated blueprints into the draft one fragment every `step`.
    pub fn with_genesis_delay(mut self, step: Duration) -> Self {
        let scheduler = GenesisScheduler::for_draft(step, Arc::clone(&self.ops.draft));
        self.workbench = self.workbench.with_genesis(scheduler);
        self
    }

    pub fn client(&self) -> &DeckClient {
        &self.ops.client
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.ops.sessions
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.ops.registry
    }

    pub fn draft(&self) -> &SharedDraft {
        &self.ops.draft
    }

    pub fn workbench(&self) -> &WorkbenchController {
        &self.workbench
    }

    pub fn workbench_mut(&mut self) -> &mut WorkbenchController {
        &mut self.workbench
    }

    pub fn start_polling(&self, interval: Duration) {
        self.ops.registry.start(interval);
    }

    pub fn stop_polling(&self) {
        self.ops.registry.stop();
    }

    pub fn agents(&self) -> Vec<AgentInfo> {
        self.ops.registry.agents()
    }

    pub fn selected_agent_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_agent(&self) -> Option<AgentInfo> {
        self.selected
            .as_deref()
            .and_then(|agent_id| self.ops.registry.find(agent_id))
    }

    pub fn select(&mut self, agent_id: impl Into<String>) {
        let agent_id = agent_id.into();
        debug!("Selected agent {}", agent_id);
        self.selected = Some(agent_id);
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Selects the first known agent when nothing is selected yet.
    pub fn ensure_selection(&mut self) {
        if self.selected.is_none()
            && let Some(first) = self.ops.registry.agents().into_iter().next()
        {
            self.select(first.agent_id);
        }
    }

    pub fn conversation(&self, agent_id: &str) -> Option<&ConversationThread> {
        self.conversations.get(agent_id)
    }

    /// True while any chat turn is still streaming.
    pub fn is_streaming(&self) -> bool {
        self.conversations.is_streaming()
    }

    pub async fn refresh_agents(&mut self) -> Result<Vec<AgentInfo>> {
        let agents = self.ops.registry.refresh().await?;
        self.ensure_selection();
        Ok(agents)
    }

    /// Launches the current draft and selects the new agent.
    pub async fn launch(&mut self) -> Result<String> {
        let agent_id = self.ops.launch().await?;
        self.select(agent_id.clone());
        Ok(agent_id)
    }

    pub async fn start_agent(&mut self, agent_id: &str) -> Result<()> {
        let token = self.lifecycle_token(agent_id, "start")?;
        self.ops.client.start_agent(agent_id, &token).await?;
        info!("Started agent {}", agent_id);
        self.refresh_quietly().await;
        Ok(())
    }

    pub async fn stop_agent(&mut self, agent_id: &str) -> Result<()> {
        let token = self.lifecycle_token(agent_id, "stop")?;
        self.ops.client.stop_agent(agent_id, &token).await?;
        info!("Stopped agent {}", agent_id);
        self.refresh_quietly().await;
        Ok(())
    }

    /// Deletes the agent, forgets its session, and clears the selection if it
    /// pointed at the deleted agent.
    pub async fn delete_agent(&mut self, agent_id: &str) -> Result<()> {
        let token = self.lifecycle_token(agent_id, "delete")?;
        self.ops.client.delete_agent(agent_id, &token).await?;
        info!("Deleted agent {}", agent_id);
        self.ops.sessions.remove(agent_id);
        self.conversations.remove(agent_id);
        self.refresh_quietly().await;
        if self.selected.as_deref() == Some(agent_id) {
            self.clear_selection();
        }
        Ok(())
    }

    pub async fn submit_architect_prompt(&mut self) -> ArchitectOutcome {
        let outcome = self.workbench.submit_architect_prompt(&self.ops).await;
        if let ArchitectOutcome::Launched { agent_id } = &outcome {
            self.select(agent_id.clone());
        }
        outcome
    }

    /// Hot-reloads the draft into the selected agent.
    pub async fn apply_config(&mut self) -> ApplyOutcome {
        let selected = self.selected.clone();
        self.workbench.apply_config(selected.as_deref(), None).await
    }

    pub async fn rollback(&mut self) -> Result<ApplyOutcome> {
        let selected = self.selected.clone();
        self.workbench.rollback(selected.as_deref()).await
    }

    pub async fn logs(&self, agent_id: &str) -> Result<LogStream> {
        LogStream::connect(&self.ops.client.logs_url(agent_id)).await
    }

    pub async fn send_message(&mut self, text: &str) -> Result<TurnOutcome> {
        self.send_message_with(text, &mut |_: &ChatEvent| {}).await
    }

    /// Sends `text` to the selected agent, handing every stream event to
    /// `observer` as it arrives.
    pub async fn send_message_with(
        &mut self,
        text: &str,
        observer: &mut (dyn FnMut(&ChatEvent) + Send),
    ) -> Result<TurnOutcome> {
        let (agent_id, session) = self.chat_target()?;
        let query = text.trim();
        if query.is_empty() {
            return Ok(TurnOutcome::Skipped);
        }
        self.run_turn(&agent_id, &session, query.to_string(), observer)
            .await
    }

    /// Re-sends the last user message, discarding everything after it.
    pub async fn retry(&mut self) -> Result<TurnOutcome> {
        self.retry_with(&mut |_: &ChatEvent| {}).await
    }

    pub async fn retry_with(
        &mut self,
        observer: &mut (dyn FnMut(&ChatEvent) + Send),
    ) -> Result<TurnOutcome> {
        let (agent_id, session) = self.chat_target()?;
        let Some(query) = self.conversations.thread_mut(&agent_id).take_last_query() else {
            return Ok(TurnOutcome::Skipped);
        };
        self.run_turn(&agent_id, &session, query, observer).await
    }

    fn chat_target(&self) -> Result<(String, AgentSession)> {
        let agent_id = self.selected.clone().ok_or(DeckError::NoAgentSelected)?;
        let running = self
            .ops
            .registry
            .find(&agent_id)
            .is_some_and(|agent| agent.is_running());
        if !running {
            return Err(DeckError::AgentNotRunning);
        }
        let session = self
            .ops
            .sessions
            .get(&agent_id)
            .filter(|session| {
                !session.session_id.is_empty()
                    && session.session_token.as_deref().is_some_and(|token| !token.is_empty())
            })
            .ok_or_else(|| {
                DeckError::MissingSession(
                    "Selected agent is missing a session token. Relaunch to create one.".into(),
                )
            })?;
        if self.is_streaming() {
            return Err(DeckError::Busy);
        }
        Ok((agent_id, session))
    }

    async fn run_turn(
        &mut self,
        agent_id: &str,
        session: &AgentSession,
        query: String,
        observer: &mut (dyn FnMut(&ChatEvent) + Send),
    ) -> Result<TurnOutcome> {
        let thread = self.conversations.thread_mut(agent_id);
        let mut outgoing: Vec<WireMessage> = thread.history();
        outgoing.push(WireMessage::user(query.clone()));

        let result = {
            let mut turn = thread.begin_turn(&query);
            self.chat
                .send_observed(
                    agent_id,
                    &session.session_id,
                    session.session_token.as_deref(),
                    &outgoing,
                    &mut turn,
                    observer,
                )
                .await
        };

        match result {
            Ok(reply) => {
                self.workbench.request_tool_suggestion(&query, &reply);
                Ok(TurnOutcome::Replied(reply))
            }
            Err(err) => {
                warn!("Chat turn with {} failed: {}", agent_id, err);
                let detail = err.to_string();
                self.conversations.thread_mut(agent_id).push_error(&detail);
                Ok(TurnOutcome::Failed(detail))
            }
        }
    }

    fn lifecycle_token(&self, agent_id: &str, action: &str) -> Result<String> {
        self.ops
            .sessions
            .get(agent_id)
            .and_then(|session| session.session_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| DeckError::MissingSession(format!("Missing session token for {action}.")))
    }

    async fn refresh_quietly(&mut self) {
        if let Err(err) = self.refresh_agents().await {
            warn!("Agent list refresh failed: {}", err);
        }
    }
}
