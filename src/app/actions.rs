use std::io::Write;

use agentdeck::agent::config::{PERMISSION_MODES, lock_draft, parse_list};
use agentdeck::agent::{
    ApplyOutcome, ArchitectOutcome, ChatEvent, DeckError, TurnOutcome,
};
use log::debug;

use super::commands::{Command, DraftField, HELP};
use super::{App, LogTail};

impl App {
    /// Parses and runs one input line.
    pub async fn handle_line(&mut self, line: &str) {
        match Command::parse(line) {
            Ok(Some(command)) => self.execute(command).await,
            Ok(None) => {}
            Err(message) => println!("{message}"),
        }
    }

    /// The single place where console commands are executed.
    pub(crate) async fn execute(&mut self, command: Command) {
        debug!("Executing command {:?}", command);
        match command {
            Command::Agents => self.list_agents().await,
            Command::Select(agent_id) => {
                self.deck.select(agent_id.clone());
                println!("selected {agent_id}");
            }
            Command::Architect(prompt) => self.submit_architect(prompt).await,
            Command::Key(key) => {
                // Session only: `save` never writes the key to disk.
                self.deck.workbench_mut().set_api_key(key);
                self.deck.workbench_mut().dismiss_key_prompt();
                println!("API key set for this session");
            }
            Command::Set(field, value) => self.set_draft_field(field, value),
            Command::Draft => self.print_draft(),
            Command::Launch => match self.deck.launch().await {
                Ok(agent_id) => println!("launched {agent_id}"),
                Err(err) => println!("! {err}"),
            },
            Command::Apply => self.apply().await,
            Command::Rollback => match self.deck.rollback().await {
                Ok(ApplyOutcome::Applied) => println!("rolled back to the last good config"),
                Ok(_) => println!("nothing to roll back"),
                Err(err) => println!("! rollback failed: {err}"),
            },
            Command::Start(agent_id) => {
                if let Some(agent_id) = self.target(agent_id) {
                    report(self.deck.start_agent(&agent_id).await, "started");
                }
            }
            Command::Stop(agent_id) => {
                if let Some(agent_id) = self.target(agent_id) {
                    report(self.deck.stop_agent(&agent_id).await, "stopped");
                }
            }
            Command::Delete(agent_id) => {
                if let Some(agent_id) = self.target(agent_id) {
                    report(self.deck.delete_agent(&agent_id).await, "deleted");
                }
            }
            Command::Chat(text) => self.chat(Some(text)).await,
            Command::Retry => self.chat(None).await,
            Command::Logs(agent_id) => self.toggle_logs(agent_id).await,
            Command::State => self.print_state(),
            Command::Save => match self.settings.save_to_file(&self.workspace_root) {
                Ok(()) => println!("settings saved"),
                Err(err) => println!("! {err:#}"),
            },
            Command::Help => println!("{HELP}"),
            Command::Quit => self.running = false,
        }
    }

    async fn list_agents(&mut self) {
        if let Err(err) = self.deck.refresh_agents().await {
            println!("! {err}");
        }
        let agents = self.deck.agents();
        if agents.is_empty() {
            println!("no agents");
            return;
        }
        let selected = self.deck.selected_agent_id().map(str::to_string);
        for agent in agents {
            let marker = if selected.as_deref() == Some(agent.agent_id.as_str()) { "*" } else { " " };
            let port = agent
                .host_port
                .map(|port| format!(" :{port}"))
                .unwrap_or_default();
            println!(
                "{} {} {:?} {}{}",
                marker,
                agent.agent_id,
                agent.normalized_status(),
                agent.display_name(),
                port
            );
        }
    }

    async fn submit_architect(&mut self, prompt: String) {
        self.deck.workbench_mut().set_architect_prompt(prompt);
        println!("generating blueprint...");
        match self.deck.submit_architect_prompt().await {
            ArchitectOutcome::Launched { agent_id } => println!("launched {agent_id}"),
            ArchitectOutcome::NeedsApiKey => {
                println!("the backend needs an API key: run `key <api-key>` and try again")
            }
            ArchitectOutcome::Failed => {
                let message = self.deck.workbench().architect_error().unwrap_or("Blueprint generation failed");
                println!("! {message}");
            }
            ArchitectOutcome::Superseded => println!("blueprint fill was replaced"),
            ArchitectOutcome::Ignored => println!(
                "architect is busy or the prompt is empty (state: {})",
                self.deck.workbench().state()
            ),
        }
    }

    async fn apply(&mut self) {
        match self.deck.apply_config().await {
            ApplyOutcome::Applied => println!("config applied"),
            ApplyOutcome::Failed => {
                let message = self.deck.workbench().reload_error().unwrap_or_default();
                println!("! apply failed: {message}");
            }
            ApplyOutcome::Ignored => println!("select an agent first, or wait for the current operation"),
        }
    }

    async fn chat(&mut self, text: Option<String>) {
        let mut print_chunk = |event: &ChatEvent| {
            if let ChatEvent::Content(chunk) = event {
                print!("{chunk}");
                let _ = std::io::stdout().flush();
            }
        };
        let outcome = match text {
            Some(text) => self.deck.send_message_with(&text, &mut print_chunk).await,
            None => self.deck.retry_with(&mut print_chunk).await,
        };
        match outcome {
            Ok(TurnOutcome::Replied(reply)) => {
                if !reply.ends_with('\n') {
                    println!();
                }
            }
            Ok(TurnOutcome::Failed(_)) => {
                if let Some(last) = self
                    .deck
                    .selected_agent_id()
                    .and_then(|agent_id| self.deck.conversation(agent_id))
                    .and_then(|thread| thread.last())
                    .filter(|message| message.is_error())
                {
                    println!("\n{}", last.content);
                }
            }
            Ok(TurnOutcome::Skipped) => println!("nothing to send"),
            Err(err) => println!("! {err}"),
        }
    }

    async fn toggle_logs(&mut self, agent_id: Option<String>) {
        if let Some(tail) = self.log_tail.take() {
            println!("stopped log tail for {}", tail.agent_id);
            if agent_id.is_none() || agent_id.as_deref() == Some(tail.agent_id.as_str()) {
                return;
            }
        }
        let Some(agent_id) = self.target(agent_id) else {
            return;
        };
        match self.deck.logs(&agent_id).await {
            Ok(stream) => {
                println!("tailing logs for {agent_id}");
                self.log_tail = Some(LogTail { agent_id, stream });
            }
            Err(err) => println!("! {err}"),
        }
    }

    fn set_draft_field(&mut self, field: DraftField, value: String) {
        if field == DraftField::PermissionMode && !PERMISSION_MODES.contains(&value.as_str()) {
            println!("permission_mode must be one of: {}", PERMISSION_MODES.join(", "));
            return;
        }
        let mut form = lock_draft(self.deck.draft());
        match field {
            DraftField::Id => form.config_id = value,
            DraftField::Name => form.name = value,
            DraftField::Description => form.description = value,
            DraftField::Prompt => {
                form.use_custom_prompt = !value.trim().is_empty();
                form.system_prompt = value;
            }
            DraftField::Model => form.model = value,
            DraftField::MaxTurns => form.max_turns = value,
            DraftField::PermissionMode => form.permission_mode = value,
            DraftField::Tools => form.allowed_tools = parse_list(&value),
            DraftField::Mcp => form.mcp_servers_json = value,
            DraftField::Env => form.mcp_env_json = value,
        }
        if let Err(message) = form.validate() {
            println!("! {message}");
        }
    }

    fn print_draft(&self) {
        let config = lock_draft(self.deck.draft()).to_config();
        match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{json}"),
            Err(err) => println!("! {err}"),
        }
    }

    fn print_state(&self) {
        let workbench = self.deck.workbench();
        println!("workbench: {}", workbench.state());
        let selected = match self.deck.selected_agent() {
            Some(agent) => format!("{} ({:?})", agent.agent_id, agent.normalized_status()),
            None => self.deck.selected_agent_id().unwrap_or("(none)").to_string(),
        };
        println!("selected:  {selected}");
        println!(
            "polling:   {}",
            if workbench.polling_paused() { "paused" } else { "active" }
        );
        println!("rollback:  {}", if workbench.can_rollback() { "available" } else { "-" });
        if workbench.show_key_prompt() {
            println!("api key:   required");
        }
        if let Some(error) = workbench.architect_error() {
            println!("architect: {error}");
        }
        if let Some(error) = workbench.reload_error() {
            println!("reload:    {error}");
        }
        if let Some(tail) = &self.log_tail {
            println!("logs:      {}", tail.agent_id);
        }
    }

    /// Resolves an explicit agent id or falls back to the selection.
    fn target(&self, agent_id: Option<String>) -> Option<String> {
        let target = agent_id.or_else(|| self.deck.selected_agent_id().map(str::to_string));
        if target.is_none() {
            println!("! {}", DeckError::NoAgentSelected);
        }
        target
    }
}

fn report(result: agentdeck::agent::Result<()>, done: &str) {
    match result {
        Ok(()) => println!("{done}"),
        Err(err) => println!("! {err}"),
    }
}
