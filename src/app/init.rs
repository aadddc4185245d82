use std::path::PathBuf;
use std::sync::Arc;

use agentdeck::DeckSettings;
use agentdeck::agent::{AgentDeck, DeckClient, DraftForm, FileSessionStorage, SessionStore};
use anyhow::Result;
use log::{debug, info};

use super::App;

impl App {
    /// Creates the console state and starts background polling.
    ///
    /// Must be called inside the tokio runtime.
    pub fn new(workspace_root: PathBuf) -> Result<Self> {
        let canonical_root = workspace_root.canonicalize().unwrap_or(workspace_root);
        debug!("Initializing AgentDeck console in {}", canonical_root.display());

        let settings = DeckSettings::load(&canonical_root)?;
        let sessions = Arc::new(SessionStore::load(FileSessionStorage::new(
            &settings.session_store,
        )));
        info!(
            "Backend {} ({} stored sessions)",
            settings.api_base,
            sessions.len()
        );

        let client = DeckClient::new(settings.api_base.clone());
        let mut deck = AgentDeck::new(client, sessions, DraftForm::default().shared())
            .with_genesis_delay(settings.genesis_step());
        if let Some(key) = settings.resolved_api_key() {
            deck.workbench_mut().set_api_key(key);
        }
        deck.start_polling(settings.poll_interval());

        Ok(Self {
            running: true,
            deck,
            settings,
            workspace_root: canonical_root,
            log_tail: None,
            last_poll_error: None,
        })
    }

    pub fn print_banner(&self) {
        println!("AgentDeck console, backend {}", self.settings.api_base);
        println!("Type `help` for commands; plain text is sent to the selected agent.");
    }

    pub fn shutdown(&mut self) {
        self.deck.stop_polling();
        self.log_tail = None;
    }
}
