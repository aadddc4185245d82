//! Defines the console state.
//!
//! The `App` struct owns the `AgentDeck` and everything the console shows
//! between commands: the active log tail and the last reported poller error.

use std::path::PathBuf;

use agentdeck::DeckSettings;
use agentdeck::agent::{AgentDeck, LogStream};

/// The console application state.
pub struct App {
    /// Cleared by `quit` or when stdin closes.
    pub running: bool,
    /// The client core driven by console commands.
    pub deck: AgentDeck,
    /// Settings loaded at startup; `save` writes them back.
    pub settings: DeckSettings,
    /// Directory holding `config/`.
    pub workspace_root: PathBuf,
    /// The container log currently being tailed, if any.
    pub log_tail: Option<LogTail>,
    /// Last poller error already printed, so it is reported once.
    pub last_poll_error: Option<String>,
}

/// A live log tail for one agent.
pub struct LogTail {
    pub agent_id: String,
    pub stream: LogStream,
}
