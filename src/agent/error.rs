//! Error types shared by every agent-facing operation.

/// Result alias used across the `agent` module.
pub type Result<T, E = DeckError> = std::result::Result<T, E>;

/// Everything that can go wrong while talking to the AgentDeck backend.
///
/// The `Display` output of each variant is what ends up in front of the
/// operator (status line, error banner, or an `[error] ...` chat entry), so
/// response body text is carried verbatim wherever the backend sent one.
#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    /// The request never produced an HTTP response (connection refused, DNS, timeout ...).
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    /// The backend answered with a non-success status.
    #[error("{detail}")]
    Status { status: u16, detail: String },
    /// The chat endpoint refused the turn or returned no body stream.
    #[error("{0}")]
    Chat(String),
    /// Blueprint or intent endpoints answered `400`, meaning no API key is configured.
    #[error("API key required")]
    ApiKeyRequired,
    /// No usable session credentials are stored for the agent.
    #[error("{0}")]
    MissingSession(String),
    #[error("Select an agent before sending a message.")]
    NoAgentSelected,
    #[error("Agent is not running. Start the agent before chatting.")]
    AgentNotRunning,
    /// Another chat turn is still streaming.
    #[error("A response is still streaming")]
    Busy,
    /// Draft form content that cannot be turned into a config.
    #[error("{0}")]
    Config(String),
    #[error("log stream: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl DeckError {
    /// Builds a `Status` error from a response body, falling back to `fallback`
    /// when the body is empty.
    pub(crate) fn status(status: u16, body: String, fallback: impl FnOnce() -> String) -> Self {
        let detail = if body.trim().is_empty() {
            fallback()
        } else {
            body
        };
        DeckError::Status { status, detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_prefers_body_text() {
        let err = DeckError::status(502, "bad gateway".into(), || "fallback".into());
        assert_eq!(err.to_string(), "bad gateway");
        assert!(matches!(err, DeckError::Status { status: 502, .. }));
    }

    #[test]
    fn status_error_uses_fallback_for_blank_body() {
        let err = DeckError::status(500, "  ".into(), || "Failed to launch agent (500)".into());
        assert_eq!(err.to_string(), "Failed to launch agent (500)");
    }
}
