//! AgentDeck 客戶端核心：啟動、設定與對話容器化的 Claude 代理。

pub mod agent;
pub mod settings;

pub use agent::{AgentDeck, DeckClient, DeckError, SessionStore};
pub use settings::DeckSettings;
