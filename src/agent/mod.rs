//! 代理管理核心。
//!
//! 此模組負責與 AgentDeck 後端互動的所有組件：會話憑證的保存、
//! 串流對話、藍圖的分段填入、工作台狀態機與代理列表輪詢。

// --- 子模組宣告 ---

/// `config` 模組：代理設定格式 `AgentConfig` 與草稿表單 `DraftForm`。
pub mod config;
/// `conversation` 模組：每個代理的對話紀錄與串流中的回覆。
pub mod conversation;
/// `error` 模組：所有代理操作共用的錯誤類型。
pub mod error;
/// `genesis` 模組：把產生的藍圖分段寫入草稿的排程器。
pub mod genesis;
/// `manager` 模組：整合所有組件的 `AgentDeck`。
pub mod manager;
/// `message` 模組：與後端交換的請求與回應格式。
pub mod message;
/// `registry` 模組：代理列表輪詢與會話同步。
pub mod registry;
/// `session` 模組：代理 ID 到會話憑證的持久對照表。
pub mod session;
/// `transport` 模組：HTTP、串流對話與日誌 WebSocket。
pub mod transport;
/// `workbench` 模組：草稿、啟動、熱重載的狀態機。
pub mod workbench;

// --- 公共 API 重新導出 ---

pub use config::{AgentConfig, DraftForm, SharedDraft};
pub use conversation::{ChatMessage, ConversationThread, Conversations};
pub use error::{DeckError, Result};
pub use genesis::{FillOutcome, GenesisScheduler, GenesisStep};
pub use manager::{AgentDeck, DeckOps, TurnOutcome};
pub use message::{AgentInfo, AgentStatus, Role};
pub use registry::{AgentRegistry, PauseGuard};
pub use session::{AgentSession, FileSessionStorage, SessionStore};
pub use transport::{ChatEvent, ChatTransport, DeckClient, LogEvent, LogStream};
pub use workbench::{ApplyOutcome, ArchitectOutcome, Launcher, WorkbenchController, WorkbenchState};
