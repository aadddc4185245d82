//! `transport` 模組負責與 AgentDeck 後端的所有網路通訊。

/// `http` 模組：REST API 客戶端 `DeckClient`。
pub mod http;
/// `sse` 模組：對話串流的事件解碼。
pub mod sse;
/// `chat` 模組：一輪串流對話的傳輸。
pub mod chat;
/// `logs` 模組：容器日誌的 WebSocket 串流。
pub mod logs;

pub use chat::ChatTransport;
pub use http::DeckClient;
pub use logs::{LogEvent, LogStream};
pub use sse::{ChatEvent, SseDecoder, decode_events};
