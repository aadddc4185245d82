use std::pin::pin;

use futures_util::StreamExt;
use log::{debug, warn};

use crate::agent::conversation::ConversationThread;
use crate::agent::error::Result;
use crate::agent::message::WireMessage;

use super::http::DeckClient;
use super::sse::{ChatEvent, decode_events};

/// 串流對話傳輸：送出一輪對話並把回傳的事件逐一套用到對話紀錄。
#[derive(Debug, Clone)]
pub struct ChatTransport {
    client: DeckClient,
}

impl ChatTransport {
    pub fn new(client: DeckClient) -> Self {
        Self { client }
    }

    /// 送出 `messages`，回傳本輪收到的完整助理文字。
    ///
    /// 串流中的錯誤事件只會加入對話紀錄，不會讓呼叫失敗；非 2xx 回應或
    /// 讀取中斷則以錯誤回傳，此時已收到的內容仍保留在 `thread` 中。
    pub async fn send(
        &self,
        agent_id: &str,
        session_id: &str,
        session_token: Option<&str>,
        messages: &[WireMessage],
        thread: &mut ConversationThread,
    ) -> Result<String> {
        self.send_observed(agent_id, session_id, session_token, messages, thread, &mut |_: &ChatEvent| {})
            .await
    }

    /// 與 [`send`](Self::send) 相同，另外把每個事件交給 `observer`。
    pub async fn send_observed(
        &self,
        agent_id: &str,
        session_id: &str,
        session_token: Option<&str>,
        messages: &[WireMessage],
        thread: &mut ConversationThread,
        observer: &mut (dyn FnMut(&ChatEvent) + Send),
    ) -> Result<String> {
        debug!("Chat turn for {} with {} messages", agent_id, messages.len());
        let response = self
            .client
            .open_chat(session_id, session_token, messages)
            .await?;

        let mut events = pin!(decode_events(response.bytes_stream()));
        let mut reply = String::new();
        while let Some(event) = events.next().await {
            let event = event?;
            match &event {
                ChatEvent::Content(chunk) => reply.push_str(chunk),
                ChatEvent::Error(message) => warn!("Agent {} reported: {}", agent_id, message),
            }
            observer(&event);
            thread.apply_event(&event);
        }
        Ok(reply)
    }
}
