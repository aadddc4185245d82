use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use serde_json::Value;

use super::message::{Role, WireMessage};
use super::transport::ChatEvent;

/// 對話中的一則訊息。
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// 仍在接收串流內容的助理訊息。
    pub streaming: bool,
    /// 附加資訊，例如錯誤訊息會標記 `{"kind":"error"}`。
    pub metadata: Option<Value>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            streaming: false,
            metadata: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            streaming: false,
            metadata: None,
        }
    }

    /// 以助理身分顯示的錯誤訊息：`[error] ...`。
    pub fn error(message: &str) -> Self {
        Self {
            metadata: Some(serde_json::json!({ "kind": "error" })),
            ..Self::assistant(format!("[error] {message}"))
        }
    }

    pub fn is_error(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.get("kind"))
            .and_then(Value::as_str)
            == Some("error")
    }
}

/// 單一代理的對話紀錄。
#[derive(Debug, Clone, Default)]
pub struct ConversationThread {
    messages: Vec<ChatMessage>,
}

impl ConversationThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn is_streaming(&self) -> bool {
        self.messages.iter().any(|message| message.streaming)
    }

    /// 送往後端的歷史：只包含已完成的使用者與助理訊息。
    pub fn history(&self) -> Vec<WireMessage> {
        self.messages
            .iter()
            .filter(|message| !message.streaming)
            .filter(|message| matches!(message.role, Role::User | Role::Assistant))
            .map(|message| WireMessage {
                role: message.role,
                content: message.content.clone(),
            })
            .collect()
    }

    /// 開始新的一輪：加入使用者訊息與一則空白、串流中的助理訊息。
    ///
    /// 回傳的 [`StreamingTurn`] 被丟棄時會結束串流狀態，不論該輪是成功、
    /// 失敗或被取消。
    pub fn begin_turn(&mut self, query: &str) -> StreamingTurn<'_> {
        self.messages.push(ChatMessage::user(query));
        self.messages.push(ChatMessage {
            streaming: true,
            ..ChatMessage::assistant("")
        });
        StreamingTurn { thread: self }
    }

    /// 把串流內容接到最後一則串流中的助理訊息；若不存在則新增一則。
    pub fn append_content(&mut self, chunk: &str) {
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant && last.streaming => {
                last.content.push_str(chunk);
            }
            _ => self.messages.push(ChatMessage {
                streaming: true,
                ..ChatMessage::assistant(chunk)
            }),
        }
    }

    pub fn push_error(&mut self, message: &str) {
        self.messages.push(ChatMessage::error(message));
    }

    pub fn apply_event(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::Content(chunk) => self.append_content(chunk),
            ChatEvent::Error(message) => self.push_error(message),
        }
    }

    /// 結束所有串流中的訊息；沒有收到任何內容的助理佔位訊息會被移除。
    pub fn finalize(&mut self) {
        self.messages
            .retain(|message| !(message.streaming && message.role == Role::Assistant && message.content.is_empty()));
        for message in &mut self.messages {
            message.streaming = false;
        }
    }

    /// 為重試做準備：移除最後一則使用者訊息及其後的所有內容，並回傳該訊息。
    pub fn take_last_query(&mut self) -> Option<String> {
        let index = self
            .messages
            .iter()
            .rposition(|message| message.role == Role::User)?;
        let query = self.messages[index].content.clone();
        self.messages.truncate(index);
        Some(query)
    }
}

/// 一輪進行中的串流回覆；丟棄時呼叫 [`ConversationThread::finalize`]。
pub struct StreamingTurn<'a> {
    thread: &'a mut ConversationThread,
}

impl Deref for StreamingTurn<'_> {
    type Target = ConversationThread;

    fn deref(&self) -> &Self::Target {
        self.thread
    }
}

impl DerefMut for StreamingTurn<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.thread
    }
}

impl Drop for StreamingTurn<'_> {
    fn drop(&mut self) {
        self.thread.finalize();
    }
}

/// 以代理 ID 區分的所有對話。
#[derive(Debug, Default)]
pub struct Conversations {
    threads: HashMap<String, ConversationThread>,
}

impl Conversations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, agent_id: &str) -> Option<&ConversationThread> {
        self.threads.get(agent_id)
    }

    pub fn thread_mut(&mut self, agent_id: &str) -> &mut ConversationThread {
        self.threads.entry(agent_id.to_string()).or_default()
    }

    pub fn remove(&mut self, agent_id: &str) -> Option<ConversationThread> {
        self.threads.remove(agent_id)
    }

    pub fn is_streaming(&self) -> bool {
        self.threads.values().any(ConversationThread::is_streaming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(text: &str) -> ChatEvent {
        ChatEvent::Content(text.to_string())
    }

    #[test]
    fn streamed_chunks_fold_into_one_reply() {
        let mut thread = ConversationThread::new();
        {
            let mut turn = thread.begin_turn("hi");
            turn.apply_event(&content("Hel"));
            turn.apply_event(&content("lo"));
            assert!(turn.is_streaming());
        }
        assert!(!thread.is_streaming());
        assert_eq!(
            thread.messages(),
            &[ChatMessage::user("hi"), ChatMessage::assistant("Hello")]
        );
    }

    #[test]
    fn error_event_appends_error_entry() {
        let mut thread = ConversationThread::new();
        {
            let mut turn = thread.begin_turn("hi");
            turn.apply_event(&ChatEvent::Error("boom".into()));
        }
        let last = thread.last().unwrap();
        assert_eq!(last.content, "[error] boom");
        assert!(last.is_error());
        assert_eq!(thread.messages().len(), 2);
    }

    #[test]
    fn dropping_turn_clears_streaming_flags() {
        let mut thread = ConversationThread::new();
        let turn = thread.begin_turn("hi");
        drop(turn);
        assert!(!thread.is_streaming());
        assert_eq!(thread.messages(), &[ChatMessage::user("hi")]);
    }

    #[test]
    fn history_excludes_streaming_and_system_entries() {
        let mut thread = ConversationThread::new();
        thread.push(ChatMessage::user("a"));
        thread.push(ChatMessage::assistant("b"));
        thread.push(ChatMessage {
            role: Role::System,
            content: "note".into(),
            streaming: false,
            metadata: None,
        });
        let turn = thread.begin_turn("c");
        let history = turn.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2], WireMessage::user("c"));
    }

    #[test]
    fn take_last_query_truncates_from_last_user_message() {
        let mut thread = ConversationThread::new();
        thread.push(ChatMessage::user("first"));
        thread.push(ChatMessage::assistant("one"));
        thread.push(ChatMessage::user("second"));
        thread.push(ChatMessage::error("boom"));

        assert_eq!(thread.take_last_query().as_deref(), Some("second"));
        assert_eq!(
            thread.messages(),
            &[ChatMessage::user("first"), ChatMessage::assistant("one")]
        );
    }
}
