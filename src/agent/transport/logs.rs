use futures_util::StreamExt;
use log::{debug, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::agent::error::Result;

/// 日誌串流送出的事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// 容器輸出的一段文字。
    Line(String),
    /// 連線中斷；`None` 表示正常關閉。
    Closed(Option<String>),
}

/// 追蹤單一代理容器日誌的 WebSocket 連線。
///
/// 讀取工作在背景任務中進行，結果透過 channel 傳回，呼叫端以
/// [`poll_event`](Self::poll_event) 非阻塞地取出。丟棄時中止背景任務。
pub struct LogStream {
    events_rx: UnboundedReceiver<LogEvent>,
    reader: JoinHandle<()>,
}

impl LogStream {
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = connect_async(url).await?;
        debug!("Log stream connected: {}", url);
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_frames(socket, tx));
        Ok(Self {
            events_rx: rx,
            reader,
        })
    }

    pub fn poll_event(&mut self) -> Option<LogEvent> {
        self.events_rx.try_recv().ok()
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames<S>(mut socket: S, tx: UnboundedSender<LogEvent>)
where
    S: futures_util::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    loop {
        let event = match socket.next().await {
            Some(Ok(Message::Text(text))) => LogEvent::Line(text),
            Some(Ok(Message::Close(_))) | None => LogEvent::Closed(None),
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                warn!("Log stream failed: {}", err);
                LogEvent::Closed(Some(err.to_string()))
            }
        };
        let closed = matches!(event, LogEvent::Closed(_));
        if tx.send(event).is_err() || closed {
            return;
        }
    }
}
