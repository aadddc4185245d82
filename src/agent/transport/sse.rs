//! Decoder for the `text/event-stream` body returned by the chat endpoint.
//!
//! Records are separated by a blank line (`\n\n`). Inside a record only lines
//! starting with `data: ` are considered; their payload is a JSON object:
//!
//! - `{"type":"message","data":{"type":"content","content":"..."}}` carries text.
//! - `{"type":"error","message":"..."}` reports a failure inside the turn.
//!
//! Everything else, including payloads that are not valid JSON, is skipped.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};
use serde_json::Value;

/// Fallback text for error events that carry no message.
const UNKNOWN_ERROR: &str = "Unknown error";

/// One meaningful event of a chat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A chunk of assistant text.
    Content(String),
    /// The backend reported a failure for this turn.
    Error(String),
}

/// Incremental decoder: feed raw body chunks, get complete events back.
///
/// Bytes of a multi-byte UTF-8 sequence split across chunks are held back until
/// the rest arrives; a trailing record without its blank-line terminator stays
/// buffered and is never emitted.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ChatEvent> {
        self.pending.extend_from_slice(chunk);
        self.decode_pending();

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let record: String = self.buffer.drain(..end + 2).collect();
            events.extend(parse_record(&record[..end]));
        }
        events
    }

    /// Moves every complete UTF-8 sequence from `pending` into `buffer`.
    fn decode_pending(&mut self) {
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    // valid_up_to() marks a UTF-8 boundary, so this slice always decodes.
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

fn parse_record(record: &str) -> Vec<ChatEvent> {
    record
        .split('\n')
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|payload| serde_json::from_str::<Value>(payload).ok())
        .filter_map(|payload| parse_payload(&payload))
        .collect()
}

fn parse_payload(payload: &Value) -> Option<ChatEvent> {
    match payload.get("type").and_then(Value::as_str)? {
        "message" => {
            let data = payload.get("data")?;
            if data.get("type").and_then(Value::as_str) != Some("content") {
                return None;
            }
            let content = data.get("content").and_then(Value::as_str).unwrap_or("");
            if content.is_empty() {
                None
            } else {
                Some(ChatEvent::Content(content.to_string()))
            }
        }
        "error" => {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .filter(|message| !message.is_empty())
                .unwrap_or(UNKNOWN_ERROR);
            Some(ChatEvent::Error(message.to_string()))
        }
        _ => None,
    }
}

type BoxedBody<B, E> = Pin<Box<dyn Stream<Item = Result<B, E>> + Send>>;

/// Turns a byte stream into a stream of [`ChatEvent`]s.
///
/// A read error is yielded once and ends the stream.
pub fn decode_events<S, B, E>(body: S) -> impl Stream<Item = Result<ChatEvent, E>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Send + 'static,
{
    let body: BoxedBody<B, E> = Box::pin(body);
    let state = (Some(body), SseDecoder::new(), VecDeque::new());

    stream::unfold(state, |(mut body, mut decoder, mut ready)| async move {
        loop {
            if let Some(event) = ready.pop_front() {
                return Some((Ok(event), (body, decoder, ready)));
            }
            let source = body.as_mut()?;
            match source.next().await {
                Some(Ok(chunk)) => ready.extend(decoder.push(chunk.as_ref())),
                Some(Err(err)) => return Some((Err(err), (None, decoder, ready))),
                None => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(text: &str) -> ChatEvent {
        ChatEvent::Content(text.to_string())
    }

    #[test]
    fn content_record_yields_text() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"data: {\"type\":\"message\",\"data\":{\"type\":\"content\",\"content\":\"Hel\"}}\n\n",
        );
        assert_eq!(events, vec![content("Hel")]);
    }

    #[test]
    fn record_split_across_chunks_is_reassembled() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"message\",\"da").is_empty());
        let events = decoder.push(b"ta\":{\"type\":\"content\",\"content\":\"lo\"}}\n\n");
        assert_eq!(events, vec![content("lo")]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let record = "data: {\"type\":\"message\",\"data\":{\"type\":\"content\",\"content\":\"é\"}}\n\n";
        let bytes = record.as_bytes();
        let split = record.find('é').unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec![content("é")]);
    }

    #[test]
    fn malformed_and_unrelated_lines_are_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"event: ping\ndata: {not json}\n\ndata: {\"type\":\"status\"}\n\ndata: {\"type\":\"message\",\"data\":{\"type\":\"content\",\"content\":\"ok\"}}\n\n",
        );
        assert_eq!(events, vec![content("ok")]);
    }

    #[test]
    fn error_record_defaults_message() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"type\":\"error\"}\n\ndata: {\"type\":\"error\",\"message\":\"boom\"}\n\n");
        assert_eq!(
            events,
            vec![
                ChatEvent::Error("Unknown error".into()),
                ChatEvent::Error("boom".into())
            ]
        );
    }

    #[test]
    fn unterminated_tail_is_not_emitted() {
        let mut decoder = SseDecoder::new();
        let events = decoder
            .push(b"data: {\"type\":\"message\",\"data\":{\"type\":\"content\",\"content\":\"x\"}}\n");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn stream_adapter_yields_events_then_read_error() {
        let record = |text: &str| {
            format!("data: {{\"type\":\"message\",\"data\":{{\"type\":\"content\",\"content\":\"{text}\"}}}}\n\n")
                .into_bytes()
        };
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(record("a")),
            Err("connection reset".to_string()),
            Ok(record("b")),
        ];
        let events: Vec<_> = decode_events(stream::iter(chunks)).collect().await;
        assert_eq!(
            events,
            vec![Ok(content("a")), Err("connection reset".to_string())]
        );
    }
}
