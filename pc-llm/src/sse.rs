//! Server-sent events over a chunked HTTP body.

use crate::error::{ChatError, Result};
use bytes::Bytes;
use futures_util::Stream;
use futures_util::StreamExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, `"message"` when the server omits it.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

impl SseEvent {
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: "message".to_string(),
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Splits a byte stream into events. Bytes are buffered until a blank line
/// closes the event, so multi-byte characters split across network chunks
/// decode intact.
pub fn decode_sse<S, E>(bytes_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures_util::stream::unfold(
        (Box::pin(bytes_stream), Vec::<u8>::new(), false),
        |(mut stream, mut buffer, mut finished)| async move {
            loop {
                if let Some((end, sep_len)) = find_event_end(&buffer) {
                    let raw: Vec<u8> = buffer.drain(..end + sep_len).take(end).collect();
                    if let Some(event) = parse_event(&raw) {
                        return Some((Ok(event), (stream, buffer, finished)));
                    }
                    continue;
                }

                if finished {
                    if buffer.is_empty() {
                        return None;
                    }
                    let raw = std::mem::take(&mut buffer);
                    return parse_event(&raw).map(|event| (Ok(event), (stream, buffer, finished)));
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        finished = true;
                        buffer.clear();
                        return Some((
                            Err(ChatError::Transport(format!("stream read failed: {e}"))),
                            (stream, buffer, finished),
                        ));
                    }
                    None => finished = true,
                }
            }
        },
    )
}

fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = find(buffer, b"\n\n").map(|i| (i, 2));
    let crlf = find(buffer, b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_event(raw: &[u8]) -> Option<SseEvent> {
    let raw = String::from_utf8_lossy(raw);
    let mut event = String::new();
    let mut data_lines = Vec::new();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // id:, retry: and `:` comments carry nothing we use.
    }

    if event.is_empty() && data_lines.is_empty() {
        return None;
    }
    if event.is_empty() {
        event = "message".to_string();
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<Vec<u8>>) -> Vec<Result<SseEvent>> {
        let source = futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<Bytes, std::io::Error>(Bytes::from(c))),
        );
        decode_sse(source).collect().await
    }

    fn text_chunks(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn events_split_across_chunks_are_reassembled() {
        let events = collect(text_chunks(&[
            "data: {\"a\":",
            "1}\n",
            "\ndata: [DONE]\n\n",
        ]))
        .await;
        let events: Vec<SseEvent> = events.into_iter().map(|e| e.expect("event")).collect();
        assert_eq!(
            events,
            vec![SseEvent::message("{\"a\":1}"), SseEvent::message("[DONE]")]
        );
    }

    #[tokio::test]
    async fn named_events_comments_and_crlf_are_handled() {
        let events = collect(text_chunks(&[
            ": keep-alive\r\n\r\n",
            "event: content_block_delta\r\ndata: {\"x\":true}\r\n\r\n",
            "event: message_stop\ndata: {}\n\n",
        ]))
        .await;
        let events: Vec<SseEvent> = events.into_iter().map(|e| e.expect("event")).collect();
        assert_eq!(
            events,
            vec![
                SseEvent::named("content_block_delta", "{\"x\":true}"),
                SseEvent::named("message_stop", "{}"),
            ]
        );
    }

    #[tokio::test]
    async fn multibyte_characters_survive_chunk_boundaries() {
        let bytes = "data: ação\n\n".as_bytes();
        // Split inside the first two-byte character.
        let split = bytes.iter().position(|b| *b == 0xc3).expect("multibyte") + 1;
        let (head, tail) = bytes.split_at(split);

        let events = collect(vec![head.to_vec(), tail.to_vec()]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().expect("event").data, "ação");
    }

    #[tokio::test]
    async fn trailing_event_without_blank_line_is_flushed() {
        let events = collect(text_chunks(&["data: last"])).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().expect("event").data, "last");
    }

    #[tokio::test]
    async fn body_errors_surface_as_transport_errors() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Err("connection reset"),
        ]);
        let events: Vec<Result<SseEvent>> = decode_sse(source).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(ChatError::Transport(_))));
    }
}
