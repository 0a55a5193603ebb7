//! Line-buffered SSE decoding for chat-completion streams.
//!
//! Provides [`SseDecoder`], which reassembles SSE lines across TCP chunk
//! boundaries and turns `data:` payloads into [`SseEvent`]s.

use serde_json::Value;

use crate::relay::types::Usage;

/// Lines longer than this without a newline are discarded.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// One decoded event from the upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// A content delta
    Token(String),
    /// Usage reported in the final chunk
    Usage(Usage),
    /// Provider-side error reported inside the stream
    Error(String),
    /// The `[DONE]` terminator
    Done,
}

/// Buffers raw bytes across chunk boundaries and decodes complete lines.
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    done_received: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            done_received: false,
        }
    }

    /// Whether `data: [DONE]` has been seen.
    pub fn done_received(&self) -> bool {
        self.done_received
    }

    /// Feed a chunk of bytes and return the events completed by it.
    pub fn process_chunk(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line[..line.len() - 1], &mut events);
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "SSE line exceeded buffer cap, discarding"
            );
            self.buffer.clear();
        }

        events
    }

    /// Flush whatever is left in the buffer as a final line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut events);
        }
        events
    }

    fn process_line(&mut self, raw: &[u8], events: &mut Vec<SseEvent>) {
        let Ok(line) = std::str::from_utf8(raw) else {
            tracing::debug!("Skipping non-UTF-8 SSE line");
            return;
        };
        let line = line.strip_suffix('\r').unwrap_or(line);

        // event:, id:, retry: and comments carry nothing we relay
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data.trim() == "[DONE]" {
            self.done_received = true;
            events.push(SseEvent::Done);
            return;
        }

        match serde_json::from_str::<Value>(data) {
            Ok(payload) => decode_payload(&payload, events),
            Err(e) => tracing::debug!(error = %e, "Skipping malformed SSE data line"),
        }
    }
}

fn decode_payload(payload: &Value, events: &mut Vec<SseEvent>) {
    if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| error.as_str().map(str::to_string))
            .unwrap_or_else(|| error.to_string());
        events.push(SseEvent::Error(message));
        return;
    }

    let content = payload
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str);
    if let Some(text) = content.filter(|t| !t.is_empty()) {
        events.push(SseEvent::Token(text.to_string()));
    }

    if let Some(usage) = payload.get("usage").filter(|u| !u.is_null()) {
        let input = usage.get("prompt_tokens").and_then(Value::as_u64);
        let output = usage.get("completion_tokens").and_then(Value::as_u64);
        if let (Some(input), Some(output)) = (input, output) {
            events.push(SseEvent::Usage(Usage {
                input_tokens: u32::try_from(input).unwrap_or(u32::MAX),
                output_tokens: u32::try_from(output).unwrap_or(u32::MAX),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build SSE bytes from event lines, split at the given byte positions
    /// to simulate TCP chunk boundaries.
    fn split_sse_at_positions(events: &[&str], split_positions: &[usize]) -> Vec<Vec<u8>> {
        let full: Vec<u8> = events
            .iter()
            .flat_map(|e| format!("{}\n\n", e).into_bytes())
            .collect();

        let mut chunks = Vec::new();
        let mut prev = 0;
        for &pos in split_positions {
            if pos > prev && pos < full.len() {
                chunks.push(full[prev..pos].to_vec());
                prev = pos;
            }
        }
        chunks.push(full[prev..].to_vec());
        chunks
    }

    fn decode_all(chunks: &[Vec<u8>]) -> (Vec<SseEvent>, bool) {
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.process_chunk(chunk));
        }
        events.extend(decoder.finish());
        (events, decoder.done_received())
    }

    fn tokens(events: &[SseEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                SseEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    const FULL_STREAM: [&str; 5] = [
        r#"data: {"id":"abc","choices":[{"index":0,"delta":{"role":"assistant","content":""},"finish_reason":null}],"usage":null}"#,
        r#"data: {"id":"abc","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}],"usage":null}"#,
        r#"data: {"id":"abc","choices":[{"index":0,"delta":{"content":" world"},"finish_reason":"stop"}],"usage":null}"#,
        r#"data: {"id":"abc","choices":[],"usage":{"prompt_tokens":6,"completion_tokens":10,"total_tokens":16}}"#,
        "data: [DONE]",
    ];

    #[test]
    fn test_single_chunk_full_stream() {
        let (events, done) = decode_all(&split_sse_at_positions(&FULL_STREAM, &[]));

        assert!(done);
        assert_eq!(
            events,
            vec![
                SseEvent::Token("Hello".to_string()),
                SseEvent::Token(" world".to_string()),
                SseEvent::Usage(Usage {
                    input_tokens: 6,
                    output_tokens: 10
                }),
                SseEvent::Done,
            ]
        );
    }

    #[test]
    fn test_split_chunks_preserve_order() {
        let chunks = split_sse_at_positions(&FULL_STREAM, &[7, 50, 120, 181, 300, 420]);
        assert!(chunks.len() > 1);

        let (events, done) = decode_all(&chunks);
        assert!(done);
        assert_eq!(tokens(&events), "Hello world");
        assert!(events.contains(&SseEvent::Usage(Usage {
            input_tokens: 6,
            output_tokens: 10
        })));
    }

    #[test]
    fn test_multibyte_token_split_mid_character() {
        let raw = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo ✓\"}}]}\n\n".as_bytes();
        // split inside the 3-byte check mark
        let split = raw.len() - 9;
        let (events, _) = decode_all(&[raw[..split].to_vec(), raw[split..].to_vec()]);
        assert_eq!(tokens(&events), "héllo ✓");
    }

    #[test]
    fn test_in_stream_error_event() {
        let raw = b"data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\ndata: {\"error\":{\"message\":\"server overloaded\",\"type\":\"server_error\"}}\n\n";
        let (events, done) = decode_all(&[raw.to_vec()]);
        assert!(!done);
        assert_eq!(
            events,
            vec![
                SseEvent::Token("par".to_string()),
                SseEvent::Error("server overloaded".to_string()),
            ]
        );
    }

    #[test]
    fn test_malformed_json_skipped() {
        let events = [
            "data: {this is not valid json}",
            r#"data: {"choices":[{"delta":{"content":"ok"}}]}"#,
            "data: [DONE]",
        ];
        let (events, done) = decode_all(&split_sse_at_positions(&events, &[]));
        assert!(done);
        assert_eq!(tokens(&events), "ok");
    }

    #[test]
    fn test_non_data_sse_fields_skipped() {
        let raw = b"event: message\nid: 123\nretry: 5000\n: this is a comment\ndata: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n";
        let (events, done) = decode_all(&[raw.to_vec()]);
        assert!(done);
        assert_eq!(events.len(), 2);
        assert_eq!(tokens(&events), "Hi");
    }

    #[test]
    fn test_crlf_line_endings() {
        let raw = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\r\n\r\ndata: [DONE]\r\n\r\n";
        let (events, done) = decode_all(&[raw.to_vec()]);
        assert!(done);
        assert_eq!(tokens(&events), "Hi");
    }

    #[test]
    fn test_data_without_space() {
        let raw = b"data:{\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata:[DONE]\n\n";
        let (events, done) = decode_all(&[raw.to_vec()]);
        assert!(done);
        assert_eq!(tokens(&events), "Hi");
    }

    #[test]
    fn test_done_without_trailing_newline() {
        let raw = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]";
        let (events, done) = decode_all(&[raw.to_vec()]);
        assert!(done);
        assert_eq!(events.last(), Some(&SseEvent::Done));
    }

    #[test]
    fn test_empty_stream() {
        let (events, done) = decode_all(&[]);
        assert!(!done);
        assert!(events.is_empty());
    }

    #[test]
    fn test_buffer_cap() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.process_chunk(&vec![b'x'; 65 * 1024]).is_empty());

        let normal = b"\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n";
        let events = decoder.process_chunk(normal);
        assert_eq!(tokens(&events), "ok");
        assert!(decoder.done_received());
    }
}
