use serde_json::Value;
use tracing::{debug, warn};

/// Prefix identifying a data frame in the event stream.
const DATA_PREFIX: &str = "data:";

/// Frame value signaling that no further data will be sent.
const DONE_SENTINEL: &str = "[DONE]";

/// Upper bound on a frame fragment held while waiting for its continuation.
/// Without a bound a truly corrupt stream would buffer without limit.
const MAX_PENDING_BYTES: usize = 16 * 1024;

/// A recognized protocol frame. Comments, keep-alives and unknown frame types
/// never surface here.
#[derive(Debug)]
pub enum FrameEvent {
    /// A data frame whose payload parsed as complete JSON.
    Payload(Value),
    /// The terminal sentinel; no further payloads follow.
    Done,
}

/// Interprets complete lines as event-stream frames.
///
/// A data frame whose payload is not yet complete JSON is not a parse error:
/// providers occasionally flush a payload split at a newline-adjacent
/// boundary, so the fragment is held as explicit pending state and rejoined
/// with the next line before being parsed again.
pub struct FrameParser {
    /// Raw line of a data frame awaiting completion by a later line.
    pending: Option<String>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Consume one line from the transport reader.
    pub fn push_line(&mut self, line: &str) -> Option<FrameEvent> {
        if let Some(pending) = self.pending.take() {
            return self.push_continuation(pending, line);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            // Comment or keep-alive.
            return None;
        }
        let rest = trimmed.strip_prefix(DATA_PREFIX)?.trim();
        if rest == DONE_SENTINEL {
            return Some(FrameEvent::Done);
        }
        match serde_json::from_str(rest) {
            Ok(value) => Some(FrameEvent::Payload(value)),
            Err(err) => {
                debug!(%err, "data frame incomplete, holding for next line");
                self.pending = Some(line.to_string());
                None
            }
        }
    }

    /// Flush at end of stream: one final parse attempt for a held fragment.
    /// A fragment that still does not parse is dropped; the provider never
    /// completed the frame, so there is nothing valid to deliver.
    pub fn finish(&mut self) -> Option<Value> {
        let pending = self.pending.take()?;
        match payload_text(&pending).map(serde_json::from_str::<Value>) {
            Some(Ok(value)) => Some(value),
            _ => {
                warn!(
                    dropped_bytes = pending.len(),
                    "dropping data frame that never completed before stream end"
                );
                None
            }
        }
    }

    fn push_continuation(&mut self, pending: String, line: &str) -> Option<FrameEvent> {
        if payload_text(line) == Some(DONE_SENTINEL) {
            warn!(
                dropped_bytes = pending.len(),
                "incomplete data frame pending at stream terminator"
            );
            return Some(FrameEvent::Done);
        }

        // The split swallowed a newline inside the frame; rejoin and re-parse.
        let candidate = format!("{pending}{line}");
        match payload_text(&candidate).map(serde_json::from_str::<Value>) {
            Some(Ok(value)) => Some(FrameEvent::Payload(value)),
            _ if candidate.len() <= MAX_PENDING_BYTES => {
                self.pending = Some(candidate);
                None
            }
            _ => {
                warn!(
                    dropped_bytes = candidate.len(),
                    "frame fragment exceeded pending bound, dropping"
                );
                None
            }
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

fn payload_text(line: &str) -> Option<&str> {
    line.trim().strip_prefix(DATA_PREFIX).map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_comments_and_blank_lines_are_discarded() {
        let mut parser = FrameParser::new();
        assert!(parser.push_line("").is_none());
        assert!(parser.push_line("   ").is_none());
        assert!(parser.push_line(": keep-alive").is_none());
    }

    #[test]
    fn test_unknown_frame_types_are_discarded() {
        let mut parser = FrameParser::new();
        assert!(parser.push_line("event: ping").is_none());
        assert!(parser.push_line("id: 42").is_none());
    }

    #[test]
    fn test_data_frame_yields_payload() {
        let mut parser = FrameParser::new();
        let event = parser.push_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#);
        match event {
            Some(FrameEvent::Payload(value)) => {
                assert_eq!(value["choices"][0]["delta"]["content"], json!("Hi"));
            }
            other => panic!("expected payload, got {other:?}"),
        }
    }

    #[test]
    fn test_done_sentinel() {
        let mut parser = FrameParser::new();
        assert!(matches!(
            parser.push_line("data: [DONE]"),
            Some(FrameEvent::Done)
        ));
    }

    #[test]
    fn test_incomplete_frame_recovers_on_next_line() {
        let mut parser = FrameParser::new();
        assert!(
            parser
                .push_line(r#"data: {"choices":[{"del"#)
                .is_none()
        );
        let event = parser.push_line(r#"ta":{"content":"hello"}}]}"#);
        match event {
            Some(FrameEvent::Payload(value)) => {
                assert_eq!(value["choices"][0]["delta"]["content"], json!("hello"));
            }
            other => panic!("expected recovered payload, got {other:?}"),
        }
    }

    #[test]
    fn test_three_way_split_recovers() {
        let mut parser = FrameParser::new();
        assert!(parser.push_line(r#"data: {"choices":[{"#).is_none());
        assert!(parser.push_line(r#""delta":{"content""#).is_none());
        let event = parser.push_line(r#":"x"}}]}"#);
        assert!(matches!(event, Some(FrameEvent::Payload(_))));
    }

    #[test]
    fn test_done_while_fragment_pending_still_terminates() {
        let mut parser = FrameParser::new();
        assert!(parser.push_line(r#"data: {"broken"#).is_none());
        assert!(matches!(
            parser.push_line("data: [DONE]"),
            Some(FrameEvent::Done)
        ));
        assert!(parser.finish().is_none());
    }

    #[test]
    fn test_finish_retries_pending_fragment() {
        let mut parser = FrameParser::new();
        assert!(parser.push_line(r#"data: {"a"#).is_none());
        // Continuation completes the JSON but the stream ends before another
        // line arrives to trigger the rejoin, so finish() must retry.
        let mut parser2 = FrameParser::new();
        assert!(parser2.push_line(r#"data: {"a": 1"#).is_none());
        assert!(parser2.push_line("}").is_some() || parser2.finish().is_some());
        // A fragment that never completes is dropped silently.
        assert!(parser.finish().is_none());
    }

    #[test]
    fn test_pending_bound_drops_runaway_fragment() {
        let mut parser = FrameParser::new();
        assert!(parser.push_line(r#"data: {"big":""#).is_none());
        let filler = "x".repeat(MAX_PENDING_BYTES);
        assert!(parser.push_line(&filler).is_none());
        // The fragment exceeded the bound and was dropped, so a later valid
        // frame parses on its own.
        let event = parser.push_line(r#"data: {"ok":true}"#);
        assert!(matches!(event, Some(FrameEvent::Payload(_))));
    }
}
