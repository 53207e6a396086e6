use serde_json::Value;

/// Extract the incremental text fragment from a parsed stream payload.
///
/// The payload shape is `{"choices":[{"delta":{"content"?: string}}]}`;
/// an absent or empty `content` means the frame carried no delta.
pub fn delta_from_payload(payload: &Value) -> Option<&str> {
    let delta = payload
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;
    if delta.is_empty() { None } else { Some(delta) }
}

/// Result of applying one delta to the cumulative buffer.
#[derive(Debug, Clone)]
pub struct DeltaUpdate {
    /// True exactly once, on the first non-empty delta of the stream.
    /// Used to clear the "assistant is composing" indicator.
    pub first_token: bool,
    /// The full cumulative content after appending this delta.
    pub content: String,
}

/// Concatenates deltas for one in-flight assistant message, in arrival order.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    content: String,
    seen_first: bool,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &str) -> DeltaUpdate {
        let first_token = !self.seen_first && !delta.is_empty();
        if first_token {
            self.seen_first = true;
        }
        self.content.push_str(delta);
        DeltaUpdate {
            first_token,
            content: self.content.clone(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}
