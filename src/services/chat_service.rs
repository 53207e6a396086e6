use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{BoxStream, Stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::models::{AttachmentKind, Message, Role};
use crate::transport::{FrameEvent, FrameParser, LineReader, delta_from_payload};

/// Errors raised while talking to the model provider. Each class maps to a
/// single user-facing string substituted into the failed assistant message.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider quota exhausted")]
    QuotaExhausted,

    #[error("provider returned status {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("stream interrupted: {0}")]
    Stream(#[from] std::io::Error),
}

impl ChatError {
    pub fn user_facing_message(&self) -> String {
        match self {
            ChatError::RateLimited => {
                "You are sending requests too quickly. Please wait a moment and try again."
            }
            ChatError::QuotaExhausted => {
                "Your usage quota has been exhausted. Please check your plan and billing."
            }
            ChatError::Provider { .. } | ChatError::Network(_) | ChatError::Stream(_) => {
                "Sorry, something went wrong while generating a response. Please try again."
            }
        }
        .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundRole {
    System,
    User,
    Assistant,
}

impl From<Role> for OutboundRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => OutboundRole::User,
            Role::Assistant => OutboundRole::Assistant,
        }
    }
}

/// Message content as the provider expects it: a plain string, or an array of
/// typed parts when attachments were flattened in by the request builder.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub role: OutboundRole,
    pub content: OutboundContent,
}

impl OutboundMessage {
    pub fn from_message(message: &Message) -> Self {
        let role = message.role.into();
        let images: Vec<ContentPart> = message
            .attachments
            .iter()
            .flatten()
            .filter(|a| a.kind == AttachmentKind::Image)
            .map(|a| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    // Prefer the inline base64 payload; the display url is a
                    // local reference the provider cannot fetch.
                    url: a.data.clone().unwrap_or_else(|| a.url.clone()),
                },
            })
            .collect();

        if images.is_empty() {
            return Self {
                role,
                content: OutboundContent::Text(message.content.clone()),
            };
        }
        let mut parts = vec![ContentPart::Text {
            text: message.content.clone(),
        }];
        parts.extend(images);
        Self {
            role,
            content: OutboundContent::Parts(parts),
        }
    }

    pub fn from_history(messages: &[Message]) -> Vec<Self> {
        messages.iter().map(Self::from_message).collect()
    }
}

#[derive(Serialize)]
struct CompletionRequest {
    messages: Vec<OutboundMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<ErrorField>,
}

/// Providers disagree on the error shape: some send a bare string, others the
/// OpenAI-style `{"message": ...}` object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Text(String),
    Detail { message: String },
}

impl ErrorField {
    fn into_message(self) -> String {
        match self {
            ErrorField::Text(text) => text,
            ErrorField::Detail { message } => message,
        }
    }
}

/// Chunks emitted while decoding a streaming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// One incremental text fragment.
    Delta(String),
    /// No further data will be sent.
    Done,
}

pub type ResponseStream = BoxStream<'static, Result<StreamChunk, ChatError>>;

/// Client for the provider-facing streaming completion endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl ChatClient {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Dispatch the request and return the decoded delta stream. Non-2xx
    /// statuses are mapped to their error class before any streaming starts.
    pub async fn stream_completion(
        &self,
        messages: Vec<OutboundMessage>,
    ) -> Result<ResponseStream, ChatError> {
        let request = CompletionRequest {
            messages,
            stream: true,
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .map(ErrorField::into_message)
                .unwrap_or_default();
            return Err(match status.as_u16() {
                429 => ChatError::RateLimited,
                402 => ChatError::QuotaExhausted,
                code => ChatError::Provider {
                    status: code,
                    message,
                },
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|item| item.map_err(std::io::Error::other));
        Ok(response_stream(bytes))
    }
}

/// Decode a raw byte stream into delta chunks: line splitting, frame parsing
/// and delta extraction, in arrival order. Generic over the byte source so
/// tests can drive it with hand-split chunks. The stream always terminates
/// with `Done`, whether or not the terminal sentinel arrived.
pub fn response_stream<S>(bytes: S) -> ResponseStream
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut reader = LineReader::new();
        let mut parser = FrameParser::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield Err(ChatError::Stream(err));
                    return;
                }
            };
            for line in reader.push_chunk(&chunk) {
                match parser.push_line(&line) {
                    Some(FrameEvent::Payload(payload)) => {
                        if let Some(delta) = delta_from_payload(&payload) {
                            yield Ok(StreamChunk::Delta(delta.to_string()));
                        }
                    }
                    Some(FrameEvent::Done) => {
                        yield Ok(StreamChunk::Done);
                        return;
                    }
                    None => {}
                }
            }
        }

        // The body ended without the terminal sentinel: flush the reader and
        // give the parser its final re-parse pass.
        debug!("response body ended before terminal sentinel");
        if let Some(line) = reader.finish() {
            match parser.push_line(&line) {
                Some(FrameEvent::Payload(payload)) => {
                    if let Some(delta) = delta_from_payload(&payload) {
                        yield Ok(StreamChunk::Delta(delta.to_string()));
                    }
                }
                Some(FrameEvent::Done) => {
                    yield Ok(StreamChunk::Done);
                    return;
                }
                None => {}
            }
        }
        if let Some(payload) = parser.finish() {
            if let Some(delta) = delta_from_payload(&payload) {
                yield Ok(StreamChunk::Delta(delta.to_string()));
            }
        }
        yield Ok(StreamChunk::Done);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn byte_stream(chunks: Vec<&'static [u8]>) -> impl Stream<Item = std::io::Result<Bytes>> {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
    }

    async fn collect(chunks: Vec<&'static [u8]>) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        let mut stream = response_stream(byte_stream(chunks));
        while let Some(item) = stream.next().await {
            out.push(item.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_two_frames_then_done() {
        let chunks = collect(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
            b"data: [DONE]\n\n",
        ])
        .await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Delta("Hi".to_string()),
                StreamChunk::Delta(" there".to_string()),
                StreamChunk::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_comments_and_keepalives_ignored() {
        let chunks = collect(vec![
            b": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\ndata: [DONE]\n\n",
        ])
        .await;
        assert_eq!(
            chunks,
            vec![StreamChunk::Delta("x".to_string()), StreamChunk::Done]
        );
    }

    #[tokio::test]
    async fn test_stream_end_without_sentinel_still_completes() {
        let chunks = collect(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}",
        ])
        .await;
        assert_eq!(
            chunks,
            vec![StreamChunk::Delta("tail".to_string()), StreamChunk::Done]
        );
    }

    #[tokio::test]
    async fn test_frames_without_content_are_skipped() {
        let chunks = collect(vec![
            b"data: {\"choices\":[{\"delta\":{}}]}\n\ndata: [DONE]\n\n",
        ])
        .await;
        assert_eq!(chunks, vec![StreamChunk::Done]);
    }

    #[tokio::test]
    async fn test_io_error_surfaces_as_stream_error() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            )),
            Err(std::io::Error::other("connection reset")),
        ];
        let mut stream = response_stream(stream::iter(chunks));
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamChunk::Delta("a".to_string())
        );
        assert!(matches!(
            stream.next().await.unwrap(),
            Err(ChatError::Stream(_))
        ));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_outbound_body_shape() {
        let request = CompletionRequest {
            messages: vec![
                OutboundMessage {
                    role: OutboundRole::System,
                    content: OutboundContent::Text("be brief".to_string()),
                },
                OutboundMessage {
                    role: OutboundRole::User,
                    content: OutboundContent::Parts(vec![
                        ContentPart::Text {
                            text: "look at this".to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: "data:image/png;base64,AAAA".to_string(),
                            },
                        },
                    ]),
                },
            ],
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "be brief");
        assert_eq!(json["messages"][1]["content"][0]["type"], "text");
        assert_eq!(json["messages"][1]["content"][1]["type"], "image_url");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_error_body_accepts_string_and_object_shapes() {
        let plain: ErrorBody = serde_json::from_str(r#"{"error":"bad api key"}"#).unwrap();
        assert_eq!(plain.error.unwrap().into_message(), "bad api key");

        let nested: ErrorBody =
            serde_json::from_str(r#"{"error":{"message":"model overloaded","type":"server_error"}}"#)
                .unwrap();
        assert_eq!(nested.error.unwrap().into_message(), "model overloaded");

        let absent: ErrorBody = serde_json::from_str(r#"{}"#).unwrap();
        assert!(absent.error.is_none());
    }

    #[test]
    fn test_image_attachments_become_content_parts() {
        use crate::models::{Attachment, MessageStatus};

        let message = Message {
            id: "m1".to_string(),
            role: Role::User,
            content: "what is this?".to_string(),
            created_at: 0,
            attachments: Some(vec![Attachment {
                id: "att-1".to_string(),
                kind: AttachmentKind::Image,
                name: "photo.png".to_string(),
                url: "blob:photo".to_string(),
                data: Some("data:image/png;base64,AAAA".to_string()),
                mime_type: Some("image/png".to_string()),
                size: Some(4),
            }]),
            is_streaming: false,
            status: MessageStatus::Sent,
        };

        let outbound = OutboundMessage::from_message(&message);
        let json = serde_json::to_value(&outbound).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "what is this?");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn test_user_facing_messages_distinguish_rate_and_quota() {
        let rate = ChatError::RateLimited.user_facing_message();
        let quota = ChatError::QuotaExhausted.user_facing_message();
        let generic = ChatError::Provider {
            status: 500,
            message: "boom".to_string(),
        }
        .user_facing_message();
        assert_ne!(rate, quota);
        assert_ne!(rate, generic);
        assert_ne!(quota, generic);
    }
}
