pub mod chat_service;

pub use chat_service::{
    ChatClient, ChatError, ContentPart, ImageUrl, OutboundContent, OutboundMessage, OutboundRole,
    ResponseStream, StreamChunk, response_stream,
};
