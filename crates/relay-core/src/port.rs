//! Hexagonal port for the channel transport.
//!
//! Telegram is the first implementation; the shape is transport-neutral so
//! tests can run against an in-memory fake and future adapters can slot in
//! behind the same interface.

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    message::{LinkButton, MediaRef, MessageKind},
    resolver::IdCandidate,
    Result,
};

/// A chat handle confirmed by the transport.
#[derive(Clone, Debug)]
pub struct ResolvedChat {
    pub id: ChatId,
    pub title: Option<String>,
}

/// Where the bytes of a media send come from.
#[derive(Clone, Debug)]
pub enum MediaSource {
    /// Downloaded content, re-uploaded by the transport.
    Bytes {
        data: Vec<u8>,
        file_name: Option<String>,
    },
    /// The transport-native reference of the original media. Terminal
    /// fallback; may be rejected by the transport across chats.
    FileId(String),
}

#[async_trait]
pub trait ChannelPort: Send + Sync {
    /// Look up a chat by one candidate identifier rendering.
    async fn describe_chat(&self, candidate: &IdCandidate) -> Result<ResolvedChat>;

    /// Server-side copy of a message into another chat, preserving media
    /// without re-uploading. Returns the id of the copy.
    async fn copy_message(&self, to: ChatId, from: MessageRef) -> Result<MessageId>;

    /// Replace the caption (and optionally the button) of an existing message.
    async fn edit_caption(
        &self,
        msg: MessageRef,
        caption: &str,
        button: Option<&LinkButton>,
    ) -> Result<()>;

    /// Replace only the inline keyboard of an existing message.
    async fn edit_reply_markup(&self, msg: MessageRef, button: &LinkButton) -> Result<()>;

    async fn delete_message(&self, msg: MessageRef) -> Result<()>;

    /// Fetch the binary content of a media object into memory.
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>>;

    async fn send_media(
        &self,
        chat: ChatId,
        kind: MessageKind,
        source: MediaSource,
        caption: Option<&str>,
        button: Option<&LinkButton>,
    ) -> Result<MessageId>;

    /// Send rich text with an optional URL button.
    async fn send_text(&self, chat: ChatId, text: &str, button: Option<&LinkButton>)
        -> Result<MessageId>;
}
