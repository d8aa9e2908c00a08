//! Inbound and outbound message models.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::MessageRef;

/// Content type of a buffered source message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Photo,
    Video,
    Document,
    Animation,
}

/// Opaque reference to a media object on the transport side.
///
/// `file_id` is enough to re-send without re-uploading; `file_name` is kept
/// for document reuploads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MediaRef {
    pub file_id: String,
    pub file_name: Option<String>,
}

/// Formatting entity kinds the transformer cares about. Everything else maps
/// to `Other` and is left untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Mention,
    Url,
    TextLink,
    Hashtag,
    Other,
}

/// A formatting span over the message text, in `char` units.
///
/// Transport adapters are responsible for converting from their native
/// offsets (Telegram uses UTF-16 code units) before constructing a
/// [`SourceMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TextEntity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

/// An inbound message captured from the source channel.
///
/// Immutable once created by the ingestion collaborator; the engine only ever
/// reads it. Retained in the store until explicitly cleared (or evicted by
/// the per-channel cap).
#[derive(Clone, Debug, Serialize)]
pub struct SourceMessage {
    /// Where the original lives, used for server-side copies.
    pub origin: MessageRef,
    /// Unsigned storage key of the owning channel.
    pub channel_key: u64,
    pub kind: MessageKind,
    pub media: Option<MediaRef>,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<TextEntity>,
    pub received_at: DateTime<Utc>,
}

impl SourceMessage {
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    /// Whether there is anything worth relaying: media, or non-empty text.
    pub fn has_content(&self) -> bool {
        if self.media.is_some() {
            return true;
        }
        self.text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }
}

/// An inline URL button attached to an outbound post.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

/// The transformed payload handed to the delivery engine.
///
/// Built fresh for each message; `caption` is populated instead of `text`
/// whenever the original carries media.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundPayload {
    pub text: Option<String>,
    pub caption: Option<String>,
    pub has_media: bool,
    pub button: Option<LinkButton>,
}
