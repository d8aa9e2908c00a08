//! Channel-post ingestion.
//!
//! A dptree dispatcher that watches channel posts (and supergroup messages,
//! which Telegram delivers for discussion-linked channels), keeps only those
//! from the configured source channel and feeds them into the engine's
//! buffer.

use chrono::Utc;
use teloxide::{
    prelude::*,
    types::{MessageEntity, MessageEntityKind},
};

use relay_core::{
    domain::{ChatId, MessageId, MessageRef},
    engine::RelayEngine,
    message::{EntityKind, MediaRef, MessageKind, SourceMessage, TextEntity},
    resolver,
};

/// Run the long-polling dispatcher until shutdown. Posting runs on the
/// engine's own task; this only ingests.
pub async fn run_polling(bot: Bot, engine: RelayEngine) {
    let handler = dptree::entry()
        .branch(Update::filter_channel_post().endpoint(handle_post))
        .branch(Update::filter_message().endpoint(handle_post));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_post(msg: Message, engine: RelayEngine) -> ResponseResult<()> {
    if !(msg.chat.is_channel() || msg.chat.is_supergroup()) {
        return Ok(());
    }

    let Some(config) = engine.config().await else {
        return Ok(());
    };
    let Some(source) = config.source_channel else {
        return Ok(());
    };
    if !resolver::matches_chat(&source.channel_id, msg.chat.id.0, msg.chat.username()) {
        tracing::debug!(
            chat_id = msg.chat.id.0,
            "ignoring post from non-source chat"
        );
        return Ok(());
    }

    let key = resolver::storage_key_for_chat(msg.chat.id.0);
    engine.push(key, convert(&msg, key)).await;
    Ok(())
}

/// Map a Bot API message into the transport-neutral shape the engine stores.
fn convert(msg: &Message, channel_key: u64) -> SourceMessage {
    let (kind, media) = classify(msg);

    let entity_text = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    let raw_entities = msg
        .entities()
        .or_else(|| msg.caption_entities())
        .unwrap_or_default();
    let entities = raw_entities
        .iter()
        .filter_map(|e| convert_entity(entity_text, e))
        .collect();

    SourceMessage {
        origin: MessageRef {
            chat_id: ChatId(msg.chat.id.0),
            message_id: MessageId(msg.id.0),
        },
        channel_key,
        kind,
        media,
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
        entities,
        received_at: Utc::now(),
    }
}

fn classify(msg: &Message) -> (MessageKind, Option<MediaRef>) {
    if let Some(best) = msg.photo().and_then(|sizes| sizes.last()) {
        // Sizes arrive smallest first; the last one is the full resolution.
        return (
            MessageKind::Photo,
            Some(MediaRef {
                file_id: best.file.id.clone(),
                file_name: None,
            }),
        );
    }
    if let Some(video) = msg.video() {
        return (
            MessageKind::Video,
            Some(MediaRef {
                file_id: video.file.id.clone(),
                file_name: video.file_name.clone(),
            }),
        );
    }
    if let Some(animation) = msg.animation() {
        return (
            MessageKind::Animation,
            Some(MediaRef {
                file_id: animation.file.id.clone(),
                file_name: animation.file_name.clone(),
            }),
        );
    }
    if let Some(doc) = msg.document() {
        return (
            MessageKind::Document,
            Some(MediaRef {
                file_id: doc.file.id.clone(),
                file_name: doc.file_name.clone(),
            }),
        );
    }
    (MessageKind::Text, None)
}

fn convert_entity(text: &str, entity: &MessageEntity) -> Option<TextEntity> {
    let kind = match &entity.kind {
        MessageEntityKind::Mention => EntityKind::Mention,
        MessageEntityKind::Url => EntityKind::Url,
        MessageEntityKind::TextLink { .. } => EntityKind::TextLink,
        MessageEntityKind::Hashtag => EntityKind::Hashtag,
        _ => EntityKind::Other,
    };
    let (offset, length) = utf16_span_to_chars(text, entity.offset, entity.length)?;
    Some(TextEntity {
        kind,
        offset,
        length,
    })
}

/// The Bot API reports entity offsets in UTF-16 code units; the transformer
/// works in chars. Returns None when the span does not land on character
/// boundaries of the given text.
fn utf16_span_to_chars(text: &str, offset: usize, length: usize) -> Option<(usize, usize)> {
    let end = offset + length;
    let mut u16_pos = 0usize;
    let mut char_count = 0usize;
    let mut char_start = None;
    let mut char_end = None;

    for c in text.chars() {
        if u16_pos == offset {
            char_start = Some(char_count);
        }
        if u16_pos == end {
            char_end = Some(char_count);
            break;
        }
        u16_pos += c.len_utf16();
        char_count += 1;
    }
    if char_start.is_none() && u16_pos == offset {
        char_start = Some(char_count);
    }
    if char_end.is_none() && u16_pos == end {
        char_end = Some(char_count);
    }

    let (start, stop) = (char_start?, char_end?);
    Some((start, stop.saturating_sub(start)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_spans_are_unchanged() {
        assert_eq!(utf16_span_to_chars("hello @user", 6, 5), Some((6, 5)));
        assert_eq!(utf16_span_to_chars("hello", 0, 5), Some((0, 5)));
    }

    #[test]
    fn spans_after_surrogate_pairs_shift_left() {
        // The emoji is 2 UTF-16 units but 1 char.
        let text = "\u{1F44D} @user";
        assert_eq!(utf16_span_to_chars(text, 3, 5), Some((2, 5)));
    }

    #[test]
    fn span_reaching_end_of_text_resolves() {
        let text = "promo \u{1F525}";
        // Entity covering everything: 6 ASCII units + 2 for the emoji.
        assert_eq!(utf16_span_to_chars(text, 0, 8), Some((0, 7)));
    }

    #[test]
    fn out_of_range_spans_are_dropped() {
        assert_eq!(utf16_span_to_chars("short", 10, 2), None);
        assert_eq!(utf16_span_to_chars("short", 0, 99), None);
    }

    #[test]
    fn mid_surrogate_offsets_are_dropped() {
        // Offset 1 lands inside the emoji's surrogate pair.
        let text = "\u{1F44D}x";
        assert_eq!(utf16_span_to_chars(text, 1, 1), None);
    }

    #[test]
    fn entity_kinds_map_through() {
        let entity = MessageEntity {
            kind: MessageEntityKind::Mention,
            offset: 0,
            length: 5,
        };
        let converted = convert_entity("@user hello", &entity).unwrap();
        assert_eq!(converted.kind, EntityKind::Mention);
        assert_eq!(converted.offset, 0);
        assert_eq!(converted.length, 5);

        let entity = MessageEntity {
            kind: MessageEntityKind::Strikethrough,
            offset: 6,
            length: 5,
        };
        let converted = convert_entity("@user hello", &entity).unwrap();
        assert_eq!(converted.kind, EntityKind::Other);
    }
}
