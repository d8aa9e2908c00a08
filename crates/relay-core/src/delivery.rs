//! Chat resolution and resilient delivery.
//!
//! Resolution walks the pure candidate ladder from [`crate::resolver`]
//! against the transport's describe-chat primitive. Delivery prefers a
//! server-side copy (no re-upload), patches the copy when a custom caption or
//! button is configured, and degrades to download-and-reupload, then to a
//! bare file-id send. Every transport error is caught and logged; the caller
//! only ever sees a boolean outcome.

use crate::{
    domain::{ChatId, MessageRef},
    errors::Error,
    events::{EventBus, LogLevel},
    message::{MessageKind, OutboundPayload, SourceMessage},
    port::{ChannelPort, MediaSource, ResolvedChat},
    resolver,
    Result,
};

/// Try each candidate identifier form in order; first success wins.
///
/// On total failure the error carries every attempted rendering plus the last
/// underlying transport error, so a misconfigured destination is diagnosable
/// from the log alone.
pub async fn resolve_chat(
    port: &dyn ChannelPort,
    raw_id: &str,
    events: &EventBus,
) -> Result<ResolvedChat> {
    let candidates = resolver::candidates(raw_id);
    let mut attempted = Vec::with_capacity(candidates.len());
    let mut last_error: Option<Error> = None;

    for candidate in &candidates {
        attempted.push(candidate.render());
        match port.describe_chat(candidate).await {
            Ok(chat) => {
                events.log(
                    LogLevel::Info,
                    format!(
                        "Posting to channel: {} (id {})",
                        chat.title.as_deref().unwrap_or(raw_id),
                        chat.id.0
                    ),
                );
                return Ok(chat);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(Error::ChatResolution {
        channel: raw_id.to_string(),
        attempted,
        last_error: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no candidate forms to try".to_string()),
    })
}

/// Deliver one payload to a resolved chat. Never returns an error; failures
/// are logged and reported as `false`.
pub async fn deliver(
    port: &dyn ChannelPort,
    chat: &ResolvedChat,
    message: &SourceMessage,
    payload: &OutboundPayload,
    events: &EventBus,
) -> bool {
    if !payload.has_media {
        let text = payload.text.as_deref().unwrap_or_default();
        return match port.send_text(chat.id, text, payload.button.as_ref()).await {
            Ok(_) => true,
            Err(e) => {
                events.log(
                    LogLevel::Error,
                    format!("Failed to post text to chat {}: {e}", chat.id.0),
                );
                false
            }
        };
    }

    match port.copy_message(chat.id, message.origin).await {
        Ok(copied_id) => {
            if payload.caption.is_none() && payload.button.is_none() {
                return true;
            }

            let copy = MessageRef {
                chat_id: chat.id,
                message_id: copied_id,
            };
            match patch_copy(port, copy, message.kind, payload).await {
                Ok(()) => true,
                Err(e) => {
                    events.log(
                        LogLevel::Warning,
                        format!("Failed to patch copied message: {e}"),
                    );
                    // Delete the unpatched copy and start over with a
                    // reupload. If even the delete fails, the copy stands
                    // and counts as delivered.
                    match port.delete_message(copy).await {
                        Ok(()) => reupload(port, chat.id, message, payload, events).await,
                        Err(_) => true,
                    }
                }
            }
        }
        Err(e) => {
            events.log(
                LogLevel::Warning,
                format!("Copy failed, falling back to reupload: {e}"),
            );
            reupload(port, chat.id, message, payload, events).await
        }
    }
}

/// Apply the custom caption/button to a fresh copy.
///
/// Photo and video copies take a caption edit directly. Documents and
/// animations only get their reply markup replaced; a caption edit is then
/// attempted best-effort since not every media type supports it.
async fn patch_copy(
    port: &dyn ChannelPort,
    copy: MessageRef,
    kind: MessageKind,
    payload: &OutboundPayload,
) -> Result<()> {
    match kind {
        MessageKind::Photo | MessageKind::Video => {
            port.edit_caption(
                copy,
                payload.caption.as_deref().unwrap_or_default(),
                payload.button.as_ref(),
            )
            .await
        }
        MessageKind::Document | MessageKind::Animation => {
            if let Some(button) = &payload.button {
                port.edit_reply_markup(copy, button).await?;
                if let Some(caption) = &payload.caption {
                    let _ = port.edit_caption(copy, caption, None).await;
                }
            }
            Ok(())
        }
        MessageKind::Text => Ok(()),
    }
}

/// Download-and-reupload fallback, with a terminal attempt by the original
/// file id (which carries no caption/button guarantee across chats).
async fn reupload(
    port: &dyn ChannelPort,
    chat: ChatId,
    message: &SourceMessage,
    payload: &OutboundPayload,
    events: &EventBus,
) -> bool {
    let Some(media) = &message.media else {
        events.log(
            LogLevel::Error,
            "Media payload without a media reference; dropping".to_string(),
        );
        return false;
    };

    match port.download(media).await {
        Ok(data) => {
            let source = MediaSource::Bytes {
                data,
                file_name: media.file_name.clone(),
            };
            match port
                .send_media(
                    chat,
                    message.kind,
                    source,
                    payload.caption.as_deref(),
                    payload.button.as_ref(),
                )
                .await
            {
                Ok(_) => true,
                Err(e) => {
                    events.log(
                        LogLevel::Error,
                        format!("Failed to reupload media: {e}"),
                    );
                    send_by_file_id(port, chat, message, payload, events).await
                }
            }
        }
        Err(e) => {
            events.log(
                LogLevel::Error,
                format!("Failed to download media for reupload: {e}"),
            );
            send_by_file_id(port, chat, message, payload, events).await
        }
    }
}

async fn send_by_file_id(
    port: &dyn ChannelPort,
    chat: ChatId,
    message: &SourceMessage,
    payload: &OutboundPayload,
    events: &EventBus,
) -> bool {
    let Some(media) = &message.media else {
        return false;
    };

    match port
        .send_media(
            chat,
            message.kind,
            MediaSource::FileId(media.file_id.clone()),
            payload.caption.as_deref(),
            payload.button.as_ref(),
        )
        .await
    {
        Ok(_) => true,
        Err(e) => {
            events.log(
                LogLevel::Error,
                format!("Terminal file-id send failed: {e}"),
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::message::{MediaRef, OutboundPayload};
    use crate::port::MediaSource;
    use crate::resolver::IdCandidate;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Scriptable in-memory transport recording every call.
    #[derive(Default)]
    struct FakePort {
        calls: Mutex<Vec<String>>,
        resolve_ok_on: Option<String>,
        fail_copy: bool,
        fail_patch: bool,
        fail_delete: bool,
        fail_download: bool,
        fail_send_media: bool,
        fail_file_id: bool,
    }

    impl FakePort {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl ChannelPort for FakePort {
        async fn describe_chat(&self, candidate: &IdCandidate) -> Result<ResolvedChat> {
            let rendered = candidate.render();
            self.push(format!("describe:{rendered}"));
            match &self.resolve_ok_on {
                Some(ok) if *ok == rendered => Ok(ResolvedChat {
                    id: ChatId(-100123),
                    title: Some("Dest".into()),
                }),
                _ => Err(Error::Transport("chat not found".into())),
            }
        }

        async fn copy_message(&self, _to: ChatId, _from: MessageRef) -> Result<MessageId> {
            self.push("copy");
            if self.fail_copy {
                return Err(Error::Transport("copy failed".into()));
            }
            Ok(MessageId(900))
        }

        async fn edit_caption(
            &self,
            _msg: MessageRef,
            _caption: &str,
            _button: Option<&crate::message::LinkButton>,
        ) -> Result<()> {
            self.push("edit_caption");
            if self.fail_patch {
                return Err(Error::Transport("edit failed".into()));
            }
            Ok(())
        }

        async fn edit_reply_markup(
            &self,
            _msg: MessageRef,
            _button: &crate::message::LinkButton,
        ) -> Result<()> {
            self.push("edit_markup");
            if self.fail_patch {
                return Err(Error::Transport("edit failed".into()));
            }
            Ok(())
        }

        async fn delete_message(&self, _msg: MessageRef) -> Result<()> {
            self.push("delete");
            if self.fail_delete {
                return Err(Error::Transport("delete failed".into()));
            }
            Ok(())
        }

        async fn download(&self, _media: &MediaRef) -> Result<Vec<u8>> {
            self.push("download");
            if self.fail_download {
                return Err(Error::Transport("download failed".into()));
            }
            Ok(vec![1, 2, 3])
        }

        async fn send_media(
            &self,
            _chat: ChatId,
            _kind: MessageKind,
            source: MediaSource,
            _caption: Option<&str>,
            _button: Option<&crate::message::LinkButton>,
        ) -> Result<MessageId> {
            match source {
                MediaSource::Bytes { .. } => {
                    self.push("send_media:bytes");
                    if self.fail_send_media {
                        return Err(Error::Transport("upload failed".into()));
                    }
                }
                MediaSource::FileId(_) => {
                    self.push("send_media:file_id");
                    if self.fail_file_id {
                        return Err(Error::Transport("file id rejected".into()));
                    }
                }
            }
            Ok(MessageId(901))
        }

        async fn send_text(
            &self,
            _chat: ChatId,
            text: &str,
            _button: Option<&crate::message::LinkButton>,
        ) -> Result<MessageId> {
            self.push(format!("send_text:{text}"));
            Ok(MessageId(902))
        }
    }

    fn chat() -> ResolvedChat {
        ResolvedChat {
            id: ChatId(-100123),
            title: Some("Dest".into()),
        }
    }

    fn video_message() -> SourceMessage {
        SourceMessage {
            origin: MessageRef {
                chat_id: ChatId(-100999),
                message_id: MessageId(5),
            },
            channel_key: 100999,
            kind: MessageKind::Video,
            media: Some(MediaRef {
                file_id: "vid-1".into(),
                file_name: None,
            }),
            text: None,
            caption: Some("original".into()),
            entities: Vec::new(),
            received_at: Utc::now(),
        }
    }

    fn media_payload(caption: Option<&str>) -> OutboundPayload {
        OutboundPayload {
            text: None,
            caption: caption.map(str::to_string),
            has_media: true,
            button: None,
        }
    }

    #[tokio::test]
    async fn resolution_tries_candidates_in_order() {
        let port = FakePort {
            resolve_ok_on: Some("-1001234".into()),
            ..FakePort::default()
        };
        let events = EventBus::new(64);

        let chat = resolve_chat(&port, "1234", &events).await.unwrap();
        assert_eq!(chat.id.0, -100123);

        let calls = port.calls();
        assert_eq!(calls[0], "describe:1234");
        assert!(calls.contains(&"describe:-1001234".to_string()));
    }

    #[tokio::test]
    async fn resolution_failure_reports_attempted_forms() {
        let port = FakePort::default();
        let events = EventBus::new(64);

        let err = resolve_chat(&port, "@nowhere", &events).await.unwrap_err();
        match err {
            Error::ChatResolution {
                channel, attempted, ..
            } => {
                assert_eq!(channel, "@nowhere");
                assert_eq!(attempted, vec!["@nowhere".to_string(), "nowhere".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn plain_copy_when_nothing_to_patch() {
        let port = FakePort::default();
        let events = EventBus::new(64);

        let ok = deliver(&port, &chat(), &video_message(), &media_payload(None), &events).await;
        assert!(ok);
        assert_eq!(port.calls(), vec!["copy"]);
    }

    #[tokio::test]
    async fn copy_then_caption_patch() {
        let port = FakePort::default();
        let events = EventBus::new(64);

        let ok = deliver(
            &port,
            &chat(),
            &video_message(),
            &media_payload(Some("PROMO")),
            &events,
        )
        .await;
        assert!(ok);
        assert_eq!(port.calls(), vec!["copy", "edit_caption"]);
    }

    #[tokio::test]
    async fn failed_patch_deletes_copy_and_reuploads() {
        let port = FakePort {
            fail_patch: true,
            ..FakePort::default()
        };
        let events = EventBus::new(64);

        let ok = deliver(
            &port,
            &chat(),
            &video_message(),
            &media_payload(Some("PROMO")),
            &events,
        )
        .await;
        assert!(ok);
        assert_eq!(
            port.calls(),
            vec!["copy", "edit_caption", "delete", "download", "send_media:bytes"]
        );
    }

    #[tokio::test]
    async fn unpatched_copy_stands_when_delete_fails() {
        let port = FakePort {
            fail_patch: true,
            fail_delete: true,
            ..FakePort::default()
        };
        let events = EventBus::new(64);

        let ok = deliver(
            &port,
            &chat(),
            &video_message(),
            &media_payload(Some("PROMO")),
            &events,
        )
        .await;
        assert!(ok);
        assert_eq!(port.calls(), vec!["copy", "edit_caption", "delete"]);
    }

    #[tokio::test]
    async fn copy_failure_falls_back_to_reupload_then_file_id() {
        let port = FakePort {
            fail_copy: true,
            fail_download: true,
            ..FakePort::default()
        };
        let events = EventBus::new(64);

        let ok = deliver(
            &port,
            &chat(),
            &video_message(),
            &media_payload(Some("PROMO")),
            &events,
        )
        .await;
        assert!(ok);
        assert_eq!(
            port.calls(),
            vec!["copy", "download", "send_media:file_id"]
        );
    }

    #[tokio::test]
    async fn every_rung_failing_reports_false() {
        let port = FakePort {
            fail_copy: true,
            fail_download: true,
            fail_file_id: true,
            ..FakePort::default()
        };
        let events = EventBus::new(64);

        let ok = deliver(
            &port,
            &chat(),
            &video_message(),
            &media_payload(Some("PROMO")),
            &events,
        )
        .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn document_patch_edits_markup_then_caption_best_effort() {
        let port = FakePort::default();
        let events = EventBus::new(64);

        let mut message = video_message();
        message.kind = MessageKind::Document;
        let payload = OutboundPayload {
            text: None,
            caption: Some("PROMO".into()),
            has_media: true,
            button: Some(crate::message::LinkButton {
                label: "Shop".into(),
                url: "https://example.com".into(),
            }),
        };

        let ok = deliver(&port, &chat(), &message, &payload, &events).await;
        assert!(ok);
        assert_eq!(port.calls(), vec!["copy", "edit_markup", "edit_caption"]);
    }

    #[tokio::test]
    async fn text_messages_go_straight_to_send_text() {
        let port = FakePort::default();
        let events = EventBus::new(64);

        let mut message = video_message();
        message.kind = MessageKind::Text;
        message.media = None;
        let payload = OutboundPayload {
            text: Some("hello".into()),
            caption: None,
            has_media: false,
            button: None,
        };

        let ok = deliver(&port, &chat(), &message, &payload, &events).await;
        assert!(ok);
        assert_eq!(port.calls(), vec!["send_text:hello"]);
    }
}
