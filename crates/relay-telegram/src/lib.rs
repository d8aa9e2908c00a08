//! Telegram adapter (teloxide).
//!
//! This crate implements the `relay-core` ChannelPort over the Telegram Bot
//! API, plus the channel-post ingestion dispatcher in [`ingest`].

use async_trait::async_trait;

use teloxide::{
    net::Download,
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode, Recipient},
};

use tokio::time::sleep;

pub mod ingest;

use relay_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    message::{LinkButton, MediaRef, MessageKind},
    port::{ChannelPort, MediaSource, ResolvedChat},
    resolver::IdCandidate,
    Result,
};

#[derive(Clone)]
pub struct TelegramChannelPort {
    bot: Bot,
}

impl TelegramChannelPort {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    /// One candidate identifier rendering as a Bot API recipient. Numeric
    /// forms (including `-100`-prefixed ones arriving as strings) go through
    /// as ids; everything else is a channel username.
    fn recipient(candidate: &IdCandidate) -> Recipient {
        match candidate {
            IdCandidate::Numeric(n) => Recipient::Id(teloxide::types::ChatId(*n)),
            IdCandidate::Name(s) => match s.parse::<i64>() {
                Ok(n) => Recipient::Id(teloxide::types::ChatId(n)),
                Err(_) => {
                    let username = if s.starts_with('@') {
                        s.clone()
                    } else {
                        format!("@{s}")
                    };
                    Recipient::ChannelUsername(username)
                }
            },
        }
    }

    fn markup(button: &LinkButton) -> Result<InlineKeyboardMarkup> {
        let url = reqwest::Url::parse(&button.url)
            .map_err(|e| Error::Config(format!("invalid button url '{}': {e}", button.url)))?;
        Ok(InlineKeyboardMarkup::new(vec![vec![
            InlineKeyboardButton::url(button.label.clone(), url),
        ]]))
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Transport(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl ChannelPort for TelegramChannelPort {
    async fn describe_chat(&self, candidate: &IdCandidate) -> Result<ResolvedChat> {
        let chat = self
            .with_retry(|| self.bot.get_chat(Self::recipient(candidate)))
            .await?;

        Ok(ResolvedChat {
            id: ChatId(chat.id.0),
            title: chat.title().map(str::to_string),
        })
    }

    async fn copy_message(&self, to: ChatId, from: MessageRef) -> Result<MessageId> {
        let id = self
            .with_retry(|| {
                self.bot.copy_message(
                    Self::tg_chat(to),
                    Self::tg_chat(from.chat_id),
                    Self::tg_msg_id(from.message_id),
                )
            })
            .await?;

        Ok(MessageId(id.0))
    }

    async fn edit_caption(
        &self,
        msg: MessageRef,
        caption: &str,
        button: Option<&LinkButton>,
    ) -> Result<()> {
        let markup = button.map(Self::markup).transpose()?;
        self.with_retry(|| {
            let mut req = self
                .bot
                .edit_message_caption(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
                .caption(caption.to_string())
                .parse_mode(ParseMode::Html);
            if let Some(m) = markup.clone() {
                req = req.reply_markup(m);
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn edit_reply_markup(&self, msg: MessageRef, button: &LinkButton) -> Result<()> {
        let markup = Self::markup(button)?;
        self.with_retry(|| {
            self.bot
                .edit_message_reply_markup(
                    Self::tg_chat(msg.chat_id),
                    Self::tg_msg_id(msg.message_id),
                )
                .reply_markup(markup.clone())
        })
        .await?;
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
        })
        .await?;
        Ok(())
    }

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>> {
        let file = self
            .with_retry(|| self.bot.get_file(media.file_id.clone()))
            .await?;

        let mut buf = Vec::new();
        self.bot
            .download_file(&file.path, &mut buf)
            .await
            .map_err(|e| Error::Transport(format!("telegram download error: {e}")))?;
        Ok(buf)
    }

    async fn send_media(
        &self,
        chat: ChatId,
        kind: MessageKind,
        source: MediaSource,
        caption: Option<&str>,
        button: Option<&LinkButton>,
    ) -> Result<MessageId> {
        let input = match source {
            MediaSource::Bytes { data, file_name } => {
                let f = InputFile::memory(data);
                match file_name {
                    Some(name) => f.file_name(name),
                    None => f,
                }
            }
            MediaSource::FileId(id) => InputFile::file_id(id),
        };
        let markup = button.map(Self::markup).transpose()?;
        let caption = caption.map(str::to_string);

        let sent = match kind {
            MessageKind::Photo => {
                self.with_retry(|| {
                    let mut req = self.bot.send_photo(Self::tg_chat(chat), input.clone());
                    if let Some(c) = caption.clone() {
                        req = req.caption(c).parse_mode(ParseMode::Html);
                    }
                    if let Some(m) = markup.clone() {
                        req = req.reply_markup(m);
                    }
                    req
                })
                .await?
            }
            MessageKind::Video => {
                self.with_retry(|| {
                    let mut req = self.bot.send_video(Self::tg_chat(chat), input.clone());
                    if let Some(c) = caption.clone() {
                        req = req.caption(c).parse_mode(ParseMode::Html);
                    }
                    if let Some(m) = markup.clone() {
                        req = req.reply_markup(m);
                    }
                    req
                })
                .await?
            }
            MessageKind::Animation => {
                self.with_retry(|| {
                    let mut req = self.bot.send_animation(Self::tg_chat(chat), input.clone());
                    if let Some(c) = caption.clone() {
                        req = req.caption(c).parse_mode(ParseMode::Html);
                    }
                    if let Some(m) = markup.clone() {
                        req = req.reply_markup(m);
                    }
                    req
                })
                .await?
            }
            // Text never carries media; treated as a document if it somehow
            // reaches here with one.
            MessageKind::Document | MessageKind::Text => {
                self.with_retry(|| {
                    let mut req = self.bot.send_document(Self::tg_chat(chat), input.clone());
                    if let Some(c) = caption.clone() {
                        req = req.caption(c).parse_mode(ParseMode::Html);
                    }
                    if let Some(m) = markup.clone() {
                        req = req.reply_markup(m);
                    }
                    req
                })
                .await?
            }
        };

        Ok(MessageId(sent.id.0))
    }

    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        button: Option<&LinkButton>,
    ) -> Result<MessageId> {
        let markup = button.map(Self::markup).transpose()?;
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_message(Self::tg_chat(chat), text.to_string())
                    .parse_mode(ParseMode::Html);
                if let Some(m) = markup.clone() {
                    req = req.reply_markup(m);
                }
                req
            })
            .await?;

        Ok(MessageId(msg.id.0))
    }
}
