use serde::Serialize;

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric, unique within a chat).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MessageId(pub i32);

/// A stable reference to a message in a specific chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}
