//! Channel identifier normalization and candidate generation.
//!
//! Channel identifiers arrive as free-form strings (`@username`, `username`,
//! `-1001234…`, `1234…`). Telegram accepts several renderings of the same
//! chat, and which one resolves depends on how the bot was added to it, so
//! delivery walks a deterministic ladder of candidate forms. Everything here
//! is pure and network-free; the thin resolution step that actually touches
//! the transport lives in [`crate::delivery`].

use std::collections::HashSet;

/// The canonical form of a configured identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizedId {
    Numeric(i64),
    Name(String),
}

/// One rendering of a channel id to try against the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdCandidate {
    Numeric(i64),
    Name(String),
}

impl IdCandidate {
    /// Stable string rendering, used for dedup and error reporting.
    pub fn render(&self) -> String {
        match self {
            IdCandidate::Numeric(n) => n.to_string(),
            IdCandidate::Name(s) => s.clone(),
        }
    }
}

/// Normalize a raw identifier: strip leading `@`s and whitespace; if the
/// remainder (ignoring one leading `-`) is all digits, parse as a signed
/// integer. Total — anything unparsable stays a name.
pub fn normalize(raw: &str) -> NormalizedId {
    let clean = raw.trim().trim_start_matches('@').trim();
    let digits = clean.strip_prefix('-').unwrap_or(clean);

    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = clean.parse::<i64>() {
            return NormalizedId::Numeric(n);
        }
    }

    NormalizedId::Name(clean.to_string())
}

/// The ordered fallback ladder for chat resolution.
///
/// The raw input always comes first, followed by the normalized form, an
/// `@`-prefixed variant for names, and supergroup-style `-100` renderings for
/// positive numeric ids (plain and zero-padded to Telegram's canonical 13
/// digits). Negative ids are never reinterpreted as positive. Deduplicated by
/// string rendering, original order preserved.
pub fn candidates(raw: &str) -> Vec<IdCandidate> {
    let mut out = vec![IdCandidate::Name(raw.trim().to_string())];

    match normalize(raw) {
        NormalizedId::Numeric(n) => {
            out.push(IdCandidate::Numeric(n));
            out.push(IdCandidate::Name(n.to_string()));
            if n > 0 {
                out.push(IdCandidate::Name(format!("-100{n}")));
                out.push(IdCandidate::Name(format!("-100{n:0>13}")));
            }
        }
        NormalizedId::Name(name) => {
            out.push(IdCandidate::Name(name.clone()));
            if !name.is_empty() {
                out.push(IdCandidate::Name(format!("@{name}")));
            }
        }
    }

    let mut seen = HashSet::new();
    out.retain(|c| seen.insert(c.render()));
    out
}

/// Whether an incoming chat matches a configured identifier.
///
/// Used by the ingestion collaborator to decide if a channel post belongs to
/// the monitored source channel. Numeric configs match the chat id in either
/// sign convention; name configs match the chat username exactly or the
/// rendered numeric id.
pub fn matches_chat(raw: &str, chat_id: i64, username: Option<&str>) -> bool {
    match normalize(raw) {
        NormalizedId::Numeric(n) => n == chat_id || n.checked_neg() == Some(chat_id),
        NormalizedId::Name(name) => {
            if name.is_empty() {
                return false;
            }
            if let Some(u) = username {
                if u == name {
                    return true;
                }
            }
            name == chat_id.to_string() || name == chat_id.unsigned_abs().to_string()
        }
    }
}

/// Unsigned storage key for a configured identifier: the normalized numeric
/// id with any leading `-` stripped. Canonical and sign-variant forms collide
/// intentionally. Name identifiers have no derivable key; for those the
/// engine falls back to the key reported by the ingestion collaborator.
pub fn storage_key(raw: &str) -> Option<u64> {
    match normalize(raw) {
        NormalizedId::Numeric(n) => Some(n.unsigned_abs()),
        NormalizedId::Name(_) => None,
    }
}

/// Storage key for a concrete chat id seen on the wire.
pub fn storage_key_for_chat(chat_id: i64) -> u64 {
    chat_id.unsigned_abs()
}
