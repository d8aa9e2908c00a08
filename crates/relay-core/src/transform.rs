//! Post transformation: raw source message → outbound payload.
//!
//! Scrubs author/channel traces from the text (mention entities, trailing
//! `via @channel` style signatures), applies the configured template, and
//! decides the text-vs-caption split based on whether the original carries
//! media.

use std::sync::OnceLock;

use regex::Regex;

use crate::{
    config::PostConfig,
    message::{EntityKind, LinkButton, OutboundPayload, SourceMessage, TextEntity},
};

/// Channel-signature patterns stripped from relayed text.
fn signature_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)via @\w+",
            r"(?i)from @\w+",
            r"(?i)canal: @\w+",
            r"@\w+\s*$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect()
    })
}

fn whitespace() -> &'static Regex {
    static WS: OnceLock<Regex> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

/// Drop the characters covered by mention entities. Link, URL and hashtag
/// spans are deliberately preserved. Offsets are `char` units; out-of-range
/// spans are clamped.
fn strip_mention_spans(text: &str, entities: &[TextEntity]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut keep = vec![true; chars.len()];

    for entity in entities {
        if entity.kind != EntityKind::Mention {
            continue;
        }
        let start = entity.offset.min(chars.len());
        let end = entity.offset.saturating_add(entity.length).min(chars.len());
        for flag in &mut keep[start..end] {
            *flag = false;
        }
    }

    chars
        .into_iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect()
}

/// Cleaned text of a message: text or caption with mention spans removed,
/// channel signatures stripped and whitespace collapsed.
pub fn clean_text(message: &SourceMessage) -> String {
    let base = message
        .text
        .as_deref()
        .or(message.caption.as_deref())
        .unwrap_or_default();
    if base.is_empty() {
        return String::new();
    }

    let mut text = strip_mention_spans(base, &message.entities);
    for pattern in signature_patterns() {
        text = pattern.replace_all(&text, "").into_owned();
    }

    whitespace().replace_all(&text, " ").trim().to_string()
}

/// Prefix the configured template, separated by a blank line. The template
/// alone is the result when the cleaned text is empty.
pub fn apply_template(cleaned: &str, config: &PostConfig) -> String {
    if config.template_text.is_empty() {
        return cleaned.to_string();
    }
    if cleaned.is_empty() {
        return config.template_text.clone();
    }
    format!("{}\n\n{}", config.template_text, cleaned)
}

/// An inline URL button, present only when both label and URL are configured.
pub fn build_button(config: &PostConfig) -> Option<LinkButton> {
    match (config.button_label.as_deref(), config.button_url.as_deref()) {
        (Some(label), Some(url)) if !label.is_empty() && !url.is_empty() => Some(LinkButton {
            label: label.to_string(),
            url: url.to_string(),
        }),
        _ => None,
    }
}

/// Build the outbound payload for one delivery pass.
pub fn process(message: &SourceMessage, config: &PostConfig) -> OutboundPayload {
    let cleaned = clean_text(message);
    let final_text = apply_template(&cleaned, config);
    let final_text = (!final_text.is_empty()).then_some(final_text);
    let has_media = message.has_media();

    OutboundPayload {
        caption: if has_media { final_text.clone() } else { None },
        text: if has_media { None } else { final_text },
        has_media,
        button: build_button(config),
    }
}
