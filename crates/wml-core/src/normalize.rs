//! Payload normalization: one raw inbound payload + its chat metadata in,
//! one [`IncomingMessageRecord`] out. Never fails; unknown or malformed
//! shapes degrade to empty/placeholder values instead of erroring.

use chrono::{Local, TimeZone};
use regex::{Captures, Regex};
use serde_json::Value;

use crate::{
    domain::{ChatType, GroupMetadata, IncomingMessageRecord, Jid, MentionedName},
    transport::RawMessage,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Media kinds that carry a caption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Document,
}

impl MediaKind {
    fn key(self) -> &'static str {
        match self {
            MediaKind::Image => "imageMessage",
            MediaKind::Video => "videoMessage",
            MediaKind::Document => "documentMessage",
        }
    }
}

/// Known inbound payload kinds, in classification priority order; the first
/// matching rule wins. Anything else is `Unrecognized`.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageContent {
    Conversation(String),
    ExtendedText(String),
    /// Image/video/document with a non-empty caption.
    Media(MediaKind, String),
    Audio,
    Sticker,
    PollCreation(String),
    List,
    Buttons,
    Template,
    Reaction(String),
    /// Disappearing-message wrapper, unwrapped exactly one level.
    Ephemeral(Box<MessageContent>),
    Unrecognized,
}

impl MessageContent {
    pub fn classify(message: &Value) -> Self {
        classify_at(message, true)
    }

    /// Display text for the payload. Empty for unrecognized shapes.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Conversation(t) | MessageContent::ExtendedText(t) => t.clone(),
            MessageContent::Media(_, caption) => caption.clone(),
            MessageContent::Audio => "[Audio]".to_string(),
            MessageContent::Sticker => "[Sticker]".to_string(),
            MessageContent::PollCreation(name) => format!("[Poll: {name}]"),
            MessageContent::List => "[List]".to_string(),
            MessageContent::Buttons => "[Buttons]".to_string(),
            MessageContent::Template => "[Template]".to_string(),
            MessageContent::Reaction(glyph) => format!("[Reaction: {glyph}]"),
            MessageContent::Ephemeral(inner) => match inner.as_ref() {
                MessageContent::Unrecognized => "[Ephemeral message]".to_string(),
                other => other.text(),
            },
            MessageContent::Unrecognized => String::new(),
        }
    }
}

fn classify_at(message: &Value, allow_ephemeral: bool) -> MessageContent {
    if let Some(t) = non_empty_str(message.get("conversation")) {
        return MessageContent::Conversation(t);
    }
    if let Some(t) = non_empty_str(message.pointer("/extendedTextMessage/text")) {
        return MessageContent::ExtendedText(t);
    }
    for kind in [MediaKind::Image, MediaKind::Video, MediaKind::Document] {
        if let Some(media) = message.get(kind.key()) {
            if let Some(caption) = non_empty_str(media.get("caption")) {
                return MessageContent::Media(kind, caption);
            }
        }
    }
    if message.get("audioMessage").is_some() {
        return MessageContent::Audio;
    }
    if message.get("stickerMessage").is_some() {
        return MessageContent::Sticker;
    }
    for key in [
        "pollCreationMessage",
        "pollCreationMessageV2",
        "pollCreationMessageV3",
    ] {
        if let Some(poll) = message.get(key) {
            let name = poll
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return MessageContent::PollCreation(name);
        }
    }
    if message.get("listMessage").is_some() {
        return MessageContent::List;
    }
    if message.get("buttonsMessage").is_some() {
        return MessageContent::Buttons;
    }
    if message.get("templateMessage").is_some() {
        return MessageContent::Template;
    }
    if let Some(reaction) = message.get("reactionMessage") {
        let glyph = reaction
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return MessageContent::Reaction(glyph);
    }
    if allow_ephemeral && message.get("ephemeralMessage").is_some() {
        let inner = message
            .pointer("/ephemeralMessage/message")
            .map(|m| classify_at(m, false))
            .unwrap_or(MessageContent::Unrecognized);
        return MessageContent::Ephemeral(Box::new(inner));
    }
    MessageContent::Unrecognized
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Normalize one raw payload into a record. `metadata` is the chat's group
/// metadata (possibly degraded), `None` for personal chats.
pub fn normalize(raw: &RawMessage, metadata: Option<&GroupMetadata>) -> IncomingMessageRecord {
    let chat = &raw.key.remote_jid;
    let chat_type = if chat.is_group() {
        ChatType::Group
    } else {
        ChatType::Personal
    };

    let content = raw
        .message
        .as_ref()
        .map(MessageContent::classify)
        .unwrap_or(MessageContent::Unrecognized);
    let mut text = content.text();

    let ctx = raw.message.as_ref().and_then(context_info);

    let mentioned_names = resolve_mentions(
        ctx.map(mentioned_jids).unwrap_or_default(),
        &text,
        metadata,
    );
    text = rewrite_mentions(text, &mentioned_names);

    if let Some(quoted) = ctx.and_then(quoted_text) {
        text.push_str(&format!(" (quoted: {quoted})"));
    }

    let time = raw
        .message_timestamp
        .and_then(|secs| Local.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Local::now)
        .format(TIME_FORMAT)
        .to_string();

    let chat_name = match chat_type {
        ChatType::Group => metadata
            .map(|m| m.subject.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| chat.to_string()),
        ChatType::Personal => raw
            .push_name
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| chat.to_string()),
    };

    let sender = raw.key.participant.as_ref().unwrap_or(chat);
    let sender_name = raw
        .push_name
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| sender.to_string());

    let group_image = match chat_type {
        ChatType::Group => metadata.and_then(|m| m.avatar_url.clone()),
        ChatType::Personal => None,
    };

    IncomingMessageRecord {
        time,
        chat_type,
        chat_name,
        sender_name,
        text,
        group_image,
        remote_jid: chat.clone(),
        mentioned_names,
    }
}

/// The context info block lives on whichever variant carries it.
fn context_info(message: &Value) -> Option<&Value> {
    const PATHS: [&str; 5] = [
        "/extendedTextMessage/contextInfo",
        "/imageMessage/contextInfo",
        "/videoMessage/contextInfo",
        "/documentMessage/contextInfo",
        "/ephemeralMessage/message/extendedTextMessage/contextInfo",
    ];
    PATHS.iter().find_map(|p| message.pointer(p))
}

fn mentioned_jids(ctx: &Value) -> Vec<Jid> {
    ctx.get("mentionedJid")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(Jid::new)
                .collect()
        })
        .unwrap_or_default()
}

/// Build the ordered `{jid, name}` list: explicitly mentioned jids first (in
/// payload order), then any group participant whose `@<local part>` occurs in
/// the text as a bounded mention (plain `conversation` payloads carry mentions
/// with no context block). Names prefer the explicit name field, then the
/// notify nickname, then the raw jid.
fn resolve_mentions(
    explicit: Vec<Jid>,
    text: &str,
    metadata: Option<&GroupMetadata>,
) -> Vec<MentionedName> {
    let participants = metadata.map(|m| m.participants.as_slice()).unwrap_or(&[]);

    let mut out: Vec<MentionedName> = Vec::new();
    let push = |jid: Jid, out: &mut Vec<MentionedName>| {
        if out.iter().any(|m| m.jid == jid) {
            return;
        }
        let name = participants
            .iter()
            .find(|p| p.id == jid)
            .and_then(|p| {
                p.name
                    .clone()
                    .filter(|s| !s.is_empty())
                    .or_else(|| p.notify.clone().filter(|s| !s.is_empty()))
            })
            .unwrap_or_else(|| jid.to_string());
        out.push(MentionedName { jid, name });
    };

    for jid in explicit {
        push(jid, &mut out);
    }
    for p in participants {
        let Some(re) = mention_regex(p.id.local_part()) else {
            continue;
        };
        if re.is_match(text) {
            push(p.id.clone(), &mut out);
        }
    }
    out
}

/// Bounded matcher for `@<prefix>`: the prefix is escaped (jids are data,
/// not patterns) and must be followed by end-of-text or a character that
/// cannot continue an id, so one participant's id never matches inside a
/// longer participant's id.
fn mention_regex(prefix: &str) -> Option<Regex> {
    if prefix.is_empty() {
        return None;
    }
    Regex::new(&format!("@{}($|[^0-9A-Za-z])", regex::escape(prefix))).ok()
}

/// Replace every mention of `@<local part>` with `@<resolved name>`. The
/// closure replacer inserts the name verbatim, so `$`/`\` in names never
/// expand as capture references.
fn rewrite_mentions(mut text: String, mentions: &[MentionedName]) -> String {
    for mention in mentions {
        let Some(re) = mention_regex(mention.jid.local_part()) else {
            continue;
        };
        text = re
            .replace_all(&text, |caps: &Captures| {
                format!("@{}{}", mention.name, &caps[1])
            })
            .into_owned();
    }
    text
}

/// Quoted text uses the same priority order as the top-level extraction:
/// conversation, extended text, then captions.
fn quoted_text(ctx: &Value) -> Option<String> {
    let quoted = ctx.get("quotedMessage")?;
    if let Some(t) = non_empty_str(quoted.get("conversation")) {
        return Some(t);
    }
    if let Some(t) = non_empty_str(quoted.pointer("/extendedTextMessage/text")) {
        return Some(t);
    }
    for kind in [MediaKind::Image, MediaKind::Video, MediaKind::Document] {
        if let Some(t) = non_empty_str(quoted.pointer(&format!("/{}/caption", kind.key()))) {
            return Some(t);
        }
    }
    None
}
