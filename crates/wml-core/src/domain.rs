use serde::{Deserialize, Serialize};

/// Suffix distinguishing group chats from personal ones.
pub const GROUP_JID_SUFFIX: &str = "@g.us";

/// Chat/user identifier ("jid"), e.g. `6281234@s.whatsapp.net` for a person
/// or `120363041234-1605@g.us` for a group. Opaque apart from the suffix
/// class and the local part before the `@` separator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(pub String);

impl Jid {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_group(&self) -> bool {
        self.0.ends_with(GROUP_JID_SUFFIX)
    }

    /// Local part before the `@` domain separator (the whole string if there
    /// is no separator).
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Personal,
    Group,
}

/// One group member as reported by the backend.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupParticipant {
    pub id: Jid,
    /// Explicit display name, when the backend knows one.
    pub name: Option<String>,
    /// Self-chosen "notify" nickname (push name).
    pub notify: Option<String>,
}

/// Metadata for a group chat, fetched on demand and cached per jid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupMetadata {
    pub subject: String,
    pub participants: Vec<GroupParticipant>,
    pub avatar_url: Option<String>,
}

impl GroupMetadata {
    /// Fallback value when the remote fetch fails and nothing is cached: the
    /// raw jid stands in for the subject, mentions stay unresolved.
    pub fn degraded(jid: &Jid) -> Self {
        Self {
            subject: jid.to_string(),
            participants: Vec::new(),
            avatar_url: None,
        }
    }
}

/// A resolved mention: the mentioned jid and the display name substituted
/// into the message text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MentionedName {
    pub jid: Jid,
    pub name: String,
}

/// The single normalized record shape every inbound payload is reduced to.
///
/// Immutable once constructed; the persisted log is a JSON array of these,
/// field names below being the external contract with the polling process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessageRecord {
    pub time: String,
    pub chat_type: ChatType,
    pub chat_name: String,
    pub sender_name: String,
    pub text: String,
    #[serde(default)]
    pub group_image: Option<String>,
    pub remote_jid: Jid,
    #[serde(default)]
    pub mentioned_names: Vec<MentionedName>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jid_suffix_classifies_groups() {
        assert!(Jid::new("120363041234-1605@g.us").is_group());
        assert!(!Jid::new("6281234@s.whatsapp.net").is_group());
        assert!(!Jid::new("no-separator").is_group());
    }

    #[test]
    fn jid_local_part_strips_domain() {
        assert_eq!(Jid::new("6281234@s.whatsapp.net").local_part(), "6281234");
        assert_eq!(Jid::new("no-separator").local_part(), "no-separator");
    }

    #[test]
    fn record_serializes_with_external_field_names() {
        let rec = IncomingMessageRecord {
            time: "2026-01-01 10:00:00".to_string(),
            chat_type: ChatType::Group,
            chat_name: "Team".to_string(),
            sender_name: "Ana".to_string(),
            text: "hi".to_string(),
            group_image: None,
            remote_jid: Jid::new("1@g.us"),
            mentioned_names: vec![MentionedName {
                jid: Jid::new("2@s.whatsapp.net"),
                name: "Bo".to_string(),
            }],
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["chatType"], "group");
        assert_eq!(v["chatName"], "Team");
        assert_eq!(v["senderName"], "Ana");
        assert_eq!(v["remoteJid"], "1@g.us");
        assert_eq!(v["mentionedNames"][0]["jid"], "2@s.whatsapp.net");
        assert_eq!(v["mentionedNames"][0]["name"], "Bo");
    }
}
