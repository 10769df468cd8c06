use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ChatError;

pub const SYSTEM_NICKNAME: &str = "System";
const MAX_ROOM_CHARS: usize = 64;
const DATA_IMAGE_PREFIX: &str = "data:image/";
const BASE64_MARKER: &str = ";base64,";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        use MessageKind::*;
        match self {
            Text => "text",
            Image => "image",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            other => Err(ChatError::validation("kind", format!("unknown kind {other:?}"))),
        }
    }
}

/// Size ceilings applied when a client message is constructed.
#[derive(Debug, Clone)]
pub struct MessageLimits {
    pub max_nickname_chars: usize,
    pub max_text_bytes: usize,
    /// Ceiling on the decoded image, not on the data URI carrying it.
    pub max_image_bytes: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_nickname_chars: 32,
            max_text_bytes: 64 * 1024,
            max_image_bytes: 10 * 1024 * 1024,
        }
    }
}

/// A validated message that no room has accepted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    nickname: String,
    body: String,
    kind: MessageKind,
    room: String,
}

impl Draft {
    /// Announcement authored by the room itself. Skips user validation.
    pub fn system(room: &str, text: impl Into<String>) -> Self {
        Self {
            nickname: SYSTEM_NICKNAME.to_owned(),
            body: text.into(),
            kind: MessageKind::Text,
            room: room.to_owned(),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Stamp the draft. Only the room worker calls this.
    pub(crate) fn accept(self, seq: u64, timestamp: i64) -> Message {
        Message {
            id: Uuid::now_v7(),
            room: self.room,
            seq,
            nickname: self.nickname,
            body: self.body,
            kind: self.kind,
            timestamp,
        }
    }
}

/// One accepted chat event. Shared as `Arc<Message>` once stamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room: String,
    pub seq: u64,
    pub nickname: String,
    pub body: String,
    pub kind: MessageKind,
    /// Unix milliseconds, assigned by the room.
    pub timestamp: i64,
}

impl Message {
    pub fn is_system(&self) -> bool {
        self.nickname == SYSTEM_NICKNAME
    }
}

pub fn new_message(
    nickname: &str,
    body: String,
    kind: &str,
    room: &str,
    limits: &MessageLimits,
) -> Result<Draft, ChatError> {
    let nickname = validate_nickname(nickname, limits)?;
    let room = validate_room(room)?;
    let kind = kind.parse::<MessageKind>()?;

    match kind {
        MessageKind::Text => {
            if body.trim().is_empty() {
                return Err(ChatError::validation("body", "text message is empty"));
            }
            if body.len() > limits.max_text_bytes {
                return Err(ChatError::validation(
                    "body",
                    format!("text exceeds {} bytes", limits.max_text_bytes),
                ));
            }
        }
        MessageKind::Image => {
            let decoded = image_payload_len(&body)?;
            if decoded > limits.max_image_bytes {
                return Err(ChatError::validation(
                    "body",
                    format!("image exceeds {} bytes", limits.max_image_bytes),
                ));
            }
        }
    }

    Ok(Draft {
        nickname,
        body,
        kind,
        room,
    })
}

pub fn validate_nickname(nickname: &str, limits: &MessageLimits) -> Result<String, ChatError> {
    let nickname = nickname.trim();
    if nickname.is_empty() {
        return Err(ChatError::validation("nickname", "nickname is empty"));
    }
    if nickname.chars().count() > limits.max_nickname_chars {
        return Err(ChatError::validation(
            "nickname",
            format!("longer than {} characters", limits.max_nickname_chars),
        ));
    }
    if nickname.eq_ignore_ascii_case(SYSTEM_NICKNAME) {
        return Err(ChatError::validation("nickname", "reserved"));
    }
    Ok(nickname.to_owned())
}

pub fn validate_room(room: &str) -> Result<String, ChatError> {
    let room = room.trim();
    if room.is_empty() {
        return Err(ChatError::validation("room", "room id is empty"));
    }
    if room.chars().count() > MAX_ROOM_CHARS {
        return Err(ChatError::validation(
            "room",
            format!("longer than {MAX_ROOM_CHARS} characters"),
        ));
    }
    Ok(room.to_owned())
}

/// Decoded byte length of a `data:image/...;base64,` URI, computed without
/// decoding it.
fn image_payload_len(body: &str) -> Result<usize, ChatError> {
    let malformed = || ChatError::validation("body", "image must be a base64 data:image URI");

    if !body.starts_with(DATA_IMAGE_PREFIX) {
        return Err(malformed());
    }
    let marker = body.find(BASE64_MARKER).ok_or_else(malformed)?;
    let payload = &body[marker + BASE64_MARKER.len()..];
    if payload.is_empty() || payload.len() % 4 != 0 {
        return Err(malformed());
    }

    let padding = payload.bytes().rev().take_while(|&b| b == b'=').count();
    let data = &payload[..payload.len() - padding];
    if padding > 2 || !data.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/') {
        return Err(malformed());
    }
    Ok(payload.len() / 4 * 3 - padding)
}

pub(crate) fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_uri(decoded_len: usize) -> String {
        // every 3 decoded bytes take 4 base64 chars
        let groups = decoded_len.div_ceil(3);
        let mut payload = "AAAA".repeat(groups);
        match decoded_len % 3 {
            1 => payload.replace_range(payload.len() - 2.., "=="),
            2 => payload.replace_range(payload.len() - 1.., "="),
            _ => {}
        }
        format!("data:image/png;base64,{payload}")
    }

    #[test]
    fn text_message_is_built() {
        let limits = MessageLimits::default();
        let draft = new_message("  alice ", "hi".into(), "text", "lobby", &limits).unwrap();
        assert_eq!(draft.nickname(), "alice");
        assert_eq!(draft.room(), "lobby");

        let msg = draft.accept(1, 42);
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.seq, 1);
        assert_eq!(msg.timestamp, 42);
        assert!(!msg.is_system());
    }

    #[test]
    fn blank_nickname_is_rejected() {
        let limits = MessageLimits::default();
        for nickname in ["", "   ", "\t\n"] {
            let err = new_message(nickname, "hi".into(), "text", "lobby", &limits).unwrap_err();
            assert!(matches!(err, ChatError::Validation { field: "nickname", .. }));
        }
    }

    #[test]
    fn reserved_and_long_nicknames_are_rejected() {
        let limits = MessageLimits { max_nickname_chars: 4, ..Default::default() };
        assert!(validate_nickname("system", &limits).is_err());
        assert!(validate_nickname("abcde", &limits).is_err());
        assert_eq!(validate_nickname("abcd", &limits).unwrap(), "abcd");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = new_message("a", "hi".into(), "video", "lobby", &MessageLimits::default())
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation { field: "kind", .. }));
    }

    #[test]
    fn empty_and_oversized_text_is_rejected() {
        let limits = MessageLimits { max_text_bytes: 8, ..Default::default() };
        assert!(new_message("a", "  ".into(), "text", "lobby", &limits).is_err());
        assert!(new_message("a", "123456789".into(), "text", "lobby", &limits).is_err());
        assert!(new_message("a", "12345678".into(), "text", "lobby", &limits).is_ok());
    }

    #[test]
    fn image_size_is_measured_after_decoding() {
        assert_eq!(image_payload_len(&image_uri(3)).unwrap(), 3);
        assert_eq!(image_payload_len(&image_uri(4)).unwrap(), 4);
        assert_eq!(image_payload_len(&image_uri(5)).unwrap(), 5);

        let limits = MessageLimits { max_image_bytes: 10, ..Default::default() };
        assert!(new_message("a", image_uri(10), "image", "lobby", &limits).is_ok());
        let err = new_message("a", image_uri(11), "image", "lobby", &limits).unwrap_err();
        assert!(matches!(err, ChatError::Validation { field: "body", .. }));
    }

    #[test]
    fn malformed_image_is_rejected() {
        let limits = MessageLimits::default();
        for body in [
            "hello",
            "data:text/plain;base64,AAAA",
            "data:image/png,AAAA",
            "data:image/png;base64,AAA",
            "data:image/png;base64,",
            "data:image/png;base64,!!!!",
            "data:image/png;base64,A=AA",
            "data:image/png;base64,AA A",
        ] {
            assert!(new_message("a", body.into(), "image", "lobby", &limits).is_err(), "{body}");
        }
    }

    #[test]
    fn system_draft_skips_validation() {
        let msg = Draft::system("lobby", "a joined the room").accept(3, 0);
        assert!(msg.is_system());
        assert_eq!(msg.nickname, SYSTEM_NICKNAME);
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn message_serializes_kind_in_snake_case() {
        let msg = Draft::system("lobby", "hi").accept(1, 7);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["nickname"], "System");
        assert_eq!(json["timestamp"], 7);
    }
}
