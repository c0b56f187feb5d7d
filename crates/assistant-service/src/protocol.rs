//! Device wire protocol.
//!
//! Every server→client frame is a text message whose first character names
//! its kind. The engine only ever builds [`ServerMessage`] values; the prefix
//! is applied in [`ServerMessage::encode`].

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// `c<text>`: a slice of the model's reply.
    Content(String),
    /// `f<summary>`: what the assistant is about to do with a tool.
    Thought(String),
    /// `w<warning>`: correction issued after verification.
    Warning(String),
    /// `t<threadId>`: id under which this exchange was persisted.
    ThreadId(String),
    /// `d`: end of the reply.
    Done,
    /// `a<json>`: request the device to perform an action.
    ActionRequest(Value),
}

impl ServerMessage {
    pub fn prefix(&self) -> char {
        match self {
            ServerMessage::Content(_) => 'c',
            ServerMessage::Thought(_) => 'f',
            ServerMessage::Warning(_) => 'w',
            ServerMessage::ThreadId(_) => 't',
            ServerMessage::Done => 'd',
            ServerMessage::ActionRequest(_) => 'a',
        }
    }

    pub fn encode(&self) -> String {
        let mut frame = String::new();
        frame.push(self.prefix());
        match self {
            ServerMessage::Content(s)
            | ServerMessage::Thought(s)
            | ServerMessage::Warning(s)
            | ServerMessage::ThreadId(s) => frame.push_str(s),
            ServerMessage::Done => {}
            ServerMessage::ActionRequest(v) => frame.push_str(&v.to_string()),
        }
        frame
    }

    /// Inverse of [`encode`](Self::encode). Used by clients and tests.
    pub fn decode(frame: &str) -> Option<Self> {
        let mut chars = frame.chars();
        let prefix = chars.next()?;
        let body = chars.as_str().to_string();
        match prefix {
            'c' => Some(ServerMessage::Content(body)),
            'f' => Some(ServerMessage::Thought(body)),
            'w' => Some(ServerMessage::Warning(body)),
            't' => Some(ServerMessage::ThreadId(body)),
            'd' if body.is_empty() => Some(ServerMessage::Done),
            'a' => serde_json::from_str(&body).ok().map(ServerMessage::ActionRequest),
            _ => None,
        }
    }
}

/// Parse a device reply to an action request.
///
/// Replies are a single JSON object. Newer clients echo the `a` prefix of the
/// request; both forms are accepted.
pub fn parse_action_reply(frame: &str) -> anyhow::Result<serde_json::Map<String, Value>> {
    let body = frame.strip_prefix('a').unwrap_or(frame);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| anyhow::anyhow!("unable to unmarshal response: {}", e))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(anyhow::anyhow!("expected a JSON object from the device, got {}", other)),
    }
}

/// Close codes used when ending a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    Normal,
    PolicyViolation,
    InternalError,
    Unauthorized,
}

impl CloseStatus {
    pub fn code(self) -> u16 {
        match self {
            CloseStatus::Normal => 1000,
            CloseStatus::PolicyViolation => 1008,
            CloseStatus::InternalError => 1011,
            CloseStatus::Unauthorized => 3000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseStatus::Normal => "normal",
            CloseStatus::PolicyViolation => "policy_violation",
            CloseStatus::InternalError => "internal_error",
            CloseStatus::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prefixes_match_wire_contract() {
        assert_eq!(ServerMessage::Content("hi ".into()).encode(), "chi ");
        assert_eq!(ServerMessage::Thought("Setting a timer".into()).encode(), "fSetting a timer");
        assert_eq!(ServerMessage::Warning("oops".into()).encode(), "woops");
        assert_eq!(ServerMessage::ThreadId("abc".into()).encode(), "tabc");
        assert_eq!(ServerMessage::Done.encode(), "d");
    }

    #[test]
    fn test_action_request_is_compact_json() {
        let frame = ServerMessage::ActionRequest(json!({"action": "get_alarm"})).encode();
        assert_eq!(frame, r#"a{"action":"get_alarm"}"#);
        assert_eq!(
            ServerMessage::decode(&frame),
            Some(ServerMessage::ActionRequest(json!({"action": "get_alarm"})))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_prefix() {
        assert_eq!(ServerMessage::decode("xwhatever"), None);
        assert_eq!(ServerMessage::decode(""), None);
        assert_eq!(ServerMessage::decode("dextra"), None);
    }

    #[test]
    fn test_action_reply_with_and_without_prefix() {
        let bare = parse_action_reply(r#"{"status":"ok"}"#).unwrap();
        let prefixed = parse_action_reply(r#"a{"status":"ok"}"#).unwrap();
        assert_eq!(bare, prefixed);
        assert_eq!(bare["status"], "ok");
    }

    #[test]
    fn test_action_reply_must_be_object() {
        assert!(parse_action_reply("[1,2]").is_err());
        assert!(parse_action_reply("not json").is_err());
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseStatus::Normal.code(), 1000);
        assert_eq!(CloseStatus::PolicyViolation.code(), 1008);
        assert_eq!(CloseStatus::InternalError.code(), 1011);
        assert_eq!(CloseStatus::Unauthorized.code(), 3000);
    }
}
