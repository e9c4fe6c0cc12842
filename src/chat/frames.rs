use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Frames a chat client may send.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        username: String,
        role: String,
    },
    SendMessage {
        from: String,
        #[serde(default)]
        role: String,
        content: String,
    },
}

/// Frames the server writes to a chat client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Message {
        from: String,
        role: String,
        content: String,
    },
    Error {
        error: String,
    },
}

impl ServerFrame {
    pub fn error(msg: impl Into<String>) -> Self {
        ServerFrame::Error { error: msg.into() }
    }

    pub fn to_text(&self) -> String {
        // plain enum of strings; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not a JSON object")]
    NotJson,
    #[error("unknown frame type {0:?}")]
    UnknownType(String),
    #[error("missing frame type")]
    MissingType,
    #[error("malformed {kind} frame: {reason}")]
    Malformed { kind: String, reason: String },
    #[error("{0}")]
    Invalid(&'static str),
}

const KNOWN_TYPES: &[&str] = &["join", "send_message"];

impl ClientFrame {
    /// Decodes and validates one text frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(|_| FrameError::NotJson)?;
        let kind = match value.get("type") {
            Some(Value::String(s)) => s.clone(),
            Some(_) | None => return Err(FrameError::MissingType),
        };
        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(FrameError::UnknownType(kind));
        }
        let frame: ClientFrame =
            serde_json::from_value(value).map_err(|e| FrameError::Malformed {
                kind,
                reason: e.to_string(),
            })?;
        frame.validate()?;
        Ok(frame)
    }

    fn validate(&self) -> Result<(), FrameError> {
        match self {
            ClientFrame::Join { username, .. } if username.trim().is_empty() => {
                Err(FrameError::Invalid("username is required"))
            }
            ClientFrame::SendMessage { from, .. } if from.trim().is_empty() => {
                Err(FrameError::Invalid("from is required"))
            }
            ClientFrame::SendMessage { content, .. } if content.trim().is_empty() => {
                Err(FrameError::Invalid("message is empty"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_frames() {
        assert_eq!(
            ClientFrame::decode(r#"{"type":"join","username":"bob","role":"user"}"#).unwrap(),
            ClientFrame::Join {
                username: "bob".into(),
                role: "user".into()
            }
        );
        assert_eq!(
            ClientFrame::decode(
                r#"{"type":"send_message","from":"bob","role":"user","content":"hi"}"#
            )
            .unwrap(),
            ClientFrame::SendMessage {
                from: "bob".into(),
                role: "user".into(),
                content: "hi".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert_eq!(
            ClientFrame::decode(r#"{"type":"typing"}"#).unwrap_err(),
            FrameError::UnknownType("typing".into())
        );
        assert_eq!(
            ClientFrame::decode(r#"{"username":"bob"}"#).unwrap_err(),
            FrameError::MissingType
        );
        assert_eq!(ClientFrame::decode("hello").unwrap_err(), FrameError::NotJson);
        assert!(matches!(
            ClientFrame::decode(r#"{"type":"join","username":"bob"}"#).unwrap_err(),
            FrameError::Malformed { .. }
        ));
        assert_eq!(
            ClientFrame::decode(r#"{"type":"send_message","from":"bob","content":"  "}"#)
                .unwrap_err(),
            FrameError::Invalid("message is empty")
        );
    }

    #[test]
    fn server_frames_are_tagged() {
        let text = ServerFrame::Message {
            from: "bob".into(),
            role: "user".into(),
            content: "hi".into(),
        }
        .to_text();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "message");
        assert_eq!(v["from"], "bob");

        let v: Value = serde_json::from_str(&ServerFrame::error("nope").to_text()).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["error"], "nope");
    }
}
