//! Maps decoded frames to semantic stream updates

use crate::error::StreamError;
use crate::sse::Frame;
use serde::Deserialize;
use std::fmt;
use tracing::debug;

/// Prefix the server uses to smuggle errors through the `user` tag
const ERROR_PREFIX: &str = "ERROR:";

/// Tag vocabulary of `output` segments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Thinking,
    Exec,
    ExecOutput,
    Stderr,
    ExecTime,
    FileUpdate,
    Stdout,
    Agent,
    Error,
    // Non-display tags
    Meta,
    User,
    Title,
    TokensUsed,
    Done,
    Session,
    /// A tag outside the known vocabulary, displayed as plain text
    Other(String),
}

impl Tag {
    pub fn parse(name: &str) -> Self {
        match name {
            "thinking" => Tag::Thinking,
            "exec" => Tag::Exec,
            "exec_output" => Tag::ExecOutput,
            "stderr" => Tag::Stderr,
            "exec_time" => Tag::ExecTime,
            "file_update" => Tag::FileUpdate,
            "stdout" => Tag::Stdout,
            "agent" => Tag::Agent,
            "error" => Tag::Error,
            "meta" => Tag::Meta,
            "user" => Tag::User,
            "title" => Tag::Title,
            "tokens_used" => Tag::TokensUsed,
            "done" => Tag::Done,
            "session" => Tag::Session,
            other => Tag::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Tag::Thinking => "thinking",
            Tag::Exec => "exec",
            Tag::ExecOutput => "exec_output",
            Tag::Stderr => "stderr",
            Tag::ExecTime => "exec_time",
            Tag::FileUpdate => "file_update",
            Tag::Stdout => "stdout",
            Tag::Agent => "agent",
            Tag::Error => "error",
            Tag::Meta => "meta",
            Tag::User => "user",
            Tag::Title => "title",
            Tag::TokensUsed => "tokens_used",
            Tag::Done => "done",
            Tag::Session => "session",
            Tag::Other(name) => name,
        }
    }

    /// Tags that never produce display blocks
    pub fn is_filtered(&self) -> bool {
        matches!(
            self,
            Tag::Meta | Tag::User | Tag::Title | Tag::TokensUsed | Tag::Done | Tag::Session
        )
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tagged unit of content from an `output` frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub tag: Tag,
    pub data: String,
}

impl Segment {
    pub fn new(tag: Tag, data: impl Into<String>) -> Self {
        Self {
            tag,
            data: data.into(),
        }
    }
}

/// Semantic update carried by one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    SessionAssigned(String),
    /// Untagged plain content
    ContentDelta(String),
    Segment(Segment),
    /// Server-side completion notice
    Done { session_id: Option<String> },
}

#[derive(Deserialize)]
struct SessionPayload {
    session_id: String,
}

#[derive(Deserialize)]
struct MessagePayload {
    content: String,
}

#[derive(Deserialize)]
struct OutputPayload {
    tag: String,
    data: String,
}

#[derive(Deserialize)]
struct DonePayload {
    #[serde(default)]
    session_id: Option<String>,
}

fn parse<'a, T: Deserialize<'a>>(frame: &'a Frame) -> Result<T, StreamError> {
    serde_json::from_str(&frame.data).map_err(|source| StreamError::Decode {
        event: frame.event.clone(),
        source,
    })
}

/// Interpret one frame. Unknown events yield `Ok(None)`.
pub fn interpret(frame: &Frame) -> Result<Option<StreamUpdate>, StreamError> {
    let update = match frame.event.as_str() {
        "session" => {
            let payload: SessionPayload = parse(frame)?;
            StreamUpdate::SessionAssigned(payload.session_id)
        }
        "message" => {
            let payload: MessagePayload = parse(frame)?;
            StreamUpdate::ContentDelta(payload.content)
        }
        "output" => {
            let payload: OutputPayload = parse(frame)?;
            let tag = match Tag::parse(&payload.tag) {
                Tag::User if payload.data.starts_with(ERROR_PREFIX) => Tag::Error,
                tag => tag,
            };
            StreamUpdate::Segment(Segment::new(tag, payload.data))
        }
        "done" => {
            let payload: DonePayload = parse(frame)?;
            StreamUpdate::Done {
                session_id: payload.session_id,
            }
        }
        other => {
            debug!("Ignoring frame with unknown event '{}'", other);
            return Ok(None);
        }
    };
    Ok(Some(update))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: &str) -> Frame {
        Frame {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_session_frame() {
        let update = interpret(&frame("session", r#"{"session_id":"abc-1"}"#)).unwrap();
        assert_eq!(update, Some(StreamUpdate::SessionAssigned("abc-1".to_string())));
    }

    #[test]
    fn test_message_frame() {
        let update = interpret(&frame("message", r#"{"content":"Hi"}"#)).unwrap();
        assert_eq!(update, Some(StreamUpdate::ContentDelta("Hi".to_string())));
    }

    #[test]
    fn test_output_frame() {
        let update = interpret(&frame("output", r#"{"tag":"exec","data":"ls\n"}"#)).unwrap();
        assert_eq!(
            update,
            Some(StreamUpdate::Segment(Segment::new(Tag::Exec, "ls\n")))
        );
    }

    #[test]
    fn test_user_error_is_retagged() {
        let update = interpret(&frame(
            "output",
            r#"{"tag":"user","data":"ERROR: usage limit reached"}"#,
        ))
        .unwrap();
        assert_eq!(
            update,
            Some(StreamUpdate::Segment(Segment::new(
                Tag::Error,
                "ERROR: usage limit reached"
            )))
        );

        // Plain user echoes keep their filtered tag
        let update = interpret(&frame("output", r#"{"tag":"user","data":"hello"}"#)).unwrap();
        assert_eq!(
            update,
            Some(StreamUpdate::Segment(Segment::new(Tag::User, "hello")))
        );
    }

    #[test]
    fn test_unknown_tag_is_preserved() {
        let update = interpret(&frame("output", r#"{"tag":"plan","data":"1. x"}"#)).unwrap();
        assert_eq!(
            update,
            Some(StreamUpdate::Segment(Segment::new(
                Tag::Other("plan".to_string()),
                "1. x"
            )))
        );
    }

    #[test]
    fn test_done_frame() {
        let update = interpret(&frame(
            "done",
            r#"{"session_id":"s-9","full_content":"All set"}"#,
        ))
        .unwrap();
        assert_eq!(
            update,
            Some(StreamUpdate::Done {
                session_id: Some("s-9".to_string())
            })
        );
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        assert_eq!(interpret(&frame("ping", "not json")).unwrap(), None);
        assert_eq!(interpret(&frame("", r#"{"content":"x"}"#)).unwrap(), None);
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        let err = interpret(&frame("output", r#"{"tag":"stdout","data":"#)).unwrap_err();
        assert!(matches!(err, StreamError::Decode { ref event, .. } if event == "output"));

        // Missing field is a decode error as well
        let err = interpret(&frame("message", r#"{"text":"x"}"#)).unwrap_err();
        assert!(matches!(err, StreamError::Decode { .. }));
    }

    #[test]
    fn test_tag_round_trips_name() {
        for name in ["thinking", "exec_output", "tokens_used", "custom"] {
            assert_eq!(Tag::parse(name).as_str(), name);
        }
        assert!(Tag::Meta.is_filtered());
        assert!(!Tag::Other("meta2".to_string()).is_filtered());
    }
}
