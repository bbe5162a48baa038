//! Chat types: messages, citations, wire frames and stream events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::Metadata;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A backend-asserted link between an answer and a source passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default)]
    pub id: Option<String>,
    pub citation_text: String,
    pub source_title: String,
    #[serde(default)]
    pub source_author: Option<String>,
    /// 0.0..=1.0
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_score: Option<f64>,
    #[serde(default)]
    pub context_snippet: Option<String>,
}

/// A finalized message. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Only set on assistant messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            citations: None,
            metadata: None,
        }
    }

    pub fn assistant(content: impl Into<String>, citations: Vec<Citation>, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            citations: Some(citations),
            metadata: Some(metadata),
        }
    }

    pub fn citations(&self) -> &[Citation] {
        self.citations.as_deref().unwrap_or(&[])
    }

    pub fn to_history(&self) -> HistoryEntry {
        HistoryEntry {
            role: self.role.as_str().to_string(),
            content: self.content.clone(),
        }
    }
}

/// Prior turn sent along with a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// A prompt ready to go out on either transport
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub episode_id: Option<String>,
    pub source_ids: Vec<String>,
    pub history: Vec<HistoryEntry>,
}

impl ChatRequest {
    /// Frame for the socket endpoint
    pub fn socket_frame(&self) -> ClientFrame {
        ClientFrame::Chat {
            message: self.message.clone(),
            episode_id: self.episode_id.clone(),
            source_ids: self.source_ids.clone(),
            history: self.history.clone(),
        }
    }

    /// JSON body for the HTTP streaming endpoint
    pub fn http_body(&self) -> StreamRequestBody {
        StreamRequestBody {
            message: self.message.clone(),
            episode_id: self.episode_id.clone(),
            source_ids: self.source_ids.clone(),
            conversation_history: self.history.clone(),
        }
    }
}

/// Messages sent from the client over the socket
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Chat {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        episode_id: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        source_ids: Vec<String>,
        history: Vec<HistoryEntry>,
    },
    Ping,
}

/// Body of `POST /api/studio/conversation/stream`
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequestBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_ids: Vec<String>,
    pub conversation_history: Vec<HistoryEntry>,
}

/// Events emitted by the backend on both transports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Text delta of the reply being generated
    Content { content: String },
    /// Reply finished; carries the citations for the whole answer
    Complete {
        #[serde(default)]
        citations: Vec<Citation>,
        #[serde(default)]
        metadata: Metadata,
    },
    /// Generation failed
    Error { error: String },
    /// HTTP end-of-stream marker, sent after `complete`
    Done,
    /// Socket keepalive reply
    Pong,
    /// Any event type this client does not know about
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// `complete` and `error` end a reply
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Content { .. } => "content",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done => "done",
            StreamEvent::Pong => "pong",
            StreamEvent::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_event_ignores_extra_fields() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"content","content":"Four score","full_response":"Four score"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::Content {
                content: "Four score".into()
            }
        );
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_complete_event_with_citations() {
        let json = r#"{
            "type": "complete",
            "citations": [{
                "id": "c-1",
                "citation_text": "Gettysburg Address, 1863",
                "source_title": "Collected Works",
                "source_author": "Abraham Lincoln",
                "confidence_score": 0.91,
                "context_snippet": "that this nation, under God"
            }],
            "coverage_report": {"covered": 1},
            "metadata": {"context_chunks_used": 4}
        }"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        match event {
            StreamEvent::Complete { citations, metadata } => {
                assert_eq!(citations.len(), 1);
                assert_eq!(citations[0].source_author.as_deref(), Some("Abraham Lincoln"));
                assert_eq!(metadata["context_chunks_used"], 4);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_complete_event_defaults() {
        let event: StreamEvent = serde_json::from_str(r#"{"type":"complete"}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Complete {
                citations: vec![],
                metadata: Metadata::new()
            }
        );
    }

    #[test]
    fn test_unknown_and_marker_events() {
        let done: StreamEvent = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(done, StreamEvent::Done);
        let other: StreamEvent = serde_json::from_str(r#"{"type":"citation"}"#).unwrap();
        assert_eq!(other, StreamEvent::Unknown);
        assert_eq!(other.event_type(), "unknown");
    }

    #[test]
    fn test_socket_frame_shape() {
        let request = ChatRequest {
            message: "What of the Union?".into(),
            episode_id: Some("ep-1".into()),
            source_ids: vec!["s-1".into()],
            history: vec![HistoryEntry {
                role: "user".into(),
                content: "Hello".into(),
            }],
        };
        let frame = serde_json::to_value(request.socket_frame()).unwrap();
        assert_eq!(
            frame,
            json!({
                "type": "chat",
                "message": "What of the Union?",
                "episode_id": "ep-1",
                "source_ids": ["s-1"],
                "history": [{"role": "user", "content": "Hello"}]
            })
        );
    }

    #[test]
    fn test_http_body_shape() {
        let request = ChatRequest {
            message: "Hi".into(),
            episode_id: None,
            source_ids: vec![],
            history: vec![],
        };
        let body = serde_json::to_value(request.http_body()).unwrap();
        assert_eq!(body, json!({ "message": "Hi", "conversation_history": [] }));
    }

    #[test]
    fn test_ping_frame() {
        let json = serde_json::to_string(&ClientFrame::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }
}
