//! Session state machine
//!
//! `Idle → AwaitingFirstToken → Streaming → Idle`. A submit appends the user
//! message immediately; the assistant reply accumulates in a pending buffer
//! that is only promoted to a [`Message`] when the backend sends `complete`.
//! An `error` (or a transport failure reported through [`Session::fail`])
//! drops the buffer without producing a message.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::types::{ChatRequest, Citation, Message, StreamEvent};
use crate::api::Metadata;

/// Where the session stands with respect to the in-flight reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    AwaitingFirstToken,
    Streaming,
}

/// Episode and source scope attached to every prompt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatContext {
    pub episode_id: Option<String>,
    pub source_ids: Vec<String>,
}

/// The transient assistant reply. Not part of the message list.
#[derive(Debug, Clone)]
struct PendingReply {
    text: String,
    deltas: usize,
    /// Byte offset where the latest delta starts
    last_delta: usize,
    started_at: DateTime<Utc>,
}

/// What applying an event did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Delta,
    Completed,
    Failed,
    /// No-op: marker events, or anything arriving while idle
    Ignored,
}

#[derive(Debug, Default)]
pub struct Session {
    context: ChatContext,
    messages: Vec<Message>,
    pending: Option<PendingReply>,
    citations: Vec<Citation>,
    last_error: Option<String>,
}

impl Session {
    pub fn new(context: ChatContext) -> Self {
        Self {
            context,
            ..Default::default()
        }
    }

    pub fn context(&self) -> &ChatContext {
        &self.context
    }

    pub fn state(&self) -> StreamState {
        match &self.pending {
            None => StreamState::Idle,
            Some(p) if p.deltas == 0 => StreamState::AwaitingFirstToken,
            Some(_) => StreamState::Streaming,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.pending.is_some()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Text of the reply being streamed, if any
    pub fn buffer(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.text.as_str())
    }

    /// The most recent delta appended to the buffer
    pub fn last_delta(&self) -> Option<&str> {
        self.pending
            .as_ref()
            .filter(|p| p.deltas > 0)
            .map(|p| &p.text[p.last_delta..])
    }

    /// Citations of the most recent completed reply
    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Append a user message and start waiting for the reply.
    ///
    /// Returns `None` without touching the session when the text is blank or
    /// a reply is already in flight.
    pub fn submit(&mut self, text: &str) -> Option<ChatRequest> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if self.is_streaming() {
            debug!("Submit ignored, a reply is already streaming");
            return None;
        }

        let history = self.messages.iter().map(Message::to_history).collect();
        self.messages.push(Message::user(text));
        self.pending = Some(PendingReply {
            text: String::new(),
            deltas: 0,
            last_delta: 0,
            started_at: Utc::now(),
        });
        self.last_error = None;

        Some(ChatRequest {
            message: text.to_string(),
            episode_id: self.context.episode_id.clone(),
            source_ids: self.context.source_ids.clone(),
            history,
        })
    }

    pub fn apply(&mut self, event: StreamEvent) -> Applied {
        match event {
            StreamEvent::Content { content } => {
                if self.push_delta(&content) {
                    Applied::Delta
                } else {
                    Applied::Ignored
                }
            }
            StreamEvent::Complete {
                citations,
                metadata,
            } => match self.complete(citations, metadata) {
                Some(_) => Applied::Completed,
                None => Applied::Ignored,
            },
            StreamEvent::Error { error } => {
                if self.is_streaming() {
                    self.fail(error);
                    Applied::Failed
                } else {
                    Applied::Ignored
                }
            }
            StreamEvent::Done | StreamEvent::Pong | StreamEvent::Unknown => Applied::Ignored,
        }
    }

    /// Append a content delta. Returns false when no reply is pending.
    pub fn push_delta(&mut self, delta: &str) -> bool {
        match self.pending.as_mut() {
            Some(pending) => {
                pending.last_delta = pending.text.len();
                pending.text.push_str(delta);
                pending.deltas += 1;
                true
            }
            None => {
                debug!("Dropping content delta received while idle");
                false
            }
        }
    }

    /// Promote the pending reply to an assistant message
    pub fn complete(&mut self, citations: Vec<Citation>, metadata: Metadata) -> Option<&Message> {
        let Some(pending) = self.pending.take() else {
            debug!("Dropping completion received while idle");
            return None;
        };

        let elapsed = Utc::now() - pending.started_at;
        debug!(
            chars = pending.text.len(),
            deltas = pending.deltas,
            citations = citations.len(),
            elapsed_ms = elapsed.num_milliseconds(),
            "Reply completed"
        );

        self.citations = citations.clone();
        self.messages
            .push(Message::assistant(pending.text, citations, metadata));
        self.messages.last()
    }

    /// Drop the pending reply and record the error
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(pending) = self.pending.take() {
            warn!(
                error = %reason,
                discarded_chars = pending.text.len(),
                "Reply failed"
            );
        }
        self.last_error = Some(reason);
    }

    /// Forget the conversation, keeping the context
    pub fn clear(&mut self) {
        self.messages.clear();
        self.pending = None;
        self.citations.clear();
        self.last_error = None;
    }

    /// Forget the conversation and switch to a new episode / source scope
    pub fn reset(&mut self, context: ChatContext) {
        self.clear();
        self.context = context;
    }
}
