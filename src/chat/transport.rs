//! Transport abstraction and socket-or-HTTP selection

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use tracing::debug;

use super::http::HttpStreamTransport;
use super::types::{ChatRequest, StreamEvent};
use super::ws::WsTransport;
use crate::error::{ChatError, ChatResult};

/// Events of one reply, in transport order
pub type EventStream = BoxStream<'static, ChatResult<StreamEvent>>;

/// Something that can carry a prompt to the backend and stream the reply back
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send `request` and return the events of its reply.
    ///
    /// The stream yields until a terminal event (`complete` / `error`) or a
    /// transport error, and may end early if the connection drops.
    async fn open_stream(&self, request: &ChatRequest) -> ChatResult<EventStream>;

    /// Whether a send right now would go out on this transport
    fn is_available(&self) -> bool {
        true
    }

    fn kind(&self) -> TransportKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    HttpStream,
    Selector,
    Mock,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::HttpStream => "http-stream",
            TransportKind::Selector => "selector",
            TransportKind::Mock => "mock",
        };
        f.write_str(name)
    }
}

/// Prefers the persistent socket and falls back to HTTP streaming when it is
/// not open at send time.
pub struct TransportSelector<P = WsTransport, F = HttpStreamTransport> {
    primary: Option<P>,
    fallback: F,
}

impl<P: ChatTransport, F: ChatTransport> TransportSelector<P, F> {
    pub fn new(primary: Option<P>, fallback: F) -> Self {
        Self { primary, fallback }
    }

    /// HTTP only, no socket
    pub fn fallback_only(fallback: F) -> Self {
        Self::new(None, fallback)
    }

    pub fn primary(&self) -> Option<&P> {
        self.primary.as_ref()
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    /// Transport the next send would use
    pub fn active_kind(&self) -> TransportKind {
        match &self.primary {
            Some(p) if p.is_available() => p.kind(),
            _ => self.fallback.kind(),
        }
    }
}

#[async_trait]
impl<P: ChatTransport, F: ChatTransport> ChatTransport for TransportSelector<P, F> {
    async fn open_stream(&self, request: &ChatRequest) -> ChatResult<EventStream> {
        if let Some(primary) = &self.primary {
            if primary.is_available() {
                match primary.open_stream(request).await {
                    Err(ChatError::NotConnected) => {
                        debug!(transport = %primary.kind(), "Primary transport dropped before send");
                    }
                    result => return result,
                }
            } else {
                debug!(transport = %primary.kind(), "Primary transport not open");
            }
        }

        debug!(transport = %self.fallback.kind(), "Using fallback transport");
        self.fallback.open_stream(request).await
    }

    fn is_available(&self) -> bool {
        self.primary.as_ref().is_some_and(|p| p.is_available()) || self.fallback.is_available()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Selector
    }
}
