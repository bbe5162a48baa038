//! Drives one session over a transport

use futures::StreamExt;
use tracing::{debug, warn};

use super::session::{Applied, ChatContext, Session};
use super::transport::ChatTransport;
use super::types::Message;
use crate::error::{ChatError, ChatResult};

/// Progress reported to the caller while a reply streams
#[derive(Debug)]
pub enum ChatUpdate<'a> {
    Delta(&'a str),
    Completed(&'a Message),
    Failed(&'a str),
}

/// A Studio conversation: owns the session state and the transport that
/// carries it. All mutation happens inside [`StudioChat::send`].
pub struct StudioChat<T> {
    transport: T,
    session: Session,
}

impl<T: ChatTransport> StudioChat<T> {
    pub fn new(transport: T, context: ChatContext) -> Self {
        Self {
            transport,
            session: Session::new(context),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Drop the conversation (episode cleared)
    pub fn clear(&mut self) {
        self.session.clear();
    }

    /// Switch to another episode / source scope
    pub fn reset(&mut self, context: ChatContext) {
        self.session.reset(context);
    }

    /// Submit `text` and stream the reply.
    ///
    /// Blank input, or input while a reply is in flight, returns `Ok(None)`
    /// without contacting the backend. On success the finalized assistant
    /// message is returned.
    pub async fn send<F>(&mut self, text: &str, mut observer: F) -> ChatResult<Option<Message>>
    where
        F: FnMut(ChatUpdate<'_>),
    {
        let Some(request) = self.session.submit(text) else {
            return Ok(None);
        };

        let mut events = match self.transport.open_stream(&request).await {
            Ok(events) => events,
            Err(e) => return Err(self.abort(e, &mut observer)),
        };

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => return Err(self.abort(e, &mut observer)),
            };

            let kind = event.event_type();
            match self.session.apply(event) {
                Applied::Delta => {
                    if let Some(delta) = self.session.last_delta() {
                        observer(ChatUpdate::Delta(delta));
                    }
                }
                Applied::Completed => {
                    if let Some(message) = self.session.messages().last().cloned() {
                        observer(ChatUpdate::Completed(&message));
                        return Ok(Some(message));
                    }
                }
                Applied::Failed => {
                    let reason = self.session.last_error().unwrap_or_default().to_string();
                    observer(ChatUpdate::Failed(&reason));
                    return Err(ChatError::Backend(reason));
                }
                Applied::Ignored => debug!(event = kind, "Ignoring marker event"),
            }
        }

        Err(self.abort(ChatError::StreamEnded, &mut observer))
    }

    fn abort<F>(&mut self, error: ChatError, observer: &mut F) -> ChatError
    where
        F: FnMut(ChatUpdate<'_>),
    {
        warn!(transport = %self.transport.kind(), error = %error, "Reply aborted");
        let reason = error.to_string();
        self.session.fail(reason.clone());
        observer(ChatUpdate::Failed(&reason));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::mock::MockTransport;
    use crate::chat::session::StreamState;
    use crate::chat::types::{Role, StreamEvent};
    use crate::test_helpers::citation;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Delta(String),
        Completed(String),
        Failed(String),
    }

    fn recorder(seen: &mut Vec<Seen>) -> impl FnMut(ChatUpdate<'_>) + '_ {
        move |update| {
            seen.push(match update {
                ChatUpdate::Delta(d) => Seen::Delta(d.to_string()),
                ChatUpdate::Completed(m) => Seen::Completed(m.content.clone()),
                ChatUpdate::Failed(e) => Seen::Failed(e.to_string()),
            })
        }
    }

    #[tokio::test]
    async fn test_send_streams_and_completes() {
        let transport = MockTransport::new();
        let c = citation("Collected Works", 0.92);
        transport.push_reply(&["Hello, ", "world"], vec![c.clone()]).await;
        let mut chat = StudioChat::new(transport, ChatContext::default());

        let mut seen = Vec::new();
        let reply = chat.send("Hi", recorder(&mut seen)).await.unwrap().unwrap();

        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "Hello, world");
        assert_eq!(reply.citations(), &[c]);
        assert_eq!(
            seen,
            vec![
                Seen::Delta("Hello, ".into()),
                Seen::Delta("world".into()),
                Seen::Completed("Hello, world".into()),
            ]
        );
        assert_eq!(chat.session().messages().len(), 2);
        assert_eq!(chat.session().state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn test_blank_input_never_reaches_transport() {
        let mut chat = StudioChat::new(MockTransport::new(), ChatContext::default());
        assert!(chat.send("   ", |_| {}).await.unwrap().is_none());
        assert!(chat.send("", |_| {}).await.unwrap().is_none());
        assert!(chat.transport().sent().await.is_empty());
        assert!(chat.session().messages().is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_discards_partial_reply() {
        let transport = MockTransport::new();
        transport
            .push_script(vec![
                Ok(StreamEvent::Content {
                    content: "Four sc".into(),
                }),
                Ok(StreamEvent::Error {
                    error: "generation failed".into(),
                }),
            ])
            .await;
        let mut chat = StudioChat::new(transport, ChatContext::default());

        let mut seen = Vec::new();
        let err = chat.send("Begin", recorder(&mut seen)).await.unwrap_err();

        assert!(err.is_application());
        assert_eq!(seen.last(), Some(&Seen::Failed("generation failed".into())));
        assert_eq!(chat.session().messages().len(), 1);
        assert_eq!(chat.session().buffer(), None);
        assert_eq!(chat.session().last_error(), Some("generation failed"));
    }

    #[tokio::test]
    async fn test_premature_end_is_stream_error() {
        let transport = MockTransport::new();
        transport
            .push_script(vec![Ok(StreamEvent::Content {
                content: "Four".into(),
            })])
            .await;
        let mut chat = StudioChat::new(transport, ChatContext::default());

        let err = chat.send("Begin", |_| {}).await.unwrap_err();
        assert!(matches!(err, ChatError::StreamEnded));
        assert_eq!(chat.session().state(), StreamState::Idle);
        assert_eq!(chat.session().messages().len(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_fails_session() {
        let transport = MockTransport::new();
        transport.push_open_error(ChatError::NotConnected).await;
        let mut chat = StudioChat::new(transport, ChatContext::default());

        let err = chat.send("Begin", |_| {}).await.unwrap_err();
        assert!(matches!(err, ChatError::NotConnected));
        assert!(chat.session().last_error().is_some());

        // Session is usable again
        chat.transport().push_reply(&["ok"], vec![]).await;
        let reply = chat.send("Again", |_| {}).await.unwrap().unwrap();
        assert_eq!(reply.content, "ok");
        assert_eq!(chat.transport().sent().await[1].history.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_mid_stream() {
        let transport = MockTransport::new();
        transport
            .push_script(vec![
                Ok(StreamEvent::Content {
                    content: "Four".into(),
                }),
                Err(ChatError::ConnectionClosed),
                Ok(StreamEvent::Content {
                    content: " never seen".into(),
                }),
            ])
            .await;
        let mut chat = StudioChat::new(transport, ChatContext::default());

        let mut seen = Vec::new();
        let err = chat.send("Begin", recorder(&mut seen)).await.unwrap_err();
        assert!(matches!(err, ChatError::ConnectionClosed));
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn test_marker_events_pass_through_session() {
        let transport = MockTransport::new();
        transport
            .push_script(vec![
                Ok(StreamEvent::Pong),
                Ok(StreamEvent::Content {
                    content: "With malice ".into(),
                }),
                Ok(StreamEvent::Unknown),
                Ok(StreamEvent::Content {
                    content: "toward none".into(),
                }),
                Ok(StreamEvent::Complete {
                    citations: vec![],
                    metadata: Default::default(),
                }),
                Ok(StreamEvent::Done),
            ])
            .await;
        let mut chat = StudioChat::new(transport, ChatContext::default());

        let mut seen = Vec::new();
        let reply = chat.send("Reconcile", recorder(&mut seen)).await.unwrap().unwrap();

        assert_eq!(reply.content, "With malice toward none");
        assert_eq!(
            seen,
            vec![
                Seen::Delta("With malice ".into()),
                Seen::Delta("toward none".into()),
                Seen::Completed("With malice toward none".into()),
            ]
        );
    }
}
