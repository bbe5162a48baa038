//! Scripted transport for tests
//!
//! Each `open_stream` call consumes the next queued script:
//! - a list of events (and errors) replayed in order
//! - or an error returned from `open_stream` itself
//!
//! Every request is recorded so tests can assert on what was sent.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::transport::{ChatTransport, EventStream, TransportKind};
use super::types::{ChatRequest, StreamEvent};
use crate::error::{ChatError, ChatResult};

enum Script {
    Events(Vec<ChatResult<StreamEvent>>),
    OpenError(ChatError),
}

/// In-memory [`ChatTransport`] that replays queued replies.
///
/// # Example
///
/// ```rust
/// use they_might_say::chat::{ChatTransport, ChatRequest, MockTransport, StreamEvent};
/// use futures::StreamExt;
///
/// # tokio_test::block_on(async {
/// let transport = MockTransport::new();
/// transport.push_reply(&["Four score ", "and seven"], vec![]).await;
///
/// let request = ChatRequest {
///     message: "Begin".into(),
///     episode_id: None,
///     source_ids: vec![],
///     history: vec![],
/// };
/// let events: Vec<_> = transport.open_stream(&request).await.unwrap().collect().await;
/// assert_eq!(events.len(), 3);
/// assert_eq!(transport.sent().await[0].message, "Begin");
/// # });
/// ```
pub struct MockTransport {
    available: AtomicBool,
    scripts: Mutex<VecDeque<Script>>,
    sent: Mutex<Vec<ChatRequest>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            scripts: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Queue a raw sequence of stream items
    pub async fn push_script(&self, items: Vec<ChatResult<StreamEvent>>) {
        self.scripts.lock().await.push_back(Script::Events(items));
    }

    /// Queue a successful reply made of `deltas` followed by `complete`
    pub async fn push_reply(&self, deltas: &[&str], citations: Vec<super::Citation>) {
        let mut items: Vec<ChatResult<StreamEvent>> = deltas
            .iter()
            .map(|d| {
                Ok(StreamEvent::Content {
                    content: d.to_string(),
                })
            })
            .collect();
        items.push(Ok(StreamEvent::Complete {
            citations,
            metadata: Default::default(),
        }));
        self.push_script(items).await;
    }

    /// Make the next `open_stream` fail with `error`
    pub async fn push_open_error(&self, error: ChatError) {
        self.scripts.lock().await.push_back(Script::OpenError(error));
    }

    /// Requests received so far
    pub async fn sent(&self) -> Vec<ChatRequest> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn open_stream(&self, request: &ChatRequest) -> ChatResult<EventStream> {
        self.sent.lock().await.push(request.clone());

        match self.scripts.lock().await.pop_front() {
            Some(Script::Events(items)) => Ok(futures::stream::iter(items).boxed()),
            Some(Script::OpenError(e)) => Err(e),
            // Nothing scripted: a stream that ends immediately
            None => Ok(futures::stream::empty().boxed()),
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Mock
    }
}
