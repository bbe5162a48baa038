//! HTTP streaming fallback: `POST /api/studio/conversation/stream`

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::frames::decode_events;
use super::transport::{ChatTransport, EventStream, TransportKind};
use super::types::ChatRequest;
use crate::api::ApiClient;
use crate::error::ChatResult;

const STREAM_PATH: &str = "/api/studio/conversation/stream";

/// One POST per prompt; the response body is a server-sent event stream.
///
/// Goes through [`ApiClient`] so the bearer token and 401 refresh apply.
/// Not retried on failure.
#[derive(Clone)]
pub struct HttpStreamTransport {
    api: Arc<ApiClient>,
}

impl HttpStreamTransport {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ChatTransport for HttpStreamTransport {
    async fn open_stream(&self, request: &ChatRequest) -> ChatResult<EventStream> {
        let url = self.api.url(STREAM_PATH);
        let body = request.http_body();

        debug!(url = %url, history = body.conversation_history.len(), "Opening HTTP reply stream");
        let response = self
            .api
            .send_authed_streaming(|http| {
                http.post(&url)
                    .header("Accept", "text/event-stream")
                    .json(&body)
            })
            .await?;
        let response = ApiClient::ensure_success(response).await?;

        Ok(decode_events(response.bytes_stream()))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::HttpStream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::StreamEvent;
    use crate::error::{ApiError, ChatError};
    use futures::StreamExt;
    use crate::test_helpers::{logged_in_client, tokens_json};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            message: "Tell me of Gettysburg".into(),
            episode_id: Some("ep-1".into()),
            source_ids: vec![],
            history: vec![],
        }
    }

    fn sse_body(frames: &[serde_json::Value]) -> String {
        frames
            .iter()
            .map(|f| format!("data: {}\n\n", f))
            .collect()
    }

    #[tokio::test]
    async fn test_streams_events_in_order() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            json!({"type": "content", "content": "Four score ", "full_response": "Four score "}),
            json!({"type": "content", "content": "and seven"}),
            json!({"type": "complete", "citations": [], "metadata": {}}),
            json!({"type": "done"}),
        ]);
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .and(header("authorization", "Bearer a1"))
            .and(body_partial_json(json!({
                "message": "Tell me of Gettysburg",
                "episode_id": "ep-1",
                "conversation_history": []
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpStreamTransport::new(Arc::new(logged_in_client(&server).await));
        let events: Vec<StreamEvent> = transport
            .open_stream(&request())
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;

        let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["content", "content", "complete", "done"]);
    }

    #[tokio::test]
    async fn test_server_error_fails_open() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "boom"})))
            .mount(&server)
            .await;

        let transport = HttpStreamTransport::new(Arc::new(logged_in_client(&server).await));
        let err = transport.open_stream(&request()).await.err().unwrap();
        assert!(matches!(err, ChatError::Api(ApiError::Status { .. })));
    }

    #[tokio::test]
    async fn test_refreshes_token_on_401() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .and(header("authorization", "Bearer a1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tokens_json("a2", "r2")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .and(header("authorization", "Bearer a2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[
                json!({"type": "error", "error": "No sources selected"}),
            ])))
            .mount(&server)
            .await;

        let transport = HttpStreamTransport::new(Arc::new(logged_in_client(&server).await));
        let mut stream = transport.open_stream(&request()).await.unwrap();
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(
            event,
            StreamEvent::Error {
                error: "No sources selected".into()
            }
        );
        assert!(stream.next().await.is_none());
    }
}
