//! Server-sent event decoding for the HTTP streaming endpoint
//!
//! The backend answers with `text/event-stream`: one `data: <json>` event per
//! stream event, separated by blank lines.

use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use super::transport::EventStream;
use super::types::StreamEvent;
use crate::error::{ChatError, ChatResult};

/// Turn a response body into stream events.
///
/// Chunk boundaries are irrelevant; events split across chunks (including
/// inside a multibyte character) are reassembled by the SSE parser. Events
/// with an empty `data` field are skipped. Body errors are passed through.
pub fn decode_events<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    ChatError: From<E>,
{
    body.eventsource()
        .filter_map(|item| async move {
            match item {
                Ok(event) if event.data.trim().is_empty() => {
                    debug!(event = %event.event, "Skipping empty server event");
                    None
                }
                Ok(event) => Some(parse_data(&event.data)),
                Err(EventStreamError::Transport(e)) => Some(Err(ChatError::from(e))),
                Err(e) => {
                    warn!(error = %e, "Unreadable event stream");
                    Some(Err(ChatError::Frame(e.to_string())))
                }
            }
        })
        .boxed()
}

fn parse_data(data: &str) -> ChatResult<StreamEvent> {
    serde_json::from_str::<StreamEvent>(data).map_err(|e| {
        warn!(error = %e, payload = %data, "Malformed stream frame");
        ChatError::Frame(e.to_string())
    })
}
