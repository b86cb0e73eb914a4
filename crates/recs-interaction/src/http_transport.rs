//! reqwest-backed `text/event-stream` transport.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use recs_core::error::Result;
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL};

use crate::http_error::{map_http_error, map_request_error, parse_retry_after};
use crate::sse::SseDecoder;
use crate::transport::{FrameStream, StreamAddress, StreamFrame, StreamTransport};

/// Opens progress streams over HTTP.
///
/// The client must not carry a total request timeout: a stream stays open for
/// the whole generation.
#[derive(Clone, Default)]
pub struct HttpStreamTransport {
    client: Client,
}

impl HttpStreamTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

struct ReadState {
    body: BoxStream<'static, std::result::Result<Vec<u8>, String>>,
    decoder: SseDecoder,
    pending: VecDeque<StreamFrame>,
    finished: bool,
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn connect(&self, address: &StreamAddress) -> Result<FrameStream> {
        let mut request = self
            .client
            .get(&address.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &address.bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| map_request_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body, retry_after));
        }

        tracing::debug!(url = %address.url, "stream: endpoint accepted connection");

        let state = ReadState {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| e.to_string()))
                .boxed(),
            decoder: SseDecoder::new(),
            pending: VecDeque::from([StreamFrame::Opened]),
            finished: false,
        };

        let frames = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Some((frame, state));
                }
                if state.finished {
                    return None;
                }

                match state.body.next().await {
                    Some(Ok(chunk)) => {
                        state
                            .pending
                            .extend(state.decoder.push(&chunk).into_iter().map(StreamFrame::Message));
                    }
                    Some(Err(err)) => {
                        state.pending.push_back(StreamFrame::Error(err));
                        state.finished = true;
                    }
                    None => {
                        if let Some(last) = state.decoder.finish() {
                            state.pending.push_back(StreamFrame::Message(last));
                        }
                        state.finished = true;
                    }
                }
            }
        });

        Ok(Box::pin(frames))
    }
}
