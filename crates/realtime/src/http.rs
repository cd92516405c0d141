//! Change source backed by the server's server-sent-event feed endpoint.

use crate::error::FeedError;
use crate::source::{ChangeSource, ChangeStream};
use async_trait::async_trait;
use atelier_core::ChangeEvent;
use futures::{Stream, StreamExt, stream};
use reqwest::Url;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use tracing::debug;

/// SSE event name carrying a serialized `ChangeEvent`.
pub const CHANGE_EVENT: &str = "change";
/// SSE event name announcing that the server dropped events for this subscriber.
pub const LAGGED_EVENT: &str = "lagged";

/// Largest event the decoder buffers, counting an unterminated line.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// Subscribes to `entity:<id>` topics over HTTP.
#[derive(Clone, Debug)]
pub struct HttpChangeSource {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpChangeSource {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, FeedError> {
        let base_url =
            Url::parse(base_url).map_err(|e| FeedError::Transport(format!("invalid URL: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        })
    }

    /// Feed URL for a topic. Only entity topics are exposed over HTTP.
    pub fn feed_url(&self, topic: &str) -> Result<Url, FeedError> {
        let Some(entity_id) = topic.strip_prefix("entity:") else {
            return Err(FeedError::Rejected {
                status: 404,
                message: format!("no HTTP feed for topic {topic}"),
            });
        };
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FeedError::Transport("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["v1", "entities", entity_id, "assets", "feed"]);
        Ok(url)
    }
}

#[async_trait]
impl<T> ChangeSource<T> for HttpChangeSource
where
    T: DeserializeOwned + Send + 'static,
{
    async fn subscribe(&self, topic: &str) -> Result<ChangeStream<T>, FeedError> {
        let url = self.feed_url(topic)?;
        let mut req = self.http.get(url).header(ACCEPT, "text/event-stream");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let response = req
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FeedError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!(topic, "subscribed to remote change feed");
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| FeedError::Transport(e.to_string())));
        Ok(Box::pin(decode_events(Box::pin(body))))
    }
}

/// Turn a raw SSE byte stream into change events.
///
/// The stream ends after the first error, including a `lagged` notice.
pub fn decode_events<T, B, C>(body: B) -> impl Stream<Item = Result<ChangeEvent<T>, FeedError>>
where
    T: DeserializeOwned + Send + 'static,
    B: Stream<Item = Result<C, FeedError>> + Send + Unpin + 'static,
    C: AsRef<[u8]> + Send + 'static,
{
    struct State<B> {
        body: B,
        decoder: SseDecoder,
        ready: VecDeque<SseFrame>,
        done: bool,
    }

    let state = State {
        body,
        decoder: SseDecoder::default(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }
            if let Some(frame) = st.ready.pop_front() {
                match frame.into_change::<T>() {
                    Some(Ok(event)) => return Some((Ok(event), st)),
                    Some(Err(err)) => {
                        st.done = true;
                        return Some((Err(err), st));
                    }
                    None => continue,
                }
            }
            match st.body.next().await {
                Some(Ok(chunk)) => match st.decoder.push(chunk.as_ref()) {
                    Ok(frames) => st.ready.extend(frames),
                    Err(err) => {
                        st.done = true;
                        return Some((Err(err), st));
                    }
                },
                Some(Err(err)) => {
                    st.done = true;
                    return Some((Err(err), st));
                }
                None => return None,
            }
        }
    })
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    fn into_change<T: DeserializeOwned>(self) -> Option<Result<ChangeEvent<T>, FeedError>> {
        match self.event.as_deref() {
            None | Some(CHANGE_EVENT) => Some(
                serde_json::from_str(&self.data).map_err(|e| FeedError::Decode(e.to_string())),
            ),
            Some(LAGGED_EVENT) => Some(Err(FeedError::Lagged(
                self.data.trim().parse().unwrap_or(0),
            ))),
            Some(_) => None,
        }
    }
}

/// Incremental `text/event-stream` line parser.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
}

impl SseDecoder {
    /// Feed bytes; returns every frame completed by them.
    ///
    /// Fails once a single event grows past [`MAX_EVENT_BYTES`].
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, FeedError> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => {
                    self.data_len += value.len();
                    self.data.push(value.to_string());
                }
                _ => {}
            }
            check_event_size(self.data_len)?;
        }

        // What remains is one unterminated line.
        check_event_size(self.buf.len() + self.data_len)?;
        Ok(frames)
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        self.data_len = 0;
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

fn check_event_size(buffered: usize) -> Result<(), FeedError> {
    if buffered > MAX_EVENT_BYTES {
        return Err(FeedError::Decode(format!(
            "event exceeds {MAX_EVENT_BYTES} bytes ({buffered} buffered)"
        )));
    }
    Ok(())
}
