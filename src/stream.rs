//! Live progress events pushed by the conversion service.
//!
//! The service exposes a server-sent-events endpoint (`GET /stream-progress`)
//! that emits one `data:` frame per active job roughly once a second:
//!
//! ```text
//! data: {"file_id": "…", "progress": 40, "status": "converting", "message": "…"}
//! ```
//!
//! [`ProgressChannel`] turns that byte stream into a `Stream` of
//! [`ProgressEvent`]s. The sequence is lazy and cannot be restarted. It ends
//! quietly when the connection drops: the batch loop never waits on it and
//! treats the synchronous upload/convert responses as the source of truth.
//! Frames that are not valid event JSON, and `{"error": …}` frames the server
//! emits when its own generator fails, are skipped.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// One pushed progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Identifier the event refers to. The service keys events by its own
    /// file id; a local item id is also accepted by the queue.
    pub file_id: String,
    /// Completion percentage as sent by the server.
    #[serde(default)]
    pub progress: f64,
    /// Raw status string (`converting`, `pending`, `completed`, …).
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl ProgressEvent {
    /// Progress clamped to `0..=100` and rounded.
    pub fn percent(&self) -> u8 {
        if self.progress.is_nan() {
            return 0;
        }
        self.progress.clamp(0.0, 100.0).round() as u8
    }
}

/// A boxed stream of progress events.
pub type EventStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Subscription to the service's progress events.
pub struct ProgressChannel {
    inner: EventStream,
}

impl fmt::Debug for ProgressChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressChannel").finish_non_exhaustive()
    }
}

impl ProgressChannel {
    /// Wrap any stream of already-decoded events.
    pub fn from_stream<S>(events: S) -> Self
    where
        S: Stream<Item = ProgressEvent> + Send + 'static,
    {
        Self {
            inner: Box::pin(events),
        }
    }

    /// Events sent on an mpsc channel. The stream ends once every sender is
    /// dropped.
    pub fn from_receiver(rx: mpsc::Receiver<ProgressEvent>) -> Self {
        Self::from_stream(ReceiverStream::new(rx))
    }

    /// A channel that never yields anything. Used when live progress is off.
    pub fn empty() -> Self {
        Self::from_stream(stream::empty())
    }

    /// Decode a raw `text/event-stream` body.
    ///
    /// A transport error on `body` ends the channel; it is logged, not raised.
    pub fn from_sse<S, E>(body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let state = SseState {
            body: Box::pin(body),
            decoder: SseDecoder::default(),
            ready: VecDeque::new(),
            done: false,
        };

        let events = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(event) = st.ready.pop_front() {
                    return Some((event, st));
                }
                if st.done {
                    return None;
                }
                match st.body.next().await {
                    Some(Ok(chunk)) => {
                        for data in st.decoder.push(&chunk) {
                            if let Some(event) = parse_event(&data) {
                                st.ready.push_back(event);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Progress stream dropped: {}", e);
                        st.done = true;
                    }
                    None => {
                        debug!("Progress stream closed by server");
                        st.done = true;
                    }
                }
            }
        });

        Self::from_stream(events)
    }
}

impl Stream for ProgressChannel {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

struct SseState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    ready: VecDeque<ProgressEvent>,
    done: bool,
}

/// Largest unterminated frame kept while waiting for its blank line.
const MAX_PENDING_FRAME: usize = 1024 * 1024;

/// Incremental `text/event-stream` frame splitter.
///
/// Buffers bytes until a blank line and returns the joined `data:` payload
/// of each complete frame. Comment lines (`:keep-alive`) and other fields
/// (`event:`, `id:`, `retry:`) are ignored.
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = find_blank_line(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&frame[..end]);

            let data: Vec<&str> = text
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();

            if !data.is_empty() {
                frames.push(data.join("\n"));
            }
        }

        if self.buf.len() > MAX_PENDING_FRAME {
            warn!(
                "Dropping {} bytes of unterminated progress frame",
                self.buf.len()
            );
            self.buf.clear();
        }
        frames
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_event(data: &str) -> Option<ProgressEvent> {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!("Skipping non-JSON progress frame: {}", e);
            return None;
        }
    };

    if let Some(err) = value.get("error") {
        warn!("Progress stream reported an error: {}", err);
        return None;
    }

    match serde_json::from_value(value) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Skipping malformed progress frame: {}", e);
            None
        }
    }
}
