//! Streaming relay: upstream `StreamEvent`s to the client's SSE framing.
//!
//! Every relayed stream is `{"response": ..}*`, then at most one of
//! `{"usage": .., "done": true}` or `{"error": ..}`, then exactly one `[DONE]`.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use serde_json::json;

use crate::core::entities::{StreamEvent, Usage};
use crate::metrics;

pub const SENTINEL: &str = "[DONE]";

#[derive(Clone, Debug, PartialEq)]
pub enum RelayFrame {
    Chunk(String),
    Final(Usage),
    Error(String),
    Sentinel,
}

impl RelayFrame {
    pub fn data(&self) -> String {
        match self {
            RelayFrame::Chunk(text) => json!({ "response": text }).to_string(),
            RelayFrame::Final(usage) => json!({ "usage": usage, "done": true }).to_string(),
            RelayFrame::Error(message) => json!({ "error": message }).to_string(),
            RelayFrame::Sentinel => SENTINEL.to_string(),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Phase {
    Idle,
    Open,
    Completing,
    Failing(String),
    /// Carries the outcome recorded once the sentinel goes out.
    Closing(&'static str),
    Closed,
}

struct Relay {
    upstream: Option<BoxStream<'static, StreamEvent>>,
    usage: Option<Usage>,
    phase: Phase,
    model: String,
    started: Instant,
}

impl Relay {
    fn new(upstream: BoxStream<'static, StreamEvent>, model: String) -> Self {
        metrics::ACTIVE_STREAMS.inc();
        Self {
            upstream: Some(upstream),
            usage: None,
            phase: Phase::Idle,
            model,
            started: Instant::now(),
        }
    }

    /// Drops the upstream session as soon as no more events are needed from it.
    fn leave_open(&mut self, next: Phase) {
        self.upstream = None;
        self.phase = next;
    }

    async fn next_frame(&mut self) -> Option<RelayFrame> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Closed) {
                Phase::Idle => {
                    tracing::debug!(model = %self.model, "stream open");
                    self.phase = Phase::Open;
                }
                Phase::Open => {
                    self.phase = Phase::Open;
                    let next = match self.upstream.as_mut() {
                        Some(upstream) => upstream.next().await,
                        None => None,
                    };
                    match next {
                        Some(StreamEvent::Token(text)) if text.is_empty() => {}
                        Some(StreamEvent::Token(text)) => return Some(RelayFrame::Chunk(text)),
                        Some(StreamEvent::Usage(usage)) => self.usage = Some(usage),
                        Some(StreamEvent::Done) => self.leave_open(Phase::Completing),
                        Some(StreamEvent::Error(message)) => {
                            self.leave_open(Phase::Failing(message))
                        }
                        None => self.leave_open(Phase::Failing(
                            "upstream stream ended before completion".into(),
                        )),
                    }
                }
                Phase::Completing => {
                    self.phase = Phase::Closing("ok");
                    match self.usage {
                        Some(usage) => {
                            metrics::record_usage(&self.model, &usage);
                            return Some(RelayFrame::Final(usage));
                        }
                        None => tracing::debug!(model = %self.model, "usage unavailable, skipping final usage event"),
                    }
                }
                Phase::Failing(message) => {
                    tracing::warn!(model = %self.model, error = %message, "stream failed mid-flight");
                    self.phase = Phase::Closing("error");
                    return Some(RelayFrame::Error(message));
                }
                Phase::Closing(status) => {
                    self.finish(status);
                    return Some(RelayFrame::Sentinel);
                }
                Phase::Closed => return None,
            }
        }
    }

    fn finish(&self, status: &'static str) {
        self.record(status);
        tracing::info!(model = %self.model, status, elapsed_ms = self.started.elapsed().as_millis() as u64, "stream closed");
    }

    fn record(&self, status: &str) {
        let mode = metrics::mode_label(true);
        metrics::REQUESTS_TOTAL
            .with_label_values(&[&self.model, mode, status])
            .inc();
        metrics::REQUEST_DURATION
            .with_label_values(&[&self.model, mode])
            .observe(self.started.elapsed().as_secs_f64());
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        metrics::ACTIVE_STREAMS.dec();
        if self.phase != Phase::Closed {
            // Client went away mid-stream; the upstream session is dropped with us.
            self.record("cancelled");
            tracing::info!(model = %self.model, "client disconnected, upstream stream closed");
        }
    }
}

/// Relays upstream events as frames, strictly in order, one frame per poll.
pub fn relay(
    upstream: BoxStream<'static, StreamEvent>,
    model: String,
) -> impl Stream<Item = RelayFrame> + Send + 'static {
    stream::unfold(Relay::new(upstream, model), |mut relay| async move {
        let frame = relay.next_frame().await?;
        Some((frame, relay))
    })
}

pub fn to_axum_sse<S>(frames: S) -> Response
where
    S: Stream<Item = RelayFrame> + Send + 'static,
{
    let events = frames.map(|frame| Ok::<_, Infallible>(Event::default().data(frame.data())));
    let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(10)));
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    )
        .into_response()
}
