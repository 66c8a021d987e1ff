//! Streaming response body with load tracking
//!
//! [`TrackedStream`] wraps the upstream byte stream of one backend call. It
//! forwards every chunk unchanged, counts generated words from the NDJSON lines
//! going past and owns the [`WorkerLoadGuard`] for the call. Stats are recorded
//! only when the upstream ends normally; an upstream error or the client going
//! away releases the slot without recording anything.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{ClusterManager, WorkerLoadGuard};
use crate::metrics::RouterMetrics;
use crate::types::count_tokens;

/// Extracts the incremental text from one decoded stream line
pub type TextExtractor = fn(&Value) -> Option<&str>;

/// Upper bound on a partial line held between chunks
const MAX_CARRY_BYTES: usize = 1024 * 1024;

/// Incremental word counter over newline-delimited JSON
#[derive(Debug)]
pub struct TokenCounter {
    extract: TextExtractor,
    carry: Vec<u8>,
    tokens: u64,
}

impl TokenCounter {
    pub fn new(extract: TextExtractor) -> Self {
        Self {
            extract,
            carry: Vec::new(),
            tokens: 0,
        }
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Feed one chunk; complete lines are counted, the tail is carried over
    pub fn feed(&mut self, chunk: &[u8]) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (line, tail) = rest.split_at(pos);
            if self.carry.is_empty() {
                self.count_line(line);
            } else {
                self.carry.extend_from_slice(line);
                let joined = std::mem::take(&mut self.carry);
                self.count_line(&joined);
            }
            rest = &tail[1..];
        }

        if rest.is_empty() {
            return;
        }
        if self.carry.len() + rest.len() > MAX_CARRY_BYTES {
            // The remainder of this line will fail to parse and be skipped
            debug!(
                "Dropping partial stream line over {} bytes",
                MAX_CARRY_BYTES
            );
            self.carry.clear();
            return;
        }
        self.carry.extend_from_slice(rest);
    }

    /// Count whatever is left once the upstream has ended
    pub fn finish(&mut self) {
        if !self.carry.is_empty() {
            let last = std::mem::take(&mut self.carry);
            self.count_line(&last);
        }
    }

    fn count_line(&mut self, line: &[u8]) {
        let line = line.trim_ascii();
        let line = line
            .strip_prefix(b"data:")
            .map(<[u8]>::trim_ascii)
            .unwrap_or(line);
        if line.is_empty() || line == b"[DONE]" {
            return;
        }

        match serde_json::from_slice::<Value>(line) {
            Ok(value) => {
                if let Some(text) = (self.extract)(&value) {
                    self.tokens += count_tokens(text);
                }
            }
            Err(e) => debug!("Skipping unparsable stream line: {}", e),
        }
    }
}

/// Response body for a streaming call routed to one worker
pub struct TrackedStream<E> {
    inner: BoxStream<'static, Result<Bytes, E>>,
    guard: Option<WorkerLoadGuard>,
    cluster: Arc<ClusterManager>,
    counter: TokenCounter,
    started: Instant,
    route: &'static str,
    finished: bool,
}

impl<E> TrackedStream<E> {
    pub fn new(
        inner: BoxStream<'static, Result<Bytes, E>>,
        guard: WorkerLoadGuard,
        cluster: Arc<ClusterManager>,
        extract: TextExtractor,
        started: Instant,
        route: &'static str,
    ) -> Self {
        Self {
            inner,
            guard: Some(guard),
            cluster,
            counter: TokenCounter::new(extract),
            started,
            route,
            finished: false,
        }
    }

    fn complete(&mut self) {
        self.finished = true;
        self.counter.finish();

        if let Some(guard) = self.guard.take() {
            let latency = self.started.elapsed();
            let tokens = self.counter.tokens();
            self.cluster
                .update_stats(guard.worker().as_ref(), tokens, latency);
            RouterMetrics::record_request(self.route);
            RouterMetrics::record_request_duration(self.route, latency);
            debug!(
                worker_url = %guard.worker().url(),
                tokens,
                latency_ms = latency.as_millis() as u64,
                "Stream completed"
            );
        }
    }

    fn abort(&mut self, cause: &'static str) {
        self.finished = true;
        RouterMetrics::record_stream_aborted(self.route, cause);
        RouterMetrics::record_request_error(self.route, cause);
        self.guard.take();
    }
}

impl<E: std::fmt::Display> Stream for TrackedStream<E> {
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.counter.feed(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                if let Some(guard) = &this.guard {
                    warn!(
                        worker_url = %guard.worker().url(),
                        route = this.route,
                        "Upstream stream failed: {}",
                        e
                    );
                }
                this.abort("upstream_error");
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<E> Drop for TrackedStream<E> {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(guard) = &self.guard {
                debug!(
                    worker_url = %guard.worker().url(),
                    route = self.route,
                    "Client dropped stream before completion"
                );
            }
            self.abort("client_disconnect");
        }
    }
}
