//! "Starting…" page streamed while the backend boots.
//!
//! The response opens with the embedded page shell, then a drain loop flushes
//! queued chunks (progress markers and backend output) every
//! [`DRAIN_INTERVAL`]. When the start attempt settles the stream ends with
//! either a reload script or an error notice.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;

use crate::supervisor::{StartAttempt, StartStatus};

/// Cadence of the drain loop.
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

const RELOAD_SCRIPT: &str = "<script>location.reload()</script>\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueuePhase {
    Open,
    /// Closed for writing; remaining chunks still to be drained.
    Closing,
    Closed,
}

#[derive(Debug)]
struct QueueState {
    chunks: VecDeque<Bytes>,
    phase: QueuePhase,
}

/// Pending chunks of one bootstrap response.
///
/// Nothing is accepted once closed, and the close is observed by the reader
/// only after every chunk queued before it has been drained.
#[derive(Debug)]
pub(crate) struct ChunkQueue {
    state: Mutex<QueueState>,
}

impl ChunkQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                chunks: VecDeque::new(),
                phase: QueuePhase::Open,
            }),
        }
    }

    /// Queue a chunk. Returns `false` if the queue is already closed.
    pub(crate) fn enqueue(&self, chunk: impl Into<Bytes>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.phase != QueuePhase::Open {
            return false;
        }
        state.chunks.push_back(chunk.into());
        true
    }

    /// Stop accepting chunks. Returns `true` only for the first call.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.phase != QueuePhase::Open {
            return false;
        }
        state.phase = QueuePhase::Closing;
        true
    }

    /// Drop pending chunks and close immediately.
    pub(crate) fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.chunks.clear();
        state.phase = QueuePhase::Closed;
    }

    /// Take all pending chunks and whether the stream is finished.
    pub(crate) fn drain(&self) -> (Vec<Bytes>, bool) {
        let mut state = self.state.lock().unwrap();
        let chunks = state.chunks.drain(..).collect();
        let finished = match state.phase {
            QueuePhase::Open => false,
            QueuePhase::Closing | QueuePhase::Closed => {
                state.phase = QueuePhase::Closed;
                true
            }
        };
        (chunks, finished)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().unwrap().phase == QueuePhase::Closed
    }
}

/// Build the bootstrap response for a pending start attempt.
///
/// `HEAD` requests get the headers only.
pub fn bootstrap_response(attempt: &StartAttempt, head_only: bool) -> Response {
    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        ),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
    ];
    if head_only {
        return (StatusCode::OK, headers).into_response();
    }

    let queue = Arc::new(ChunkQueue::new());
    if let Some(shell) = devgate_assets::get(devgate_assets::BOOTSTRAP_SHELL) {
        queue.enqueue(shell.into_owned());
    }
    queue.enqueue(format!("$ {}\n", escape_html(attempt.command())));

    // Subscribe before returning so no line after this point is missed
    let output = attempt.subscribe_output();
    let producer = tokio::spawn(produce(Arc::clone(&queue), attempt.clone(), output));

    let (tx, rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(drain_loop(queue, tx, producer.abort_handle()));

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });
    (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
}

/// Forward queued chunks to the response body until the queue finishes.
///
/// A closed body means the browser went away: the queue is cancelled and the
/// producer stopped, leaving the start attempt itself untouched.
async fn drain_loop(queue: Arc<ChunkQueue>, tx: mpsc::Sender<Bytes>, producer: AbortHandle) {
    let mut interval = tokio::time::interval(DRAIN_INTERVAL);

    loop {
        interval.tick().await;

        let (chunks, finished) = queue.drain();
        for chunk in chunks {
            if tx.send(chunk).await.is_err() {
                queue.cancel();
                producer.abort();
                return;
            }
        }
        if finished {
            return;
        }
        if tx.is_closed() {
            tracing::debug!("Bootstrap response dropped by client");
            queue.cancel();
            producer.abort();
            return;
        }
    }
}

/// Feed backend output into the queue until the start attempt settles.
async fn produce(
    queue: Arc<ChunkQueue>,
    attempt: StartAttempt,
    mut output: broadcast::Receiver<String>,
) {
    let mut status = attempt.status_receiver();
    let mut output_open = true;

    loop {
        let current = status.borrow_and_update().clone();
        match current {
            StartStatus::Starting => {}
            StartStatus::Ready => {
                flush_output(&queue, &mut output);
                queue.enqueue("\nReady, reloading…\n");
                queue.enqueue(RELOAD_SCRIPT);
                queue.close();
                return;
            }
            StartStatus::Failed(reason) => {
                flush_output(&queue, &mut output);
                queue.enqueue(error_notice(&reason));
                queue.close();
                return;
            }
        }

        tokio::select! {
            line = output.recv(), if output_open => match line {
                Ok(line) => {
                    queue.enqueue(output_line(&line));
                }
                Err(RecvError::Lagged(skipped)) => {
                    queue.enqueue(skipped_notice(skipped));
                }
                Err(RecvError::Closed) => output_open = false,
            },
            changed = status.changed() => {
                if changed.is_err() && *status.borrow() == StartStatus::Starting {
                    queue.enqueue(error_notice("backend start was abandoned"));
                    queue.close();
                    return;
                }
            }
        }
    }
}

/// Queue output lines already published but not yet received.
fn flush_output(queue: &ChunkQueue, output: &mut broadcast::Receiver<String>) {
    loop {
        match output.try_recv() {
            Ok(line) => {
                queue.enqueue(output_line(&line));
            }
            Err(TryRecvError::Lagged(skipped)) => {
                queue.enqueue(skipped_notice(skipped));
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

fn output_line(line: &str) -> String {
    format!("{}\n", escape_html(line))
}

fn skipped_notice(skipped: u64) -> String {
    format!("… {skipped} lines skipped …\n")
}

fn error_notice(reason: &str) -> String {
    format!(
        "\n<strong class=\"devgate-error\">Backend failed to start: {}</strong>\n",
        escape_html(reason)
    )
}

/// Escape HTML special characters.
pub(crate) fn escape_html(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#x27;"),
            _ => result.push(c),
        }
    }
    result
}
