//! Client side of the run event stream.
//!
//! A run submission answers with `text/event-stream` frames, each carrying
//! one JSON [`StreamEvent`]. [`RunStream`] parses the frames on a background
//! task and delivers decoded events in order. [`CancelHandle`] closes the
//! connection, which is how the server learns to abandon the run.

use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use scout_core::{CompletionData, ProgressData, StreamEvent};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SdkError, SdkResult};

/// Decode the data of one frame. Frames without data (keep-alives) yield nothing.
fn decode_data(data: &str) -> Option<SdkResult<StreamEvent>> {
    if data.is_empty() {
        return None;
    }
    Some(
        StreamEvent::from_json(data)
            .map_err(|err| SdkError::Protocol(format!("undecodable event: {}", err))),
    )
}

// ============================================================================
// Cancellation
// ============================================================================

/// Stops a [`RunStream`]. Cloneable and idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Stop reading and close the connection. Later calls do nothing.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!("cancelling run stream");
            self.token.cancel();
        }
    }

    /// Whether [`CancelHandle::cancel`] has been called
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

// ============================================================================
// Event stream
// ============================================================================

/// How a consumed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The run summary arrived
    Completed,
    /// The caller cancelled before the summary
    Cancelled,
    /// The connection closed before the summary
    Closed,
}

/// Ordered events of one run.
#[derive(Debug)]
pub struct RunStream {
    events: mpsc::UnboundedReceiver<SdkResult<StreamEvent>>,
    cancel: CancelHandle,
    reader: JoinHandle<()>,
}

impl RunStream {
    /// Start reading `body` on a background task.
    pub fn from_body<S, B, E>(body: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Into<SdkError> + Send + 'static,
    {
        let (tx, events) = mpsc::unbounded_channel();
        let cancel = CancelHandle::default();
        let reader = tokio::spawn(read_frames(body, tx, cancel.token.clone()));
        Self {
            events,
            cancel,
            reader,
        }
    }

    /// Handle that cancels this stream
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel this stream
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event, or `None` once the stream ended or was cancelled.
    pub async fn next_event(&mut self) -> Option<SdkResult<StreamEvent>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Drive the stream to its end, routing each event to `handlers`.
    /// Decoding and transport failures go to `on_error` without a keyword.
    pub async fn dispatch(mut self, mut handlers: StreamHandlers) -> StreamEnd {
        let mut completed = false;
        while let Some(item) = self.next_event().await {
            match item {
                Ok(event) => {
                    completed |= event.is_run_complete();
                    handlers.handle(&event);
                }
                Err(err) => handlers.error(&err.to_string(), None),
            }
        }

        let end = if completed {
            StreamEnd::Completed
        } else if self.cancel.is_cancelled() {
            StreamEnd::Cancelled
        } else {
            StreamEnd::Closed
        };
        if let Some(on_stream_end) = handlers.on_stream_end.take() {
            on_stream_end(end);
        }
        end
    }
}

impl Stream for RunStream {
    type Item = SdkResult<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }
}

impl Drop for RunStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames<S, B, E>(
    body: S,
    tx: mpsc::UnboundedSender<SdkResult<StreamEvent>>,
    token: CancellationToken,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<SdkError>,
{
    // An unterminated trailing frame is never dispatched.
    let mut frames = std::pin::pin!(body.eventsource());

    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tx.closed() => return,
            frame = frames.next() => frame,
        };
        let item = match frame {
            Some(Ok(frame)) => match decode_data(&frame.data) {
                Some(item) => item,
                None => continue,
            },
            Some(Err(EventStreamError::Transport(err))) => {
                let _ = tx.send(Err(err.into()));
                return;
            }
            Some(Err(EventStreamError::Utf8(err))) => {
                let _ = tx.send(Err(SdkError::Protocol(format!("frame is not UTF-8: {}", err))));
                return;
            }
            Some(Err(EventStreamError::Parser(err))) => {
                let _ = tx.send(Err(SdkError::Protocol(format!("malformed frame: {:?}", err))));
                return;
            }
            None => {
                debug!("run stream ended");
                return;
            }
        };
        if tx.send(item).is_err() {
            return;
        }
    }
}

// ============================================================================
// Named handlers
// ============================================================================

type TextHandler = Box<dyn FnMut(&str, Option<&str>) + Send>;

/// Callbacks for [`RunStream::dispatch`]. Unset handlers ignore their events.
#[derive(Default)]
pub struct StreamHandlers {
    on_output: Option<TextHandler>,
    on_error: Option<TextHandler>,
    on_progress: Option<Box<dyn FnMut(&ProgressData) + Send>>,
    on_complete: Option<Box<dyn FnMut(&CompletionData) + Send>>,
    on_stream_end: Option<Box<dyn FnOnce(StreamEnd) + Send>>,
}

impl StreamHandlers {
    /// Create an empty handler set
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw job output line and the keyword it belongs to
    pub fn on_output(mut self, f: impl FnMut(&str, Option<&str>) + Send + 'static) -> Self {
        self.on_output = Some(Box::new(f));
        self
    }

    /// Non-fatal error message and the keyword it belongs to
    pub fn on_error(mut self, f: impl FnMut(&str, Option<&str>) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// State transition of one pipeline
    pub fn on_progress(mut self, f: impl FnMut(&ProgressData) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Per-pipeline completion, then the run summary
    pub fn on_complete(mut self, f: impl FnMut(&CompletionData) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Called once when the stream ends for any reason
    pub fn on_stream_end(mut self, f: impl FnOnce(StreamEnd) + Send + 'static) -> Self {
        self.on_stream_end = Some(Box::new(f));
        self
    }

    fn handle(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Output { data, keyword } => {
                if let Some(f) = self.on_output.as_mut() {
                    f(data, keyword.as_deref());
                }
            }
            StreamEvent::Error { data, keyword } => self.error(data, keyword.as_deref()),
            StreamEvent::Progress { data } => {
                if let Some(f) = self.on_progress.as_mut() {
                    f(data);
                }
            }
            StreamEvent::Complete { data } => {
                if let Some(f) = self.on_complete.as_mut() {
                    f(data);
                }
            }
        }
    }

    fn error(&mut self, message: &str, keyword: Option<&str>) {
        if let Some(f) = self.on_error.as_mut() {
            f(message, keyword);
        }
    }
}
