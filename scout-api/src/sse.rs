//! Server-sent event framing for run sessions.
//!
//! Each [`StreamEvent`] becomes one `data: <json>\n\n` frame. The stream owns
//! the session's cancellation token through a drop guard, so a client that
//! disconnects stops the run driver.

use axum::{
    http::{HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::Stream;
use scout_core::StreamEvent;
use scout_workflow::RunSession;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{ready, Context, Poll},
};
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;
use tracing::{debug, warn};

pub const ACCEL_BUFFERING_HEADER: &str = "x-accel-buffering";

/// Event stream for one run; cancels the run when dropped.
pub struct RunEventStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    _cancel_on_drop: DropGuard,
}

impl RunEventStream {
    pub fn new(session: RunSession) -> Self {
        debug!(run_id = %session.run_id, "streaming run events");
        Self {
            events: session.events,
            _cancel_on_drop: session.cancel.drop_guard(),
        }
    }
}

impl Stream for RunEventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(self.events.poll_recv(cx)) {
                Some(event) => match Event::default().json_data(&event) {
                    Ok(frame) => return Poll::Ready(Some(Ok(frame))),
                    Err(err) => warn!(error = %err, "dropping unencodable stream event"),
                },
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Streams a started run back to the client.
pub fn run_response(session: RunSession) -> Response {
    let sse = Sse::new(RunEventStream::new(session)).keep_alive(KeepAlive::default());
    (
        [(
            HeaderName::from_static(ACCEL_BUFFERING_HEADER),
            HeaderValue::from_static("no"),
        )],
        sse,
    )
        .into_response()
}
