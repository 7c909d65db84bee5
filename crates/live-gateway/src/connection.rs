//! WebSocket connection lifecycle: adapt the socket and run a page over it.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use live_core::connection::Frame;
use live_core::Page;

use crate::state::GatewayState;

/// An axum [`WebSocket`] seen as a stream and sink of core [`Frame`]s.
pub struct WsConnection {
    socket: WebSocket,
}

impl WsConnection {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

/// Map an inbound WebSocket message to a frame. Binary messages are accepted
/// when they hold UTF-8 text.
fn into_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.to_string())),
        Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(Frame::Text(text)),
            Err(_) => {
                debug!(len = bytes.len(), "Ignoring non-UTF-8 binary message");
                None
            }
        },
        Message::Ping(bytes) => Some(Frame::Ping(bytes.to_vec())),
        Message::Pong(bytes) => Some(Frame::Pong(bytes.to_vec())),
        Message::Close(_) => Some(Frame::Close),
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Ping(bytes) => Message::Ping(Bytes::from(bytes)),
        Frame::Pong(bytes) => Message::Pong(Bytes::from(bytes)),
        Frame::Close => Message::Close(None),
    }
}

impl Stream for WsConnection {
    type Item = Result<Frame, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(self.socket.poll_next_unpin(cx)) {
                Some(Ok(message)) => {
                    if let Some(frame) = into_frame(message) {
                        #[cfg(feature = "metrics")]
                        if matches!(frame, Frame::Text(_)) {
                            crate::metrics::record_message_in();
                        }
                        return Poll::Ready(Some(Ok(frame)));
                    }
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => return Poll::Ready(None),
            }
        }
    }
}

impl Sink<Frame> for WsConnection {
    type Error = axum::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.socket.poll_ready_unpin(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, frame: Frame) -> Result<(), Self::Error> {
        #[cfg(feature = "metrics")]
        if matches!(frame, Frame::Text(_)) {
            crate::metrics::record_message_out();
        }
        self.socket.start_send_unpin(into_message(frame))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.socket.poll_flush_unpin(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.socket.poll_close_unpin(cx)
    }
}

/// Handle a new WebSocket connection: one page per socket, run to completion.
pub async fn handle_live_connection(state: Arc<GatewayState>, socket: WebSocket) {
    let page = Page::new(state.resolver.clone());
    let page_id = page.id().to_string();
    info!(page_id = %page_id, "New live connection");

    state.register(&page).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_page_open();

    let keep_alive = state.config.keep_alive();
    match page.run(WsConnection::new(socket), Some(keep_alive)).await {
        Ok(()) => debug!(page_id = %page_id, "Page finished"),
        Err(e) => warn!(page_id = %page_id, %e, "Page ended with error"),
    }

    state.unregister(&page_id).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_page_close();
    info!(page_id = %page_id, "Live connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_control_frames() {
        assert_eq!(
            into_frame(Message::Text("[\"unbind\",\"a\"]".into())),
            Some(Frame::Text("[\"unbind\",\"a\"]".into()))
        );
        assert_eq!(
            into_frame(Message::Ping(Bytes::from_static(b"hi"))),
            Some(Frame::Ping(b"hi".to_vec()))
        );
        assert_eq!(into_frame(Message::Close(None)), Some(Frame::Close));
    }

    #[test]
    fn test_binary_frames() {
        assert_eq!(
            into_frame(Message::Binary(Bytes::from_static(b"[]"))),
            Some(Frame::Text("[]".into()))
        );
        assert_eq!(
            into_frame(Message::Binary(Bytes::from_static(&[0xff, 0xfe]))),
            None
        );
    }

    #[test]
    fn test_outbound_messages() {
        match into_message(Frame::Text("hello".into())) {
            Message::Text(text) => assert_eq!(text.as_str(), "hello"),
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(matches!(into_message(Frame::Ping(Vec::new())), Message::Ping(b) if b.is_empty()));
        assert!(matches!(into_message(Frame::Close), Message::Close(None)));
    }
}
