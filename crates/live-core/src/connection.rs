//! Transport-neutral connection frames and an in-memory connection.
//!
//! A page runs over anything that is both a `Stream` of inbound [`Frame`]s
//! and a `Sink` for outbound ones. The gateway adapts an axum WebSocket to
//! this shape; [`local`] provides a channel-backed pair for tests and
//! embedding.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Sink, Stream};
use tokio::sync::mpsc;

use crate::protocol::ClientMessage;

/// A single transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A JSON-encoded protocol message.
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Create an in-memory connection and the peer that drives it.
pub fn local() -> (LocalConnection, LocalPeer) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();
    let flushes = Arc::new(AtomicUsize::new(0));

    (
        LocalConnection {
            inbound,
            outbound,
            flushes: flushes.clone(),
        },
        LocalPeer {
            tx: Some(to_server),
            rx: from_server,
            flushes,
        },
    )
}

/// Server side of an in-memory connection.
pub struct LocalConnection {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Frame>,
    flushes: Arc<AtomicUsize>,
}

impl Stream for LocalConnection {
    type Item = Result<Frame, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inbound.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Sink<Frame> for LocalConnection {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        self.outbound
            .send(item)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Client side of an in-memory connection.
pub struct LocalPeer {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    rx: mpsc::UnboundedReceiver<Frame>,
    flushes: Arc<AtomicUsize>,
}

impl LocalPeer {
    /// Send a protocol message to the server. Returns false once hung up.
    pub fn send(&self, message: &ClientMessage) -> bool {
        self.send_frame(Frame::Text(message.encode()))
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_frame(Frame::Text(text.into()))
    }

    pub fn send_frame(&self, frame: Frame) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Close the inbound direction; the server's reader sees end-of-stream.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Refuse further server output; the server's next write fails.
    pub fn stop_reading(&mut self) {
        self.rx.close();
    }

    /// Next frame written by the server, or `None` once the server is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next text frame, skipping pings.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await? {
                Frame::Text(text) => return Some(text),
                Frame::Close => return None,
                _ => continue,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Number of times the server flushed its output.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};

    use super::*;

    #[tokio::test]
    async fn test_local_round_trip() {
        let (mut conn, mut peer) = local();

        assert!(peer.send_text(r#"["unbind","el1"]"#));
        let frame = conn.next().await.unwrap().unwrap();
        assert_eq!(frame.as_text(), Some(r#"["unbind","el1"]"#));

        conn.send(Frame::Text("hello".into())).await.unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some("hello"));
        assert_eq!(peer.flush_count(), 1);
    }

    #[tokio::test]
    async fn test_hang_up_ends_stream() {
        let (mut conn, mut peer) = local();
        peer.hang_up();
        assert!(conn.next().await.is_none());
        assert!(!peer.send_text("late"));
    }

    #[tokio::test]
    async fn test_write_after_peer_dropped_fails() {
        let (mut conn, peer) = local();
        drop(peer);
        let err = conn.send(Frame::Text("x".into())).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_stop_reading_fails_writes() {
        let (mut conn, mut peer) = local();
        peer.stop_reading();
        assert!(conn.send(Frame::Text("x".into())).await.is_err());
        assert!(peer.send_text("still open"));
    }
}
