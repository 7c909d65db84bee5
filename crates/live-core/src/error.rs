use thiserror::Error;

/// Boxed error produced by a transport (WebSocket, in-memory channel, ...).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum LiveError {
    /// An element tried to push an update while not bound to a page.
    ///
    /// This almost always means the element kept background work running
    /// after it was closed.
    #[error("Element {id} is not bound to a page")]
    NotBound { id: String },

    #[error("Page is closed")]
    PageClosed,

    #[error("Page is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("Element {id} failed: {message}")]
    Element { id: String, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LiveError {
    /// Build an element failure from any displayable error.
    pub fn element(id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Element {
            id: id.into(),
            message: message.to_string(),
        }
    }

    /// Wrap a transport error.
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }
}

pub type Result<T> = std::result::Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_bound_message() {
        let err = LiveError::NotBound { id: "el1".into() };
        assert!(err.to_string().contains("not bound"));
        assert!(err.to_string().contains("el1"));
    }

    #[test]
    fn test_transport_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = LiveError::transport(io);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("pipe closed"));
    }
}
