use thiserror::Error;

/// Errors returned by [`Broadcaster`](crate::Broadcaster) operations.
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// The handle is a bare value, not a stream or sink
    #[error("expected a stream, found a bare `{found}` value")]
    NotAStream { found: &'static str },

    /// The source handle cannot be read from
    #[error("source of `{elem}` is write-only")]
    NotReadable { elem: &'static str },

    /// The sink handle cannot be written to
    #[error("sink of `{elem}` is read-only")]
    WrongDirection { elem: &'static str },

    /// The element type is not assignable from the producer's element type
    #[error("cannot deliver `{expected}` to a sink of `{found}`")]
    IncompatibleType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("sink is already subscribed")]
    AlreadySubscribed,

    #[error("sink is not subscribed")]
    NotSubscribed,

    /// The source has ended, the broadcaster no longer accepts requests
    #[error("broadcaster source has ended")]
    BroadcasterDead,

    /// The broadcast worker thread could not be started
    #[error("failed to spawn broadcast worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type for broadcaster operations
pub type Result<T> = std::result::Result<T, BroadcastError>;

/// Uniform error of an erased sink: its receiving side is gone.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("sink disconnected")]
pub struct SinkDisconnected;
