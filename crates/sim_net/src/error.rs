//! Transport-layer error types.

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to encode a message to MessagePack.
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode a message from MessagePack.
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// NATS connection error.
    #[error("NATS connection error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// NATS subscription error.
    #[error("NATS subscribe error: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    /// NATS publish error.
    #[error("NATS publish error: {0}")]
    Publish(#[from] async_nats::PublishError),

    /// A collective operation did not complete in time.
    #[error("collective timed out waiting for peers: {0}")]
    Timeout(String),

    /// Runtime or socket setup failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transport operation failed outside the typed cases.
    #[error("transport error: {0}")]
    Transport(String),

    /// Ranks issued mismatched collective operations in the same round.
    #[error("mismatched collective operations in one round")]
    CollectiveMismatch,

    /// A rank index was outside the world.
    #[error("rank {rank} outside world of {world} ranks")]
    BadRank {
        /// The offending rank.
        rank: u32,
        /// Number of ranks in the world.
        world: u32,
    },

    /// The transport shut down while an operation was in flight.
    #[error("transport closed")]
    Closed,
}
