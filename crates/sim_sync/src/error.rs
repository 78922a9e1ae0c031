//! Synchronization-layer error types.

/// Errors raised by the synchronization manager.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The underlying transport failed; sync errors are fatal.
    #[error(transparent)]
    Net(#[from] sim_net::NetError),

    /// A cross-partition link name had no paired half on the remote side.
    #[error("no remote pairing for cross-partition link: {0}")]
    UnpairedLink(String),

    /// A received event named a delivery tag no local link registered.
    #[error("received event for unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
}
