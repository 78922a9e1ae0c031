//! # sim_net
//!
//! The cluster transport layer for the parallel DES core.
//!
//! This crate provides:
//!
//! - [`subjects`] - subject hierarchy constants and builders.
//! - [`messages`] - message types exchanged between ranks at sync horizons.
//! - [`codec`] - MessagePack serialisation/deserialisation helpers.
//! - [`transport`] - the barrier-synchronous [`Transport`] trait and the
//!   in-process [`LocalTransport`].
//! - [`nats`] - the NATS-backed transport for multi-process runs.
//! - [`error`] - transport-layer error types.

pub mod codec;
pub mod error;
pub mod messages;
pub mod nats;
pub mod subjects;
pub mod transport;

pub use codec::{decode, encode};
pub use error::NetError;
pub use transport::{LocalExchange, LocalTransport, Transport};
