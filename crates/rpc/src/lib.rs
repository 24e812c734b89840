//! ID-correlated request/response protocol for attestor connections.
//!
//! A [`Connection`] carries bincode-encoded [`RpcMessage`]s over a
//! length-delimited duplex channel. Any number of calls may be in flight at
//! once, responses are matched to their requests by ID. Requests from the peer,
//! raw TLS data and the termination of the connection are surfaced as
//! [`Event`]s.
//!
//! Claims carry the transcript of a tunnel together with the reveal of each
//! message, see [`attestor_zk`].

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

mod codec;
mod config;
mod connection;
mod error;
pub mod msg;

pub use codec::{framed, FramedIo};
pub use config::{ConnectionConfig, ConnectionConfigBuilder, ConnectionConfigBuilderError};
pub use connection::{
    attach, connect, Connection, ConnectionState, ConnectionTask, Event, Events, IncomingRequest,
    Responder,
};
pub use error::{ErrorCode, RpcError};
pub use msg::{Payload, Request, Response, Rpc, RpcMessage, RpcType};
