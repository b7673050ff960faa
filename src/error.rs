use std::net::SocketAddr;
use std::time::Duration;

use crate::packet::Direction;

/// The error type for all application-facing calls of [crate::client::Client] and
///  [crate::server::Server].
///
/// NB: Errors that happen inside the background loops (a malformed datagram, an unknown packet id,
///      a failed RTT probe) are logged there and never surface here - a single bad datagram must
///      not take down a runtime.
#[derive(Debug, thiserror::Error)]
pub enum PacketerError {
    #[error("failed to initialize socket on {addr}")]
    SocketInit {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send datagram to {to}")]
    Send {
        to: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("socket is closed")]
    Closed,

    #[error("unregistered {direction:?} packet type {type_name}")]
    UnregisteredType {
        direction: Direction,
        type_name: &'static str,
    },

    #[error("unknown {direction:?} packet id {id}")]
    UnknownPacketId {
        direction: Direction,
        id: u32,
    },

    #[error("malformed payload for {direction:?} packet id {id}")]
    MalformedPayload {
        direction: Direction,
        id: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("malformed frame")]
    MalformedFrame(#[source] anyhow::Error),

    #[error("no connection established within {0:?}")]
    ConnectTimeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type PacketerResult<T> = Result<T, PacketerError>;
