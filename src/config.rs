use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::bail;

use crate::frame::Frame;

pub const DEFAULT_PORT: u16 = 4425;

/// Protocol parameters shared by client and server. Both sides of a connection should use the
///  same values, though nothing breaks if they differ - the side with the shorter timeout simply
///  gives up on the other side first.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Size of the buffer that datagrams are received into. A datagram that fills the buffer
    ///  completely is assumed to be truncated and dropped, so this must be bigger than the
    ///  biggest frame any peer sends.
    ///
    /// The default is sized for a typical Ethernet MTU with some headroom.
    pub receive_buffer_size: usize,

    /// A peer is considered dead if there was no liveness evidence (RTT request or answer, or
    ///  the handshake itself) within this window.
    pub timeout: Duration,

    /// Interval for sending RTT requests to the peer. This must be shorter than `timeout`,
    ///  otherwise a perfectly healthy peer may time out before it is probed.
    pub rtt_interval: Duration,

    /// Interval for re-sending CONNECT while the client is waiting for the server's CONNECTED
    pub reconnect_interval: Duration,

    /// Granularity of the loop checking RTT and timeout timers
    pub tick_interval: Duration,

    /// Compress outbound datagrams. This requires the `compression` feature; received datagrams
    ///  are decompressed based on their prefix regardless of this flag.
    pub compression: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            receive_buffer_size: 2048,
            timeout: Duration::from_millis(15_000),
            rtt_interval: Duration::from_millis(5_000),
            reconnect_interval: Duration::from_millis(2_000),
            tick_interval: Duration::from_millis(10),
            compression: false,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.receive_buffer_size <= Frame::MAX_CONTROL_FRAME_LEN {
            bail!("receive buffer size must be bigger than {} bytes", Frame::MAX_CONTROL_FRAME_LEN);
        }
        if self.timeout.is_zero() || self.rtt_interval.is_zero() || self.reconnect_interval.is_zero() || self.tick_interval.is_zero() {
            bail!("intervals must not be zero");
        }
        if self.timeout <= self.rtt_interval {
            bail!("timeout ({:?}) must be longer than the RTT interval ({:?})", self.timeout, self.rtt_interval);
        }
        if self.compression && cfg!(not(feature = "compression")) {
            bail!("compression requires the 'compression' feature");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The server's address - together with the port, this is the identity of the client's
    ///  single connection
    pub server_addr: SocketAddr,
    pub protocol: ProtocolConfig,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr) -> ClientConfig {
        ClientConfig {
            server_addr,
            protocol: Default::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The address that the server's UDP socket is bound to
    pub self_addr: SocketAddr,
    pub protocol: ProtocolConfig,
}

impl ServerConfig {
    pub fn new(self_addr: SocketAddr) -> ServerConfig {
        ServerConfig {
            self_addr,
            protocol: Default::default(),
        }
    }

    /// listen on all IPV4 interfaces
    pub fn with_port(port: u16) -> ServerConfig {
        Self::new(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))
    }
}
