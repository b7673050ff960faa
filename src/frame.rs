//! Wire format of a single datagram (all numbers in network byte order):
//!
//! ```ascii
//! 0: kind (u32)
//!    0 CONNECT       client requests a connection
//!    1 CONNECTED     server accepts (or re-acknowledges) a connection
//!    2 DISCONNECT    client terminates its connection
//!    3 DISCONNECTED  server notifies that there is no (longer a) connection
//!    4 PACKET        application packet
//!    5 RTT_REQUEST   liveness probe
//!    6 RTT_ANSWER    response to a liveness probe
//! 4: kind specific body
//!    PACKET:                   packet id (u32), followed by the application defined payload
//!    RTT_REQUEST, RTT_ANSWER:  timestamp (i64) - millis since epoch when the request was sent,
//!                               echoed back unchanged in the answer
//!    (all others):             no body
//! ```
//!
//! There is no length field: a frame is always exactly one datagram, and a PACKET's payload
//!  extends to the end of the datagram.

use anyhow::anyhow;
use bytes::{Buf, BufMut, Bytes};

pub const KIND_CONNECT: u32 = 0;
pub const KIND_CONNECTED: u32 = 1;
pub const KIND_DISCONNECT: u32 = 2;
pub const KIND_DISCONNECTED: u32 = 3;
pub const KIND_PACKET: u32 = 4;
pub const KIND_RTT_REQUEST: u32 = 5;
pub const KIND_RTT_ANSWER: u32 = 6;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Connect,
    Connected,
    Disconnect,
    Disconnected,
    Packet {
        packet_id: u32,
        payload: Bytes,
    },
    RttRequest {
        timestamp: i64,
    },
    RttAnswer {
        timestamp: i64,
    },
}

impl Frame {
    pub const HEADER_LEN: usize = std::mem::size_of::<u32>();
    pub const MAX_CONTROL_FRAME_LEN: usize = Self::HEADER_LEN + std::mem::size_of::<i64>();

    pub fn kind(&self) -> u32 {
        match self {
            Frame::Connect => KIND_CONNECT,
            Frame::Connected => KIND_CONNECTED,
            Frame::Disconnect => KIND_DISCONNECT,
            Frame::Disconnected => KIND_DISCONNECTED,
            Frame::Packet { .. } => KIND_PACKET,
            Frame::RttRequest { .. } => KIND_RTT_REQUEST,
            Frame::RttAnswer { .. } => KIND_RTT_ANSWER,
        }
    }

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + match self {
            Frame::Packet { payload, .. } => std::mem::size_of::<u32>() + payload.len(),
            Frame::RttRequest { .. } | Frame::RttAnswer { .. } => std::mem::size_of::<i64>(),
            _ => 0,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.kind());
        match self {
            Frame::Packet { packet_id, payload } => {
                buf.put_u32(*packet_id);
                buf.put_slice(payload);
            }
            Frame::RttRequest { timestamp } | Frame::RttAnswer { timestamp } => {
                buf.put_i64(*timestamp);
            }
            Frame::Connect | Frame::Connected | Frame::Disconnect | Frame::Disconnected => {}
        }
    }

    /// Parses a frame from a complete datagram. Bytes after the body of a control frame are
    ///  ignored.
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Frame> {
        let frame = match buf.try_get_u32()? {
            KIND_CONNECT => Frame::Connect,
            KIND_CONNECTED => Frame::Connected,
            KIND_DISCONNECT => Frame::Disconnect,
            KIND_DISCONNECTED => Frame::Disconnected,
            KIND_PACKET => {
                let packet_id = buf.try_get_u32()?;
                let payload = buf.copy_to_bytes(buf.remaining());
                Frame::Packet { packet_id, payload }
            }
            KIND_RTT_REQUEST => Frame::RttRequest { timestamp: buf.try_get_i64()? },
            KIND_RTT_ANSWER => Frame::RttAnswer { timestamp: buf.try_get_i64()? },
            kind => return Err(anyhow!("invalid frame kind {}", kind)),
        };
        Ok(frame)
    }
}
