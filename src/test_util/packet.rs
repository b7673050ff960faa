use bytes::{Buf, BufMut, BytesMut};

use crate::packet::Packet;
use crate::util::buf::{put_string, try_get_string};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPacket {
    pub text: String,
    pub timestamp: i64,
}

impl Packet for ChatPacket {
    fn write(&self, buf: &mut BytesMut) -> anyhow::Result<()> {
        put_string(buf, &self.text)?;
        buf.put_i64(self.timestamp);
        Ok(())
    }

    fn read(buf: &mut &[u8]) -> anyhow::Result<Self> {
        let text = try_get_string(buf)?;
        let timestamp = buf.try_get_i64()?;
        Ok(ChatPacket { text, timestamp })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPacket {
    pub seq: u64,
}

impl Packet for PingPacket {
    fn write(&self, buf: &mut BytesMut) -> anyhow::Result<()> {
        buf.put_u64(self.seq);
        Ok(())
    }

    fn read(buf: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(PingPacket { seq: buf.try_get_u64()? })
    }
}

/// a packet type that is never registered
#[derive(Debug)]
pub struct UnregisteredPacket;

impl Packet for UnregisteredPacket {
    fn write(&self, _buf: &mut BytesMut) -> anyhow::Result<()> {
        Ok(())
    }

    fn read(_buf: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(UnregisteredPacket)
    }
}
