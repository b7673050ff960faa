use bytes::{Buf, BufMut, BytesMut};
use udp_packeter::packet::{Packet, PacketRegistry};
use udp_packeter::util::buf::{put_string, try_get_string};

/// A chat line, sent by clients and echoed by the server
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    pub sent_at_millis: i64,
}

impl Packet for ChatMessage {
    fn write(&self, buf: &mut BytesMut) -> anyhow::Result<()> {
        put_string(buf, &self.sender)?;
        put_string(buf, &self.text)?;
        buf.put_i64(self.sent_at_millis);
        Ok(())
    }

    fn read(buf: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(ChatMessage {
            sender: try_get_string(buf)?,
            text: try_get_string(buf)?,
            sent_at_millis: buf.try_get_i64()?,
        })
    }
}

pub fn chat_registry() -> PacketRegistry {
    let mut registry = PacketRegistry::new();
    registry.register::<ChatMessage>(1);
    registry
}
