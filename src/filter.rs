use std::sync::Arc;

use bytes::Bytes;

use crate::config::ProtocolConfig;

/// A transformation of complete datagrams, applied after framing on the send side and before
///  parsing on the receive side. It is not aware of frames or connections.
pub trait FrameFilter: Send + Sync + 'static {
    fn transform(&self, datagram: &[u8]) -> Bytes;

    /// Reverses [FrameFilter::transform]. Implementations must accept datagrams that were sent
    ///  by a peer without the filter.
    fn inverse(&self, datagram: &[u8]) -> anyhow::Result<Bytes>;
}

/// Sends datagrams unchanged. Compressed datagrams from peers are still understood.
pub struct NoFilter;
impl FrameFilter for NoFilter {
    fn transform(&self, datagram: &[u8]) -> Bytes {
        Bytes::copy_from_slice(datagram)
    }

    fn inverse(&self, datagram: &[u8]) -> anyhow::Result<Bytes> {
        decompress_if_marked(datagram)
    }
}

/// Prefix marking a compressed datagram. A plain frame always starts with a zero byte (the high
///  byte of its kind), so this can not be confused with an uncompressed frame.
pub const COMPRESSION_MAGIC: [u8; 4] = [0xc2, 0xa7, 0xcb, 0x87];

/// Upper bound for a decompressed datagram, i.e. the largest UDP payload over IPv4. No peer
///  sends an uncompressed datagram bigger than that, so anything expanding beyond it is rejected
///  without allocating more.
pub const MAX_DECOMPRESSED_LEN: usize = 65_507;

pub fn is_compressed(datagram: &[u8]) -> bool {
    datagram.starts_with(&COMPRESSION_MAGIC)
}

/// zstd compression of entire datagrams, marked by [COMPRESSION_MAGIC]
#[cfg(feature = "compression")]
pub struct CompressionFilter {
    level: i32,
}

#[cfg(feature = "compression")]
impl Default for CompressionFilter {
    fn default() -> Self {
        CompressionFilter { level: zstd::DEFAULT_COMPRESSION_LEVEL }
    }
}

#[cfg(feature = "compression")]
impl CompressionFilter {
    pub fn new(level: i32) -> CompressionFilter {
        CompressionFilter { level }
    }
}

#[cfg(feature = "compression")]
impl FrameFilter for CompressionFilter {
    fn transform(&self, datagram: &[u8]) -> Bytes {
        if datagram.len() > MAX_DECOMPRESSED_LEN {
            tracing::warn!("datagram of {} bytes is too big to be decompressed by the receiver, sending uncompressed", datagram.len());
            return Bytes::copy_from_slice(datagram);
        }
        match zstd::stream::encode_all(datagram, self.level) {
            Ok(compressed) => {
                let mut result = Vec::with_capacity(COMPRESSION_MAGIC.len() + compressed.len());
                result.extend_from_slice(&COMPRESSION_MAGIC);
                result.extend_from_slice(&compressed);
                Bytes::from(result)
            }
            Err(e) => {
                // receivers handle uncompressed datagrams transparently
                tracing::warn!("compression failed, sending uncompressed: {}", e);
                Bytes::copy_from_slice(datagram)
            }
        }
    }

    fn inverse(&self, datagram: &[u8]) -> anyhow::Result<Bytes> {
        decompress_if_marked(datagram)
    }
}

/// The filter for a runtime's outbound datagrams. The config is assumed to be validated, i.e.
///  compression is only requested if the feature is enabled.
pub fn create_filter(config: &ProtocolConfig) -> Arc<dyn FrameFilter> {
    #[cfg(feature = "compression")]
    if config.compression {
        tracing::info!("compressing outbound datagrams");
        return Arc::new(CompressionFilter::default());
    }
    #[cfg(not(feature = "compression"))]
    if config.compression {
        tracing::warn!("compression requested, but the 'compression' feature is not enabled - sending uncompressed");
    }
    Arc::new(NoFilter)
}

/// Decompresses a datagram if it carries [COMPRESSION_MAGIC], and passes it through otherwise.
///  Datagrams that would expand beyond [MAX_DECOMPRESSED_LEN] are rejected. Without the
///  `compression` feature, compressed datagrams are rejected.
pub fn decompress_if_marked(datagram: &[u8]) -> anyhow::Result<Bytes> {
    if !is_compressed(datagram) {
        return Ok(Bytes::copy_from_slice(datagram));
    }

    #[cfg(feature = "compression")]
    {
        let decompressed = zstd::bulk::decompress(&datagram[COMPRESSION_MAGIC.len()..], MAX_DECOMPRESSED_LEN)
            .map_err(|e| anyhow::anyhow!("invalid compressed datagram of {} bytes: {}", datagram.len(), e))?;
        Ok(Bytes::from(decompressed))
    }
    #[cfg(not(feature = "compression"))]
    {
        anyhow::bail!("received compressed datagram, but compression support is not enabled")
    }
}
