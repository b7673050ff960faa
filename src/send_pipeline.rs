use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::trace;

use crate::error::PacketerError;
use crate::filter::FrameFilter;
use crate::frame::Frame;

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()>;

    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", buf.len(), to);
        self.send_to(buf, to).await?;
        Ok(())
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.as_ref().local_addr()
    }
}

/// Outbound path of a runtime's socket: frames are serialized, passed through the filter and
///  written to the socket. The pipeline also holds the socket's open / closed state, which is
///  the cancellation signal for all of the runtime's loops.
pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
    filter: Arc<dyn FrameFilter>,
    closed: watch::Sender<bool>,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>, filter: Arc<dyn FrameFilter>) -> SendPipeline {
        SendPipeline {
            socket,
            filter,
            closed: watch::Sender::new(false),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send_frame(&self, to: SocketAddr, frame: &Frame) -> Result<(), PacketerError> {
        if self.is_closed() {
            return Err(PacketerError::Closed);
        }

        let mut buf = BytesMut::with_capacity(frame.serialized_len());
        frame.ser(&mut buf);
        let datagram = self.filter.transform(&buf);

        trace!("sending frame of kind {} to {:?}", frame.kind(), to);
        self.socket.send_datagram(to, &datagram).await
            .map_err(|source| PacketerError::Send { to, source })
    }

    /// Applies the filter's inverse and parses the frame of a received datagram
    pub fn decode_datagram(&self, datagram: &[u8]) -> Result<Frame, PacketerError> {
        let unfiltered: Bytes = self.filter.inverse(datagram)
            .map_err(PacketerError::MalformedFrame)?;
        let mut buf = unfiltered;
        Frame::deser(&mut buf)
            .map_err(PacketerError::MalformedFrame)
    }

    /// Marks the socket as closed, terminating all loops that use it. Returns false if it was
    ///  closed already.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

/// Resolves when the socket behind `closed` is closed
pub async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // an error means the pipeline was dropped, which closes the socket as well
    let _ = closed.wait_for(|is_closed| *is_closed).await;
}
