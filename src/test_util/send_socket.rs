use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::frame::Frame;
use crate::send_pipeline::SendSocket;

/// Parses and records all frames that are sent, assuming datagrams are not filtered
pub struct TrackingSendSocket {
    self_addr: SocketAddr,
    sent: Mutex<Vec<(SocketAddr, Frame)>>,
}

impl TrackingSendSocket {
    pub fn new(self_addr: SocketAddr) -> TrackingSendSocket {
        TrackingSendSocket {
            self_addr,
            sent: Default::default(),
        }
    }

    pub fn take_sent(&self) -> Vec<(SocketAddr, Frame)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn assert_sent(&self, expected: &[(SocketAddr, Frame)]) {
        assert_eq!(self.take_sent().as_slice(), expected);
    }

    pub fn assert_nothing_sent(&self) {
        self.assert_sent(&[]);
    }
}

#[async_trait]
impl SendSocket for TrackingSendSocket {
    async fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> std::io::Result<()> {
        let mut buf = buf;
        let frame = Frame::deser(&mut buf)
            .expect("sent datagram should be a valid frame");
        self.sent.lock().unwrap().push((to, frame));
        Ok(())
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        Ok(self.self_addr)
    }
}
