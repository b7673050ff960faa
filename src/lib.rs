//! Connection-oriented messaging on top of plain UDP datagrams.
//!
//! A [server::Server] accepts connections from any number of [client::Client]s over a single
//!  socket. Connections are established with a CONNECT / CONNECTED handshake, kept alive by
//!  periodic RTT probes, and evicted if a peer shows no sign of life within a configured timeout.
//!  Applications exchange typed packets that are mapped to wire ids by a
//!  [packet::PacketRegistry], and observe connection and packet events through
//!  [listener::Listener]s.
//!
//! There is no reliability layer: datagrams may be lost, duplicated or reordered, and the
//!  protocol neither acknowledges nor retransmits application packets.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod filter;
pub mod frame;
pub mod listener;
pub mod packet;
pub mod send_pipeline;
pub mod server;
pub mod util;

#[cfg(test)]
mod test_util;

#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_test_writer()
            .try_init()
            .ok();
    }
}
