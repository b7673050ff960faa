mod chat_packet;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use clap_derive::Parser;
use tokio::sync::mpsc;
use tracing::{info, Level};
use udp_packeter::connection::Connection;
use udp_packeter::listener::{DisconnectReason, Listener};
use udp_packeter::packet::Packet;
use udp_packeter::server::Server;

use crate::chat_packet::{chat_registry, ChatMessage};

#[derive(Parser)]
struct Args {
    #[clap(default_value = "0.0.0.0:4425")]
    address: String,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

/// Forwards received chat messages to the echo loop, which broadcasts them to all clients
struct EchoListener {
    echo: mpsc::UnboundedSender<Arc<dyn Packet>>,
}

#[async_trait]
impl Listener for EchoListener {
    async fn connected(&self, connection: &Arc<Connection>) {
        info!("{:?} joined", connection);
    }

    async fn disconnected(&self, connection: &Arc<Connection>, reason: DisconnectReason) {
        info!("{:?} left: {}", connection, reason);
    }

    async fn received(&self, packet: Arc<dyn Packet>, connection: &Arc<Connection>) {
        if let Some(msg) = packet.downcast_ref::<ChatMessage>() {
            info!("{:?} (rtt {:?}): <{}> {}", connection, connection.smoothed_rtt_duration(), msg.sender, msg.text);
            let _ = self.echo.send(packet);
        }
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let address: SocketAddr = args.address.parse()?;
    let (echo_send, mut echo_recv) = mpsc::unbounded_channel();

    let server = Server::builder()
        .with_address(address)
        .with_registry(Arc::new(chat_registry()))
        .with_listener(Arc::new(EchoListener { echo: echo_send }))
        .build()?;
    server.start().await?;
    info!("echo server listening on {:?}", server.local_addr()?);

    loop {
        tokio::select! {
            packet = echo_recv.recv() => {
                let Some(packet) = packet else { break; };
                server.send_to_all(packet).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    server.close().await;
    Ok(())
}
