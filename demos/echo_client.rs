mod chat_packet;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use clap_derive::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use udp_packeter::connection::Connection;
use udp_packeter::client::Client;
use udp_packeter::listener::{DisconnectReason, Listener};
use udp_packeter::packet::Packet;
use udp_packeter::util::timer::epoch_millis;

use crate::chat_packet::{chat_registry, ChatMessage};

#[derive(Parser)]
struct Args {
    name: String,

    #[clap(default_value = "127.0.0.1:4425")]
    server_address: String,

    #[clap(long, default_value_t = 10)]
    connect_timeout_seconds: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

struct PrintingListener;

#[async_trait]
impl Listener for PrintingListener {
    async fn disconnected(&self, _connection: &Arc<Connection>, reason: DisconnectReason) {
        info!("disconnected: {}", reason);
    }

    async fn received(&self, packet: Arc<dyn Packet>, _connection: &Arc<Connection>) {
        if let Some(msg) = packet.downcast_ref::<ChatMessage>() {
            println!("<{}> {} ({}ms)", msg.sender, msg.text, epoch_millis() - msg.sent_at_millis);
        }
    }
}

/// Reads lines from stdin and sends them to the server, printing everything the server echoes
#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .try_init()
        .ok();

    let server_address: SocketAddr = args.server_address.parse()?;
    let client = Client::builder()
        .with_address(server_address)
        .with_registry(Arc::new(chat_registry()))
        .with_listener(Arc::new(PrintingListener))
        .build()?;

    client.connect_timeout(Duration::from_secs(args.connect_timeout_seconds)).await?;
    info!("connected to {:?} as {}", server_address, args.name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !client.is_connected() {
            break;
        }
        client.send(Arc::new(ChatMessage {
            sender: args.name.clone(),
            text: line,
            sent_at_millis: epoch_millis(),
        })).await?;
    }

    client.close().await;
    Ok(())
}
