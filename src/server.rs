use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::{ProtocolConfig, ServerConfig, DEFAULT_PORT};
use crate::connection::Connection;
use crate::error::{PacketerError, PacketerResult};
use crate::filter::create_filter;
use crate::frame::Frame;
use crate::listener::{DisconnectReason, Listener, Listeners};
use crate::packet::{Direction, Packet, PacketRegistry};
use crate::send_pipeline::{wait_closed, SendPipeline, SendSocket};
use crate::util::atomic_map::AtomicMap;
use crate::util::timer::epoch_millis;

pub struct ServerBuilder {
    self_addr: SocketAddr,
    registry: Option<Arc<PacketRegistry>>,
    listeners: Vec<Arc<dyn Listener>>,
    protocol: ProtocolConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// defaults to all IPV4 interfaces on [DEFAULT_PORT]
    pub fn new() -> ServerBuilder {
        ServerBuilder {
            self_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            registry: None,
            listeners: Vec::new(),
            protocol: Default::default(),
        }
    }

    pub fn with_address(mut self, self_addr: SocketAddr) -> Self {
        self.self_addr = self_addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.self_addr.set_port(port);
        self
    }

    pub fn with_registry(mut self, registry: Arc<PacketRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_config(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn build(self) -> PacketerResult<Server> {
        let registry = self.registry
            .ok_or_else(|| PacketerError::Config("packet registry not set".to_string()))?;

        let server = Server::new(ServerConfig { self_addr: self.self_addr, protocol: self.protocol }, registry)?;
        for listener in self.listeners {
            server.add_listener(listener);
        }
        Ok(server)
    }
}

/// A server accepts connections from any number of clients on a single UDP socket. Clients are
///  identified by their socket address only.
///
/// Starting the server binds the socket and spawns two loops: one receiving and dispatching
///  datagrams, and one periodically probing connected clients and evicting those that timed out.
///  Both terminate when the server is closed.
pub struct Server {
    config: ServerConfig,
    registry: Arc<PacketRegistry>,
    listeners: Arc<Listeners>,
    core: RwLock<Option<Arc<ServerCore>>>,
}

impl Server {
    pub fn new(config: ServerConfig, registry: Arc<PacketRegistry>) -> PacketerResult<Server> {
        config.protocol.validate()
            .map_err(|e| PacketerError::Config(e.to_string()))?;

        Ok(Server {
            config,
            registry,
            listeners: Default::default(),
            core: Default::default(),
        })
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Binds the socket and starts the server's loops. This is a no-op if the server is running
    ///  already.
    pub async fn start(&self) -> PacketerResult<()> {
        if self.is_running() {
            debug!("server is running already");
            return Ok(());
        }

        let socket = UdpSocket::bind(self.config.self_addr).await
            .map_err(|source| PacketerError::SocketInit { addr: self.config.self_addr, source })?;
        let socket = Arc::new(socket);

        let core = Arc::new(ServerCore::new(
            self.config.protocol.clone(),
            self.registry.clone(),
            self.listeners.clone(),
            Arc::new(socket.clone()),
        ));

        {
            let mut lock = self.write_core();
            if lock.as_ref().is_some_and(|c| !c.pipeline.is_closed()) {
                // a concurrent call won the race, our socket is dropped
                debug!("server was started concurrently");
                return Ok(());
            }
            *lock = Some(core.clone());
        }

        info!("server listening on {:?}", socket.local_addr());
        tokio::spawn(core.clone().recv_loop(socket));
        tokio::spawn(core.tick_loop());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running_core().is_ok()
    }

    pub fn local_addr(&self) -> PacketerResult<SocketAddr> {
        self.running_core()?
            .pipeline
            .local_addr()
            .map_err(|source| PacketerError::SocketInit { addr: self.config.self_addr, source })
    }

    /// a snapshot of the current connections
    pub fn get_connections(&self) -> Vec<Arc<Connection>> {
        match self.running_core() {
            Ok(core) => core.connections.load().values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn get_connection(&self, addr: SocketAddr) -> Option<Arc<Connection>> {
        self.running_core().ok()?
            .connections
            .get(&addr)
    }

    pub async fn send(&self, packet: Arc<dyn Packet>, connection: &Arc<Connection>) -> PacketerResult<()> {
        self.running_core()?
            .send_packet(packet, connection).await
    }

    /// Sends a packet to all current connections. Failing to send to one connection does not
    ///  prevent sending to the others; the first failure is returned.
    pub async fn send_to_all(&self, packet: Arc<dyn Packet>) -> PacketerResult<()> {
        self.running_core()?
            .send_to_all(packet).await
    }

    /// Removes a connection and notifies the client, regardless of the client acknowledging it
    pub async fn kick(&self, connection: &Arc<Connection>) -> PacketerResult<()> {
        self.running_core()?
            .kick(connection).await;
        Ok(())
    }

    /// Notifies all clients and closes the socket. Listeners are not notified about the
    ///  connections that are dropped this way.
    pub async fn close(&self) {
        let core = self.write_core().take();
        match core {
            Some(core) => core.close().await,
            None => debug!("server is not running"),
        }
    }

    fn running_core(&self) -> PacketerResult<Arc<ServerCore>> {
        self.core.read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|c| !c.pipeline.is_closed())
            .cloned()
            .ok_or(PacketerError::Closed)
    }

    fn write_core(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<ServerCore>>> {
        self.core.write()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// State of a running server, shared by its loops
struct ServerCore {
    protocol: ProtocolConfig,
    registry: Arc<PacketRegistry>,
    listeners: Arc<Listeners>,
    pipeline: SendPipeline,
    connections: AtomicMap<SocketAddr, Arc<Connection>>,
}

impl ServerCore {
    fn new(protocol: ProtocolConfig, registry: Arc<PacketRegistry>, listeners: Arc<Listeners>, socket: Arc<dyn SendSocket>) -> ServerCore {
        let filter = create_filter(&protocol);
        ServerCore {
            protocol,
            registry,
            listeners,
            pipeline: SendPipeline::new(socket, filter),
            connections: Default::default(),
        }
    }

    async fn recv_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        info!("starting receive loop");

        let mut closed = self.pipeline.subscribe_closed();
        let mut buf = vec![0u8; self.protocol.receive_buffer_size];
        loop {
            select! {
                _ = wait_closed(&mut closed) => break,
                received = socket.recv_from(&mut buf) => {
                    let (num_read, from) = match received {
                        Ok(x) => x,
                        Err(e) => {
                            error!("socket error: {}", e);
                            continue;
                        }
                    };
                    if num_read >= buf.len() {
                        warn!("datagram from {:?} fills the entire receive buffer and may be truncated - dropping", from);
                        continue;
                    }
                    self.on_datagram(from, &buf[..num_read]).await;
                }
            }
        }
        debug!("receive loop terminated");
    }

    async fn tick_loop(self: Arc<Self>) {
        let mut closed = self.pipeline.subscribe_closed();
        let mut ticks = interval(self.protocol.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            select! {
                _ = wait_closed(&mut closed) => break,
                _ = ticks.tick() => self.check_connections().await,
            }
        }
        debug!("RTT / timeout loop terminated");
    }

    async fn on_datagram(&self, from: SocketAddr, datagram: &[u8]) {
        trace!("received {} bytes from {:?}", datagram.len(), from);

        match self.pipeline.decode_datagram(datagram) {
            Ok(frame) => self.on_frame(from, frame).await,
            Err(e) => warn!("received unparseable datagram from {:?}, dropping: {}", from, e),
        }
    }

    async fn on_frame(&self, from: SocketAddr, frame: Frame) {
        match frame {
            Frame::Connect => self.on_connect(from).await,
            Frame::Disconnect => self.on_disconnect(from).await,
            Frame::RttRequest { timestamp } => self.on_rtt_request(from, timestamp).await,
            Frame::RttAnswer { timestamp } => self.on_rtt_answer(from, timestamp).await,
            Frame::Packet { packet_id, payload } => self.on_packet(from, packet_id, payload).await,
            Frame::Connected | Frame::Disconnected => {
                debug!("received {:?} from {:?}, which is only sent by servers - ignoring", frame, from);
            }
        }
    }

    async fn on_connect(&self, from: SocketAddr) {
        let new_connection = Arc::new(Connection::new(from));
        let existing = self.connections.update(|m| {
            match m.get(&from) {
                Some(existing) => Some(existing.clone()),
                None => {
                    m.insert(from, new_connection.clone());
                    None
                }
            }
        });

        self.send_control(from, Frame::Connected).await;

        match existing {
            Some(existing) => {
                debug!("received CONNECT from {:?}, which is connected already - re-sending CONNECTED", from);
                existing.on_liveness_evidence();
            }
            None => {
                info!("client {:?} connected", from);
                self.listeners.notify_connected(&new_connection).await;
            }
        }
    }

    async fn on_disconnect(&self, from: SocketAddr) {
        let removed = self.connections.remove(&from);
        self.send_control(from, Frame::Disconnected).await;

        match removed {
            Some(connection) => {
                info!("client {:?} disconnected", from);
                self.listeners.notify_disconnected(&connection, DisconnectReason::Disconnected).await;
            }
            None => debug!("received DISCONNECT from {:?}, which is not connected", from),
        }
    }

    async fn on_rtt_request(&self, from: SocketAddr, timestamp: i64) {
        let Some(connection) = self.known_connection(from, "RTT_REQUEST").await else {
            return;
        };
        connection.on_liveness_evidence();
        self.send_control(from, Frame::RttAnswer { timestamp }).await;
    }

    async fn on_rtt_answer(&self, from: SocketAddr, timestamp: i64) {
        let Some(connection) = self.known_connection(from, "RTT_ANSWER").await else {
            return;
        };
        connection.on_rtt_answer(timestamp);
        connection.on_liveness_evidence();
        trace!("RTT for {:?}: {}ms", from, connection.smoothed_rtt());
    }

    async fn on_packet(&self, from: SocketAddr, packet_id: u32, payload: Bytes) {
        let Some(connection) = self.known_connection(from, "PACKET").await else {
            return;
        };
        connection.on_liveness_evidence();

        match self.registry.decode(Direction::Clientbound, packet_id, &payload) {
            Ok(packet) => self.listeners.notify_received(packet, &connection).await,
            Err(e) => warn!("dropping packet from {:?}: {}", from, e),
        }
    }

    /// Looks up the connection for a frame that requires one. A peer without a connection is
    ///  told so with a DISCONNECTED frame.
    async fn known_connection(&self, from: SocketAddr, frame_kind: &str) -> Option<Arc<Connection>> {
        let connection = self.connections.get(&from);
        if connection.is_none() {
            debug!("received {} from {:?}, which is not connected - sending DISCONNECTED", frame_kind, from);
            self.send_control(from, Frame::Disconnected).await;
        }
        connection
    }

    /// one iteration of the RTT / timeout loop
    async fn check_connections(&self) {
        for connection in self.connections.load().values() {
            if connection.is_timed_out(self.protocol.timeout) {
                if self.remove_if_current(connection) {
                    info!("client {:?} timed out after {:?} without sign of life", connection.addr(), connection.idle_time());
                    self.send_control(connection.addr(), Frame::Disconnected).await;
                    self.listeners.notify_disconnected(connection, DisconnectReason::TimedOut).await;
                }
            }
            else if connection.is_rtt_request_due(self.protocol.rtt_interval) {
                self.send_control(connection.addr(), Frame::RttRequest { timestamp: epoch_millis() }).await;
            }
        }
    }

    /// Removes a connection unless it was replaced by a new connection from the same address
    fn remove_if_current(&self, connection: &Arc<Connection>) -> bool {
        self.connections.update(|m| {
            match m.get(&connection.addr()) {
                Some(current) if Arc::ptr_eq(current, connection) => {
                    m.remove(&connection.addr());
                    true
                }
                _ => false,
            }
        })
    }

    async fn send_packet(&self, packet: Arc<dyn Packet>, connection: &Arc<Connection>) -> PacketerResult<()> {
        let frame = self.registry.encode(Direction::Serverbound, packet.as_ref())?;
        self.pipeline.send_frame(connection.addr(), &frame).await?;
        self.listeners.notify_sent(packet, connection).await;
        Ok(())
    }

    async fn send_to_all(&self, packet: Arc<dyn Packet>) -> PacketerResult<()> {
        let frame = self.registry.encode(Direction::Serverbound, packet.as_ref())?;

        let mut result = Ok(());
        for connection in self.connections.load().values() {
            match self.pipeline.send_frame(connection.addr(), &frame).await {
                Ok(()) => self.listeners.notify_sent(packet.clone(), connection).await,
                Err(e) => {
                    error!("failed to send packet to {:?}: {}", connection.addr(), e);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }

    async fn kick(&self, connection: &Arc<Connection>) {
        // a stale handle for a connection that was replaced must not kick its successor
        if !self.remove_if_current(connection) {
            debug!("kicking {:?}, which is not connected - ignoring", connection.addr());
            return;
        }

        info!("kicking client {:?}", connection.addr());
        self.send_control(connection.addr(), Frame::Disconnected).await;
        self.listeners.notify_disconnected(connection, DisconnectReason::Kicked).await;
    }

    async fn close(&self) {
        info!("closing server");
        for connection in self.connections.clear() {
            self.send_control(connection.addr(), Frame::Disconnected).await;
        }
        self.pipeline.close();
    }

    /// sends a control frame from one of the loops, where failures can only be logged
    async fn send_control(&self, to: SocketAddr, frame: Frame) {
        if let Err(e) = self.pipeline.send_frame(to, &frame).await {
            error!("failed to send {:?} to {:?}: {}", frame, to, e);
        }
    }
}
