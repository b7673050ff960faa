use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::{ClientConfig, ProtocolConfig, DEFAULT_PORT};
use crate::connection::Connection;
use crate::error::{PacketerError, PacketerResult};
use crate::filter::create_filter;
use crate::frame::Frame;
use crate::listener::{DisconnectReason, Listener, Listeners};
use crate::packet::{Direction, Packet, PacketRegistry};
use crate::send_pipeline::{wait_closed, SendPipeline, SendSocket};
use crate::util::timer::epoch_millis;

pub struct ClientBuilder {
    server_addr: SocketAddr,
    registry: Option<Arc<PacketRegistry>>,
    listeners: Vec<Arc<dyn Listener>>,
    protocol: ProtocolConfig,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// defaults to a server on localhost, [DEFAULT_PORT]
    pub fn new() -> ClientBuilder {
        ClientBuilder {
            server_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            registry: None,
            listeners: Vec::new(),
            protocol: Default::default(),
        }
    }

    pub fn with_address(mut self, server_addr: SocketAddr) -> Self {
        self.server_addr = server_addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.server_addr.set_port(port);
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

    pub fn build(self) -> PacketerResult<Client> {
        let registry = self.registry
            .ok_or_else(|| PacketerError::Config("packet registry not set".to_string()))?;

        let client = Client::new(ClientConfig { server_addr: self.server_addr, protocol: self.protocol }, registry)?;
        for listener in self.listeners {
            client.add_listener(listener);
        }
        Ok(client)
    }
}

/// A client holds a single connection to a server.
///
/// Connecting binds a fresh socket on an ephemeral port and spawns three loops: one re-sending
///  CONNECT until the server acknowledges it, one receiving and dispatching datagrams, and one
///  probing the server and checking for timeout. All of them terminate when the socket is closed,
///  which happens on an explicit [Client::close], on DISCONNECTED from the server, or on timeout.
///  The client can connect again afterwards, using a new socket.
pub struct Client {
    config: ClientConfig,
    registry: Arc<PacketRegistry>,
    listeners: Arc<Listeners>,
    connection: Arc<Connection>,
    core: RwLock<Option<Arc<ClientCore>>>,
}

impl Client {
    pub fn new(config: ClientConfig, registry: Arc<PacketRegistry>) -> PacketerResult<Client> {
        config.protocol.validate()
            .map_err(|e| PacketerError::Config(e.to_string()))?;

        Ok(Client {
            connection: Arc::new(Connection::new(config.server_addr)),
            config,
            registry,
            listeners: Default::default(),
            core: Default::default(),
        })
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        self.listeners.remove(listener)
    }

    /// the connection to the server - this exists regardless of the client being connected
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.config.server_addr
    }

    pub fn is_connected(&self) -> bool {
        self.open_core()
            .is_ok_and(|c| c.is_connected())
    }

    pub fn local_addr(&self) -> PacketerResult<SocketAddr> {
        let core = self.open_core()?;
        core.pipeline.local_addr()
            .map_err(|source| PacketerError::SocketInit { addr: self.config.server_addr, source })
    }

    /// Connects to the server, waiting until the server acknowledged the connection. This
    ///  returns immediately if the client is connected already, and joins a connection attempt
    ///  that is in progress.
    ///
    /// There is no deadline: CONNECT is re-sent until the server answers, or until the
    ///  connection times out (which closes the socket and fails with [PacketerError::Closed]).
    ///  Use [Client::connect_timeout] for a shorter deadline.
    pub async fn connect(&self) -> PacketerResult<()> {
        let core = match self.open_core() {
            Ok(core) if core.is_connected() => return Ok(()),
            Ok(core) => core,
            Err(_) => self.open_socket().await?,
        };
        core.wait_connected().await
    }

    /// Like [Client::connect], but fails with [PacketerError::ConnectTimeout] if the server does
    ///  not acknowledge the connection within `deadline`. The socket is closed in that case.
    pub async fn connect_timeout(&self, deadline: Duration) -> PacketerResult<()> {
        match tokio::time::timeout(deadline, self.connect()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("no connection to {:?} within {:?}", self.config.server_addr, deadline);
                self.close().await;
                Err(PacketerError::ConnectTimeout(deadline))
            }
        }
    }

    pub async fn send(&self, packet: Arc<dyn Packet>) -> PacketerResult<()> {
        let frame = self.registry.encode(Direction::Clientbound, packet.as_ref())?;
        let core = self.open_core()?;
        core.pipeline.send_frame(self.config.server_addr, &frame).await?;
        self.listeners.notify_sent(packet, &self.connection).await;
        Ok(())
    }

    /// Sends DISCONNECT to the server and closes the socket. Listeners are not notified since
    ///  the server's answer can not be received any more.
    pub async fn close(&self) {
        let core = self.core.write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match core {
            Some(core) => core.close().await,
            None => debug!("client is not connected"),
        }
    }

    fn open_core(&self) -> PacketerResult<Arc<ClientCore>> {
        self.core.read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|c| !c.pipeline.is_closed())
            .cloned()
            .ok_or(PacketerError::Closed)
    }

    async fn open_socket(&self) -> PacketerResult<Arc<ClientCore>> {
        let bind_addr = if self.config.server_addr.is_ipv4() {
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
        }
        else {
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
        };
        let socket = UdpSocket::bind(bind_addr).await
            .map_err(|source| PacketerError::SocketInit { addr: bind_addr, source })?;
        let socket = Arc::new(socket);

        let core = {
            let mut lock = self.core.write()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(core) = lock.as_ref().filter(|c| !c.pipeline.is_closed()) {
                // a concurrent call opened a socket first, ours is dropped
                return Ok(core.clone());
            }

            // the connection may be left over from a previous socket
            self.connection.reset_timers();

            let core = Arc::new(ClientCore::new(
                self.config.clone(),
                self.registry.clone(),
                self.listeners.clone(),
                self.connection.clone(),
                Arc::new(socket.clone()),
            ));
            *lock = Some(core.clone());
            core
        };

        info!("connecting to {:?} from {:?}", self.config.server_addr, socket.local_addr());
        tokio::spawn(core.clone().connect_loop());
        tokio::spawn(core.clone().recv_loop(socket));
        tokio::spawn(core.clone().tick_loop());
        Ok(core)
    }
}

/// State of a client's socket, shared by its loops
struct ClientCore {
    config: ClientConfig,
    registry: Arc<PacketRegistry>,
    listeners: Arc<Listeners>,
    connection: Arc<Connection>,
    pipeline: SendPipeline,
    connected: watch::Sender<bool>,
}

impl ClientCore {
    fn new(config: ClientConfig, registry: Arc<PacketRegistry>, listeners: Arc<Listeners>, connection: Arc<Connection>, socket: Arc<dyn SendSocket>) -> ClientCore {
        let filter = create_filter(&config.protocol);
        ClientCore {
            config,
            registry,
            listeners,
            connection,
            pipeline: SendPipeline::new(socket, filter),
            connected: watch::Sender::new(false),
        }
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow() && !self.pipeline.is_closed()
    }

    async fn wait_connected(&self) -> PacketerResult<()> {
        let mut connected = self.connected.subscribe();
        let mut closed = self.pipeline.subscribe_closed();
        select! {
            biased;
            is_connected = wait_until_connected(&mut connected) => {
                if is_connected { Ok(()) } else { Err(PacketerError::Closed) }
            }
            _ = wait_closed(&mut closed) => Err(PacketerError::Closed),
        }
    }

    async fn connect_loop(self: Arc<Self>) {
        let mut closed = self.pipeline.subscribe_closed();
        let mut ticks = interval(self.config.protocol.reconnect_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            select! {
                _ = wait_closed(&mut closed) => break,
                _ = ticks.tick() => {
                    if *self.connected.borrow() {
                        break;
                    }
                    debug!("sending CONNECT to {:?}", self.config.server_addr);
                    self.send_control(Frame::Connect).await;
                }
            }
        }
        debug!("connect loop terminated");
    }

    async fn recv_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        info!("starting receive loop");

        let mut closed = self.pipeline.subscribe_closed();
        let mut buf = vec![0u8; self.config.protocol.receive_buffer_size];
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
        let mut ticks = interval(self.config.protocol.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            select! {
                _ = wait_closed(&mut closed) => break,
                _ = ticks.tick() => self.check_timers().await,
            }
        }
        debug!("RTT / timeout loop terminated");
    }

    async fn on_datagram(&self, from: SocketAddr, datagram: &[u8]) {
        trace!("received {} bytes from {:?}", datagram.len(), from);

        if from != self.config.server_addr {
            debug!("received datagram from {:?}, which is not the server - dropping", from);
            return;
        }

        match self.pipeline.decode_datagram(datagram) {
            Ok(frame) => self.on_frame(frame).await,
            Err(e) => warn!("received unparseable datagram from the server, dropping: {}", e),
        }
    }

    async fn on_frame(&self, frame: Frame) {
        match frame {
            Frame::Connected => self.on_connected().await,
            Frame::Disconnected => self.on_disconnected().await,
            Frame::RttRequest { timestamp } => {
                if self.is_connected() {
                    self.connection.on_liveness_evidence();
                    self.send_control(Frame::RttAnswer { timestamp }).await;
                }
                else {
                    debug!("received RTT_REQUEST before the connection was established - ignoring");
                }
            }
            Frame::RttAnswer { timestamp } => {
                self.connection.on_rtt_answer(timestamp);
                self.connection.on_liveness_evidence();
                trace!("RTT to server: {}ms", self.connection.smoothed_rtt());
            }
            Frame::Packet { packet_id, payload } => self.on_packet(packet_id, payload).await,
            Frame::Connect | Frame::Disconnect => {
                debug!("received {:?} from the server, which is only sent by clients - ignoring", frame);
            }
        }
    }

    async fn on_connected(&self) {
        self.connection.on_liveness_evidence();
        let was_connected = self.connected.send_replace(true);
        if was_connected {
            debug!("received duplicate CONNECTED");
            return;
        }

        info!("connected to {:?}", self.config.server_addr);
        self.listeners.notify_connected(&self.connection).await;
    }

    async fn on_disconnected(&self) {
        self.connected.send_replace(false);
        if self.pipeline.close() {
            info!("disconnected by server {:?}", self.config.server_addr);
            self.listeners.notify_disconnected(&self.connection, DisconnectReason::Disconnected).await;
        }
    }

    async fn on_packet(&self, packet_id: u32, payload: Bytes) {
        self.connection.on_liveness_evidence();

        match self.registry.decode(Direction::Serverbound, packet_id, &payload) {
            Ok(packet) => self.listeners.notify_received(packet, &self.connection).await,
            Err(e) => warn!("dropping packet from server: {}", e),
        }
    }

    /// one iteration of the RTT / timeout loop
    async fn check_timers(&self) {
        if self.connection.is_timed_out(self.config.protocol.timeout) {
            self.connected.send_replace(false);
            if self.pipeline.close() {
                info!("connection to {:?} timed out after {:?} without sign of life", self.config.server_addr, self.connection.idle_time());
                self.listeners.notify_disconnected(&self.connection, DisconnectReason::TimedOut).await;
            }
            return;
        }

        if self.is_connected() && self.connection.is_rtt_request_due(self.config.protocol.rtt_interval) {
            self.send_control(Frame::RttRequest { timestamp: epoch_millis() }).await;
        }
    }

    async fn close(&self) {
        if self.pipeline.is_closed() {
            return;
        }
        info!("closing connection to {:?}", self.config.server_addr);
        self.send_control(Frame::Disconnect).await;
        self.connected.send_replace(false);
        self.pipeline.close();
    }

    /// sends a control frame from one of the loops, where failures can only be logged
    async fn send_control(&self, frame: Frame) {
        if let Err(e) = self.pipeline.send_frame(self.config.server_addr, &frame).await {
            error!("failed to send {:?} to {:?}: {}", frame, self.config.server_addr, e);
        }
    }
}

async fn wait_until_connected(connected: &mut watch::Receiver<bool>) -> bool {
    connected.wait_for(|is_connected| *is_connected).await.is_ok()
}
