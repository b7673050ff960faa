use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::connection::Connection;
use crate::listener::{DisconnectReason, Listener};
use crate::packet::Packet;

#[derive(Debug, Clone)]
pub enum ListenerEvent {
    Connected(SocketAddr),
    Disconnected(SocketAddr, DisconnectReason),
    Received(SocketAddr, Arc<dyn Packet>),
    Sent(SocketAddr, Arc<dyn Packet>),
}

/// Records all listener events for later verification
#[derive(Default)]
pub struct TrackingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl TrackingListener {
    pub fn new() -> Arc<TrackingListener> {
        Default::default()
    }

    pub fn take_events(&self) -> Vec<ListenerEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn assert_no_events(&self) {
        let events = self.take_events();
        assert!(events.is_empty(), "unexpected listener events: {:?}", events);
    }

    pub fn assert_connected(&self, addr: SocketAddr) {
        match self.take_events().as_slice() {
            [ListenerEvent::Connected(a)] => assert_eq!(*a, addr),
            other => panic!("expected a single 'connected' event, was {:?}", other),
        }
    }

    pub fn assert_disconnected(&self, addr: SocketAddr, reason: DisconnectReason) {
        match self.take_events().as_slice() {
            [ListenerEvent::Disconnected(a, r)] => {
                assert_eq!(*a, addr);
                assert_eq!(*r, reason);
            }
            other => panic!("expected a single 'disconnected' event, was {:?}", other),
        }
    }

    fn record(&self, event: ListenerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Listener for TrackingListener {
    async fn connected(&self, connection: &Arc<Connection>) {
        self.record(ListenerEvent::Connected(connection.addr()));
    }

    async fn disconnected(&self, connection: &Arc<Connection>, reason: DisconnectReason) {
        self.record(ListenerEvent::Disconnected(connection.addr(), reason));
    }

    async fn received(&self, packet: Arc<dyn Packet>, connection: &Arc<Connection>) {
        self.record(ListenerEvent::Received(connection.addr(), packet));
    }

    async fn sent(&self, packet: Arc<dyn Packet>, connection: &Arc<Connection>) {
        self.record(ListenerEvent::Sent(connection.addr(), packet));
    }
}
