use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::connection::Connection;
use crate::packet::Packet;

/// Why a connection ended, as reported to [Listener::disconnected]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DisconnectReason {
    /// the peer disconnected, or the server told the client that there is no connection
    Disconnected,
    /// no liveness evidence from the peer within the configured timeout
    TimedOut,
    /// the server application kicked the client
    Kicked,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Disconnected => "Disconnected",
            DisconnectReason::TimedOut => "Timed out",
            DisconnectReason::Kicked => "Kicked",
        }
    }
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application callbacks for connection and packet events. All methods have empty default
///  implementations.
///
/// Callbacks are awaited inline by the runtime's loops, so a slow listener delays processing of
///  subsequent datagrams. Listeners that do real work should hand it off to a task of their own.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    async fn connected(&self, _connection: &Arc<Connection>) {}

    async fn disconnected(&self, _connection: &Arc<Connection>, _reason: DisconnectReason) {}

    async fn received(&self, _packet: Arc<dyn Packet>, _connection: &Arc<Connection>) {}

    async fn sent(&self, _packet: Arc<dyn Packet>, _connection: &Arc<Connection>) {}
}

/// The registered listeners of a client or server. Listeners can be added and removed at any
///  time: notification works on a snapshot, so changes take effect with the next event.
#[derive(Default)]
pub struct Listeners {
    listeners: RwLock<Arc<Vec<Arc<dyn Listener>>>>,
}

impl Listeners {
    pub fn new(initial: Vec<Arc<dyn Listener>>) -> Listeners {
        Listeners {
            listeners: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn add(&self, listener: Arc<dyn Listener>) {
        let mut lock = self.listeners.write()
            .unwrap_or_else(|e| e.into_inner());
        let mut updated = lock.as_ref().clone();
        updated.push(listener);
        *lock = Arc::new(updated);
    }

    /// Removes a listener by identity. Returns false if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn Listener>) -> bool {
        let mut lock = self.listeners.write()
            .unwrap_or_else(|e| e.into_inner());
        let Some(idx) = lock.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        let mut updated = lock.as_ref().clone();
        updated.remove(idx);
        *lock = Arc::new(updated);
        true
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<dyn Listener>>> {
        self.listeners.read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn notify_connected(&self, connection: &Arc<Connection>) {
        for listener in self.snapshot().iter() {
            listener.connected(connection).await;
        }
    }

    pub async fn notify_disconnected(&self, connection: &Arc<Connection>, reason: DisconnectReason) {
        for listener in self.snapshot().iter() {
            listener.disconnected(connection, reason).await;
        }
    }

    pub async fn notify_received(&self, packet: Arc<dyn Packet>, connection: &Arc<Connection>) {
        for listener in self.snapshot().iter() {
            listener.received(packet.clone(), connection).await;
        }
    }

    pub async fn notify_sent(&self, packet: Arc<dyn Packet>, connection: &Arc<Connection>) {
        for listener in self.snapshot().iter() {
            listener.sent(packet.clone(), connection).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use mockall::Sequence;
    use rstest::rstest;
    use crate::test_util::packet::PingPacket;
    use super::*;

    fn connection() -> Arc<Connection> {
        Arc::new(Connection::new("127.0.0.1:4425".parse().unwrap()))
    }

    #[rstest]
    #[case(DisconnectReason::Disconnected, "Disconnected")]
    #[case(DisconnectReason::TimedOut, "Timed out")]
    #[case(DisconnectReason::Kicked, "Kicked")]
    fn test_reason_strings(#[case] reason: DisconnectReason, #[case] expected: &str) {
        assert_eq!(reason.as_str(), expected);
        assert_eq!(reason.to_string(), expected);
    }

    #[tokio::test]
    async fn test_notify_in_registration_order() {
        let mut seq = Sequence::new();

        let mut first = MockListener::new();
        first.expect_disconnected()
            .withf(|c, reason| c.addr().port() == 4425 && *reason == DisconnectReason::Kicked)
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        let mut second = MockListener::new();
        second.expect_disconnected()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let listeners = Listeners::new(vec![Arc::new(first), Arc::new(second)]);
        listeners.notify_disconnected(&connection(), DisconnectReason::Kicked).await;
    }

    #[tokio::test]
    async fn test_notify_received_and_sent() {
        let mut mock = MockListener::new();
        mock.expect_received()
            .withf(|p, _| p.is::<PingPacket>())
            .times(1)
            .return_const(());
        mock.expect_sent()
            .withf(|p, _| p.downcast_ref::<PingPacket>() == Some(&PingPacket { seq: 7 }))
            .times(1)
            .return_const(());

        let listeners = Listeners::new(vec![Arc::new(mock)]);
        let connection = connection();
        listeners.notify_received(Arc::new(PingPacket { seq: 1 }), &connection).await;
        listeners.notify_sent(Arc::new(PingPacket { seq: 7 }), &connection).await;
    }

    struct CountingListener {
        count: Mutex<usize>,
    }
    #[async_trait]
    impl Listener for CountingListener {
        async fn connected(&self, _connection: &Arc<Connection>) {
            *self.count.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn test_add_remove() {
        let counting = Arc::new(CountingListener { count: Mutex::new(0) });
        let as_listener: Arc<dyn Listener> = counting.clone();

        let listeners = Listeners::default();
        assert!(listeners.is_empty());

        listeners.add(as_listener.clone());
        listeners.add(Arc::new(CountingListener { count: Mutex::new(0) }));
        assert_eq!(listeners.len(), 2);

        listeners.notify_connected(&connection()).await;
        assert_eq!(*counting.count.lock().unwrap(), 1);

        assert!(listeners.remove(&as_listener));
        assert!(!listeners.remove(&as_listener));
        assert_eq!(listeners.len(), 1);

        listeners.notify_connected(&connection()).await;
        assert_eq!(*counting.count.lock().unwrap(), 1);
    }

    /// a listener that removes itself while being notified
    struct SelfRemovingListener {
        listeners: Arc<Listeners>,
        myself: Mutex<Option<Arc<dyn Listener>>>,
        calls: Mutex<usize>,
    }
    #[async_trait]
    impl Listener for SelfRemovingListener {
        async fn connected(&self, _connection: &Arc<Connection>) {
            *self.calls.lock().unwrap() += 1;
            let myself = self.myself.lock().unwrap().take();
            if let Some(myself) = myself {
                self.listeners.remove(&myself);
            }
        }
    }

    #[tokio::test]
    async fn test_remove_during_notification() {
        let listeners = Arc::new(Listeners::default());
        let self_removing = Arc::new(SelfRemovingListener {
            listeners: listeners.clone(),
            myself: Mutex::new(None),
            calls: Mutex::new(0),
        });
        let as_listener: Arc<dyn Listener> = self_removing.clone();
        *self_removing.myself.lock().unwrap() = Some(as_listener.clone());

        let counting = Arc::new(CountingListener { count: Mutex::new(0) });
        listeners.add(as_listener);
        listeners.add(counting.clone());

        listeners.notify_connected(&connection()).await;
        assert_eq!(*self_removing.calls.lock().unwrap(), 1);
        // the snapshot still contained the second listener
        assert_eq!(*counting.count.lock().unwrap(), 1);
        assert_eq!(listeners.len(), 1);

        listeners.notify_connected(&connection()).await;
        assert_eq!(*self_removing.calls.lock().unwrap(), 1);
        assert_eq!(*counting.count.lock().unwrap(), 2);
    }
}
