use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::PacketerError;
use crate::frame::Frame;

/// An application level message. Packets are pluggable: the protocol does not know their
///  structure, it only needs each packet type to serialize itself and to be reconstructable
///  from bytes.
pub trait Packet: PacketAny + Debug + Send + Sync + 'static {
    /// Writes the packet's payload, i.e. everything after the packet id
    fn write(&self, buf: &mut BytesMut) -> anyhow::Result<()>;

    /// Reads a packet from its payload. Unconsumed bytes at the end of the buffer are ignored.
    fn read(buf: &mut &[u8]) -> anyhow::Result<Self> where Self: Sized;
}

/// Type information for packets behind a `dyn Packet`. This is implemented for all packet types
///  automatically.
pub trait PacketAny {
    fn as_any(&self) -> &dyn Any;
    fn packet_type_id(&self) -> TypeId;
    fn packet_type_name(&self) -> &'static str;
}

impl<T: Packet> PacketAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn packet_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn packet_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl dyn Packet {
    pub fn is<T: Packet>(&self) -> bool {
        self.packet_type_id() == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Packet>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Packet ids are assigned per direction, and a packet type may be registered for one direction
///  only, or with different ids for the two directions.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Direction {
    /// packets sent by a client to the server
    Clientbound,
    /// packets sent by the server to a client
    Serverbound,
}

pub type PacketFactory = Arc<dyn Fn(&mut &[u8]) -> anyhow::Result<Arc<dyn Packet>> + Send + Sync>;

#[derive(Clone)]
pub struct PacketDefinition {
    pub id: u32,
    pub type_id: TypeId,
    pub type_name: &'static str,
    factory: PacketFactory,
}

impl Debug for PacketDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PacketDefinition{{{}:{}}}", self.id, self.type_name)
    }
}

#[derive(Default)]
struct DirectionRegistry {
    by_id: FxHashMap<u32, PacketDefinition>,
    ids: FxHashMap<TypeId, u32>,
}

impl DirectionRegistry {
    fn register(&mut self, direction: Direction, definition: PacketDefinition) {
        // last registration wins, removing stale reverse mappings to keep ids and types unique

        if let Some(prev_id) = self.ids.remove(&definition.type_id) {
            if prev_id != definition.id {
                warn!("{:?} packet type {} was registered with id {} - replacing it with id {}", direction, definition.type_name, prev_id, definition.id);
                self.by_id.remove(&prev_id);
            }
        }
        if let Some(prev) = self.by_id.remove(&definition.id) {
            if prev.type_id != definition.type_id {
                warn!("{:?} packet id {} was registered for {} - replacing it with {}", direction, definition.id, prev.type_name, definition.type_name);
                self.ids.remove(&prev.type_id);
            }
        }

        self.ids.insert(definition.type_id, definition.id);
        self.by_id.insert(definition.id, definition);
    }
}

/// Bidirectional mapping between packet types and their wire ids, separately for each
///  [Direction].
///
/// A registry is built up front and then shared (immutably) by a client or server. Both peers
///  must use compatible registries: a packet id is only meaningful if the receiving side
///  registered the same type for the same direction.
#[derive(Default)]
pub struct PacketRegistry {
    clientbound: DirectionRegistry,
    serverbound: DirectionRegistry,
}

impl PacketRegistry {
    pub fn new() -> PacketRegistry {
        Default::default()
    }

    /// registers a packet type for both directions with the same id
    pub fn register<T: Packet>(&mut self, id: u32) -> &mut Self {
        self.register_clientbound::<T>(id)
            .register_serverbound::<T>(id)
    }

    pub fn register_clientbound<T: Packet>(&mut self, id: u32) -> &mut Self {
        self.register_with_factory(Direction::Clientbound, id, T::read)
    }

    pub fn register_serverbound<T: Packet>(&mut self, id: u32) -> &mut Self {
        self.register_with_factory(Direction::Serverbound, id, T::read)
    }

    /// Registers a packet type with an explicit factory for reading it. Registering an id or a
    ///  type a second time for the same direction replaces the previous registration.
    pub fn register_with_factory<T: Packet>(
        &mut self,
        direction: Direction,
        id: u32,
        factory: impl Fn(&mut &[u8]) -> anyhow::Result<T> + Send + Sync + 'static,
    ) -> &mut Self {
        let definition = PacketDefinition {
            id,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            factory: Arc::new(move |buf: &mut &[u8]| {
                let packet: Arc<dyn Packet> = Arc::new(factory(buf)?);
                Ok(packet)
            }),
        };
        self.direction_mut(direction).register(direction, definition);
        self
    }

    pub fn definition(&self, direction: Direction, id: u32) -> Option<&PacketDefinition> {
        self.direction(direction).by_id.get(&id)
    }

    pub fn id_of<T: Packet>(&self, direction: Direction) -> Option<u32> {
        self.direction(direction).ids.get(&TypeId::of::<T>()).copied()
    }

    pub fn encode_id(&self, direction: Direction, packet: &dyn Packet) -> Result<u32, PacketerError> {
        self.direction(direction).ids.get(&packet.packet_type_id())
            .copied()
            .ok_or_else(|| PacketerError::UnregisteredType {
                direction,
                type_name: packet.packet_type_name(),
            })
    }

    /// Creates the PACKET frame for an application packet
    pub fn encode(&self, direction: Direction, packet: &dyn Packet) -> Result<Frame, PacketerError> {
        let packet_id = self.encode_id(direction, packet)?;

        let mut payload = BytesMut::new();
        packet.write(&mut payload)
            .map_err(|source| PacketerError::MalformedPayload { direction, id: packet_id, source })?;

        Ok(Frame::Packet {
            packet_id,
            payload: payload.freeze(),
        })
    }

    pub fn decode(&self, direction: Direction, id: u32, payload: &Bytes) -> Result<Arc<dyn Packet>, PacketerError> {
        let definition = self.definition(direction, id)
            .ok_or(PacketerError::UnknownPacketId { direction, id })?;

        let mut buf: &[u8] = payload;
        (definition.factory)(&mut buf)
            .map_err(|source| PacketerError::MalformedPayload { direction, id, source })
    }

    fn direction(&self, direction: Direction) -> &DirectionRegistry {
        match direction {
            Direction::Clientbound => &self.clientbound,
            Direction::Serverbound => &self.serverbound,
        }
    }

    fn direction_mut(&mut self, direction: Direction) -> &mut DirectionRegistry {
        match direction {
            Direction::Clientbound => &mut self.clientbound,
            Direction::Serverbound => &mut self.serverbound,
        }
    }
}
