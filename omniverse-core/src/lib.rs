pub mod ids;
pub mod packet;
pub mod wire;

pub use ids::{PeerId, PlaneId, RoomKey, DEFAULT_PLANE};
pub use packet::{
    DataPacket, Packet, PacketError, PacketKind, RpcRequestPacket, RpcResponsePacket,
    PACKET_VERSION,
};
pub use wire::{ClientMessage, RelayMessage, WireError, HEARTBEAT_ACK};
