//! Reliable addressed messaging over half-duplex packet radio.
//!
//! Nodes share one radio channel and address each other with 16-bit
//! addresses. Every frame carries a 6-byte header (destination, source,
//! message id, flags); addressed data is acknowledged and retransmitted until
//! the ACK arrives or the retry budget runs out.
//!
//! The radio itself is behind the [`Transceiver`] trait. [`sim`] provides an
//! in-memory medium for tests and a UDP emulation for host demos.

pub mod config;
pub mod demo;
pub mod frame;
pub mod link;
pub mod radio;
pub mod sim;
pub mod stats;

// Re-export commonly used items
pub use config::{BusyPolicy, ConfigError, LinkConfig};
pub use frame::{Address, CodecError, Frame, FrameFlags, MessageId, BROADCAST_ADDRESS};
pub use link::{Delivered, Delivery, DeliveryHandler, Link, LinkHandle, SendError};
pub use radio::{RadioError, ReceivedPacket, Transceiver};
pub use sim::{SimMedium, SimRadio, UdpRadio};
pub use stats::{LinkStats, StatsServer, DEFAULT_STATS_PORT};
