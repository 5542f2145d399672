//! Transceiver adapter contract.
//!
//! The link layer never talks to radio hardware directly. Anything that can
//! put raw frames on the shared medium and hand back received ones implements
//! [`Transceiver`]: an SX127x/SX126x driver on a board, the in-memory
//! [`SimMedium`](crate::sim::SimMedium) in tests, or the UDP emulation used by
//! the host binaries.
//!
//! # Half-Duplex Management
//!
//! The radio cannot transmit and receive at the same time. The link worker
//! is the only caller of these methods, so a transmit never overlaps a
//! receive poll. After every transmit the worker calls
//! [`Transceiver::enter_receive_mode`] again.

use std::fmt;

/// A frame picked up by the radio, with signal metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPacket {
    /// Raw frame bytes (header + payload).
    pub data: Vec<u8>,
    /// RSSI in dBm.
    pub rssi: f32,
    /// SNR in dB.
    pub snr: f32,
}

impl ReceivedPacket {
    /// Packet with its signal metadata.
    pub fn new(data: Vec<u8>, rssi: f32, snr: f32) -> Self {
        Self { data, rssi, snr }
    }
}

/// Black-box packet radio.
///
/// Calls are made from the link worker task and must not block for long:
/// `transmit` returns once the frame is on air (including any listen-before-talk
/// wait the driver performs), `try_receive` never waits.
pub trait Transceiver: Send {
    /// Send one raw frame.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError>;

    /// Switch the radio to continuous receive.
    fn enter_receive_mode(&mut self) -> Result<(), RadioError>;

    /// Non-blocking poll for a received frame.
    fn try_receive(&mut self) -> Option<ReceivedPacket>;

    /// Put the radio to sleep and release it.
    fn close(&mut self);
}

impl<T: Transceiver + ?Sized> Transceiver for Box<T> {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        (**self).transmit(frame)
    }

    fn enter_receive_mode(&mut self) -> Result<(), RadioError> {
        (**self).enter_receive_mode()
    }

    fn try_receive(&mut self) -> Option<ReceivedPacket> {
        (**self).try_receive()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Radio errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// Medium stayed busy; the frame was not sent.
    ChannelBusy,
    /// Driver or hardware fault.
    Hardware(String),
    /// The radio has been closed.
    Closed,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelBusy => write!(f, "channel busy"),
            Self::Hardware(msg) => write!(f, "hardware fault: {}", msg),
            Self::Closed => write!(f, "radio closed"),
        }
    }
}

impl std::error::Error for RadioError {}
