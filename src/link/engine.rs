//! Reliable delivery engine.
//!
//! The engine owns the radio and all protocol state: the message id counter,
//! the single in-flight [`PendingSend`] and the [`SeenSet`]. It is driven by
//! the link worker ([`scheduler`](super::scheduler)), which calls into it from
//! one task only, so none of this state needs a lock.
//!
//! # Outbound state machine
//!
//! ```text
//! Idle ──transmit──▶ Sent ──ACK──▶ AckReceived ──▶ Delivered
//!                     ▲  │
//!          retransmit │  │ deadline
//!                     │  ▼
//!                   TimedOut ──no retries left──▶ Failed
//! ```
//!
//! The ACK deadline is always measured from the most recent (re)transmission.
//! A retransmission reuses the original message id so the receiver's seen set
//! recognises it and only re-acknowledges.

use super::delivery::{Delivery, DeliveryHandler};
use super::seen::{SeenResult, SeenSet};
use crate::config::LinkConfig;
use crate::frame::{self, Address, Frame, MessageId, BROADCAST_ADDRESS};
use crate::radio::{RadioError, ReceivedPacket, Transceiver};
use crate::stats::LinkStats;
use log::{debug, info, trace, warn};
use rand_core::{OsRng, RngCore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Reply channel for a reliable send.
pub(crate) type DeliveredReply = oneshot::Sender<Result<Delivered, SendError>>;

/// Successful outcome of a reliable send.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    /// Id the message was sent with.
    pub message_id: MessageId,
    /// Transmissions it took (1 = no retransmission).
    pub attempts: u32,
    /// RSSI of the ACK, `None` for broadcasts.
    pub ack_rssi: Option<f32>,
    /// SNR of the ACK, `None` for broadcasts.
    pub ack_snr: Option<f32>,
}

/// Outbound message state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendState {
    Idle,
    Sent,
    AckReceived,
    TimedOut,
    Delivered,
    Failed,
}

/// The single message waiting for its acknowledgement.
#[derive(Debug)]
pub(crate) struct PendingSend {
    destination: Address,
    id: MessageId,
    /// Encoded frame, retransmitted byte for byte.
    frame: Vec<u8>,
    timeout: Duration,
    retries_remaining: u32,
    attempts: u32,
    /// Attempts the radio accepted.
    transmitted: u32,
    last_error: Option<RadioError>,
    deadline: Instant,
    state: SendState,
    reply: DeliveredReply,
}

/// What the engine did with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// ACK resolved the pending send.
    AckMatched,
    /// ACK for nothing we are waiting on.
    AckIgnored,
    /// New payload handed to the application.
    Delivered,
    /// Repeat of an already delivered payload.
    Duplicate,
    /// Addressed to another node.
    Foreign,
}

/// Result of one receive poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    /// A frame was read (valid or not).
    Received,
    /// Nothing waiting on the radio.
    Idle,
    /// The radio refused to enter receive mode.
    RadioError,
}

/// Reliable delivery engine.
pub(crate) struct Engine<R: Transceiver> {
    radio: R,
    config: LinkConfig,
    next_id: MessageId,
    seen: SeenSet,
    pending: Option<PendingSend>,
    handler: Box<dyn DeliveryHandler>,
    stats: Arc<LinkStats>,
    /// Radio is known to be in receive mode.
    receiving: bool,
}

impl<R: Transceiver> Engine<R> {
    /// Build an engine. The configuration must already be validated.
    pub(crate) fn new(
        radio: R,
        config: LinkConfig,
        handler: Box<dyn DeliveryHandler>,
        stats: Arc<LinkStats>,
    ) -> Self {
        let next_id = config
            .initial_message_id
            .unwrap_or_else(|| OsRng.next_u32() as MessageId);
        let seen = SeenSet::new(config.seen_set_capacity);
        Self {
            radio,
            config,
            next_id,
            seen,
            pending: None,
            handler,
            stats,
            receiving: false,
        }
    }

    /// This node's address.
    pub fn address(&self) -> Address {
        self.config.node_address
    }

    /// Get a reference to the link configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// A reliable send is waiting for its ACK.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// ACK deadline of the in-flight message.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Give the radio back.
    pub fn into_radio(self) -> R {
        self.radio
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// Switch the radio to receive mode.
    pub fn enter_receive_mode(&mut self) -> Result<(), RadioError> {
        match self.radio.enter_receive_mode() {
            Ok(()) => {
                self.receiving = true;
                Ok(())
            }
            Err(e) => {
                self.receiving = false;
                LinkStats::bump(&self.stats.radio_errors);
                Err(e)
            }
        }
    }

    /// Put one frame on air, then hand the radio straight back to receive.
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), RadioError> {
        self.receiving = false;
        let result = self.radio.transmit(bytes);
        match &result {
            Ok(()) => LinkStats::bump(&self.stats.frames_tx),
            Err(_) => LinkStats::bump(&self.stats.radio_errors),
        }
        if let Err(e) = self.enter_receive_mode() {
            warn!("Failed to re-enter receive mode after TX: {}", e);
        }
        result
    }

    /// Start a reliable send.
    ///
    /// Broadcasts are transmitted once and resolved immediately. Anything else
    /// becomes the pending send; the outcome arrives on `reply` later. While
    /// another send is in flight the reply is [`SendError::Busy`].
    pub(crate) fn begin_reliable(
        &mut self,
        payload: Vec<u8>,
        destination: Address,
        timeout: Duration,
        max_retries: u32,
        reply: DeliveredReply,
        now: Instant,
    ) {
        if let Some(p) = &self.pending {
            debug!(
                "Reliable send to {} rejected: message {} still in flight",
                destination, p.id
            );
            let _ = reply.send(Err(SendError::Busy));
            return;
        }

        let id = self.allocate_id();
        let bytes = match frame::encode(
            destination,
            self.address(),
            id,
            frame::FrameFlags::NONE,
            &payload,
        ) {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = reply.send(Err(SendError::Codec(e)));
                return;
            }
        };

        if destination == BROADCAST_ADDRESS {
            debug!("TX broadcast id={} ({} bytes)", id, bytes.len());
            let result = self
                .transmit(&bytes)
                .map(|()| Delivered {
                    message_id: id,
                    attempts: 1,
                    ack_rssi: None,
                    ack_snr: None,
                })
                .map_err(SendError::RadioUnavailable);
            let _ = reply.send(result);
            return;
        }

        let mut pending = PendingSend {
            destination,
            id,
            frame: bytes,
            timeout,
            retries_remaining: max_retries,
            attempts: 0,
            transmitted: 0,
            last_error: None,
            deadline: now,
            state: SendState::Idle,
            reply,
        };
        self.attempt(&mut pending, now);
        self.pending = Some(pending);
    }

    /// Transmit (or retransmit) the pending frame and arm its deadline.
    fn attempt(&mut self, pending: &mut PendingSend, now: Instant) {
        pending.attempts += 1;
        debug!(
            "TX to={} id={} attempt {} ({} bytes)",
            pending.destination,
            pending.id,
            pending.attempts,
            pending.frame.len()
        );
        match self.transmit(&pending.frame) {
            Ok(()) => pending.transmitted += 1,
            Err(e) => {
                warn!(
                    "TX to={} id={} failed: {}",
                    pending.destination, pending.id, e
                );
                pending.last_error = Some(e);
            }
        }
        pending.state = SendState::Sent;
        pending.deadline = now + pending.timeout + self.jitter(pending.timeout);
    }

    fn jitter(&self, timeout: Duration) -> Duration {
        if !self.config.ack_jitter {
            return Duration::ZERO;
        }
        let fraction = OsRng.next_u32() as f64 / u32::MAX as f64;
        timeout.mul_f64(fraction)
    }

    /// Fire-and-forget send. Returns the id the frame carried.
    pub fn send_unreliable(
        &mut self,
        payload: &[u8],
        destination: Address,
    ) -> Result<MessageId, SendError> {
        let id = self.allocate_id();
        let bytes = frame::encode(
            destination,
            self.address(),
            id,
            frame::FrameFlags::NONE,
            payload,
        )
        .map_err(SendError::Codec)?;
        debug!("TX unreliable to={} id={}", destination, id);
        self.transmit(&bytes).map_err(SendError::RadioUnavailable)?;
        Ok(id)
    }

    /// Handle an expired ACK deadline: retransmit or give up.
    pub fn check_timeout(&mut self, now: Instant) {
        let expired = matches!(&self.pending, Some(p) if now >= p.deadline);
        if !expired {
            return;
        }
        let Some(mut pending) = self.pending.take() else {
            return;
        };
        pending.state = SendState::TimedOut;

        if pending.retries_remaining > 0 {
            pending.retries_remaining -= 1;
            LinkStats::bump(&self.stats.retransmissions);
            debug!(
                "No ACK from {} for id={}, retransmitting ({} retries left)",
                pending.destination, pending.id, pending.retries_remaining
            );
            self.attempt(&mut pending, now);
            self.pending = Some(pending);
            return;
        }

        pending.state = SendState::Failed;
        LinkStats::bump(&self.stats.sends_failed);
        let error = match pending.last_error.take() {
            Some(e) if pending.transmitted == 0 => SendError::RadioUnavailable(e),
            _ => SendError::NoAck {
                attempts: pending.attempts,
            },
        };
        warn!(
            "Send to {} id={} failed: {}",
            pending.destination, pending.id, error
        );
        if pending.reply.send(Err(error)).is_err() {
            debug!("Sender of id={} went away before completion", pending.id);
        }
    }

    /// Fail the in-flight send, e.g. on shutdown.
    pub(crate) fn abort_pending(&mut self, error: SendError) {
        if let Some(mut pending) = self.pending.take() {
            info!(
                "Aborting send to {} id={} ({:?}): {}",
                pending.destination, pending.id, pending.state, error
            );
            pending.state = SendState::Failed;
            let _ = pending.reply.send(Err(error));
        }
    }

    /// Poll the radio once and process whatever arrived.
    pub fn poll_radio(&mut self) -> PollOutcome {
        if !self.receiving {
            if let Err(e) = self.enter_receive_mode() {
                warn!("Failed to enter receive mode: {}", e);
                return PollOutcome::RadioError;
            }
        }
        match self.radio.try_receive() {
            Some(packet) => {
                self.process_packet(packet);
                PollOutcome::Received
            }
            None => PollOutcome::Idle,
        }
    }

    /// Decode a raw packet and handle it. Malformed frames are dropped.
    pub fn process_packet(&mut self, packet: ReceivedPacket) -> Option<Inbound> {
        match frame::decode(&packet.data) {
            Ok(frame) => {
                LinkStats::bump(&self.stats.frames_rx);
                Some(self.handle_inbound(frame, packet.rssi, packet.snr))
            }
            Err(e) => {
                LinkStats::bump(&self.stats.decode_errors);
                warn!("Dropping malformed frame (RSSI {} dBm): {}", packet.rssi, e);
                None
            }
        }
    }

    /// Route a decoded frame.
    pub fn handle_inbound(&mut self, frame: Frame, rssi: f32, snr: f32) -> Inbound {
        debug!(
            "RX from={} to={} id={} flags={:#04x} ({} bytes, RSSI {} dBm, SNR {} dB)",
            frame.header_from,
            frame.header_to,
            frame.header_id,
            frame.header_flags.bits(),
            frame.payload.len(),
            rssi,
            snr
        );

        if frame.is_ack() {
            return self.handle_ack(&frame, rssi, snr);
        }

        if frame.header_to != self.address() && !frame.is_broadcast() {
            trace!("Ignoring frame for {}", frame.header_to);
            LinkStats::bump(&self.stats.foreign_frames);
            return Inbound::Foreign;
        }

        let seen = self.seen.insert(frame.header_from, frame.header_id);

        // Duplicates are acknowledged again: our previous ACK may have been lost.
        if !frame.is_broadcast() && self.config.auto_ack {
            self.send_ack(&frame);
        }

        match seen {
            SeenResult::New => {
                LinkStats::bump(&self.stats.delivered);
                self.handler.deliver(Delivery {
                    payload: frame.payload,
                    header_from: frame.header_from,
                    header_to: frame.header_to,
                    header_id: frame.header_id,
                    header_flags: frame.header_flags.bits(),
                    rssi,
                    snr,
                });
                Inbound::Delivered
            }
            SeenResult::Duplicate => {
                LinkStats::bump(&self.stats.duplicates);
                debug!(
                    "Duplicate from={} id={}, not delivering",
                    frame.header_from, frame.header_id
                );
                Inbound::Duplicate
            }
        }
    }

    fn handle_ack(&mut self, frame: &Frame, rssi: f32, snr: f32) -> Inbound {
        let matches = matches!(
            &self.pending,
            Some(p) if frame.header_to == self.config.node_address
                && frame.header_from == p.destination
                && frame.header_id == p.id
        );
        if !matches {
            trace!(
                "Ignoring ACK from={} id={}",
                frame.header_from,
                frame.header_id
            );
            return Inbound::AckIgnored;
        }
        let Some(mut pending) = self.pending.take() else {
            return Inbound::AckIgnored;
        };

        pending.state = SendState::AckReceived;
        LinkStats::bump(&self.stats.acks_received);
        LinkStats::bump(&self.stats.sends_delivered);
        debug!(
            "ACK from={} id={} after {} attempt(s)",
            pending.destination, pending.id, pending.attempts
        );
        pending.state = SendState::Delivered;
        let delivered = Delivered {
            message_id: pending.id,
            attempts: pending.attempts,
            ack_rssi: Some(rssi),
            ack_snr: Some(snr),
        };
        if pending.reply.send(Ok(delivered)).is_err() {
            debug!("Sender of id={} went away before its ACK", pending.id);
        }
        Inbound::AckMatched
    }

    fn send_ack(&mut self, frame: &Frame) {
        let ack = Frame::ack_for(frame, self.address());
        let bytes = match ack.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode ACK: {}", e);
                return;
            }
        };
        match self.transmit(&bytes) {
            Ok(()) => {
                LinkStats::bump(&self.stats.acks_sent);
                debug!("ACK sent to={} id={}", ack.header_to, ack.header_id);
            }
            Err(e) => warn!("Failed to send ACK to {}: {}", ack.header_to, e),
        }
    }
}

/// Errors returned to senders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// No matching ACK after all attempts.
    NoAck { attempts: u32 },
    /// The radio failed every transmit attempt.
    RadioUnavailable(RadioError),
    /// Another reliable send is in flight (fail-fast policy).
    Busy,
    /// Payload could not be framed.
    Codec(frame::CodecError),
    /// The link was shut down.
    Shutdown,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAck { attempts } => write!(f, "no ACK after {} attempts", attempts),
            Self::RadioUnavailable(e) => write!(f, "radio unavailable: {}", e),
            Self::Busy => write!(f, "another message is awaiting acknowledgement"),
            Self::Codec(e) => write!(f, "cannot frame payload: {}", e),
            Self::Shutdown => write!(f, "link shut down"),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RadioUnavailable(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}
