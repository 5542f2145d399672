//! UDP emulation of the shared radio medium.
//!
//! Each node binds a local UDP socket and lists the sockets of the other
//! nodes. A transmit sends the frame to every peer, so all of them hear it
//! the way every radio on a channel hears a packet. Datagrams arriving while
//! the radio is not in receive mode are discarded.
//!
//! Works on any host with loopback networking; signal metadata is reported
//! as zero.

use crate::frame::MAX_FRAME_LEN;
use crate::radio::{RadioError, ReceivedPacket, Transceiver};
use log::{debug, info, warn};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// Host transceiver backed by a non-blocking UDP socket.
#[derive(Debug)]
pub struct UdpRadio {
    socket: Option<UdpSocket>,
    peers: Vec<SocketAddr>,
    receiving: bool,
}

impl UdpRadio {
    /// Bind `local` and broadcast to `peers`.
    pub fn bind(local: impl ToSocketAddrs, peers: Vec<SocketAddr>) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        info!(
            "UDP radio on {} with {} peer(s)",
            socket.local_addr()?,
            peers.len()
        );
        Ok(Self {
            socket: Some(socket),
            peers,
            receiving: false,
        })
    }

    /// Address of the bound socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.socket {
            Some(socket) => socket.local_addr(),
            None => Err(io::Error::new(ErrorKind::NotConnected, "radio closed")),
        }
    }

    /// Also send to `peer`. Already known peers are ignored.
    pub fn add_peer(&mut self, peer: SocketAddr) {
        if !self.peers.contains(&peer) {
            self.peers.push(peer);
        }
    }

    /// Addresses every frame is sent to.
    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    /// Throw away datagrams that arrived while not listening.
    fn discard_pending(socket: &UdpSocket) {
        let mut buf = [0u8; MAX_FRAME_LEN + 1];
        let mut discarded = 0;
        while socket.recv_from(&mut buf).is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Discarded {} datagram(s) received outside RX mode", discarded);
        }
    }
}

impl Transceiver for UdpRadio {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        let socket = self.socket.as_ref().ok_or(RadioError::Closed)?;
        self.receiving = false;

        let mut last_error = None;
        let mut sent = 0;
        for peer in &self.peers {
            match socket.send_to(frame, peer) {
                Ok(_) => sent += 1,
                Err(e) => {
                    warn!("UDP send to {} failed: {}", peer, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if sent == 0 => Err(RadioError::Hardware(e.to_string())),
            _ => Ok(()),
        }
    }

    fn enter_receive_mode(&mut self) -> Result<(), RadioError> {
        let socket = self.socket.as_ref().ok_or(RadioError::Closed)?;
        if !self.receiving {
            Self::discard_pending(socket);
            self.receiving = true;
        }
        Ok(())
    }

    fn try_receive(&mut self) -> Option<ReceivedPacket> {
        let socket = self.socket.as_ref()?;
        if !self.receiving {
            return None;
        }
        // One spare byte so oversized frames reach the decoder and get rejected.
        let mut buf = [0u8; MAX_FRAME_LEN + 1];
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                debug!("UDP datagram from {} ({} bytes)", from, len);
                Some(ReceivedPacket::new(buf[..len].to_vec(), 0.0, 0.0))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!("UDP receive failed: {}", e);
                None
            }
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            info!("UDP radio closed");
        }
        self.receiving = false;
    }
}
