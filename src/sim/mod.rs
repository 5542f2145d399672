//! Simulated radio media.
//!
//! [`SimMedium`] is an in-memory shared channel for tests and demos. Every
//! radio attached to it hears every other radio, but only while it is in
//! receive mode: a radio that has just transmitted misses traffic until it
//! re-enters receive, like real half-duplex hardware.
//!
//! Loss and faults are injected on the medium:
//!
//! - a drop filter decides per transmission whether the frame is lost,
//! - `fail_transmit` makes one radio's transmit calls fail,
//! - every transmission is recorded in the history.
//!
//! [`UdpRadio`] emulates the medium across processes with UDP datagrams.

mod udp;

pub use udp::UdpRadio;

use crate::radio::{RadioError, ReceivedPacket, Transceiver};
use log::trace;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Index of a radio on a [`SimMedium`].
pub type RadioId = usize;

/// Default signal metadata attached to simulated receptions.
pub const SIM_RSSI: f32 = -60.0;
pub const SIM_SNR: f32 = 9.5;

type DropFilter = Box<dyn FnMut(RadioId, &[u8]) -> bool + Send>;

/// One recorded transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub from: RadioId,
    pub frame: Vec<u8>,
    /// Lost to the drop filter.
    pub dropped: bool,
}

#[derive(Debug, Default)]
struct Port {
    receiving: bool,
    closed: bool,
    fail_transmit: Option<RadioError>,
    inbox: VecDeque<ReceivedPacket>,
}

struct Medium {
    ports: Vec<Port>,
    history: Vec<Transmission>,
    drop_filter: Option<DropFilter>,
    rssi: f32,
    snr: f32,
}

/// Shared in-memory channel. Cloning gives another handle to the same medium.
#[derive(Clone)]
pub struct SimMedium {
    inner: Arc<Mutex<Medium>>,
}

impl Default for SimMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMedium {
    /// Empty medium with default signal metadata.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Medium {
                ports: Vec::new(),
                history: Vec::new(),
                drop_filter: None,
                rssi: SIM_RSSI,
                snr: SIM_SNR,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Medium> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a new radio to the medium.
    pub fn attach(&self) -> SimRadio {
        let mut medium = self.lock();
        medium.ports.push(Port::default());
        SimRadio {
            id: medium.ports.len() - 1,
            medium: self.clone(),
        }
    }

    /// Decide per transmission whether the frame is lost.
    ///
    /// The filter sees the transmitting radio and the raw frame and returns
    /// `true` to drop it.
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: FnMut(RadioId, &[u8]) -> bool + Send + 'static,
    {
        self.lock().drop_filter = Some(Box::new(filter));
    }

    /// Stop dropping frames.
    pub fn clear_drop_filter(&self) {
        self.lock().drop_filter = None;
    }

    /// Make every transmit of `radio` fail with `error`, or clear the fault.
    pub fn fail_transmit(&self, radio: RadioId, error: Option<RadioError>) {
        if let Some(port) = self.lock().ports.get_mut(radio) {
            port.fail_transmit = error;
        }
    }

    /// Signal metadata reported with every reception.
    pub fn set_signal(&self, rssi: f32, snr: f32) {
        let mut medium = self.lock();
        medium.rssi = rssi;
        medium.snr = snr;
    }

    /// Every frame put on the medium so far, in order.
    pub fn history(&self) -> Vec<Transmission> {
        self.lock().history.clone()
    }

    /// Frames transmitted by `radio`.
    pub fn transmissions_from(&self, radio: RadioId) -> Vec<Vec<u8>> {
        self.lock()
            .history
            .iter()
            .filter(|t| t.from == radio)
            .map(|t| t.frame.clone())
            .collect()
    }

    /// Number of transmissions lost to the drop filter.
    pub fn dropped(&self) -> usize {
        self.lock().history.iter().filter(|t| t.dropped).count()
    }

    /// `radio` is listening.
    pub fn is_receiving(&self, radio: RadioId) -> bool {
        self.lock().ports.get(radio).is_some_and(|p| p.receiving)
    }

    /// `radio` has been closed.
    pub fn is_closed(&self, radio: RadioId) -> bool {
        self.lock().ports.get(radio).is_some_and(|p| p.closed)
    }
}

/// A radio attached to a [`SimMedium`].
pub struct SimRadio {
    id: RadioId,
    medium: SimMedium,
}

impl SimRadio {
    /// Position of this radio on its medium.
    pub fn id(&self) -> RadioId {
        self.id
    }

    pub fn is_receiving(&self) -> bool {
        self.medium.is_receiving(self.id)
    }

    pub fn is_closed(&self) -> bool {
        self.medium.is_closed(self.id)
    }
}

impl Transceiver for SimRadio {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        let mut guard = self.medium.lock();
        let medium = &mut *guard;

        let port = &mut medium.ports[self.id];
        if port.closed {
            return Err(RadioError::Closed);
        }
        if let Some(error) = &port.fail_transmit {
            return Err(error.clone());
        }
        port.receiving = false;

        let dropped = match medium.drop_filter.as_mut() {
            Some(filter) => filter(self.id, frame),
            None => false,
        };
        medium.history.push(Transmission {
            from: self.id,
            frame: frame.to_vec(),
            dropped,
        });
        if dropped {
            trace!("sim: radio {} frame dropped ({} bytes)", self.id, frame.len());
            return Ok(());
        }

        let (rssi, snr) = (medium.rssi, medium.snr);
        for (id, port) in medium.ports.iter_mut().enumerate() {
            if id != self.id && port.receiving && !port.closed {
                port.inbox
                    .push_back(ReceivedPacket::new(frame.to_vec(), rssi, snr));
            }
        }
        Ok(())
    }

    fn enter_receive_mode(&mut self) -> Result<(), RadioError> {
        let mut medium = self.medium.lock();
        let port = &mut medium.ports[self.id];
        if port.closed {
            return Err(RadioError::Closed);
        }
        port.receiving = true;
        Ok(())
    }

    fn try_receive(&mut self) -> Option<ReceivedPacket> {
        self.medium.lock().ports[self.id].inbox.pop_front()
    }

    fn close(&mut self) {
        let mut medium = self.medium.lock();
        let port = &mut medium.ports[self.id];
        port.closed = true;
        port.receiving = false;
        port.inbox.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (SimMedium, SimRadio, SimRadio) {
        let medium = SimMedium::new();
        let a = medium.attach();
        let b = medium.attach();
        (medium, a, b)
    }

    #[test]
    fn test_frame_reaches_receiving_radio() {
        let (_, mut a, mut b) = pair();
        b.enter_receive_mode().unwrap();
        a.transmit(b"hello").unwrap();

        let packet = b.try_receive().unwrap();
        assert_eq!(packet.data, b"hello");
        assert_eq!(packet.rssi, SIM_RSSI);
        assert_eq!(packet.snr, SIM_SNR);
        assert!(b.try_receive().is_none());
        // The sender does not hear itself.
        assert!(a.try_receive().is_none());
    }

    #[test]
    fn test_radio_not_in_receive_misses_frame() {
        let (_, mut a, mut b) = pair();
        a.transmit(b"lost").unwrap();
        b.enter_receive_mode().unwrap();
        assert!(b.try_receive().is_none());
    }

    #[test]
    fn test_transmit_leaves_receive_mode() {
        let (_, mut a, mut b) = pair();
        a.enter_receive_mode().unwrap();
        a.transmit(b"x").unwrap();
        assert!(!a.is_receiving());

        b.enter_receive_mode().unwrap();
        b.transmit(b"reply").unwrap();
        assert!(a.try_receive().is_none());
    }

    #[test]
    fn test_drop_filter_and_history() {
        let (medium, mut a, mut b) = pair();
        b.enter_receive_mode().unwrap();
        let mut first = true;
        medium.set_drop_filter(move |_, _| std::mem::replace(&mut first, false));

        a.transmit(b"one").unwrap();
        a.transmit(b"two").unwrap();

        assert_eq!(b.try_receive().unwrap().data, b"two");
        assert_eq!(medium.dropped(), 1);
        let history = medium.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].dropped);
        assert_eq!(history[1].frame, b"two");
        assert_eq!(medium.transmissions_from(a.id()).len(), 2);
        assert!(medium.transmissions_from(b.id()).is_empty());
    }

    #[test]
    fn test_clear_drop_filter() {
        let (medium, mut a, mut b) = pair();
        b.enter_receive_mode().unwrap();
        medium.set_drop_filter(|_, _| true);
        a.transmit(b"lost").unwrap();
        assert!(b.try_receive().is_none());

        medium.clear_drop_filter();
        a.transmit(b"heard").unwrap();
        assert_eq!(b.try_receive().unwrap().data, b"heard");
        assert_eq!(medium.dropped(), 1);
    }

    #[test]
    fn test_forced_transmit_fault() {
        let (medium, mut a, _) = pair();
        medium.fail_transmit(a.id(), Some(RadioError::ChannelBusy));
        assert_eq!(a.transmit(b"x"), Err(RadioError::ChannelBusy));
        assert!(medium.history().is_empty());

        medium.fail_transmit(a.id(), None);
        assert!(a.transmit(b"x").is_ok());
    }

    #[test]
    fn test_closed_radio() {
        let (medium, mut a, mut b) = pair();
        b.enter_receive_mode().unwrap();
        b.close();
        assert!(b.is_closed());
        assert!(medium.is_closed(b.id()));
        assert!(!medium.is_closed(a.id()));
        assert!(!medium.is_receiving(b.id()));
        a.transmit(b"x").unwrap();
        assert!(b.try_receive().is_none());
        assert_eq!(b.enter_receive_mode(), Err(RadioError::Closed));
        assert_eq!(b.transmit(b"x"), Err(RadioError::Closed));
    }

    #[test]
    fn test_set_signal() {
        let (medium, mut a, mut b) = pair();
        medium.set_signal(-120.0, -5.0);
        b.enter_receive_mode().unwrap();
        a.transmit(b"weak").unwrap();
        let packet = b.try_receive().unwrap();
        assert_eq!(packet.rssi, -120.0);
        assert_eq!(packet.snr, -5.0);
    }
}
