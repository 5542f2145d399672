//! Application-facing delivery types.

use crate::frame::{Address, MessageId};
use log::debug;
use tokio::sync::mpsc;

/// A data frame handed to the application.
///
/// Produced once per new `(source, id)` pair addressed to this node or to
/// broadcast; duplicates never produce a second `Delivery`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub payload: Vec<u8>,
    pub header_from: Address,
    pub header_to: Address,
    pub header_id: MessageId,
    pub header_flags: u8,
    /// RSSI in dBm.
    pub rssi: f32,
    /// SNR in dB.
    pub snr: f32,
}

impl Delivery {
    /// Payload as UTF-8, if it is valid text.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Consumer of delivered payloads.
///
/// Called on the link worker task; implementations should return quickly
/// and hand heavy work to another task. Closures and unbounded channel
/// senders implement it directly.
pub trait DeliveryHandler: Send {
    fn deliver(&mut self, delivery: Delivery);
}

impl<F> DeliveryHandler for F
where
    F: FnMut(Delivery) + Send,
{
    fn deliver(&mut self, delivery: Delivery) {
        self(delivery)
    }
}

impl DeliveryHandler for mpsc::UnboundedSender<Delivery> {
    fn deliver(&mut self, delivery: Delivery) {
        if self.send(delivery).is_err() {
            debug!("Delivery receiver dropped, discarding payload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Delivery {
        Delivery {
            payload: b"ping".to_vec(),
            header_from: 1000,
            header_to: 2000,
            header_id: 1,
            header_flags: 0,
            rssi: -42.0,
            snr: 9.5,
        }
    }

    #[test]
    fn test_text() {
        assert_eq!(sample().text(), Some("ping"));
        let mut binary = sample();
        binary.payload = vec![0xFF, 0xFE];
        assert_eq!(binary.text(), None);
    }

    #[test]
    fn test_closure_handler() {
        let mut count = 0;
        {
            let mut handler = |d: Delivery| {
                assert_eq!(d.header_from, 1000);
                count += 1;
            };
            handler.deliver(sample());
            handler.deliver(sample());
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_channel_handler() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = tx;
        handler.deliver(sample());
        assert_eq!(rx.try_recv().unwrap().payload, b"ping");

        drop(rx);
        // Receiver gone: delivery is dropped without panicking.
        handler.deliver(sample());
    }
}
