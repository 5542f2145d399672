//! Reliable point-to-point delivery over a shared half-duplex radio.
//!
//! A [`Link`] owns one radio and runs a worker task that polls it for frames
//! and sends on behalf of any number of [`LinkHandle`]s:
//!
//! ```text
//!  LinkHandle ──mpsc──▶ worker task ──▶ Engine ──▶ Transceiver
//!      ▲                    │              │
//!      └──────oneshot───────┘              └──▶ DeliveryHandler
//! ```
//!
//! Only one reliable send is in flight per node. Addressed data frames are
//! acknowledged; repeats are recognised by `(source, message id)` and
//! acknowledged again without a second delivery. Broadcasts are delivered
//! but never acknowledged.

mod delivery;
mod engine;
mod handle;
mod scheduler;
mod seen;

pub use delivery::{Delivery, DeliveryHandler};
pub use engine::{Delivered, SendError};
pub use handle::{Link, LinkHandle};
pub use seen::{SeenKey, SeenResult, SeenSet};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BusyPolicy, LinkConfig};
    use crate::frame::{decode, BROADCAST_ADDRESS};
    use crate::radio::{RadioError, ReceivedPacket, Transceiver};
    use crate::sim::{SimMedium, SimRadio};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, Instant};

    const A: u16 = 1000;
    const B: u16 = 2000;
    const SILENT: u16 = 3000;
    const TIMEOUT: Duration = Duration::from_secs(1);

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn config(address: u16) -> LinkConfig {
        LinkConfig::new(address).with_initial_message_id(0)
    }

    /// Two nodes on one medium; B's deliveries arrive on the returned channel.
    fn two_nodes(
        medium: &SimMedium,
        a_config: LinkConfig,
    ) -> (Link<SimRadio>, Link<SimRadio>, mpsc::UnboundedReceiver<Delivery>) {
        let a = Link::spawn(medium.attach(), a_config, |_: Delivery| {}).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let b = Link::spawn(medium.attach(), config(B), tx).unwrap();
        (a, b, rx)
    }

    /// Fails the first `failures_left` calls to enter receive mode.
    struct SlowStartRadio {
        inner: SimRadio,
        failures_left: usize,
    }

    impl Transceiver for SlowStartRadio {
        fn transmit(&mut self, frame: &[u8]) -> Result<(), RadioError> {
            self.inner.transmit(frame)
        }

        fn enter_receive_mode(&mut self) -> Result<(), RadioError> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(RadioError::Hardware("rx calibration".into()));
            }
            self.inner.enter_receive_mode()
        }

        fn try_receive(&mut self) -> Option<ReceivedPacket> {
            self.inner.try_receive()
        }

        fn close(&mut self) {
            self.inner.close()
        }
    }

    fn acks_from(medium: &SimMedium, radio: usize) -> usize {
        medium
            .transmissions_from(radio)
            .iter()
            .filter(|raw| decode(raw).map(|f| f.is_ack()).unwrap_or(false))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_delivered_and_acked() {
        init_logging();
        let medium = SimMedium::new();
        let (a, b, mut rx) = two_nodes(&medium, config(A));

        let start = Instant::now();
        let delivered = a.send_reliable("ping", B, TIMEOUT, 3).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(1100));
        assert_eq!(delivered.attempts, 1);
        assert_eq!(delivered.message_id, 0);

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.payload, b"ping");
        assert_eq!(delivery.header_from, A);
        assert_eq!(delivery.header_to, B);

        assert_eq!(a.stats().snapshot().sends_delivered, 1);
        assert_eq!(b.stats().snapshot().acks_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_destination_fails_after_all_retries() {
        init_logging();
        let medium = SimMedium::new();
        let (a, _b, mut rx) = two_nodes(&medium, config(A));

        let start = Instant::now();
        let result = a.send_reliable("anyone?", SILENT, TIMEOUT, 3).await;
        let elapsed = start.elapsed();

        assert_eq!(result, Err(SendError::NoAck { attempts: 4 }));
        assert!(elapsed >= Duration::from_secs(4));
        assert!(elapsed < Duration::from_millis(4200));
        let sent = medium.transmissions_from(0);
        assert_eq!(sent.len(), 4);
        assert!(sent.windows(2).all(|w| w[0] == w[1]));
        // B heard all four but none were for it.
        assert!(rx.try_recv().is_err());
        assert_eq!(acks_from(&medium, 1), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_ack_causes_single_delivery() {
        init_logging();
        let medium = SimMedium::new();
        let (a, _b, mut rx) = two_nodes(&medium, config(A));

        let mut dropped_one = false;
        medium.set_drop_filter(move |from, frame| {
            let is_ack = decode(frame).map(|f| f.is_ack()).unwrap_or(false);
            if from == 1 && is_ack && !dropped_one {
                dropped_one = true;
                return true;
            }
            false
        });

        let delivered = a.send_reliable("ping", B, TIMEOUT, 3).await.unwrap();
        assert_eq!(delivered.attempts, 2);

        assert_eq!(rx.recv().await.unwrap().payload, b"ping");
        sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        // Original ACK (lost) plus the re-ACK of the duplicate.
        assert_eq!(acks_from(&medium, 1), 2);
        assert_eq!(medium.dropped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_is_not_acked() {
        init_logging();
        let medium = SimMedium::new();
        let (a, _b, mut rx) = two_nodes(&medium, config(A));

        let delivered = a
            .send_reliable("hello all", BROADCAST_ADDRESS, TIMEOUT, 3)
            .await
            .unwrap();
        assert_eq!(delivered.attempts, 1);
        assert_eq!(delivered.ack_rssi, None);

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.header_to, BROADCAST_ADDRESS);
        sleep(Duration::from_secs(2)).await;
        assert!(medium.transmissions_from(1).is_empty());
        assert_eq!(medium.transmissions_from(0).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreliable_send() {
        init_logging();
        let medium = SimMedium::new();
        let (a, _b, mut rx) = two_nodes(&medium, config(A));

        let id = a.send_unreliable("fire", B).await.unwrap();
        assert_eq!(id, 0);
        assert_eq!(rx.recv().await.unwrap().payload, b"fire");
        assert_eq!(medium.transmissions_from(0).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_fault_reports_radio_unavailable() {
        init_logging();
        let medium = SimMedium::new();
        let (a, _b, _rx) = two_nodes(&medium, config(A));
        medium.fail_transmit(0, Some(RadioError::Hardware("pa fault".into())));

        let result = a.send_reliable("ping", B, TIMEOUT, 1).await;
        assert_eq!(
            result,
            Err(SendError::RadioUnavailable(RadioError::Hardware(
                "pa fault".into()
            )))
        );
        assert_eq!(a.stats().snapshot().sends_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_sends_run_in_order() {
        init_logging();
        let medium = SimMedium::new();
        let (a, _b, mut rx) = two_nodes(&medium, config(A));

        let handle = a.handle();
        let first = tokio::spawn(async move { handle.send("one", B).await });
        sleep(Duration::from_millis(10)).await;
        let second = a.send("two", B).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first.message_id, 0);
        assert_eq!(second.message_id, 1);
        assert_eq!(rx.recv().await.unwrap().payload, b"one");
        assert_eq!(rx.recv().await.unwrap().payload, b"two");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_rejects_while_busy() {
        init_logging();
        let medium = SimMedium::new();
        let (a, _b, _rx) =
            two_nodes(&medium, config(A).with_busy_policy(BusyPolicy::FailFast));

        let handle = a.handle();
        let first = tokio::spawn(async move { handle.send_reliable("one", SILENT, TIMEOUT, 0).await });
        sleep(Duration::from_millis(10)).await;

        assert_eq!(a.send("two", B).await, Err(SendError::Busy));
        assert_eq!(
            first.await.unwrap(),
            Err(SendError::NoAck { attempts: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_returns_radio_and_fails_queued_sends() {
        init_logging();
        let medium = SimMedium::new();
        let (a, _b, _rx) = two_nodes(&medium, config(A));

        let h1 = a.handle();
        let h2 = a.handle();
        let in_flight =
            tokio::spawn(async move { h1.send_reliable("one", SILENT, Duration::from_secs(10), 3).await });
        sleep(Duration::from_millis(10)).await;
        let queued = tokio::spawn(async move { h2.send("two", SILENT).await });
        sleep(Duration::from_millis(10)).await;

        let radio = a.shutdown().await.unwrap();
        assert_eq!(radio.id(), 0);
        assert!(!radio.is_closed());
        assert_eq!(in_flight.await.unwrap(), Err(SendError::Shutdown));
        assert_eq!(queued.await.unwrap(), Err(SendError::Shutdown));
        assert_eq!(medium.transmissions_from(0).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_link_stops_worker() {
        init_logging();
        let medium = SimMedium::new();
        let (a, _b, _rx) = two_nodes(&medium, config(A));
        let handle = a.handle();
        drop(a);

        assert_eq!(handle.send("late", B).await, Err(SendError::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_mode_recovers_after_backoff() {
        init_logging();
        let medium = SimMedium::new();
        let a = Link::spawn(medium.attach(), config(A), |_: Delivery| {}).unwrap();
        let radio = SlowStartRadio {
            inner: medium.attach(),
            failures_left: 3,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let b = Link::spawn(radio, config(B), tx).unwrap();

        // One failure in spawn, two more on worker polls a backoff apart.
        sleep(Duration::from_secs(5)).await;
        assert!(medium.is_receiving(1));

        let delivered = a.send_reliable("ping", B, TIMEOUT, 0).await.unwrap();
        assert_eq!(delivered.attempts, 1);
        assert_eq!(rx.recv().await.unwrap().payload, b"ping");

        let stats = b.stats().snapshot();
        assert_eq!(stats.radio_errors, 3);
        assert_eq!(stats.acks_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_closes_radio() {
        init_logging();
        let medium = SimMedium::new();
        let (a, b, mut rx) = two_nodes(&medium, config(A));

        b.close().await.unwrap();
        assert!(medium.is_closed(1));
        assert!(!medium.is_closed(0));

        let result = a.send_reliable("x", B, TIMEOUT, 0).await;
        assert_eq!(result, Err(SendError::NoAck { attempts: 1 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_rejected() {
        let medium = SimMedium::new();
        let result = Link::spawn(
            medium.attach(),
            LinkConfig::new(BROADCAST_ADDRESS),
            |_: Delivery| {},
        );
        assert!(result.is_err());
    }
}
