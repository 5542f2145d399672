//! Public link API.

use super::delivery::DeliveryHandler;
use super::engine::{Delivered, Engine, SendError};
use super::scheduler::{self, Command};
use crate::config::{ConfigError, LinkConfig};
use crate::frame::{Address, MessageId};
use crate::radio::Transceiver;
use crate::stats::LinkStats;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Cloneable sender side of a running link.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    commands: mpsc::Sender<Command>,
    address: Address,
    ack_timeout: Duration,
    max_retries: u32,
    stats: Arc<LinkStats>,
}

impl LinkHandle {
    /// Send `payload` and wait for the destination's ACK.
    ///
    /// Retransmits up to `max_retries` times, waiting `timeout` after each
    /// transmission. Broadcasts return as soon as they are on air.
    pub async fn send_reliable(
        &self,
        payload: impl Into<Vec<u8>>,
        destination: Address,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Delivered, SendError> {
        let (reply, response) = oneshot::channel();
        self.submit(Command::SendReliable {
            payload: payload.into(),
            destination,
            timeout,
            max_retries,
            reply,
        })
        .await?;
        response.await.map_err(|_| SendError::Shutdown)?
    }

    /// [`send_reliable`](Self::send_reliable) with the configured timeout
    /// and retry budget.
    pub async fn send(
        &self,
        payload: impl Into<Vec<u8>>,
        destination: Address,
    ) -> Result<Delivered, SendError> {
        self.send_reliable(payload, destination, self.ack_timeout, self.max_retries)
            .await
    }

    /// Transmit once without waiting for an ACK.
    pub async fn send_unreliable(
        &self,
        payload: impl Into<Vec<u8>>,
        destination: Address,
    ) -> Result<MessageId, SendError> {
        let (reply, response) = oneshot::channel();
        self.submit(Command::SendUnreliable {
            payload: payload.into(),
            destination,
            reply,
        })
        .await?;
        response.await.map_err(|_| SendError::Shutdown)?
    }

    async fn submit(&self, command: Command) -> Result<(), SendError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SendError::Shutdown)
    }

    /// Address of the node this handle sends from.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Counters shared with the worker.
    pub fn stats(&self) -> Arc<LinkStats> {
        self.stats.clone()
    }
}

/// A running link: the worker task plus a handle to it.
///
/// Dropping the `Link` stops the worker. Use [`shutdown`](Self::shutdown) to
/// get the radio back.
pub struct Link<R> {
    handle: LinkHandle,
    guard: DropGuard,
    task: JoinHandle<R>,
}

impl<R: Transceiver + 'static> Link<R> {
    /// Validate `config` and start the worker on the current tokio runtime.
    ///
    /// `handler` receives every new data frame addressed to this node or to
    /// broadcast.
    pub fn spawn<H>(radio: R, config: LinkConfig, handler: H) -> Result<Self, ConfigError>
    where
        H: DeliveryHandler + 'static,
    {
        config.validate()?;

        let stats = Arc::new(LinkStats::new(config.node_address));
        let (commands, receiver) = mpsc::channel(config.command_queue);
        let handle = LinkHandle {
            commands,
            address: config.node_address,
            ack_timeout: config.ack_timeout,
            max_retries: config.max_retries,
            stats: stats.clone(),
        };

        info!(
            "Starting link for node {} (timeout {:?}, {} retries)",
            config.node_address, config.ack_timeout, config.max_retries
        );
        let mut engine = Engine::new(radio, config, Box::new(handler), stats);
        // Listen before returning so frames sent right after spawn are heard.
        if let Err(e) = engine.enter_receive_mode() {
            warn!("Initial receive mode failed: {}", e);
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler::run(engine, receiver, cancel.clone()));

        Ok(Self {
            handle,
            guard: cancel.drop_guard(),
            task,
        })
    }
}

impl<R: Transceiver> Link<R> {
    /// A new handle for sending from other tasks.
    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    /// Address of this node.
    pub fn address(&self) -> Address {
        self.handle.address
    }

    /// Counters for this node.
    pub fn stats(&self) -> Arc<LinkStats> {
        self.handle.stats()
    }

    /// See [`LinkHandle::send_reliable`].
    pub async fn send_reliable(
        &self,
        payload: impl Into<Vec<u8>>,
        destination: Address,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Delivered, SendError> {
        self.handle
            .send_reliable(payload, destination, timeout, max_retries)
            .await
    }

    /// See [`LinkHandle::send`].
    pub async fn send(
        &self,
        payload: impl Into<Vec<u8>>,
        destination: Address,
    ) -> Result<Delivered, SendError> {
        self.handle.send(payload, destination).await
    }

    /// See [`LinkHandle::send_unreliable`].
    pub async fn send_unreliable(
        &self,
        payload: impl Into<Vec<u8>>,
        destination: Address,
    ) -> Result<MessageId, SendError> {
        self.handle.send_unreliable(payload, destination).await
    }

    /// Stop the worker and return the radio.
    ///
    /// The in-flight send and any queued sends fail with
    /// [`SendError::Shutdown`].
    pub async fn shutdown(self) -> Result<R, JoinError> {
        let Link { guard, task, .. } = self;
        drop(guard);
        task.await
    }

    /// Stop the worker and close the radio.
    pub async fn close(self) -> Result<(), JoinError> {
        let mut radio = self.shutdown().await?;
        radio.close();
        Ok(())
    }
}
