//! Link worker loop.
//!
//! One task per node owns the [`Engine`] and therefore the radio. Each pass:
//!
//! 1. expire the pending ACK deadline (retransmit or fail),
//! 2. take one send command if the engine can accept it (TX has priority),
//! 3. poll the radio and process any frame,
//! 4. sleep until the next poll, the ACK deadline, a new command or
//!    cancellation, whichever comes first.
//!
//! Transmit and receive both happen on this task, so the radio is never asked
//! to transmit while a receive poll is in progress.

use super::engine::{DeliveredReply, Engine, PollOutcome, SendError};
use crate::config::BusyPolicy;
use crate::frame::{Address, MessageId};
use crate::radio::Transceiver;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Request sent from a [`LinkHandle`](super::LinkHandle) to the worker.
#[derive(Debug)]
pub(crate) enum Command {
    SendReliable {
        payload: Vec<u8>,
        destination: Address,
        timeout: Duration,
        max_retries: u32,
        reply: DeliveredReply,
    },
    SendUnreliable {
        payload: Vec<u8>,
        destination: Address,
        reply: oneshot::Sender<Result<MessageId, SendError>>,
    },
}

impl Command {
    /// Answer the command with `error` without executing it.
    fn fail(self, error: SendError) {
        match self {
            Command::SendReliable { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::SendUnreliable { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

fn dispatch<R: Transceiver>(engine: &mut Engine<R>, command: Command) {
    match command {
        Command::SendReliable {
            payload,
            destination,
            timeout,
            max_retries,
            reply,
        } => engine.begin_reliable(
            payload,
            destination,
            timeout,
            max_retries,
            reply,
            Instant::now(),
        ),
        Command::SendUnreliable {
            payload,
            destination,
            reply,
        } => {
            let _ = reply.send(engine.send_unreliable(&payload, destination));
        }
    }
}

/// Run the worker until `cancel` fires. Returns the radio.
pub(crate) async fn run<R: Transceiver>(
    mut engine: Engine<R>,
    mut commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
) -> R {
    let poll_interval = engine.config().poll_interval;
    let error_backoff = engine.config().error_backoff;
    let fail_fast = engine.config().busy_policy == BusyPolicy::FailFast;
    let mut commands_open = true;

    info!("Link worker started for node {}", engine.address());

    loop {
        if cancel.is_cancelled() {
            break;
        }

        engine.check_timeout(Instant::now());

        // Priority 1: TX
        let accepting = commands_open && (fail_fast || !engine.is_busy());
        if accepting {
            match commands.try_recv() {
                Ok(command) => {
                    dispatch(&mut engine, command);
                    continue;
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!("All link handles dropped");
                    commands_open = false;
                }
            }
        }

        // Priority 2: RX
        match engine.poll_radio() {
            PollOutcome::Received => {
                tokio::task::yield_now().await;
                continue;
            }
            PollOutcome::Idle => {}
            PollOutcome::RadioError => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = sleep(error_backoff) => {}
                }
                continue;
            }
        }

        let mut wake = Instant::now() + poll_interval;
        if let Some(deadline) = engine.deadline() {
            wake = wake.min(deadline);
        }

        let accepting = commands_open && (fail_fast || !engine.is_busy());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = commands.recv(), if accepting => match command {
                Some(command) => dispatch(&mut engine, command),
                None => commands_open = false,
            },
            _ = sleep_until(wake) => {}
        }
    }

    engine.abort_pending(SendError::Shutdown);
    commands.close();
    let mut dropped = 0;
    while let Ok(command) = commands.try_recv() {
        command.fail(SendError::Shutdown);
        dropped += 1;
    }
    if dropped > 0 {
        debug!("Failed {} queued send(s) on shutdown", dropped);
    }
    info!("Link worker for node {} stopped", engine.address());
    engine.into_radio()
}
