//! Ping client: sends a numbered greeting to the server every second.
//!
//! Each message waits up to 1 s for the ACK and is retried 3 times. The
//! message number only advances once a message is acknowledged.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ping-server &
//! cargo run --bin ping-client -- --stats-port 8080
//! ```

use log::{error, info, warn};
use lora_link::demo::{self, NodeOptions, CLIENT_ADDRESS, CLIENT_UDP, SERVER_ADDRESS, SERVER_UDP};
use lora_link::{Delivery, Link, SendError, UdpRadio};
use std::process::exit;
use std::time::Duration;

const ACK_TIMEOUT: Duration = Duration::from_secs(1);
const SEND_RETRIES: u32 = 3;
const SEND_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let defaults = match NodeOptions::new(CLIENT_ADDRESS, CLIENT_UDP, SERVER_UDP) {
        Ok(options) => options,
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };
    let options = match demo::parse_args(&args[1..], defaults) {
        Ok(Some(options)) => options,
        Ok(None) => {
            demo::print_usage(&args[0]);
            return;
        }
        Err(e) => {
            error!("{}", e);
            exit(2);
        }
    };

    info!("=== Ping client {} starting ===", options.config.node_address);

    let radio = match UdpRadio::bind(options.bind, options.peers.clone()) {
        Ok(radio) => radio,
        Err(e) => {
            error!("Failed to open radio on {}: {}", options.bind, e);
            exit(1);
        }
    };

    let on_recv = |delivery: Delivery| {
        info!(
            "Received from {}: {}",
            delivery.header_from,
            String::from_utf8_lossy(&delivery.payload)
        );
    };
    let link = match Link::spawn(radio, options.config, on_recv) {
        Ok(link) => link,
        Err(e) => {
            error!("Invalid link configuration: {}", e);
            exit(1);
        }
    };

    let _stats_server = demo::start_stats(options.stats_port, link.stats());

    let mut msg_counter: u64 = 0;
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

    info!("Entering main loop (Ctrl+C to exit)...");
    loop {
        let message = demo::ping_message(msg_counter);
        info!("Sending message {}", msg_counter);

        tokio::select! {
            _ = &mut ctrl_c => break,
            result = link.send_reliable(message, SERVER_ADDRESS, ACK_TIMEOUT, SEND_RETRIES) => {
                match result {
                    Ok(delivered) => {
                        info!(
                            "Message {} sent successfully and ACK received ({} attempt(s))",
                            msg_counter, delivered.attempts
                        );
                        msg_counter += 1;
                    }
                    Err(SendError::NoAck { attempts }) => {
                        warn!("Message {} failed after {} attempts", msg_counter, attempts);
                    }
                    Err(e) => error!("Error sending message {}: {}", msg_counter, e),
                }
            }
        }

        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = tokio::time::sleep(SEND_INTERVAL) => {}
        }
    }

    info!("Shutting down");
    if let Err(e) = link.close().await {
        error!("Link worker failed: {}", e);
    }
}
