//! Ping server: prints every message it receives.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ping-server -- --stats-port 8081
//! ```

use log::{error, info};
use lora_link::demo::{self, NodeOptions, CLIENT_UDP, SERVER_ADDRESS, SERVER_UDP};
use lora_link::{Delivery, Link, UdpRadio};
use std::process::exit;
use tokio::sync::mpsc;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let defaults = match NodeOptions::new(SERVER_ADDRESS, SERVER_UDP, CLIENT_UDP) {
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

    info!("=== Ping server {} starting ===", options.config.node_address);

    let radio = match UdpRadio::bind(options.bind, options.peers.clone()) {
        Ok(radio) => radio,
        Err(e) => {
            error!("Failed to open radio on {}: {}", options.bind, e);
            exit(1);
        }
    };

    let (deliveries, mut inbox) = mpsc::unbounded_channel::<Delivery>();
    let link = match Link::spawn(radio, options.config, deliveries) {
        Ok(link) => link,
        Err(e) => {
            error!("Invalid link configuration: {}", e);
            exit(1);
        }
    };

    let _stats_server = demo::start_stats(options.stats_port, link.stats());

    info!("Waiting for incoming messages...");
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            delivery = inbox.recv() => {
                let Some(delivery) = delivery else { break };
                println!("========================================================");
                println!("Received message: {}", String::from_utf8_lossy(&delivery.payload));
                println!(
                    "From: {}, To: {}, ID: {}, Flags: {:#04x}",
                    delivery.header_from, delivery.header_to, delivery.header_id, delivery.header_flags
                );
                println!("RSSI: {}; SNR: {}", delivery.rssi, delivery.snr);
            }
        }
    }

    info!("Shutting down");
    if let Err(e) = link.close().await {
        error!("Link worker failed: {}", e);
    }
}
