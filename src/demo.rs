//! Shared setup for the `ping-client` and `ping-server` binaries.
//!
//! Both run over [`UdpRadio`](crate::sim::UdpRadio) on loopback by default:
//! the client at 1000 on port 47001, the server at 2000 on port 47002.

use crate::config::{ConfigError, LinkConfig};
use crate::frame::Address;
use crate::stats::{LinkStats, StatsServer};
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

pub const CLIENT_ADDRESS: Address = 1000;
pub const SERVER_ADDRESS: Address = 2000;

pub const CLIENT_UDP: &str = "127.0.0.1:47001";
pub const SERVER_UDP: &str = "127.0.0.1:47002";

/// Settings for one demo node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOptions {
    pub config: LinkConfig,
    pub bind: SocketAddr,
    pub peers: Vec<SocketAddr>,
    /// Serve `/stats` on this port when set.
    pub stats_port: Option<u16>,
}

impl NodeOptions {
    /// Defaults for a node at `address` bound to `bind`, hearing `peer`.
    pub fn new(address: Address, bind: &str, peer: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            config: LinkConfig::new(address),
            bind: parse_addr(bind)?,
            peers: vec![parse_addr(peer)?],
            stats_port: None,
        })
    }
}

fn parse_addr(s: &str) -> Result<SocketAddr, ConfigError> {
    s.parse()
        .map_err(|e| ConfigError::Parse(format!("invalid socket address '{}': {}", s, e)))
}

fn value<'a>(
    flag: &str,
    iter: &mut impl Iterator<Item = &'a String>,
) -> Result<&'a String, ConfigError> {
    iter.next()
        .ok_or_else(|| ConfigError::Parse(format!("{} needs a value", flag)))
}

/// Print usage for a demo binary.
pub fn print_usage(program: &str) {
    println!("Usage:");
    println!("  {} [OPTIONS]", program);
    println!();
    println!("Options:");
    println!("  --config FILE      Load link settings from a JSON file");
    println!("  --address N        Node address (overrides the config file)");
    println!("  --bind ADDR        Local UDP socket emulating the radio");
    println!("  --peer ADDR        Other node's UDP socket (repeatable)");
    println!("  --stats-port PORT  Serve statistics at http://localhost:PORT/stats");
    println!("  --help             Show this help");
}

/// Apply command-line overrides to `defaults`.
///
/// `args` excludes the program name. Returns `None` when `--help` was given.
pub fn parse_args(
    args: &[String],
    mut defaults: NodeOptions,
) -> Result<Option<NodeOptions>, ConfigError> {
    let mut address = None;
    let mut peers = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                defaults.config = LinkConfig::from_file(value(arg, &mut iter)?)?;
            }
            "--address" | "-a" => {
                let raw = value(arg, &mut iter)?;
                address = Some(raw.parse::<Address>().map_err(|e| {
                    ConfigError::Parse(format!("invalid address '{}': {}", raw, e))
                })?);
            }
            "--bind" => defaults.bind = parse_addr(value(arg, &mut iter)?)?,
            "--peer" => peers.push(parse_addr(value(arg, &mut iter)?)?),
            "--stats-port" => {
                let raw = value(arg, &mut iter)?;
                defaults.stats_port = Some(raw.parse().map_err(|e| {
                    ConfigError::Parse(format!("invalid port '{}': {}", raw, e))
                })?);
            }
            "--help" | "-h" => return Ok(None),
            other => return Err(ConfigError::Parse(format!("unknown argument '{}'", other))),
        }
    }

    // The command line wins over the config file.
    if let Some(address) = address {
        defaults.config.node_address = address;
    }
    if !peers.is_empty() {
        defaults.peers = peers;
    }
    defaults.config.validate()?;
    Ok(Some(defaults))
}

/// Start the stats server if a port was requested. Failure is not fatal.
pub fn start_stats(port: Option<u16>, stats: Arc<LinkStats>) -> Option<StatsServer> {
    let port = port?;
    match StatsServer::start(SocketAddr::from(([0, 0, 0, 0], port)), stats) {
        Ok(server) => {
            info!("Stats server running at http://{}/stats", server.local_addr());
            Some(server)
        }
        Err(e) => {
            warn!("Failed to start stats server: {}", e);
            warn!("Continuing without stats server");
            None
        }
    }
}

/// Payload the client sends for message number `n`.
pub fn ping_message(n: u64) -> String {
    format!("Hello, LoRa Gateway! | Message Number: {}", n)
}
