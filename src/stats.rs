//! Link statistics and the HTTP stats endpoint.
//!
//! [`LinkStats`] is shared between the link worker and whoever wants to look
//! at it. All counters are atomics so reads never block the worker.
//!
//! [`StatsServer`] serves a JSON snapshot at `/stats` using `tiny_http`:
//!
//! ```json
//! {
//!   "uptime_secs": 3600,
//!   "node_address": 2000,
//!   "frames_tx": 150,
//!   "frames_rx": 230,
//!   "retransmissions": 4,
//!   "acks_sent": 120,
//!   "acks_received": 37,
//!   "delivered": 118,
//!   "duplicates": 2,
//!   "decode_errors": 0,
//!   "foreign_frames": 12,
//!   "sends_delivered": 37,
//!   "sends_failed": 1,
//!   "radio_errors": 0
//! }
//! ```

use crate::frame::Address;
use log::{error, info, warn};
use serde::Serialize;
use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tiny_http::{Header, Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Counters updated by the link worker.
#[derive(Debug)]
pub struct LinkStats {
    start_time: Instant,
    node_address: Address,
    /// Frames put on air (data, retransmissions and ACKs).
    pub frames_tx: AtomicU64,
    /// Frames decoded from the radio, whatever their destination.
    pub frames_rx: AtomicU64,
    pub retransmissions: AtomicU64,
    pub acks_sent: AtomicU64,
    /// ACKs that resolved a pending send.
    pub acks_received: AtomicU64,
    /// Payloads handed to the application.
    pub delivered: AtomicU64,
    /// Repeats suppressed by the seen set.
    pub duplicates: AtomicU64,
    pub decode_errors: AtomicU64,
    /// Frames addressed to other nodes.
    pub foreign_frames: AtomicU64,
    pub sends_delivered: AtomicU64,
    pub sends_failed: AtomicU64,
    /// Transmit or mode-switch failures reported by the radio.
    pub radio_errors: AtomicU64,
}

impl LinkStats {
    /// Zeroed counters for `node_address`.
    pub fn new(node_address: Address) -> Self {
        Self {
            start_time: Instant::now(),
            node_address,
            frames_tx: AtomicU64::new(0),
            frames_rx: AtomicU64::new(0),
            retransmissions: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            foreign_frames: AtomicU64::new(0),
            sends_delivered: AtomicU64::new(0),
            sends_failed: AtomicU64::new(0),
            radio_errors: AtomicU64::new(0),
        }
    }

    /// Bump a counter by one.
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Seconds since the counters were created.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            uptime_secs: self.uptime_secs(),
            node_address: self.node_address,
            frames_tx: load(&self.frames_tx),
            frames_rx: load(&self.frames_rx),
            retransmissions: load(&self.retransmissions),
            acks_sent: load(&self.acks_sent),
            acks_received: load(&self.acks_received),
            delivered: load(&self.delivered),
            duplicates: load(&self.duplicates),
            decode_errors: load(&self.decode_errors),
            foreign_frames: load(&self.foreign_frames),
            sends_delivered: load(&self.sends_delivered),
            sends_failed: load(&self.sends_failed),
            radio_errors: load(&self.radio_errors),
        }
    }

    /// Serialize a snapshot to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Plain copy of [`LinkStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub node_address: Address,
    pub frames_tx: u64,
    pub frames_rx: u64,
    pub retransmissions: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub decode_errors: u64,
    pub foreign_frames: u64,
    pub sends_delivered: u64,
    pub sends_failed: u64,
    pub radio_errors: u64,
}

/// HTTP stats server.
///
/// Runs in a background thread and answers `GET /stats` with a JSON snapshot.
pub struct StatsServer {
    server: Arc<Server>,
    local_addr: SocketAddr,
    handle: Option<thread::JoinHandle<()>>,
}

impl StatsServer {
    /// Bind `addr` and start serving. Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr). Drop the returned value to stop.
    pub fn start(addr: SocketAddr, stats: Arc<LinkStats>) -> Result<Self, io::Error> {
        let server = Server::http(addr)
            .map_err(|e| io::Error::new(io::ErrorKind::AddrInUse, e.to_string()))?;
        let local_addr = server.server_addr().to_ip().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "stats server not bound to TCP")
        })?;
        let server = Arc::new(server);

        info!(
            "Stats server for node {} listening on http://{}/stats",
            stats.node_address, local_addr
        );

        let worker = server.clone();
        let handle = thread::spawn(move || Self::serve(&worker, &stats));

        Ok(Self {
            server,
            local_addr,
            handle: Some(handle),
        })
    }

    /// Address the server actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn serve(server: &Server, stats: &LinkStats) {
        for request in server.incoming_requests() {
            let response = route(request.method(), request.url(), stats);
            if let Err(e) = request.respond(response) {
                warn!("Failed to send stats response: {}", e);
            }
        }
        info!("Stats server stopped");
    }

    /// Stop accepting requests and wait for the server thread.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.server.unblock();
            if handle.join().is_err() {
                error!("Stats server thread panicked");
            }
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn route(method: &Method, url: &str, stats: &LinkStats) -> Response<Cursor<Vec<u8>>> {
    if method != &Method::Get {
        let allow = Header::from_bytes(&b"Allow"[..], &b"GET"[..]).expect("static header");
        return Response::from_string("Method Not Allowed")
            .with_status_code(405)
            .with_header(allow);
    }
    match url {
        "/stats" | "/stats/" => {
            let content_type = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .expect("static header");
            Response::from_string(stats.to_json()).with_header(content_type)
        }
        _ => Response::from_string("Not Found").with_status_code(404),
    }
}
