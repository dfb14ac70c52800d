//! UDP telemetry listener
//!
//! Radar units fire datagrams at a single port with no acknowledgement
//! protocol. The listener decodes each datagram inline (decoding is pure
//! and cheap) and forwards the result to the ingest task; a malformed
//! datagram is forwarded as unknown, never an error. Socket-level read
//! failures are feed-fatal: the loop closes the socket, waits, and
//! rebinds, matching the reopen behavior of the rest of the receivers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, trace, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;

use velora_core::protocol::{decode, DecodeContext};

use crate::error::ServerError;
use crate::ingest::IngestMsg;

/// Largest datagram any supported format produces, with headroom
const MAX_DATAGRAM: usize = 2048;

/// Delay before rebinding after a socket-level failure
const REBIND_DELAY: Duration = Duration::from_millis(1000);

/// Bind the telemetry socket.
///
/// Done with socket2 so the listener can set address reuse before the
/// bind, and done eagerly at startup so the orchestrator can guarantee
/// the socket exists before the image feed starts.
pub fn bind(addr: SocketAddr) -> Result<std::net::UdpSocket, ServerError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&socket2::SockAddr::from(addr))?;
    debug!("telemetry socket bound to {}", addr);
    Ok(socket.into())
}

pub struct UdpListener {
    addr: SocketAddr,
    socket: Option<std::net::UdpSocket>,
    ingest_tx: mpsc::Sender<IngestMsg>,
    default_limit: u16,
    alive: Arc<AtomicBool>,
}

impl UdpListener {
    pub fn new(
        addr: SocketAddr,
        socket: std::net::UdpSocket,
        ingest_tx: mpsc::Sender<IngestMsg>,
        default_limit: u16,
        alive: Arc<AtomicBool>,
    ) -> Self {
        UdpListener {
            addr,
            socket: Some(socket),
            ingest_tx,
            default_limit,
            alive,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), ServerError> {
        loop {
            match self.socket.take() {
                Some(socket) => {
                    let socket = UdpSocket::from_std(socket)?;
                    self.alive.store(true, Ordering::Relaxed);
                    match self.socket_loop(socket, &subsys).await {
                        Err(ServerError::Shutdown) => {
                            self.alive.store(false, Ordering::Relaxed);
                            return Ok(());
                        }
                        Err(e) => {
                            self.alive.store(false, Ordering::Relaxed);
                            warn!("telemetry socket failed, rebinding: {}", e);
                        }
                        Ok(()) => return Ok(()),
                    }
                }
                None => {
                    tokio::select! {
                        _ = subsys.on_shutdown_requested() => return Ok(()),
                        _ = sleep(REBIND_DELAY) => {}
                    }
                    match bind(self.addr) {
                        Ok(socket) => self.socket = Some(socket),
                        Err(e) => debug!("rebind to {} failed: {}", self.addr, e),
                    }
                }
            }
        }
    }

    async fn socket_loop(
        &mut self,
        socket: UdpSocket,
        subsys: &SubsystemHandle,
    ) -> Result<(), ServerError> {
        let mut buf = [0u8; MAX_DATAGRAM];
        trace!("telemetry loop listening on {}", self.addr);

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    return Err(ServerError::Shutdown);
                },
                r = socket.recv_from(&mut buf) => {
                    match r {
                        Ok((len, peer)) => {
                            trace!("{} byte datagram from {}", len, peer);
                            let ctx = DecodeContext {
                                now: Utc::now(),
                                default_limit: self.default_limit,
                            };
                            let decoded = decode(&buf[..len], &ctx);
                            if self.ingest_tx.send(IngestMsg::Datagram(decoded)).await.is_err() {
                                // Ingest task is gone; only happens at shutdown
                                return Err(ServerError::Shutdown);
                            }
                        }
                        Err(e) => {
                            return Err(ServerError::Io(e));
                        }
                    }
                },
            }
        }
    }
}
