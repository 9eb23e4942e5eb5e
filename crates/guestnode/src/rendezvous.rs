// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Loopback rendezvous server.
//!
//! When no coordinator address is known up front, every worker connects to
//! a loopback port and reports the address it can be reached at. The wire
//! format is plain text:
//!
//! ```text
//! worker → server:  <address> [whitespace] EOF
//! ```
//!
//! The server reads fixed-size chunks. A chunk containing `EOF` ends the
//! message of that connection, an empty chunk (or a closed peer) ends the
//! connection, anything else is kept as a reported address. Both `accept`
//! and each read run under their own bounded retry; running out of attempts
//! abandons that slot or connection and the server simply returns what it
//! has collected so far.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use crate::retry::{RetryOutcome, retry};

/// Marker ending a worker's message.
pub const END_OF_MESSAGE: &str = "EOF";

/// Addresses reported by workers, in arrival order.
pub type RendezvousResult = Vec<String>;

/// Rendezvous timeouts and circuit breakers.
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// Upper bound of a single `accept`.
    pub accept_timeout: Duration,
    /// Upper bound of a single read.
    pub recv_timeout: Duration,
    /// Failed accepts tolerated per slot.
    pub accept_max_attempts: u32,
    /// Failed reads tolerated per connection.
    pub recv_max_attempts: u32,
    /// Read buffer size in bytes.
    pub buffer_size: usize,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            accept_timeout: Duration::from_secs(60),
            recv_timeout: Duration::from_secs(30),
            accept_max_attempts: 5,
            recv_max_attempts: 5,
            buffer_size: 1024,
        }
    }
}

/// Classification of one decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// An address fragment to keep.
    Data(String),
    /// The end marker, with whatever text preceded it.
    End(Option<String>),
    /// Nothing but whitespace.
    Empty,
}

/// Decode and classify a raw chunk.
pub fn classify_chunk(raw: &[u8]) -> Chunk {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();

    if let Some(pos) = text.find(END_OF_MESSAGE) {
        let before = text[..pos].trim();
        return Chunk::End((!before.is_empty()).then(|| before.to_string()));
    }
    if text.is_empty() {
        return Chunk::Empty;
    }
    Chunk::Data(text.to_string())
}

/// Loopback listener collecting worker callback addresses.
#[derive(Debug)]
pub struct RendezvousServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: RendezvousConfig,
}

impl RendezvousServer {
    /// Bind an ephemeral loopback port with a backlog of `capacity`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(capacity: u32, config: RendezvousConfig) -> io::Result<Self> {
        let socket = TcpSocket::new_v4()?;
        socket.bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
        let listener = socket.listen(capacity.max(1))?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, backlog = capacity, "Rendezvous server listening");

        Ok(Self {
            listener: Some(listener),
            local_addr,
            config,
        })
    }

    /// Port workers must connect to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the listener is still open.
    pub fn is_open(&self) -> bool {
        self.listener.is_some()
    }

    /// Close the listener. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        match self.listener.take() {
            Some(listener) => {
                drop(listener);
                info!(addr = %self.local_addr, "Rendezvous server closed");
                true
            }
            None => false,
        }
    }

    /// Accept up to `expected` connections and collect the reported addresses.
    ///
    /// Never fails: exhausted slots and connections are logged and skipped,
    /// so the result may be shorter than `expected`.
    pub async fn collect(&self, expected: u32) -> RendezvousResult {
        let mut addresses = Vec::new();
        let Some(listener) = self.listener.as_ref() else {
            warn!("Rendezvous server already closed, nothing to collect");
            return addresses;
        };

        for slot in 1..=expected {
            let accepted = retry("rendezvous accept", self.config.accept_max_attempts, |_| {
                accept_once(listener, self.config.accept_timeout)
            })
            .await;

            match accepted {
                RetryOutcome::Completed {
                    value: (stream, peer),
                    ..
                } => {
                    debug!(slot, peer = %peer, "Worker connected");
                    let reported = self.read_connection(stream, peer).await;
                    addresses.extend(reported);
                }
                RetryOutcome::Exhausted {
                    attempts,
                    last_error,
                } => {
                    warn!(
                        slot,
                        attempts,
                        error = ?last_error.map(|e| e.to_string()),
                        "Giving up on rendezvous slot"
                    );
                }
            }
        }

        info!(
            expected,
            collected = addresses.len(),
            "Rendezvous finished"
        );
        addresses
    }

    async fn read_connection(&self, stream: TcpStream, peer: SocketAddr) -> Vec<String> {
        let mut reported = Vec::new();
        let buffer_size = self.config.buffer_size;
        let recv_timeout = self.config.recv_timeout;

        loop {
            let stream_ref = &stream;
            let received = retry("rendezvous recv", self.config.recv_max_attempts, |_| {
                read_chunk(stream_ref, buffer_size, recv_timeout)
            })
            .await;

            let raw = match received {
                RetryOutcome::Completed { value, .. } => value,
                RetryOutcome::Exhausted { attempts, .. } => {
                    warn!(peer = %peer, attempts, "Giving up on worker connection");
                    break;
                }
            };

            match classify_chunk(&raw) {
                Chunk::Data(text) => {
                    debug!(peer = %peer, address = %text, "Worker reported address");
                    reported.push(text);
                }
                Chunk::End(before) => {
                    if let Some(text) = before {
                        debug!(peer = %peer, address = %text, "Worker reported address");
                        reported.push(text);
                    }
                    break;
                }
                Chunk::Empty => {
                    warn!(peer = %peer, "Empty read from worker, closing connection");
                    break;
                }
            }
        }

        drop(stream);
        reported
    }
}

async fn accept_once(
    listener: &TcpListener,
    accept_timeout: Duration,
) -> io::Result<(TcpStream, SocketAddr)> {
    match tokio::time::timeout(accept_timeout, listener.accept()).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no worker connected within {accept_timeout:?}"),
        )),
    }
}

async fn read_chunk(stream: &TcpStream, buffer_size: usize, recv_timeout: Duration) -> io::Result<Vec<u8>> {
    let read = async {
        let mut buf = vec![0u8; buffer_size];
        loop {
            stream.readable().await?;
            match stream.try_read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    };

    match tokio::time::timeout(recv_timeout, read).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("worker sent nothing within {recv_timeout:?}"),
        )),
    }
}
