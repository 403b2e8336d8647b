// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Blocking TCP session plumbing (spec.md §4.8, §5, §6). Grounded on
// examples/original_source/eROIL/src/socket/linux/linux_tcp_client.cpp and
// linux_tcp_server.cpp for the connect/accept/send_all/recv_all shapes;
// implemented with std::net since the spec calls for blocking sockets and
// dedicated OS threads, not an async runtime (spec.md §5).

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::ConnError;
use crate::wire::{LabelHeader, LABEL_HEADER_LEN};

/// A single peer TCP session. `send_all` is mutex-guarded (spec.md §5: "per
/// socket mutex guards send_all"); `recv_all` is only ever called from the
/// session's dedicated receive worker thread and needs no lock. `connected`
/// lets the send path and the monitor loop agree on liveness without a
/// round-trip through the registry (spec.md §4.8/§7 "mark session
/// disconnected").
pub struct TcpSession {
    stream: Mutex<TcpStream>,
    peer_id: i32,
    connected: AtomicBool,
}

impl TcpSession {
    pub fn new(stream: TcpStream, peer_id: i32) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: Mutex::new(stream),
            peer_id,
            connected: AtomicBool::new(true),
        })
    }

    pub fn peer_id(&self) -> i32 {
        self.peer_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Send a complete `LabelHeader` + payload frame. Distinguishes fatal
    /// socket failures (spec.md §7) from transient ones via `ConnError`.
    pub fn send_frame(&self, header: &LabelHeader, payload: &[u8]) -> Result<(), ConnError> {
        let mut guard = self.stream.lock().unwrap();
        let result = (|| {
            guard.write_all(&header.encode())?;
            if !payload.is_empty() {
                guard.write_all(payload)?;
            }
            guard.flush()
        })();
        drop(guard);
        if let Err(e) = &result {
            if is_fatal(e) {
                self.mark_disconnected();
            }
        }
        result.map_err(ConnError::from)
    }

    /// Clone the underlying stream handle for the receive worker (so reads
    /// happen outside the send mutex, matching the spec's per-socket mutex
    /// guarding only `send_all`).
    pub fn try_clone_stream(&self) -> io::Result<TcpStream> {
        self.stream.lock().unwrap().try_clone()
    }

    /// Fatal errors (reset/aborted/unreachable/down) should mark the session
    /// disconnected; anything else is treated as transient.
    pub fn shutdown(&self) {
        self.mark_disconnected();
        let _ = self.stream.lock().unwrap().shutdown(std::net::Shutdown::Both);
    }
}

/// Is this I/O error one of the "fatal socket failure" kinds from spec.md §7?
pub fn is_fatal(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::NetworkDown
    )
}

/// Read exactly `buf.len()` bytes, or return the underlying I/O error.
pub fn recv_exact(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<()> {
    stream.read_exact(buf)
}

/// Block waiting for a complete `LabelHeader`.
pub fn recv_header(stream: &mut TcpStream) -> io::Result<LabelHeader> {
    let mut buf = [0u8; LABEL_HEADER_LEN];
    recv_exact(stream, &mut buf)?;
    LabelHeader::decode(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

/// Attempt a single connect with a short timeout, matching the connection
/// manager's bounded-round dial policy (spec.md §4.8).
pub fn try_connect(ip: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    use std::net::ToSocketAddrs;
    let addr = (ip, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address"))?;
    TcpStream::connect_timeout(&addr, timeout)
}
