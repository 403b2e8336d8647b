// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Connection manager (spec.md §4.8). Grounded on
// examples/original_source/eROIL/src/conn/connection_manager.cpp for the
// startup sequence and asymmetric dial policy, and
// examples/original_source/eROIL/src/comm/connection_manager.cpp for the
// monitor loop and replacement discipline.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::NodeInfo;
use crate::net::{self, TcpSession};
use crate::ring::{RingReader, RingWriter};
use crate::route_table::NodeId;
use crate::router::Router;
use crate::wire::{LabelHeader, FLAG_CONNECT, FLAG_PING};
use crate::workers::{run_socket_receive_worker, ShmSendPlan, TcpSendPlan};
use crate::workers::SendWorker;

const MONITOR_PERIOD: Duration = Duration::from_secs(5);
const INITIAL_DIAL_ROUNDS: u32 = 5;
const INITIAL_DIAL_INTERVAL: Duration = Duration::from_secs(1);
const DIAL_TIMEOUT: Duration = Duration::from_millis(500);
const LOCAL_OPENER_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const SHM_SEGMENT_SIZE: usize = 128 * 1024 * 1024;

pub fn shm_segment_name(node_id: NodeId) -> String {
    format!("/eroil.label.{node_id}")
}

struct PeerRecvWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns every background thread the connection manager spawns. Dropping
/// this without calling `shutdown` first leaks threads (they are daemon-like
/// by design, matching the source's process-lifetime workers).
pub struct ConnectionManager {
    node_id: NodeId,
    router: Arc<Router>,
    nodes: Vec<NodeInfo>,
    listener_stop: Arc<AtomicBool>,
    monitor_stop: Arc<AtomicBool>,
    opener_stop: Arc<AtomicBool>,
    recv_workers: Mutex<std::collections::HashMap<NodeId, PeerRecvWorker>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Runs the startup sequence from spec.md §4.8: both send workers must
    /// already be running (owned by the caller); this spawns the
    /// shared-memory receive worker, the TCP listener, local shm-opener
    /// threads, the initial remote dial rounds, and the monitor loop.
    pub fn start(
        router: Arc<Router>,
        node_id: NodeId,
        nodes: Vec<NodeInfo>,
        shm_worker: Arc<SendWorker<ShmSendPlan>>,
        tcp_worker: Arc<SendWorker<TcpSendPlan>>,
    ) -> std::io::Result<Arc<Self>> {
        let _ = (&shm_worker, &tcp_worker); // workers are driven by build_send_job callers, not directly here

        let self_ip = nodes
            .get(node_id as usize)
            .map(|n| n.ip.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let self_port = nodes.get(node_id as usize).map(|n| n.port).unwrap_or(0);

        let shm_reader = Arc::new(RingReader::create_or_open(
            &shm_segment_name(node_id),
            node_id,
            SHM_SEGMENT_SIZE,
        )?);
        router.set_self_recv(Arc::clone(&shm_reader));
        let shm_recv_stop = Arc::new(AtomicBool::new(false));
        {
            let router = Arc::clone(&router);
            let stop = Arc::clone(&shm_recv_stop);
            thread::spawn(move || crate::workers::run_shm_receive_worker(shm_reader, router, stop));
        }

        let listener = TcpListener::bind((self_ip.as_str(), self_port))?;
        let listener_stop = Arc::new(AtomicBool::new(false));

        let mgr = Arc::new(Self {
            node_id,
            router: Arc::clone(&router),
            nodes: nodes.clone(),
            listener_stop: Arc::clone(&listener_stop),
            monitor_stop: Arc::new(AtomicBool::new(false)),
            opener_stop: Arc::new(AtomicBool::new(false)),
            recv_workers: Mutex::new(std::collections::HashMap::new()),
            threads: Mutex::new(Vec::new()),
        });

        {
            let mgr = Arc::clone(&mgr);
            let handle = thread::spawn(move || mgr.run_listener(listener));
            mgr.threads.lock().unwrap().push(handle);
        }

        {
            let mgr = Arc::clone(&mgr);
            let handle = thread::spawn(move || mgr.run_local_openers());
            mgr.threads.lock().unwrap().push(handle);
        }

        mgr.initial_dial_rounds();

        {
            let mgr = Arc::clone(&mgr);
            let handle = thread::spawn(move || mgr.run_monitor());
            mgr.threads.lock().unwrap().push(handle);
        }

        Ok(mgr)
    }

    fn is_local_peer(&self, peer: &NodeInfo) -> bool {
        self.nodes
            .get(self.node_id as usize)
            .map(|me| me.ip == peer.ip)
            .unwrap_or(false)
    }

    /// Repeatedly attempts to open every local peer's shared-memory receive
    /// segment until all are open (spec.md §4.8 step 4: "until all are
    /// open", not a single bounded-attempt pass) or `shutdown` is called.
    /// A peer starting up after us, or restarting later, still gets wired
    /// up on a later round instead of being permanently unreachable.
    fn run_local_openers(&self) {
        let targets: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|p| p.id >= 0 && p.id != self.node_id && self.is_local_peer(p))
            .map(|p| p.id)
            .collect();
        if targets.is_empty() {
            return;
        }
        loop {
            let pending: Vec<NodeId> = targets
                .iter()
                .copied()
                .filter(|id| self.router.shm_sender(*id).is_none())
                .collect();
            if pending.is_empty() {
                return;
            }
            for id in pending {
                if self.opener_stop.load(Ordering::Acquire) {
                    return;
                }
                let name = shm_segment_name(id);
                match RingWriter::open(&name, 50) {
                    Ok(writer) => self.router.upsert_shm_sender(id, Arc::new(writer)),
                    Err(e) => log::debug!("could not open shm segment for local peer {id}: {e}"),
                }
            }
            if self.opener_stop.load(Ordering::Acquire) {
                return;
            }
            thread::sleep(LOCAL_OPENER_RETRY_INTERVAL);
        }
    }

    /// Dial every remote peer whose id is strictly less than ours, up to
    /// `INITIAL_DIAL_ROUNDS` times (spec.md §4.8 step 5, "asymmetric dial").
    fn initial_dial_rounds(&self) {
        let targets: Vec<&NodeInfo> = self
            .nodes
            .iter()
            .filter(|p| p.id >= 0 && p.id < self.node_id && !self.is_local_peer(p))
            .collect();
        if targets.is_empty() {
            return;
        }
        for round in 0..INITIAL_DIAL_ROUNDS {
            let remaining: Vec<&NodeInfo> = targets
                .iter()
                .filter(|p| !self.router.has_socket(p.id))
                .copied()
                .collect();
            if remaining.is_empty() {
                return;
            }
            for peer in remaining {
                self.dial(peer);
            }
            if round + 1 < INITIAL_DIAL_ROUNDS {
                thread::sleep(INITIAL_DIAL_INTERVAL);
            }
        }
    }

    fn dial(&self, peer: &NodeInfo) {
        match net::try_connect(&peer.ip, peer.port, DIAL_TIMEOUT) {
            Ok(stream) => self.adopt_stream(stream, Some(peer.id)),
            Err(e) => log::debug!("dial to peer {} failed: {e}", peer.id),
        }
    }

    /// Accept loop for inbound connections; the server side upserts the
    /// session keyed by the identification header's `source_id` (spec.md
    /// §4.8 "Asymmetric dial").
    fn run_listener(&self, listener: TcpListener) {
        let _ = listener.set_nonblocking(true);
        while !self.listener_stop.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, _addr)) => self.adopt_stream(stream, None),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => log::warn!("accept failed: {e}"),
            }
        }
    }

    fn adopt_stream(&self, stream: TcpStream, expect_id: Option<NodeId>) {
        let _ = stream.set_nonblocking(false);
        let mut header_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                log::warn!("could not clone inbound stream: {e}");
                return;
            }
        };

        let peer_id = if let Some(id) = expect_id {
            let header = LabelHeader::connect(self.node_id);
            if let Err(e) = header_stream.set_nodelay(true).and_then(|_| {
                use std::io::Write;
                header_stream.write_all(&header.encode())
            }) {
                log::warn!("failed to send identification header to {id}: {e}");
                return;
            }
            id
        } else {
            match net::recv_header(&mut header_stream) {
                Ok(h) if h.flags & FLAG_CONNECT != 0 => h.source_id,
                Ok(_) => {
                    log::warn!("expected identification header on inbound connection");
                    return;
                }
                Err(e) => {
                    log::warn!("failed to read identification header: {e}");
                    return;
                }
            }
        };

        let session = match TcpSession::new(stream, peer_id) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                log::warn!("could not wrap stream for peer {peer_id}: {e}");
                return;
            }
        };
        self.replace_session(peer_id, session);
    }

    /// Stops the old receive worker (if any) before replacing the session,
    /// satisfying the registry's replacement discipline (spec.md §4.8).
    fn replace_session(&self, peer_id: NodeId, session: Arc<TcpSession>) {
        {
            let mut workers = self.recv_workers.lock().unwrap();
            if let Some(old) = workers.remove(&peer_id) {
                old.stop.store(true, Ordering::Release);
                let _ = old.handle.join();
            }
        }
        self.router.upsert_socket(peer_id, Arc::clone(&session));

        let stop = Arc::new(AtomicBool::new(false));
        let router = Arc::clone(&self.router);
        let worker_stop = Arc::clone(&stop);
        let worker_session = Arc::clone(&session);
        let handle = thread::spawn(move || run_socket_receive_worker(worker_session, router, worker_stop));
        self.recv_workers.lock().unwrap().insert(peer_id, PeerRecvWorker { stop, handle });
    }

    /// Every 5 s: dial missing remote peers, ping connected ones, and
    /// reconnect on fatal failure (spec.md §4.8 "Monitor").
    fn run_monitor(&self) {
        while !self.monitor_stop.load(Ordering::Acquire) {
            thread::sleep(MONITOR_PERIOD);
            if self.monitor_stop.load(Ordering::Acquire) {
                return;
            }
            for peer in self.nodes.iter().filter(|p| p.id >= 0 && p.id != self.node_id && !self.is_local_peer(p)) {
                match self.router.socket(peer.id) {
                    None => self.dial(peer),
                    Some(session) => {
                        if !session.is_connected() {
                            self.teardown_and_reconnect(peer);
                            continue;
                        }
                        let ping = LabelHeader::ping(self.node_id);
                        if session.send_frame(&ping, &[]).is_err() {
                            self.teardown_and_reconnect(peer);
                        }
                    }
                }
            }
        }
    }

    fn teardown_and_reconnect(&self, peer: &NodeInfo) {
        {
            let mut workers = self.recv_workers.lock().unwrap();
            if let Some(old) = workers.remove(&peer.id) {
                old.stop.store(true, Ordering::Release);
                let _ = old.handle.join();
            }
        }
        self.router.delete_socket(peer.id);
        self.dial(peer);
    }

    /// Stops every background thread and joins them.
    pub fn shutdown(&self) {
        self.listener_stop.store(true, Ordering::Release);
        self.monitor_stop.store(true, Ordering::Release);
        self.opener_stop.store(true, Ordering::Release);
        let mut workers = self.recv_workers.lock().unwrap();
        for (_, worker) in workers.drain() {
            worker.stop.store(true, Ordering::Release);
            let _ = worker.handle.join();
        }
        drop(workers);
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}
