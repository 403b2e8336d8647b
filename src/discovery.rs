// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// UDP multicast label exchange (spec.md §4.9). Socket setup grounded on
// examples/original_source/eROIL/src/socket/linux/linux_udp_multicast.cpp
// (join/TTL/loopback/reuse-addr options); the generation-gated diff logic
// is a direct port of examples/original_source/eROIL/src/manager/peer_state.cpp's
// `diff_sorted`/`update_send`/`update_recv`.

use std::collections::HashMap;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ManagerConfig;
use crate::route_table::NodeId;
use crate::router::Router;
use crate::wire::{BroadcastMessage, LabelInfo, LabelSnapshot, LABEL_SENTINEL};

pub const BROADCAST_PERIOD: Duration = Duration::from_secs(3);

fn open_multicast_socket(cfg: &ManagerConfig) -> std::io::Result<UdpSocket> {
    let bind_addr = format!("{}:{}", cfg.mcast_bind_ip, cfg.mcast_port);
    let socket = UdpSocket::bind(&bind_addr)?;

    #[cfg(unix)]
    if cfg.mcast_reuse_addr {
        use std::os::unix::io::AsRawFd;
        let fd = socket.as_raw_fd();
        let one: libc::c_int = 1;
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
            #[cfg(target_os = "linux")]
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }

    let group: Ipv4Addr = cfg.mcast_group_ip.parse().unwrap_or(Ipv4Addr::new(239, 255, 0, 1));
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_ttl_v4(cfg.mcast_ttl)?;
    socket.set_multicast_loop_v4(cfg.mcast_loopback)?;
    Ok(socket)
}

/// Per-peer label-set diffing (spec.md §4.9), ported from `peer_state.cpp`.
/// Kept around even though the original called it dead code — it is the
/// reconciliation engine the discovery loop below drives.
#[derive(Default)]
pub struct PeerState {
    send_labels: Mutex<HashMap<NodeId, LabelSnapshot>>,
    recv_labels: Mutex<HashMap<NodeId, LabelSnapshot>>,
}

pub struct LabelDeltas {
    pub added: Vec<LabelInfo>,
    pub removed: Vec<LabelInfo>,
}

fn diff_sorted(prev: &[LabelInfo], curr: &[LabelInfo]) -> LabelDeltas {
    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut pi = 0;
    let mut ci = 0;
    while pi < prev.len() && ci < curr.len() {
        let p = prev[pi].label;
        let c = curr[ci].label;
        if p <= LABEL_SENTINEL {
            pi += 1;
            continue;
        }
        if c <= LABEL_SENTINEL {
            ci += 1;
            continue;
        }
        if p < c {
            removed.push(prev[pi]);
            pi += 1;
        } else if c < p {
            added.push(curr[ci]);
            ci += 1;
        } else {
            pi += 1;
            ci += 1;
        }
    }
    while pi < prev.len() {
        if prev[pi].label > LABEL_SENTINEL {
            removed.push(prev[pi]);
        }
        pi += 1;
    }
    while ci < curr.len() {
        if curr[ci].label > LABEL_SENTINEL {
            added.push(curr[ci]);
        }
        ci += 1;
    }
    LabelDeltas { added, removed }
}

impl PeerState {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(map: &Mutex<HashMap<NodeId, LabelSnapshot>>, peer: NodeId, incoming: &LabelSnapshot) -> LabelDeltas {
        let mut guard = map.lock().unwrap();
        match guard.get_mut(&peer) {
            None => {
                guard.insert(peer, incoming.clone());
                LabelDeltas {
                    added: incoming.labels.clone(),
                    removed: Vec::new(),
                }
            }
            Some(prev) => {
                if prev.generation == incoming.generation {
                    return LabelDeltas {
                        added: Vec::new(),
                        removed: Vec::new(),
                    };
                }
                let delta = diff_sorted(&prev.labels, &incoming.labels);
                *prev = incoming.clone();
                delta
            }
        }
    }

    pub fn update_send(&self, peer: NodeId, msg: &BroadcastMessage) -> LabelDeltas {
        Self::update(&self.send_labels, peer, &msg.send_snapshot)
    }

    pub fn update_recv(&self, peer: NodeId, msg: &BroadcastMessage) -> LabelDeltas {
        Self::update(&self.recv_labels, peer, &msg.recv_snapshot)
    }
}

/// Periodic broadcaster: every `BROADCAST_PERIOD`, sends this node's current
/// send/recv label snapshots to the multicast group (spec.md §4.9).
pub fn run_broadcaster(socket: Arc<UdpSocket>, router: Arc<Router>, node_id: NodeId, group_addr: String, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        let msg = BroadcastMessage {
            node_id,
            send_snapshot: router.snapshot_send_labels(),
            recv_snapshot: router.snapshot_recv_labels(),
        };
        let buf = msg.encode();
        if let Err(e) = socket.send_to(&buf, &group_addr) {
            log::warn!("discovery broadcast failed: {e}");
        }
        std::thread::sleep(BROADCAST_PERIOD);
    }
}

/// Receive loop: decodes incoming broadcasts, reconciles against per-peer
/// last-seen state, and mutates the route table to enroll/unenroll
/// subscribers (spec.md §4.9's "route-kind decisions from the roster").
pub fn run_receiver(
    socket: Arc<UdpSocket>,
    router: Arc<Router>,
    peer_state: Arc<PeerState>,
    node_id: NodeId,
    local_ips: HashMap<NodeId, String>,
    stop: Arc<AtomicBool>,
) {
    let _ = socket.set_read_timeout(Some(Duration::from_millis(500)));
    let mut buf = vec![0u8; 64 * 1024];
    while !stop.load(Ordering::Acquire) {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                log::warn!("discovery recv failed: {e}");
                continue;
            }
        };
        let msg = match BroadcastMessage::decode(&buf[..n]) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("dropping malformed discovery frame: {e}");
                continue;
            }
        };
        if msg.node_id == node_id {
            continue;
        }
        let is_local = local_ips.get(&msg.node_id).is_some();

        let send_delta = peer_state.update_send(msg.node_id, &msg);
        for info in &send_delta.added {
            let result = if is_local {
                router.add_local_send_subscriber(info.label, info.size as usize, msg.node_id)
            } else {
                router.add_remote_send_subscriber(info.label, info.size as usize, msg.node_id)
            };
            if let Err(e) = result {
                log::warn!("discovery: could not enroll peer {} on label {}: {e}", msg.node_id, info.label);
            }
        }
        for info in &send_delta.removed {
            router.remove_send_subscriber(info.label, msg.node_id);
        }

        // Recv labels the peer advertises only matter to us when they match
        // one of our own send routes (spec.md §4.9 "For added recv labels
        // that match our send routes, enroll the peer").
        let recv_delta = peer_state.update_recv(msg.node_id, &msg);
        for info in &recv_delta.added {
            if !router.has_send_route(info.label) {
                continue;
            }
            let result = if is_local {
                router.add_local_send_subscriber(info.label, info.size as usize, msg.node_id)
            } else {
                router.add_remote_send_subscriber(info.label, info.size as usize, msg.node_id)
            };
            if let Err(e) = result {
                log::warn!("discovery: could not enroll peer {} on label {}: {e}", msg.node_id, info.label);
            }
        }
        for info in &recv_delta.removed {
            router.remove_send_subscriber(info.label, msg.node_id);
        }
    }
}

pub fn open_discovery_socket(cfg: &ManagerConfig) -> std::io::Result<UdpSocket> {
    open_multicast_socket(cfg)
}
