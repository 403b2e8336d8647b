// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transport registry (spec.md §4.4). Grounded on
// examples/original_source/eROIL/src/router/transport_registry.cpp. Holds
// the single self-hosted ring reader, one ring writer per local peer, and
// one TCP session per remote peer. Never spawns threads — that is the
// connection manager's job.

use std::collections::HashMap;
use std::sync::Arc;

use crate::net::TcpSession;
use crate::ring::{RingReader, RingWriter};
use crate::route_table::NodeId;

#[derive(Default)]
pub struct TransportRegistry {
    self_recv: Option<Arc<RingReader>>,
    shm_senders: HashMap<NodeId, Arc<RingWriter>>,
    sockets: HashMap<NodeId, Arc<TcpSession>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_self_recv(&mut self, recv: Arc<RingReader>) {
        self.self_recv = Some(recv);
    }

    pub fn self_recv(&self) -> Option<&Arc<RingReader>> {
        self.self_recv.as_ref()
    }

    pub fn upsert_shm_sender(&mut self, id: NodeId, sender: Arc<RingWriter>) {
        self.shm_senders.insert(id, sender);
    }

    pub fn shm_sender(&self, id: NodeId) -> Option<&Arc<RingWriter>> {
        self.shm_senders.get(&id)
    }

    pub fn delete_shm_sender(&mut self, id: NodeId) {
        self.shm_senders.remove(&id);
    }

    /// Insert a new session for `id`. Any prior session under the same id
    /// is disconnected first — the caller must already have stopped that
    /// session's receive worker (spec.md §4.8 "Replacement discipline").
    pub fn upsert_socket(&mut self, id: NodeId, session: Arc<TcpSession>) {
        if let Some(old) = self.sockets.remove(&id) {
            old.shutdown();
        }
        self.sockets.insert(id, session);
    }

    pub fn delete_socket(&mut self, id: NodeId) {
        if let Some(old) = self.sockets.remove(&id) {
            old.shutdown();
        }
    }

    pub fn socket(&self, id: NodeId) -> Option<&Arc<TcpSession>> {
        self.sockets.get(&id)
    }

    pub fn has_socket(&self, id: NodeId) -> bool {
        self.sockets.contains_key(&id)
    }

    pub fn socket_ids(&self) -> Vec<NodeId> {
        self.sockets.keys().copied().collect()
    }
}
