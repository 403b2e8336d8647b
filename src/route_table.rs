// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Label -> publisher/subscriber route table (spec.md §4.3). Grounded on
// examples/original_source/eROIL/src/router/route_table.cpp for the
// operation names and invariants.

use std::collections::{BTreeSet, HashMap};

use crate::error::RouteError;
use crate::wire::{LabelInfo, LabelSnapshot};

pub type HandleId = u64;
pub type NodeId = i32;

#[derive(Debug, Clone, Default)]
pub struct SendRoute {
    pub label_size: usize,
    pub publishers: BTreeSet<HandleId>,
    pub local_subscribers: BTreeSet<NodeId>,
    pub remote_subscribers: BTreeSet<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct RecvRoute {
    pub label_size: usize,
    pub subscribers: BTreeSet<HandleId>,
}

/// Owns both route tables and their generation counters. Mutations bump the
/// relevant generation; callers are expected to hold the router's
/// shared-exclusive lock around all calls here (the table itself has no
/// internal locking).
#[derive(Default)]
pub struct RouteTable {
    send_routes: HashMap<i32, SendRoute>,
    recv_routes: HashMap<i32, RecvRoute>,
    send_generation: u64,
    recv_generation: u64,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_route(&self, label: i32) -> Option<&SendRoute> {
        self.send_routes.get(&label)
    }

    pub fn recv_route(&self, label: i32) -> Option<&RecvRoute> {
        self.recv_routes.get(&label)
    }

    pub fn add_send_publisher(
        &mut self,
        label: i32,
        label_size: usize,
        handle: HandleId,
    ) -> Result<(), RouteError> {
        match self.send_routes.get_mut(&label) {
            Some(route) => {
                if route.label_size != label_size {
                    return Err(RouteError::SizeMismatch { label });
                }
                route.publishers.insert(handle);
            }
            None => {
                let mut route = SendRoute {
                    label_size,
                    ..Default::default()
                };
                route.publishers.insert(handle);
                self.send_routes.insert(label, route);
                self.send_generation += 1;
            }
        }
        Ok(())
    }

    pub fn remove_send_publisher(&mut self, label: i32, handle: HandleId) {
        if let Some(route) = self.send_routes.get_mut(&label) {
            route.publishers.remove(&handle);
            if route.publishers.is_empty() {
                self.send_routes.remove(&label);
                self.send_generation += 1;
            }
        }
    }

    pub fn add_local_send_subscriber(
        &mut self,
        label: i32,
        label_size: usize,
        dst: NodeId,
    ) -> Result<(), RouteError> {
        self.add_send_subscriber(label, label_size, dst, true)
    }

    pub fn add_remote_send_subscriber(
        &mut self,
        label: i32,
        label_size: usize,
        dst: NodeId,
    ) -> Result<(), RouteError> {
        self.add_send_subscriber(label, label_size, dst, false)
    }

    fn add_send_subscriber(
        &mut self,
        label: i32,
        label_size: usize,
        dst: NodeId,
        local: bool,
    ) -> Result<(), RouteError> {
        let is_new = !self.send_routes.contains_key(&label);
        let route = self.send_routes.entry(label).or_insert_with(|| SendRoute {
            label_size,
            ..Default::default()
        });
        if route.label_size != label_size {
            return Err(RouteError::SizeMismatch { label });
        }
        if local {
            route.remote_subscribers.remove(&dst);
            route.local_subscribers.insert(dst);
        } else {
            route.local_subscribers.remove(&dst);
            route.remote_subscribers.insert(dst);
        }
        if is_new {
            self.send_generation += 1;
        }
        Ok(())
    }

    pub fn remove_send_subscriber(&mut self, label: i32, dst: NodeId) {
        if let Some(route) = self.send_routes.get_mut(&label) {
            route.local_subscribers.remove(&dst);
            route.remote_subscribers.remove(&dst);
            if route.publishers.is_empty()
                && route.local_subscribers.is_empty()
                && route.remote_subscribers.is_empty()
            {
                self.send_routes.remove(&label);
                self.send_generation += 1;
            }
        }
    }

    pub fn add_recv_subscriber(
        &mut self,
        label: i32,
        label_size: usize,
        handle: HandleId,
    ) -> Result<(), RouteError> {
        match self.recv_routes.get_mut(&label) {
            Some(route) => {
                if route.label_size != label_size {
                    return Err(RouteError::SizeMismatch { label });
                }
                route.subscribers.insert(handle);
            }
            None => {
                let mut route = RecvRoute {
                    label_size,
                    ..Default::default()
                };
                route.subscribers.insert(handle);
                self.recv_routes.insert(label, route);
                self.recv_generation += 1;
            }
        }
        Ok(())
    }

    pub fn remove_recv_subscriber(&mut self, label: i32, handle: HandleId) {
        if let Some(route) = self.recv_routes.get_mut(&label) {
            route.subscribers.remove(&handle);
            if route.subscribers.is_empty() {
                self.recv_routes.remove(&label);
                self.recv_generation += 1;
            }
        }
    }

    /// Fixed-size, sorted, generation-stamped snapshot (spec.md §4.3,
    /// "Snapshot idempotence").
    pub fn snapshot_send_labels(&self) -> LabelSnapshot {
        let mut labels: Vec<LabelInfo> = self
            .send_routes
            .iter()
            .map(|(&label, route)| LabelInfo {
                label,
                size: route.label_size as u32,
            })
            .collect();
        labels.sort_by_key(|l| l.label);
        LabelSnapshot {
            generation: self.send_generation,
            labels,
        }
    }

    pub fn snapshot_recv_labels(&self) -> LabelSnapshot {
        let mut labels: Vec<LabelInfo> = self
            .recv_routes
            .iter()
            .map(|(&label, route)| LabelInfo {
                label,
                size: route.label_size as u32,
            })
            .collect();
        labels.sort_by_key(|l| l.label);
        LabelSnapshot {
            generation: self.recv_generation,
            labels,
        }
    }

    pub fn send_generation(&self) -> u64 {
        self.send_generation
    }

    pub fn recv_generation(&self) -> u64 {
        self.recv_generation
    }
}
