// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// eroil: a label-addressed publish/subscribe message fabric over shared
// memory and TCP. A producer opens a send handle for a numeric label and
// writes fixed-size records; the fabric delivers each record to every peer
// that has opened a receive handle for the same label, choosing shared
// memory for co-resident peers and TCP for remote ones per destination.
//
// Platform primitives (shm, named mutex/condvar) are a pure-Rust,
// binary-layout-faithful port of cpp-ipc's shared memory primitives.

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod mutex;
pub use mutex::IpcMutex;

mod condition;
pub use condition::IpcCondition;

mod waiter;
pub use waiter::Waiter;

mod buffer;
pub use buffer::IpcBuffer;

mod ring;
pub use ring::{Record, RingReader, RingWriter};

mod route_table;
pub use route_table::{HandleId, NodeId, RecvRoute, RouteTable, SendRoute};

mod registry;
pub use registry::TransportRegistry;

mod router;
pub use router::{RecvHandle, Router, SendHandle, SignalMode};

mod workers;
pub use workers::{Semaphore, SendJob, SendWorker};

mod net;
pub use net::TcpSession;

mod conn_manager;
pub use conn_manager::ConnectionManager;

mod discovery;
pub use discovery::PeerState;

mod config;
pub use config::{ManagerConfig, ManagerMode, NodeInfo};

mod manager;
pub use manager::{close_manager, init_manager, ManagerContext};

mod iosb;
pub use iosb::{FcHeader, IosbRing, ReceiveIosb, SendIosb, Timestamp};

mod wire;
pub use wire::{BroadcastMessage, LabelHeader, LabelInfo, LabelSnapshot};

mod error;
pub use error::{ApiError, ConfigError, ConnError, ManagerError, RingError, RouteError};
