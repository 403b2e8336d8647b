// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy for the fabric's data plane. Mirrors the distinction the
// spec draws between transient, fatal, validation, corruption, and
// configuration failures (see SPEC_FULL.md §7) instead of a single
// catch-all `io::Error`.

use thiserror::Error;

/// Errors from the single-reader/multi-writer ring (§4.1).
#[derive(Debug, Error)]
pub enum RingError {
    #[error("ring segment is not initialized")]
    BlockNotInitialized,
    #[error("payload does not fit the ring even when empty")]
    SizeTooLarge,
    #[error("not enough free space in the ring (reader too slow)")]
    NotEnoughSpace,
    #[error("ring was reinitialized while this write was in flight")]
    BlockReinitialized,
    #[error("retry budget exhausted while allocating ring space")]
    CouldNotAllocate,
    #[error("no records available")]
    NoRecords,
    #[error("tail has advanced past head")]
    TailCorruption,
    #[error("record header magic or layout is invalid")]
    BlockCorrupted,
    #[error("record is still being written")]
    NotYetPublished,
    #[error("caller's buffer is smaller than the record payload")]
    LabelTooLarge,
}

impl RingError {
    /// Transient failures that should be counted but do not tear the ring down.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RingError::NotEnoughSpace | RingError::BlockReinitialized
        )
    }
}

/// Errors from route table mutation/lookup (§4.3).
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("label {label} already has a route with a different label_size")]
    SizeMismatch { label: i32 },
    #[error("no route exists for label {label}")]
    RouteNotFound { label: i32 },
    #[error("handle is not the registered publisher for this route")]
    IncorrectPublisher,
    #[error("destination node {0} is not present in the roster")]
    UnknownNode(i32),
}

/// Synchronous, user-facing send/recv API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("unknown handle id {0}")]
    UnknownHandle(u64),
    #[error("payload size {got} does not match route label_size {want}")]
    SizeMismatch { got: usize, want: usize },
    #[error("manager is not ready")]
    NotReady,
}

/// Errors from the connection manager / transport registry (§4.4, §4.8).
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("peer {0} is not in the roster")]
    UnknownPeer(i32),
    #[error("frame failed validation: {0}")]
    BadFrame(&'static str),
}

/// Errors from manager startup (SPEC_FULL.md §4.10).
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("node id {0} is not present in the roster")]
    UnknownSelf(i32),
}

/// Configuration file parsing errors (SPEC_FULL.md §4.11).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not open {0}")]
    NotFound(String),
    #[error("{0}: no peer rows parsed")]
    Empty(String),
    #[error("peer roster contains a negative node id")]
    NegativeId,
    #[error("peer roster contains a duplicate node id {0}")]
    DuplicateId(i32),
    #[error("malformed row in {file}: {row}")]
    MalformedRow { file: String, row: String },
}
