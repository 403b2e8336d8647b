// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-reader, multi-writer shared-memory byte ring (spec.md §4.1, §4.2).
// Generalises libipc::channel's CAS-claim-on-`head` loop and its packed
// epoch/connection-bitmask atomic from a 256-slot, 64-byte-per-slot
// broadcast ring to a single variable-length-record, single-reader ring.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::buffer::IpcBuffer;
use crate::error::RingError;
use crate::shm::{ShmHandle, ShmOpenMode};
use crate::waiter::Waiter;

const SEG_MAGIC: u32 = 0x5245_4F49; // "IORE"
const SEG_VERSION: u32 = 1;

const SEG_STATE_INITING: u32 = 0;
const SEG_STATE_READY: u32 = 1;

const RECORD_WRITING: u32 = 0;
const RECORD_COMMITTED: u32 = 1;
const RECORD_WRAP: u32 = 2;

const RECORD_MAGIC: u32 = 0x5245_4344; // "DCER"

pub const RECORD_HEADER_SIZE: usize = 48;
pub const SEGMENT_HEADER_SIZE: usize = 64;
pub const METADATA_SIZE: usize = 64;
pub const DEFAULT_SEGMENT_SIZE: usize = 128 * 1024 * 1024;

/// Maximum CAS-retry iterations before a writer gives up (spec.md §4.1 step 4).
const MAX_WRITE_RETRIES: u32 = 100;

#[inline]
fn align8(n: usize) -> usize {
    (n + 7) & !7
}

#[repr(C)]
struct SegmentHeader {
    magic: AtomicU32,
    version: AtomicU32,
    state: AtomicU32,
    _pad0: u32,
    total_size: AtomicU64,
    _pad1: [u8; SEGMENT_HEADER_SIZE - 24],
}

#[repr(C)]
struct Metadata {
    owner: AtomicU32,
    _pad0: u32,
    data_size: AtomicU64,
    generation: AtomicU64,
    head_bytes: AtomicU64,
    tail_bytes: AtomicU64,
    published_count: AtomicU64,
    _pad1: [u8; METADATA_SIZE - 48],
}

#[repr(C)]
struct RecordHeaderRaw {
    state: AtomicU32,
    magic: u32,
    total_size: u32,
    payload_size: u32,
    epoch: u64,
    label: i32,
    source_id: i32,
    user_seq: u64,
    flags: u32,
    _pad: u32,
}

const _: () = assert!(std::mem::size_of::<RecordHeaderRaw>() == RECORD_HEADER_SIZE);
const _: () = assert!(std::mem::size_of::<SegmentHeader>() == SEGMENT_HEADER_SIZE);
const _: () = assert!(std::mem::size_of::<Metadata>() == METADATA_SIZE);

/// A record delivered by [`RingReader::recv`].
#[derive(Debug, Clone)]
pub struct Record {
    pub label: i32,
    pub source_id: i32,
    pub user_seq: u64,
    pub payload: IpcBuffer,
}

/// Shared plumbing between [`RingWriter`] and [`RingReader`]: the mapped
/// segment plus the named wake-up waiter.
struct RingCore {
    shm: ShmHandle,
    waiter: Waiter,
    data_size: usize,
}

impl RingCore {
    fn segment(&self) -> &SegmentHeader {
        unsafe { &*(self.shm.get() as *const SegmentHeader) }
    }

    fn metadata(&self) -> &Metadata {
        unsafe { &*(self.shm.get().add(SEGMENT_HEADER_SIZE) as *const Metadata) }
    }

    fn data_base(&self) -> *mut u8 {
        unsafe { self.shm.get().add(SEGMENT_HEADER_SIZE + METADATA_SIZE) }
    }

    fn record_at(&self, off: usize) -> &RecordHeaderRaw {
        unsafe { &*(self.data_base().add(off) as *const RecordHeaderRaw) }
    }
}

/// Per-destination writer (`ShmSend`, spec.md §4.2). Never creates a segment.
pub struct RingWriter {
    core: RingCore,
}

impl RingWriter {
    /// Open an existing ring, retrying (with yields) while it does not yet
    /// exist — the receiver is strictly responsible for creation.
    pub fn open(name: &str, attempts: u32) -> std::io::Result<Self> {
        let mut last_err = None;
        for i in 0..attempts.max(1) {
            match ShmHandle::acquire(name, DEFAULT_SEGMENT_SIZE, ShmOpenMode::Open) {
                Ok(shm) => {
                    let waiter = Waiter::open(&format!("{name}_RING"))?;
                    let data_size = shm.user_size() - SEGMENT_HEADER_SIZE - METADATA_SIZE;
                    return Ok(Self {
                        core: RingCore {
                            shm,
                            waiter,
                            data_size,
                        },
                    });
                }
                Err(e) => {
                    last_err = Some(e);
                    if i + 1 < attempts {
                        std::thread::yield_now();
                    }
                }
            }
        }
        Err(last_err.unwrap())
    }

    /// Writer algorithm (spec.md §4.1).
    pub fn send(
        &self,
        source_id: i32,
        label: i32,
        user_seq: u64,
        payload: &[u8],
    ) -> Result<(), RingError> {
        let seg = self.core.segment();
        if seg.state.load(Ordering::Acquire) != SEG_STATE_READY {
            return Err(RingError::BlockNotInitialized);
        }

        let meta = self.core.metadata();
        let generation = meta.generation.load(Ordering::Acquire);
        let reserved = align8(payload.len() + RECORD_HEADER_SIZE);
        if reserved > self.core.data_size {
            return Err(RingError::SizeTooLarge);
        }
        let usable_limit = self.core.data_size - RECORD_HEADER_SIZE;

        let mut head = meta.head_bytes.load(Ordering::Acquire);
        let mut claimed_off: Option<usize> = None;

        for _ in 0..MAX_WRITE_RETRIES {
            let tail = meta.tail_bytes.load(Ordering::Acquire);
            if head < tail {
                head = meta.head_bytes.load(Ordering::Acquire);
                continue;
            }
            if head - tail + reserved as u64 > self.core.data_size as u64 {
                return Err(RingError::NotEnoughSpace);
            }

            let off = (head % self.core.data_size as u64) as usize;
            if off + reserved > usable_limit {
                let wrap_len = self.core.data_size - off;
                match meta.head_bytes.compare_exchange_weak(
                    head,
                    head + wrap_len as u64,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        self.write_wrap_record(off, wrap_len as u32, generation);
                        head += wrap_len as u64;
                        continue;
                    }
                    Err(actual) => {
                        head = actual;
                        continue;
                    }
                }
            } else {
                match meta.head_bytes.compare_exchange_weak(
                    head,
                    head + reserved as u64,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        claimed_off = Some(off);
                        break;
                    }
                    Err(actual) => {
                        head = actual;
                        continue;
                    }
                }
            }
        }

        let off = claimed_off.ok_or(RingError::CouldNotAllocate)?;

        if seg.state.load(Ordering::Acquire) != SEG_STATE_READY
            || meta.generation.load(Ordering::Acquire) != generation
        {
            return Err(RingError::BlockReinitialized);
        }

        self.write_record_header(
            off,
            RECORD_WRITING,
            reserved as u32,
            payload.len() as u32,
            generation,
            label,
            source_id,
            user_seq,
        );
        unsafe {
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.core.data_base().add(off + RECORD_HEADER_SIZE),
                payload.len(),
            );
        }
        self.core
            .record_at(off)
            .state
            .store(RECORD_COMMITTED, Ordering::Release);

        meta.published_count.fetch_add(1, Ordering::Relaxed);
        let _ = self.core.waiter.notify();
        Ok(())
    }

    fn write_wrap_record(&self, off: usize, total_size: u32, generation: u64) {
        self.write_record_header(off, RECORD_WRITING, total_size, 0, generation, -1, -1, 0);
        self.core
            .record_at(off)
            .state
            .store(RECORD_WRAP, Ordering::Release);
    }

    #[allow(clippy::too_many_arguments)]
    fn write_record_header(
        &self,
        off: usize,
        state: u32,
        total_size: u32,
        payload_size: u32,
        epoch: u64,
        label: i32,
        source_id: i32,
        user_seq: u64,
    ) {
        let rec = unsafe { &mut *(self.core.data_base().add(off) as *mut RecordHeaderRaw) };
        rec.state.store(state, Ordering::Relaxed);
        rec.magic = RECORD_MAGIC;
        rec.total_size = total_size;
        rec.payload_size = payload_size;
        rec.epoch = epoch;
        rec.label = label;
        rec.source_id = source_id;
        rec.user_seq = user_seq;
        rec.flags = 0;
    }
}

/// The exactly-one receiver of a ring (`ShmRecv`, spec.md §4.2), named by
/// the local `NodeId`.
pub struct RingReader {
    core: RingCore,
}

impl RingReader {
    /// Create-or-open the segment; if it already existed, re-initialise it
    /// per spec.md §4.1's reader re-initialisation procedure.
    pub fn create_or_open(name: &str, owner: i32, segment_size: usize) -> std::io::Result<Self> {
        let shm = ShmHandle::acquire(name, segment_size, ShmOpenMode::CreateOrOpen)?;
        let waiter = Waiter::open(&format!("{name}_RING"))?;
        let data_size = shm.user_size() - SEGMENT_HEADER_SIZE - METADATA_SIZE;
        let core = RingCore {
            shm,
            waiter,
            data_size,
        };
        let reader = Self { core };
        reader.init_or_reinit(owner);
        Ok(reader)
    }

    fn init_or_reinit(&self, owner: i32) {
        let seg = self.core.segment();
        let meta = self.core.metadata();

        let already_ready = seg.magic.load(Ordering::Acquire) == SEG_MAGIC
            && seg.state.load(Ordering::Acquire) == SEG_STATE_READY;

        seg.state.store(SEG_STATE_INITING, Ordering::Release);
        if already_ready {
            meta.generation.fetch_add(1, Ordering::AcqRel);
        } else {
            seg.magic.store(SEG_MAGIC, Ordering::Relaxed);
            seg.version.store(SEG_VERSION, Ordering::Relaxed);
            seg.total_size
                .store(self.core.shm.user_size() as u64, Ordering::Relaxed);
            meta.generation.store(1, Ordering::Relaxed);
        }
        meta.owner.store(owner as u32, Ordering::Relaxed);
        meta.data_size
            .store(self.core.data_size as u64, Ordering::Relaxed);
        meta.head_bytes.store(0, Ordering::Relaxed);
        meta.tail_bytes.store(0, Ordering::Relaxed);
        meta.published_count.store(0, Ordering::Relaxed);
        seg.state.store(SEG_STATE_READY, Ordering::Release);
    }

    /// Block on the ring's named wake-up signal.
    pub fn wait(&self, timeout_ms: Option<u64>) -> std::io::Result<bool> {
        let meta = self.core.metadata();
        self.core
            .waiter
            .wait_if(|| meta.head_bytes.load(Ordering::Acquire) == meta.tail_bytes.load(Ordering::Acquire), timeout_ms)
    }

    /// Reader algorithm (spec.md §4.1).
    pub fn recv(&self, max_size: usize) -> Result<Record, RingError> {
        let meta = self.core.metadata();

        loop {
            let generation = meta.generation.load(Ordering::Acquire);
            let tail = meta.tail_bytes.load(Ordering::Acquire);
            let head = meta.head_bytes.load(Ordering::Acquire);
            if head == tail {
                return Err(RingError::NoRecords);
            }
            if head < tail {
                return Err(RingError::TailCorruption);
            }

            let off = (tail % self.core.data_size as u64) as usize;
            let rec = self.core.record_at(off);
            let state = rec.state.load(Ordering::Acquire);

            if state == RECORD_WRITING {
                return Err(RingError::NotYetPublished);
            }
            if rec.magic != RECORD_MAGIC {
                return Err(RingError::BlockCorrupted);
            }
            if rec.epoch != generation {
                self.flush_backlog();
                return Err(RingError::NoRecords);
            }
            if state == RECORD_WRAP {
                meta.tail_bytes
                    .store(tail + rec.total_size as u64, Ordering::Release);
                continue;
            }
            debug_assert_eq!(state, RECORD_COMMITTED);

            let total_size = rec.total_size;
            let payload_size = rec.payload_size as usize;
            if total_size as usize % 8 != 0
                || (total_size as usize) < RECORD_HEADER_SIZE
                || total_size as usize > self.core.data_size
                || payload_size == 0
            {
                return Err(RingError::BlockCorrupted);
            }
            if payload_size > max_size {
                return Err(RingError::LabelTooLarge);
            }

            let label = rec.label;
            let source_id = rec.source_id;
            let user_seq = rec.user_seq;
            let mut payload = vec![0u8; payload_size];
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.core.data_base().add(off + RECORD_HEADER_SIZE),
                    payload.as_mut_ptr(),
                    payload_size,
                );
            }

            meta.tail_bytes
                .store(tail + total_size as u64, Ordering::Release);
            meta.published_count.fetch_sub(1, Ordering::Relaxed);

            return Ok(Record {
                label,
                source_id,
                user_seq,
                payload: IpcBuffer::from_vec(payload),
            });
        }
    }

    /// Discard the unread backlog after detecting an orphaned or
    /// stale-epoch writer (spec.md §4.1 "flush_backlog").
    fn flush_backlog(&self) {
        let meta = self.core.metadata();
        let head = meta.head_bytes.load(Ordering::Acquire);
        meta.tail_bytes.store(head, Ordering::Release);
        meta.published_count.store(0, Ordering::Relaxed);
    }

    /// Re-run the re-initialisation procedure after observing corruption.
    pub fn reinit(&self) {
        let meta = self.core.metadata();
        let owner = meta.owner.load(Ordering::Relaxed) as i32;
        self.init_or_reinit(owner);
    }
}
