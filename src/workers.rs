// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Send-worker pool and receive-worker loops (spec.md §4.6/§4.7). Grounded on
// examples/original_source/eROIL/src/comm/connection_manager.cpp's worker
// plumbing. The wake-up primitive is the in-process equivalent of
// libipc::waiter::Waiter: a Condvar-backed counting semaphore, used because
// workers here live in the same process as the router rather than across a
// shared-memory boundary.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::iosb::{FcHeader, SendIosb, Timestamp};
use crate::net::{self, TcpSession};
use crate::ring::RingWriter;
use crate::router::Router;

/// In-process counting semaphore, the non-shared-memory analogue of
/// `libipc::waiter::Waiter`.
pub struct Semaphore {
    count: Mutex<u64>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cv.notify_one();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

/// A fanned-out send job: one publish, delivered to every local and remote
/// subscriber snapshotted at `build_send_job` time (spec.md §4.5/§4.6).
pub struct SendJob {
    pub source_id: i32,
    pub label: i32,
    pub send_buffer: Vec<u8>,
    pub seq: u64,
    pub recv_offset: u32,
    pub local_recvrs: Vec<Arc<RingWriter>>,
    pub remote_recvrs: Vec<Arc<TcpSession>>,
    pub shm_fail_count: AtomicUsize,
    pub tcp_fail_count: AtomicUsize,
    pending_sends: AtomicUsize,
    finalize: Mutex<Option<Box<dyn FnOnce(SendIosb) + Send>>>,
}

impl SendJob {
    pub fn new(
        source_id: i32,
        label: i32,
        send_buffer: Vec<u8>,
        seq: u64,
        recv_offset: u32,
        local_recvrs: Vec<Arc<RingWriter>>,
        remote_recvrs: Vec<Arc<TcpSession>>,
        finalize: Box<dyn FnOnce(SendIosb) + Send>,
    ) -> Self {
        let pending = local_recvrs.len() + remote_recvrs.len();
        Self {
            source_id,
            label,
            send_buffer,
            seq,
            recv_offset,
            local_recvrs,
            remote_recvrs,
            shm_fail_count: AtomicUsize::new(0),
            tcp_fail_count: AtomicUsize::new(0),
            pending_sends: AtomicUsize::new(pending),
            finalize: Mutex::new(Some(finalize)),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending_sends.load(Ordering::Acquire)
    }

    /// Decrements the outstanding send count; the completer that brings it to
    /// zero writes the send IOSB (spec.md §4.6 "last completer writes the
    /// IOSB"). Safe to call more than `pending_count()` times only once, by
    /// design — `build_send_job` calls this directly when there are no
    /// subscribers at all, since no worker will ever touch the job.
    pub fn complete_one(&self) {
        let remaining = self.pending_sends.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            let failed = self.shm_fail_count.load(Ordering::Relaxed) > 0
                || self.tcp_fail_count.load(Ordering::Relaxed) > 0;
            let iosb = SendIosb {
                status: if failed { -1 } else { 0 },
                header_valid: 1,
                reserve2: crate::iosb::SEND_SENTINEL,
                msg_addr: self.send_buffer.as_ptr() as u64,
                msg_size: self.send_buffer.len() as u32,
                fc_header: FcHeader {
                    source_id: self.source_id,
                    destination_id: self.label,
                    parameter: 0,
                },
                timestamp: Timestamp::now(),
            };
            if let Some(f) = self.finalize.lock().unwrap().take() {
                f(iosb);
            }
        }
    }
}

/// The two send-worker kinds share structure; a `Plan` factors out what
/// differs (spec.md §9 "dynamic dispatch across transports"), replacing the
/// source's template specialisation with a trait.
pub trait Plan {
    type Receiver: Clone;

    fn receivers(job: &SendJob) -> Vec<Self::Receiver>;
    fn fail_count(job: &SendJob) -> &AtomicUsize;
    fn send_one(receiver: &Self::Receiver, job: &SendJob) -> bool;
}

pub struct ShmSendPlan;

impl Plan for ShmSendPlan {
    type Receiver = Arc<RingWriter>;

    fn receivers(job: &SendJob) -> Vec<Self::Receiver> {
        job.local_recvrs.clone()
    }

    fn fail_count(job: &SendJob) -> &AtomicUsize {
        &job.shm_fail_count
    }

    fn send_one(receiver: &Self::Receiver, job: &SendJob) -> bool {
        match receiver.send(job.source_id, job.label, job.seq, &job.send_buffer) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("shm send to label {} failed: {e}", job.label);
                false
            }
        }
    }
}

pub struct TcpSendPlan;

impl Plan for TcpSendPlan {
    type Receiver = Arc<TcpSession>;

    fn receivers(job: &SendJob) -> Vec<Self::Receiver> {
        job.remote_recvrs.clone()
    }

    fn fail_count(job: &SendJob) -> &AtomicUsize {
        &job.tcp_fail_count
    }

    fn send_one(receiver: &Self::Receiver, job: &SendJob) -> bool {
        let header = crate::wire::LabelHeader::data(
            job.source_id,
            job.label,
            job.send_buffer.len() as u32,
            job.recv_offset,
        );
        match receiver.send_frame(&header, &job.send_buffer) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("tcp send to peer {} failed: {e}", receiver.peer_id());
                false
            }
        }
    }
}

/// Bounded FIFO of `SendJob`s plus a counting semaphore, one per transport
/// kind (spec.md §4.6).
pub struct SendWorker<P: Plan> {
    queue: Mutex<VecDeque<Arc<SendJob>>>,
    sem: Semaphore,
    stop: AtomicBool,
    soft_cap: usize,
    _plan: PhantomData<P>,
}

impl<P: Plan> SendWorker<P> {
    pub fn new(soft_cap: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            sem: Semaphore::new(),
            stop: AtomicBool::new(false),
            soft_cap,
            _plan: PhantomData,
        }
    }

    /// Enqueue after `stop` is rejected silently. On soft-cap overflow the
    /// job is dropped, its failure counter for this plan bumped, and
    /// `complete_one` called so the IOSB still finalizes (spec.md §4.6
    /// "Backpressure").
    pub fn enqueue(&self, job: Arc<SendJob>) {
        if self.stop.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.soft_cap {
            drop(queue);
            log::warn!("send worker queue full, dropping job for label {}", job.label);
            P::fail_count(&job).fetch_add(1, Ordering::Relaxed);
            job.complete_one();
            return;
        }
        queue.push_back(job);
        drop(queue);
        self.sem.post();
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.sem.post();
    }

    fn pop(&self) -> Option<Arc<SendJob>> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Dispatch loop (spec.md §4.6). Run this on a dedicated thread.
    pub fn run(&self) {
        loop {
            self.sem.wait();
            if self.stop.load(Ordering::Acquire) {
                let mut queue = self.queue.lock().unwrap();
                while let Some(job) = queue.pop_front() {
                    job.complete_one();
                }
                return;
            }
            while let Some(job) = self.pop() {
                for receiver in P::receivers(&job) {
                    if !P::send_one(&receiver, &job) {
                        P::fail_count(&job).fetch_add(1, Ordering::Relaxed);
                    }
                }
                job.complete_one();
            }
        }
    }
}

/// Socket receive worker: one per peer TCP session (spec.md §4.7). Runs on a
/// dedicated thread until `stop` is raised or the socket errors out; the
/// connection manager's monitor observes the dead session and restarts it.
pub fn run_socket_receive_worker(session: Arc<TcpSession>, router: Arc<Router>, stop: Arc<AtomicBool>) {
    let mut stream = match session.try_clone_stream() {
        Ok(s) => s,
        Err(e) => {
            log::warn!("could not clone stream for peer {}: {e}", session.peer_id());
            session.mark_disconnected();
            return;
        }
    };
    while !stop.load(Ordering::Acquire) {
        let header = match net::recv_header(&mut stream) {
            Ok(h) => h,
            Err(e) => {
                log::warn!("recv from peer {} failed: {e}", session.peer_id());
                session.mark_disconnected();
                return;
            }
        };
        if header.flags & crate::wire::FLAG_PING != 0 {
            continue;
        }
        if header.flags & crate::wire::FLAG_DATA != 0 {
            let mut buf = vec![0u8; header.data_size as usize];
            if let Err(e) = net::recv_exact(&mut stream, &mut buf) {
                log::warn!("recv payload from peer {} failed: {e}", session.peer_id());
                session.mark_disconnected();
                return;
            }
            router.distribute_recvd_label(header.source_id, header.label, &buf, header.recv_offset);
        }
    }
}

/// Shared-memory receive worker: exactly one per process (spec.md §4.7).
pub fn run_shm_receive_worker(
    reader: Arc<crate::ring::RingReader>,
    router: Arc<Router>,
    stop: Arc<AtomicBool>,
) {
    const MAX_RECORD_SIZE: usize = 1024 * 1024;
    const POLL_TIMEOUT_MS: u64 = 500;
    while !stop.load(Ordering::Acquire) {
        match reader.wait(Some(POLL_TIMEOUT_MS)) {
            Ok(_) => {}
            Err(e) => {
                log::warn!("shm wait failed: {e}");
                continue;
            }
        }
        if stop.load(Ordering::Acquire) {
            return;
        }
        match reader.recv(MAX_RECORD_SIZE) {
            Ok(record) => {
                router.distribute_recvd_label(record.source_id, record.label, record.payload.data(), 0);
            }
            Err(crate::error::RingError::NoRecords) | Err(crate::error::RingError::NotYetPublished) => {
                continue;
            }
            Err(e) => {
                log::warn!("shm ring error, reinitializing: {e}");
                reader.reinit();
            }
        }
    }
}
