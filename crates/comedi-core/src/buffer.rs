//! Byte ring buffer shared between a subdevice and its consumer.
//!
//! # Features
//!
//! - Monotonic absolute producer (`put`) and consumer (`get`) counters
//! - Prepare/commit pairs (relative and absolute) for DMA bookkeeping, where
//!   the data itself is moved outside the lock
//! - `ERROR` and `EOA` events; overrun and underrun raise `ERROR` instead of
//!   corrupting state
//! - Optional end count: the producer side raises `EOA` once the command's
//!   last byte is committed and discards anything past it
//!
//! # Architecture
//!
//! ```text
//!              prepare_put / commit_put            prepare_get / commit_get
//! producer ─────────────────────────────► [ data ] ─────────────────────────► consumer
//!   (AI interrupt, DMA engine)               ▲                     (AO interrupt, DMA engine,
//!                                            │                      user read)
//!                              0 <= put - get <= capacity
//! ```
//!
//! # Thread Safety
//!
//! All bookkeeping sits behind one `parking_lot::Mutex`; a `Condvar` wakes
//! consumers blocked in [`RingBuffer::wait_for`].

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{trace, warn};

use crate::error::{ComediError, Result};

bitflags! {
    /// Buffer events observed by the consumer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufEvents: u32 {
        /// End of acquisition
        const EOA = 0x1;
        /// Acquisition-ending error
        const ERROR = 0x2;
    }
}

impl fmt::Display for BufEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        write!(f, "{}", names.join("|"))
    }
}

/// Side of the buffer a count refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufDirection {
    /// Producer side: free space
    Put,
    /// Consumer side: data available
    Get,
}

struct Inner {
    data: Box<[u8]>,
    prd: u64,
    cns: u64,
    tmp_prd: u64,
    tmp_cns: u64,
    end_count: Option<u64>,
    events: BufEvents,
}

impl Inner {
    fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    fn available(&self) -> u64 {
        self.prd - self.cns
    }

    fn free(&self) -> u64 {
        self.capacity() - self.available()
    }

    /// Copy `src` into storage starting at absolute position `abs`.
    fn copy_in(&mut self, abs: u64, src: &[u8]) {
        let cap = self.data.len();
        let mut pos = (abs % cap as u64) as usize;
        let mut rest = src;
        while !rest.is_empty() {
            let n = rest.len().min(cap - pos);
            self.data[pos..pos + n].copy_from_slice(&rest[..n]);
            rest = &rest[n..];
            pos = (pos + n) % cap;
        }
    }

    fn copy_out(&self, abs: u64, dst: &mut [u8]) {
        let cap = self.data.len();
        let mut pos = (abs % cap as u64) as usize;
        let mut done = 0;
        while done < dst.len() {
            let n = (dst.len() - done).min(cap - pos);
            dst[done..done + n].copy_from_slice(&self.data[pos..pos + n]);
            done += n;
            pos = (pos + n) % cap;
        }
    }

    /// Visit `[abs, abs + len)` as contiguous chunks.
    fn for_each_chunk_mut(&mut self, abs: u64, len: u64, mut f: impl FnMut(&mut [u8])) {
        let cap = self.data.len();
        let mut pos = (abs % cap as u64) as usize;
        let mut left = len as usize;
        while left > 0 {
            let n = left.min(cap - pos);
            f(&mut self.data[pos..pos + n]);
            left -= n;
            pos = (pos + n) % cap;
        }
    }

    fn overrun(&mut self, requested: u64) -> ComediError {
        self.events |= BufEvents::ERROR;
        warn!(requested, free = self.free(), "ring buffer overrun");
        ComediError::BufferOverrun {
            requested: requested as usize,
            free: self.free() as usize,
        }
    }

    fn underrun(&mut self, requested: u64) -> ComediError {
        self.events |= BufEvents::ERROR;
        warn!(
            requested,
            available = self.available(),
            "ring buffer underrun"
        );
        ComediError::BufferUnderrun {
            requested: requested as usize,
            available: self.available() as usize,
        }
    }

    /// Clamp a producer target to the end count.
    fn clamp_to_end(&self, target: u64) -> u64 {
        match self.end_count {
            Some(end) => target.min(end.max(self.prd)),
            None => target,
        }
    }

    fn commit_prd(&mut self, target: u64) {
        self.prd = target;
        self.tmp_prd = self.tmp_prd.max(target);
        if let Some(end) = self.end_count {
            if self.prd >= end && !self.events.contains(BufEvents::EOA) {
                trace!(end, "end of acquisition reached");
                self.events |= BufEvents::EOA;
            }
        }
    }
}

/// Lock-protected byte ring buffer with absolute counters.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl RingBuffer {
    /// Create a buffer. The capacity is rounded up to a multiple of 4 bytes so
    /// 16- and 32-bit samples never straddle the wrap point.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(4).next_multiple_of(4);
        Self {
            inner: Mutex::new(Inner {
                data: vec![0; capacity].into_boxed_slice(),
                prd: 0,
                cns: 0,
                tmp_prd: 0,
                tmp_cns: 0,
                end_count: None,
                events: BufEvents::empty(),
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    fn notify(&self) {
        self.changed.notify_all();
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.lock().data.len()
    }

    /// Rewind counters, drop events and the end count.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.prd = 0;
        inner.cns = 0;
        inner.tmp_prd = 0;
        inner.tmp_cns = 0;
        inner.end_count = None;
        inner.events = BufEvents::empty();
        drop(inner);
        self.notify();
    }

    /// Set the producer byte count at which `EOA` is raised.
    pub fn set_end_count(&self, end: Option<u64>) {
        self.lock().end_count = end;
    }

    /// Producer byte count at which `EOA` is raised.
    pub fn end_count(&self) -> Option<u64> {
        self.lock().end_count
    }

    /// Absolute producer count.
    pub fn put_count(&self) -> u64 {
        self.lock().prd
    }

    /// Absolute consumer count.
    pub fn get_count(&self) -> u64 {
        self.lock().cns
    }

    /// Free space (`Put`) or data available (`Get`), in bytes.
    pub fn count(&self, direction: BufDirection) -> usize {
        let inner = self.lock();
        match direction {
            BufDirection::Put => inner.free() as usize,
            BufDirection::Get => inner.available() as usize,
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Raise events.
    pub fn event(&self, events: BufEvents) {
        self.lock().events |= events;
        self.notify();
    }

    /// Pending events, left in place.
    pub fn events(&self) -> BufEvents {
        self.lock().events
    }

    /// Take and clear pending events.
    pub fn take_events(&self) -> BufEvents {
        std::mem::take(&mut self.lock().events)
    }

    // ------------------------------------------------------------------
    // Producer side
    // ------------------------------------------------------------------

    /// Reserve `len` bytes past the producer count.
    pub fn prepare_put(&self, len: usize) -> Result<()> {
        let target = self.lock().prd + len as u64;
        self.prepare_absput(target)
    }

    /// Reserve up to the absolute producer count `count`.
    pub fn prepare_absput(&self, count: u64) -> Result<()> {
        let mut inner = self.lock();
        if count < inner.prd {
            return Err(ComediError::contract(format!(
                "prepare_absput({count}) behind producer {}",
                inner.prd
            )));
        }
        if count - inner.cns > inner.capacity() {
            let requested = count - inner.prd;
            let err = inner.overrun(requested);
            drop(inner);
            self.notify();
            return Err(err);
        }
        inner.tmp_prd = inner.tmp_prd.max(count);
        Ok(())
    }

    /// Publish `len` prepared bytes.
    pub fn commit_put(&self, len: usize) -> Result<()> {
        let target = self.lock().prd + len as u64;
        self.commit_absput_with(target, |_| {})
    }

    /// Publish prepared bytes up to the absolute count `count`.
    pub fn commit_absput(&self, count: u64) -> Result<()> {
        self.commit_absput_with(count, |_| {})
    }

    /// Publish prepared bytes up to `count`, passing the newly published
    /// region through `munge` first (in contiguous chunks).
    pub fn commit_absput_with(&self, count: u64, munge: impl FnMut(&mut [u8])) -> Result<()> {
        let mut inner = self.lock();
        if count < inner.prd || count > inner.tmp_prd {
            return Err(ComediError::contract(format!(
                "commit_absput({count}) outside prepared window [{}, {}]",
                inner.prd, inner.tmp_prd
            )));
        }
        let target = inner.clamp_to_end(count);
        let start = inner.prd;
        inner.for_each_chunk_mut(start, target - start, munge);
        inner.commit_prd(target);
        drop(inner);
        self.notify();
        Ok(())
    }

    /// Copy `data` in and publish it. Raises `ERROR` if it does not fit.
    pub fn put(&self, data: &[u8]) -> Result<()> {
        self.put_with(data, |_| {})
    }

    /// Like [`RingBuffer::put`], passing the copied bytes through `munge`
    /// before they become visible.
    pub fn put_with(&self, data: &[u8], munge: impl FnMut(&mut [u8])) -> Result<()> {
        let mut inner = self.lock();
        let len = data.len() as u64;
        if len > inner.free() {
            let err = inner.overrun(len);
            drop(inner);
            self.notify();
            return Err(err);
        }
        let start = inner.prd;
        let target = inner.clamp_to_end(start + len);
        let kept = (target - start) as usize;
        inner.copy_in(start, &data[..kept]);
        inner.for_each_chunk_mut(start, kept as u64, munge);
        inner.commit_prd(target);
        drop(inner);
        self.notify();
        Ok(())
    }

    /// Copy as much of `data` as fits (user-side write for output buffers).
    /// Returns the number of bytes accepted.
    pub fn write_with(&self, data: &[u8], munge: impl FnMut(&mut [u8])) -> usize {
        let free = self.count(BufDirection::Put);
        let n = data.len().min(free);
        if n == 0 {
            return 0;
        }
        match self.put_with(&data[..n], munge) {
            Ok(()) => n,
            Err(_) => 0,
        }
    }

    /// Raw store at an absolute position, without touching counters. Used by
    /// DMA engines between prepare and commit.
    pub fn store_at(&self, abs: u64, data: &[u8]) {
        self.lock().copy_in(abs, data);
    }

    // ------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------

    /// Reserve `len` bytes past the consumer count.
    pub fn prepare_get(&self, len: usize) -> Result<()> {
        let target = self.lock().cns + len as u64;
        self.prepare_absget(target)
    }

    /// Reserve up to the absolute consumer count `count`.
    pub fn prepare_absget(&self, count: u64) -> Result<()> {
        let mut inner = self.lock();
        if count < inner.cns {
            return Err(ComediError::contract(format!(
                "prepare_absget({count}) behind consumer {}",
                inner.cns
            )));
        }
        if count > inner.prd {
            let requested = count - inner.cns;
            let err = inner.underrun(requested);
            drop(inner);
            self.notify();
            return Err(err);
        }
        inner.tmp_cns = inner.tmp_cns.max(count);
        Ok(())
    }

    /// Release `len` prepared bytes.
    pub fn commit_get(&self, len: usize) -> Result<()> {
        let target = self.lock().cns + len as u64;
        self.commit_absget(target)
    }

    /// Release prepared bytes up to the absolute count `count`.
    pub fn commit_absget(&self, count: u64) -> Result<()> {
        let mut inner = self.lock();
        if count < inner.cns || count > inner.tmp_cns {
            return Err(ComediError::contract(format!(
                "commit_absget({count}) outside prepared window [{}, {}]",
                inner.cns, inner.tmp_cns
            )));
        }
        inner.cns = count;
        drop(inner);
        self.notify();
        Ok(())
    }

    /// Copy exactly `out.len()` bytes out. Raises `ERROR` on underrun.
    pub fn get(&self, out: &mut [u8]) -> Result<()> {
        let mut inner = self.lock();
        let len = out.len() as u64;
        if len > inner.available() {
            let err = inner.underrun(len);
            drop(inner);
            self.notify();
            return Err(err);
        }
        let start = inner.cns;
        inner.copy_out(start, out);
        inner.cns += len;
        inner.tmp_cns = inner.tmp_cns.max(inner.cns);
        drop(inner);
        self.notify();
        Ok(())
    }

    /// Copy out whatever is available, up to `out.len()` (user-side read).
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut inner = self.lock();
        let n = (out.len() as u64).min(inner.available());
        let start = inner.cns;
        inner.copy_out(start, &mut out[..n as usize]);
        inner.cns += n;
        inner.tmp_cns = inner.tmp_cns.max(inner.cns);
        drop(inner);
        self.notify();
        n as usize
    }

    /// Raw load from an absolute position, without touching counters. Used
    /// by DMA engines feeding output hardware.
    pub fn load_at(&self, abs: u64, out: &mut [u8]) {
        self.lock().copy_out(abs, out);
    }

    // ------------------------------------------------------------------
    // Waiting
    // ------------------------------------------------------------------

    /// Block until `count(direction) >= min_bytes`, an event is pending, or
    /// `timeout` elapses. Returns the count at wake-up.
    pub fn wait_for(&self, direction: BufDirection, min_bytes: usize, timeout: Duration) -> usize {
        let deadline = std::time::Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            let count = match direction {
                BufDirection::Put => inner.free(),
                BufDirection::Get => inner.available(),
            } as usize;
            if count >= min_bytes || !inner.events.is_empty() {
                return count;
            }
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return count;
            }
        }
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &inner.data.len())
            .field("put", &inner.prd)
            .field("get", &inner.cns)
            .field("end_count", &inner.end_count)
            .field("events", &inner.events)
            .finish()
    }
}
