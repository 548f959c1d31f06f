//! Bounded buffer pool shared by the writer's read and compress stages.
//!
//! [`BufferPool`] owns a fixed number of equally sized buffers. Readers
//! fill buffers with input; compressors fill buffers with deflate output.
//! When the pool is exhausted, acquisition blocks until a holder releases,
//! which is what throttles fast readers behind slow compressors.
//!
//! A release hands the freed buffer straight to the longest-waiting
//! acquirer while the pool lock is held, so no waiter can miss a wakeup.
//! Compressors are served before readers, and readers may never take the
//! last `reserve` buffers: compressors free memory, readers only consume it.
//!
//! # Example
//!
//! ```rust
//! use zipkit::pool::{BufferPool, Demand};
//!
//! let pool = BufferPool::new(64 * 1024, 2);
//! let first = pool.acquire(Demand::Reader)?;
//! let second = pool.acquire(Demand::Compressor)?;
//! assert!(pool.try_acquire(Demand::Compressor).is_none());
//!
//! drop(first);
//! assert_eq!(pool.stats().outstanding, 1);
//! # drop(second);
//! # Ok::<(), zipkit::Error>(())
//! ```

use std::collections::VecDeque;
use std::io::{self, Read};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::{Error, Result};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Memory each worker needs in the worst case: three buffers of up to 4 MiB.
pub const PER_THREAD_MINIMUM: u64 = 3 * 4 * MIB;

/// Pool cardinality above which the buffer size is increased.
pub const MAX_BUFFERS: u64 = 1024;

/// Smallest budget accepted for `threads` compressor threads.
pub fn minimum_budget(threads: usize) -> u64 {
    threads.max(1) as u64 * PER_THREAD_MINIMUM
}

/// Buffer size for a memory budget.
///
/// Picks a tier between 64 KiB and 1 MiB, then grows it by half while the
/// budget would still hold more than [`MAX_BUFFERS`] buffers.
pub fn buffer_size_for_budget(budget: u64) -> usize {
    let mut size = match budget {
        b if b < 64 * MIB => 64 * KIB,
        b if b < 128 * MIB => 128 * KIB,
        b if b < 256 * MIB => 256 * KIB,
        b if b < 512 * MIB => 512 * KIB,
        _ => MIB,
    };
    while budget / size > MAX_BUFFERS {
        size = size * 3 / 2;
    }
    size as usize
}

/// Who is asking for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    /// A compressor needs an output buffer. Served first.
    Compressor,
    /// A reader needs an input buffer. Never takes the reserved buffers.
    Reader,
}

/// Usage counters of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Maximum number of buffers.
    pub capacity: usize,
    /// Size of every buffer in bytes.
    pub buffer_size: usize,
    /// Buffers currently held.
    pub outstanding: usize,
    /// Highest number of buffers held at once.
    pub peak_outstanding: usize,
    /// Buffers allocated so far (allocation is lazy).
    pub allocated: usize,
    /// Acquisitions that had to block.
    pub waits: u64,
    /// Of those, reader acquisitions held back by the reserve or an empty pool.
    pub reader_waits: u64,
    /// Releases handed directly to a waiter.
    pub handoffs: u64,
}

enum Grant {
    Pending,
    Granted(Vec<u8>),
    Closed,
}

struct Waiter {
    grant: Mutex<Grant>,
    ready: Condvar,
}

impl Waiter {
    fn new() -> Self {
        Self {
            grant: Mutex::new(Grant::Pending),
            ready: Condvar::new(),
        }
    }

    fn resolve(&self, grant: Grant) {
        *self.grant.lock() = grant;
        self.ready.notify_one();
    }
}

struct PoolState {
    free: Vec<Vec<u8>>,
    compressors: VecDeque<Arc<Waiter>>,
    readers: VecDeque<Arc<Waiter>>,
    closed: bool,
    stats: PoolStats,
}

/// Fixed-capacity pool of byte buffers with blocking acquisition.
pub struct BufferPool {
    buffer_size: usize,
    capacity: usize,
    reserve: usize,
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Creates a pool of `capacity` buffers of `buffer_size` bytes.
    pub fn new(buffer_size: usize, capacity: usize) -> Arc<Self> {
        Self::with_reserve(buffer_size, capacity, 0)
    }

    /// Creates a pool where readers leave `reserve` buffers for compressors.
    pub fn with_reserve(buffer_size: usize, capacity: usize, reserve: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            buffer_size,
            capacity,
            reserve: reserve.min(capacity - 1),
            state: Mutex::new(PoolState {
                free: Vec::new(),
                compressors: VecDeque::new(),
                readers: VecDeque::new(),
                closed: false,
                stats: PoolStats {
                    capacity,
                    buffer_size,
                    ..PoolStats::default()
                },
            }),
        })
    }

    /// Sizes a pool for `budget` bytes and `threads` compressors.
    ///
    /// One buffer per thread is reserved for compressor output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientBudget`] if the budget is below
    /// [`minimum_budget`].
    pub fn for_budget(budget: u64, threads: usize) -> Result<Arc<Self>> {
        let minimum = minimum_budget(threads);
        if budget < minimum {
            return Err(Error::InsufficientBudget { budget, minimum });
        }
        let buffer_size = buffer_size_for_budget(budget);
        let capacity = (budget / buffer_size as u64) as usize;
        log::debug!(
            "buffer pool: {capacity} buffers of {buffer_size} bytes for a {budget} byte budget"
        );
        Ok(Self::with_reserve(buffer_size, capacity, threads.max(1)))
    }

    /// Size of every buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Maximum number of buffers.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers kept back from readers.
    pub fn reserve(&self) -> usize {
        self.reserve
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats
    }

    /// Number of blocked acquirers as `(compressors, readers)`.
    pub fn waiting(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.compressors.len(), state.readers.len())
    }

    /// Acquires a buffer, blocking while none is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the pool is closed before or while
    /// waiting.
    pub fn acquire(self: &Arc<Self>, demand: Demand) -> Result<PooledBuffer> {
        let waiter = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Cancelled);
            }
            if let Some(buf) = self.take_locked(&mut state, demand) {
                return Ok(self.wrap(buf));
            }
            state.stats.waits += 1;
            if demand == Demand::Reader {
                state.stats.reader_waits += 1;
            }
            let waiter = Arc::new(Waiter::new());
            match demand {
                Demand::Compressor => state.compressors.push_back(Arc::clone(&waiter)),
                Demand::Reader => state.readers.push_back(Arc::clone(&waiter)),
            }
            waiter
        };

        let mut grant = waiter.grant.lock();
        loop {
            match std::mem::replace(&mut *grant, Grant::Pending) {
                Grant::Granted(buf) => return Ok(self.wrap(buf)),
                Grant::Closed => return Err(Error::Cancelled),
                Grant::Pending => waiter.ready.wait(&mut grant),
            }
        }
    }

    /// Acquires a buffer if one is available right now.
    pub fn try_acquire(self: &Arc<Self>, demand: Demand) -> Option<PooledBuffer> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        self.take_locked(&mut state, demand)
            .map(|buf| self.wrap(buf))
    }

    /// Closes the pool. Blocked and future acquisitions fail with
    /// [`Error::Cancelled`]; outstanding buffers are freed as they return.
    pub fn close(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.closed = true;
        state.free.clear();
        for waiter in state.compressors.drain(..).chain(state.readers.drain(..)) {
            waiter.resolve(Grant::Closed);
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn take_locked(&self, state: &mut PoolState, demand: Demand) -> Option<Vec<u8>> {
        let available = self.capacity - state.stats.outstanding;
        let floor = match demand {
            Demand::Compressor => 0,
            Demand::Reader => self.reserve,
        };
        if available <= floor {
            return None;
        }
        state.stats.outstanding += 1;
        state.stats.peak_outstanding = state.stats.peak_outstanding.max(state.stats.outstanding);
        let buf = match state.free.pop() {
            Some(buf) => buf,
            None => {
                state.stats.allocated += 1;
                Vec::with_capacity(self.buffer_size)
            }
        };
        Some(buf)
    }

    fn wrap(self: &Arc<Self>, buf: Vec<u8>) -> PooledBuffer {
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut state = self.state.lock();
        if !state.closed {
            if let Some(waiter) = state.compressors.pop_front() {
                state.stats.handoffs += 1;
                waiter.resolve(Grant::Granted(buf));
                return;
            }
            // A reader may take this buffer only if it would be allowed to
            // were the buffer back in the free list
            let available = self.capacity - state.stats.outstanding + 1;
            if available > self.reserve {
                if let Some(waiter) = state.readers.pop_front() {
                    state.stats.handoffs += 1;
                    waiter.resolve(Grant::Granted(buf));
                    return;
                }
            }
        }
        state.stats.outstanding -= 1;
        if !state.closed {
            state.free.push(buf);
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("capacity", &self.capacity)
            .field("reserve", &self.reserve)
            .finish_non_exhaustive()
    }
}

/// A buffer borrowed from a [`BufferPool`], returned on drop.
///
/// The buffer dereferences to a `Vec<u8>` whose capacity is the pool's
/// buffer size. Code writing into it must stay within that capacity.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// Bytes that still fit before the buffer is full.
    pub fn remaining_capacity(&self) -> usize {
        self.pool.buffer_size.saturating_sub(self.buf.len())
    }

    /// Returns true if no more bytes fit.
    pub fn is_full(&self) -> bool {
        self.remaining_capacity() == 0
    }

    /// Replaces the contents with up to one buffer's worth from `reader`.
    ///
    /// Returns the number of bytes read; fewer than the buffer size only at
    /// end of input.
    pub fn fill_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let size = self.pool.buffer_size;
        self.buf.resize(size, 0);
        let mut filled = 0;
        while filled < size {
            match reader.read(&mut self.buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buf.clear();
                    return Err(e);
                }
            }
        }
        self.buf.truncate(filled);
        Ok(filled)
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn wait_for_waiters(pool: &BufferPool, expected: (usize, usize)) {
        for _ in 0..500 {
            if pool.waiting() == expected {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("waiters never reached {expected:?}, have {:?}", pool.waiting());
    }

    #[test]
    fn test_buffer_size_tiers() {
        assert_eq!(buffer_size_for_budget(12 * MIB), 64 * 1024);
        assert_eq!(buffer_size_for_budget(100 * MIB), 128 * 1024);
        assert_eq!(buffer_size_for_budget(200 * MIB), 256 * 1024);
        assert_eq!(buffer_size_for_budget(300 * MIB), 512 * 1024);
        assert_eq!(buffer_size_for_budget(1024 * MIB), 1024 * 1024);
    }

    #[test]
    fn test_buffer_count_capped() {
        for budget in [4096 * MIB, 16 * 1024 * MIB] {
            let size = buffer_size_for_budget(budget) as u64;
            assert!(budget / size <= MAX_BUFFERS, "{budget} / {size}");
            assert!(size > MIB);
        }
    }

    #[test]
    fn test_insufficient_budget() {
        let err = BufferPool::for_budget(minimum_budget(4) - 1, 4).unwrap_err();
        assert!(matches!(err, Error::InsufficientBudget { .. }));

        let pool = BufferPool::for_budget(minimum_budget(4), 4).unwrap();
        assert_eq!(pool.buffer_size(), 64 * 1024);
        assert_eq!(pool.capacity(), 4 * 3 * 64);
        assert_eq!(pool.reserve(), 4);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let pool = BufferPool::new(16, 3);
        let held: Vec<_> = (0..3)
            .map(|_| pool.try_acquire(Demand::Compressor).unwrap())
            .collect();
        assert!(pool.try_acquire(Demand::Compressor).is_none());
        assert_eq!(pool.stats().outstanding, 3);
        drop(held);
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.peak_outstanding, 3);
        assert_eq!(stats.allocated, 3);
    }

    #[test]
    fn test_buffers_are_reused() {
        let pool = BufferPool::new(16, 2);
        drop(pool.acquire(Demand::Reader).unwrap());
        drop(pool.acquire(Demand::Reader).unwrap());
        assert_eq!(pool.stats().allocated, 1);
    }

    #[test]
    fn test_reader_reserve() {
        let pool = BufferPool::with_reserve(16, 2, 1);
        let _reader = pool.try_acquire(Demand::Reader).unwrap();
        assert!(pool.try_acquire(Demand::Reader).is_none());
        assert!(pool.try_acquire(Demand::Compressor).is_some());
    }

    #[test]
    fn test_release_unblocks_exactly_one_waiter() {
        let pool = BufferPool::new(16, 1);
        let held = pool.acquire(Demand::Reader).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let pool = Arc::clone(&pool);
                let tx = tx.clone();
                thread::spawn(move || {
                    let buf = pool.acquire(Demand::Reader).unwrap();
                    tx.send(i).unwrap();
                    // Keep the buffer until told to let go
                    thread::sleep(Duration::from_millis(100));
                    drop(buf);
                })
            })
            .collect();

        wait_for_waiters(&pool, (0, 2));
        assert!(rx.try_recv().is_err());

        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(pool.stats().outstanding, 1);

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.handoffs, 2);
        assert_eq!(stats.peak_outstanding, 1);
    }

    #[test]
    fn test_compressors_served_first() {
        let pool = BufferPool::new(16, 1);
        let held = pool.acquire(Demand::Compressor).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();

        let reader = {
            let pool = Arc::clone(&pool);
            let tx = tx.clone();
            thread::spawn(move || {
                let _buf = pool.acquire(Demand::Reader).unwrap();
                tx.send(Demand::Reader).unwrap();
            })
        };
        wait_for_waiters(&pool, (0, 1));
        let compressor = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let _buf = pool.acquire(Demand::Compressor).unwrap();
                tx.send(Demand::Compressor).unwrap();
            })
        };
        wait_for_waiters(&pool, (1, 1));

        drop(held);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Demand::Compressor);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Demand::Reader);
        compressor.join().unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn test_close_cancels_waiters() {
        let pool = BufferPool::new(16, 1);
        let held = pool.acquire(Demand::Compressor).unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire(Demand::Compressor).map(|_| ()))
        };
        wait_for_waiters(&pool, (1, 0));

        pool.close();
        assert!(matches!(waiter.join().unwrap(), Err(Error::Cancelled)));
        assert!(matches!(pool.acquire(Demand::Reader), Err(Error::Cancelled)));
        drop(held);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_close_cancels_both_wait_lists() {
        let pool = BufferPool::with_reserve(16, 2, 1);
        let held = [
            pool.acquire(Demand::Compressor).unwrap(),
            pool.acquire(Demand::Compressor).unwrap(),
        ];
        let spawn = |demand| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire(demand).map(|_| ()))
        };
        let compressor = spawn(Demand::Compressor);
        let reader = spawn(Demand::Reader);
        wait_for_waiters(&pool, (1, 1));
        let stats = pool.stats();
        assert_eq!((stats.waits, stats.reader_waits), (2, 1));

        pool.close();
        assert_eq!(pool.waiting(), (0, 0));
        assert!(matches!(compressor.join().unwrap(), Err(Error::Cancelled)));
        assert!(matches!(reader.join().unwrap(), Err(Error::Cancelled)));
        drop(held);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_fill_from() {
        let pool = BufferPool::new(4, 1);
        let mut buf = pool.acquire(Demand::Reader).unwrap();
        let mut input = &b"abcdef"[..];
        assert_eq!(buf.fill_from(&mut input).unwrap(), 4);
        assert_eq!(&buf[..], b"abcd");
        assert!(buf.is_full());
        assert_eq!(buf.fill_from(&mut input).unwrap(), 2);
        assert_eq!(&buf[..], b"ef");
        assert_eq!(buf.remaining_capacity(), 2);
    }
}
