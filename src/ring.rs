//! Circular capture buffer
//!
//! A fixed-capacity byte ring with one producer (the transfer completion
//! path) and one consumer (the host audio subsystem). Cursors are absolute,
//! monotonically increasing byte counts; positions inside the ring are the
//! cursors modulo the configured buffer size.
//!
//! The storage is preallocated once for the largest buffer the hardware
//! supports. `configure()` selects the runtime buffer and period sizes
//! within that storage, and `release()` frees it when the session closes.
//!
//! Producer and consumer never wait on each other. Every byte is an atomic
//! cell written with relaxed stores; the release store of the producer
//! cursor publishes them.

use std::sync::{
    atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering},
    PoisonError, RwLock, RwLockReadGuard,
};

use crate::error::{Error, Result};

pub struct CaptureRing {
    /// Producer and consumer only take read guards. `release()` is the only
    /// writer, and runs once no transfer is in flight.
    storage: RwLock<Box<[AtomicU8]>>,
    frame_bytes: usize,
    capacity: AtomicUsize,
    period_bytes: AtomicUsize,
    /// Producer cursor
    written: AtomicU64,
    /// Consumer cursor
    read: AtomicU64,
    /// Period boundaries already signalled
    signalled: AtomicU64,
}

fn allocate(len: usize) -> Result<Box<[AtomicU8]>> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(len)
        .map_err(|_| Error::OutOfResources)?;
    storage.resize_with(len, || AtomicU8::new(0));
    Ok(storage.into_boxed_slice())
}

fn store_bytes(dst: &[AtomicU8], src: &[u8]) {
    for (slot, &byte) in dst.iter().zip(src) {
        slot.store(byte, Ordering::Relaxed);
    }
}

fn load_bytes(dst: &mut [u8], src: &[AtomicU8]) {
    for (byte, slot) in dst.iter_mut().zip(src) {
        *byte = slot.load(Ordering::Relaxed);
    }
}

impl CaptureRing {
    /// Allocate storage for up to `max_bytes`
    ///
    /// The ring starts configured to use all of its storage, with one
    /// period spanning the whole buffer.
    pub fn new(max_bytes: usize, frame_bytes: usize) -> Result<Self> {
        if max_bytes == 0 || frame_bytes == 0 {
            return Err(Error::OutOfResources);
        }
        Ok(CaptureRing {
            storage: RwLock::new(allocate(max_bytes)?),
            frame_bytes,
            capacity: AtomicUsize::new(max_bytes),
            period_bytes: AtomicUsize::new(max_bytes),
            written: AtomicU64::new(0),
            read: AtomicU64::new(0),
            signalled: AtomicU64::new(0),
        })
    }

    fn storage(&self) -> RwLockReadGuard<'_, Box<[AtomicU8]>> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select the runtime buffer and period sizes, and reset all cursors
    ///
    /// Must not race the producer. The capture state machine only calls this
    /// while no transfer is in flight.
    pub fn configure(&self, buffer_bytes: usize, period_bytes: usize) -> Result<()> {
        let max = self.max_bytes();
        if buffer_bytes == 0 || buffer_bytes > max || period_bytes == 0 {
            return Err(Error::InvalidParams {
                buffer_bytes,
                period_bytes,
            });
        }
        self.capacity.store(buffer_bytes, Ordering::Release);
        self.period_bytes.store(period_bytes, Ordering::Release);
        self.reset();
        Ok(())
    }

    /// Move every cursor back to zero
    pub fn reset(&self) {
        self.written.store(0, Ordering::Release);
        self.read.store(0, Ordering::Release);
        self.signalled.store(0, Ordering::Release);
    }

    /// Free the storage
    ///
    /// Afterwards, writes are discarded, reads return nothing, and
    /// `configure()` fails. Must not race the producer.
    pub fn release(&self) {
        let storage = core::mem::take(
            &mut *self.storage.write().unwrap_or_else(PoisonError::into_inner),
        );
        self.reset();
        drop(storage);
    }

    /// Size of the preallocated storage
    pub fn max_bytes(&self) -> usize {
        self.storage().len()
    }

    /// Runtime buffer size, in bytes
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    pub fn period_bytes(&self) -> usize {
        self.period_bytes.load(Ordering::Acquire)
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Absolute producer cursor, in bytes
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Producer position, in frames
    ///
    /// Never blocks: two atomic loads.
    pub fn position(&self) -> usize {
        let capacity = self.capacity() as u64;
        (self.written() % capacity) as usize / self.frame_bytes
    }

    /// Unread bytes, saturating at the buffer size
    pub fn available(&self) -> usize {
        let unread = self
            .written()
            .saturating_sub(self.read.load(Ordering::Acquire));
        unread.min(self.capacity() as u64) as usize
    }

    /// Bytes the producer may write without overwriting unread data
    pub fn free(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Append `data` at the producer cursor, wrapping at the buffer size
    ///
    /// Producer only. Returns the new absolute producer cursor. A chunk
    /// larger than the buffer keeps only its last `capacity()` bytes, but
    /// the cursor still advances by the full length.
    pub fn write(&self, data: &[u8]) -> u64 {
        let capacity = self.capacity();
        let start = self.written.load(Ordering::Relaxed);

        let storage = self.storage();
        if storage.len() >= capacity {
            let skip = data.len().saturating_sub(capacity);
            let chunk = &data[skip..];
            let offset = ((start + skip as u64) % capacity as u64) as usize;
            let tail = chunk.len().min(capacity - offset);
            store_bytes(&storage[offset..offset + tail], &chunk[..tail]);
            store_bytes(&storage[..chunk.len() - tail], &chunk[tail..]);
        }
        drop(storage);

        let cursor = start + data.len() as u64;
        self.written.store(cursor, Ordering::Release);
        cursor
    }

    /// Count the period boundaries crossed since the last call
    ///
    /// Producer only. A write spanning several periods reports each of
    /// them.
    pub fn take_elapsed_periods(&self) -> u64 {
        let period = self.period_bytes() as u64;
        let boundaries = self.written() / period;
        let previous = self.signalled.swap(boundaries, Ordering::AcqRel);
        boundaries.saturating_sub(previous)
    }

    /// Copy unread bytes into `dst`, advancing the consumer cursor
    ///
    /// Consumer only. If the producer lapped the consumer, the oldest
    /// overwritten bytes are skipped. A `reset()` that lands while copying
    /// wins: the copy is discarded and zero is returned. Returns the number
    /// of bytes copied.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let capacity = self.capacity() as u64;
        let written = self.written();
        let observed = self.read.load(Ordering::Acquire);
        let start = observed.min(written).max(written.saturating_sub(capacity));

        let len = dst.len().min((written - start) as usize);
        let storage = self.storage();
        if storage.len() < capacity as usize {
            return 0;
        }
        let offset = (start % capacity) as usize;
        let tail = len.min(capacity as usize - offset);
        load_bytes(&mut dst[..tail], &storage[offset..offset + tail]);
        load_bytes(&mut dst[tail..len], &storage[..len - tail]);
        drop(storage);

        match self.read.compare_exchange(
            observed,
            start + len as u64,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => len,
            Err(_) => 0,
        }
    }
}
