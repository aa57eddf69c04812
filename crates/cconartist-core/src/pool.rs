//! Fixed set of reusable packet buffers.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    packet_size: usize,
    capacity: usize,
}

impl PoolInner {
    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        buf.resize(self.packet_size, 0);
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < self.capacity {
            free.push(buf);
        }
    }
}

/// Pool of `capacity` buffers of `packet_size` bytes. Cloning shares the
/// pool.
#[derive(Clone)]
pub struct PacketPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPool")
            .field("capacity", &self.inner.capacity)
            .field("packet_size", &self.inner.packet_size)
            .field("available", &self.available())
            .finish()
    }
}

impl PacketPool {
    /// Allocate all buffers up front.
    pub fn new(capacity: usize, packet_size: usize) -> Self {
        let free = (0..capacity).map(|_| vec![0u8; packet_size]).collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                packet_size,
                capacity,
            }),
        }
    }

    /// Take a buffer, or `None` when all are in use.
    pub fn acquire(&self) -> Option<Packet> {
        let buf = self
            .inner
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()?;
        Some(Packet {
            buf,
            len: 0,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Buffers not currently handed out.
    pub fn available(&self) -> usize {
        self.inner.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Total number of buffers.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Size of each buffer.
    pub fn packet_size(&self) -> usize {
        self.inner.packet_size
    }
}

/// A pooled buffer; returns to its pool when dropped.
///
/// Dereferences to the filled part. Receive into [`Packet::buffer_mut`] and
/// then call [`Packet::set_len`].
pub struct Packet {
    buf: Vec<u8>,
    len: usize,
    pool: Arc<PoolInner>,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

impl Packet {
    /// The whole buffer.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Mark the first `len` bytes as filled, clamped to the buffer size.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buf.len());
    }

    /// Copy `data` in, truncating to the buffer size.
    pub fn fill(&mut self, data: &[u8]) {
        let n = data.len().min(self.buf.len());
        self.buf[..n].copy_from_slice(&data[..n]);
        self.len = n;
    }
}

impl Deref for Packet {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl DerefMut for Packet {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
