use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// Fixed set of reusable scratch buffers.
///
/// Buffers come back through [`PooledBuffer`]'s `Drop`, so they return on
/// error paths as well, and a checkout blocks rather than allocating when
/// all of them are lent out.
pub struct BufferPool {
    inner: Mutex<VecDeque<Vec<u8>>>,
    available: Condvar,
}

impl BufferPool {
    /// Create a pool of `count` buffers, each preallocated to `capacity`.
    pub fn new(count: usize, capacity: usize) -> Self {
        let bufs = (0..count.max(1))
            .map(|_| Vec::with_capacity(capacity))
            .collect();
        Self {
            inner: Mutex::new(bufs),
            available: Condvar::new(),
        }
    }

    /// Check out a cleared buffer. Blocks while all buffers are in use.
    pub fn checkout(self: &Arc<Self>) -> PooledBuffer {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(mut buf) = guard.pop_front() {
                buf.clear();
                return PooledBuffer {
                    buf: Some(buf),
                    pool: Arc::clone(self),
                };
            }
            guard = self.available.wait(guard).unwrap();
        }
    }

    /// Buffers currently in the pool.
    pub fn idle(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    fn checkin(&self, buf: Vec<u8>) {
        let mut guard = self.inner.lock().unwrap();
        guard.push_back(buf);
        self.available.notify_one();
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        self.buf.get_or_insert_with(Vec::new)
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.checkin(buf);
        }
    }
}
