use bytes::BytesMut;
use std::sync::Mutex;
use tracing::{debug, trace};

/// Receive buffers are checked out for a single datagram and returned afterwards, so no two
///  datagrams ever share a buffer.
pub struct BufferPool {
    buf_size: usize,
    buffers: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new(buf_size: usize, max_pool_size: usize) -> Self {
        BufferPool {
            buf_size,
            buffers: Mutex::new(Vec::with_capacity(max_pool_size)),
        }
    }

    /// returns a zero-filled buffer of the pool's buffer size, ready to receive into
    pub fn get_from_pool(&self) -> BytesMut {
        let mut result = self._get_from_pool();
        result.resize(self.buf_size, 0);
        result
    }

    fn _get_from_pool(&self) -> BytesMut {
        {
            let mut buffers = self.buffers.lock().unwrap();
            if let Some(buffer) = buffers.pop() {
                trace!("returning buffer from pool");
                return buffer;
            }
        }

        debug!("no buffer in pool: creating new buffer");
        BytesMut::with_capacity(self.buf_size)
    }

    pub fn return_to_pool(&self, mut buffer: BytesMut) {
        if buffer.capacity() < self.buf_size {
            debug!("returned buffer lost capacity: discarding it");
            return;
        }

        buffer.clear();

        let mut buffers = self.buffers.lock().unwrap();
        if buffers.capacity() > buffers.len() {
            trace!("returning buffer to pool");
            buffers.push(buffer);
        }
        else {
            debug!("pool is full: discarding returned buffer");
        }
    }
}
