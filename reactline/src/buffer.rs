//! Shared pool of connection buffers.
//!
//! Every connection takes two buffers (read and write side) on open and
//! returns them on the close path. Buffers keep their grown capacity across
//! reuse; the free list is capped so a burst of connections cannot pin
//! memory forever.

use std::sync::Mutex;

use bytes::BytesMut;

/// Upper bound on pooled buffers; beyond this, returned buffers are dropped.
const MAX_POOLED: usize = 256;

static POOL: Mutex<Vec<BytesMut>> = Mutex::new(Vec::new());

/// Take a cleared buffer from the pool, or allocate a fresh one.
pub(crate) fn take() -> BytesMut {
    crate::util::lock(&POOL).pop().unwrap_or_default()
}

/// Return a buffer to the pool.
pub(crate) fn put(mut buf: BytesMut) {
    buf.clear();
    let mut pool = crate::util::lock(&POOL);
    if pool.len() < MAX_POOLED {
        pool.push(buf);
    }
}
