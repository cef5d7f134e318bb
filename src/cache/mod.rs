//! Fixed-capacity response cache region: a single-process `AtomicU8` CAS
//! lock guarding a typed body. Three independent instances exist: local
//! metrics, bridge text, bridge JSON (see [`crate::bridge`]).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use snafu::Snafu;

const FREE: u8 = 0;
const IN_USE: u8 = 1;

#[derive(Debug, Snafu)]
pub enum CacheError {
    #[snafu(display("could not acquire cache lock within {:?}", timeout))]
    LockTimeout { timeout: Duration },
}

struct CacheBody {
    buffer: Vec<u8>,
    length: usize,
    capacity: usize,
    expiry: u64,
}

/// A single cache region. Safe to share behind an `Arc`; all access to the
/// body is mediated by a compare-and-swap on the `AtomicU8` lock.
pub struct CacheRegion {
    lock: AtomicU8,
    body: UnsafeCell<CacheBody>,
}

// SAFETY: `body` is only ever read or written while `lock` has been
// successfully CAS'd from FREE to IN_USE by the accessing task, and is
// released (stored back to FREE) before any other task can observe it.
unsafe impl Sync for CacheRegion {}
unsafe impl Send for CacheRegion {}

/// RAII guard returned by [`CacheRegion::acquire`]; releases the lock on
/// drop so a panicking or early-returning caller can't leave it held.
pub struct CacheGuard<'a> {
    region: &'a CacheRegion,
}

impl Drop for CacheGuard<'_> {
    fn drop(&mut self) {
        self.region.lock.store(FREE, Ordering::Release);
    }
}

impl CacheRegion {
    pub fn new(capacity: usize) -> Self {
        CacheRegion {
            lock: AtomicU8::new(FREE),
            body: UnsafeCell::new(CacheBody {
                buffer: vec![0u8; capacity],
                length: 0,
                capacity,
                expiry: 0,
            }),
        }
    }

    /// Spin-CAS the lock from free to in-use, backing off briefly between
    /// attempts, until `timeout` elapses.
    pub async fn acquire(&self, timeout: Duration) -> Result<CacheGuard<'_>, CacheError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self
                .lock
                .compare_exchange(FREE, IN_USE, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(CacheGuard { region: self });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CacheError::LockTimeout { timeout });
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// `expiry != 0 && length > 0 && now <= expiry`.
    pub fn is_valid(&self, guard: &CacheGuard<'_>) -> bool {
        debug_assert!(std::ptr::eq(guard.region, self));
        let body = unsafe { &*self.body.get() };
        body.expiry != 0 && body.length > 0 && now_secs() <= body.expiry
    }

    /// Zero the buffer and clear the expiry.
    pub fn invalidate(&self, _guard: &CacheGuard<'_>) {
        let body = unsafe { &mut *self.body.get() };
        body.buffer[..body.length].fill(0);
        body.length = 0;
        body.expiry = 0;
    }

    /// Append `bytes`. If it would overflow capacity, the cache is
    /// invalidated instead (a single oversize body disables caching of that
    /// scrape without corrupting prior state) and `false` is returned.
    pub fn append(&self, guard: &CacheGuard<'_>, bytes: &[u8]) -> bool {
        let body = unsafe { &mut *self.body.get() };
        if body.length + bytes.len() >= body.capacity {
            body.buffer[..body.length].fill(0);
            body.length = 0;
            body.expiry = 0;
            return false;
        }
        body.buffer[body.length..body.length + bytes.len()].copy_from_slice(bytes);
        body.length += bytes.len();
        true
    }

    /// Set `expiry = now + max_age`. Returns `false` (caching disabled)
    /// when `max_age` is zero.
    pub fn finalize(&self, _guard: &CacheGuard<'_>, max_age: Duration) -> bool {
        if max_age.is_zero() {
            return false;
        }
        let body = unsafe { &mut *self.body.get() };
        body.expiry = now_secs() + max_age.as_secs();
        true
    }

    /// The currently cached body, if valid.
    pub fn body(&self, guard: &CacheGuard<'_>) -> Option<Vec<u8>> {
        if !self.is_valid(guard) {
            return None;
        }
        let body = unsafe { &*self.body.get() };
        Some(body.buffer[..body.length].to_vec())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
