//! # Asynchronous Synchronization Primitives
//!
//! Cooperative mutual and shared exclusion. Waiting never occupies a worker
//! thread: acquisition suspends on a FIFO semaphore until access is granted.

mod async_lock;
mod rw_lock;

pub use async_lock::{AsyncLock, AsyncLockGuard, LockError};
pub use rw_lock::{AsyncReaderWriterLock, ReadHandle, WriteHandle};
