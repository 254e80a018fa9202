//! Shared/exclusive lock built from one exclusive gate and a reader count.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Default)]
struct ReaderState {
    readers: usize,
    gate_permit: Option<OwnedSemaphorePermit>,
}

#[derive(Debug)]
struct Shared {
    /// Exclusive gate held by the sole writer, or by the reader group.
    gate: Arc<Semaphore>,
    /// Serializes the reader entry section so the first reader can take the
    /// gate on behalf of all readers before later readers are admitted.
    entry: AsyncMutex<()>,
    state: Mutex<ReaderState>,
}

/// A cooperative reader-writer lock.
///
/// The first reader to arrive acquires the underlying exclusive gate on
/// behalf of all readers; each release decrements the count and the last
/// reader out releases the gate. Writers take the gate directly, excluding
/// all readers and any other writer.
///
/// This lock favors readers: while readers hold the gate, newly arriving
/// readers are admitted immediately, so a continuous reader stream can delay
/// a waiting writer indefinitely. Intended for frequently read, rarely
/// written shared state.
#[derive(Debug, Clone)]
pub struct AsyncReaderWriterLock {
    shared: Arc<Shared>,
}

impl AsyncReaderWriterLock {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                gate: Arc::new(Semaphore::new(1)),
                entry: AsyncMutex::new(()),
                state: Mutex::new(ReaderState::default()),
            }),
        }
    }

    /// Acquire shared access. Suspends while a writer holds the gate.
    ///
    /// The reader count is only incremented once the gate is actually held,
    /// so abandoning this future mid-wait (timeout, select) leaves no stale
    /// count behind.
    pub async fn acquire_read(&self) -> ReadHandle {
        let _entry = self.shared.entry.lock().await;

        let needs_gate = self.shared.state.lock().readers == 0;
        if needs_gate {
            let permit = self
                .shared
                .gate
                .clone()
                .acquire_owned()
                .await
                .expect("rw gate semaphore is never closed");
            let mut state = self.shared.state.lock();
            state.gate_permit = Some(permit);
            state.readers = 1;
        } else {
            self.shared.state.lock().readers += 1;
        }

        ReadHandle {
            shared: self.shared.clone(),
            released: false,
        }
    }

    /// Acquire exclusive access, excluding all readers and any other writer.
    pub async fn acquire_write(&self) -> WriteHandle {
        let permit = self
            .shared
            .gate
            .clone()
            .acquire_owned()
            .await
            .expect("rw gate semaphore is never closed");
        WriteHandle {
            permit: Some(permit),
        }
    }

    /// Number of readers currently holding shared access.
    pub fn reader_count(&self) -> usize {
        self.shared.state.lock().readers
    }
}

impl Default for AsyncReaderWriterLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared-access handle; releases on drop, idempotently on explicit release.
#[derive(Debug)]
pub struct ReadHandle {
    shared: Arc<Shared>,
    released: bool,
}

impl ReadHandle {
    /// Release shared access now. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut state = self.shared.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            // Dropping the permit reopens the gate for a waiting writer.
            state.gate_permit.take();
        }
    }
}

impl Drop for ReadHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Exclusive-access handle; releases on drop, idempotently on explicit
/// release.
#[derive(Debug)]
pub struct WriteHandle {
    permit: Option<OwnedSemaphorePermit>,
}

impl WriteHandle {
    /// Release exclusive access now. Safe to call repeatedly.
    pub fn release(&mut self) {
        self.permit.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn multiple_readers_share_the_lock() {
        let lock = AsyncReaderWriterLock::new();

        let r1 = lock.acquire_read().await;
        let r2 = lock.acquire_read().await;
        let r3 = lock.acquire_read().await;
        assert_eq!(lock.reader_count(), 3);

        drop(r1);
        drop(r2);
        drop(r3);
        assert_eq!(lock.reader_count(), 0);
    }

    #[tokio::test]
    async fn writer_excludes_readers_until_released() {
        let lock = AsyncReaderWriterLock::new();
        let writer = lock.acquire_write().await;

        let reader_lock = lock.clone();
        let pending_reader = tokio::spawn(async move {
            let _reader = reader_lock.acquire_read().await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pending_reader.is_finished());

        drop(writer);
        tokio::time::timeout(Duration::from_secs(1), pending_reader)
            .await
            .expect("reader admitted after writer release")
            .expect("reader task finished");
    }

    #[tokio::test]
    async fn last_reader_out_admits_the_writer() {
        let lock = AsyncReaderWriterLock::new();
        let r1 = lock.acquire_read().await;
        let r2 = lock.acquire_read().await;

        let writer_lock = lock.clone();
        let pending_writer = tokio::spawn(async move {
            let _writer = writer_lock.acquire_write().await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pending_writer.is_finished());

        drop(r1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pending_writer.is_finished());

        drop(r2);
        tokio::time::timeout(Duration::from_secs(1), pending_writer)
            .await
            .expect("writer admitted after last reader")
            .expect("writer task finished");
    }

    #[tokio::test]
    async fn abandoned_reader_wait_leaves_no_stale_count() {
        let lock = AsyncReaderWriterLock::new();
        let writer = lock.acquire_write().await;

        // A reader that gives up mid-wait must not count as admitted.
        let timed_out =
            tokio::time::timeout(Duration::from_millis(30), lock.acquire_read()).await;
        assert!(timed_out.is_err());
        assert_eq!(lock.reader_count(), 0);

        // A later reader still has to wait for the writer.
        let reader_lock = lock.clone();
        let pending_reader = tokio::spawn(async move {
            let _reader = reader_lock.acquire_read().await;
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pending_reader.is_finished());

        drop(writer);
        tokio::time::timeout(Duration::from_secs(1), pending_reader)
            .await
            .expect("reader admitted after writer release")
            .expect("reader task finished");
    }

    #[tokio::test]
    async fn read_handle_double_release_is_safe() {
        let lock = AsyncReaderWriterLock::new();
        let mut reader = lock.acquire_read().await;
        reader.release();
        reader.release();
        drop(reader);
        assert_eq!(lock.reader_count(), 0);

        // The gate is free again for a writer.
        let mut writer = lock.acquire_write().await;
        writer.release();
        writer.release();
    }
}
