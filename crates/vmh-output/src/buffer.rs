//! Append-only output buffer.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// Everything the target has produced so far, as raw bytes.
///
/// Cheap to clone; all clones share the same storage. The pump is the only
/// writer. Each append happens under a single write lock, so a reader never
/// observes part of a chunk. Bytes are never rewritten or removed, which
/// makes any earlier snapshot a prefix of every later one.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<BufferInner>,
}

#[derive(Default)]
struct BufferInner {
    data: RwLock<Vec<u8>>,
    appended: Notify,
    closed: AtomicBool,
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and wake any waiters.
    pub fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.inner.data.write().extend_from_slice(chunk);
        self.inner.appended.notify_waiters();
    }

    /// Mark the buffer as complete; no more output will arrive.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.appended.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of everything captured so far.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.data.read().clone()
    }

    /// Captured output as text. Invalid UTF-8 (including a multi-byte
    /// character still missing its tail) is replaced, never dropped.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.inner.data.read()).into_owned()
    }

    pub fn contains(&self, pattern: impl AsRef<[u8]>) -> bool {
        let pattern = pattern.as_ref();
        if pattern.is_empty() {
            return true;
        }
        self.inner
            .data
            .read()
            .windows(pattern.len())
            .any(|window| window == pattern)
    }

    /// Wait until `pattern` appears in the captured output.
    ///
    /// Returns `false` if `timeout` elapses first, or if the buffer is
    /// closed without the pattern having appeared.
    pub async fn wait_for(&self, pattern: impl AsRef<[u8]>, timeout: Duration) -> bool {
        let pattern = pattern.as_ref();
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.inner.appended.notified();
            tokio::pin!(notified);
            // Register before checking so an append in between is not missed.
            notified.as_mut().enable();

            if self.contains(pattern) {
                return true;
            }
            if self.is_closed() {
                return false;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.contains(pattern);
            }
        }
    }
}
