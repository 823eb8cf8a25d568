//! Output pump: continuously drains a target's output into an [`OutputBuffer`].
//!
//! The pump runs on its own tokio task, independent of whatever is writing
//! to the target's input or waiting on its exit. A target that fills its
//! output pipe therefore never stalls the harness, and the harness writing
//! input never stalls the drain.

use crate::buffer::OutputBuffer;
use crate::sink::OutputSink;
use crate::types::PumpStatus;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use vmh_common::HarnessError;

const READ_CHUNK_SIZE: usize = 8192;

const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Builder for a running pump.
pub struct OutputPump {
    session_id: String,
    buffer: OutputBuffer,
    sinks: Vec<Box<dyn OutputSink>>,
}

impl OutputPump {
    pub fn new(session_id: impl Into<String>, buffer: OutputBuffer) -> Self {
        Self {
            session_id: session_id.into(),
            buffer,
            sinks: Vec::new(),
        }
    }

    /// Mirror every captured chunk to `sink` as well.
    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Start draining `streams`, one task per stream.
    ///
    /// All streams append to the same buffer. Bytes from one stream keep
    /// their order; interleaving between streams follows arrival order.
    /// Sinks are written from a blocking worker so slow transcript I/O
    /// never delays a read.
    pub fn spawn<R>(self, streams: Vec<R>, cancel: CancellationToken) -> PumpHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (sink_tx, sink_rx) = if self.sinks.is_empty() {
            (None, None)
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        };

        let shared = Arc::new(PumpShared {
            session_id: self.session_id,
            buffer: self.buffer,
            sink_tx: Mutex::new(sink_tx),
            bytes: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            read_errors: RwLock::new(Vec::new()),
            sink_errors: RwLock::new(Vec::new()),
            open_streams: AtomicUsize::new(streams.len()),
            cancelled: AtomicBool::new(false),
            last_activity: RwLock::new(None),
        });

        let sink_task = sink_rx.map(|rx| {
            let shared = Arc::clone(&shared);
            let sinks = self.sinks;
            tokio::task::spawn_blocking(move || sink_writer(rx, sinks, &shared))
        });

        if streams.is_empty() {
            shared.all_streams_closed();
        }

        let tasks = streams
            .into_iter()
            .enumerate()
            .map(|(index, stream)| {
                let shared = Arc::clone(&shared);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    stream_reader(stream, index, &shared, cancel).await;
                })
            })
            .collect();

        debug!(session_id = %shared.session_id, "Output pump started");

        PumpHandle {
            tasks,
            sink_task,
            cancel,
            shared,
        }
    }
}

/// State shared between the reader tasks, the sink worker and the handle.
struct PumpShared {
    session_id: String,
    buffer: OutputBuffer,
    /// Dropped once the last stream closes, which ends the sink worker.
    sink_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    bytes: AtomicU64,
    chunks: AtomicU64,
    read_errors: RwLock<Vec<String>>,
    sink_errors: RwLock<Vec<String>>,
    open_streams: AtomicUsize,
    cancelled: AtomicBool,
    last_activity: RwLock<Option<DateTime<Utc>>>,
}

impl PumpShared {
    fn record_chunk(&self, chunk: &[u8]) {
        self.buffer.append(chunk);
        self.bytes.fetch_add(chunk.len() as u64, Ordering::SeqCst);
        self.chunks.fetch_add(1, Ordering::SeqCst);
        *self.last_activity.write() = Some(Utc::now());

        if let Some(tx) = self.sink_tx.lock().as_ref() {
            // The worker only goes away after every sender is dropped
            let _ = tx.send(chunk.to_vec());
        }
    }

    fn record_read_error(&self, error: HarnessError) {
        self.read_errors.write().push(error.to_string());
    }

    fn stream_closed(&self) {
        if self.open_streams.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.all_streams_closed();
        }
    }

    fn all_streams_closed(&self) {
        self.sink_tx.lock().take();
        self.buffer.close();
    }

    fn status(&self) -> PumpStatus {
        let cancelled = self.cancelled.load(Ordering::SeqCst);
        PumpStatus {
            bytes_captured: self.bytes.load(Ordering::SeqCst),
            chunks: self.chunks.load(Ordering::SeqCst),
            read_errors: self.read_errors.read().clone(),
            sink_errors: self.sink_errors.read().clone(),
            reached_eof: !cancelled && self.open_streams.load(Ordering::SeqCst) == 0,
            cancelled,
            last_activity: *self.last_activity.read(),
        }
    }
}

/// Runs on the blocking pool until every chunk sender is gone.
fn sink_writer(
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut sinks: Vec<Box<dyn OutputSink>>,
    shared: &PumpShared,
) {
    while let Some(chunk) = rx.blocking_recv() {
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.write_chunk(&chunk) {
                warn!(
                    session_id = %shared.session_id,
                    sink = sink.name(),
                    error = %e,
                    "Transcript sink write failed"
                );
                shared.sink_errors.write().push(format!("{}: {}", sink.name(), e));
            }
        }
    }

    for sink in sinks.iter_mut() {
        if let Err(e) = sink.flush() {
            shared.sink_errors.write().push(format!("{}: {}", sink.name(), e));
        }
    }
}

/// Read until end-of-stream or cancellation.
///
/// Read errors never end the stream on their own; the reader backs off and
/// retries, and `PumpHandle::finish` bounds how long that can go on.
async fn stream_reader<R>(mut stream: R, index: usize, shared: &PumpShared, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut consecutive_errors = 0u32;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(session_id = %shared.session_id, stream = index, "Output pump cancelled");
                shared.cancelled.store(true, Ordering::SeqCst);
                break;
            }
            result = stream.read(&mut buf) => result,
        };

        match result {
            Ok(0) => {
                debug!(session_id = %shared.session_id, stream = index, "Output stream reached end-of-stream");
                break;
            }
            Ok(n) => {
                if consecutive_errors > 0 {
                    debug!(
                        session_id = %shared.session_id,
                        stream = index,
                        errors = consecutive_errors,
                        "Output stream recovered after read errors"
                    );
                    consecutive_errors = 0;
                }
                trace!(session_id = %shared.session_id, stream = index, bytes = n, "Captured output chunk");
                shared.record_chunk(&buf[..n]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                consecutive_errors += 1;
                let error = HarnessError::read(e.to_string());
                if consecutive_errors == 1 {
                    warn!(session_id = %shared.session_id, stream = index, error = %error, "Error reading target output");
                } else {
                    debug!(session_id = %shared.session_id, stream = index, error = %error, "Error reading target output");
                }
                shared.record_read_error(error);

                tokio::select! {
                    _ = cancel.cancelled() => {
                        shared.cancelled.store(true, Ordering::SeqCst);
                        break;
                    }
                    _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    shared.stream_closed();
}

/// Handle to a running pump.
///
/// Dropping the handle cancels the pump.
pub struct PumpHandle {
    tasks: Vec<JoinHandle<()>>,
    sink_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    shared: Arc<PumpShared>,
}

impl PumpHandle {
    /// Wait up to `drain_timeout` for every stream to reach end-of-stream,
    /// then cancel whatever is still reading.
    ///
    /// Pending transcript writes get whatever is left of `drain_timeout`.
    pub async fn finish(mut self, drain_timeout: Duration) -> PumpStatus {
        let deadline = Instant::now() + drain_timeout;
        let mut tasks = std::mem::take(&mut self.tasks).into_iter();

        while let Some(mut task) = tasks.next() {
            match timeout_at(deadline, &mut task).await {
                Ok(joined) => self.record_join(joined),
                Err(_) => {
                    debug!(
                        session_id = %self.shared.session_id,
                        ?drain_timeout,
                        "Output did not reach end-of-stream in time, cancelling pump"
                    );
                    self.cancel.cancel();
                    self.record_join(task.await);
                    break;
                }
            }
        }

        // Only reached with tasks left over after a cancel
        for task in tasks {
            self.record_join(task.await);
        }

        self.shared.all_streams_closed();

        if let Some(mut sink_task) = self.sink_task.take() {
            match timeout_at(deadline, &mut sink_task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.shared.sink_errors.write().push(format!("sink worker failed: {}", e));
                }
                Err(_) => {
                    warn!(
                        session_id = %self.shared.session_id,
                        "Transcript sinks still writing after drain timeout"
                    );
                    self.shared
                        .sink_errors
                        .write()
                        .push("sink worker did not finish within the drain timeout".to_string());
                }
            }
        }

        self.shared.status()
    }

    fn record_join(&self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            warn!(session_id = %self.shared.session_id, error = %e, "Output pump task failed");
            self.shared
                .record_read_error(HarnessError::read(format!("pump task failed: {}", e)));
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
