//! Replays a command script against the target's input stream.

use crate::protocol::CommandStep;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use vmh_common::{HarnessError, HarnessResult};
use vmh_output::OutputBuffer;

/// Writes command steps strictly in order, each followed by its settle delay.
///
/// The sequencer only writes. Output is drained by the pump on its own task,
/// so a write never waits on the target's output pipe being emptied.
#[derive(Debug)]
pub struct CommandSequencer {
    session_id: String,
    steps_completed: usize,
}

impl CommandSequencer {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            steps_completed: 0,
        }
    }

    /// Number of steps fully written and settled so far.
    ///
    /// Still meaningful after the `run` future was dropped by a deadline.
    pub fn steps_completed(&self) -> usize {
        self.steps_completed
    }

    /// Run `steps` against `sink`.
    ///
    /// On a write failure returns [`HarnessError::CommandWrite`] carrying the
    /// failed step's index and a snapshot of `buffer`. Later steps are not
    /// attempted.
    pub async fn run<W>(
        &mut self,
        steps: &[CommandStep],
        sink: &mut W,
        buffer: &OutputBuffer,
    ) -> HarnessResult<usize>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        info!(session_id = %self.session_id, steps = steps.len(), "Running command sequence");

        for (index, step) in steps.iter().enumerate() {
            debug!(session_id = %self.session_id, step = index, "Step: {}", step);

            if !step.is_pause() {
                if let Err(e) = write_payload(sink, step.payload()).await {
                    warn!(
                        session_id = %self.session_id,
                        step = index,
                        error = %e,
                        "Command write failed"
                    );
                    return Err(HarnessError::command_write(index, e.to_string(), buffer.snapshot()));
                }
            }

            if !step.settle().is_zero() {
                tokio::time::sleep(step.settle()).await;
            }
            self.steps_completed = index + 1;
        }

        debug!(session_id = %self.session_id, "Command sequence complete");
        Ok(self.steps_completed)
    }
}

/// Write the whole payload, retrying short and interrupted writes, then flush.
async fn write_payload<W>(sink: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0;
    while written < payload.len() {
        match sink.write(&payload[written..]).await {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "input stream accepted no bytes",
                ))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    sink.flush().await
}
