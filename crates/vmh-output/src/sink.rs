//! Transcript sinks that mirror captured output as it arrives

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use vmh_common::HarnessResult;

/// Receives every chunk the pump appends to the output buffer.
pub trait OutputSink: Send {
    /// Short name used in logs and error records
    fn name(&self) -> &str;

    fn write_chunk(&mut self, chunk: &[u8]) -> HarnessResult<()>;

    fn flush(&mut self) -> HarnessResult<()>;
}

/// Appends the raw transcript to a file.
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    name: String,
}

impl FileSink {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn new(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            name: format!("file:{}", path.display()),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> HarnessResult<()> {
        self.writer.write_all(chunk)?;
        Ok(())
    }

    fn flush(&mut self) -> HarnessResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Mirrors the transcript to the harness's own stderr.
///
/// Stderr keeps the echo apart from anything the caller prints on stdout.
pub struct ConsoleEcho;

impl OutputSink for ConsoleEcho {
    fn name(&self) -> &str {
        "console"
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> HarnessResult<()> {
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(chunk)?;
        stderr.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> HarnessResult<()> {
        std::io::stderr().flush()?;
        Ok(())
    }
}
