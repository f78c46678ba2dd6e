use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::WriterError;
use crate::message::RawRecord;
use crate::metrics;

/// Appends raw records to `<index>_<prefix>` files in a directory, moving on
/// to the next index once the active file grows past `max_bytes`.
///
/// Records are written as one `key : value` line per field followed by a blank
/// line. Only one task may write at a time.
#[derive(Debug)]
pub struct LogWriter {
    dir: PathBuf,
    prefix: String,
    max_bytes: u64,
    index: u32,
    writer: Option<BufWriter<File>>,
    closed: bool,
}

impl LogWriter {
    /// Open `1_<prefix>` in `dir` for appending.
    pub fn open(
        dir: impl AsRef<Path>,
        prefix: impl Into<String>,
        max_bytes: u64,
    ) -> Result<Self, WriterError> {
        let dir = strip_trailing_separator(dir.as_ref());
        if !dir.is_dir() {
            return Err(WriterError::DirectoryNotFound(dir));
        }

        let mut writer = Self {
            dir,
            prefix: prefix.into(),
            max_bytes,
            index: 1,
            writer: None,
            closed: false,
        };
        let file = match writer.open_current() {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WriterError::DirectoryNotFound(writer.dir.clone()))
            }
            Err(e) => return Err(WriterError::Io(e)),
        };
        writer.writer = Some(file);
        info!(path = %writer.current_path().display(), max_bytes, "Opened feed log");
        Ok(writer)
    }

    /// Sequence index of the active file (starts at 1).
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Path of the file the next record lands in.
    pub fn current_path(&self) -> PathBuf {
        self.path_for(self.index)
    }

    fn path_for(&self, index: u32) -> PathBuf {
        self.dir.join(format!("{}_{}", index, self.prefix))
    }

    fn open_current(&self) -> std::io::Result<BufWriter<File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        Ok(BufWriter::new(file))
    }

    /// Append one record, rotating afterwards if the file is over the limit.
    ///
    /// The record that crosses the limit stays in the file being rotated away
    /// from. A failed rotation is returned; the next write retries opening the
    /// new file.
    pub fn write(&mut self, record: &RawRecord) -> Result<(), WriterError> {
        if self.closed {
            return Err(WriterError::Closed);
        }
        if self.writer.is_none() {
            let path = self.current_path();
            let writer = self
                .open_current()
                .map_err(|source| WriterError::Rotation { path, source })?;
            self.writer = Some(writer);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(WriterError::Closed);
        };

        for (key, value) in record {
            match value {
                Value::String(s) => writeln!(writer, "{} : {}", key, s)?,
                other => writeln!(writer, "{} : {}", key, other)?,
            }
        }
        writeln!(writer)?;
        writer.flush()?;

        let size = writer.get_ref().metadata()?.len();
        if size > self.max_bytes {
            self.rotate(size)?;
        }
        Ok(())
    }

    fn rotate(&mut self, size: u64) -> Result<(), WriterError> {
        if let Some(mut old) = self.writer.take() {
            old.flush()?;
        }
        self.index += 1;
        metrics::inc_log_rotations();

        let path = self.current_path();
        debug!(path = %path.display(), previous_size = size, "Rotating feed log");
        let writer = self
            .open_current()
            .map_err(|source| WriterError::Rotation { path, source })?;
        self.writer = Some(writer);
        Ok(())
    }

    /// Flush and release the file. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), WriterError> {
        self.closed = true;
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!(path = %self.current_path().display(), "Closed feed log");
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

fn strip_trailing_separator(dir: &Path) -> PathBuf {
    let raw = dir.to_string_lossy();
    let trimmed = raw
        .strip_suffix('/')
        .or_else(|| raw.strip_suffix('\\'))
        .filter(|s| !s.is_empty())
        .unwrap_or(&raw);
    PathBuf::from(trimmed)
}
