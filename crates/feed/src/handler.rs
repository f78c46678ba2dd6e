//! Callback surface for feed consumers
//!
//! The client reports lifecycle events and inbound records through a
//! [`FeedHandler`]. Every hook has a default; override the ones you need.

use tracing::{error, info};

use crate::error::FeedError;
use crate::message::RawRecord;
use crate::writer::LogWriter;

pub trait FeedHandler: Send + 'static {
    /// Called by `start()` before the connection is opened.
    fn on_open(&mut self) {
        info!("-- Subscribed! --");
    }

    /// Called on the receive task for every inbound record, in arrival order.
    ///
    /// `log` is the configured log writer, if any. The default mirrors the
    /// record to it. An error is reported through [`FeedHandler::on_error`]
    /// and does not close the connection.
    fn on_message(
        &mut self,
        record: &RawRecord,
        log: Option<&mut LogWriter>,
    ) -> Result<(), FeedError> {
        log_record(record, log)
    }

    fn on_error(&mut self, err: &FeedError) {
        error!(error = %err, "Feed error");
    }

    /// Called once when the connection is torn down.
    fn on_close(&mut self) {
        info!("-- Socket Closed --");
    }
}

/// Write `record` to `log` when one is configured.
pub fn log_record(record: &RawRecord, log: Option<&mut LogWriter>) -> Result<(), FeedError> {
    if let Some(log) = log {
        log.write(record)?;
    }
    Ok(())
}

/// Handler that keeps every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl FeedHandler for DefaultHandler {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::decode_frame;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_on_message_without_log() {
        let mut handler = DefaultHandler;
        let record = decode_frame(r#"{"type":"open"}"#).unwrap();
        assert!(handler.on_message(&record, None).is_ok());
    }

    #[test]
    fn test_default_on_message_writes_log() {
        let tmp_dir = TempDir::new().unwrap();
        let mut log = LogWriter::open(tmp_dir.path(), "feed.txt", 1024).unwrap();
        let mut handler = DefaultHandler;

        let record = decode_frame(r#"{"type":"open","price":"1.5"}"#).unwrap();
        handler.on_message(&record, Some(&mut log)).unwrap();
        log.close().unwrap();

        let content = fs::read_to_string(tmp_dir.path().join("1_feed.txt")).unwrap();
        assert_eq!(content, "type : open\nprice : 1.5\n\n");
    }

    #[test]
    fn test_log_record_surfaces_writer_errors() {
        let tmp_dir = TempDir::new().unwrap();
        let mut log = LogWriter::open(tmp_dir.path(), "feed.txt", 1024).unwrap();
        log.close().unwrap();

        let record = decode_frame(r#"{"type":"open"}"#).unwrap();
        let err = log_record(&record, Some(&mut log)).unwrap_err();
        assert!(matches!(err, FeedError::Writer(_)));
    }
}
