//! Durable trade persistence

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use super::TradeRecord;

/// Destination for closed trades
pub trait TradeSink: Send + Sync {
    fn append(&self, trade: &TradeRecord) -> anyhow::Result<()>;
}

/// Appends one JSON object per closed trade to a log file
pub struct JsonlSink {
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl TradeSink for JsonlSink {
    fn append(&self, trade: &TradeRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(trade)?;
        line.push('\n');
        let mut file = self.file.lock().expect("sink lock poisoned");
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Discards everything; used in tests
pub struct NullSink;

impl TradeSink for NullSink {
    fn append(&self, _trade: &TradeRecord) -> anyhow::Result<()> {
        Ok(())
    }
}
