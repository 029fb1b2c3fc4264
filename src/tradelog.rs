use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};

use crate::market::Instrument;
use crate::orders::Side;

/// One applied fill, journaled as a single JSON line.
#[derive(Debug, Serialize)]
pub struct FillRecord {
    pub timestamp: i64,
    pub order_id: u64,
    pub instrument: Instrument,
    pub side: Side,
    pub price: i64,
    pub volume: u64,
    pub position_after: i64,
    pub hedge: bool,
}

impl FillRecord {
    pub fn new(
        order_id: u64,
        instrument: Instrument,
        side: Side,
        price: i64,
        volume: u64,
        position_after: i64,
        hedge: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            order_id,
            instrument,
            side,
            price,
            volume,
            position_after,
            hedge,
        }
    }
}

/// Append-only JSONL journal of applied fills for post-mortem accounting.
pub struct TradeLogger {
    writer: BufWriter<std::fs::File>,
}

impl TradeLogger {
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open trade log {}", path))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn log(&mut self, record: &FillRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn records_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fills.jsonl");
        let path_str = path.to_str().unwrap();

        let mut logger = TradeLogger::open(path_str).unwrap();
        logger
            .log(&FillRecord::new(
                7,
                Instrument::Etf,
                Side::Sell,
                9_900,
                10,
                -10,
                false,
            ))
            .unwrap();
        logger
            .log(&FillRecord::new(
                8,
                Instrument::Future,
                Side::Buy,
                10_100,
                10,
                10,
                true,
            ))
            .unwrap();
        drop(logger);

        let mut contents = String::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"instrument\":\"etf\""));
        assert!(lines[0].contains("\"side\":\"sell\""));
        assert!(lines[1].contains("\"hedge\":true"));
    }
}
