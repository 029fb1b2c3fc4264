use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::config::EngineConfig;
use crate::dispatch::{ExecutionEvent, InboundEvent, MarketEvent};
use crate::engine::StrategyEngine;
use crate::ledger::LedgerSnapshot;
use crate::ports::paper_exec::PaperSink;

/// Source of market-data events for a session; the replay port reads a
/// capture file, a live port would await a socket.
#[async_trait]
pub trait MarketFeed: Send {
    async fn next_event(&mut self) -> Option<MarketEvent>;
}

/// Replays a JSONL market-data capture, one serialized event per line.
pub struct ReplayFeed {
    events: std::vec::IntoIter<MarketEvent>,
}

impl ReplayFeed {
    pub fn from_path(path: &str) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open replay file {}", path))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for line in reader.lines() {
            let line =
                line.with_context(|| format!("failed to read replay line from {}", path))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: MarketEvent = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse replay entry '{}'", line))?;
            events.push(event);
        }

        if events.is_empty() {
            return Err(anyhow!("replay file {} is empty or invalid", path));
        }

        log::info!("[REPLAY] loaded {} events from {}", events.len(), path);
        Ok(Self {
            events: events.into_iter(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl MarketFeed for ReplayFeed {
    async fn next_event(&mut self) -> Option<MarketEvent> {
        self.events.next()
    }
}

/// Drives a recorded session end to end against the paper venue: each market
/// event runs to completion, then the acknowledgements it produced are fed
/// back through the execution callbacks before the next event is delivered,
/// preserving the serial ordering contract of the live dispatcher.
pub async fn run_replay_session(cfg: EngineConfig) -> Result<LedgerSnapshot> {
    let path = cfg
        .replay_file
        .clone()
        .ok_or_else(|| anyhow!("no replay_file configured; nothing to drive the session"))?;
    let mut feed = ReplayFeed::from_path(&path)?;
    let sink = PaperSink::new();
    let mut engine = StrategyEngine::new(cfg, Box::new(sink.clone()))?;

    while let Some(event) = feed.next_event().await {
        engine.handle_event(InboundEvent::Market(event));
        loop {
            let acks = sink.drain();
            if acks.is_empty() {
                break;
            }
            for ack in acks {
                engine.handle_event(InboundEvent::Execution(ack));
            }
        }
    }

    engine.handle_event(InboundEvent::Execution(ExecutionEvent::Disconnect));
    engine.log_session_summary();
    Ok(engine.session_summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::BookSnapshot;
    use crate::market::Instrument;
    use std::io::Write;

    fn book_line(instrument: Instrument, sequence: u64, bid: i64, ask: i64) -> String {
        let snap = BookSnapshot {
            instrument,
            sequence,
            ask_prices: [ask, 0, 0, 0, 0],
            ask_volumes: [50, 0, 0, 0, 0],
            bid_prices: [bid, 0, 0, 0, 0],
            bid_volumes: [50, 0, 0, 0, 0],
        };
        serde_json::to_string(&MarketEvent::OrderBook(snap)).unwrap()
    }

    fn write_capture(lines: &[String]) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.jsonl");
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        (dir, path.to_str().unwrap().to_string())
    }

    #[test]
    fn empty_capture_is_an_error() {
        let (_dir, path) = write_capture(&[]);
        assert!(ReplayFeed::from_path(&path).is_err());
    }

    #[tokio::test]
    async fn capture_lines_round_trip_through_the_feed() {
        let lines = vec![
            book_line(Instrument::Etf, 1, 9_900, 10_100),
            String::new(),
            book_line(Instrument::Future, 1, 9_900, 10_100),
        ];
        let (_dir, path) = write_capture(&lines);
        let mut feed = ReplayFeed::from_path(&path).unwrap();
        assert_eq!(feed.remaining(), 2);

        match feed.next_event().await {
            Some(MarketEvent::OrderBook(snap)) => {
                assert_eq!(snap.instrument, Instrument::Etf);
                assert_eq!(snap.best_bid(), (9_900, 50));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(feed.next_event().await.is_some());
        assert!(feed.next_event().await.is_none());
    }

    #[tokio::test]
    async fn divergent_capture_trades_and_settles_flat_against_paper_fills() {
        let mut lines = Vec::new();
        for sequence in 1..=4 {
            lines.push(book_line(Instrument::Etf, sequence, 9_900, 10_100));
            lines.push(book_line(Instrument::Future, sequence, 9_900, 10_100));
        }
        // 30-tick rich ETF on the final round
        lines.push(book_line(Instrument::Etf, 5, 12_900, 13_100));
        lines.push(book_line(Instrument::Future, 5, 9_900, 10_100));
        let (_dir, path) = write_capture(&lines);

        let mut cfg = EngineConfig::test_instance();
        cfg.replay_file = Some(path);
        let snapshot = run_replay_session(cfg).await.unwrap();

        // entry sold 10 ETF lots, the paired hedge bought 10 future lots
        assert_eq!(snapshot.etf.position, -10);
        assert_eq!(snapshot.future.position, 10);
        assert_eq!(snapshot.etf.volume_traded, 10);
        assert_eq!(snapshot.future.volume_traded, 10);
        assert_eq!(snapshot.etf.cash, 129_000);
        assert_eq!(snapshot.future.cash, -101_000);
    }
}
