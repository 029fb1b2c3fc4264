use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;

/// The two legs of the tracked pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    Etf,
    Future,
}

impl Instrument {
    pub fn paired(self) -> Instrument {
        match self {
            Instrument::Etf => Instrument::Future,
            Instrument::Future => Instrument::Etf,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instrument::Etf => write!(f, "ETF"),
            Instrument::Future => write!(f, "FUT"),
        }
    }
}

/// Market-data channels carry independent sequence number streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqChannel {
    OrderBook,
    TradeTicks,
}

/// Top-of-book state for one instrument, prices in integer cents.
///
/// Overwritten wholesale on every market-data event. The mid-price stays
/// zero until both sides of the book have quoted at least once.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstrumentQuote {
    pub best_bid: i64,
    pub best_bid_volume: u64,
    pub best_ask: i64,
    pub best_ask_volume: u64,
    pub mid: i64,
}

impl InstrumentQuote {
    pub fn from_top(
        best_bid: i64,
        best_bid_volume: u64,
        best_ask: i64,
        best_ask_volume: u64,
    ) -> Self {
        let mid = if best_bid > 0 && best_ask > 0 {
            (best_bid + best_ask) / 2
        } else {
            0
        };
        Self {
            best_bid,
            best_bid_volume,
            best_ask,
            best_ask_volume,
            mid,
        }
    }

    pub fn is_primed(&self) -> bool {
        self.mid != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoDataError;

impl fmt::Display for NoDataError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "no price samples recorded yet")
    }
}

impl Error for NoDataError {}

/// Rolling window of mid-prices for one instrument. Insertion order is
/// preserved and eviction is strictly FIFO once the window is full.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    samples: VecDeque<i64>,
    capacity: usize,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a mid-price, evicting the oldest sample beyond capacity.
    /// A zero mid (unprimed book) still occupies a slot; consumers gate on
    /// both instruments being primed before comparing histories.
    pub fn update(&mut self, mid: i64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(mid);
    }

    pub fn latest(&self) -> Result<i64, NoDataError> {
        self.samples.back().copied().ok_or(NoDataError)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Per-instrument aggregate owned by the strategy engine: latest quote,
/// rolling mid-price history and per-channel sequence tracking.
#[derive(Debug)]
pub struct MarketState {
    pub quote: InstrumentQuote,
    pub history: PriceHistory,
    last_book_seq: Option<u64>,
    last_ticks_seq: Option<u64>,
}

impl MarketState {
    pub fn new(window: usize) -> Self {
        Self {
            quote: InstrumentQuote::default(),
            history: PriceHistory::new(window),
            last_book_seq: None,
            last_ticks_seq: None,
        }
    }

    /// Returns true when the sequence number advances the channel. Duplicates
    /// and regressions leave the recorded high-water mark untouched so the
    /// caller can drop the event without corrupting state.
    pub fn note_sequence(&mut self, channel: SeqChannel, sequence: u64) -> bool {
        let last = match channel {
            SeqChannel::OrderBook => &mut self.last_book_seq,
            SeqChannel::TradeTicks => &mut self.last_ticks_seq,
        };
        match *last {
            Some(seen) if sequence <= seen => false,
            _ => {
                *last = Some(sequence);
                true
            }
        }
    }

    /// Replaces the quote and appends its mid to the history in one step so
    /// the two never disagree between callbacks.
    pub fn apply_quote(&mut self, quote: InstrumentQuote) {
        self.quote = quote;
        self.history.update(quote.mid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_never_exceeds_capacity_and_evicts_fifo() {
        let mut history = PriceHistory::new(3);
        for mid in [1, 2, 3, 4, 5] {
            history.update(mid);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(Vec::from(history.samples.clone()), vec![3, 4, 5]);
        assert_eq!(history.latest(), Ok(5));
    }

    #[test]
    fn empty_history_reports_no_data() {
        let history = PriceHistory::new(4);
        assert_eq!(history.latest(), Err(NoDataError));
    }

    #[test]
    fn one_sided_book_has_no_mid() {
        let quote = InstrumentQuote::from_top(0, 0, 10_100, 50);
        assert!(!quote.is_primed());
        let quote = InstrumentQuote::from_top(9_900, 40, 10_100, 50);
        assert_eq!(quote.mid, 10_000);
        assert!(quote.is_primed());
    }

    #[test]
    fn duplicate_and_stale_sequences_are_rejected_per_channel() {
        let mut state = MarketState::new(4);
        assert!(state.note_sequence(SeqChannel::OrderBook, 1));
        assert!(!state.note_sequence(SeqChannel::OrderBook, 1));
        assert!(!state.note_sequence(SeqChannel::OrderBook, 0));
        assert!(state.note_sequence(SeqChannel::OrderBook, 2));
        // the trade-ticks stream counts independently
        assert!(state.note_sequence(SeqChannel::TradeTicks, 1));
    }

    #[test]
    fn apply_quote_updates_quote_and_history_together() {
        let mut state = MarketState::new(4);
        state.apply_quote(InstrumentQuote::from_top(9_900, 10, 10_100, 10));
        assert_eq!(state.quote.mid, 10_000);
        assert_eq!(state.history.latest(), Ok(10_000));
    }
}
