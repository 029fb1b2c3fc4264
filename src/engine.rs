use anyhow::Result;
use std::error::Error;
use std::fmt;

use crate::anomaly::note_anomaly;
use crate::config::EngineConfig;
use crate::dispatch::{BookSnapshot, ExecutionEvent, InboundEvent, MarketEvent, OrderSink};
use crate::ledger::{LedgerSnapshot, PositionLedger};
use crate::market::{Instrument, InstrumentQuote, MarketState, SeqChannel};
use crate::orders::{OrderKind, Side, WorkingOrder, WorkingOrders};
use crate::signal::{DivergenceTracker, Regime};
use crate::tradelog::{FillRecord, TradeLogger};

/// Lifecycle of the pair. `OrderSent` is transient while an entry pair is
/// outstanding; `Halted` is entered on disconnect and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    AwaitingPriming,
    Armed,
    OrderSent,
    Halted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedOrderError {
    pub id: u64,
    pub message: String,
}

impl fmt::Display for RejectedOrderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "order {} rejected: {}", self.id, self.message)
    }
}

impl Error for RejectedOrderError {}

/// The decision core. Owns all per-instrument state and mutates it only
/// within a single callback invocation; the dispatcher guarantees events
/// arrive serially and run to completion.
pub struct StrategyEngine {
    cfg: EngineConfig,
    etf: MarketState,
    future: MarketState,
    divergence: DivergenceTracker,
    ledger: PositionLedger,
    working: WorkingOrders,
    sink: Box<dyn OrderSink + Send>,
    trade_log: Option<TradeLogger>,
    state: EngineState,
}

impl StrategyEngine {
    pub fn new(cfg: EngineConfig, sink: Box<dyn OrderSink + Send>) -> Result<Self> {
        let trade_log = match &cfg.trade_log_file {
            Some(path) => Some(TradeLogger::open(path)?),
            None => None,
        };
        Ok(Self {
            etf: MarketState::new(cfg.history_window),
            future: MarketState::new(cfg.history_window),
            divergence: DivergenceTracker::new(cfg.divergence_window),
            ledger: PositionLedger::new(cfg.position_limit),
            working: WorkingOrders::new(),
            sink,
            trade_log,
            state: EngineState::AwaitingPriming,
            cfg,
        })
    }

    pub fn handle_event(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Market(MarketEvent::OrderBook(snap)) => self.on_order_book(&snap),
            InboundEvent::Market(MarketEvent::TradeTicks(snap)) => self.on_trade_ticks(&snap),
            InboundEvent::Execution(execution) => match execution {
                ExecutionEvent::OrderFilled { id, price, volume } => {
                    self.on_order_filled(id, price, volume)
                }
                ExecutionEvent::OrderStatus {
                    id,
                    filled,
                    remaining,
                    fees,
                } => self.on_order_status(id, filled, remaining, fees),
                ExecutionEvent::OrderError { id, message } => self.on_order_error(id, &message),
                ExecutionEvent::HedgeFilled { id, price, volume } => {
                    self.on_hedge_filled(id, price, volume)
                }
                ExecutionEvent::Disconnect => self.on_disconnect(),
            },
        }
    }

    pub fn on_order_book(&mut self, snap: &BookSnapshot) {
        self.on_quote_update(SeqChannel::OrderBook, snap);
    }

    pub fn on_trade_ticks(&mut self, snap: &BookSnapshot) {
        self.on_quote_update(SeqChannel::TradeTicks, snap);
    }

    /// Single entry point for both market-data channels.
    fn on_quote_update(&mut self, channel: SeqChannel, snap: &BookSnapshot) {
        let state = self.market_mut(snap.instrument);
        if !state.note_sequence(channel, snap.sequence) {
            note_anomaly(
                "stale market sequence",
                &format!(
                    "{} {:?} sequence {} already seen",
                    snap.instrument, channel, snap.sequence
                ),
            );
            return;
        }
        let (bid, bid_volume) = snap.best_bid();
        let (ask, ask_volume) = snap.best_ask();
        let quote = InstrumentQuote::from_top(bid, bid_volume, ask, ask_volume);
        state.apply_quote(quote);
        log::debug!(
            "[BOOK] {} seq={} bid={}x{} ask={}x{} mid={}",
            snap.instrument,
            snap.sequence,
            bid,
            bid_volume,
            ask,
            ask_volume,
            quote.mid
        );
        self.evaluate();
    }

    /// Re-runs the decision policy from scratch against current state. Called
    /// on every accepted market event; rejected or errored orders get their
    /// retry here rather than through any internal retry loop.
    fn evaluate(&mut self) {
        if self.state == EngineState::Halted {
            return;
        }
        if !(self.etf.quote.is_primed() && self.future.quote.is_primed()) {
            self.set_state(EngineState::AwaitingPriming);
            return;
        }
        // alignment guard: only compare snapshots at equal history depth so a
        // staggered pair of updates never produces a skewed sample
        if self.etf.history.len() == self.future.history.len() {
            self.divergence.push(self.etf.quote.mid, self.future.quote.mid);
        }
        self.place_cover_hedge();
        if self.working.has_open_entries() {
            self.set_state(EngineState::OrderSent);
            return;
        }
        self.set_state(EngineState::Armed);
        let regime = self.divergence.classify(self.cfg.k_sigma);
        if regime != Regime::Neutral {
            self.try_enter(regime);
        }
    }

    fn try_enter(&mut self, regime: Regime) {
        let (etf_side, etf_price, etf_avail, fut_side, fut_price, fut_avail) = match regime {
            Regime::EtfRich => (
                Side::Sell,
                self.etf.quote.best_bid,
                self.etf.quote.best_bid_volume,
                Side::Buy,
                self.future.quote.best_ask,
                self.future.quote.best_ask_volume,
            ),
            Regime::FutureRich => (
                Side::Buy,
                self.etf.quote.best_ask,
                self.etf.quote.best_ask_volume,
                Side::Sell,
                self.future.quote.best_bid,
                self.future.quote.best_bid_volume,
            ),
            Regime::Neutral => return,
        };
        // never exceed displayed liquidity on either leg, and keep the hedge
        // volume identical to the entry volume
        let volume = self.cfg.lot_size.min(etf_avail).min(fut_avail);
        if volume == 0 || etf_price <= 0 || fut_price <= 0 {
            log::debug!("[ENTRY] regime={} skipped: no displayed liquidity", regime);
            return;
        }
        if let Err(err) = self.ledger.ensure_headroom(Instrument::Etf, etf_side, volume) {
            log::info!("[LIMIT] entry skipped: {}", err);
            return;
        }
        if let Err(err) = self.ledger.ensure_headroom(Instrument::Future, fut_side, volume) {
            log::info!("[LIMIT] hedge leg skipped: {}", err);
            return;
        }
        log::info!(
            "[ENTRY] regime={} {} {} {}@{} hedged by {} {} {}@{}",
            regime,
            etf_side,
            Instrument::Etf,
            volume,
            etf_price,
            fut_side,
            Instrument::Future,
            volume,
            fut_price
        );
        if !self.submit(Instrument::Etf, etf_side, etf_price, volume, OrderKind::Resting) {
            return;
        }
        self.submit(Instrument::Future, fut_side, fut_price, volume, OrderKind::Hedge);
        self.set_state(EngineState::OrderSent);
        self.log_position_snapshot();
    }

    /// Records the order before the intent leaves the engine, so any
    /// acknowledgement racing back always finds the id tracked. A failed
    /// send resolves the order with zero volume on the spot.
    fn submit(
        &mut self,
        instrument: Instrument,
        side: Side,
        price: i64,
        volume: u64,
        kind: OrderKind,
    ) -> bool {
        let intent = self.working.place(instrument, side, price, volume, kind);
        let sent = match kind {
            OrderKind::Resting => self.sink.send_order(&intent),
            OrderKind::Hedge => self.sink.send_hedge_order(&intent),
        };
        match sent {
            Ok(()) => {
                log::info!(
                    "[ORDER] sent id={} {} {} {}@{} {}",
                    intent.id,
                    instrument,
                    side,
                    volume,
                    price,
                    intent.time_in_force
                );
                true
            }
            Err(err) => {
                self.working.on_error(intent.id);
                note_anomaly(
                    "order send failed",
                    &format!("id={}: {}", intent.id, err),
                );
                false
            }
        }
    }

    /// Covers naked ETF fill exposure the future leg does not yet account
    /// for, crossing at the worst acceptable tick inside the price band.
    /// Coverage counts both the filled future position and the unfilled
    /// volume of outstanding future orders, so a pre-placed entry hedge is
    /// never doubled and a rejected hedge is re-sent on the next event.
    fn place_cover_hedge(&mut self) {
        if self.state == EngineState::Halted {
            return;
        }
        let etf_position = self.ledger.position(Instrument::Etf);
        let need = -etf_position;
        let cover = self.ledger.position(Instrument::Future)
            + self.working.outstanding_signed(Instrument::Future);
        let shortfall = need - cover;
        let (side, volume) = if etf_position < 0 && shortfall > 0 {
            (Side::Buy, shortfall as u64)
        } else if etf_position > 0 && shortfall < 0 {
            (Side::Sell, (-shortfall) as u64)
        } else {
            return;
        };
        let price = match side {
            Side::Buy => self.cfg.max_ask_nearest_tick(),
            Side::Sell => self.cfg.min_bid_nearest_tick(),
        };
        if let Err(err) = self.ledger.ensure_headroom(Instrument::Future, side, volume) {
            log::warn!("[HEDGE] cover refused: {}", err);
            return;
        }
        log::info!(
            "[HEDGE] covering {} naked lots: {} {}@{}",
            volume,
            side,
            volume,
            price
        );
        self.submit(Instrument::Future, side, price, volume, OrderKind::Hedge);
    }

    pub fn on_order_filled(&mut self, id: u64, price: i64, volume: u64) {
        let (order, consumed) = match self.working.consume_fill(id, volume) {
            Some(fill) => fill,
            None => {
                note_anomaly(
                    "unknown order fill",
                    &format!("id={} volume={} price={}", id, volume, price),
                );
                return;
            }
        };
        if consumed == 0 {
            log::debug!("[FILL] id={} already fully applied; dropping replay", id);
            return;
        }
        self.ledger.apply_fill(order.instrument, order.side, consumed, price);
        log::info!(
            "[FILL] id={} {} {} {} lots at {} cents",
            id,
            order.instrument,
            order.side,
            consumed,
            price
        );
        self.write_fill_record(&order, price, consumed);
        if order.instrument == Instrument::Etf {
            self.place_cover_hedge();
        }
        self.log_position_snapshot();
    }

    /// Hedge fills are terminal: they close out exposure and never trigger
    /// further hedging.
    pub fn on_hedge_filled(&mut self, id: u64, price: i64, volume: u64) {
        let (order, consumed) = match self.working.consume_fill(id, volume) {
            Some(fill) => fill,
            None => {
                note_anomaly(
                    "unknown hedge fill",
                    &format!("id={} volume={} price={}", id, volume, price),
                );
                return;
            }
        };
        if consumed == 0 {
            return;
        }
        self.ledger.apply_fill(order.instrument, order.side, consumed, price);
        log::info!(
            "[HEDGE] id={} filled {} lots at {} cents average",
            id,
            consumed,
            price
        );
        self.write_fill_record(&order, price, consumed);
        self.log_position_snapshot();
    }

    pub fn on_order_status(&mut self, id: u64, filled: u64, remaining: u64, fees: i64) {
        if fees != 0 {
            self.ledger.apply_fees(fees);
        }
        match self.working.on_status(id, remaining) {
            Ok(Some(order)) => {
                log::info!(
                    "[STATUS] id={} resolved (filled {} of {})",
                    id,
                    filled,
                    order.volume
                );
            }
            Ok(None) => {
                log::debug!("[STATUS] id={} remaining {}", id, remaining);
            }
            Err(err) => note_anomaly("unknown order status", &err.to_string()),
        }
    }

    pub fn on_order_error(&mut self, id: u64, message: &str) {
        let err = RejectedOrderError {
            id,
            message: message.to_string(),
        };
        note_anomaly("order rejected", &err.to_string());
        if self.working.contains(id) {
            // resolve with zero volume, releasing the price-level slot and
            // position headroom; the next market event retries from scratch
            self.on_order_status(id, 0, 0, 0);
        }
    }

    pub fn on_disconnect(&mut self) {
        log::warn!("[SESSION] execution connection lost; halting new orders");
        self.set_state(EngineState::Halted);
        self.log_position_snapshot();
    }

    pub fn is_halted(&self) -> bool {
        self.state == EngineState::Halted
    }

    pub fn position(&self, instrument: Instrument) -> i64 {
        self.ledger.position(instrument)
    }

    pub fn history_len(&self, instrument: Instrument) -> usize {
        match instrument {
            Instrument::Etf => self.etf.history.len(),
            Instrument::Future => self.future.history.len(),
        }
    }

    pub fn session_summary(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    pub fn log_session_summary(&self) {
        let snapshot = self.ledger.snapshot();
        log::info!(
            "[SUMMARY] etf position={} cash={} traded={} | fut position={} cash={} traded={} | fees={} open_orders={}",
            snapshot.etf.position,
            snapshot.etf.cash,
            snapshot.etf.volume_traded,
            snapshot.future.position,
            snapshot.future.cash,
            snapshot.future.volume_traded,
            snapshot.fees,
            self.working.len()
        );
    }

    fn market_mut(&mut self, instrument: Instrument) -> &mut MarketState {
        match instrument {
            Instrument::Etf => &mut self.etf,
            Instrument::Future => &mut self.future,
        }
    }

    fn set_state(&mut self, next: EngineState) {
        if self.state != next {
            log::debug!("[STATE] {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn log_position_snapshot(&self) {
        let snapshot = self.ledger.snapshot();
        log::info!(
            "[POSITION] etf={} fut={} fees={} open_orders={} etf_mid={} fut_mid={}",
            snapshot.etf.position,
            snapshot.future.position,
            snapshot.fees,
            self.working.len(),
            self.etf.quote.mid,
            self.future.quote.mid
        );
    }

    fn write_fill_record(&mut self, order: &WorkingOrder, price: i64, volume: u64) {
        if let Some(logger) = &mut self.trade_log {
            let record = FillRecord::new(
                order.id,
                order.instrument,
                order.side,
                price,
                volume,
                self.ledger.position(order.instrument),
                order.kind == OrderKind::Hedge,
            );
            if let Err(err) = logger.log(&record) {
                log::error!("[TradeLog] failed to append fill record: {}", err);
            }
        }
    }
}
