use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::engine::StrategyEngine;
use crate::market::Instrument;
use crate::orders::OrderIntent;

/// Price levels carried per side in a market-data snapshot.
pub const TOP_LEVEL_COUNT: usize = 5;

/// Instrument-tagged top-of-book snapshot, shared by the order-book and
/// trade-ticks channels. Prices are integer cents; index 0 is best.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub instrument: Instrument,
    pub sequence: u64,
    pub ask_prices: [i64; TOP_LEVEL_COUNT],
    pub ask_volumes: [u64; TOP_LEVEL_COUNT],
    pub bid_prices: [i64; TOP_LEVEL_COUNT],
    pub bid_volumes: [u64; TOP_LEVEL_COUNT],
}

impl BookSnapshot {
    pub fn best_bid(&self) -> (i64, u64) {
        (self.bid_prices[0], self.bid_volumes[0])
    }

    pub fn best_ask(&self) -> (i64, u64) {
        (self.ask_prices[0], self.ask_volumes[0])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MarketEvent {
    OrderBook(BookSnapshot),
    TradeTicks(BookSnapshot),
}

#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    OrderFilled {
        id: u64,
        price: i64,
        volume: u64,
    },
    OrderStatus {
        id: u64,
        filled: u64,
        remaining: u64,
        fees: i64,
    },
    OrderError {
        id: u64,
        message: String,
    },
    HedgeFilled {
        id: u64,
        price: i64,
        volume: u64,
    },
    Disconnect,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    Market(MarketEvent),
    Execution(ExecutionEvent),
}

/// Capability for emitting orders, injected into the engine at construction
/// so the core never knows which transport carries them. A failed send is
/// surfaced to the engine, which releases the order's reserved state.
pub trait OrderSink {
    fn send_order(&mut self, intent: &OrderIntent) -> Result<()>;
    fn send_hedge_order(&mut self, intent: &OrderIntent) -> Result<()>;
}

/// Forwards intents onto an unbounded channel for a session layer to drain.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OrderIntent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<OrderIntent>) -> Self {
        Self { tx }
    }
}

impl OrderSink for ChannelSink {
    fn send_order(&mut self, intent: &OrderIntent) -> Result<()> {
        self.tx.send(intent.clone())?;
        Ok(())
    }

    fn send_hedge_order(&mut self, intent: &OrderIntent) -> Result<()> {
        self.tx.send(intent.clone())?;
        Ok(())
    }
}

/// Thin routing loop: drains inbound events serially into the engine, one
/// event processed to completion before the next. Stops once the session
/// disconnects or the channel closes, returning the engine so its ledger
/// survives for post-mortem accounting.
pub struct EventDispatcher {
    engine: StrategyEngine,
    events: mpsc::UnboundedReceiver<InboundEvent>,
}

impl EventDispatcher {
    pub fn new(engine: StrategyEngine, events: mpsc::UnboundedReceiver<InboundEvent>) -> Self {
        Self { engine, events }
    }

    pub async fn run(mut self) -> StrategyEngine {
        while let Some(event) = self.events.recv().await {
            let disconnect = matches!(
                event,
                InboundEvent::Execution(ExecutionEvent::Disconnect)
            );
            self.engine.handle_event(event);
            if disconnect {
                break;
            }
        }
        self.engine
    }
}
