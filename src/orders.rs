use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use crate::market::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Sign applied to volumes when projecting net position.
    pub fn signum(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    GoodForDay,
    FillAndKill,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TimeInForce::GoodForDay => write!(f, "GFD"),
            TimeInForce::FillAndKill => write!(f, "FAK"),
        }
    }
}

/// Resting orders rest at their limit; hedge orders cross immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Resting,
    Hedge,
}

/// One of this agent's own outstanding orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingOrder {
    pub id: u64,
    pub instrument: Instrument,
    pub side: Side,
    pub price: i64,
    pub volume: u64,
    pub remaining: u64,
    pub kind: OrderKind,
}

/// Outbound order description handed to the `OrderSink`.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub id: u64,
    pub instrument: Instrument,
    pub side: Side,
    pub price: i64,
    pub volume: u64,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownOrderError(pub u64);

impl fmt::Display for UnknownOrderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "order {} is not tracked", self.0)
    }
}

impl Error for UnknownOrderError {}

/// The set of this agent's unresolved orders, keyed by client order id.
///
/// Ids are allocated from a session-monotonic counter and never reused.
/// Orders are recorded before any intent leaves this struct, so an
/// acknowledgement can never reference an id we have not seen.
#[derive(Debug)]
pub struct WorkingOrders {
    next_id: u64,
    open: HashMap<u64, WorkingOrder>,
}

impl WorkingOrders {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            open: HashMap::new(),
        }
    }

    pub fn place(
        &mut self,
        instrument: Instrument,
        side: Side,
        price: i64,
        volume: u64,
        kind: OrderKind,
    ) -> OrderIntent {
        let id = self.next_id;
        self.next_id += 1;
        self.open.insert(
            id,
            WorkingOrder {
                id,
                instrument,
                side,
                price,
                volume,
                remaining: volume,
                kind,
            },
        );
        OrderIntent {
            id,
            instrument,
            side,
            price,
            volume,
            kind,
            time_in_force: match kind {
                OrderKind::Resting => TimeInForce::GoodForDay,
                OrderKind::Hedge => TimeInForce::FillAndKill,
            },
        }
    }

    /// Applies a fill acknowledgement, capping the consumed volume at the
    /// order's remaining volume so replayed or overlapping fill messages are
    /// never double-applied. Returns the order and the volume actually
    /// consumed; `None` for untracked ids.
    pub fn consume_fill(&mut self, id: u64, volume: u64) -> Option<(WorkingOrder, u64)> {
        let order = self.open.get_mut(&id)?;
        let consumed = volume.min(order.remaining);
        order.remaining -= consumed;
        Some((order.clone(), consumed))
    }

    /// A lifecycle update. Zero remaining volume resolves the order and
    /// removes it from the outstanding set; otherwise the remaining volume is
    /// updated in place.
    pub fn on_status(
        &mut self,
        id: u64,
        remaining: u64,
    ) -> Result<Option<WorkingOrder>, UnknownOrderError> {
        if remaining == 0 {
            return match self.open.remove(&id) {
                Some(order) => Ok(Some(order)),
                None => Err(UnknownOrderError(id)),
            };
        }
        match self.open.get_mut(&id) {
            Some(order) => {
                order.remaining = remaining.min(order.volume);
                Ok(None)
            }
            None => Err(UnknownOrderError(id)),
        }
    }

    /// Rejection or fault: a tracked order resolves with zero volume,
    /// releasing whatever was reserved for it. Untracked ids are ignored.
    pub fn on_error(&mut self, id: u64) -> Option<WorkingOrder> {
        self.open.remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.open.contains_key(&id)
    }

    pub fn get(&self, id: u64) -> Option<&WorkingOrder> {
        self.open.get(&id)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// True while an entry order still has unfilled volume outstanding.
    pub fn has_open_entries(&self) -> bool {
        self.open
            .values()
            .any(|order| order.kind == OrderKind::Resting && order.remaining > 0)
    }

    /// Signed sum of unfilled volume on one instrument, used to project how
    /// much exposure the outstanding orders would add if fully filled.
    pub fn outstanding_signed(&self, instrument: Instrument) -> i64 {
        self.open
            .values()
            .filter(|order| order.instrument == instrument)
            .map(|order| order.side.signum() * order.remaining as i64)
            .sum()
    }
}

impl Default for WorkingOrders {
    fn default() -> Self {
        Self::new()
    }
}
