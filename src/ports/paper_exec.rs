use anyhow::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::dispatch::{ExecutionEvent, OrderSink};
use crate::orders::{OrderIntent, OrderKind};

/// Dry-run execution venue: every order is acknowledged as an immediate
/// full fill at its limit price, shaped exactly like the acknowledgements a
/// live venue would deliver. The session loop drains the queue and feeds it
/// back through the execution callbacks after each market event.
#[derive(Clone, Default)]
pub struct PaperSink {
    acks: Arc<Mutex<VecDeque<ExecutionEvent>>>,
}

impl PaperSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<ExecutionEvent> {
        self.acks.lock().unwrap().drain(..).collect()
    }

    fn acknowledge(&self, intent: &OrderIntent) {
        log::info!(
            "[PAPER_FILL] id={} {} {} {}@{}",
            intent.id,
            intent.instrument,
            intent.side,
            intent.volume,
            intent.price
        );
        let mut acks = self.acks.lock().unwrap();
        match intent.kind {
            OrderKind::Resting => acks.push_back(ExecutionEvent::OrderFilled {
                id: intent.id,
                price: intent.price,
                volume: intent.volume,
            }),
            OrderKind::Hedge => acks.push_back(ExecutionEvent::HedgeFilled {
                id: intent.id,
                price: intent.price,
                volume: intent.volume,
            }),
        }
        acks.push_back(ExecutionEvent::OrderStatus {
            id: intent.id,
            filled: intent.volume,
            remaining: 0,
            fees: 0,
        });
    }
}

impl OrderSink for PaperSink {
    fn send_order(&mut self, intent: &OrderIntent) -> Result<()> {
        self.acknowledge(intent);
        Ok(())
    }

    fn send_hedge_order(&mut self, intent: &OrderIntent) -> Result<()> {
        self.acknowledge(intent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Instrument;
    use crate::orders::{Side, WorkingOrders};

    #[test]
    fn resting_orders_fill_then_resolve() {
        let mut working = WorkingOrders::new();
        let mut sink = PaperSink::new();
        let intent = working.place(Instrument::Etf, Side::Sell, 9_900, 10, OrderKind::Resting);
        sink.send_order(&intent).unwrap();

        let acks = sink.drain();
        assert_eq!(acks.len(), 2);
        assert!(matches!(
            acks[0],
            ExecutionEvent::OrderFilled { id, price: 9_900, volume: 10 } if id == intent.id
        ));
        assert!(matches!(
            acks[1],
            ExecutionEvent::OrderStatus { id, remaining: 0, .. } if id == intent.id
        ));
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn hedge_orders_acknowledge_through_the_hedge_path() {
        let mut working = WorkingOrders::new();
        let mut sink = PaperSink::new();
        let intent = working.place(Instrument::Future, Side::Buy, 10_100, 4, OrderKind::Hedge);
        sink.send_hedge_order(&intent).unwrap();

        let acks = sink.drain();
        assert!(matches!(
            acks[0],
            ExecutionEvent::HedgeFilled { id, volume: 4, .. } if id == intent.id
        ));
    }
}
