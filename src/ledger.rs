use serde::Serialize;
use std::error::Error;
use std::fmt;

use crate::market::Instrument;
use crate::orders::Side;

/// Net position and realized cash flow for one leg.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LegBook {
    pub position: i64,
    pub cash: i64,
    pub volume_traded: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LedgerSnapshot {
    pub etf: LegBook,
    pub future: LegBook,
    pub fees: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitBreachError {
    pub instrument: Instrument,
    pub projected: i64,
    pub limit: i64,
}

impl fmt::Display for LimitBreachError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} position {} would breach limit {}",
            self.instrument, self.projected, self.limit
        )
    }
}

impl Error for LimitBreachError {}

/// Signed net position per instrument, bounded to the configured limit by
/// refusing orders up front rather than clamping fills after the fact.
/// Cash and fee accounting ride along for post-mortem reporting.
#[derive(Debug)]
pub struct PositionLedger {
    limit: i64,
    etf: LegBook,
    future: LegBook,
    fees: i64,
}

impl PositionLedger {
    pub fn new(limit: i64) -> Self {
        Self {
            limit,
            etf: LegBook::default(),
            future: LegBook::default(),
            fees: 0,
        }
    }

    fn leg(&self, instrument: Instrument) -> &LegBook {
        match instrument {
            Instrument::Etf => &self.etf,
            Instrument::Future => &self.future,
        }
    }

    fn leg_mut(&mut self, instrument: Instrument) -> &mut LegBook {
        match instrument {
            Instrument::Etf => &mut self.etf,
            Instrument::Future => &mut self.future,
        }
    }

    pub fn position(&self, instrument: Instrument) -> i64 {
        self.leg(instrument).position
    }

    fn projected(&self, instrument: Instrument, side: Side, volume: u64) -> i64 {
        self.leg(instrument).position + side.signum() * volume as i64
    }

    /// True iff the position after a hypothetical full fill of the intended
    /// volume stays inside `[-limit, +limit]`. Callers pass the volume they
    /// actually mean to send, already capped to displayed liquidity and lot
    /// size.
    pub fn can_increase_exposure(&self, instrument: Instrument, side: Side, volume: u64) -> bool {
        self.projected(instrument, side, volume).abs() <= self.limit
    }

    /// Same check as a typed refusal for structured logging.
    pub fn ensure_headroom(
        &self,
        instrument: Instrument,
        side: Side,
        volume: u64,
    ) -> Result<(), LimitBreachError> {
        let projected = self.projected(instrument, side, volume);
        if projected.abs() > self.limit {
            return Err(LimitBreachError {
                instrument,
                projected,
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Mutates the net position for a fill: +volume for buys, -volume for
    /// sells, with the signed notional flowing out of (into) cash. Exactly
    /// one call per consumed fill; replay protection lives with the working
    /// order's remaining-volume tracking.
    pub fn apply_fill(&mut self, instrument: Instrument, side: Side, volume: u64, price: i64) {
        let leg = self.leg_mut(instrument);
        let signed = side.signum() * volume as i64;
        leg.position += signed;
        leg.cash -= signed * price;
        leg.volume_traded += volume;
    }

    pub fn apply_fees(&mut self, fees: i64) {
        self.fees += fees;
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            etf: self.etf,
            future: self.future,
            fees: self.fees,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headroom_is_inclusive_at_the_limit() {
        let ledger = PositionLedger::new(100);
        assert!(ledger.can_increase_exposure(Instrument::Etf, Side::Buy, 100));
        assert!(!ledger.can_increase_exposure(Instrument::Etf, Side::Buy, 101));
        assert!(ledger.can_increase_exposure(Instrument::Etf, Side::Sell, 100));
        assert!(!ledger.can_increase_exposure(Instrument::Etf, Side::Sell, 101));
    }

    #[test]
    fn saturated_position_refuses_further_exposure() {
        let mut ledger = PositionLedger::new(100);
        ledger.apply_fill(Instrument::Etf, Side::Buy, 100, 10_000);
        assert!(!ledger.can_increase_exposure(Instrument::Etf, Side::Buy, 1));
        let err = ledger
            .ensure_headroom(Instrument::Etf, Side::Buy, 10)
            .unwrap_err();
        assert_eq!(err.projected, 110);
        // reducing exposure is still allowed
        assert!(ledger.can_increase_exposure(Instrument::Etf, Side::Sell, 10));
    }

    #[test]
    fn fills_move_position_cash_and_volume() {
        let mut ledger = PositionLedger::new(100);
        ledger.apply_fill(Instrument::Etf, Side::Sell, 10, 9_900);
        ledger.apply_fill(Instrument::Future, Side::Buy, 10, 10_100);
        assert_eq!(ledger.position(Instrument::Etf), -10);
        assert_eq!(ledger.position(Instrument::Future), 10);
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.etf.cash, 99_000);
        assert_eq!(snapshot.future.cash, -101_000);
        assert_eq!(snapshot.etf.volume_traded, 10);
    }

    #[test]
    fn fees_accumulate_signed() {
        let mut ledger = PositionLedger::new(100);
        ledger.apply_fees(25);
        ledger.apply_fees(-5);
        assert_eq!(ledger.snapshot().fees, 20);
    }

    #[test]
    fn limits_hold_for_orders_that_passed_the_check() {
        let mut ledger = PositionLedger::new(100);
        let mut placed = 0;
        for _ in 0..20 {
            if ledger.can_increase_exposure(Instrument::Etf, Side::Buy, 10) {
                ledger.apply_fill(Instrument::Etf, Side::Buy, 10, 10_000);
                placed += 1;
            }
        }
        assert_eq!(placed, 10);
        assert_eq!(ledger.position(Instrument::Etf), 100);
    }
}
