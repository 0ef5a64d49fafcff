use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Direction, OrderId, SignalId};
use crate::values::{InstrumentId, Price};

/// Unique identifier for a position
pub type PositionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A position held by the ledger
///
/// Links back to exactly one approved signal and the order that opened it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Unique position identifier
    pub id: PositionId,

    /// Instrument being traded
    pub instrument_id: InstrumentId,

    /// Signed size: positive = long, negative = short
    pub size: Decimal,

    /// Average entry price
    pub entry_price: Price,

    /// Current protective stop
    pub stop_loss: Price,

    pub status: PositionStatus,

    /// Approved signal this position traces to
    pub signal_id: SignalId,

    /// Broker order that opened the position
    pub order_id: OrderId,

    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<Price>,

    /// Set once the position is closed
    pub realized_pnl: Option<Decimal>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        instrument_id: InstrumentId,
        direction: Direction,
        quantity: Decimal,
        entry_price: Price,
        stop_loss: Price,
        signal_id: SignalId,
        order_id: OrderId,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument_id,
            size: quantity.abs() * direction.sign(),
            entry_price,
            stop_loss,
            status: PositionStatus::Open,
            signal_id,
            order_id,
            opened_at,
            closed_at: None,
            exit_price: None,
            realized_pnl: None,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.size < Decimal::ZERO {
            Direction::Short
        } else {
            Direction::Long
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Exposure at entry: |size| x entry price
    pub fn notional(&self) -> Decimal {
        self.size.abs() * self.entry_price
    }

    /// (price - entry) x signed size
    pub fn pnl_at(&self, price: Price) -> Decimal {
        (price - self.entry_price) * self.size
    }

    /// Whether `price` has crossed the protective stop
    pub fn stop_triggered(&self, price: Price) -> bool {
        match self.direction() {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(direction: Direction) -> Position {
        let stop = match direction {
            Direction::Long => dec!(95),
            Direction::Short => dec!(105),
        };
        Position::open(
            InstrumentId::new("XYZ"),
            direction,
            dec!(10),
            dec!(100),
            stop,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Utc::now(),
        )
    }

    #[test]
    fn test_short_pnl_sign() {
        let p = position(Direction::Short);
        assert_eq!(p.size, dec!(-10));
        assert_eq!(p.pnl_at(dec!(90)), dec!(100));
        assert_eq!(p.pnl_at(dec!(104)), dec!(-40));
        assert_eq!(p.notional(), dec!(1000));
    }

    #[test]
    fn test_stop_triggered() {
        let long = position(Direction::Long);
        assert!(!long.stop_triggered(dec!(96)));
        assert!(long.stop_triggered(dec!(95)));

        let short = position(Direction::Short);
        assert!(short.stop_triggered(dec!(106)));
        assert!(!short.stop_triggered(dec!(101)));
    }
}
