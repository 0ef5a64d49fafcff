//! Volatility estimation
//!
//! Average True Range per instrument, fed by price-category observations.
//! Uses Wilder smoothing expressed as a rational alpha:
//!
//! ```text
//! TR  = max(high - low, |high - prev_close|, |low - prev_close|)
//! ATR = (1 / period) · TR + (1 - 1 / period) · ATR_prev
//! ```
//!
//! The first bar seeds the average with its own range.

use dashmap::DashMap;
use meridian_core::{Direction, InstrumentId, Price, PriceBar};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Wilder ATR calculator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrEstimator {
    period: u32,
    atr: Option<Decimal>,
    prev_close: Option<Price>,
    samples: u64,
}

impl AtrEstimator {
    pub fn new(period: u32) -> Self {
        Self {
            period: period.max(1),
            atr: None,
            prev_close: None,
            samples: 0,
        }
    }

    /// Fold one bar in and return the updated ATR
    pub fn update(&mut self, bar: &PriceBar) -> Decimal {
        let range = bar.high - bar.low;
        let true_range = match self.prev_close {
            Some(pc) => range.max((bar.high - pc).abs()).max((bar.low - pc).abs()),
            None => range,
        };

        let atr = match self.atr {
            None => true_range,
            Some(prev) => {
                let period = Decimal::from(self.period);
                (true_range + (period - Decimal::ONE) * prev) / period
            }
        };

        self.atr = Some(atr);
        self.prev_close = Some(bar.close);
        self.samples += 1;
        atr
    }

    /// Replace the running average, e.g. from an external estimate
    pub fn seed(&mut self, atr: Decimal) {
        self.atr = Some(atr.abs());
    }

    #[inline]
    pub fn value(&self) -> Option<Decimal> {
        self.atr
    }

    #[inline]
    pub fn samples(&self) -> u64 {
        self.samples
    }
}

/// What the risk gate needs to know about one instrument
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolatilitySnapshot {
    pub reference_price: Option<Price>,
    pub atr: Option<Decimal>,
}

impl VolatilitySnapshot {
    /// ATR, or `fallback_pct` of the reference price when none is known yet
    pub fn volatility_or(&self, fallback_pct: Decimal) -> Option<Decimal> {
        match (self.atr, self.reference_price) {
            (Some(atr), _) if atr > Decimal::ZERO => Some(atr),
            (_, Some(price)) => Some(price * fallback_pct),
            _ => None,
        }
    }
}

/// Per-instrument ATR and last reference price
pub struct VolatilityBook {
    period: u32,
    estimators: DashMap<InstrumentId, AtrEstimator>,
    reference_prices: DashMap<InstrumentId, Price>,
}

impl VolatilityBook {
    pub fn new(period: u32) -> Self {
        Self {
            period,
            estimators: DashMap::new(),
            reference_prices: DashMap::new(),
        }
    }

    /// Fold in a bar; the close becomes the reference price
    pub fn observe_bar(&self, instrument_id: &InstrumentId, bar: &PriceBar) -> Decimal {
        self.reference_prices.insert(instrument_id.clone(), bar.close);
        self.estimators
            .entry(instrument_id.clone())
            .or_insert_with(|| AtrEstimator::new(self.period))
            .update(bar)
    }

    pub fn set_reference(&self, instrument_id: &InstrumentId, price: Price) {
        self.reference_prices.insert(instrument_id.clone(), price);
    }

    pub fn set_atr(&self, instrument_id: &InstrumentId, atr: Decimal) {
        self.estimators
            .entry(instrument_id.clone())
            .or_insert_with(|| AtrEstimator::new(self.period))
            .seed(atr);
    }

    pub fn atr(&self, instrument_id: &InstrumentId) -> Option<Decimal> {
        self.estimators.get(instrument_id).and_then(|e| e.value().value())
    }

    pub fn reference_price(&self, instrument_id: &InstrumentId) -> Option<Price> {
        self.reference_prices.get(instrument_id).map(|p| *p)
    }

    pub fn snapshot(&self, instrument_id: &InstrumentId) -> VolatilitySnapshot {
        VolatilitySnapshot {
            reference_price: self.reference_price(instrument_id),
            atr: self.atr(instrument_id),
        }
    }
}

/// Stop level `multiplier` volatilities away from entry, against the position
pub fn initial_stop(
    direction: Direction,
    entry: Price,
    volatility: Decimal,
    multiplier: Decimal,
) -> Price {
    let distance = volatility * multiplier;
    match direction {
        Direction::Long => entry - distance,
        Direction::Short => entry + distance,
    }
}

/// Trailing stop; only ever tightens
pub fn trail_stop(
    direction: Direction,
    current_stop: Price,
    price: Price,
    atr: Decimal,
    multiplier: Decimal,
) -> Price {
    let distance = atr * multiplier;
    match direction {
        Direction::Long => current_stop.max(price - distance),
        Direction::Short => current_stop.min(price + distance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> PriceBar {
        PriceBar {
            open,
            high,
            low,
            close,
        }
    }

    #[test]
    fn test_atr_seeds_then_smooths() {
        let mut atr = AtrEstimator::new(4);
        assert_eq!(atr.value(), None);

        assert_eq!(atr.update(&bar(dec!(100), dec!(102), dec!(98), dec!(101))), dec!(4));

        // Gap up: TR = |110 - 101| = 9
        let next = atr.update(&bar(dec!(108), dec!(110), dec!(107), dec!(109)));
        assert_eq!(next, dec!(5.25)); // (9 + 3 * 4) / 4
        assert_eq!(atr.samples(), 2);
    }

    #[test]
    fn test_fallback_volatility() {
        let snapshot = VolatilitySnapshot {
            reference_price: Some(dec!(200)),
            atr: None,
        };
        assert_eq!(snapshot.volatility_or(dec!(0.025)), Some(dec!(5)));
        assert_eq!(VolatilitySnapshot::default().volatility_or(dec!(0.025)), None);
    }

    #[test]
    fn test_stops_by_direction() {
        assert_eq!(
            initial_stop(Direction::Long, dec!(100), dec!(2.5), dec!(2)),
            dec!(95)
        );
        assert_eq!(
            initial_stop(Direction::Short, dec!(100), dec!(2.5), dec!(2)),
            dec!(105)
        );
    }

    #[test]
    fn test_trailing_stop_only_tightens() {
        // Price rises: long stop follows
        assert_eq!(
            trail_stop(Direction::Long, dec!(95), dec!(110), dec!(2), dec!(2)),
            dec!(106)
        );
        // Price falls back: stop holds
        assert_eq!(
            trail_stop(Direction::Long, dec!(106), dec!(104), dec!(2), dec!(2)),
            dec!(106)
        );
        assert_eq!(
            trail_stop(Direction::Short, dec!(105), dec!(90), dec!(2), dec!(2)),
            dec!(94)
        );
    }

    #[test]
    fn test_atr_query_reads_estimator() {
        let book = VolatilityBook::new(3);
        let id = InstrumentId::new("XYZ");
        assert_eq!(book.atr(&id), None);

        book.observe_bar(&id, &bar(dec!(50), dec!(53), dec!(50), dec!(52)));
        assert_eq!(book.atr(&id), Some(dec!(3)));
        assert_eq!(book.atr(&InstrumentId::new("ABC")), None);
    }

    #[test]
    fn test_book_tracks_reference() {
        let book = VolatilityBook::new(14);
        let id = InstrumentId::new("XYZ");
        assert_eq!(book.snapshot(&id), VolatilitySnapshot::default());

        book.observe_bar(&id, &bar(dec!(10), dec!(11), dec!(9), dec!(10.5)));
        let snapshot = book.snapshot(&id);
        assert_eq!(snapshot.reference_price, Some(dec!(10.5)));
        assert_eq!(snapshot.atr, Some(dec!(2)));

        book.set_atr(&id, dec!(1));
        assert_eq!(book.atr(&id), Some(dec!(1)));
    }
}
