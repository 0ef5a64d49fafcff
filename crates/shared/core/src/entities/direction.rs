use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction of a signal or position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Returns the opposite direction
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Direction implied by the sign of a score. Zero is neutral.
    pub fn from_score(score: Decimal) -> Option<Self> {
        if score > Decimal::ZERO {
            Some(Direction::Long)
        } else if score < Decimal::ZERO {
            Some(Direction::Short)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_score() {
        assert_eq!(Direction::from_score(dec!(0.3)), Some(Direction::Long));
        assert_eq!(Direction::from_score(dec!(-0.01)), Some(Direction::Short));
        assert_eq!(Direction::from_score(Decimal::ZERO), None);
    }

    #[test]
    fn test_opposite_and_sign() {
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.sign(), dec!(-1));
    }
}
