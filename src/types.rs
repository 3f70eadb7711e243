//! Core types: Conid, Side, Cents

use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Broker-assigned contract identifier.
///
/// One instrument on one listing venue. Tickers are resolved to a `Conid`
/// before quotes are requested or orders are placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Conid(pub i64);

impl fmt::Display for Conid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Conid {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<i64>() {
            Ok(v) if v > 0 => Ok(Conid(v)),
            _ => Err(ValidationError::InvalidConid(s.to_string())),
        }
    }
}

/// Order side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Side implied by a signed trade quantity: positive buys, negative sells.
    pub fn from_quantity(quantity: i64) -> Result<Side, ValidationError> {
        match quantity {
            0 => Err(ValidationError::ZeroQuantity),
            q if q > 0 => Ok(Side::Buy),
            _ => Ok(Side::Sell),
        }
    }

    /// Wire representation used by the gateway.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dollar amount in cents.
///
/// `Cents(10050)` is $100.50. Market values, PnL and prices all travel as
/// cents so that joins and comparisons never see float noise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cents(pub i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    /// Convert a dollar float, rounding half away from zero.
    pub fn from_dollars(dollars: f64) -> Cents {
        Cents((dollars * 100.0).round() as i64)
    }

    pub fn as_dollars(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dollars = self.0 / 100;
        let cents = (self.0 % 100).abs();
        if self.0 < 0 {
            write!(f, "-${}.{:02}", dollars.abs(), cents)
        } else {
            write!(f, "${}.{:02}", dollars, cents)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conid_parse() {
        assert_eq!("265598".parse::<Conid>(), Ok(Conid(265598)));
        assert_eq!(" 8314 ".parse::<Conid>(), Ok(Conid(8314)));
        assert!("".parse::<Conid>().is_err());
        assert!("-5".parse::<Conid>().is_err());
        assert!("AAPL".parse::<Conid>().is_err());
    }

    #[test]
    fn side_from_quantity() {
        assert_eq!(Side::from_quantity(800), Ok(Side::Buy));
        assert_eq!(Side::from_quantity(-100), Ok(Side::Sell));
        assert_eq!(Side::from_quantity(0), Err(ValidationError::ZeroQuantity));
    }

    #[test]
    fn side_wire_format() {
        assert_eq!(Side::Buy.as_str(), "BUY");
        assert_eq!(format!("{}", Side::Sell), "SELL");
    }

    #[test]
    fn cents_display() {
        assert_eq!(format!("{}", Cents(10050)), "$100.50");
        assert_eq!(format!("{}", Cents(5)), "$0.05");
        assert_eq!(format!("{}", Cents(-250)), "-$2.50");
    }

    #[test]
    fn cents_from_dollars_rounds() {
        assert_eq!(Cents::from_dollars(1.006), Cents(101));
        assert_eq!(Cents::from_dollars(-12.346), Cents(-1235));
        assert_eq!(Cents::from_dollars(0.0), Cents::ZERO);
        assert_eq!(Cents(40_000_00).as_dollars(), 40_000.0);
    }
}
