//! Price level types with decimal precision

use rust_decimal::Decimal;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Which side of the book a level belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn is_bid(&self) -> bool {
        matches!(self, Side::Bid)
    }
}

/// A single price level in the orderbook
///
/// On the wire both Binance and Bybit encode a level as a two-element array
/// `["price", "qty"]`, usually strings but occasionally bare numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    /// Price of this level
    pub price: Decimal,
    /// Quantity at this price level (absolute, not a delta)
    pub qty: Decimal,
}

impl Level {
    /// Create a new price level
    pub fn new(price: Decimal, qty: Decimal) -> Self {
        Self { price, qty }
    }

    /// Create a level from f64 values (for testing)
    pub fn from_f64(price: f64, qty: f64) -> Self {
        use rust_decimal::prelude::FromPrimitive;
        Self {
            price: Decimal::from_f64(price).unwrap_or_default(),
            qty: Decimal::from_f64(qty).unwrap_or_default(),
        }
    }

    /// Get price as f64 (for analytics)
    pub fn price_f64(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.price.to_f64().unwrap_or(0.0)
    }

    /// Get quantity as f64 (for analytics)
    pub fn qty_f64(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.qty.to_f64().unwrap_or(0.0)
    }

    /// Check if this level has zero quantity (a deletion on the wire)
    pub fn is_zero(&self) -> bool {
        self.qty.is_zero()
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (price, qty): (DecimalField, DecimalField) =
            Deserialize::deserialize(deserializer)?;
        Ok(Level {
            price: price.0,
            qty: qty.0,
        })
    }
}

impl Serialize for Level {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.price.to_string())?;
        tuple.serialize_element(&self.qty.to_string())?;
        tuple.end()
    }
}

/// Wrapper whose Deserialize goes through [`deserialize_decimal`]
struct DecimalField(Decimal);

impl<'de> Deserialize<'de> for DecimalField {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize_decimal(deserializer).map(DecimalField)
    }
}

/// CRITICAL: Custom deserializer to preserve decimal precision
///
/// Prices arrive as strings most of the time, but some venues fall back to
/// JSON numbers which would lose precision through f64. String stays the
/// authoritative representation; trailing zeros survive, which matters for
/// the checksum payload.
pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    use rust_decimal::prelude::FromPrimitive;
    use serde::de::Error;
    use std::str::FromStr;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(serde_json::Number),
    }

    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => Decimal::from_str(&s).map_err(D::Error::custom),
        StringOrNumber::Number(n) => {
            let s = n.to_string();
            // Handle scientific notation (e.g., 5e-6) via f64 conversion
            if s.contains('e') || s.contains('E') {
                let f = n.as_f64().ok_or_else(|| D::Error::custom("invalid number"))?;
                Decimal::from_f64(f).ok_or_else(|| D::Error::custom("cannot convert to decimal"))
            } else {
                Decimal::from_str(&s).map_err(D::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_level_from_wire_array() {
        let json = r#"["50000.00","1.5"]"#;
        let level: Level = serde_json::from_str(json).unwrap();

        // Trailing zeros must survive for checksum formatting
        assert_eq!(level.price.to_string(), "50000.00");
        assert_eq!(level.qty.to_string(), "1.5");
    }

    #[test]
    fn test_level_from_numeric_array() {
        let json = r#"[50000.5, 0.00460208]"#;
        let level: Level = serde_json::from_str(json).unwrap();

        assert_eq!(level.price.to_string(), "50000.5");
        assert_eq!(level.qty.to_string(), "0.00460208");
    }

    #[test]
    fn test_level_small_qty() {
        // Small quantities that might be in scientific notation
        let json = r#"["0.05005", 0.000005]"#;
        let level: Level = serde_json::from_str(json).unwrap();

        assert_eq!(level.price.to_string(), "0.05005");
        assert!(level.qty > Decimal::ZERO);
    }

    #[test]
    fn test_level_zero_qty_is_deletion() {
        let level: Level = serde_json::from_str(r#"["50000.00","0.000"]"#).unwrap();
        assert!(level.is_zero());
    }

    #[test]
    fn test_level_serialize_round_trips_as_strings() {
        let level = Level::new(dec!(50000.00), dec!(1.5));
        let json = serde_json::to_string(&level).unwrap();
        assert_eq!(json, r#"["50000.00","1.5"]"#);
    }

    #[test]
    fn test_side_is_bid() {
        assert!(Side::Bid.is_bid());
        assert!(!Side::Ask.is_bid());
    }
}
