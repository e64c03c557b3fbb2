//! Shared types for L2 market data feeds
//!
//! Wire-level message shapes for the supported venues plus the decimal
//! price-level type every other crate builds on. Quantities and prices are
//! `rust_decimal::Decimal` end to end; converting to `f64` is the analytics
//! layer's problem, not the wire layer's.

pub mod level;
pub mod messages;

pub use level::{Level, Side};
pub use messages::{BinanceDepthEvent, BybitBookData, BybitBookMessage, DepthSnapshot};
