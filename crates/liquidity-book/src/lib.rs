//! L2 orderbook engine
//!
//! Exact-decimal order book reconstruction from snapshot + delta streams.
//! This crate is runtime-agnostic: no async, no networking, no clocks. The
//! feed layer decides *when* to apply data; this crate decides *whether* it
//! is consistent and what the book looks like afterwards.
//!
//! # Modules
//!
//! - [`storage`] - BTreeMap-based price level storage
//! - [`book`] - the sequenced [`OrderBook`] state machine
//! - [`checksum`] - CRC32 integrity hash over the top of the book

pub mod book;
pub mod checksum;
pub mod storage;

pub use book::{BookStats, DepthView, OrderBook, UpdateOutcome};
pub use checksum::compute_checksum;
pub use storage::BookSides;
