//! Retail price-feed sync: pulls gzip-compressed XML catalogs (prices,
//! promotions, store directories) from the published-prices portal and
//! upserts them into per-store tables plus one cross-chain product index.
//!
//! Flow: list → [`classify`] → [`select`] latest per slot → fetch →
//! [`decode`] → [`parse`] → write through a [`sink::CatalogStore`], with a
//! [`aggregate::RunAggregate`] accumulating the global index for a single
//! flush at run end.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod decode;
pub mod error;
pub mod model;
pub mod parse;
pub mod pipeline;
pub mod portal;
pub mod select;
pub mod sink;
pub mod util;

pub use error::FeedError;
pub use pipeline::{Pipeline, RunSummary};
