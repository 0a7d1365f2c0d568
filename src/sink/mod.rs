//! Persistence seams. The pipeline only ever talks to [`CatalogStore`];
//! the Postgres and Algolia adapters implement it, and [`MemoryStore`]
//! backs tests and dry runs.

pub mod algolia;
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{GlobalIndexRecord, ProductRecord, PromotionRecord, StoreRecord};

/// Outcome of applying a promotion batch to one store scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromoApply {
    /// Attachments that updated an existing product row.
    pub matched: usize,
    /// Attachments whose item code had no product row in this store.
    /// Logged explicitly by the caller; never a silent no-op.
    pub orphaned: usize,
}

/// Idempotent write primitives over a per-store layout plus one global
/// aggregate. All operations are upserts or partial updates: writing the
/// same batch twice leaves the store in the same state as writing once.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Make the (chain, store) scope writable; called before the first
    /// write to that scope within a run. Idempotent.
    async fn ensure_store_scope(&self, chain_id: &str, store_id: &str) -> Result<()>;

    /// Insert-or-replace product rows keyed by item code within the scope.
    /// Replaces all product fields; promotion fields are left untouched.
    async fn upsert_products(
        &self,
        chain_id: &str,
        store_id: &str,
        products: &[ProductRecord],
    ) -> Result<usize>;

    /// Partial update of promotion fields onto matching product rows by
    /// item code; non-promotion fields are untouched.
    async fn apply_promotions(
        &self,
        chain_id: &str,
        store_id: &str,
        promotions: &[PromotionRecord],
    ) -> Result<PromoApply>;

    /// Upsert the store directory, keyed on (chain, store).
    async fn upsert_stores(&self, stores: &[StoreRecord]) -> Result<usize>;

    /// Upsert global aggregate rows keyed by item code alone. Descriptive
    /// fields are overwritten unconditionally: last write wins.
    async fn upsert_index(&self, rows: &[GlobalIndexRecord]) -> Result<usize>;

    /// Set the computed cross-store promotion flag on existing aggregate
    /// rows. Never creates rows.
    async fn update_promotion_flags(&self, flags: &[(String, bool)]) -> Result<usize>;
}
