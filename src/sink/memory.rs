//! In-memory [`CatalogStore`]: the reference semantics for the trait.
//! Backs the unit and pipeline tests, and doubles as a dry-run sink.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::model::{GlobalIndexRecord, ProductRecord, PromotionRecord, StoreRecord};
use crate::sink::{CatalogStore, PromoApply};

/// One product row with its optionally-attached promotion, as a store
/// scope holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub product: ProductRecord,
    pub promotion: Option<PromotionRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    /// (chain_id, store_id) -> item_code -> row
    scopes: BTreeMap<(String, String), BTreeMap<String, StoredRow>>,
    stores: BTreeMap<(String, String), StoreRecord>,
    index: BTreeMap<String, GlobalIndexRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope_rows(&self, chain_id: &str, store_id: &str) -> Vec<StoredRow> {
        let inner = self.inner.lock().unwrap();
        inner
            .scopes
            .get(&(chain_id.to_string(), store_id.to_string()))
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn store_directory(&self) -> Vec<StoreRecord> {
        self.inner.lock().unwrap().stores.values().cloned().collect()
    }

    pub fn index_rows(&self) -> Vec<GlobalIndexRecord> {
        self.inner.lock().unwrap().index.values().cloned().collect()
    }

    pub fn index_row(&self, item_code: &str) -> Option<GlobalIndexRecord> {
        self.inner.lock().unwrap().index.get(item_code).cloned()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn ensure_store_scope(&self, chain_id: &str, store_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .scopes
            .entry((chain_id.to_string(), store_id.to_string()))
            .or_default();
        Ok(())
    }

    async fn upsert_products(
        &self,
        chain_id: &str,
        store_id: &str,
        products: &[ProductRecord],
    ) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let scope = match inner
            .scopes
            .get_mut(&(chain_id.to_string(), store_id.to_string()))
        {
            Some(scope) => scope,
            None => bail!("store scope {chain_id}/{store_id} was never ensured"),
        };
        for product in products {
            scope
                .entry(product.item_code.clone())
                .and_modify(|row| row.product = product.clone())
                .or_insert_with(|| StoredRow {
                    product: product.clone(),
                    promotion: None,
                });
        }
        Ok(products.len())
    }

    async fn apply_promotions(
        &self,
        chain_id: &str,
        store_id: &str,
        promotions: &[PromotionRecord],
    ) -> Result<PromoApply> {
        let mut inner = self.inner.lock().unwrap();
        let scope = match inner
            .scopes
            .get_mut(&(chain_id.to_string(), store_id.to_string()))
        {
            Some(scope) => scope,
            None => bail!("store scope {chain_id}/{store_id} was never ensured"),
        };
        let mut apply = PromoApply::default();
        for promo in promotions {
            match scope.get_mut(&promo.item_code) {
                Some(row) => {
                    row.promotion = Some(promo.clone());
                    apply.matched += 1;
                }
                None => apply.orphaned += 1,
            }
        }
        Ok(apply)
    }

    async fn upsert_stores(&self, stores: &[StoreRecord]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        for store in stores {
            inner
                .stores
                .insert((store.chain_id.clone(), store.store_id.clone()), store.clone());
        }
        Ok(stores.len())
    }

    async fn upsert_index(&self, rows: &[GlobalIndexRecord]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        for row in rows {
            inner.index.insert(row.item_code.clone(), row.clone());
        }
        Ok(rows.len())
    }

    async fn update_promotion_flags(&self, flags: &[(String, bool)]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let mut updated = 0;
        for (item_code, has_promotion) in flags {
            if let Some(row) = inner.index.get_mut(item_code) {
                row.has_promotion = *has_promotion;
                updated += 1;
            }
        }
        Ok(updated)
    }
}
