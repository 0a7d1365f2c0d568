//! Cross-chain run aggregate: the single products index keyed by item code.
//!
//! Explicitly threaded through the pipeline, not ambient state. Built
//! empty at run start, fed by every account's writes, flushed exactly once
//! by the caller at run end, then dropped.

use anyhow::Result;
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::info;

use crate::model::{GlobalIndexRecord, ProductRecord, PromotionRecord};
use crate::sink::CatalogStore;

/// Active-promotion predicate for one store-scoped offer: a non-blank
/// promotion id, or a discounted price that actually undercuts the item
/// price. A "discount" at or above the item price does not count.
pub fn is_promotion(
    promotion_id: Option<&str>,
    discounted_price: Option<f64>,
    item_price: Option<f64>,
) -> bool {
    if promotion_id.is_some_and(|id| !id.trim().is_empty()) {
        return true;
    }
    let discounted = discounted_price.unwrap_or(0.0);
    let price = item_price.unwrap_or(0.0);
    discounted > 0.0 && discounted < price
}

/// What one (chain, store, item) offer looked like by the end of the run.
#[derive(Debug, Clone, Default)]
struct OfferView {
    item_price: Option<f64>,
    promotion_id: Option<String>,
    discounted_price: Option<f64>,
}

/// Accumulator for the global index across one full run (all accounts).
#[derive(Debug, Default)]
pub struct RunAggregate {
    /// Insertion-ordered so repeated runs flush deterministically.
    index: IndexMap<String, GlobalIndexRecord>,
    offers: HashMap<(String, String, String), OfferView>,
}

/// Counters from the final flush.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushSummary {
    pub index_rows: usize,
    pub flags_set: usize,
}

impl RunAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Fold a store's freshly-upserted product batch into the aggregate.
    /// Descriptive fields overwrite unconditionally: last write wins, in
    /// processing order.
    pub fn record_products(&mut self, products: &[ProductRecord]) {
        for product in products {
            let row = self
                .index
                .entry(product.item_code.clone())
                .or_insert_with(|| GlobalIndexRecord {
                    item_code: product.item_code.clone(),
                    item_name: None,
                    manufacturer_name: None,
                    category: None,
                    has_promotion: false,
                    last_updated: Utc::now(),
                });
            row.item_name = product.item_name.clone();
            row.manufacturer_name = product.manufacturer_name.clone();
            row.last_updated = Utc::now();

            let offer = self
                .offers
                .entry((
                    product.chain_id.clone(),
                    product.store_id.clone(),
                    product.item_code.clone(),
                ))
                .or_default();
            offer.item_price = product.item_price;
        }
    }

    /// Fold a store's applied promotion batch into the aggregate.
    pub fn record_promotions(
        &mut self,
        chain_id: &str,
        store_id: &str,
        promotions: &[PromotionRecord],
    ) {
        for promo in promotions {
            let offer = self
                .offers
                .entry((
                    chain_id.to_string(),
                    store_id.to_string(),
                    promo.item_code.clone(),
                ))
                .or_default();
            offer.promotion_id = Some(promo.promotion_id.clone());
            offer.discounted_price = promo.discounted_price;
        }
    }

    /// Global pass: an item is on promotion if it is on promotion in any
    /// store carrying it.
    pub fn promotion_flags(&self) -> Vec<(String, bool)> {
        let mut flags: HashMap<&str, bool> = HashMap::new();
        for ((_, _, item_code), offer) in &self.offers {
            let active = is_promotion(
                offer.promotion_id.as_deref(),
                offer.discounted_price,
                offer.item_price,
            );
            let slot = flags.entry(item_code).or_insert(false);
            *slot = *slot || active;
        }
        // Flag only items the index actually tracks, in index order.
        self.index
            .keys()
            .map(|code| (code.clone(), flags.get(code.as_str()).copied().unwrap_or(false)))
            .collect()
    }

    /// Write the aggregate out: descriptive upsert first, then the
    /// computed promotion flags as a partial update.
    pub async fn flush(&self, store: &dyn CatalogStore) -> Result<FlushSummary> {
        if self.is_empty() {
            return Ok(FlushSummary::default());
        }
        let rows: Vec<GlobalIndexRecord> = self.index.values().cloned().collect();
        let index_rows = store.upsert_index(&rows).await?;
        let flags = self.promotion_flags();
        let flags_set = store.update_promotion_flags(&flags).await?;
        info!(index_rows, flags_set, "global index flushed");
        Ok(FlushSummary { index_rows, flags_set })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryStore;

    fn product(chain: &str, store: &str, code: &str, price: Option<f64>) -> ProductRecord {
        ProductRecord {
            item_code: code.into(),
            item_name: Some(format!("item {code} @{chain}")),
            manufacturer_name: Some("maker".into()),
            manufacturer_item_id: None,
            quantity: None,
            unit_of_measure: None,
            unit_qty: None,
            is_weighted: false,
            item_price: price,
            unit_price: None,
            price_update_date: None,
            store_id: store.into(),
            chain_id: chain.into(),
        }
    }

    fn promo(code: &str, id: &str, discounted: Option<f64>) -> PromotionRecord {
        PromotionRecord {
            promotion_id: id.into(),
            item_code: code.into(),
            description: None,
            update_date: None,
            start_date: None,
            start_hour: None,
            end_date: None,
            end_hour: None,
            min_qty: None,
            discounted_price: discounted,
            discounted_price_per_unit: None,
            min_offered_qty: None,
        }
    }

    #[test]
    fn promotion_predicate_truth_table() {
        // Real discount below the price: active.
        assert!(is_promotion(None, Some(8.5), Some(10.0)));
        // No discount, blank id: inactive.
        assert!(!is_promotion(Some("  "), Some(0.0), Some(10.0)));
        // "Discount" above the price is not actually a discount.
        assert!(!is_promotion(None, Some(12.0), Some(10.0)));
        // Non-blank promotion id alone is enough.
        assert!(is_promotion(Some("555"), None, None));
    }

    #[test]
    fn flag_is_or_across_stores_carrying_the_item() {
        let mut agg = RunAggregate::new();
        agg.record_products(&[product("c1", "001", "100", Some(10.0))]);
        agg.record_products(&[product("c2", "001", "100", Some(11.0))]);
        // Promotion only in chain c2.
        agg.record_promotions("c2", "001", &[promo("100", "p9", Some(9.0))]);

        let flags = agg.promotion_flags();
        assert_eq!(flags, vec![("100".to_string(), true)]);
    }

    #[test]
    fn descriptive_fields_are_last_write_wins() {
        let mut agg = RunAggregate::new();
        agg.record_products(&[product("c1", "001", "100", Some(10.0))]);
        agg.record_products(&[product("c2", "002", "100", Some(12.0))]);

        let flags = agg.promotion_flags();
        assert_eq!(flags.len(), 1);
        // flush() writes what record_products last stored; inspect via a sink.
        let store = MemoryStore::new();
        futures::executor::block_on(agg.flush(&store)).unwrap();
        let row = store.index_row("100").unwrap();
        assert_eq!(row.item_name.as_deref(), Some("item 100 @c2"));
    }

    #[tokio::test]
    async fn flush_writes_rows_then_flags() {
        let mut agg = RunAggregate::new();
        agg.record_products(&[
            product("c1", "001", "100", Some(10.0)),
            product("c1", "001", "200", Some(4.0)),
        ]);
        agg.record_promotions("c1", "001", &[promo("100", "p1", Some(8.0))]);

        let store = MemoryStore::new();
        let summary = agg.flush(&store).await.unwrap();
        assert_eq!(summary.index_rows, 2);
        assert_eq!(summary.flags_set, 2);
        assert!(store.index_row("100").unwrap().has_promotion);
        assert!(!store.index_row("200").unwrap().has_promotion);
        assert_eq!(store.index_row("100").unwrap().category, None);
    }

    #[tokio::test]
    async fn empty_aggregate_flush_is_a_no_op() {
        let agg = RunAggregate::new();
        let store = MemoryStore::new();
        let summary = agg.flush(&store).await.unwrap();
        assert_eq!(summary.index_rows, 0);
        assert!(store.index_rows().is_empty());
    }
}
