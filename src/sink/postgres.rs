//! Postgres [`CatalogStore`] built on sqlx.
//!
//! Layout: one `products_{chain}_{store}` table per store scope, a global
//! `products_index` keyed by item code alone, and a `stores` directory
//! table. Table names interpolate chain/store ids, so those are validated
//! digits-only before they ever reach SQL.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, QueryBuilder};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::model::{GlobalIndexRecord, ProductRecord, PromotionRecord, StoreRecord};
use crate::sink::{CatalogStore, PromoApply};
use crate::util::env::env_flag;

/// Multi-row upsert chunk size; keeps bind counts well under the wire
/// protocol limit.
const UPSERT_CHUNK: usize = 500;

#[derive(Clone)]
pub struct PgCatalogStore {
    pub pool: PgPool,
}

impl PgCatalogStore {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options =
            PgConnectOptions::from_str(database_url).context("parsing DATABASE_URL")?;

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        // PgBouncer txn mode safe unless prepared statements are opted in.
        if !env_flag("USE_PREPARED", false) {
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connecting to postgres")?;
        info!("connected to db");

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Fixed tables. Per-store tables are created lazily via
    /// `ensure_store_scope`; failure here is the one fatal sink error.
    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS products_index (
                item_code TEXT PRIMARY KEY,
                item_name TEXT,
                manufacturer_name TEXT,
                category TEXT,
                has_promotion BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
             );
             CREATE TABLE IF NOT EXISTS stores (
                chain_id TEXT NOT NULL,
                store_id TEXT NOT NULL,
                store_name TEXT,
                address TEXT,
                city TEXT,
                PRIMARY KEY (chain_id, store_id)
             )",
        )
        .execute(&self.pool)
        .await
        .context("initializing sink schema")?;
        Ok(())
    }

    async fn table_visible(&self, table: &str) -> Result<bool> {
        let visible: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .persistent(false)
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(visible)
    }
}

/// Collapse a batch to one row per conflict key, keeping the last
/// occurrence. Postgres rejects a multi-row `ON CONFLICT DO UPDATE` that
/// touches the same row twice, and real feeds do repeat item codes within
/// one file; last occurrence wins, same as writing the rows one by one.
fn dedup_last<'a, T, K, F>(items: &'a [T], key: F) -> Vec<&'a T>
where
    K: std::hash::Hash + Eq,
    F: Fn(&'a T) -> K,
{
    let mut uniques: IndexMap<K, &'a T> = IndexMap::new();
    for item in items {
        uniques.insert(key(item), item);
    }
    uniques.into_values().collect()
}

/// Per-store table name. Ids are opaque digit strings (leading zeros
/// significant); anything else is rejected before SQL interpolation.
fn scope_table(chain_id: &str, store_id: &str) -> Result<String> {
    if chain_id.is_empty() || !chain_id.chars().all(|c| c.is_ascii_digit()) {
        bail!("refusing non-numeric chain id {chain_id:?} in table name");
    }
    if !store_id.chars().all(|c| c.is_ascii_digit()) {
        bail!("refusing non-numeric store id {store_id:?} in table name");
    }
    Ok(if store_id.is_empty() {
        format!("products_{chain_id}")
    } else {
        format!("products_{chain_id}_{store_id}")
    })
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn ensure_store_scope(&self, chain_id: &str, store_id: &str) -> Result<()> {
        let table = scope_table(chain_id, store_id)?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                item_code TEXT PRIMARY KEY,
                item_name TEXT,
                manufacturer_name TEXT,
                manufacturer_item_id TEXT,
                quantity DOUBLE PRECISION,
                unit_of_measure TEXT,
                unit_qty TEXT,
                is_weighted BOOLEAN NOT NULL DEFAULT FALSE,
                item_price DOUBLE PRECISION,
                unit_price DOUBLE PRECISION,
                price_update_date TEXT,
                store_name TEXT,
                promotion_id TEXT,
                promotion_description TEXT,
                promotion_update_date TEXT,
                promotion_start_date TEXT,
                promotion_start_hour TEXT,
                promotion_end_date TEXT,
                promotion_end_hour TEXT,
                min_qty DOUBLE PRECISION,
                discounted_price DOUBLE PRECISION,
                discounted_price_per_unit DOUBLE PRECISION,
                min_offered_qty DOUBLE PRECISION
             )"
        );
        sqlx::raw_sql(&ddl)
            .execute(&self.pool)
            .await
            .with_context(|| format!("creating {table}"))?;
        Ok(())
    }

    async fn upsert_products(
        &self,
        chain_id: &str,
        store_id: &str,
        products: &[ProductRecord],
    ) -> Result<usize> {
        if products.is_empty() {
            return Ok(0);
        }
        let table = scope_table(chain_id, store_id)?;
        let unique = dedup_last(products, |p| p.item_code.as_str());

        for chunk in unique.chunks(UPSERT_CHUNK) {
            let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {table} (item_code, item_name, manufacturer_name, \
                 manufacturer_item_id, quantity, unit_of_measure, unit_qty, is_weighted, \
                 item_price, unit_price, price_update_date) "
            ));
            qb.push_values(chunk.iter().copied(), |mut b, p| {
                b.push_bind(&p.item_code)
                    .push_bind(&p.item_name)
                    .push_bind(&p.manufacturer_name)
                    .push_bind(&p.manufacturer_item_id)
                    .push_bind(p.quantity)
                    .push_bind(&p.unit_of_measure)
                    .push_bind(&p.unit_qty)
                    .push_bind(p.is_weighted)
                    .push_bind(p.item_price)
                    .push_bind(p.unit_price)
                    .push_bind(&p.price_update_date);
            });
            // Replace every product field; promotion columns stay as the
            // last promotion file left them.
            qb.push(
                " ON CONFLICT (item_code) DO UPDATE SET
                    item_name = EXCLUDED.item_name,
                    manufacturer_name = EXCLUDED.manufacturer_name,
                    manufacturer_item_id = EXCLUDED.manufacturer_item_id,
                    quantity = EXCLUDED.quantity,
                    unit_of_measure = EXCLUDED.unit_of_measure,
                    unit_qty = EXCLUDED.unit_qty,
                    is_weighted = EXCLUDED.is_weighted,
                    item_price = EXCLUDED.item_price,
                    unit_price = EXCLUDED.unit_price,
                    price_update_date = EXCLUDED.price_update_date",
            );
            qb.build()
                .persistent(false)
                .execute(&self.pool)
                .await
                .with_context(|| format!("upserting products into {table}"))?;
        }
        Ok(products.len())
    }

    async fn apply_promotions(
        &self,
        chain_id: &str,
        store_id: &str,
        promotions: &[PromotionRecord],
    ) -> Result<PromoApply> {
        let table = scope_table(chain_id, store_id)?;
        let stmt = format!(
            "UPDATE {table} SET
                promotion_id = $1, promotion_description = $2,
                promotion_update_date = $3, promotion_start_date = $4,
                promotion_start_hour = $5, promotion_end_date = $6,
                promotion_end_hour = $7, min_qty = $8, discounted_price = $9,
                discounted_price_per_unit = $10, min_offered_qty = $11
             WHERE item_code = $12"
        );

        let mut apply = PromoApply::default();
        for promo in promotions {
            let result = sqlx::query(&stmt)
                .persistent(false)
                .bind(&promo.promotion_id)
                .bind(&promo.description)
                .bind(&promo.update_date)
                .bind(&promo.start_date)
                .bind(&promo.start_hour)
                .bind(&promo.end_date)
                .bind(&promo.end_hour)
                .bind(promo.min_qty)
                .bind(promo.discounted_price)
                .bind(promo.discounted_price_per_unit)
                .bind(promo.min_offered_qty)
                .bind(&promo.item_code)
                .execute(&self.pool)
                .await
                .with_context(|| format!("applying promotion to {table}"))?;
            if result.rows_affected() == 0 {
                apply.orphaned += 1;
            } else {
                apply.matched += 1;
            }
        }
        Ok(apply)
    }

    async fn upsert_stores(&self, stores: &[StoreRecord]) -> Result<usize> {
        if stores.is_empty() {
            return Ok(0);
        }
        // A branch can repeat across SubChains; one row per key.
        let unique = dedup_last(stores, |s| (s.chain_id.as_str(), s.store_id.as_str()));
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO stores (chain_id, store_id, store_name, address, city) ",
        );
        qb.push_values(unique.iter().copied(), |mut b, s| {
            b.push_bind(&s.chain_id)
                .push_bind(&s.store_id)
                .push_bind(&s.store_name)
                .push_bind(&s.address)
                .push_bind(&s.city);
        });
        qb.push(
            " ON CONFLICT (chain_id, store_id) DO UPDATE SET
                store_name = EXCLUDED.store_name,
                address = EXCLUDED.address,
                city = EXCLUDED.city",
        );
        qb.build()
            .persistent(false)
            .execute(&self.pool)
            .await
            .context("upserting store directory")?;

        // Push the composed name onto product rows for scopes that exist.
        for store in unique {
            let Ok(table) = scope_table(&store.chain_id, &store.store_id) else {
                continue;
            };
            if !self.table_visible(&table).await.unwrap_or(false) {
                continue;
            }
            sqlx::query(&format!("UPDATE {table} SET store_name = $1"))
                .persistent(false)
                .bind(&store.store_name)
                .execute(&self.pool)
                .await
                .with_context(|| format!("updating store_name on {table}"))?;
        }
        Ok(stores.len())
    }

    async fn upsert_index(&self, rows: &[GlobalIndexRecord]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        for chunk in rows.chunks(UPSERT_CHUNK) {
            let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
                "INSERT INTO products_index \
                 (item_code, item_name, manufacturer_name, category, has_promotion, updated_at) ",
            );
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(&r.item_code)
                    .push_bind(&r.item_name)
                    .push_bind(&r.manufacturer_name)
                    .push_bind(&r.category)
                    .push_bind(r.has_promotion)
                    .push_bind(r.last_updated);
            });
            // Descriptive fields are last-write-wins; the promotion flag is
            // owned by the dedicated flags pass.
            qb.push(
                " ON CONFLICT (item_code) DO UPDATE SET
                    item_name = EXCLUDED.item_name,
                    manufacturer_name = EXCLUDED.manufacturer_name,
                    category = EXCLUDED.category,
                    updated_at = EXCLUDED.updated_at",
            );
            qb.build()
                .persistent(false)
                .execute(&self.pool)
                .await
                .context("upserting products_index")?;
        }
        Ok(rows.len())
    }

    async fn update_promotion_flags(&self, flags: &[(String, bool)]) -> Result<usize> {
        let mut updated = 0usize;
        for (item_code, has_promotion) in flags {
            let result = sqlx::query(
                "UPDATE products_index SET has_promotion = $1, updated_at = now()
                 WHERE item_code = $2",
            )
            .persistent(false)
            .bind(has_promotion)
            .bind(item_code)
            .execute(&self.pool)
            .await
            .context("updating promotion flag")?;
            updated += result.rows_affected() as usize;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_table_accepts_digit_ids_and_preserves_zeros() {
        assert_eq!(
            scope_table("7290058140886", "028").unwrap(),
            "products_7290058140886_028"
        );
        assert_eq!(scope_table("0042", "").unwrap(), "products_0042");
    }

    #[test]
    fn batch_dedup_keeps_the_last_occurrence_per_key() {
        let batch = [("100", 6.90), ("200", 9.10), ("100", 7.20)];
        let unique = dedup_last(&batch, |(code, _)| *code);
        assert_eq!(unique.len(), 2);
        assert_eq!(*unique[0], ("100", 7.20));
        assert_eq!(*unique[1], ("200", 9.10));
    }

    #[test]
    fn scope_table_rejects_injection_shaped_ids() {
        assert!(scope_table("729; DROP TABLE stores", "028").is_err());
        assert!(scope_table("7290058140886", "028--").is_err());
        assert!(scope_table("", "028").is_err());
    }
}
