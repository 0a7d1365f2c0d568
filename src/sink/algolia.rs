//! Algolia [`CatalogStore`] adapter over the REST batch API.
//!
//! Index layout mirrors the Postgres one: a `products_{chain}_{store}`
//! index per store scope, a global `products_index`, and a `stores`
//! directory index. Promotion attachments use `partialUpdateObjectNoCreate`
//! so a promotion for an unknown item never materializes a phantom record;
//! the API gives no per-object miss signal though, so this adapter reports
//! every attachment as matched.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::model::{GlobalIndexRecord, ProductRecord, PromotionRecord, StoreRecord};
use crate::sink::{CatalogStore, PromoApply};

const BATCH_CHUNK: usize = 1000;

#[derive(Clone)]
pub struct AlgoliaStore {
    http: Client,
    app_id: String,
    api_key: String,
}

impl AlgoliaStore {
    pub fn new(app_id: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building algolia http client")?;
        Ok(Self {
            http,
            app_id: app_id.into(),
            api_key: api_key.into(),
        })
    }

    fn batch_url(&self, index: &str) -> String {
        format!(
            "https://{}.algolia.net/1/indexes/{index}/batch",
            self.app_id
        )
    }

    /// POST one batch of `{action, body}` requests to an index.
    async fn send_batch(&self, index: &str, requests: &[Value]) -> Result<()> {
        for chunk in requests.chunks(BATCH_CHUNK) {
            let resp = self
                .http
                .post(self.batch_url(index))
                .header("X-Algolia-Application-Id", &self.app_id)
                .header("X-Algolia-API-Key", &self.api_key)
                .json(&json!({ "requests": chunk }))
                .send()
                .await
                .with_context(|| format!("posting batch to index {index}"))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("algolia batch on {index} failed: {status} {body}");
            }
        }
        debug!(index, objects = requests.len(), "algolia batch applied");
        Ok(())
    }
}

fn scope_index(chain_id: &str, store_id: &str) -> String {
    if store_id.is_empty() {
        format!("products_{chain_id}")
    } else {
        format!("products_{chain_id}_{store_id}")
    }
}

/// Serialize a record and graft the Algolia object id onto it.
fn with_object_id<T: serde::Serialize>(record: &T, object_id: &str) -> Result<Value> {
    let mut body = serde_json::to_value(record).context("serializing record for algolia")?;
    body.as_object_mut()
        .context("record did not serialize to a JSON object")?
        .insert("objectID".into(), Value::String(object_id.to_string()));
    Ok(body)
}

#[async_trait]
impl CatalogStore for AlgoliaStore {
    /// Indexes are created implicitly on first write; nothing to do.
    async fn ensure_store_scope(&self, _chain_id: &str, _store_id: &str) -> Result<()> {
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
        let requests = products
            .iter()
            .map(|p| {
                Ok(json!({
                    "action": "updateObject",
                    "body": with_object_id(p, &p.item_code)?,
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        self.send_batch(&scope_index(chain_id, store_id), &requests)
            .await?;
        Ok(products.len())
    }

    async fn apply_promotions(
        &self,
        chain_id: &str,
        store_id: &str,
        promotions: &[PromotionRecord],
    ) -> Result<PromoApply> {
        if promotions.is_empty() {
            return Ok(PromoApply::default());
        }
        let requests = promotions
            .iter()
            .map(|promo| {
                Ok(json!({
                    "action": "partialUpdateObjectNoCreate",
                    "body": with_object_id(promo, &promo.item_code)?,
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        self.send_batch(&scope_index(chain_id, store_id), &requests)
            .await?;
        // NoCreate drops misses server-side without reporting them.
        Ok(PromoApply {
            matched: promotions.len(),
            orphaned: 0,
        })
    }

    async fn upsert_stores(&self, stores: &[StoreRecord]) -> Result<usize> {
        if stores.is_empty() {
            return Ok(0);
        }
        let requests = stores
            .iter()
            .map(|s| {
                let object_id = format!("{}-{}", s.chain_id, s.store_id);
                Ok(json!({
                    "action": "updateObject",
                    "body": with_object_id(s, &object_id)?,
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        self.send_batch("stores", &requests).await?;
        Ok(stores.len())
    }

    async fn upsert_index(&self, rows: &[GlobalIndexRecord]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let requests = rows
            .iter()
            .map(|r| {
                Ok(json!({
                    "action": "updateObject",
                    "body": with_object_id(r, &r.item_code)?,
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        self.send_batch("products_index", &requests).await?;
        Ok(rows.len())
    }

    async fn update_promotion_flags(&self, flags: &[(String, bool)]) -> Result<usize> {
        if flags.is_empty() {
            return Ok(0);
        }
        let requests: Vec<Value> = flags
            .iter()
            .map(|(item_code, has_promotion)| {
                json!({
                    "action": "partialUpdateObjectNoCreate",
                    "body": {
                        "objectID": item_code,
                        "has_promotion": has_promotion,
                    },
                })
            })
            .collect();
        self.send_batch("products_index", &requests).await?;
        Ok(flags.len())
    }
}
