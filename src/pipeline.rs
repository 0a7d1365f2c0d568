//! Pipeline orchestrator: classify → select → decode → parse → write, per
//! account, with per-file failure isolation.
//!
//! Accounts run sequentially: the portal is session-per-login and quick to
//! rate-limit. Files within an account also run sequentially, ordered by
//! document-type priority, because promotion updates must observe the
//! product rows their price file inserted.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::aggregate::RunAggregate;
use crate::config::Account;
use crate::decode::decode_payload;
use crate::error::FeedError;
use crate::model::{ClassifiedFile, ListingEntry};
use crate::parse::{parse_catalog, ParsedRecords};
use crate::select::select_latest;
use crate::sink::CatalogStore;

/// One authenticated portal session for one account.
#[async_trait]
pub trait PortalSession: Send + Sync {
    async fn list_files(&self) -> Result<Vec<ListingEntry>>;
    async fn fetch_file(&self, fname: &str) -> Result<Vec<u8>>;
}

/// Session factory. Opening performs the login; a failure here aborts the
/// account, not the run.
#[async_trait]
pub trait Portal: Send + Sync {
    async fn open(&self, account: &Account) -> Result<Box<dyn PortalSession>>;
}

/// Counters for one full run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub accounts_ok: usize,
    pub accounts_failed: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub products_written: usize,
    pub promotions_applied: usize,
    pub orphan_promotions: usize,
    pub stores_written: usize,
    pub index_rows: usize,
}

pub struct Pipeline<'a> {
    portal: &'a dyn Portal,
    store: &'a dyn CatalogStore,
    /// Optional secondary sink (search index); written best-effort after
    /// the primary.
    search: Option<&'a dyn CatalogStore>,
}

impl<'a> Pipeline<'a> {
    pub fn new(portal: &'a dyn Portal, store: &'a dyn CatalogStore) -> Self {
        Self {
            portal,
            store,
            search: None,
        }
    }

    pub fn with_search(mut self, search: &'a dyn CatalogStore) -> Self {
        self.search = Some(search);
        self
    }

    /// Run the full sync: every account, then one aggregate flush.
    pub async fn run(&self, accounts: &[Account]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut aggregate = RunAggregate::new();

        for account in accounts {
            match self.run_account(account, &mut aggregate, &mut summary).await {
                Ok(()) => summary.accounts_ok += 1,
                Err(e) => {
                    warn!(account = %account.username, error = %e, "account aborted");
                    summary.accounts_failed += 1;
                }
            }
        }

        // Exactly one flush, at run end, across all accounts.
        let flushed = aggregate.flush(self.store).await?;
        summary.index_rows = flushed.index_rows;
        if let Some(search) = self.search {
            if let Err(e) = aggregate.flush(search).await {
                warn!(error = %e, "search index flush failed");
            }
        }
        Ok(summary)
    }

    async fn run_account(
        &self,
        account: &Account,
        aggregate: &mut RunAggregate,
        summary: &mut RunSummary,
    ) -> Result<()> {
        info!(account = %account.username, "account sync start");
        let session = self.portal.open(account).await?;
        let listing = session.list_files().await?;

        let mut selected = select_latest(&listing);
        // Stores before prices before promos; stable sort keeps listing
        // order within each class.
        selected.sort_by_key(|f| f.key.doc_type.dispatch_priority());
        info!(
            account = %account.username,
            listed = listing.len(),
            selected = selected.len(),
            "listing reduced to latest files"
        );

        for file in &selected {
            match self
                .process_file(session.as_ref(), file, aggregate, summary)
                .await
            {
                Ok(()) => summary.files_processed += 1,
                Err(e) => {
                    warn!(
                        account = %account.username,
                        file = %file.entry.fname,
                        error = %e,
                        "file skipped"
                    );
                    summary.files_skipped += 1;
                }
            }
        }
        Ok(())
    }

    async fn process_file(
        &self,
        session: &dyn PortalSession,
        file: &ClassifiedFile,
        aggregate: &mut RunAggregate,
        summary: &mut RunSummary,
    ) -> Result<(), FeedError> {
        let fname = &file.entry.fname;
        let bytes = session
            .fetch_file(fname)
            .await
            .map_err(FeedError::Transport)?;
        let xml = decode_payload(&bytes)?;
        let parsed = parse_catalog(&xml, &file.key)?;

        let chain_id = file.key.chain_id.as_str();
        let store_id = file.key.store_id.as_deref().unwrap_or_default();

        match &parsed {
            ParsedRecords::Products(products) => {
                self.store
                    .ensure_store_scope(chain_id, store_id)
                    .await
                    .map_err(FeedError::Sink)?;
                let written = self
                    .store
                    .upsert_products(chain_id, store_id, products)
                    .await
                    .map_err(FeedError::Sink)?;
                aggregate.record_products(products);
                summary.products_written += written;
                info!(file = %fname, written, "products upserted");
                if let Some(search) = self.search {
                    let _ = search.ensure_store_scope(chain_id, store_id).await;
                    if let Err(e) = search.upsert_products(chain_id, store_id, products).await {
                        warn!(file = %fname, error = %e, "search product write failed");
                    }
                }
            }
            ParsedRecords::Promotions(promotions) => {
                self.store
                    .ensure_store_scope(chain_id, store_id)
                    .await
                    .map_err(FeedError::Sink)?;
                let apply = self
                    .store
                    .apply_promotions(chain_id, store_id, promotions)
                    .await
                    .map_err(FeedError::Sink)?;
                if apply.orphaned > 0 {
                    // Promotion references an item this store never
                    // published a price for. Surfaced, not swallowed.
                    warn!(
                        file = %fname,
                        orphaned = apply.orphaned,
                        "orphan promotions: no matching product rows"
                    );
                }
                aggregate.record_promotions(chain_id, store_id, promotions);
                summary.promotions_applied += apply.matched;
                summary.orphan_promotions += apply.orphaned;
                info!(file = %fname, matched = apply.matched, "promotions applied");
                if let Some(search) = self.search {
                    let _ = search.ensure_store_scope(chain_id, store_id).await;
                    if let Err(e) = search.apply_promotions(chain_id, store_id, promotions).await
                    {
                        warn!(file = %fname, error = %e, "search promotion write failed");
                    }
                }
            }
            ParsedRecords::Stores(stores) => {
                let written = self
                    .store
                    .upsert_stores(stores)
                    .await
                    .map_err(FeedError::Sink)?;
                summary.stores_written += written;
                info!(file = %fname, written, "store directory upserted");
                if let Some(search) = self.search {
                    if let Err(e) = search.upsert_stores(stores).await {
                        warn!(file = %fname, error = %e, "search store write failed");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryStore;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::HashMap;
    use std::io::Write;

    fn gz(data: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    /// Canned portal: per-account listings and file payloads.
    #[derive(Default)]
    struct FakePortal {
        listings: HashMap<String, Vec<ListingEntry>>,
        files: HashMap<String, Vec<u8>>,
        broken_accounts: Vec<String>,
    }

    struct FakeSession {
        listing: Vec<ListingEntry>,
        files: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl Portal for FakePortal {
        async fn open(&self, account: &Account) -> Result<Box<dyn PortalSession>> {
            if self.broken_accounts.contains(&account.username) {
                anyhow::bail!("login rejected for {}", account.username);
            }
            Ok(Box::new(FakeSession {
                listing: self
                    .listings
                    .get(&account.username)
                    .cloned()
                    .unwrap_or_default(),
                files: self.files.clone(),
            }))
        }
    }

    #[async_trait]
    impl PortalSession for FakeSession {
        async fn list_files(&self) -> Result<Vec<ListingEntry>> {
            Ok(self.listing.clone())
        }

        async fn fetch_file(&self, fname: &str) -> Result<Vec<u8>> {
            self.files
                .get(fname)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such file {fname}"))
        }
    }

    fn account(name: &str) -> Account {
        Account {
            username: name.into(),
            password: Some("pw".into()),
        }
    }

    const PRICE_XML: &str = r#"<Root><Items>
        <Item><ItemCode>100</ItemCode><ItemName>Milk</ItemName><ItemPrice>6.90</ItemPrice></Item>
        <Item><ItemCode>200</ItemCode><ItemName>Bread</ItemName><ItemPrice>9.10</ItemPrice></Item>
    </Items></Root>"#;

    const PROMO_XML: &str = r#"<Root><Promotions><Promotion>
        <PromotionId>555</PromotionId><DiscountedPrice>5.00</DiscountedPrice>
        <PromotionItems><Item><ItemCode>100</ItemCode></Item><Item><ItemCode>999</ItemCode></Item></PromotionItems>
    </Promotion></Promotions></Root>"#;

    const STORES_XML: &str = r#"<Root><ChainID>7290058140886</ChainID><ChainName>Rami Levy</ChainName>
        <SubChains><SubChain><Stores>
            <Store><StoreID>5</StoreID><StoreName>Talpiot</StoreName></Store>
        </Stores></SubChain></SubChains></Root>"#;

    fn full_portal() -> FakePortal {
        let mut portal = FakePortal::default();
        // Promo listed before price: priority ordering must reorder them.
        // Two price generations for the same slot: only the newer survives.
        portal.listings.insert(
            "chain-user".into(),
            vec![
                ListingEntry::named("Promo7290058140886-028-202506250010.gz"),
                ListingEntry::named("PriceFull7290058140886-028-202506240010.gz"),
                ListingEntry::named("PriceFull7290058140886-028-202506250010.gz"),
                ListingEntry::named("Stores7290058140886-202506250010.gz"),
                ListingEntry::named("readme.txt"),
            ],
        );
        portal.files.insert(
            "PriceFull7290058140886-028-202506250010.gz".into(),
            gz(PRICE_XML),
        );
        portal.files.insert(
            "PriceFull7290058140886-028-202506240010.gz".into(),
            gz("<Root><Items><Item><ItemCode>stale</ItemCode></Item></Items></Root>"),
        );
        portal.files.insert(
            "Promo7290058140886-028-202506250010.gz".into(),
            gz(PROMO_XML),
        );
        portal.files.insert(
            "Stores7290058140886-202506250010.gz".into(),
            gz(STORES_XML),
        );
        portal
    }

    #[tokio::test]
    async fn end_to_end_single_account() {
        let portal = full_portal();
        let store = MemoryStore::new();
        let summary = Pipeline::new(&portal, &store)
            .run(&[account("chain-user")])
            .await
            .unwrap();

        assert_eq!(summary.accounts_ok, 1);
        assert_eq!(summary.files_processed, 3);
        assert_eq!(summary.products_written, 2);
        assert_eq!(summary.promotions_applied, 1);
        assert_eq!(summary.orphan_promotions, 1);
        assert_eq!(summary.stores_written, 1);
        assert_eq!(summary.index_rows, 2);

        // The stale price generation never reached the store.
        let rows = store.scope_rows("7290058140886", "028");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.product.item_code != "stale"));
        assert!(rows.iter().all(|r| r.product.chain_id == "7290058140886"));
        assert!(rows.iter().all(|r| r.product.store_id == "028"));

        // Promo listed first in the raw listing still landed after prices.
        let milk = rows.iter().find(|r| r.product.item_code == "100").unwrap();
        assert_eq!(milk.promotion.as_ref().unwrap().promotion_id, "555");

        // Store directory row was padded and composed.
        let stores = store.store_directory();
        assert_eq!(stores[0].store_id, "005");
        assert_eq!(stores[0].store_name, "Rami Levy - Talpiot");

        // Global index: item 100 discounted 5.00 under 6.90 plus promo id.
        assert!(store.index_row("100").unwrap().has_promotion);
        assert!(!store.index_row("200").unwrap().has_promotion);
    }

    #[tokio::test]
    async fn corrupt_file_is_skipped_without_aborting_the_account() {
        let mut portal = full_portal();
        // Truncate the promo payload so gzip decode fails.
        let broken = {
            let mut b = gz(PROMO_XML);
            b.truncate(b.len() / 2);
            b
        };
        portal
            .files
            .insert("Promo7290058140886-028-202506250010.gz".into(), broken);

        let store = MemoryStore::new();
        let summary = Pipeline::new(&portal, &store)
            .run(&[account("chain-user")])
            .await
            .unwrap();

        assert_eq!(summary.files_skipped, 1);
        assert_eq!(summary.files_processed, 2);
        // Products still landed.
        assert_eq!(store.scope_rows("7290058140886", "028").len(), 2);
    }

    #[tokio::test]
    async fn failed_account_does_not_abort_the_rest() {
        let mut portal = full_portal();
        portal.broken_accounts.push("locked-out".into());

        let store = MemoryStore::new();
        let summary = Pipeline::new(&portal, &store)
            .run(&[account("locked-out"), account("chain-user")])
            .await
            .unwrap();

        assert_eq!(summary.accounts_failed, 1);
        assert_eq!(summary.accounts_ok, 1);
        assert_eq!(summary.products_written, 2);
    }

    #[tokio::test]
    async fn rerunning_the_same_listing_is_idempotent() {
        let portal = full_portal();
        let store = MemoryStore::new();
        let pipeline = Pipeline::new(&portal, &store);

        pipeline.run(&[account("chain-user")]).await.unwrap();
        let once = store.scope_rows("7290058140886", "028");
        pipeline.run(&[account("chain-user")]).await.unwrap();
        let twice = store.scope_rows("7290058140886", "028");
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn search_sink_receives_mirrored_writes() {
        let portal = full_portal();
        let store = MemoryStore::new();
        let search = MemoryStore::new();
        Pipeline::new(&portal, &store)
            .with_search(&search)
            .run(&[account("chain-user")])
            .await
            .unwrap();

        assert_eq!(search.scope_rows("7290058140886", "028").len(), 2);
        assert!(search.index_row("100").unwrap().has_promotion);
    }
}
