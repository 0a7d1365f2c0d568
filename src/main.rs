use anyhow::{Context, Result};
use pricefeed_sync::config::{load_accounts, SyncConfig};
use pricefeed_sync::pipeline::Pipeline;
use pricefeed_sync::portal::{PortalConfig, PublishedPricesPortal};
use pricefeed_sync::sink::algolia::AlgoliaStore;
use pricefeed_sync::sink::postgres::PgCatalogStore;
use pricefeed_sync::util::env as env_util;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,reqwest=warn")),
        )
        .init();

    let config = SyncConfig::from_env();
    let accounts = load_accounts(&config.accounts_file)
        .with_context(|| format!("loading accounts from {}", config.accounts_file))?;
    if accounts.is_empty() {
        anyhow::bail!("no portal accounts configured in {}", config.accounts_file);
    }
    info!(accounts = accounts.len(), "pricefeed sync starting");

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL is required")?;
    let db = PgCatalogStore::connect(&database_url, config.db_max_connections).await?;

    let search = match (&config.algolia_app_id, &config.algolia_admin_key) {
        (Some(app_id), Some(key)) => {
            info!(app_id = %app_id, "search index mirroring enabled");
            Some(AlgoliaStore::new(app_id.clone(), key.clone())?)
        }
        _ => None,
    };

    let portal = PublishedPricesPortal::new(PortalConfig {
        base_url: config.portal_base_url.clone(),
        insecure_tls: config.insecure_tls,
        ..PortalConfig::default()
    })?;

    let run_once = env_util::env_flag("SYNC_ONCE", false);
    let loop_secs: u64 = env_util::env_parse("SYNC_LOOP_SECS", 6 * 60 * 60);

    let mut ticker = tokio::time::interval(Duration::from_secs(loop_secs.max(60)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_sync(&portal, &db, search.as_ref(), &accounts).await;
                if run_once {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }
    Ok(())
}

async fn run_sync(
    portal: &PublishedPricesPortal,
    db: &PgCatalogStore,
    search: Option<&AlgoliaStore>,
    accounts: &[pricefeed_sync::config::Account],
) {
    let started = std::time::Instant::now();
    let mut pipeline = Pipeline::new(portal, db);
    if let Some(search) = search {
        pipeline = pipeline.with_search(search);
    }

    match pipeline.run(accounts).await {
        Ok(summary) => {
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                accounts_ok = summary.accounts_ok,
                accounts_failed = summary.accounts_failed,
                files_processed = summary.files_processed,
                files_skipped = summary.files_skipped,
                products = summary.products_written,
                promotions = summary.promotions_applied,
                orphan_promotions = summary.orphan_promotions,
                stores = summary.stores_written,
                index_rows = summary.index_rows,
                "sync run complete"
            );
            if summary.orphan_promotions > 0 {
                warn!(
                    orphans = summary.orphan_promotions,
                    "promotions referenced items with no price rows"
                );
            }
        }
        Err(e) => error!(error = %e, "sync run failed"),
    }
}
