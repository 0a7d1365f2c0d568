//! Published-prices portal transport: login, directory listing, file
//! download. The core pipeline only sees the [`Portal`]/[`PortalSession`]
//! traits; everything HTTP lives here.
//!
//! The portal is a classic server-rendered app: a login form protected by
//! a CSRF meta tag, a DataTables JSON endpoint for the directory listing,
//! and plain GET downloads that ride the session cookie.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Account;
use crate::model::ListingEntry;
use crate::pipeline::{Portal, PortalSession};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/108.0.0.0 Safari/537.36";

fn csrf_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<meta\s+name="csrftoken"\s+content="([^"]+)""#).expect("csrf meta pattern")
    })
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub fetch_retries: u32,
    pub retry_base_ms: u64,
    /// Accept invalid certificates, as the original deployment did.
    /// Off by default.
    pub insecure_tls: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://url.publishedprices.co.il".into(),
            timeout_secs: 60,
            fetch_retries: 3,
            retry_base_ms: 300,
            insecure_tls: false,
        }
    }
}

/// Session factory: one cookie jar and login per account.
pub struct PublishedPricesPortal {
    config: PortalConfig,
}

impl PublishedPricesPortal {
    pub fn new(config: PortalConfig) -> Result<Self> {
        Url::parse(&config.base_url)
            .with_context(|| format!("invalid portal base url {}", config.base_url))?;
        Ok(Self { config })
    }
}

#[async_trait]
impl Portal for PublishedPricesPortal {
    async fn open(&self, account: &Account) -> Result<Box<dyn PortalSession>> {
        let session = PortalHttpSession::login(&self.config, account).await?;
        Ok(Box::new(session))
    }
}

pub struct PortalHttpSession {
    http: Client,
    base: Url,
    csrftoken: String,
    config: PortalConfig,
}

#[derive(Debug, Deserialize)]
struct DirResponse {
    #[serde(default, rename = "aaData")]
    aa_data: Vec<ListingEntry>,
}

impl PortalHttpSession {
    async fn login(config: &PortalConfig, account: &Account) -> Result<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()
            .context("building portal http client")?;
        let base = Url::parse(&config.base_url)?;

        info!(account = %account.username, "portal login");
        let login_url = base.join("/login")?;
        let page = http
            .get(login_url.clone())
            .send()
            .await
            .context("fetching login page")?
            .error_for_status()
            .context("login page status")?
            .text()
            .await?;
        let csrf = extract_csrf(&page)
            .ok_or_else(|| anyhow!("login page has no csrftoken meta tag"))?;

        let resp = http
            .post(base.join("/login/user")?)
            .form(&[
                ("username", account.username.as_str()),
                ("password", account.password.as_deref().unwrap_or("")),
                ("csrftoken", csrf.as_str()),
            ])
            .send()
            .await
            .context("submitting login form")?;
        if !resp.status().is_success() && !resp.status().is_redirection() {
            bail!("login rejected with status {}", resp.status());
        }

        // The post-login landing page carries the token the dir endpoint
        // wants; re-read it rather than reusing the pre-login one.
        let home = http
            .get(base.join("/file")?)
            .send()
            .await
            .context("fetching file browser page")?
            .text()
            .await?;
        let csrftoken = extract_csrf(&home).unwrap_or(csrf);

        Ok(Self {
            http,
            base,
            csrftoken,
            config: config.clone(),
        })
    }
}

fn extract_csrf(html: &str) -> Option<String> {
    csrf_pattern()
        .captures(html)
        .map(|c| c[1].to_string())
}

#[async_trait]
impl PortalSession for PortalHttpSession {
    async fn list_files(&self) -> Result<Vec<ListingEntry>> {
        // DataTables server-side protocol, as the portal's own browser UI
        // sends it. iDisplayLength is effectively "everything".
        let form: Vec<(&str, &str)> = vec![
            ("sEcho", "1"),
            ("iColumns", "5"),
            ("sColumns", ",,,,"),
            ("iDisplayStart", "0"),
            ("iDisplayLength", "100000"),
            ("mDataProp_0", "fname"),
            ("mDataProp_1", "typeLabel"),
            ("mDataProp_2", "size"),
            ("mDataProp_3", "ftime"),
            ("mDataProp_4", ""),
            ("sSearch", ""),
            ("bRegex", "false"),
            ("iSortingCols", "0"),
            ("cd", "/"),
            ("csrftoken", self.csrftoken.as_str()),
        ];

        let resp = self
            .http
            .post(self.base.join("/file/json/dir")?)
            .form(&form)
            .send()
            .await
            .context("posting directory listing request")?
            .error_for_status()
            .context("directory listing status")?;

        let dir: DirResponse = resp
            .json()
            .await
            .context("directory listing was not the expected JSON; login may have failed")?;
        debug!(files = dir.aa_data.len(), "directory listing fetched");
        Ok(dir.aa_data)
    }

    async fn fetch_file(&self, fname: &str) -> Result<Vec<u8>> {
        let url = self.base.join(&format!("/file/d/{fname}"))?;
        let mut last_err = None;

        for attempt in 0..=self.config.fetch_retries {
            if attempt > 0 {
                let jitter = rand::thread_rng().gen_range(0..self.config.retry_base_ms);
                let backoff = self.config.retry_base_ms * (1 << (attempt - 1)) + jitter;
                warn!(fname, attempt, backoff_ms = backoff, "retrying file fetch");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            match self.try_fetch(&url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("fetch failed with no attempts")))
    }
}

impl PortalHttpSession {
    async fn try_fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .context("downloading file")?
            .error_for_status()
            .context("download status")?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_csrf_token_from_login_page() {
        let html = r#"<html><head>
            <meta name="csrftoken" content="abc123DEF"/>
        </head></html>"#;
        assert_eq!(extract_csrf(html).as_deref(), Some("abc123DEF"));
        assert_eq!(extract_csrf("<html></html>"), None);
    }

    #[test]
    fn listing_response_shape_matches_the_portal() {
        let raw = r#"{"sEcho":1,"aaData":[
            {"fname":"PriceFull7290058140886-028-202506250010.gz",
             "typeLabel":"PriceFull","size":123456,"ftime":"2025-06-25 00:12"}
        ]}"#;
        let dir: DirResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(dir.aa_data.len(), 1);
        assert_eq!(
            dir.aa_data[0].fname,
            "PriceFull7290058140886-028-202506250010.gz"
        );
    }

    #[test]
    fn missing_aa_data_defaults_to_empty() {
        let dir: DirResponse = serde_json::from_str(r#"{"sEcho":1}"#).unwrap();
        assert!(dir.aa_data.is_empty());
    }
}
