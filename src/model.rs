//! Normalized record model shared by the parsers, the writer and the sinks.
//!
//! Chain and store ids are opaque text throughout: they look numeric but
//! leading zeros are significant (store "028" joins against "028", never 28).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One row of the upstream directory listing, as returned by the portal's
/// DataTables endpoint. Ephemeral; lives only within one pipeline run.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingEntry {
    pub fname: String,
    /// Source-reported modification time. The portal encodes this
    /// inconsistently (string or epoch number), so it is normalized to text
    /// on deserialize. Not authoritative for freshness; the embedded
    /// filename timestamp is.
    #[serde(default, deserialize_with = "string_or_number")]
    pub ftime: String,
    #[serde(default, deserialize_with = "u64_or_string")]
    pub size: u64,
    /// Upstream-provided type label. Not authoritative; classification
    /// happens on the filename alone.
    #[serde(default, rename = "typeLabel")]
    pub type_label: String,
}

impl ListingEntry {
    pub fn named(fname: impl Into<String>) -> Self {
        Self {
            fname: fname.into(),
            ftime: String::new(),
            size: 0,
            type_label: String::new(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    let v = serde_json::Value::deserialize(de)?;
    Ok(match v {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn u64_or_string<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    let v = serde_json::Value::deserialize(de)?;
    Ok(match v {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Catalog document type, derived from the filename's leading token.
/// Upstream cases the token inconsistently, so parsing is case-insensitive
/// and the canonical form is lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    PriceFull,
    Price,
    PromoFull,
    Promo,
    Stores,
}

impl DocumentType {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "pricefull" => Some(Self::PriceFull),
            "price" => Some(Self::Price),
            "promofull" => Some(Self::PromoFull),
            "promo" => Some(Self::Promo),
            "stores" => Some(Self::Stores),
            _ => None,
        }
    }

    /// Canonical lowercase token, used as a map key and in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceFull => "pricefull",
            Self::Price => "price",
            Self::PromoFull => "promofull",
            Self::Promo => "promo",
            Self::Stores => "stores",
        }
    }

    /// Dispatch ordering within an account's batch: store directories
    /// first, then price catalogs, then promotions. Promotion updates must
    /// observe already-inserted product rows, so this ordering is load-
    /// bearing, not cosmetic.
    pub fn dispatch_priority(&self) -> u8 {
        match self {
            Self::Stores => 0,
            Self::PriceFull | Self::Price => 1,
            Self::PromoFull | Self::Promo => 2,
        }
    }
}

/// The logical slot a catalog file occupies. Exactly one listing entry may
/// be judged "latest" per key per run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub doc_type: DocumentType,
    pub chain_id: String,
    /// `Stores` files carry no store segment; the chain id alone
    /// discriminates them.
    pub store_id: Option<String>,
}

/// A listing entry that matched the catalog filename pattern.
#[derive(Debug, Clone)]
pub struct ClassifiedFile {
    pub entry: ListingEntry,
    pub key: FileKey,
    /// 12-digit YYYYMMDDHHmm publish timestamp embedded in the filename.
    /// Kept as text: the format is fixed-width zero-padded, so
    /// lexicographic comparison is chronological comparison.
    pub timestamp: String,
}

/// Normalized price-catalog row, scoped to one (chain, store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub item_code: String,
    pub item_name: Option<String>,
    pub manufacturer_name: Option<String>,
    pub manufacturer_item_id: Option<String>,
    pub quantity: Option<f64>,
    pub unit_of_measure: Option<String>,
    pub unit_qty: Option<String>,
    pub is_weighted: bool,
    pub item_price: Option<f64>,
    pub unit_price: Option<f64>,
    pub price_update_date: Option<String>,
    pub store_id: String,
    pub chain_id: String,
}

/// One promotion attachment: a promotion document lists N item codes per
/// promotion and each expands to one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub promotion_id: String,
    pub item_code: String,
    pub description: Option<String>,
    pub update_date: Option<String>,
    pub start_date: Option<String>,
    pub start_hour: Option<String>,
    pub end_date: Option<String>,
    pub end_hour: Option<String>,
    pub min_qty: Option<f64>,
    pub discounted_price: Option<f64>,
    pub discounted_price_per_unit: Option<f64>,
    pub min_offered_qty: Option<f64>,
}

/// One branch from a store-directory file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub chain_id: String,
    /// Zero-padded to 3 digits; this is the join key against product rows.
    pub store_id: String,
    /// Composed as "{chain name} - {raw store name}".
    pub store_name: String,
    pub address: Option<String>,
    pub city: Option<String>,
}

/// Cross-chain aggregate row, keyed by item code alone (no store scope).
/// Descriptive fields are last-write-wins within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalIndexRecord {
    pub item_code: String,
    pub item_name: Option<String>,
    pub manufacturer_name: Option<String>,
    /// Reserved; currently never populated.
    pub category: Option<String>,
    pub has_promotion: bool,
    pub last_updated: DateTime<Utc>,
}
