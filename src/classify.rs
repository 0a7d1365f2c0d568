//! Filename classifier: parses a catalog filename into its logical key and
//! embedded publish timestamp.

use regex::Regex;
use std::sync::OnceLock;

use crate::model::{ClassifiedFile, DocumentType, FileKey, ListingEntry};

/// Canonical catalog filename pattern. The type token is cased
/// inconsistently upstream, hence `(?i)`. The store segment is absent on
/// `Stores` files.
fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(PriceFull|Price|PromoFull|Promo|Stores)(\d+)(?:-(\d+))?-(\d{12})\.gz$")
            .expect("catalog filename pattern")
    })
}

/// Classify one listing entry. `None` means the filename does not look like
/// a catalog file; callers filter these silently rather than treating them
/// as errors.
pub fn classify(entry: &ListingEntry) -> Option<ClassifiedFile> {
    let caps = pattern().captures(&entry.fname)?;
    let doc_type = DocumentType::from_token(caps.get(1)?.as_str())?;
    let chain_id = caps.get(2)?.as_str().to_string();
    let store_id = caps.get(3).map(|m| m.as_str().to_string());
    let timestamp = caps.get(4)?.as_str().to_string();

    Some(ClassifiedFile {
        entry: entry.clone(),
        key: FileKey {
            doc_type,
            chain_id,
            store_id,
        },
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_name(name: &str) -> Option<ClassifiedFile> {
        classify(&ListingEntry::named(name))
    }

    #[test]
    fn parses_full_price_filename() {
        let c = classify_name("PriceFull7290058140886-028-202506250010.gz").unwrap();
        assert_eq!(c.key.doc_type, DocumentType::PriceFull);
        assert_eq!(c.key.chain_id, "7290058140886");
        assert_eq!(c.key.store_id.as_deref(), Some("028"));
        assert_eq!(c.timestamp, "202506250010");
    }

    #[test]
    fn stores_files_have_no_store_segment() {
        let c = classify_name("Stores7290058140886-202506250010.gz").unwrap();
        assert_eq!(c.key.doc_type, DocumentType::Stores);
        assert_eq!(c.key.chain_id, "7290058140886");
        assert_eq!(c.key.store_id, None);
    }

    #[test]
    fn type_token_case_is_normalized() {
        let lower = classify_name("pricefull7290058140886-028-202506250010.gz").unwrap();
        let mixed = classify_name("PrIcEfUlL7290058140886-028-202506250010.gz").unwrap();
        assert_eq!(lower.key, mixed.key);
        assert_eq!(lower.key.doc_type.as_str(), "pricefull");
    }

    #[test]
    fn price_and_pricefull_are_distinct_keys() {
        let full = classify_name("PriceFull7290058140886-028-202506250010.gz").unwrap();
        let delta = classify_name("Price7290058140886-028-202506250010.gz").unwrap();
        assert_eq!(full.key.doc_type, DocumentType::PriceFull);
        assert_eq!(delta.key.doc_type, DocumentType::Price);
        assert_ne!(full.key, delta.key);
    }

    #[test]
    fn leading_zeros_survive_as_text() {
        let c = classify_name("Promo0042-007-202501010000.gz").unwrap();
        assert_eq!(c.key.chain_id, "0042");
        assert_eq!(c.key.store_id.as_deref(), Some("007"));
    }

    #[test]
    fn rejects_non_catalog_filenames() {
        for name in [
            "readme.txt",
            "Price-badformat.gz",
            "PriceFull7290058140886-028-202506250010.xml",
            "PriceFull7290058140886-028-2025062500.gz", // short timestamp
            "Invoice7290058140886-028-202506250010.gz",
            "PriceFull7290058140886-028-202506250010.gz.bak",
        ] {
            assert!(classify_name(name).is_none(), "should reject {name}");
        }
    }
}
