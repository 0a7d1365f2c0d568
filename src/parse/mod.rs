//! Schema parsers: decoded XML text in, normalized records out.
//!
//! Three independent parsers share one contract: tolerate schema drift
//! (missing optional nodes, single-vs-array child encoding, tag casing),
//! return an empty set when the expected structure is absent, and fail
//! only on XML that is malformed outright.

pub mod price;
pub mod promo;
pub mod stores;
pub mod xml;

use crate::error::FeedError;
use crate::model::{DocumentType, FileKey, ProductRecord, PromotionRecord, StoreRecord};

/// Output of one parsed catalog file.
#[derive(Debug, Clone)]
pub enum ParsedRecords {
    Products(Vec<ProductRecord>),
    Promotions(Vec<PromotionRecord>),
    Stores(Vec<StoreRecord>),
}

impl ParsedRecords {
    pub fn len(&self) -> usize {
        match self {
            Self::Products(v) => v.len(),
            Self::Promotions(v) => v.len(),
            Self::Stores(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse decoded XML text according to the file's document type.
pub fn parse_catalog(xml_text: &str, key: &FileKey) -> Result<ParsedRecords, FeedError> {
    let root = xml::parse_document(xml_text)?;
    Ok(match key.doc_type {
        DocumentType::PriceFull | DocumentType::Price => {
            ParsedRecords::Products(price::parse_price_document(&root, key))
        }
        DocumentType::PromoFull | DocumentType::Promo => {
            ParsedRecords::Promotions(promo::parse_promo_document(&root))
        }
        DocumentType::Stores => ParsedRecords::Stores(stores::parse_store_document(&root, key)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_by_document_type() {
        let price_key = FileKey {
            doc_type: DocumentType::Price,
            chain_id: "1".into(),
            store_id: Some("001".into()),
        };
        let parsed = parse_catalog(
            "<Root><Items><Item><ItemCode>1</ItemCode></Item></Items></Root>",
            &price_key,
        )
        .unwrap();
        assert!(matches!(parsed, ParsedRecords::Products(ref v) if v.len() == 1));

        let promo_key = FileKey {
            doc_type: DocumentType::Promo,
            ..price_key.clone()
        };
        let parsed = parse_catalog("<Root/>", &promo_key).unwrap();
        assert!(matches!(parsed, ParsedRecords::Promotions(ref v) if v.is_empty()));
    }

    #[test]
    fn malformed_xml_surfaces_as_parse_error() {
        let key = FileKey {
            doc_type: DocumentType::Price,
            chain_id: "1".into(),
            store_id: None,
        };
        assert!(matches!(
            parse_catalog("<Root><Items>", &key),
            Err(FeedError::Parse(_))
        ));
    }
}
