//! Store-directory parser: branch records with zero-padded store ids.

use crate::model::{FileKey, StoreRecord};
use crate::parse::xml::XmlNode;

/// Extract branch records from a parsed store-directory document.
///
/// Two layouts circulate: the current nested shape
/// `Root > SubChains > SubChain[] > Stores > Store[]` and an older flat
/// `Stores > Store[]` (sometimes as the root element itself). Both are
/// accepted; neither being present yields an empty set.
///
/// The 3-digit zero padding of the store id is load-bearing: it is the
/// join key against product rows, whose store scope comes from the
/// already-padded filename segment.
pub fn parse_store_document(root: &XmlNode, key: &FileKey) -> Vec<StoreRecord> {
    let chain_id = root
        .text_of("ChainId")
        .map(str::to_string)
        .unwrap_or_else(|| key.chain_id.clone());
    let chain_name = root.text_of("ChainName").unwrap_or_default().to_string();

    let mut store_nodes: Vec<&XmlNode> = Vec::new();
    if let Some(subchains) = root.child("SubChains") {
        for subchain in subchains.children_named("SubChain") {
            if let Some(stores) = subchain.child("Stores") {
                store_nodes.extend(stores.children_named("Store"));
            }
        }
    }
    if store_nodes.is_empty() {
        if let Some(stores) = root.child("Stores") {
            store_nodes = stores.children_named("Store");
        } else if root.name.eq_ignore_ascii_case("Stores") {
            store_nodes = root.children_named("Store");
        }
    }

    let mut out = Vec::with_capacity(store_nodes.len());
    for store in store_nodes {
        let Some(raw_id) = store.text_of("StoreId") else {
            tracing::debug!("dropping store row without StoreId");
            continue;
        };
        let Ok(numeric) = raw_id.parse::<u32>() else {
            tracing::debug!(raw_id, "dropping store row with non-numeric StoreId");
            continue;
        };
        let store_id = format!("{numeric:03}");
        let raw_name = store.text_of("StoreName").unwrap_or_default();

        out.push(StoreRecord {
            chain_id: chain_id.clone(),
            store_id,
            store_name: format!("{chain_name} - {raw_name}"),
            address: store.text_of("Address").map(str::to_string),
            city: store.text_of("City").map(str::to_string),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentType;
    use crate::parse::xml::parse_document;

    fn key() -> FileKey {
        FileKey {
            doc_type: DocumentType::Stores,
            chain_id: "7290058140886".into(),
            store_id: None,
        }
    }

    const NESTED: &str = r#"<Root>
        <ChainID>7290058140886</ChainID>
        <ChainName>Rami Levy</ChainName>
        <SubChains><SubChain><Stores>
            <Store><StoreID>5</StoreID><StoreName>Talpiot</StoreName>
                   <Address>Oley HaGardom 17</Address><City>Jerusalem</City></Store>
            <Store><StoreID>28</StoreID><StoreName>Modiin</StoreName></Store>
        </Stores></SubChain></SubChains>
    </Root>"#;

    #[test]
    fn pads_store_ids_to_three_digits() {
        let records = parse_store_document(&parse_document(NESTED).unwrap(), &key());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].store_id, "005");
        assert_eq!(records[1].store_id, "028");
    }

    #[test]
    fn composes_store_name_from_chain_and_branch() {
        let records = parse_store_document(&parse_document(NESTED).unwrap(), &key());
        assert_eq!(records[0].store_name, "Rami Levy - Talpiot");
        assert_eq!(records[0].address.as_deref(), Some("Oley HaGardom 17"));
        assert_eq!(records[0].city.as_deref(), Some("Jerusalem"));
        assert_eq!(records[1].address, None);
    }

    #[test]
    fn chain_id_falls_back_to_the_filename_key() {
        let xml = r#"<Root><ChainName>X</ChainName>
            <SubChains><SubChain><Stores>
                <Store><StoreId>1</StoreId><StoreName>A</StoreName></Store>
            </Stores></SubChain></SubChains></Root>"#;
        let records = parse_store_document(&parse_document(xml).unwrap(), &key());
        assert_eq!(records[0].chain_id, "7290058140886");
    }

    #[test]
    fn accepts_the_flat_legacy_layout() {
        let xml = r#"<Stores>
            <Store><StoreId>7</StoreId><StoreName>B</StoreName><ChainId>111</ChainId></Store>
        </Stores>"#;
        let records = parse_store_document(&parse_document(xml).unwrap(), &key());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].store_id, "007");
    }

    #[test]
    fn single_store_collapse_is_tolerated() {
        let xml = r#"<Root><ChainName>C</ChainName>
            <SubChains><SubChain><Stores>
                <Store><StoreID>9</StoreID><StoreName>Solo</StoreName></Store>
            </Stores></SubChain></SubChains></Root>"#;
        let records = parse_store_document(&parse_document(xml).unwrap(), &key());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].store_id, "009");
    }
}
