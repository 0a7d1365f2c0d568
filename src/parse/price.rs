//! Price-catalog parser: normalized [`ProductRecord`]s from a decoded
//! price/pricefull document.

use crate::model::{FileKey, ProductRecord};
use crate::parse::xml::{coerce_f64, coerce_flag, XmlNode};

/// Extract product records from a parsed price document.
///
/// The item list has been observed both as `Root > Items > Item` and as
/// `Root > Item` directly, and the root element name itself varies by
/// chain, so only the structure below the root is consulted. An absent
/// item list yields an empty set, never an error.
///
/// Records without an item code are dropped; any other bad field is nulled
/// and the record kept. Chain and store scope default to the filename key,
/// which is authoritative (the XML copies are inconsistently padded).
pub fn parse_price_document(root: &XmlNode, key: &FileKey) -> Vec<ProductRecord> {
    let items: Vec<&XmlNode> = match root.child("Items") {
        Some(list) => list.children_named("Item"),
        None => root.children_named("Item"),
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(item_code) = item.text_of("ItemCode") else {
            tracing::debug!("dropping price row without ItemCode");
            continue;
        };

        out.push(ProductRecord {
            item_code: item_code.to_string(),
            item_name: item.text_of("ItemName").map(str::to_string),
            manufacturer_name: item.text_of("ManufacturerName").map(str::to_string),
            manufacturer_item_id: item
                .text_of("ManufacturerItemCode")
                .or_else(|| item.text_of("ManufacturerItemId"))
                .map(str::to_string),
            quantity: coerce_f64(item.text_of("Quantity")),
            unit_of_measure: item.text_of("UnitOfMeasure").map(str::to_string),
            unit_qty: item.text_of("UnitQty").map(str::to_string),
            is_weighted: coerce_flag(item.text_of("BIsWeighted")),
            item_price: coerce_f64(item.text_of("ItemPrice")),
            unit_price: coerce_f64(
                item.text_of("UnitOfMeasurePrice")
                    .or_else(|| item.text_of("UnitPrice")),
            ),
            price_update_date: item.text_of("PriceUpdateDate").map(str::to_string),
            store_id: key
                .store_id
                .clone()
                .or_else(|| item.text_of("StoreId").map(str::to_string))
                .unwrap_or_default(),
            chain_id: key.chain_id.clone(),
        });
    }
    out
}
