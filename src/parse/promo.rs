//! Promotion-catalog parser: expands each promotion document into one
//! [`PromotionRecord`] per (promotion, item code) pair.

use crate::model::PromotionRecord;
use crate::parse::xml::{coerce_f64, XmlNode};

/// Extract promotion attachments from a parsed promo/promofull document.
///
/// Layout: `Root > Promotions > Promotion[]`, each carrying
/// `PromotionItems > Item[]`. Both repeated elements get the same
/// single-vs-array tolerance as the price parser. A promotion without an
/// id, or an item without a code, is skipped; there is nothing to attach.
pub fn parse_promo_document(root: &XmlNode) -> Vec<PromotionRecord> {
    let promotions: Vec<&XmlNode> = match root.child("Promotions") {
        Some(list) => list.children_named("Promotion"),
        None => root.children_named("Promotion"),
    };

    let mut out = Vec::new();
    for promo in promotions {
        let Some(promotion_id) = promo.text_of("PromotionId") else {
            tracing::debug!("dropping promotion without PromotionId");
            continue;
        };

        let items: Vec<&XmlNode> = match promo.child("PromotionItems") {
            Some(list) => list.children_named("Item"),
            None => Vec::new(),
        };

        for item in items {
            let Some(item_code) = item.text_of("ItemCode") else {
                continue;
            };
            out.push(PromotionRecord {
                promotion_id: promotion_id.to_string(),
                item_code: item_code.to_string(),
                description: promo.text_of("PromotionDescription").map(str::to_string),
                update_date: promo.text_of("PromotionUpdateDate").map(str::to_string),
                start_date: promo.text_of("PromotionStartDate").map(str::to_string),
                start_hour: promo.text_of("PromotionStartHour").map(str::to_string),
                end_date: promo.text_of("PromotionEndDate").map(str::to_string),
                end_hour: promo.text_of("PromotionEndHour").map(str::to_string),
                min_qty: coerce_f64(promo.text_of("MinQty")),
                discounted_price: coerce_f64(promo.text_of("DiscountedPrice")),
                discounted_price_per_unit: coerce_f64(
                    promo.text_of("DiscountedPricePerMida"),
                ),
                min_offered_qty: coerce_f64(promo.text_of("MinNoOfItemOfered")),
            });
        }
    }
    out
}
