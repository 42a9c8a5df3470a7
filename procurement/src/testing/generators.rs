//! Property test generators for domain types.
//!
//! Each generator respects the validation rules of the type it produces.

use crate::finance::FinanceFields;
use crate::order::{DeliveryLine, DeliveryRecord, LineItem, OrderStatus};
use crate::types::{
    ActorName, DeliveryId, DeliveryLineId, LineId, OrderedQuantity, ProductId, SupplierId,
    SupplierSku, UnitPrice,
};
use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Generates valid `ProductId` values from a small pool, so generated orders
/// share products.
pub fn arb_product_id() -> impl Strategy<Value = ProductId> {
    "(widget|gadget|sprocket|flange)"
        .prop_filter_map("Invalid ProductId", |s| ProductId::try_new(s).ok())
}

/// Generates valid `SupplierSku` values.
pub fn arb_supplier_sku() -> impl Strategy<Value = SupplierSku> {
    "[A-Z]{1,3}-[0-9]{1,4}".prop_filter_map("Invalid SupplierSku", |s| SupplierSku::try_new(s).ok())
}

/// Generates valid `SupplierId` values.
pub fn arb_supplier_id() -> impl Strategy<Value = SupplierId> {
    "[a-z]{3,12}".prop_filter_map("Invalid SupplierId", |s| SupplierId::try_new(s).ok())
}

/// Generates valid `ActorName` values.
pub fn arb_actor() -> impl Strategy<Value = ActorName> {
    "[a-z]{2,10}( [a-z]{2,10})?".prop_filter_map("Invalid ActorName", |s| ActorName::try_new(s).ok())
}

/// Generates positive unit prices with cents.
pub fn arb_unit_price() -> impl Strategy<Value = UnitPrice> {
    (1i64..=1_000_000).prop_filter_map("Invalid UnitPrice", |cents| {
        UnitPrice::try_new(Decimal::new(cents, 2)).ok()
    })
}

/// Generates dates in 2024.
pub fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (1u32..=366).prop_filter_map("Invalid date", |ordinal| NaiveDate::from_yo_opt(2024, ordinal))
}

/// Generates a fresh order line with nothing received.
pub fn arb_line_item() -> impl Strategy<Value = LineItem> {
    (arb_product_id(), arb_supplier_sku(), 1u64..=500, arb_unit_price()).prop_map(
        |(product_id, sku, quantity, price)| {
            LineItem::new(
                LineId::generate(),
                product_id,
                sku,
                OrderedQuantity::try_new(quantity).expect("range is positive"),
                price,
            )
        },
    )
}

/// Generates between 1 and `max` order lines.
pub fn arb_line_items(max: usize) -> impl Strategy<Value = Vec<LineItem>> {
    prop::collection::vec(arb_line_item(), 1..=max.max(1))
}

/// Generates any order status.
pub fn arb_order_status() -> impl Strategy<Value = OrderStatus> {
    prop::sample::select(OrderStatus::ALL.to_vec())
}

/// Generates a delivery against `lines`.
///
/// Each line is independently left out, received up to twice its ordered
/// quantity, and possibly force-closed.
pub fn arb_delivery_for(lines: Vec<LineItem>) -> impl Strategy<Value = DeliveryRecord> {
    let per_line: Vec<_> = lines
        .iter()
        .map(|line| (prop::option::of(0..=line.ordered() * 2), any::<bool>()))
        .collect();
    let ids: Vec<LineId> = lines.iter().map(|line| line.id).collect();

    (per_line, arb_date(), arb_actor()).prop_map(move |(choices, date, received_by)| {
        let mut delivered = Vec::new();
        let mut force_close = Vec::new();
        for (line_id, (quantity, close)) in ids.iter().zip(choices) {
            if let Some(quantity) = quantity {
                delivered.push(DeliveryLine {
                    id: DeliveryLineId::generate(),
                    po_line_id: *line_id,
                    quantity,
                    finance: FinanceFields::default(),
                });
            }
            if close {
                force_close.push(*line_id);
            }
        }
        DeliveryRecord {
            id: DeliveryId::generate(),
            date,
            docket_reference: "DKT-PROP".to_string(),
            received_by,
            lines: delivered,
            force_close,
        }
    })
}

/// Generates a sequence of up to `max` deliveries against `lines`.
pub fn arb_deliveries_for(
    lines: Vec<LineItem>,
    max: usize,
) -> impl Strategy<Value = Vec<DeliveryRecord>> {
    prop::collection::vec(arb_delivery_for(lines), 0..=max)
}
