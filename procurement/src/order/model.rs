//! The order read model, rebuilt from events.

use crate::finance::FinanceFields;
use crate::order::status::OrderStatus;
use crate::reconciliation::Variance;
use crate::types::{
    ActorName, DeliveryId, DeliveryLineId, DisplayId, ExternalReference, LineId, OrderId,
    OrderedQuantity, ProductId, SiteId, SupplierId, SupplierSku, Timestamp, UnitPrice,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why the order was raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestReason {
    /// Replenishing depleted stock.
    #[default]
    Depletion,
    /// Stocking for a new customer.
    NewCustomer,
    /// Anything else; see comments.
    Other,
}

/// Free-text details carried with the order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMetadata {
    /// Customer the goods are for.
    pub customer_name: Option<String>,
    /// Why the order was raised.
    pub reason: RequestReason,
    /// Requester comments.
    pub comments: Option<String>,
}

/// One ordered item.
///
/// `id`, `product_id` and `sku` never change after creation. Received
/// quantity and the force-close flag change only through deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Line identity.
    pub id: LineId,
    /// Internal product ordered.
    pub product_id: ProductId,
    /// Supplier SKU ordered.
    pub sku: SupplierSku,
    /// Quantity ordered.
    pub quantity_ordered: OrderedQuantity,
    /// Quantity received so far across all deliveries.
    pub quantity_received: u64,
    /// Price per unit.
    pub unit_price: UnitPrice,
    /// `quantity_ordered × unit_price`, unrounded.
    pub total_price: Decimal,
    /// Closed by a receiver before (or regardless of) full receipt.
    pub is_force_closed: bool,
    /// External procurement reference stamped at linkage.
    pub external_reference: Option<ExternalReference>,
}

impl LineItem {
    /// A fresh line with nothing received.
    pub fn new(
        id: LineId,
        product_id: ProductId,
        sku: SupplierSku,
        quantity_ordered: OrderedQuantity,
        unit_price: UnitPrice,
    ) -> Self {
        let quantity: u64 = quantity_ordered.into();
        let price: Decimal = unit_price.into();
        Self {
            id,
            product_id,
            sku,
            quantity_ordered,
            quantity_received: 0,
            unit_price,
            total_price: Decimal::from(quantity) * price,
            is_force_closed: false,
            external_reference: None,
        }
    }

    /// Ordered quantity as a plain number.
    pub fn ordered(&self) -> u64 {
        self.quantity_ordered.into()
    }

    /// Received in full, or closed.
    pub fn is_settled(&self) -> bool {
        self.quantity_received >= self.ordered() || self.is_force_closed
    }
}

/// Kind of approval-history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalKind {
    /// Submitted for approval.
    Submitted,
    /// Approved.
    Approved,
    /// Rejected.
    Rejected,
    /// Lines or details replaced before approval.
    Revised,
    /// Variance reviewed and accepted.
    VarianceAccepted,
    /// Closed, either on variance review or administratively.
    Closed,
}

/// One entry in an order's append-only approval history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEntry {
    /// What happened.
    pub kind: ApprovalKind,
    /// Who did it.
    pub actor: ActorName,
    /// When it was committed.
    pub at: Timestamp,
    /// Optional remarks.
    pub comments: Option<String>,
}

/// One line of a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLine {
    /// Delivery line identity, the key for finance updates.
    pub id: DeliveryLineId,
    /// The order line received against.
    pub po_line_id: LineId,
    /// Units received. Zero means nothing arrived for this line.
    pub quantity: u64,
    /// Finance fields, editable after recording.
    pub finance: FinanceFields,
}

/// A batch receipt against an order, as submitted by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Delivery identity.
    pub id: DeliveryId,
    /// Day the goods arrived.
    pub date: NaiveDate,
    /// Supplier docket reference.
    pub docket_reference: String,
    /// Who received the goods.
    pub received_by: ActorName,
    /// Received lines, in docket order.
    pub lines: Vec<DeliveryLine>,
    /// Order lines to close regardless of outstanding quantity.
    pub force_close: Vec<LineId>,
}

impl DeliveryRecord {
    /// Finds a line of this delivery.
    pub fn line(&self, id: DeliveryLineId) -> Option<&DeliveryLine> {
        self.lines.iter().find(|line| line.id == id)
    }
}

/// A delivery as attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// The delivery as submitted, with finance edits applied.
    pub record: DeliveryRecord,
    /// When the delivery was committed.
    pub recorded_at: Timestamp,
    /// Variances the delivery raised when it was applied.
    pub variances: Vec<Variance>,
}

/// A procurement order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identity.
    pub id: OrderId,
    /// Human readable reference.
    pub display_id: DisplayId,
    /// Who raised it.
    pub requester: ActorName,
    /// Delivery site.
    pub site: SiteId,
    /// Supplier the order is placed with.
    pub supplier_id: SupplierId,
    /// Day the order was requested. Compared against snapshot dates when
    /// netting demand.
    pub request_date: NaiveDate,
    /// Current status.
    pub status: OrderStatus,
    /// Ordered lines.
    pub lines: Vec<LineItem>,
    /// Append-only approval history.
    pub approvals: Vec<ApprovalEntry>,
    /// Append-only deliveries.
    pub deliveries: Vec<Delivery>,
    /// Free-text details.
    pub metadata: OrderMetadata,
    /// External procurement reference, once linked.
    pub external_reference: Option<ExternalReference>,
    /// When the order was created.
    pub created_at: Timestamp,
}

impl Order {
    /// Sum of line totals.
    pub fn total_amount(&self) -> Decimal {
        self.lines.iter().map(|line| line.total_price).sum()
    }

    /// Finds a line by id.
    pub fn line(&self, id: LineId) -> Option<&LineItem> {
        self.lines.iter().find(|line| line.id == id)
    }

    /// Finds a delivery by id.
    pub fn delivery(&self, id: DeliveryId) -> Option<&Delivery> {
        self.deliveries.iter().find(|d| d.record.id == id)
    }

    /// Quantity of `product_id` ordered across all lines.
    pub fn ordered_quantity_of(&self, product_id: &ProductId) -> u64 {
        self.lines
            .iter()
            .filter(|line| &line.product_id == product_id)
            .map(LineItem::ordered)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(product: &str, quantity: u64, price: Decimal) -> LineItem {
        LineItem::new(
            LineId::generate(),
            ProductId::try_new(product).unwrap(),
            SupplierSku::try_new(format!("SKU-{product}")).unwrap(),
            OrderedQuantity::try_new(quantity).unwrap(),
            UnitPrice::try_new(price).unwrap(),
        )
    }

    #[test]
    fn line_total_is_the_exact_product() {
        assert_eq!(line("a", 3, dec!(3.333)).total_price, dec!(9.999));
        assert_eq!(line("a", 7, dec!(1.25)).total_price, dec!(8.75));
    }

    #[test]
    fn settled_lines_are_full_or_force_closed() {
        let mut item = line("a", 10, dec!(1));
        assert!(!item.is_settled());
        item.quantity_received = 10;
        assert!(item.is_settled());
        item.quantity_received = 4;
        item.is_force_closed = true;
        assert!(item.is_settled());
    }
}
