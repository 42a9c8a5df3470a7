//! Builder patterns for creating order inputs in tests.
//!
//! Builders start from sensible defaults so a test only states what it cares
//! about. Invalid string values passed to the builders panic, since they are
//! bugs in the test rather than cases under test.

use crate::order::{
    CreateOrderInput, DeliveryDraft, DeliveryLineDraft, LineDraft, OrderHeader, OrderMetadata,
};
use crate::types::{
    ActorName, DeliveryId, LineId, OrderId, ProductId, SiteId, SupplierId, SupplierSku,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Builder for [`CreateOrderInput`].
///
/// # Example
/// ```rust,ignore
/// let input = OrderBuilder::new()
///     .supplier("acme")
///     .requested_on(date)
///     .line("widget", "W-1", 10, dec!(2.50))
///     .submitted()
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct OrderBuilder {
    order_id: OrderId,
    requester: ActorName,
    site: SiteId,
    supplier_id: SupplierId,
    request_date: NaiveDate,
    lines: Vec<LineDraft>,
    metadata: OrderMetadata,
    submit: bool,
}

impl OrderBuilder {
    /// A draft order from `requester` at `main-site` to supplier `acme`,
    /// requested on 2024-01-01, with no lines.
    pub fn new() -> Self {
        Self {
            order_id: OrderId::generate(),
            requester: ActorName::try_new("requester").expect("valid actor"),
            site: SiteId::try_new("main-site").expect("valid site"),
            supplier_id: SupplierId::try_new("acme").expect("valid supplier"),
            request_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            lines: Vec::new(),
            metadata: OrderMetadata::default(),
            submit: false,
        }
    }

    /// Uses a specific order id.
    #[must_use]
    pub const fn with_id(mut self, order_id: OrderId) -> Self {
        self.order_id = order_id;
        self
    }

    /// Sets the requester.
    #[must_use]
    pub fn requester(mut self, name: &str) -> Self {
        self.requester = ActorName::try_new(name).expect("valid actor");
        self
    }

    /// Sets the supplier.
    #[must_use]
    pub fn supplier(mut self, supplier: &str) -> Self {
        self.supplier_id = SupplierId::try_new(supplier).expect("valid supplier");
        self
    }

    /// Sets the request date.
    #[must_use]
    pub const fn requested_on(mut self, date: NaiveDate) -> Self {
        self.request_date = date;
        self
    }

    /// Adds a line.
    #[must_use]
    pub fn line(mut self, product: &str, sku: &str, quantity: u64, unit_price: Decimal) -> Self {
        self.lines.push(LineDraft::new(
            ProductId::try_new(product).expect("valid product"),
            SupplierSku::try_new(sku).expect("valid sku"),
            quantity,
            unit_price,
        ));
        self
    }

    /// Submits the order on creation.
    #[must_use]
    pub const fn submitted(mut self) -> Self {
        self.submit = true;
        self
    }

    /// Sets the customer the order is for.
    #[must_use]
    pub fn for_customer(mut self, customer: &str) -> Self {
        self.metadata.customer_name = Some(customer.to_string());
        self
    }

    /// The id the order will be created with.
    pub const fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Ids of the lines added so far, in order.
    pub fn line_ids(&self) -> Vec<LineId> {
        self.lines.iter().map(|line| line.id).collect()
    }

    /// Builds the input, panicking if it fails validation.
    pub fn build(self) -> CreateOrderInput {
        self.try_build().expect("order builder produced an invalid order")
    }

    /// Builds the input.
    pub fn try_build(self) -> Result<CreateOrderInput, crate::errors::ValidationError> {
        CreateOrderInput::new(
            self.order_id,
            OrderHeader {
                requester: self.requester,
                site: self.site,
                supplier_id: self.supplier_id,
                request_date: self.request_date,
                metadata: self.metadata,
            },
            self.lines,
            self.submit,
        )
    }
}

impl Default for OrderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`DeliveryDraft`].
///
/// # Example
/// ```rust,ignore
/// let delivery = DeliveryBuilder::new()
///     .receive(line_a, 10)
///     .receive(line_b, 3)
///     .force_close(line_b)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct DeliveryBuilder {
    draft: DeliveryDraft,
}

impl DeliveryBuilder {
    /// An empty delivery received by `dock` on 2024-01-10 with docket
    /// `DKT-1`.
    pub fn new() -> Self {
        Self {
            draft: DeliveryDraft {
                id: DeliveryId::generate(),
                date: NaiveDate::from_ymd_opt(2024, 1, 10).expect("valid date"),
                docket_reference: "DKT-1".to_string(),
                received_by: ActorName::try_new("dock").expect("valid actor"),
                lines: Vec::new(),
                force_close: Vec::new(),
            },
        }
    }

    /// Uses a specific delivery id.
    #[must_use]
    pub const fn with_id(mut self, delivery_id: DeliveryId) -> Self {
        self.draft.id = delivery_id;
        self
    }

    /// Sets the docket reference.
    #[must_use]
    pub fn docket(mut self, reference: &str) -> Self {
        self.draft.docket_reference = reference.to_string();
        self
    }

    /// Sets the receipt date.
    #[must_use]
    pub const fn received_on(mut self, date: NaiveDate) -> Self {
        self.draft.date = date;
        self
    }

    /// Receives `quantity` against an order line.
    #[must_use]
    pub fn receive(mut self, line_id: LineId, quantity: i64) -> Self {
        self.draft
            .lines
            .push(DeliveryLineDraft::new(line_id, quantity));
        self
    }

    /// Force-closes an order line.
    #[must_use]
    pub fn force_close(mut self, line_id: LineId) -> Self {
        self.draft.force_close.push(line_id);
        self
    }

    /// The delivery id.
    pub const fn delivery_id(&self) -> DeliveryId {
        self.draft.id
    }

    /// The draft.
    pub fn build(self) -> DeliveryDraft {
        self.draft
    }
}

impl Default for DeliveryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
