//! Order commands.
//!
//! Each command reads the order's stream (creation also reads the registry
//! stream), folds it into an [`OrderBook`], and emits events. Inputs are
//! validated when they are constructed, so a malformed request fails before
//! anything is read.

use crate::command::{Command, CommandResult};
use crate::errors::{CommandError, ValidationError};
use crate::event_store::StoredEvent;
use crate::finance::{CapitalisationPatch, FinanceFields};
use crate::order::events::{
    order_stream, registry_stream, ApprovalDecision, OrderBook, OrderCreated, ProcurementEvent,
    VarianceResolution,
};
use crate::order::model::{DeliveryLine, DeliveryRecord, LineItem, OrderMetadata};
use crate::order::status::{transition, OrderAction, Trigger};
use crate::reconciliation::apply_delivery;
use crate::types::{
    ActorName, DeliveryId, DeliveryLineId, DisplayId, ExternalReference, LineId, OrderId,
    OrderedQuantity, ProductId, SiteId, StreamId, SupplierId, SupplierSku, UnitPrice,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// A requested line, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDraft {
    /// Line identity.
    pub id: LineId,
    /// Product requested.
    pub product_id: ProductId,
    /// Supplier SKU requested.
    pub sku: SupplierSku,
    /// Requested quantity; must be positive.
    pub quantity: u64,
    /// Price per unit; must be positive.
    pub unit_price: Decimal,
}

impl LineDraft {
    /// A draft line with a freshly generated id.
    pub fn new(product_id: ProductId, sku: SupplierSku, quantity: u64, unit_price: Decimal) -> Self {
        Self {
            id: LineId::generate(),
            product_id,
            sku,
            quantity,
            unit_price,
        }
    }
}

fn validate_lines(drafts: Vec<LineDraft>) -> Result<Vec<LineItem>, ValidationError> {
    if drafts.is_empty() {
        return Err(ValidationError::EmptyLines);
    }
    drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| {
            let quantity = OrderedQuantity::try_new(draft.quantity)
                .map_err(|_| ValidationError::NonPositiveQuantity { line: index })?;
            let price = UnitPrice::try_new(draft.unit_price)
                .map_err(|_| ValidationError::NonPositivePrice { line: index })?;
            Ok(LineItem::new(
                draft.id,
                draft.product_id,
                draft.sku,
                quantity,
                price,
            ))
        })
        .collect()
}

/// Header fields of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHeader {
    /// Who raises the order.
    pub requester: ActorName,
    /// Delivery site.
    pub site: SiteId,
    /// Supplier.
    pub supplier_id: SupplierId,
    /// Day the order is requested.
    pub request_date: NaiveDate,
    /// Free-text details.
    pub metadata: OrderMetadata,
}

/// Validated input for [`CreateOrder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderInput {
    order_id: OrderId,
    header: OrderHeader,
    lines: Vec<LineItem>,
    submit: bool,
}

impl CreateOrderInput {
    /// Validates a new order. With `submit` the order goes straight to
    /// `PENDING_APPROVAL` instead of staying in `DRAFT`.
    pub fn new(
        order_id: OrderId,
        header: OrderHeader,
        lines: Vec<LineDraft>,
        submit: bool,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            order_id,
            header,
            lines: validate_lines(lines)?,
            submit,
        })
    }

    /// The id of the order to create.
    pub const fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Who is creating it.
    pub const fn requester(&self) -> &ActorName {
        &self.header.requester
    }
}

/// Creates an order and allocates its display id.
///
/// The display id is the next sequence number on the registry stream. Two
/// concurrent creations conflict on that stream and the loser is retried
/// with the next number.
#[derive(Debug, Clone, Copy)]
pub struct CreateOrder;

#[async_trait]
impl Command for CreateOrder {
    type Input = CreateOrderInput;
    type State = OrderBook;
    type Event = ProcurementEvent;

    fn name(&self) -> &'static str {
        "create_order"
    }

    fn read_streams(&self, input: &Self::Input) -> Vec<StreamId> {
        vec![order_stream(input.order_id), registry_stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>) {
        state.apply(event);
    }

    async fn handle(
        &self,
        state: Self::State,
        input: Self::Input,
    ) -> CommandResult<Vec<(StreamId, Self::Event)>> {
        if state.get(input.order_id).is_some() {
            return Err(CommandError::Integrity(format!(
                "order {} already exists",
                input.order_id
            )));
        }

        let display_id = DisplayId::from_sequence(state.registered() + 1);
        let stream = order_stream(input.order_id);
        let requester = input.header.requester.clone();

        let mut events = vec![
            (
                registry_stream(),
                ProcurementEvent::OrderRegistered {
                    order_id: input.order_id,
                    display_id: display_id.clone(),
                },
            ),
            (
                stream.clone(),
                OrderCreated {
                    order_id: input.order_id,
                    display_id,
                    requester: input.header.requester,
                    site: input.header.site,
                    supplier_id: input.header.supplier_id,
                    request_date: input.header.request_date,
                    lines: input.lines,
                    metadata: input.header.metadata,
                }
                .into(),
            ),
        ];
        if input.submit {
            events.push((
                stream,
                ProcurementEvent::OrderSubmitted {
                    order_id: input.order_id,
                    actor: requester,
                },
            ));
        }
        Ok(events)
    }
}

/// Input for [`SubmitOrder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrderInput {
    /// Order to submit.
    pub order_id: OrderId,
    /// Who submits it.
    pub actor: ActorName,
}

/// Moves a draft to `PENDING_APPROVAL`.
#[derive(Debug, Clone, Copy)]
pub struct SubmitOrder;

#[async_trait]
impl Command for SubmitOrder {
    type Input = SubmitOrderInput;
    type State = OrderBook;
    type Event = ProcurementEvent;

    fn name(&self) -> &'static str {
        "submit_order"
    }

    fn read_streams(&self, input: &Self::Input) -> Vec<StreamId> {
        vec![order_stream(input.order_id)]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>) {
        state.apply(event);
    }

    async fn handle(
        &self,
        state: Self::State,
        input: Self::Input,
    ) -> CommandResult<Vec<(StreamId, Self::Event)>> {
        let order = state.require(input.order_id)?;
        transition(order.status, Trigger::Submit)?;
        Ok(vec![(
            order_stream(order.id),
            ProcurementEvent::OrderSubmitted {
                order_id: order.id,
                actor: input.actor,
            },
        )])
    }
}

/// Input for [`DecideApproval`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecideApprovalInput {
    /// Order decided on.
    pub order_id: OrderId,
    /// Approve or reject.
    pub decision: ApprovalDecision,
    /// The approver.
    pub actor: ActorName,
    /// Remarks.
    pub comments: Option<String>,
}

/// Records an approver's decision.
#[derive(Debug, Clone, Copy)]
pub struct DecideApproval;

#[async_trait]
impl Command for DecideApproval {
    type Input = DecideApprovalInput;
    type State = OrderBook;
    type Event = ProcurementEvent;

    fn name(&self) -> &'static str {
        "decide_approval"
    }

    fn read_streams(&self, input: &Self::Input) -> Vec<StreamId> {
        vec![order_stream(input.order_id)]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>) {
        state.apply(event);
    }

    async fn handle(
        &self,
        state: Self::State,
        input: Self::Input,
    ) -> CommandResult<Vec<(StreamId, Self::Event)>> {
        let order = state.require(input.order_id)?;
        let trigger = match input.decision {
            ApprovalDecision::Approve => Trigger::Approve,
            ApprovalDecision::Reject => Trigger::Reject,
        };
        transition(order.status, trigger)?;
        Ok(vec![(
            order_stream(order.id),
            ProcurementEvent::ApprovalDecided {
                order_id: order.id,
                decision: input.decision,
                actor: input.actor,
                comments: input.comments,
            },
        )])
    }
}

/// Validated input for [`LinkExternalReference`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkExternalReferenceInput {
    order_id: OrderId,
    reference: ExternalReference,
    actor: ActorName,
}

impl LinkExternalReferenceInput {
    /// Parses the reference; blank references are rejected.
    pub fn new(
        order_id: OrderId,
        reference: &str,
        actor: ActorName,
    ) -> Result<Self, ValidationError> {
        let reference = ExternalReference::try_new(reference)
            .map_err(|_| ValidationError::MissingField("external_reference"))?;
        Ok(Self {
            order_id,
            reference,
            actor,
        })
    }

    /// Order to link.
    pub const fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Who links it.
    pub const fn actor(&self) -> &ActorName {
        &self.actor
    }
}

/// Stamps every line with the external reference and activates the order.
///
/// All lines are stamped by a single event, so linkage is all-or-nothing.
#[derive(Debug, Clone, Copy)]
pub struct LinkExternalReference;

#[async_trait]
impl Command for LinkExternalReference {
    type Input = LinkExternalReferenceInput;
    type State = OrderBook;
    type Event = ProcurementEvent;

    fn name(&self) -> &'static str {
        "link_external_reference"
    }

    fn read_streams(&self, input: &Self::Input) -> Vec<StreamId> {
        vec![order_stream(input.order_id)]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>) {
        state.apply(event);
    }

    async fn handle(
        &self,
        state: Self::State,
        input: Self::Input,
    ) -> CommandResult<Vec<(StreamId, Self::Event)>> {
        let order = state.require(input.order_id)?;
        transition(order.status, Trigger::Link)?;
        Ok(vec![(
            order_stream(order.id),
            ProcurementEvent::ExternalReferenceLinked {
                order_id: order.id,
                reference: input.reference,
            },
        )])
    }
}

/// A received line, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLineDraft {
    /// Delivery line identity.
    pub id: DeliveryLineId,
    /// Order line received against.
    pub po_line_id: LineId,
    /// Units received. Negative values are rejected.
    pub quantity: i64,
    /// Supplier invoice, if already known.
    pub invoice_number: Option<String>,
}

impl DeliveryLineDraft {
    /// A draft line with a freshly generated id.
    pub fn new(po_line_id: LineId, quantity: i64) -> Self {
        Self {
            id: DeliveryLineId::generate(),
            po_line_id,
            quantity,
            invoice_number: None,
        }
    }
}

/// A delivery as submitted by a receiver, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryDraft {
    /// Delivery identity. Resubmitting the same id is a no-op.
    pub id: DeliveryId,
    /// Day the goods arrived.
    pub date: NaiveDate,
    /// Supplier docket reference.
    pub docket_reference: String,
    /// Who received the goods.
    pub received_by: ActorName,
    /// Received lines.
    pub lines: Vec<DeliveryLineDraft>,
    /// Order lines to force-close.
    pub force_close: Vec<LineId>,
}

/// Validated input for [`RecordDelivery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDeliveryInput {
    order_id: OrderId,
    delivery: DeliveryRecord,
}

impl RecordDeliveryInput {
    /// Validates a delivery: a docket reference is required, quantities may
    /// not be negative, and each order line may appear at most once.
    pub fn new(order_id: OrderId, draft: DeliveryDraft) -> Result<Self, ValidationError> {
        let docket_reference = draft.docket_reference.trim().to_string();
        if docket_reference.is_empty() {
            return Err(ValidationError::MissingField("docket_reference"));
        }

        let mut seen = HashSet::new();
        let lines = draft
            .lines
            .into_iter()
            .map(|line| {
                if !seen.insert(line.po_line_id) {
                    return Err(ValidationError::DuplicateDeliveryLine(line.po_line_id));
                }
                let quantity = u64::try_from(line.quantity).map_err(|_| {
                    ValidationError::NegativeDeliveryQuantity {
                        line_id: line.po_line_id,
                        quantity: line.quantity,
                    }
                })?;
                Ok(DeliveryLine {
                    id: line.id,
                    po_line_id: line.po_line_id,
                    quantity,
                    finance: FinanceFields {
                        invoice_number: line
                            .invoice_number
                            .map(|invoice| invoice.trim().to_string())
                            .filter(|invoice| !invoice.is_empty()),
                        ..FinanceFields::default()
                    },
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut force_close = draft.force_close;
        force_close.sort_unstable();
        force_close.dedup();

        Ok(Self {
            order_id,
            delivery: DeliveryRecord {
                id: draft.id,
                date: draft.date,
                docket_reference,
                received_by: draft.received_by,
                lines,
                force_close,
            },
        })
    }

    /// Order receiving the delivery.
    pub const fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// The validated delivery.
    pub const fn delivery(&self) -> &DeliveryRecord {
        &self.delivery
    }
}

/// Records a delivery against an order.
///
/// The delivery is reconciled against the current lines only to decide
/// whether it is acceptable; the event stores the delivery itself, and
/// received quantities and status are re-derived from the delivery history
/// whenever the order is read.
#[derive(Debug, Clone, Copy)]
pub struct RecordDelivery;

#[async_trait]
impl Command for RecordDelivery {
    type Input = RecordDeliveryInput;
    type State = OrderBook;
    type Event = ProcurementEvent;

    fn name(&self) -> &'static str {
        "record_delivery"
    }

    fn read_streams(&self, input: &Self::Input) -> Vec<StreamId> {
        vec![order_stream(input.order_id)]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>) {
        state.apply(event);
    }

    async fn handle(
        &self,
        state: Self::State,
        input: Self::Input,
    ) -> CommandResult<Vec<(StreamId, Self::Event)>> {
        let order = state.require(input.order_id)?;

        if order.delivery(input.delivery.id).is_some() {
            debug!(order_id = %order.id, delivery_id = %input.delivery.id, "Delivery already recorded");
            return Ok(vec![]);
        }
        if !order.status.accepts_deliveries() {
            return Err(CommandError::InvalidTransition {
                from: order.status,
                action: OrderAction::Deliver,
            });
        }

        let (reconciliation, next) =
            apply_delivery(order.id, &order.lines, order.status, &input.delivery)?;
        for variance in &reconciliation.variances {
            warn!(
                order_id = %order.id,
                line_id = %variance.line_id,
                kind = %variance.kind,
                ordered = variance.ordered,
                received = variance.received,
                "Delivery variance detected"
            );
        }
        debug!(order_id = %order.id, from = %order.status, to = %next, "Delivery reconciled");

        Ok(vec![(
            order_stream(order.id),
            ProcurementEvent::DeliveryRecorded {
                order_id: order.id,
                delivery: input.delivery,
            },
        )])
    }
}

/// Input for [`UpdateCapitalisation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCapitalisationInput {
    /// Order holding the delivery.
    pub order_id: OrderId,
    /// Delivery holding the line.
    pub delivery_id: DeliveryId,
    /// The delivery line to update.
    pub delivery_line_id: DeliveryLineId,
    /// Fields to change.
    pub patch: CapitalisationPatch,
}

/// Merges finance fields into one delivery line.
///
/// Allowed in any status; never changes status, quantities or totals.
#[derive(Debug, Clone, Copy)]
pub struct UpdateCapitalisation;

#[async_trait]
impl Command for UpdateCapitalisation {
    type Input = UpdateCapitalisationInput;
    type State = OrderBook;
    type Event = ProcurementEvent;

    fn name(&self) -> &'static str {
        "update_capitalisation"
    }

    fn read_streams(&self, input: &Self::Input) -> Vec<StreamId> {
        vec![order_stream(input.order_id)]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>) {
        state.apply(event);
    }

    async fn handle(
        &self,
        state: Self::State,
        input: Self::Input,
    ) -> CommandResult<Vec<(StreamId, Self::Event)>> {
        let order = state.require(input.order_id)?;
        let delivery = order
            .delivery(input.delivery_id)
            .ok_or_else(|| CommandError::unknown_delivery(order.id, input.delivery_id))?;
        let line = delivery.record.line(input.delivery_line_id).ok_or_else(|| {
            CommandError::unknown_delivery_line(input.delivery_id, input.delivery_line_id)
        })?;

        if input.patch.is_empty() {
            debug!(delivery_line_id = %input.delivery_line_id, "Empty capitalisation patch");
            return Ok(vec![]);
        }
        let finance = line.finance.merged(&input.patch)?;
        if finance == line.finance {
            return Ok(vec![]);
        }

        Ok(vec![(
            order_stream(order.id),
            ProcurementEvent::CapitalisationUpdated {
                order_id: order.id,
                delivery_id: input.delivery_id,
                delivery_line_id: input.delivery_line_id,
                finance,
            },
        )])
    }
}

/// Validated input for [`UpdatePendingOrder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePendingOrderInput {
    order_id: OrderId,
    lines: Vec<LineItem>,
    metadata: OrderMetadata,
    actor: ActorName,
}

impl UpdatePendingOrderInput {
    /// Validates replacement lines with the same rules as creation.
    pub fn new(
        order_id: OrderId,
        lines: Vec<LineDraft>,
        metadata: OrderMetadata,
        actor: ActorName,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            order_id,
            lines: validate_lines(lines)?,
            metadata,
            actor,
        })
    }

    /// Order to revise.
    pub const fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Who revises it.
    pub const fn actor(&self) -> &ActorName {
        &self.actor
    }
}

/// Replaces lines and metadata of an order not yet approved.
#[derive(Debug, Clone, Copy)]
pub struct UpdatePendingOrder;

#[async_trait]
impl Command for UpdatePendingOrder {
    type Input = UpdatePendingOrderInput;
    type State = OrderBook;
    type Event = ProcurementEvent;

    fn name(&self) -> &'static str {
        "update_pending_order"
    }

    fn read_streams(&self, input: &Self::Input) -> Vec<StreamId> {
        vec![order_stream(input.order_id)]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>) {
        state.apply(event);
    }

    async fn handle(
        &self,
        state: Self::State,
        input: Self::Input,
    ) -> CommandResult<Vec<(StreamId, Self::Event)>> {
        let order = state.require(input.order_id)?;
        transition(order.status, Trigger::Edit)?;
        Ok(vec![(
            order_stream(order.id),
            ProcurementEvent::OrderRevised {
                order_id: order.id,
                lines: input.lines,
                metadata: input.metadata,
                actor: input.actor,
            },
        )])
    }
}

/// Input for [`ReviewVariance`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVarianceInput {
    /// Order under review.
    pub order_id: OrderId,
    /// Accept or close.
    pub resolution: VarianceResolution,
    /// The reviewer.
    pub actor: ActorName,
    /// Remarks.
    pub comments: Option<String>,
}

/// Resolves a `VARIANCE_PENDING` order.
#[derive(Debug, Clone, Copy)]
pub struct ReviewVariance;

#[async_trait]
impl Command for ReviewVariance {
    type Input = ReviewVarianceInput;
    type State = OrderBook;
    type Event = ProcurementEvent;

    fn name(&self) -> &'static str {
        "review_variance"
    }

    fn read_streams(&self, input: &Self::Input) -> Vec<StreamId> {
        vec![order_stream(input.order_id)]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>) {
        state.apply(event);
    }

    async fn handle(
        &self,
        state: Self::State,
        input: Self::Input,
    ) -> CommandResult<Vec<(StreamId, Self::Event)>> {
        let order = state.require(input.order_id)?;
        let trigger = match input.resolution {
            VarianceResolution::Accept => Trigger::AcceptVariance,
            VarianceResolution::Close => Trigger::CloseVariance,
        };
        transition(order.status, trigger)?;
        Ok(vec![(
            order_stream(order.id),
            ProcurementEvent::VarianceReviewed {
                order_id: order.id,
                resolution: input.resolution,
                actor: input.actor,
                comments: input.comments,
            },
        )])
    }
}

/// Input for [`CloseOrder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseOrderInput {
    /// Order to close.
    pub order_id: OrderId,
    /// The administrator.
    pub actor: ActorName,
    /// Why.
    pub reason: Option<String>,
}

/// Administratively closes an order that is not yet terminal.
#[derive(Debug, Clone, Copy)]
pub struct CloseOrder;

#[async_trait]
impl Command for CloseOrder {
    type Input = CloseOrderInput;
    type State = OrderBook;
    type Event = ProcurementEvent;

    fn name(&self) -> &'static str {
        "close_order"
    }

    fn read_streams(&self, input: &Self::Input) -> Vec<StreamId> {
        vec![order_stream(input.order_id)]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>) {
        state.apply(event);
    }

    async fn handle(
        &self,
        state: Self::State,
        input: Self::Input,
    ) -> CommandResult<Vec<(StreamId, Self::Event)>> {
        let order = state.require(input.order_id)?;
        transition(order.status, Trigger::Close)?;
        Ok(vec![(
            order_stream(order.id),
            ProcurementEvent::OrderClosed {
                order_id: order.id,
                actor: input.actor,
                reason: input.reason,
            },
        )])
    }
}
