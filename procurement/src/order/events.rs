//! Order events and the fold that rebuilds orders from them.

use crate::errors::{CommandError, CommandResult};
use crate::event_store::StoredEvent;
use crate::finance::FinanceFields;
use crate::order::model::{
    ApprovalEntry, ApprovalKind, Delivery, DeliveryRecord, LineItem, Order, OrderMetadata,
};
use crate::order::status::{transition, OrderStatus, Trigger};
use crate::reconciliation::apply_delivery;
use crate::types::{
    ActorName, DeliveryId, DeliveryLineId, DisplayId, ExternalReference, OrderId, SiteId,
    StreamId, SupplierId, Timestamp,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::error;

/// Name of the stream every order creation is registered on.
pub const REGISTRY_STREAM: &str = "order-registry";

/// The stream holding an order's events.
pub fn order_stream(order_id: OrderId) -> StreamId {
    StreamId::try_new(format!("order-{order_id}")).expect("order stream id is never empty")
}

/// The stream registering order creations.
pub fn registry_stream() -> StreamId {
    StreamId::try_new(REGISTRY_STREAM).expect("registry stream id is never empty")
}

/// An approver's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Approve the order.
    Approve,
    /// Reject the order.
    Reject,
}

/// Outcome of a variance review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceResolution {
    /// Accept what was received; the order becomes `RECEIVED`.
    Accept,
    /// Close the order as it stands.
    Close,
}

/// Payload of the event that creates an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// New order id.
    pub order_id: OrderId,
    /// Assigned display reference.
    pub display_id: DisplayId,
    /// Who raised it.
    pub requester: ActorName,
    /// Delivery site.
    pub site: SiteId,
    /// Supplier.
    pub supplier_id: SupplierId,
    /// Requested on.
    pub request_date: NaiveDate,
    /// Initial lines.
    pub lines: Vec<LineItem>,
    /// Free-text details.
    pub metadata: OrderMetadata,
}

/// Every event the procurement engine writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProcurementEvent {
    /// An order id was allocated a display sequence number. Written to the
    /// registry stream.
    OrderRegistered {
        /// Registered order.
        order_id: OrderId,
        /// Display reference allocated.
        display_id: DisplayId,
    },
    /// An order was created in `DRAFT`.
    OrderCreated(OrderCreated),
    /// The order was submitted for approval.
    OrderSubmitted {
        /// Affected order.
        order_id: OrderId,
        /// Who submitted it.
        actor: ActorName,
    },
    /// An approver decided.
    ApprovalDecided {
        /// Affected order.
        order_id: OrderId,
        /// Approve or reject.
        decision: ApprovalDecision,
        /// The approver.
        actor: ActorName,
        /// Remarks.
        comments: Option<String>,
    },
    /// Every line was stamped with the external reference.
    ExternalReferenceLinked {
        /// Affected order.
        order_id: OrderId,
        /// The reference.
        reference: ExternalReference,
    },
    /// A delivery was recorded. Received quantities and status are derived
    /// from it when folding, never stored.
    DeliveryRecorded {
        /// Affected order.
        order_id: OrderId,
        /// The delivery as submitted.
        delivery: DeliveryRecord,
    },
    /// Finance fields of one delivery line were replaced.
    CapitalisationUpdated {
        /// Affected order.
        order_id: OrderId,
        /// Delivery holding the line.
        delivery_id: DeliveryId,
        /// The delivery line.
        delivery_line_id: DeliveryLineId,
        /// The merged fields.
        finance: FinanceFields,
    },
    /// Lines and metadata of an unapproved order were replaced.
    OrderRevised {
        /// Affected order.
        order_id: OrderId,
        /// Replacement lines.
        lines: Vec<LineItem>,
        /// Replacement metadata.
        metadata: OrderMetadata,
        /// Who revised it.
        actor: ActorName,
    },
    /// A reviewer resolved a variance.
    VarianceReviewed {
        /// Affected order.
        order_id: OrderId,
        /// Accept or close.
        resolution: VarianceResolution,
        /// The reviewer.
        actor: ActorName,
        /// Remarks.
        comments: Option<String>,
    },
    /// An administrator closed the order.
    OrderClosed {
        /// Affected order.
        order_id: OrderId,
        /// The administrator.
        actor: ActorName,
        /// Why.
        reason: Option<String>,
    },
}

impl ProcurementEvent {
    /// The order the event is about.
    pub const fn order_id(&self) -> OrderId {
        match self {
            Self::OrderCreated(created) => created.order_id,
            Self::OrderRegistered { order_id, .. }
            | Self::OrderSubmitted { order_id, .. }
            | Self::ApprovalDecided { order_id, .. }
            | Self::ExternalReferenceLinked { order_id, .. }
            | Self::DeliveryRecorded { order_id, .. }
            | Self::CapitalisationUpdated { order_id, .. }
            | Self::OrderRevised { order_id, .. }
            | Self::VarianceReviewed { order_id, .. }
            | Self::OrderClosed { order_id, .. } => *order_id,
        }
    }
}

impl From<OrderCreated> for ProcurementEvent {
    fn from(created: OrderCreated) -> Self {
        Self::OrderCreated(created)
    }
}

impl Order {
    fn created(created: &OrderCreated, at: Timestamp) -> Self {
        Self {
            id: created.order_id,
            display_id: created.display_id.clone(),
            requester: created.requester.clone(),
            site: created.site.clone(),
            supplier_id: created.supplier_id.clone(),
            request_date: created.request_date,
            status: OrderStatus::Draft,
            lines: created.lines.clone(),
            approvals: Vec::new(),
            deliveries: Vec::new(),
            metadata: created.metadata.clone(),
            external_reference: None,
            created_at: at,
        }
    }

    fn record_approval(
        &mut self,
        kind: ApprovalKind,
        actor: &ActorName,
        at: Timestamp,
        comments: Option<&str>,
    ) {
        self.approvals.push(ApprovalEntry {
            kind,
            actor: actor.clone(),
            at,
            comments: comments.map(str::to_string),
        });
    }

    fn advance(&mut self, trigger: Trigger) {
        match transition(self.status, trigger) {
            Ok(next) => self.status = next,
            Err(err) => error!(order_id = %self.id, error = %err, "Stored event violates status machine"),
        }
    }

    /// Folds one event into the order.
    ///
    /// Events were validated when written, so a refusal here means the stored
    /// history is inconsistent; it is logged and the status left unchanged.
    pub fn apply(&mut self, event: &ProcurementEvent, at: Timestamp) {
        match event {
            ProcurementEvent::OrderRegistered { .. } | ProcurementEvent::OrderCreated(_) => {}
            ProcurementEvent::OrderSubmitted { actor, .. } => {
                self.advance(Trigger::Submit);
                self.record_approval(ApprovalKind::Submitted, actor, at, None);
            }
            ProcurementEvent::ApprovalDecided {
                decision,
                actor,
                comments,
                ..
            } => {
                let (trigger, kind) = match decision {
                    ApprovalDecision::Approve => (Trigger::Approve, ApprovalKind::Approved),
                    ApprovalDecision::Reject => (Trigger::Reject, ApprovalKind::Rejected),
                };
                self.advance(trigger);
                self.record_approval(kind, actor, at, comments.as_deref());
            }
            ProcurementEvent::ExternalReferenceLinked { reference, .. } => {
                for line in &mut self.lines {
                    line.external_reference = Some(reference.clone());
                }
                self.external_reference = Some(reference.clone());
                self.advance(Trigger::Link);
            }
            ProcurementEvent::DeliveryRecorded { delivery, .. } => {
                let variances = match apply_delivery(self.id, &self.lines, self.status, delivery) {
                    Ok((reconciliation, next)) => {
                        self.lines = reconciliation.lines;
                        self.status = next;
                        reconciliation.variances
                    }
                    Err(err) => {
                        error!(order_id = %self.id, delivery_id = %delivery.id, error = %err, "Stored delivery does not reconcile");
                        Vec::new()
                    }
                };
                self.deliveries.push(Delivery {
                    record: delivery.clone(),
                    recorded_at: at,
                    variances,
                });
            }
            ProcurementEvent::CapitalisationUpdated {
                delivery_id,
                delivery_line_id,
                finance,
                ..
            } => {
                let line = self
                    .deliveries
                    .iter_mut()
                    .filter(|d| d.record.id == *delivery_id)
                    .flat_map(|d| d.record.lines.iter_mut())
                    .find(|line| line.id == *delivery_line_id);
                if let Some(line) = line {
                    line.finance = finance.clone();
                }
            }
            ProcurementEvent::OrderRevised {
                lines,
                metadata,
                actor,
                ..
            } => {
                self.advance(Trigger::Edit);
                self.lines.clone_from(lines);
                self.metadata = metadata.clone();
                self.record_approval(ApprovalKind::Revised, actor, at, None);
            }
            ProcurementEvent::VarianceReviewed {
                resolution,
                actor,
                comments,
                ..
            } => {
                let (trigger, kind) = match resolution {
                    VarianceResolution::Accept => {
                        (Trigger::AcceptVariance, ApprovalKind::VarianceAccepted)
                    }
                    VarianceResolution::Close => (Trigger::CloseVariance, ApprovalKind::Closed),
                };
                self.advance(trigger);
                self.record_approval(kind, actor, at, comments.as_deref());
            }
            ProcurementEvent::OrderClosed { actor, reason, .. } => {
                self.advance(Trigger::Close);
                self.record_approval(ApprovalKind::Closed, actor, at, reason.as_deref());
            }
        }
    }
}

/// Orders folded from one or more order streams plus, optionally, the
/// registry stream.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    orders: BTreeMap<OrderId, Order>,
    registered: u64,
}

impl OrderBook {
    /// Folds one stored event.
    pub fn apply(&mut self, event: &StoredEvent<ProcurementEvent>) {
        match &event.payload {
            ProcurementEvent::OrderRegistered { .. } => self.registered += 1,
            ProcurementEvent::OrderCreated(created) => {
                self.orders
                    .insert(created.order_id, Order::created(created, event.timestamp));
            }
            other => {
                if let Some(order) = self.orders.get_mut(&other.order_id()) {
                    order.apply(other, event.timestamp);
                }
            }
        }
    }

    /// Number of orders registered so far.
    pub const fn registered(&self) -> u64 {
        self.registered
    }

    /// Looks up an order.
    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    /// Takes an order out of the book, failing if it was never created.
    pub fn require(mut self, order_id: OrderId) -> CommandResult<Order> {
        self.orders
            .remove(&order_id)
            .ok_or(CommandError::OrderNotFound(order_id))
    }

    /// All orders, oldest first.
    pub fn into_orders(self) -> Vec<Order> {
        self.orders.into_values().collect()
    }
}
