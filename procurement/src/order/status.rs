//! The order status machine.
//!
//! Every status change in the engine goes through [`transition`]. Commands
//! call it to decide whether an action is allowed, and the order fold calls it
//! again when replaying the resulting events, so the rules live in exactly one
//! place.

use crate::errors::{CommandError, CommandResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created but not yet submitted for approval.
    Draft,
    /// Waiting for an approver decision.
    PendingApproval,
    /// Approved, waiting to be linked to the external procurement system.
    ApprovedPendingConcur,
    /// Linked and waiting for deliveries.
    Active,
    /// Some lines have outstanding quantity.
    PartiallyReceived,
    /// A delivery raised an over-delivery or short-close variance.
    VariancePending,
    /// Every line is received in full or force-closed.
    Received,
    /// Administratively closed. Terminal.
    Closed,
    /// Rejected by an approver. Terminal.
    Rejected,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 9] = [
        Self::Draft,
        Self::PendingApproval,
        Self::ApprovedPendingConcur,
        Self::Active,
        Self::PartiallyReceived,
        Self::VariancePending,
        Self::Received,
        Self::Closed,
        Self::Rejected,
    ];

    /// The statuses whose lines count as in-flight demand against supplier
    /// stock.
    pub const OPEN_DEMAND: [Self; 4] = [
        Self::PendingApproval,
        Self::ApprovedPendingConcur,
        Self::Active,
        Self::PartiallyReceived,
    ];

    /// Whether no further action can move the order.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Rejected)
    }

    /// Whether a delivery may be recorded against the order.
    pub const fn accepts_deliveries(self) -> bool {
        matches!(
            self,
            Self::Active | Self::PartiallyReceived | Self::Received | Self::VariancePending
        )
    }

    /// The wire name of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::ApprovedPendingConcur => "APPROVED_PENDING_CONCUR",
            Self::Active => "ACTIVE",
            Self::PartiallyReceived => "PARTIALLY_RECEIVED",
            Self::VariancePending => "VARIANCE_PENDING",
            Self::Received => "RECEIVED",
            Self::Closed => "CLOSED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the reconciliation engine concluded about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    /// Nothing was received or closed; status is left alone.
    Untouched,
    /// At least one line raised a variance.
    Variance,
    /// Every line is received in full or force-closed.
    Complete,
    /// Some line still has outstanding quantity.
    Partial,
}

/// Something that asks the order to change status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Requester submits a draft.
    Submit,
    /// Approver accepts.
    Approve,
    /// Approver rejects.
    Reject,
    /// Order is linked to an external reference.
    Link,
    /// A delivery was reconciled.
    Delivery(DeliveryOutcome),
    /// Lines or metadata of an unapproved order are revised.
    Edit,
    /// A reviewer accepts the variance as received.
    AcceptVariance,
    /// A reviewer closes the order instead of accepting the variance.
    CloseVariance,
    /// An administrator closes the order.
    Close,
}

impl Trigger {
    /// The user-facing action this trigger represents.
    pub const fn action(self) -> OrderAction {
        match self {
            Self::Submit => OrderAction::Submit,
            Self::Approve => OrderAction::Approve,
            Self::Reject => OrderAction::Reject,
            Self::Link => OrderAction::Link,
            Self::Delivery(_) => OrderAction::Deliver,
            Self::Edit => OrderAction::Edit,
            Self::AcceptVariance | Self::CloseVariance => OrderAction::ReviewVariance,
            Self::Close => OrderAction::Close,
        }
    }
}

/// The action named in a refused transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderAction {
    /// Submit for approval.
    Submit,
    /// Approve.
    Approve,
    /// Reject.
    Reject,
    /// Link to an external reference.
    Link,
    /// Record a delivery.
    Deliver,
    /// Edit lines.
    Edit,
    /// Review a variance.
    ReviewVariance,
    /// Close administratively.
    Close,
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Link => "link",
            Self::Deliver => "record a delivery on",
            Self::Edit => "edit",
            Self::ReviewVariance => "review the variance of",
            Self::Close => "close",
        })
    }
}

/// Computes the status that follows `from` when `trigger` happens.
///
/// A `VARIANCE_PENDING` order stays there across further deliveries until a
/// reviewer accepts or closes it. A delivery that touched nothing leaves the
/// status as it was.
pub fn transition(from: OrderStatus, trigger: Trigger) -> CommandResult<OrderStatus> {
    use OrderStatus as S;

    let next = match (from, trigger) {
        (S::Draft, Trigger::Submit) => Some(S::PendingApproval),
        (S::PendingApproval, Trigger::Approve) => Some(S::ApprovedPendingConcur),
        (S::PendingApproval, Trigger::Reject) => Some(S::Rejected),
        (S::ApprovedPendingConcur, Trigger::Link) => Some(S::Active),
        (S::Draft | S::PendingApproval, Trigger::Edit) => Some(from),
        (S::VariancePending, Trigger::Delivery(_)) => Some(S::VariancePending),
        (status, Trigger::Delivery(outcome)) if status.accepts_deliveries() => Some(match outcome {
            DeliveryOutcome::Untouched => status,
            DeliveryOutcome::Variance => S::VariancePending,
            DeliveryOutcome::Complete => S::Received,
            DeliveryOutcome::Partial => S::PartiallyReceived,
        }),
        (S::VariancePending, Trigger::AcceptVariance) => Some(S::Received),
        (S::VariancePending, Trigger::CloseVariance) => Some(S::Closed),
        (status, Trigger::Close) if !status.is_terminal() => Some(S::Closed),
        _ => None,
    };

    next.ok_or(CommandError::InvalidTransition {
        from,
        action: trigger.action(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        prop::sample::select(OrderStatus::ALL.to_vec())
    }

    fn any_outcome() -> impl Strategy<Value = DeliveryOutcome> {
        prop::sample::select(vec![
            DeliveryOutcome::Untouched,
            DeliveryOutcome::Variance,
            DeliveryOutcome::Complete,
            DeliveryOutcome::Partial,
        ])
    }

    #[test]
    fn approval_path_reaches_active() {
        let status = transition(OrderStatus::Draft, Trigger::Submit)
            .and_then(|s| transition(s, Trigger::Approve))
            .and_then(|s| transition(s, Trigger::Link))
            .unwrap();
        assert_eq!(status, OrderStatus::Active);
    }

    #[test]
    fn rejection_is_terminal() {
        let rejected = transition(OrderStatus::PendingApproval, Trigger::Reject).unwrap();
        assert_eq!(rejected, OrderStatus::Rejected);
        assert!(transition(rejected, Trigger::Close).is_err());
        assert!(transition(rejected, Trigger::Approve).is_err());
    }

    #[test]
    fn link_requires_approval_first() {
        for from in [
            OrderStatus::Draft,
            OrderStatus::PendingApproval,
            OrderStatus::Active,
            OrderStatus::Received,
        ] {
            let err = transition(from, Trigger::Link).unwrap_err();
            assert!(matches!(
                err,
                CommandError::InvalidTransition {
                    action: OrderAction::Link,
                    ..
                }
            ));
        }
    }

    #[test]
    fn delivery_outcomes_map_to_statuses() {
        let active = OrderStatus::Active;
        assert_eq!(
            transition(active, Trigger::Delivery(DeliveryOutcome::Partial)).unwrap(),
            OrderStatus::PartiallyReceived
        );
        assert_eq!(
            transition(active, Trigger::Delivery(DeliveryOutcome::Complete)).unwrap(),
            OrderStatus::Received
        );
        assert_eq!(
            transition(active, Trigger::Delivery(DeliveryOutcome::Variance)).unwrap(),
            OrderStatus::VariancePending
        );
        assert_eq!(
            transition(active, Trigger::Delivery(DeliveryOutcome::Untouched)).unwrap(),
            OrderStatus::Active
        );
    }

    #[test]
    fn deliveries_are_refused_before_linkage() {
        for from in [
            OrderStatus::Draft,
            OrderStatus::PendingApproval,
            OrderStatus::ApprovedPendingConcur,
            OrderStatus::Closed,
            OrderStatus::Rejected,
        ] {
            assert!(transition(from, Trigger::Delivery(DeliveryOutcome::Partial)).is_err());
        }
    }

    #[test]
    fn variance_review_resolves_to_received_or_closed() {
        let pending = OrderStatus::VariancePending;
        assert_eq!(
            transition(pending, Trigger::AcceptVariance).unwrap(),
            OrderStatus::Received
        );
        assert_eq!(
            transition(pending, Trigger::CloseVariance).unwrap(),
            OrderStatus::Closed
        );
        assert!(transition(OrderStatus::Received, Trigger::AcceptVariance).is_err());
    }

    #[test]
    fn status_serializes_to_wire_names() {
        let json = serde_json::to_string(&OrderStatus::ApprovedPendingConcur).unwrap();
        assert_eq!(json, "\"APPROVED_PENDING_CONCUR\"");
        for status in OrderStatus::ALL {
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{status}\"")
            );
        }
    }

    proptest! {
        #[test]
        fn variance_pending_is_sticky_across_deliveries(outcome in any_outcome()) {
            prop_assert_eq!(
                transition(OrderStatus::VariancePending, Trigger::Delivery(outcome)).unwrap(),
                OrderStatus::VariancePending
            );
        }

        #[test]
        fn terminal_statuses_refuse_every_trigger(
            outcome in any_outcome(),
            terminal in prop::sample::select(vec![OrderStatus::Closed, OrderStatus::Rejected]),
        ) {
            for trigger in [
                Trigger::Submit,
                Trigger::Approve,
                Trigger::Reject,
                Trigger::Link,
                Trigger::Delivery(outcome),
                Trigger::Edit,
                Trigger::AcceptVariance,
                Trigger::CloseVariance,
                Trigger::Close,
            ] {
                prop_assert!(transition(terminal, trigger).is_err());
            }
        }

        #[test]
        fn close_succeeds_from_every_open_status(from in any_status()) {
            let result = transition(from, Trigger::Close);
            prop_assert_eq!(result.is_ok(), !from.is_terminal());
        }
    }
}
