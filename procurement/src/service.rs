//! The order service.
//!
//! Entry point for callers: runs each order command through the executor
//! with retries, then reloads the order from its events so the caller sees
//! exactly what was committed.

use crate::command::CommandResult;
use crate::errors::CommandError;
use crate::event_store::{EventStore, ReadOptions, StreamData};
use crate::executor::config::EngineConfig;
use crate::executor::{CommandExecutor, ExecutionContext};
use crate::order::{
    order_stream, registry_stream, CloseOrder, CloseOrderInput, CreateOrder, CreateOrderInput,
    DecideApproval, DecideApprovalInput, LinkExternalReference, LinkExternalReferenceInput,
    Order, OrderBook, ProcurementEvent, RecordDelivery, RecordDeliveryInput, ReviewVariance,
    ReviewVarianceInput, SubmitOrder, SubmitOrderInput, UpdateCapitalisation,
    UpdateCapitalisationInput, UpdatePendingOrder, UpdatePendingOrderInput,
};
use crate::reconciliation::Variance;
use crate::types::{OrderId, StreamId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Read access to orders, as needed by projections.
#[async_trait]
pub trait OrderReader: Send + Sync {
    /// Every order, oldest first.
    async fn list_orders(&self) -> CommandResult<Vec<Order>>;
}

#[async_trait]
impl<T> OrderReader for Arc<T>
where
    T: OrderReader + ?Sized,
{
    async fn list_orders(&self) -> CommandResult<Vec<Order>> {
        (**self).list_orders().await
    }
}

/// What recording a delivery produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// The order after the delivery.
    pub order: Order,
    /// Variances this delivery raised.
    pub variances: Vec<Variance>,
    /// False when the delivery id had already been recorded and nothing was
    /// written.
    pub recorded: bool,
}

/// Runs order commands and serves order reads.
#[derive(Debug, Clone)]
pub struct OrderService<ES> {
    executor: CommandExecutor<ES>,
}

impl<ES> OrderService<ES>
where
    ES: EventStore<Event = ProcurementEvent>,
{
    /// Creates a service over an executor.
    pub const fn new(executor: CommandExecutor<ES>) -> Self {
        Self { executor }
    }

    /// Creates a service configured from `config`.
    pub fn from_config(event_store: ES, config: &EngineConfig) -> Self {
        Self::new(CommandExecutor::from_config(event_store, config))
    }

    /// The executor commands run through.
    pub const fn executor(&self) -> &CommandExecutor<ES> {
        &self.executor
    }

    /// Creates an order, optionally submitting it in the same write.
    #[instrument(skip_all, fields(order_id = %input.order_id()))]
    pub async fn create_order(&self, input: CreateOrderInput) -> CommandResult<Order> {
        let order_id = input.order_id();
        let context = ExecutionContext::for_user(input.requester().as_ref());
        self.executor
            .execute_with_retry(&CreateOrder, input, context)
            .await?;
        let order = self.get_order(order_id).await?;
        info!(display_id = %order.display_id, status = %order.status, "Order created");
        Ok(order)
    }

    /// Submits a draft for approval.
    #[instrument(skip_all, fields(order_id = %input.order_id))]
    pub async fn submit_order(&self, input: SubmitOrderInput) -> CommandResult<Order> {
        let order_id = input.order_id;
        let context = ExecutionContext::for_user(input.actor.as_ref());
        self.executor
            .execute_with_retry(&SubmitOrder, input, context)
            .await?;
        self.get_order(order_id).await
    }

    /// Records an approver's decision.
    #[instrument(skip_all, fields(order_id = %input.order_id))]
    pub async fn decide_approval(&self, input: DecideApprovalInput) -> CommandResult<Order> {
        let order_id = input.order_id;
        let context = ExecutionContext::for_user(input.actor.as_ref());
        self.executor
            .execute_with_retry(&DecideApproval, input, context)
            .await?;
        let order = self.get_order(order_id).await?;
        info!(status = %order.status, "Approval decided");
        Ok(order)
    }

    /// Links the external reference and activates the order.
    #[instrument(skip_all, fields(order_id = %input.order_id()))]
    pub async fn link_external_reference(
        &self,
        input: LinkExternalReferenceInput,
    ) -> CommandResult<Order> {
        let order_id = input.order_id();
        let context = ExecutionContext::for_user(input.actor().as_ref());
        self.executor
            .execute_with_retry(&LinkExternalReference, input, context)
            .await?;
        self.get_order(order_id).await
    }

    /// Records a delivery and reports the variances it raised.
    #[instrument(skip_all, fields(order_id = %input.order_id(), delivery_id = %input.delivery().id))]
    pub async fn record_delivery(&self, input: RecordDeliveryInput) -> CommandResult<DeliveryReceipt> {
        let order_id = input.order_id();
        let delivery_id = input.delivery().id;
        let context = ExecutionContext::for_user(input.delivery().received_by.as_ref());
        let result = self
            .executor
            .execute_with_retry(&RecordDelivery, input, context)
            .await?;

        let order = self.get_order(order_id).await?;
        let variances = order
            .delivery(delivery_id)
            .map(|delivery| delivery.variances.clone())
            .ok_or_else(|| CommandError::unknown_delivery(order_id, delivery_id))?;
        info!(status = %order.status, variances = variances.len(), "Delivery recorded");

        Ok(DeliveryReceipt {
            order,
            variances,
            recorded: !result.is_noop(),
        })
    }

    /// Updates finance fields of one delivery line.
    #[instrument(skip_all, fields(order_id = %input.order_id, delivery_id = %input.delivery_id))]
    pub async fn update_capitalisation(
        &self,
        input: UpdateCapitalisationInput,
    ) -> CommandResult<Order> {
        let order_id = input.order_id;
        self.executor
            .execute_with_retry(&UpdateCapitalisation, input, ExecutionContext::default())
            .await?;
        self.get_order(order_id).await
    }

    /// Replaces the lines and metadata of an order not yet approved.
    #[instrument(skip_all, fields(order_id = %input.order_id()))]
    pub async fn update_pending_order(&self, input: UpdatePendingOrderInput) -> CommandResult<Order> {
        let order_id = input.order_id();
        let context = ExecutionContext::for_user(input.actor().as_ref());
        self.executor
            .execute_with_retry(&UpdatePendingOrder, input, context)
            .await?;
        self.get_order(order_id).await
    }

    /// Resolves a variance.
    #[instrument(skip_all, fields(order_id = %input.order_id))]
    pub async fn review_variance(&self, input: ReviewVarianceInput) -> CommandResult<Order> {
        let order_id = input.order_id;
        let context = ExecutionContext::for_user(input.actor.as_ref());
        self.executor
            .execute_with_retry(&ReviewVariance, input, context)
            .await?;
        let order = self.get_order(order_id).await?;
        info!(status = %order.status, "Variance reviewed");
        Ok(order)
    }

    /// Closes an order administratively.
    #[instrument(skip_all, fields(order_id = %input.order_id))]
    pub async fn close_order(&self, input: CloseOrderInput) -> CommandResult<Order> {
        let order_id = input.order_id;
        let context = ExecutionContext::for_user(input.actor.as_ref());
        self.executor
            .execute_with_retry(&CloseOrder, input, context)
            .await?;
        self.get_order(order_id).await
    }

    /// Loads one order from its events.
    pub async fn get_order(&self, order_id: OrderId) -> CommandResult<Order> {
        let data = self.read(&[order_stream(order_id)]).await?;
        fold(&data).require(order_id)
    }

    /// Loads every registered order.
    pub async fn list_orders(&self) -> CommandResult<Vec<Order>> {
        let registry = self.read(&[registry_stream()]).await?;
        let streams: Vec<StreamId> = registry
            .events
            .iter()
            .filter_map(|event| match &event.payload {
                ProcurementEvent::OrderRegistered { order_id, .. } => Some(order_stream(*order_id)),
                _ => None,
            })
            .collect();
        if streams.is_empty() {
            return Ok(Vec::new());
        }

        let data = self.read(&streams).await?;
        let orders = fold(&data).into_orders();
        debug!(orders = orders.len(), "Listed orders");
        Ok(orders)
    }

    async fn read(&self, streams: &[StreamId]) -> CommandResult<StreamData<ProcurementEvent>> {
        Ok(self
            .executor
            .event_store()
            .read_streams(streams, &ReadOptions::new())
            .await?)
    }
}

fn fold(data: &StreamData<ProcurementEvent>) -> OrderBook {
    data.events.iter().fold(OrderBook::default(), |mut book, event| {
        book.apply(event);
        book
    })
}

#[async_trait]
impl<ES> OrderReader for OrderService<ES>
where
    ES: EventStore<Event = ProcurementEvent>,
{
    async fn list_orders(&self) -> CommandResult<Vec<Order>> {
        Self::list_orders(self).await
    }
}
