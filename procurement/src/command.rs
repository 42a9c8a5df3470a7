//! The command pattern every order mutation follows.
//!
//! A command names the streams it needs, folds their events into a private
//! state model with `apply`, and decides which new events to emit with
//! `handle`. `handle` is pure: it receives everything it needs through the
//! folded state and the input, and returns events instead of mutating
//! anything. The executor owns reading, writing and retrying.
//!
//! # Example
//!
//! ```rust,ignore
//! struct SubmitOrder;
//!
//! #[async_trait]
//! impl Command for SubmitOrder {
//!     type Input = SubmitOrderInput;
//!     type State = OrderBook;
//!     type Event = ProcurementEvent;
//!
//!     fn read_streams(&self, input: &Self::Input) -> Vec<StreamId> {
//!         vec![order_stream(input.order_id)]
//!     }
//!
//!     fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>) {
//!         state.apply(event);
//!     }
//!
//!     async fn handle(
//!         &self,
//!         state: Self::State,
//!         input: Self::Input,
//!     ) -> CommandResult<Vec<(StreamId, Self::Event)>> {
//!         let order = state.require(input.order_id)?;
//!         transition(order.status, Trigger::Submit)?;
//!         Ok(vec![(
//!             order_stream(order.id),
//!             ProcurementEvent::OrderSubmitted { order_id: order.id, actor: input.actor },
//!         )])
//!     }
//! }
//! ```

use crate::event_store::StoredEvent;
use crate::types::StreamId;
use async_trait::async_trait;

pub use crate::errors::CommandResult;

/// A unit of work against one or more event streams.
#[async_trait]
pub trait Command: Send + Sync {
    /// The input the command is executed with.
    type Input: Send + Sync + Clone;

    /// The state model folded from the streams the command reads.
    type State: Default + Send + Sync;

    /// The event type the command reads and writes.
    type Event: Send + Sync;

    /// A short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns the streams this command reads and may write to.
    fn read_streams(&self, input: &Self::Input) -> Vec<StreamId>;

    /// Folds one stored event into the state.
    fn apply(&self, state: &mut Self::State, event: &StoredEvent<Self::Event>);

    /// Decides the events to write.
    ///
    /// Returning an empty list is a successful no-op.
    async fn handle(
        &self,
        state: Self::State,
        input: Self::Input,
    ) -> CommandResult<Vec<(StreamId, Self::Event)>>;
}
