//! Procurement orders: the model, its status machine, events and commands.

pub mod commands;
pub mod events;
pub mod model;
pub mod status;

pub use commands::{
    CloseOrder, CloseOrderInput, CreateOrder, CreateOrderInput, DecideApproval,
    DecideApprovalInput, DeliveryDraft, DeliveryLineDraft, LineDraft, LinkExternalReference,
    LinkExternalReferenceInput, OrderHeader, RecordDelivery, RecordDeliveryInput, ReviewVariance,
    ReviewVarianceInput, SubmitOrder, SubmitOrderInput, UpdateCapitalisation,
    UpdateCapitalisationInput, UpdatePendingOrder, UpdatePendingOrderInput,
};
pub use events::{
    order_stream, registry_stream, ApprovalDecision, OrderBook, OrderCreated, ProcurementEvent,
    VarianceResolution, REGISTRY_STREAM,
};
pub use model::{
    ApprovalEntry, ApprovalKind, Delivery, DeliveryLine, DeliveryRecord, LineItem, Order,
    OrderMetadata, RequestReason,
};
pub use status::{transition, DeliveryOutcome, OrderAction, OrderStatus, Trigger};
