//! A fully wired in-memory engine for scenario tests.

use std::sync::Arc;

use chrono::NaiveDate;
use procurement::availability::AvailabilityProjector;
use procurement::catalog::{MappingStatus, Product, ProductMapping};
use procurement::errors::{CommandResult, RepositoryResult};
use procurement::order::{
    ApprovalDecision, DecideApprovalInput, LinkExternalReferenceInput, Order, ProcurementEvent,
    RecordDeliveryInput,
};
use procurement::snapshot::{SnapshotRepository, StockSnapshot, StoredSnapshot};
use procurement::testing::builders::{DeliveryBuilder, OrderBuilder};
use procurement::types::{
    ActorName, OrderId, PackConversionFactor, ProductId, SupplierId, SupplierSku,
};
use procurement::{DeliveryReceipt, EngineConfig, OrderService};
use procurement_memory::{
    InMemoryAvailabilityRepository, InMemoryCatalogRepository, InMemoryEventStore,
    InMemorySnapshotRepository,
};

/// The order service over the in-memory store.
pub type MemoryOrderService = OrderService<InMemoryEventStore<ProcurementEvent>>;

/// Calendar date shorthand. Panics on an impossible date.
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid calendar date")
}

/// Actor name shorthand. Panics on a blank name.
pub fn actor(name: &str) -> ActorName {
    ActorName::try_new(name).expect("valid actor name")
}

/// The approver every fixture helper acts as.
pub fn approver() -> ActorName {
    actor("approver")
}

/// Service, repositories and projector sharing one in-memory store.
pub struct World {
    /// The event store; clones share its log.
    pub store: InMemoryEventStore<ProcurementEvent>,
    /// The order service.
    pub service: Arc<MemoryOrderService>,
    /// Products and supplier mappings.
    pub catalog: Arc<InMemoryCatalogRepository>,
    /// Stock snapshot history.
    pub snapshots: Arc<InMemorySnapshotRepository>,
    /// The availability table.
    pub availability: Arc<InMemoryAvailabilityRepository>,
    /// The projector over all of the above.
    pub projector: AvailabilityProjector<Arc<MemoryOrderService>>,
}

impl World {
    /// A world with the default engine configuration.
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    /// A world configured from `config`.
    pub fn with_config(config: &EngineConfig) -> Self {
        let store = InMemoryEventStore::new();
        let service = Arc::new(OrderService::from_config(store.clone(), config));
        let catalog = Arc::new(InMemoryCatalogRepository::new());
        let snapshots = Arc::new(InMemorySnapshotRepository::new());
        let availability = Arc::new(InMemoryAvailabilityRepository::new());
        let projector = AvailabilityProjector::new(
            Arc::clone(&service),
            Arc::clone(&catalog) as _,
            Arc::clone(&snapshots) as _,
            Arc::clone(&availability) as _,
        )
        .with_open_statuses(config.open_demand_statuses.clone());

        Self {
            store,
            service,
            catalog,
            snapshots,
            availability,
            projector,
        }
    }

    /// Adds a product ordered in multiples of `order_multiple`.
    pub fn product(&self, product_id: &str, order_multiple: Option<u32>) -> ProductId {
        let id = ProductId::try_new(product_id).expect("valid product id");
        self.catalog.put_product(Product {
            id: id.clone(),
            name: product_id.to_string(),
            default_order_multiple: order_multiple,
        });
        id
    }

    /// Adds a supplier mapping in the given review state.
    pub fn mapping(
        &self,
        product_id: &str,
        supplier_id: &str,
        sku: &str,
        pack_factor: u32,
        status: MappingStatus,
    ) {
        self.catalog.put_mapping(ProductMapping {
            product_id: ProductId::try_new(product_id).expect("valid product id"),
            supplier_id: SupplierId::try_new(supplier_id).expect("valid supplier id"),
            supplier_sku: SupplierSku::try_new(sku).expect("valid sku"),
            status,
            pack_conversion_factor: PackConversionFactor::try_new(pack_factor)
                .expect("valid pack factor"),
        });
    }

    /// Records a stock snapshot.
    pub async fn snapshot(
        &self,
        supplier_id: &str,
        sku: &str,
        snapshot_date: NaiveDate,
        available_qty: u64,
    ) -> RepositoryResult<StoredSnapshot> {
        self.snapshots
            .add(StockSnapshot {
                supplier_id: SupplierId::try_new(supplier_id).expect("valid supplier id"),
                supplier_sku: SupplierSku::try_new(sku).expect("valid sku"),
                snapshot_date,
                available_qty,
            })
            .await
    }

    /// Creates and submits the order described by `builder`.
    pub async fn submit(&self, builder: OrderBuilder) -> CommandResult<Order> {
        let input = builder.submitted().try_build()?;
        self.service.create_order(input).await
    }

    /// Approves a submitted order.
    pub async fn approve(&self, order_id: OrderId) -> CommandResult<Order> {
        self.service
            .decide_approval(DecideApprovalInput {
                order_id,
                decision: ApprovalDecision::Approve,
                actor: approver(),
                comments: None,
            })
            .await
    }

    /// Submits, approves and links the order, leaving it `ACTIVE`.
    pub async fn activate(&self, builder: OrderBuilder) -> CommandResult<Order> {
        let order = self.submit(builder).await?;
        self.approve(order.id).await?;
        let reference = format!("EXT-{}", order.display_id);
        self.service
            .link_external_reference(LinkExternalReferenceInput::new(
                order.id,
                &reference,
                approver(),
            )?)
            .await
    }

    /// Records the delivery described by `builder` against `order_id`.
    pub async fn deliver(
        &self,
        order_id: OrderId,
        builder: DeliveryBuilder,
    ) -> CommandResult<DeliveryReceipt> {
        let input = RecordDeliveryInput::new(order_id, builder.build())?;
        self.service.record_delivery(input).await
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("events", &self.store.event_count())
            .finish_non_exhaustive()
    }
}
