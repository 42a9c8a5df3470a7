//! Stock availability projection.
//!
//! Effective stock of a product at a supplier is the supplier's latest
//! snapshot of the mapped SKU, less what open orders raised after that
//! snapshot still expect to draw. Orders raised on or before the snapshot
//! date are assumed to be reflected in the count already.
//!
//! Availability converts effective stock into internal units and rounds it
//! down to the product's order multiple. Stock is never reported higher than
//! what is known: every read failure yields zero.

use crate::catalog::{CatalogRepository, MappingResolver, Product, ProductMapping};
use crate::errors::{ProjectionResult, RepositoryResult};
use crate::order::{Order, OrderStatus};
use crate::service::OrderReader;
use crate::snapshot::{latest_per_sku, SnapshotRepository, StoredSnapshot};
use crate::types::{ProductId, SupplierId, SupplierSku, Timestamp};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Projected availability of one product at one supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAvailability {
    /// Product.
    pub product_id: ProductId,
    /// Supplier.
    pub supplier_id: SupplierId,
    /// Mapped supplier SKU.
    pub supplier_sku: SupplierSku,
    /// Date of the snapshot used.
    pub snapshot_date: NaiveDate,
    /// Effective stock in internal units.
    pub available_units: u64,
    /// `available_units` rounded down to the order multiple.
    pub available_order_qty: u64,
    /// When the entry was computed.
    pub updated_at: Timestamp,
}

/// Storage for the availability projection.
#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    /// Inserts or replaces entries keyed by product and supplier, all at
    /// once. Entries not mentioned are left as they are.
    async fn upsert_all(&self, entries: Vec<ProductAvailability>) -> RepositoryResult<()>;

    /// One entry.
    async fn get(
        &self,
        product_id: &ProductId,
        supplier_id: &SupplierId,
    ) -> RepositoryResult<Option<ProductAvailability>>;

    /// Every entry.
    async fn all(&self) -> RepositoryResult<Vec<ProductAvailability>>;
}

/// Demand still expected from open orders for `product_id`.
///
/// Counts ordered quantities on orders requested strictly after
/// `snapshot_date` whose status is in `open_statuses`.
pub fn pending_demand(
    orders: &[Order],
    product_id: &ProductId,
    snapshot_date: NaiveDate,
    open_statuses: &[OrderStatus],
) -> u64 {
    orders
        .iter()
        .filter(|order| order.request_date > snapshot_date)
        .filter(|order| open_statuses.contains(&order.status))
        .map(|order| order.ordered_quantity_of(product_id))
        .fold(0, u64::saturating_add)
}

/// Snapshot quantity less pending demand, floored at zero.
pub const fn net_stock(available_qty: u64, pending_demand: u64) -> u64 {
    available_qty.saturating_sub(pending_demand)
}

/// Converts effective stock to internal units and orderable quantity.
///
/// Returns `(available_units, available_order_qty)`.
pub fn batch_quantities(effective_stock: u64, mapping: &ProductMapping, product: &Product) -> (u64, u64) {
    let factor = u64::from(u32::from(mapping.pack_conversion_factor));
    let units = effective_stock.saturating_mul(factor);
    let multiple = product.order_multiple();
    (units, units / multiple * multiple)
}

/// Why a mapping was left out of a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The mapped product is not in the catalog.
    UnknownProduct,
    /// The supplier has never reported the SKU.
    NoSnapshot,
}

/// Summary of a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Entries written.
    pub updated: Vec<ProductAvailability>,
    /// Mappings left out; their previous entries are kept.
    pub skipped: Vec<(ProductId, SupplierId, SkipReason)>,
}

/// Computes and stores availability.
pub struct AvailabilityProjector<O> {
    orders: O,
    resolver: MappingResolver,
    snapshots: Arc<dyn SnapshotRepository>,
    availability: Arc<dyn AvailabilityRepository>,
    open_statuses: Vec<OrderStatus>,
}

impl<O> std::fmt::Debug for AvailabilityProjector<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityProjector")
            .field("open_statuses", &self.open_statuses)
            .finish_non_exhaustive()
    }
}

impl<O> AvailabilityProjector<O>
where
    O: OrderReader,
{
    /// Creates a projector counting the default open-demand statuses.
    pub fn new(
        orders: O,
        catalog: Arc<dyn CatalogRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        availability: Arc<dyn AvailabilityRepository>,
    ) -> Self {
        Self {
            orders,
            resolver: MappingResolver::new(catalog),
            snapshots,
            availability,
            open_statuses: OrderStatus::OPEN_DEMAND.to_vec(),
        }
    }

    /// Overrides which order statuses count as pending demand.
    #[must_use]
    pub fn with_open_statuses(mut self, statuses: Vec<OrderStatus>) -> Self {
        self.open_statuses = statuses;
        self
    }

    /// Effective stock of `product_id` at `supplier_id`, in supplier units.
    ///
    /// Zero when there is no confirmed mapping, no snapshot, or any read
    /// fails.
    #[instrument(skip(self), fields(product_id = %product_id, supplier_id = %supplier_id))]
    pub async fn effective_stock(&self, product_id: &ProductId, supplier_id: &SupplierId) -> u64 {
        match self.try_effective_stock(product_id, supplier_id).await {
            Ok(stock) => stock,
            Err(err) => {
                warn!(error = %err, "Could not compute effective stock; reporting zero");
                0
            }
        }
    }

    /// Effective stock, surfacing read failures.
    pub async fn try_effective_stock(
        &self,
        product_id: &ProductId,
        supplier_id: &SupplierId,
    ) -> ProjectionResult<u64> {
        let Some(mapping) = self.resolver.resolve(product_id, supplier_id).await? else {
            debug!("No confirmed mapping");
            return Ok(0);
        };
        let Some(snapshot) = self
            .snapshots
            .latest(supplier_id, &mapping.supplier_sku)
            .await?
        else {
            debug!(sku = %mapping.supplier_sku, "No snapshot");
            return Ok(0);
        };

        let orders = self.orders.list_orders().await?;
        let demand = pending_demand(
            &orders,
            product_id,
            snapshot.snapshot.snapshot_date,
            &self.open_statuses,
        );
        Ok(net_stock(snapshot.snapshot.available_qty, demand))
    }

    /// Recomputes availability for every confirmed mapping.
    ///
    /// All inputs are read once up front and every entry is computed from
    /// that one view before anything is written; the results are then stored
    /// in a single upsert. If any read fails, nothing is written and the
    /// previous entries stand. Mappings without a product or snapshot are
    /// skipped and keep their previous entries.
    #[instrument(skip(self))]
    pub async fn refresh_availability(&self) -> ProjectionResult<RefreshReport> {
        let mappings = self.resolver.confirmed_mappings().await?;
        let snapshots: HashMap<(SupplierId, SupplierSku), StoredSnapshot> =
            latest_per_sku(self.snapshots.all().await?);
        let orders = self.orders.list_orders().await?;

        let mut by_key: HashMap<(ProductId, SupplierId), Vec<ProductMapping>> = HashMap::new();
        for mapping in mappings {
            by_key
                .entry((mapping.product_id.clone(), mapping.supplier_id.clone()))
                .or_default()
                .push(mapping);
        }

        let mut products: HashMap<ProductId, Option<Product>> = HashMap::new();
        let mut report = RefreshReport::default();
        let now = Timestamp::now();

        let mut keys: Vec<_> = by_key.keys().cloned().collect();
        keys.sort();
        for key in keys {
            let (product_id, supplier_id) = key.clone();
            let Some(mapping) = by_key
                .get(&key)
                .and_then(|m| MappingResolver::choose(&product_id, &supplier_id, m))
            else {
                continue;
            };

            if !products.contains_key(&product_id) {
                let product = self.resolver.product(&product_id).await?;
                products.insert(product_id.clone(), product);
            }
            let Some(Some(product)) = products.get(&product_id) else {
                report
                    .skipped
                    .push((product_id, supplier_id, SkipReason::UnknownProduct));
                continue;
            };

            let Some(snapshot) =
                snapshots.get(&(supplier_id.clone(), mapping.supplier_sku.clone()))
            else {
                report
                    .skipped
                    .push((product_id, supplier_id, SkipReason::NoSnapshot));
                continue;
            };

            let demand = pending_demand(
                &orders,
                &product_id,
                snapshot.snapshot.snapshot_date,
                &self.open_statuses,
            );
            let effective = net_stock(snapshot.snapshot.available_qty, demand);
            let (available_units, available_order_qty) =
                batch_quantities(effective, mapping, product);

            report.updated.push(ProductAvailability {
                product_id,
                supplier_id,
                supplier_sku: mapping.supplier_sku.clone(),
                snapshot_date: snapshot.snapshot.snapshot_date,
                available_units,
                available_order_qty,
                updated_at: now,
            });
        }

        self.availability.upsert_all(report.updated.clone()).await?;
        info!(
            updated = report.updated.len(),
            skipped = report.skipped.len(),
            "Availability refreshed"
        );
        Ok(report)
    }

    /// The stored entry for one product and supplier.
    pub async fn availability(
        &self,
        product_id: &ProductId,
        supplier_id: &SupplierId,
    ) -> ProjectionResult<Option<ProductAvailability>> {
        Ok(self.availability.get(product_id, supplier_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MappingStatus;
    use crate::errors::{CommandResult, RepositoryError};
    use crate::order::{LineItem, OrderMetadata};
    use crate::snapshot::StockSnapshot;
    use crate::types::{
        ActorName, DisplayId, LineId, OrderId, OrderedQuantity, PackConversionFactor, SiteId,
        UnitPrice,
    };
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn widget() -> ProductId {
        ProductId::try_new("widget").unwrap()
    }

    fn acme() -> SupplierId {
        SupplierId::try_new("acme").unwrap()
    }

    fn order(request_day: u32, status: OrderStatus, quantity: u64) -> Order {
        Order {
            id: OrderId::generate(),
            display_id: DisplayId::from_sequence(1),
            requester: ActorName::try_new("riley").unwrap(),
            site: SiteId::try_new("north").unwrap(),
            supplier_id: acme(),
            request_date: day(request_day),
            status,
            lines: vec![LineItem::new(
                LineId::generate(),
                widget(),
                SupplierSku::try_new("W-1").unwrap(),
                OrderedQuantity::try_new(quantity).unwrap(),
                UnitPrice::try_new(dec!(1)).unwrap(),
            )],
            approvals: vec![],
            deliveries: vec![],
            metadata: OrderMetadata::default(),
            external_reference: None,
            created_at: Timestamp::now(),
        }
    }

    fn mapping(factor: u32) -> ProductMapping {
        ProductMapping {
            product_id: widget(),
            supplier_id: acme(),
            supplier_sku: SupplierSku::try_new("W-1").unwrap(),
            status: MappingStatus::Confirmed,
            pack_conversion_factor: PackConversionFactor::try_new(factor).unwrap(),
        }
    }

    struct Orders(Vec<Order>);

    #[async_trait]
    impl OrderReader for Orders {
        async fn list_orders(&self) -> CommandResult<Vec<Order>> {
            Ok(self.0.clone())
        }
    }

    struct Catalog {
        product: Option<Product>,
        mappings: Vec<ProductMapping>,
        fail: bool,
    }

    #[async_trait]
    impl CatalogRepository for Catalog {
        async fn product(&self, _: &ProductId) -> RepositoryResult<Option<Product>> {
            Ok(self.product.clone())
        }

        async fn mappings(
            &self,
            _: &ProductId,
            _: &SupplierId,
        ) -> RepositoryResult<Vec<ProductMapping>> {
            if self.fail {
                return Err(RepositoryError::Unavailable("catalog offline".into()));
            }
            Ok(self.mappings.clone())
        }

        async fn confirmed_mappings(&self) -> RepositoryResult<Vec<ProductMapping>> {
            if self.fail {
                return Err(RepositoryError::Unavailable("catalog offline".into()));
            }
            Ok(self.mappings.clone())
        }
    }

    struct Snapshots(Vec<StoredSnapshot>);

    #[async_trait]
    impl SnapshotRepository for Snapshots {
        async fn add(&self, _: StockSnapshot) -> RepositoryResult<StoredSnapshot> {
            Err(RepositoryError::Rejected("read only".into()))
        }

        async fn replace_for_date(
            &self,
            _: &SupplierId,
            _: NaiveDate,
            _: Vec<StockSnapshot>,
        ) -> RepositoryResult<Vec<StoredSnapshot>> {
            Err(RepositoryError::Rejected("read only".into()))
        }

        async fn for_sku(
            &self,
            supplier_id: &SupplierId,
            supplier_sku: &SupplierSku,
        ) -> RepositoryResult<Vec<StoredSnapshot>> {
            Ok(self
                .0
                .iter()
                .filter(|s| {
                    &s.snapshot.supplier_id == supplier_id
                        && &s.snapshot.supplier_sku == supplier_sku
                })
                .cloned()
                .collect())
        }

        async fn all(&self) -> RepositoryResult<Vec<StoredSnapshot>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct Table(Mutex<Vec<ProductAvailability>>);

    #[async_trait]
    impl AvailabilityRepository for Table {
        async fn upsert_all(&self, entries: Vec<ProductAvailability>) -> RepositoryResult<()> {
            let mut table = self.0.lock().unwrap();
            for entry in entries {
                table.retain(|e| {
                    e.product_id != entry.product_id || e.supplier_id != entry.supplier_id
                });
                table.push(entry);
            }
            Ok(())
        }

        async fn get(
            &self,
            product_id: &ProductId,
            supplier_id: &SupplierId,
        ) -> RepositoryResult<Option<ProductAvailability>> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .find(|e| &e.product_id == product_id && &e.supplier_id == supplier_id)
                .cloned())
        }

        async fn all(&self) -> RepositoryResult<Vec<ProductAvailability>> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn snapshot(sequence: u64, d: u32, qty: u64) -> StoredSnapshot {
        StoredSnapshot {
            sequence,
            snapshot: StockSnapshot {
                supplier_id: acme(),
                supplier_sku: SupplierSku::try_new("W-1").unwrap(),
                snapshot_date: day(d),
                available_qty: qty,
            },
        }
    }

    fn projector(
        orders: Vec<Order>,
        catalog: Catalog,
        snapshots: Vec<StoredSnapshot>,
    ) -> (AvailabilityProjector<Orders>, Arc<Table>) {
        let table = Arc::new(Table::default());
        let projector = AvailabilityProjector::new(
            Orders(orders),
            Arc::new(catalog),
            Arc::new(Snapshots(snapshots)),
            table.clone(),
        );
        (projector, table)
    }

    fn catalog(multiple: Option<u32>, factor: u32) -> Catalog {
        Catalog {
            product: Some(Product {
                id: widget(),
                name: "Widget".into(),
                default_order_multiple: multiple,
            }),
            mappings: vec![mapping(factor)],
            fail: false,
        }
    }

    #[test]
    fn demand_counts_open_orders_after_the_snapshot_only() {
        let orders = vec![
            order(2, OrderStatus::Active, 30),
            order(1, OrderStatus::Active, 500),
            order(3, OrderStatus::Received, 500),
            order(4, OrderStatus::PendingApproval, 5),
        ];
        assert_eq!(
            pending_demand(&orders, &widget(), day(1), &OrderStatus::OPEN_DEMAND),
            35
        );
    }

    #[test]
    fn net_stock_never_goes_negative() {
        assert_eq!(net_stock(100, 30), 70);
        assert_eq!(net_stock(10, 30), 0);
    }

    #[test]
    fn batch_quantities_round_down_to_multiple() {
        let product = Product {
            id: widget(),
            name: "Widget".into(),
            default_order_multiple: Some(12),
        };
        assert_eq!(batch_quantities(7, &mapping(6), &product), (42, 36));
    }

    #[tokio::test]
    async fn effective_stock_nets_demand_raised_after_snapshot() {
        let (projector, _) = projector(
            vec![order(2, OrderStatus::Active, 30)],
            catalog(None, 1),
            vec![snapshot(1, 1, 100)],
        );
        assert_eq!(projector.effective_stock(&widget(), &acme()).await, 70);
    }

    #[tokio::test]
    async fn effective_stock_is_zero_without_snapshot() {
        let (projector, _) = projector(vec![], catalog(None, 1), vec![]);
        assert_eq!(projector.effective_stock(&widget(), &acme()).await, 0);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn effective_stock_fails_closed_on_read_errors() {
        let failing = Catalog {
            fail: true,
            ..catalog(None, 1)
        };
        let (projector, _) = projector(vec![], failing, vec![snapshot(1, 1, 100)]);

        assert_eq!(projector.effective_stock(&widget(), &acme()).await, 0);
        assert!(logs_contain("reporting zero"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn ambiguous_confirmed_mappings_are_reported_on_the_stock_path() {
        let mut second = mapping(1);
        second.supplier_sku = SupplierSku::try_new("W-9").unwrap();
        let ambiguous = Catalog {
            mappings: vec![second, mapping(1)],
            ..catalog(None, 1)
        };
        let (projector, _) = projector(vec![], ambiguous, vec![snapshot(1, 1, 40)]);

        assert_eq!(projector.effective_stock(&widget(), &acme()).await, 40);
        assert!(logs_contain("Several confirmed mappings"));
    }

    #[tokio::test]
    async fn refresh_writes_batch_quantities() {
        let (projector, table) = projector(
            vec![order(2, OrderStatus::Active, 3)],
            catalog(Some(4), 2),
            vec![snapshot(1, 1, 10)],
        );

        let report = projector.refresh_availability().await.unwrap();

        assert_eq!(report.updated.len(), 1);
        let entry = table.get(&widget(), &acme()).await.unwrap().unwrap();
        assert_eq!(entry.available_units, 14);
        assert_eq!(entry.available_order_qty, 12);
        assert_eq!(entry.snapshot_date, day(1));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_entries() {
        let (projector, table) = projector(vec![], catalog(None, 1), vec![snapshot(1, 1, 10)]);
        projector.refresh_availability().await.unwrap();
        let before = table.all().await.unwrap();

        let failing = AvailabilityProjector::new(
            Orders(vec![]),
            Arc::new(Catalog {
                fail: true,
                ..catalog(None, 1)
            }),
            Arc::new(Snapshots(vec![snapshot(2, 2, 99)])),
            table.clone(),
        );
        assert!(failing.refresh_availability().await.is_err());
        assert_eq!(table.all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn mappings_without_product_are_skipped() {
        let (projector, table) = projector(
            vec![],
            Catalog {
                product: None,
                ..catalog(None, 1)
            },
            vec![snapshot(1, 1, 10)],
        );

        let report = projector.refresh_availability().await.unwrap();

        assert_eq!(
            report.skipped,
            vec![(widget(), acme(), SkipReason::UnknownProduct)]
        );
        assert!(table.all().await.unwrap().is_empty());
    }
}
