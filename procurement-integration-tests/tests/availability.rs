//! Stock projection against live orders.

use procurement::availability::SkipReason;
use procurement::catalog::MappingStatus;
use procurement::errors::RepositoryError;
use procurement::snapshot::{import_stock_snapshot, SnapshotRepository, StockSnapshot};
use procurement::testing::builders::OrderBuilder;
use procurement::types::{ProductId, SupplierId, SupplierSku};
use procurement::OrderStatus;
use procurement_testing::{date, World};
use rust_decimal_macros::dec;

fn ids() -> (ProductId, SupplierId) {
    (
        ProductId::try_new("widget").unwrap(),
        SupplierId::try_new("acme").unwrap(),
    )
}

fn widgets_on(day: u32, quantity: u64) -> OrderBuilder {
    OrderBuilder::new()
        .requested_on(date(2024, 1, day))
        .line("widget", "W-1", quantity, dec!(1.00))
}

async fn stocked_world(available: u64) -> World {
    let world = World::new();
    world.product("widget", None);
    world.mapping("widget", "acme", "W-1", 1, MappingStatus::Confirmed);
    world
        .snapshot("acme", "W-1", date(2024, 1, 1), available)
        .await
        .unwrap();
    world
}

#[tokio::test]
async fn open_order_after_the_snapshot_is_netted() {
    let world = stocked_world(100).await;
    world.submit(widgets_on(2, 30)).await.unwrap();
    let (product, supplier) = ids();

    assert_eq!(world.projector.effective_stock(&product, &supplier).await, 70);
}

#[tokio::test]
async fn orders_counted_by_the_snapshot_are_not_netted_again() {
    let world = stocked_world(100).await;
    world.submit(widgets_on(1, 30)).await.unwrap();
    let (product, supplier) = ids();

    assert_eq!(world.projector.effective_stock(&product, &supplier).await, 100);
}

#[tokio::test]
async fn closed_and_received_orders_are_not_demand() {
    let world = stocked_world(100).await;
    let received = world.activate(widgets_on(3, 20)).await.unwrap();
    world
        .deliver(
            received.id,
            procurement::testing::builders::DeliveryBuilder::new()
                .receive(received.lines[0].id, 20),
        )
        .await
        .unwrap();
    let draft = world
        .service
        .create_order(widgets_on(4, 50).build())
        .await
        .unwrap();
    assert_eq!(draft.status, OrderStatus::Draft);
    world.activate(widgets_on(5, 15)).await.unwrap();
    let (product, supplier) = ids();

    assert_eq!(world.projector.effective_stock(&product, &supplier).await, 85);
}

#[tokio::test]
async fn demand_beyond_stock_floors_at_zero() {
    let world = stocked_world(10).await;
    world.submit(widgets_on(2, 30)).await.unwrap();
    let (product, supplier) = ids();

    assert_eq!(world.projector.effective_stock(&product, &supplier).await, 0);
}

#[tokio::test]
async fn unconfirmed_mapping_fails_closed() {
    let world = World::new();
    world.mapping("widget", "acme", "W-1", 1, MappingStatus::Proposed);
    world
        .snapshot("acme", "W-1", date(2024, 1, 1), 100)
        .await
        .unwrap();
    let (product, supplier) = ids();

    assert_eq!(world.projector.effective_stock(&product, &supplier).await, 0);
}

#[tokio::test]
async fn missing_snapshot_fails_closed() {
    let world = World::new();
    world.mapping("widget", "acme", "W-1", 1, MappingStatus::Confirmed);
    let (product, supplier) = ids();

    assert_eq!(world.projector.effective_stock(&product, &supplier).await, 0);
}

#[tokio::test]
async fn latest_snapshot_wins_and_same_day_ties_go_to_the_last_inserted() {
    let world = stocked_world(100).await;
    world
        .snapshot("acme", "W-1", date(2024, 1, 8), 40)
        .await
        .unwrap();
    world
        .snapshot("acme", "W-1", date(2024, 1, 8), 55)
        .await
        .unwrap();
    let (product, supplier) = ids();

    assert_eq!(world.projector.effective_stock(&product, &supplier).await, 55);
}

#[tokio::test]
async fn refresh_rounds_to_the_order_multiple() {
    let world = World::new();
    world.product("widget", Some(12));
    world.mapping("widget", "acme", "W-1", 6, MappingStatus::Confirmed);
    world
        .snapshot("acme", "W-1", date(2024, 1, 1), 9)
        .await
        .unwrap();
    world.submit(widgets_on(2, 2)).await.unwrap();

    let report = world.projector.refresh_availability().await.unwrap();

    // (9 - 2) packs of 6 is 42 units, 36 of them in whole dozens
    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].available_units, 42);
    assert_eq!(report.updated[0].available_order_qty, 36);

    let (product, supplier) = ids();
    let stored = world
        .projector
        .availability(&product, &supplier)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, report.updated[0]);
}

#[tokio::test]
async fn refresh_keeps_entries_it_cannot_recompute() {
    let world = stocked_world(20).await;
    world.projector.refresh_availability().await.unwrap();
    world.mapping("gadget", "acme", "G-1", 1, MappingStatus::Confirmed);

    let report = world.projector.refresh_availability().await.unwrap();

    assert_eq!(report.updated.len(), 1);
    assert_eq!(
        report.skipped,
        vec![(
            ProductId::try_new("gadget").unwrap(),
            SupplierId::try_new("acme").unwrap(),
            SkipReason::UnknownProduct
        )]
    );
}

#[tokio::test]
async fn reimporting_a_day_replaces_the_earlier_import() {
    let world = stocked_world(100).await;
    let supplier = SupplierId::try_new("acme").unwrap();
    let report = |qty| StockSnapshot {
        supplier_id: supplier.clone(),
        supplier_sku: SupplierSku::try_new("W-1").unwrap(),
        snapshot_date: date(2024, 1, 5),
        available_qty: qty,
    };

    import_stock_snapshot(&*world.snapshots, &supplier, date(2024, 1, 5), vec![report(60)])
        .await
        .unwrap();
    import_stock_snapshot(&*world.snapshots, &supplier, date(2024, 1, 5), vec![report(45)])
        .await
        .unwrap();

    assert_eq!(world.snapshots.all().await.unwrap().len(), 2);
    let (product, _) = ids();
    assert_eq!(world.projector.effective_stock(&product, &supplier).await, 45);
}

#[tokio::test]
async fn import_refuses_snapshots_of_another_day() {
    let world = World::new();
    let supplier = SupplierId::try_new("acme").unwrap();
    let stray = StockSnapshot {
        supplier_id: supplier.clone(),
        supplier_sku: SupplierSku::try_new("W-1").unwrap(),
        snapshot_date: date(2024, 1, 6),
        available_qty: 10,
    };

    let result =
        import_stock_snapshot(&*world.snapshots, &supplier, date(2024, 1, 5), vec![stray])
            .await;

    assert!(matches!(result, Err(RepositoryError::Rejected(_))));
    assert!(world.snapshots.all().await.unwrap().is_empty());
}
