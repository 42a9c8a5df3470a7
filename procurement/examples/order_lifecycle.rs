//! Order lifecycle example
//!
//! Walks one order from creation to receipt:
//! - creation and approval
//! - linkage to the external procurement system
//! - a partial delivery, then an over-delivery that raises a variance
//! - variance review
//! - stock availability before and after the order was raised
//!
//! Run with `RUST_LOG=debug` to see the engine's own logging.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use procurement::availability::AvailabilityProjector;
use procurement::catalog::{MappingStatus, Product, ProductMapping};
use procurement::order::{
    ApprovalDecision, CreateOrderInput, DecideApprovalInput, DeliveryDraft, DeliveryLineDraft,
    LineDraft, LinkExternalReferenceInput, OrderHeader, OrderMetadata, RecordDeliveryInput,
    RequestReason, ReviewVarianceInput, VarianceResolution,
};
use procurement::snapshot::{SnapshotRepository, StockSnapshot};
use procurement::types::{
    ActorName, DeliveryId, OrderId, PackConversionFactor, ProductId, SiteId, SupplierId,
    SupplierSku,
};
use procurement::{EngineConfig, OrderService};
use procurement_memory::{
    InMemoryAvailabilityRepository, InMemoryCatalogRepository, InMemoryEventStore,
    InMemorySnapshotRepository,
};
use rust_decimal_macros::dec;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn date(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).context("invalid date")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let service = Arc::new(OrderService::from_config(
        InMemoryEventStore::new(),
        &EngineConfig::default(),
    ));

    let widget = ProductId::try_new("widget")?;
    let acme = SupplierId::try_new("acme")?;
    let sku = SupplierSku::try_new("ACME-W-12")?;
    let requester = ActorName::try_new("Riley Requester")?;
    let approver = ActorName::try_new("Morgan Manager")?;
    let dock = ActorName::try_new("Dock Two")?;

    // Catalog: widgets come from acme in packs of 12, ordered in dozens.
    let catalog = Arc::new(InMemoryCatalogRepository::new());
    catalog.put_product(Product {
        id: widget.clone(),
        name: "Widget".to_string(),
        default_order_multiple: Some(12),
    });
    catalog.put_mapping(ProductMapping {
        product_id: widget.clone(),
        supplier_id: acme.clone(),
        supplier_sku: sku.clone(),
        status: MappingStatus::Confirmed,
        pack_conversion_factor: PackConversionFactor::try_new(12)?,
    });

    let snapshots = Arc::new(InMemorySnapshotRepository::new());
    snapshots
        .add(StockSnapshot {
            supplier_id: acme.clone(),
            supplier_sku: sku.clone(),
            snapshot_date: date(2024, 3, 1)?,
            available_qty: 100,
        })
        .await?;

    let projector = AvailabilityProjector::new(
        Arc::clone(&service),
        catalog,
        snapshots,
        Arc::new(InMemoryAvailabilityRepository::new()),
    );
    let stock = projector.effective_stock(&widget, &acme).await;
    info!(stock, "Effective stock before ordering");

    // Create and submit the order.
    let line = LineDraft::new(widget.clone(), sku.clone(), 30, dec!(4.75));
    let line_id = line.id;
    let order = service
        .create_order(CreateOrderInput::new(
            OrderId::generate(),
            OrderHeader {
                requester,
                site: SiteId::try_new("north-depot")?,
                supplier_id: acme.clone(),
                request_date: date(2024, 3, 4)?,
                metadata: OrderMetadata {
                    customer_name: Some("Harbour Cafe".to_string()),
                    reason: RequestReason::NewCustomer,
                    comments: None,
                },
            },
            vec![line],
            true,
        )?)
        .await?;
    info!(display_id = %order.display_id, total = %order.total_amount(), status = %order.status, "Order submitted");

    service
        .decide_approval(DecideApprovalInput {
            order_id: order.id,
            decision: ApprovalDecision::Approve,
            actor: approver.clone(),
            comments: Some("Within budget".to_string()),
        })
        .await?;
    let order = service
        .link_external_reference(LinkExternalReferenceInput::new(
            order.id,
            "CX-88213",
            approver.clone(),
        )?)
        .await?;
    info!(status = %order.status, "Order linked");

    let stock = projector.effective_stock(&widget, &acme).await;
    info!(stock, "Effective stock once the order is open");

    // First delivery: 20 of 30.
    let receipt = service
        .record_delivery(RecordDeliveryInput::new(
            order.id,
            DeliveryDraft {
                id: DeliveryId::generate(),
                date: date(2024, 3, 8)?,
                docket_reference: "DKT-5521".to_string(),
                received_by: dock.clone(),
                lines: vec![DeliveryLineDraft::new(line_id, 20)],
                force_close: vec![],
            },
        )?)
        .await?;
    info!(status = %receipt.order.status, "First delivery");

    // Second delivery: 15 more, five too many.
    let receipt = service
        .record_delivery(RecordDeliveryInput::new(
            order.id,
            DeliveryDraft {
                id: DeliveryId::generate(),
                date: date(2024, 3, 12)?,
                docket_reference: "DKT-5590".to_string(),
                received_by: dock,
                lines: vec![DeliveryLineDraft::new(line_id, 15)],
                force_close: vec![],
            },
        )?)
        .await?;
    for variance in &receipt.variances {
        info!(kind = %variance.kind, ordered = variance.ordered, received = variance.received, "Variance raised");
    }

    let order = service
        .review_variance(ReviewVarianceInput {
            order_id: order.id,
            resolution: VarianceResolution::Accept,
            actor: approver,
            comments: Some("Keep the extras".to_string()),
        })
        .await?;
    info!(status = %order.status, approvals = order.approvals.len(), "Variance accepted");

    let report = projector.refresh_availability().await?;
    for entry in report.updated {
        info!(
            product = %entry.product_id,
            units = entry.available_units,
            orderable = entry.available_order_qty,
            "Availability"
        );
    }

    Ok(())
}
