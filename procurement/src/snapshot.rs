//! Supplier stock snapshots.
//!
//! A snapshot is a supplier's reported inventory of one SKU on one day.
//! Snapshots are kept as history; the latest one per SKU is the one that
//! counts. Each stored snapshot carries a sequence number assigned at
//! insertion, which breaks ties between snapshots of the same day.

use crate::errors::{RepositoryError, RepositoryResult};
use crate::types::{SupplierId, SupplierSku};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, instrument};

/// A supplier's stock report for one SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    /// Reporting supplier.
    pub supplier_id: SupplierId,
    /// SKU reported.
    pub supplier_sku: SupplierSku,
    /// Day the count was taken.
    pub snapshot_date: NaiveDate,
    /// Units available, in supplier units.
    pub available_qty: u64,
}

/// A snapshot as held by a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    /// Insertion order, unique within the repository.
    pub sequence: u64,
    /// The report.
    pub snapshot: StockSnapshot,
}

impl StoredSnapshot {
    fn recency(&self) -> (NaiveDate, u64) {
        (self.snapshot.snapshot_date, self.sequence)
    }
}

/// Storage for stock snapshots.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Stores one snapshot.
    async fn add(&self, snapshot: StockSnapshot) -> RepositoryResult<StoredSnapshot>;

    /// Replaces every snapshot of `supplier_id` dated `snapshot_date` with
    /// `snapshots`, atomically. Used by bulk imports so re-importing a file
    /// does not duplicate it.
    async fn replace_for_date(
        &self,
        supplier_id: &SupplierId,
        snapshot_date: NaiveDate,
        snapshots: Vec<StockSnapshot>,
    ) -> RepositoryResult<Vec<StoredSnapshot>>;

    /// Every snapshot of one SKU.
    async fn for_sku(
        &self,
        supplier_id: &SupplierId,
        supplier_sku: &SupplierSku,
    ) -> RepositoryResult<Vec<StoredSnapshot>>;

    /// Every snapshot held.
    async fn all(&self) -> RepositoryResult<Vec<StoredSnapshot>>;

    /// The latest snapshot of one SKU.
    async fn latest(
        &self,
        supplier_id: &SupplierId,
        supplier_sku: &SupplierSku,
    ) -> RepositoryResult<Option<StoredSnapshot>> {
        let snapshots = self.for_sku(supplier_id, supplier_sku).await?;
        Ok(latest(&snapshots).cloned())
    }
}

/// Imports one supplier's report for one day, replacing any earlier import
/// of the same day.
///
/// Every snapshot must belong to `supplier_id` and `snapshot_date`; if one
/// does not, nothing is stored.
#[instrument(skip(repository, snapshots), fields(count = snapshots.len()))]
pub async fn import_stock_snapshot(
    repository: &dyn SnapshotRepository,
    supplier_id: &SupplierId,
    snapshot_date: NaiveDate,
    snapshots: Vec<StockSnapshot>,
) -> RepositoryResult<Vec<StoredSnapshot>> {
    if let Some(stray) = snapshots
        .iter()
        .find(|s| &s.supplier_id != supplier_id || s.snapshot_date != snapshot_date)
    {
        return Err(RepositoryError::Rejected(format!(
            "snapshot of {} for {} on {} does not belong to the {} import of {}",
            stray.supplier_sku, stray.supplier_id, stray.snapshot_date, supplier_id, snapshot_date
        )));
    }

    let stored = repository
        .replace_for_date(supplier_id, snapshot_date, snapshots)
        .await?;
    info!(imported = stored.len(), "Stock snapshot imported");
    Ok(stored)
}

/// The most recent snapshot: latest date, then highest sequence.
pub fn latest(snapshots: &[StoredSnapshot]) -> Option<&StoredSnapshot> {
    snapshots.iter().max_by_key(|stored| stored.recency())
}

/// The most recent snapshot of every SKU present in `snapshots`.
pub fn latest_per_sku(
    snapshots: Vec<StoredSnapshot>,
) -> HashMap<(SupplierId, SupplierSku), StoredSnapshot> {
    let mut latest: HashMap<(SupplierId, SupplierSku), StoredSnapshot> = HashMap::new();
    for stored in snapshots {
        let key = (
            stored.snapshot.supplier_id.clone(),
            stored.snapshot.supplier_sku.clone(),
        );
        match latest.get(&key) {
            Some(current) if current.recency() >= stored.recency() => {}
            _ => {
                latest.insert(key, stored);
            }
        }
    }
    latest
}
