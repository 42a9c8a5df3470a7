use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use procurement::availability::{AvailabilityRepository, ProductAvailability};
use procurement::catalog::{CatalogRepository, MappingStatus, Product, ProductMapping};
use procurement::errors::RepositoryResult;
use procurement::snapshot::{SnapshotRepository, StockSnapshot, StoredSnapshot};
use procurement::types::{ProductId, SupplierId, SupplierSku};
use tracing::debug;

/// In-memory product catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogRepository {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
    mappings: Arc<RwLock<Vec<ProductMapping>>>,
}

impl InMemoryCatalogRepository {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a product.
    pub fn put_product(&self, product: Product) {
        self.products.write().insert(product.id.clone(), product);
    }

    /// Adds a mapping, replacing any with the same product, supplier and SKU.
    pub fn put_mapping(&self, mapping: ProductMapping) {
        let mut mappings = self.mappings.write();
        mappings.retain(|m| {
            m.product_id != mapping.product_id
                || m.supplier_id != mapping.supplier_id
                || m.supplier_sku != mapping.supplier_sku
        });
        mappings.push(mapping);
    }

    /// Changes the review state of a mapping. Returns false if there is no
    /// such mapping.
    pub fn set_mapping_status(
        &self,
        product_id: &ProductId,
        supplier_id: &SupplierId,
        supplier_sku: &SupplierSku,
        status: MappingStatus,
    ) -> bool {
        self.mappings
            .write()
            .iter_mut()
            .find(|m| {
                &m.product_id == product_id
                    && &m.supplier_id == supplier_id
                    && &m.supplier_sku == supplier_sku
            })
            .map(|m| m.status = status)
            .is_some()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn product(&self, product_id: &ProductId) -> RepositoryResult<Option<Product>> {
        Ok(self.products.read().get(product_id).cloned())
    }

    async fn mappings(
        &self,
        product_id: &ProductId,
        supplier_id: &SupplierId,
    ) -> RepositoryResult<Vec<ProductMapping>> {
        Ok(self
            .mappings
            .read()
            .iter()
            .filter(|m| &m.product_id == product_id && &m.supplier_id == supplier_id)
            .cloned()
            .collect())
    }

    async fn confirmed_mappings(&self) -> RepositoryResult<Vec<ProductMapping>> {
        Ok(self
            .mappings
            .read()
            .iter()
            .filter(|m| m.is_confirmed())
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct SnapshotTable {
    next_sequence: u64,
    rows: Vec<StoredSnapshot>,
}

impl SnapshotTable {
    fn store(&mut self, snapshot: StockSnapshot) -> StoredSnapshot {
        self.next_sequence += 1;
        let stored = StoredSnapshot {
            sequence: self.next_sequence,
            snapshot,
        };
        self.rows.push(stored.clone());
        stored
    }
}

/// In-memory snapshot history. Sequence numbers start at 1 and increase
/// with every insertion.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotRepository {
    table: Arc<Mutex<SnapshotTable>>,
}

impl InMemorySnapshotRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn add(&self, snapshot: StockSnapshot) -> RepositoryResult<StoredSnapshot> {
        Ok(self.table.lock().store(snapshot))
    }

    async fn replace_for_date(
        &self,
        supplier_id: &SupplierId,
        snapshot_date: NaiveDate,
        snapshots: Vec<StockSnapshot>,
    ) -> RepositoryResult<Vec<StoredSnapshot>> {
        let mut table = self.table.lock();
        let before = table.rows.len();
        table.rows.retain(|row| {
            &row.snapshot.supplier_id != supplier_id || row.snapshot.snapshot_date != snapshot_date
        });
        debug!(
            supplier_id = %supplier_id,
            date = %snapshot_date,
            replaced = before - table.rows.len(),
            imported = snapshots.len(),
            "Replacing snapshots"
        );
        Ok(snapshots
            .into_iter()
            .map(|snapshot| table.store(snapshot))
            .collect())
    }

    async fn for_sku(
        &self,
        supplier_id: &SupplierId,
        supplier_sku: &SupplierSku,
    ) -> RepositoryResult<Vec<StoredSnapshot>> {
        Ok(self
            .table
            .lock()
            .rows
            .iter()
            .filter(|row| {
                &row.snapshot.supplier_id == supplier_id
                    && &row.snapshot.supplier_sku == supplier_sku
            })
            .cloned()
            .collect())
    }

    async fn all(&self) -> RepositoryResult<Vec<StoredSnapshot>> {
        Ok(self.table.lock().rows.clone())
    }
}

/// In-memory availability table keyed by product and supplier.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAvailabilityRepository {
    entries: Arc<RwLock<BTreeMap<(ProductId, SupplierId), ProductAvailability>>>,
}

impl InMemoryAvailabilityRepository {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AvailabilityRepository for InMemoryAvailabilityRepository {
    async fn upsert_all(&self, entries: Vec<ProductAvailability>) -> RepositoryResult<()> {
        let mut table = self.entries.write();
        for entry in entries {
            table.insert(
                (entry.product_id.clone(), entry.supplier_id.clone()),
                entry,
            );
        }
        Ok(())
    }

    async fn get(
        &self,
        product_id: &ProductId,
        supplier_id: &SupplierId,
    ) -> RepositoryResult<Option<ProductAvailability>> {
        Ok(self
            .entries
            .read()
            .get(&(product_id.clone(), supplier_id.clone()))
            .cloned())
    }

    async fn all(&self) -> RepositoryResult<Vec<ProductAvailability>> {
        Ok(self.entries.read().values().cloned().collect())
    }
}
