//! Product catalog and supplier mappings.
//!
//! A product is ordered from a supplier under that supplier's SKU. The
//! mapping between the two carries a pack conversion factor: how many
//! internal units one supplier unit contains. Only confirmed mappings take
//! part in availability.

use crate::errors::RepositoryResult;
use crate::types::{PackConversionFactor, ProductId, SupplierId, SupplierSku};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product identity.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Orders are placed in multiples of this many units. `None` or zero
    /// means any quantity.
    pub default_order_multiple: Option<u32>,
}

impl Product {
    /// The order multiple, treating a missing or zero multiple as 1.
    pub fn order_multiple(&self) -> u64 {
        self.default_order_multiple
            .filter(|multiple| *multiple > 0)
            .map_or(1, u64::from)
    }
}

/// Review state of a product mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingStatus {
    /// Suggested but not reviewed.
    Proposed,
    /// Reviewed and in use.
    Confirmed,
    /// Reviewed and refused.
    Rejected,
}

/// Links a product to a supplier SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMapping {
    /// Internal product.
    pub product_id: ProductId,
    /// Supplier.
    pub supplier_id: SupplierId,
    /// Supplier's SKU for the product.
    pub supplier_sku: SupplierSku,
    /// Review state.
    pub status: MappingStatus,
    /// Internal units per supplier unit.
    pub pack_conversion_factor: PackConversionFactor,
}

impl ProductMapping {
    /// Whether the mapping is in use.
    pub fn is_confirmed(&self) -> bool {
        self.status == MappingStatus::Confirmed
    }
}

/// Storage for products and their supplier mappings.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Loads a product.
    async fn product(&self, product_id: &ProductId) -> RepositoryResult<Option<Product>>;

    /// All mappings of a product to a supplier, in any state.
    async fn mappings(
        &self,
        product_id: &ProductId,
        supplier_id: &SupplierId,
    ) -> RepositoryResult<Vec<ProductMapping>>;

    /// Every confirmed mapping in the catalog.
    async fn confirmed_mappings(&self) -> RepositoryResult<Vec<ProductMapping>>;
}

/// Picks the mapping to use from candidates for one product and supplier.
///
/// The confirmed mapping with the lowest SKU wins, so the choice does not
/// depend on storage order.
pub fn select_confirmed(mappings: &[ProductMapping]) -> Option<&ProductMapping> {
    mappings
        .iter()
        .filter(|mapping| mapping.is_confirmed())
        .min_by(|a, b| a.supplier_sku.cmp(&b.supplier_sku))
}

/// Resolves products to the supplier SKUs they are stocked under.
#[derive(Clone)]
pub struct MappingResolver {
    catalog: Arc<dyn CatalogRepository>,
}

impl std::fmt::Debug for MappingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingResolver").finish_non_exhaustive()
    }
}

impl MappingResolver {
    /// Creates a resolver over `catalog`.
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { catalog }
    }

    /// The confirmed mapping of `product_id` at `supplier_id`, if any.
    pub async fn resolve(
        &self,
        product_id: &ProductId,
        supplier_id: &SupplierId,
    ) -> RepositoryResult<Option<ProductMapping>> {
        let mappings = self.catalog.mappings(product_id, supplier_id).await?;
        Ok(Self::choose(product_id, supplier_id, &mappings).cloned())
    }

    /// Picks among already loaded candidates for one product and supplier,
    /// warning when more than one is confirmed.
    pub fn choose<'a>(
        product_id: &ProductId,
        supplier_id: &SupplierId,
        mappings: &'a [ProductMapping],
    ) -> Option<&'a ProductMapping> {
        let confirmed = mappings.iter().filter(|m| m.is_confirmed()).count();
        if confirmed > 1 {
            warn!(
                product_id = %product_id,
                supplier_id = %supplier_id,
                confirmed,
                "Several confirmed mappings; using the lowest SKU"
            );
        }
        select_confirmed(mappings)
    }

    /// Every confirmed mapping in the catalog.
    pub async fn confirmed_mappings(&self) -> RepositoryResult<Vec<ProductMapping>> {
        self.catalog.confirmed_mappings().await
    }

    /// The product record.
    pub async fn product(&self, product_id: &ProductId) -> RepositoryResult<Option<Product>> {
        self.catalog.product(product_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(sku: &str, status: MappingStatus) -> ProductMapping {
        ProductMapping {
            product_id: ProductId::try_new("widget").unwrap(),
            supplier_id: SupplierId::try_new("acme").unwrap(),
            supplier_sku: SupplierSku::try_new(sku).unwrap(),
            status,
            pack_conversion_factor: PackConversionFactor::default(),
        }
    }

    #[test]
    fn only_confirmed_mappings_are_selected() {
        let mappings = vec![
            mapping("A-1", MappingStatus::Proposed),
            mapping("B-1", MappingStatus::Rejected),
        ];
        assert_eq!(select_confirmed(&mappings), None);
    }

    #[test]
    fn lowest_confirmed_sku_wins() {
        let mappings = vec![
            mapping("C-9", MappingStatus::Confirmed),
            mapping("A-1", MappingStatus::Proposed),
            mapping("B-2", MappingStatus::Confirmed),
        ];
        assert_eq!(
            select_confirmed(&mappings).map(|m| m.supplier_sku.as_ref()),
            Some("B-2")
        );
    }

    struct Mappings(Vec<ProductMapping>);

    #[async_trait]
    impl CatalogRepository for Mappings {
        async fn product(&self, _: &ProductId) -> RepositoryResult<Option<Product>> {
            Ok(None)
        }

        async fn mappings(
            &self,
            _: &ProductId,
            _: &SupplierId,
        ) -> RepositoryResult<Vec<ProductMapping>> {
            Ok(self.0.clone())
        }

        async fn confirmed_mappings(&self) -> RepositoryResult<Vec<ProductMapping>> {
            Ok(self.0.iter().filter(|m| m.is_confirmed()).cloned().collect())
        }
    }

    fn widget_at_acme() -> (ProductId, SupplierId) {
        (
            ProductId::try_new("widget").unwrap(),
            SupplierId::try_new("acme").unwrap(),
        )
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn resolver_warns_when_several_mappings_are_confirmed() {
        let resolver = MappingResolver::new(Arc::new(Mappings(vec![
            mapping("W-2", MappingStatus::Confirmed),
            mapping("W-1", MappingStatus::Confirmed),
        ])));
        let (product, supplier) = widget_at_acme();

        let chosen = resolver.resolve(&product, &supplier).await.unwrap();

        assert_eq!(chosen.as_ref().map(|m| m.supplier_sku.as_ref()), Some("W-1"));
        assert!(logs_contain("Several confirmed mappings"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn resolver_is_quiet_for_a_single_confirmed_mapping() {
        let resolver = MappingResolver::new(Arc::new(Mappings(vec![
            mapping("W-1", MappingStatus::Confirmed),
            mapping("W-2", MappingStatus::Proposed),
        ])));
        let (product, supplier) = widget_at_acme();

        let chosen = resolver.resolve(&product, &supplier).await.unwrap();

        assert_eq!(chosen.as_ref().map(|m| m.supplier_sku.as_ref()), Some("W-1"));
        assert!(!logs_contain("Several confirmed mappings"));
    }

    #[test]
    fn missing_or_zero_multiple_means_one() {
        let mut product = Product {
            id: ProductId::try_new("widget").unwrap(),
            name: "Widget".to_string(),
            default_order_multiple: None,
        };
        assert_eq!(product.order_multiple(), 1);
        product.default_order_multiple = Some(0);
        assert_eq!(product.order_multiple(), 1);
        product.default_order_multiple = Some(12);
        assert_eq!(product.order_multiple(), 12);
    }
}
