//! Known available-stock ceilings per product.
//!
//! Ceilings come from the catalog (or from the caller) and expire after a
//! TTL, since stock changes underneath us. An unknown ceiling never
//! constrains a quantity change; the server remains the final judge.

use std::time::Duration;

use cartsync_core::ProductId;
use moka::future::Cache;

/// Maximum number of products with a remembered ceiling.
const MAX_PRODUCTS: u64 = 10_000;

/// TTL cache of available stock per product.
#[derive(Clone)]
pub struct StockCeilings {
    cache: Cache<ProductId, u32>,
}

impl StockCeilings {
    /// Create an empty cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_PRODUCTS)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Remember that `available` units of a product are in stock.
    pub async fn set(&self, product_id: ProductId, available: u32) {
        self.cache.insert(product_id, available).await;
    }

    /// Known ceiling for a product, if any.
    pub async fn get(&self, product_id: ProductId) -> Option<u32> {
        self.cache.get(&product_id).await
    }

    /// Forget a product's ceiling.
    pub async fn forget(&self, product_id: ProductId) {
        self.cache.invalidate(&product_id).await;
    }

    /// Returns the ceiling if `target` exceeds it.
    pub async fn exceeded_by(&self, product_id: ProductId, target: u32) -> Option<u32> {
        self.get(product_id)
            .await
            .filter(|available| target > *available)
    }
}
