//! Server-side unit price lookup.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use common::{ProductId, UnitId};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::Result;

/// Resolves the current price of a product in a given unit.
#[async_trait]
pub trait PriceLookup: Send + Sync {
    /// Returns `None` when the product has no price in that unit.
    async fn unit_price(&self, product_id: ProductId, unit_id: UnitId) -> Result<Option<Decimal>>;
}

/// Fixed price table, for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceCatalog {
    prices: HashMap<(ProductId, UnitId), Decimal>,
}

impl StaticPriceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a price.
    pub fn with_price(
        mut self,
        product_id: impl Into<ProductId>,
        unit_id: impl Into<UnitId>,
        price: Decimal,
    ) -> Self {
        self.prices.insert((product_id.into(), unit_id.into()), price);
        self
    }
}

#[async_trait]
impl PriceLookup for StaticPriceCatalog {
    async fn unit_price(&self, product_id: ProductId, unit_id: UnitId) -> Result<Option<Decimal>> {
        Ok(self.prices.get(&(product_id, unit_id)).copied())
    }
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: Decimal,
}

/// Price lookup backed by the product service.
///
/// Calls `GET {base_url}/api/products/{product}/units/{unit}/price`, which
/// answers `{"price": ...}` or 404 when the pair is unknown.
#[derive(Debug, Clone)]
pub struct HttpPriceLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceLookup {
    /// Creates a lookup with a 5 second request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(5))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PriceLookup for HttpPriceLookup {
    #[tracing::instrument(skip(self))]
    async fn unit_price(&self, product_id: ProductId, unit_id: UnitId) -> Result<Option<Decimal>> {
        let url = format!(
            "{}/api/products/{}/units/{}/price",
            self.base_url, product_id, unit_id
        );

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: PriceResponse = response.error_for_status()?.json().await?;
        Ok(Some(body.price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrderError;
    use axum::{Json, Router, extract::Path, http::StatusCode as HttpStatus, routing::get};
    use serde_json::json;

    async fn price(Path((product, unit)): Path<(i32, i32)>) -> std::result::Result<Json<serde_json::Value>, HttpStatus> {
        match (product, unit) {
            (95, 1) => Ok(Json(json!({ "price": "12.50" }))),
            (96, 1) => Err(HttpStatus::INTERNAL_SERVER_ERROR),
            (97, 1) => {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                Ok(Json(json!({ "price": "1" })))
            }
            _ => Err(HttpStatus::NOT_FOUND),
        }
    }

    async fn spawn_price_service() -> String {
        let app = Router::new().route("/api/products/{product}/units/{unit}/price", get(price));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn static_catalog_returns_known_prices() {
        let catalog = StaticPriceCatalog::new().with_price(1, 2, Decimal::new(1999, 2));

        assert_eq!(
            catalog.unit_price(ProductId::new(1), UnitId::new(2)).await.unwrap(),
            Some(Decimal::new(1999, 2))
        );
        assert_eq!(
            catalog.unit_price(ProductId::new(1), UnitId::new(3)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn http_lookup_reads_price() {
        let lookup = HttpPriceLookup::new(spawn_price_service().await).unwrap();

        let price = lookup.unit_price(ProductId::new(95), UnitId::new(1)).await.unwrap();
        assert_eq!(price, Some(Decimal::new(1250, 2)));
    }

    #[tokio::test]
    async fn http_lookup_maps_not_found_to_none() {
        let lookup = HttpPriceLookup::new(spawn_price_service().await).unwrap();

        let price = lookup.unit_price(ProductId::new(1), UnitId::new(1)).await.unwrap();
        assert_eq!(price, None);
    }

    #[tokio::test]
    async fn http_lookup_server_error_is_transient() {
        let lookup = HttpPriceLookup::new(spawn_price_service().await).unwrap();

        let err = lookup
            .unit_price(ProductId::new(96), UnitId::new(1))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn http_lookup_gives_up_on_a_slow_service() {
        let lookup =
            HttpPriceLookup::with_timeout(spawn_price_service().await, Duration::from_millis(100))
                .unwrap();

        let started = std::time::Instant::now();
        let err = lookup
            .unit_price(ProductId::new(97), UnitId::new(1))
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert!(matches!(&err, OrderError::PriceService(e) if e.is_timeout()));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
