use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};

use crate::tenant::Tenant;

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Upserts a shipment and returns the stored record.
    pub async fn create_shipment(&self, tenant: &Tenant, pro_number: &str) -> Result<Value> {
        let url = format!("{}/shipments", self.base_url);

        let response = tenant
            .apply(self.client.post(&url))
            .json(&json!({
                "pro_number": pro_number,
                "origin": "Chicago, IL",
                "destination": "Dallas, TX",
            }))
            .send()
            .await
            .context("Failed to create shipment")?;

        let body = Self::expect_success(response, "create shipment").await?;
        Ok(body["data"].clone())
    }

    /// Connected client counts for the live shipments stream.
    pub async fn active_connections(&self, tenant: &Tenant) -> Result<Value> {
        let url = format!("{}/streams/shipments-live/active", self.base_url);

        let response = tenant
            .apply(self.client.get(&url))
            .send()
            .await
            .context("Failed to read active connections")?;

        let body = Self::expect_success(response, "read active connections").await?;
        Ok(body["data"].clone())
    }

    /// Opens a raw live stream request and returns it without reading the body,
    /// so the connection stays open for as long as the response is held.
    pub async fn open_stream(&self, tenant: &Tenant) -> Result<Response> {
        let url = format!("{}/shipments/live", self.base_url);

        tenant
            .apply(self.client.get(&url))
            .send()
            .await
            .context("Failed to open live stream")
    }

    async fn expect_success(response: Response, action: &str) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            anyhow::bail!("Failed to {}: {} - Response: {}", action, status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {action} response"))
    }
}

pub fn is_rate_limited(response: &Response) -> bool {
    response.status() == StatusCode::TOO_MANY_REQUESTS
}
