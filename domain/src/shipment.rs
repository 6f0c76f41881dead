use crate::error::Error;
use crate::Id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::*;
use serde::{Deserialize, Serialize};
use sse::{DataSource, Identifiable, RequestContext};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Stream key browsers subscribe to for live shipment updates.
pub const SHIPMENTS_STREAM: &str = "shipments-live";

/// Number of most recently updated shipments returned per fetch.
const RECENT_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    #[default]
    New,
    InTransit,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Shipment {
    #[schema(value_type = uuid::Uuid)]
    pub id: Id,
    pub organization_id: String,
    pub business_unit_id: String,
    pub pro_number: String,
    pub status: ShipmentStatus,
    pub origin: String,
    pub destination: String,
    pub updated_at: DateTime<Utc>,
}

impl Identifiable for Shipment {
    fn identifier(&self) -> Option<String> {
        Some(self.id.to_string())
    }
}

/// Request body for creating or updating a shipment. Supplying the `id` of an
/// existing shipment updates it in place.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewShipment {
    #[schema(value_type = Option<uuid::Uuid>)]
    pub id: Option<Id>,
    pub pro_number: String,
    #[serde(default)]
    pub status: ShipmentStatus,
    pub origin: String,
    pub destination: String,
}

type TenantKey = (String, String);

/// In-memory shipment store partitioned by organization and business unit.
#[derive(Debug, Default)]
pub struct ShipmentBoard {
    tenants: DashMap<TenantKey, HashMap<Id, Shipment>>,
}

impl ShipmentBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates a shipment for the caller's tenant and stamps its
    /// `updated_at`.
    pub fn upsert(&self, request_ctx: &RequestContext, params: NewShipment) -> Result<Shipment, Error> {
        if params.pro_number.trim().is_empty() {
            return Err(Error::invalid("pro_number must not be empty"));
        }

        let mut shipments = self.tenants.entry(tenant_key(request_ctx)).or_default();
        let id = params.id.unwrap_or_else(Id::new_v4);
        let shipment = Shipment {
            id,
            organization_id: request_ctx.org_id.clone(),
            business_unit_id: request_ctx.bu_id.clone(),
            pro_number: params.pro_number,
            status: params.status,
            origin: params.origin,
            destination: params.destination,
            updated_at: Utc::now(),
        };

        if shipments.insert(id, shipment.clone()).is_some() {
            debug!("Updated shipment {id}");
        } else {
            debug!("Created shipment {id}");
        }
        Ok(shipment)
    }

    pub fn find(&self, request_ctx: &RequestContext, id: Id) -> Result<Shipment, Error> {
        self.tenants
            .get(&tenant_key(request_ctx))
            .and_then(|shipments| shipments.get(&id).cloned())
            .ok_or_else(Error::not_found)
    }

    /// The tenant's most recently updated shipments, newest first.
    pub fn recent(&self, request_ctx: &RequestContext) -> Vec<Shipment> {
        let Some(shipments) = self.tenants.get(&tenant_key(request_ctx)) else {
            return Vec::new();
        };
        let mut recent: Vec<Shipment> = shipments.values().cloned().collect();
        recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        recent.truncate(RECENT_LIMIT);
        recent
    }
}

fn tenant_key(request_ctx: &RequestContext) -> TenantKey {
    (request_ctx.org_id.clone(), request_ctx.bu_id.clone())
}

#[async_trait]
impl DataSource for ShipmentBoard {
    type Item = Shipment;

    async fn fetch(&self, request_ctx: &RequestContext) -> Result<Vec<Shipment>, sse::Error> {
        Ok(self.recent(request_ctx))
    }

    fn timestamp_of(&self, shipment: &Shipment) -> i64 {
        shipment.updated_at.timestamp()
    }
}
