use anyhow::Result;
use colored::*;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::api_client::{is_rate_limited, ApiClient};
use crate::output::TestResult;
use crate::sse_client::Connection;
use crate::tenant::Tenant;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Both tenants receive the `connected` event on their own stream.
pub async fn test_connection(first: &mut Connection, second: &mut Connection) -> Result<TestResult> {
    let name = "connection_test";
    let started = Instant::now();
    println!("{} Waiting for connected events...", "→".blue());

    for connection in [first, second] {
        if let Err(e) = connection.wait_for_event("connected", EVENT_TIMEOUT).await {
            return Ok(TestResult::fail(
                name,
                format!("{}: {}", connection.label, e),
                started.elapsed(),
            ));
        }
        println!("{} {} connected", "✓".green(), connection.label);
    }

    Ok(TestResult::pass(name, started.elapsed()))
}

/// A shipment created by one tenant reaches that tenant's stream as a
/// `new-entry` event and never reaches the other tenant's stream.
pub async fn test_shipment_push(
    tenant: &Tenant,
    api_client: &ApiClient,
    own: &mut Connection,
    other: &mut Connection,
) -> Result<TestResult> {
    let name = "shipment_push";
    let started = Instant::now();
    let pro_number = format!("PRO-{}", Uuid::new_v4().simple());

    // A shipment created before the stream is registered is only picked up
    // if it is newer than the stream's watermark
    if !wait_until_connected(tenant, api_client).await? {
        return Ok(TestResult::fail(
            name,
            format!("{} never registered with the server", own.label),
            started.elapsed(),
        ));
    }

    println!("{} Creating shipment {}...", "→".blue(), pro_number);
    let shipment = api_client.create_shipment(tenant, &pro_number).await?;
    let shipment_id = shipment["id"].clone();

    let is_ours = |data: &serde_json::Value| data["id"] == shipment_id;
    match own.wait_for("new-entry", EVENT_TIMEOUT, is_ours).await {
        Ok(event) => println!(
            "{} {} received the shipment after {} ms",
            "✓".green(),
            own.label,
            event.timestamp.duration_since(started).as_millis()
        ),
        Err(e) => return Ok(TestResult::fail(name, e.to_string(), started.elapsed())),
    }

    // The other tenant keeps getting heartbeats but never this shipment
    if other
        .wait_for("new-entry", Duration::from_secs(3), is_ours)
        .await
        .is_ok()
    {
        return Ok(TestResult::fail(
            name,
            format!("{} received another tenant's shipment", other.label),
            started.elapsed(),
        ));
    }
    println!("{} {} did not see the shipment", "✓".green(), other.label);

    Ok(TestResult::pass(name, started.elapsed()))
}

/// Opens `max_per_user` streams for one user and expects the next one to be
/// rejected with 429.
pub async fn test_user_cap(
    tenant: &Tenant,
    api_client: &ApiClient,
    max_per_user: usize,
) -> Result<TestResult> {
    let name = "user_cap_test";
    let started = Instant::now();
    println!(
        "{} Opening {} streams for {}...",
        "→".blue(),
        max_per_user,
        tenant.user_id
    );

    let mut open = Vec::with_capacity(max_per_user);
    for i in 0..max_per_user {
        let response = api_client.open_stream(tenant).await?;
        if !response.status().is_success() {
            return Ok(TestResult::fail(
                name,
                format!("stream {} rejected early with {}", i + 1, response.status()),
                started.elapsed(),
            ));
        }
        open.push(response);
    }

    let extra = api_client.open_stream(tenant).await?;
    if !is_rate_limited(&extra) {
        return Ok(TestResult::fail(
            name,
            format!("expected 429, got {}", extra.status()),
            started.elapsed(),
        ));
    }
    println!("{} Stream {} rejected with 429", "✓".green(), max_per_user + 1);

    let active = api_client.active_connections(tenant).await?;
    println!(
        "{} Server reports {} active client(s) for this tenant",
        "✓".green(),
        active["active_clients"]
    );

    drop(open);
    Ok(TestResult::pass(name, started.elapsed()))
}

async fn wait_until_connected(tenant: &Tenant, api_client: &ApiClient) -> Result<bool> {
    for _ in 0..50 {
        let active = api_client.active_connections(tenant).await?;
        if active["active_clients"].as_u64().unwrap_or(0) > 0 {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Ok(false)
}
