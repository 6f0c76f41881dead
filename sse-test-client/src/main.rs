use anyhow::Result;
use clap::Parser;
use colored::*;

mod api_client;
mod output;
mod scenarios;
mod sse_client;
mod tenant;

use api_client::ApiClient;
use output::print_test_summary;
use sse_client::Connection;
use tenant::Tenant;

#[derive(Parser)]
#[command(name = "sse-test-client")]
#[command(about = "Live stream integration testing tool")]
struct Cli {
    /// Base URL of the backend (e.g., http://localhost:4000)
    #[arg(long)]
    base_url: String,

    /// User id sent in the x-user-id header
    #[arg(long, default_value = "usr_sse_test")]
    user: String,

    /// Organization of the first tenant
    #[arg(long, default_value = "org_sse_test_1")]
    org1: String,

    /// Organization of the second tenant
    #[arg(long, default_value = "org_sse_test_2")]
    org2: String,

    /// Business unit shared by both tenants
    #[arg(long, default_value = "bu_sse_test")]
    bu: String,

    /// The server's per-user connection cap
    #[arg(long, default_value_t = 5)]
    max_per_user: usize,

    /// Test scenario to run
    #[arg(long, value_enum)]
    scenario: ScenarioChoice,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone)]
enum ScenarioChoice {
    /// Test basic stream connection for two tenants
    ConnectionTest,
    /// Test that a created shipment reaches only its own tenant's stream
    ShipmentPush,
    /// Test the per-user connection cap
    UserCapTest,
    /// Run all tests
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }

    println!("{}", "=== SETUP PHASE ===".bright_white().bold());

    // Two tenants, each with its own user so the per-user cap is not shared
    let tenant1 = Tenant::new(&format!("{}_1", cli.user), &cli.org1, &cli.bu);
    let tenant2 = Tenant::new(&format!("{}_2", cli.user), &cli.org2, &cli.bu);
    let cap_tenant = Tenant::new(&format!("{}_cap", cli.user), &cli.org1, &cli.bu);

    let client = reqwest::Client::new();
    let api_client = ApiClient::new(client, cli.base_url.clone());

    let needs_streams = !matches!(cli.scenario, ScenarioChoice::UserCapTest);
    let mut streams = None;
    if needs_streams {
        println!("{} Establishing live streams...", "→".blue());
        let first = Connection::establish(
            &cli.base_url,
            &tenant1,
            format!("Tenant 1 ({})", tenant1.org_id),
        )
        .await?;
        let second = Connection::establish(
            &cli.base_url,
            &tenant2,
            format!("Tenant 2 ({})", tenant2.org_id),
        )
        .await?;
        println!("{} Live streams requested", "✓".green());
        streams = Some((first, second));
    }

    println!("\n{}", "=== TEST PHASE ===".bright_white().bold());

    let mut results = Vec::new();

    if let Some((first, second)) = streams.as_mut() {
        if matches!(
            cli.scenario,
            ScenarioChoice::ConnectionTest | ScenarioChoice::All
        ) {
            results.push(scenarios::test_connection(first, second).await?);
        }
        if matches!(
            cli.scenario,
            ScenarioChoice::ShipmentPush | ScenarioChoice::All
        ) {
            results.push(scenarios::test_shipment_push(&tenant1, &api_client, first, second).await?);
        }
    }

    if matches!(
        cli.scenario,
        ScenarioChoice::UserCapTest | ScenarioChoice::All
    ) {
        results.push(scenarios::test_user_cap(&cap_tenant, &api_client, cli.max_per_user).await?);
    }

    // Print summary
    println!("\n{}", "=== RESULTS ===".bright_white().bold());
    print_test_summary(&results);

    let all_passed = results.iter().all(|r| r.passed);

    if all_passed {
        println!("\n{}", "All tests passed! ✓".bright_green().bold());
    } else {
        println!("\n{}", "Some tests failed! ✗".bright_red().bold());
    }

    std::process::exit(if all_passed { 0 } else { 1 });
}
