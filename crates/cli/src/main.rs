//! Tierlift command line
//!
//! - `tierlift plans` prints the plan catalog
//! - `tierlift upgrade --org <id> --plan <plan>` runs one plan upgrade

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tierlift_billing::{BillingError, BillingService, PlanCatalog, UpgradeRequest};
use tierlift_shared::{PlanType, RequestContext};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tierlift", about = "Organization plan upgrades")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the plan catalog
    Plans,
    /// Upgrade an organization to a new plan
    Upgrade {
        /// Organization id
        #[arg(long)]
        org: Uuid,
        /// Target plan (e.g. enterprise_annually)
        #[arg(long)]
        plan: PlanType,
        /// Base seats on top of the plan allotment
        #[arg(long, default_value_t = 0)]
        seats: u32,
        /// Secrets add-on seats on top of the plan allotment
        #[arg(long, allow_negative_numbers = true)]
        secrets_seats: Option<i32>,
        /// Service accounts on top of the add-on allotment
        #[arg(long, allow_negative_numbers = true)]
        service_accounts: Option<i32>,
        /// User performing the upgrade, recorded on the billing event
        #[arg(long)]
        user: Option<Uuid>,
    },
}

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// JSON printed on stdout for a failed upgrade. The process then exits
/// non-zero without printing the error again.
fn error_body(e: &BillingError) -> serde_json::Value {
    serde_json::json!({
        "kind": e.kind(),
        "status": e.status_code(),
        "message": e.to_string(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Command::Plans => {
            let catalog = PlanCatalog::standard();
            let plans: Vec<_> = catalog.iter().collect();
            println!("{}", serde_json::to_string_pretty(&plans)?);
        }
        Command::Upgrade {
            org,
            plan,
            seats,
            secrets_seats,
            service_accounts,
            user,
        } => {
            let pool = create_db_pool().await?;
            let billing = BillingService::from_env(pool)?;

            let ctx = RequestContext::new(user, Some(org));
            let request = UpgradeRequest {
                plan,
                additional_seats: seats,
                secrets_seats,
                additional_service_accounts: service_accounts,
            };

            match billing.upgrades.upgrade_plan(&ctx, org, request).await {
                Ok(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                }
                Err(e) => {
                    error!(org_id = %org, kind = ?e.kind(), error = %e, "Upgrade failed");
                    println!("{}", serde_json::to_string_pretty(&error_body(&e))?);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
