use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tierlink::config::Config;
use tierlink::links::{AbTestRequest, ClickContext, LinkService, ResolveError, ShortenRequest};
use tierlink::models::{LinkStatus, Variant};
use tierlink::storage::{MaintenanceScheduler, StorageManager};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tierlink")]
#[command(about = "Shorten and open links backed by tiered storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a short link
    Shorten {
        url: String,
        /// Custom alias instead of a generated code
        #[arg(long)]
        alias: Option<String>,
        /// Expire the link after this many hours
        #[arg(long)]
        expires_in_hours: Option<i64>,
        /// Require a password to open the link
        #[arg(long)]
        password: Option<String>,
        /// Do not record clicks
        #[arg(long)]
        no_tracking: bool,
        /// Alternative destination for an A/B test
        #[arg(long)]
        ab_url: Option<String>,
        /// Percentage of visitors sent to the alternative
        #[arg(long, default_value_t = 50)]
        ab_split: u8,
        /// Conversion goal names
        #[arg(long = "goal")]
        goals: Vec<String>,
    },
    /// Resolve a short code as a redirect would, recording the click
    Open {
        code: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        referrer: Option<String>,
        #[arg(long)]
        visitor: Option<String>,
    },
    /// List all links, newest first
    List,
    /// Delete a link and its analytics
    Delete { code: String },
    /// Record a conversion
    Convert {
        code: String,
        #[arg(long)]
        goal: Option<String>,
        /// A/B variant the conversion belongs to (a or b)
        #[arg(long)]
        variant: Option<String>,
    },
    /// Run periodic maintenance until interrupted
    Watch {
        /// Interval in seconds, defaults to MAINTENANCE_INTERVAL_SECS
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage = Arc::new(StorageManager::from_config(&config)?);
    storage.init().await;
    storage.load_settings().await;

    let migrated = storage.migrate_legacy_data().await;
    if migrated > 0 {
        info!("Migrated {} legacy entries", migrated);
    }

    let service = LinkService::new(Arc::clone(&storage), &config.links);

    match cli.command {
        Commands::Shorten {
            url,
            alias,
            expires_in_hours,
            password,
            no_tracking,
            ab_url,
            ab_split,
            goals,
        } => {
            let expires_at = expires_in_hours
                .map(|h| tierlink::models::now_millis() + h.saturating_mul(3_600_000));
            let request = ShortenRequest {
                url,
                custom_alias: alias,
                expires_at,
                password,
                track_clicks: !no_tracking,
                ab_test: ab_url.map(|alternative_url| AbTestRequest {
                    alternative_url,
                    split: ab_split,
                }),
                conversion_goals: goals,
            };
            let record = service.shorten(request).await?;
            println!("✓ {} -> {}", record.short_code, record.original_url);
            if let Some(alias) = &record.custom_alias {
                println!("  alias: {}", alias);
            }
        }
        Commands::Open {
            code,
            password,
            referrer,
            visitor,
        } => {
            let context = ClickContext {
                user_agent: Some(format!("tierlink-cli/{}", env!("CARGO_PKG_VERSION"))),
                referrer,
                visitor_id: visitor,
            };
            match service.resolve(&code, password.as_deref(), &context).await {
                Ok(resolution) => println!("{}", resolution.target),
                Err(ResolveError::PasswordRequired) => {
                    bail!("'{}' is password protected, pass --password", code)
                }
                Err(e) => bail!("cannot open '{}': {}", code, e),
            }
        }
        Commands::List => {
            let links = service.list().await;
            if links.is_empty() {
                println!("No links found.");
            } else {
                println!("{:<12} {:<9} {:>7}  {}", "Code", "Status", "Clicks", "URL");
                println!("{}", "-".repeat(80));
                for (url, status) in links {
                    let status = match status {
                        LinkStatus::Active => "active",
                        LinkStatus::Expired => "expired",
                        LinkStatus::Inactive => "inactive",
                    };
                    println!(
                        "{:<12} {:<9} {:>7}  {}",
                        url.custom_alias.as_deref().unwrap_or(&url.short_code),
                        status,
                        url.clicks,
                        url.original_url
                    );
                }
            }
        }
        Commands::Delete { code } => {
            if service.delete(&code).await {
                println!("✓ Deleted '{}'", code);
            } else {
                println!("⚠ No link '{}' found", code);
            }
        }
        Commands::Convert {
            code,
            goal,
            variant,
        } => {
            let variant = match variant.as_deref() {
                None => None,
                Some("a") | Some("A") => Some(Variant::A),
                Some("b") | Some("B") => Some(Variant::B),
                Some(other) => bail!("unknown variant '{}', expected a or b", other),
            };
            let total = service
                .record_conversion(&code, goal.as_deref(), variant)
                .await
                .map_err(|e| anyhow::anyhow!("cannot record conversion for '{}': {}", code, e))?;
            println!("✓ '{}' now has {} conversions", code, total);
        }
        Commands::Watch { interval } => {
            let interval = interval.unwrap_or(config.storage.maintenance_interval_secs).max(1);
            info!("Running maintenance every {}s, press Ctrl-C to stop", interval);
            let scheduler =
                MaintenanceScheduler::start(Arc::clone(&storage), Duration::from_secs(interval));
            tokio::signal::ctrl_c().await?;
            let runs = scheduler.shutdown().await;
            info!("Maintenance ran {} times", runs);
        }
    }

    storage.destroy().await;
    Ok(())
}
