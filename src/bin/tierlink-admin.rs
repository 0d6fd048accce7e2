use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tierlink::config::Config;
use tierlink::storage::{StorageManager, COMPRESSION_SETTING};

#[derive(Parser)]
#[command(name = "tierlink-admin")]
#[command(about = "Tierlink storage administration CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Show per-partition counts and storage usage
    Stats,
    /// Write links and settings as JSON (stdout when no file is given)
    Export { file: Option<String> },
    /// Import links and settings from an export file
    Import { file: String },
    /// Move data from legacy flat-store keys into the partitions
    Migrate,
    /// Run a full maintenance pass
    Maintain,
    /// Clear expired cache, trim security logs and recompress links
    Optimize,
    /// Drop security log entries past the retention period
    Prune,
    /// Turn record compression on or off
    Compression { state: Toggle },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage = StorageManager::from_config(&config)?;
    storage.init().await;
    storage.load_settings().await;

    match cli.command {
        Commands::Stats => {
            let stats = storage.get_storage_stats().await;
            println!(
                "Structured store: {}",
                if stats.structured_available { "available" } else { "unavailable (flat only)" }
            );
            println!("Compression:      {}", if stats.compression_enabled { "on" } else { "off" });
            println!("{:<12} {:>10}", "Partition", "Records");
            println!("{}", "-".repeat(23));
            for (partition, count) in &stats.partitions {
                println!("{:<12} {:>10}", partition, count);
            }
            println!("Flat store bytes:   {}", stats.fallback_bytes);
            println!("Memory entries:     {}", stats.memory_entries);
            if let Some(quota) = stats.quota {
                match quota.quota {
                    Some(limit) => println!("Usage:              {} / {} bytes", quota.usage, limit),
                    None => println!("Usage:              {} bytes", quota.usage),
                }
            }
        }
        Commands::Export { file } => {
            let payload = storage.export_all().await;
            let json = serde_json::to_string_pretty(&payload)?;
            match file {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path))?;
                    println!("✓ Exported {} links to {}", payload.urls.len(), path);
                }
                None => println!("{}", json),
            }
        }
        Commands::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file))?;
            let result = storage.import_json(&raw).await;
            println!(
                "✓ Imported {} links and {} settings",
                result.urls_imported, result.settings_imported
            );
            for error in &result.errors {
                println!("⚠ {}", error);
            }
        }
        Commands::Migrate => {
            let migrated = storage.migrate_legacy_data().await;
            println!("✓ Migrated {} legacy entries", migrated);
        }
        Commands::Maintain => {
            let report = storage.perform_maintenance().await;
            println!("✓ Expired cache entries cleared: {}", report.expired_cache_cleared);
            println!("✓ Security log entries pruned:   {}", report.security_logs_pruned);
            if let Some(optimization) = report.optimization {
                println!("✓ Links recompressed:            {}", optimization.recompressed);
            }
        }
        Commands::Optimize => match storage.optimize_storage().await {
            Some(result) => {
                println!("✓ Cache entries cleared: {}", result.cache_cleared);
                println!("✓ Log entries removed:   {}", result.logs_removed);
                println!("✓ Links recompressed:    {}", result.recompressed);
            }
            None => println!("⚠ Optimization failed, see logs"),
        },
        Commands::Prune => {
            let pruned = storage.prune_security_logs().await;
            println!("✓ Pruned {} security log entries", pruned);
        }
        Commands::Compression { state } => {
            let enabled = matches!(state, Toggle::On);
            if storage.save_setting(COMPRESSION_SETTING, enabled).await {
                storage.set_compression_enabled(enabled);
                println!("✓ Compression {}", if enabled { "enabled" } else { "disabled" });
            } else {
                println!("⚠ Failed to save the compression setting");
            }
        }
    }

    storage.destroy().await;
    Ok(())
}
