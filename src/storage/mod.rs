pub mod cached;
pub mod compression;
pub mod flat;
pub mod maintenance;
pub mod manager;
pub mod migration;
pub mod quota;
pub mod scheduler;
pub mod sqlite;
pub mod trait_def;
pub mod transfer;

pub use cached::MemoryTier;
pub use compression::Codec;
pub use flat::{open_flat_store, FileFlatStore, FlatStore, FlatTier, MemoryFlatStore};
pub use maintenance::{MaintenanceReport, OptimizeResult, StorageStats};
pub use manager::{StorageManager, COMPRESSION_SETTING};
pub use migration::{LegacyTarget, LEGACY_KEYS};
pub use quota::{DataDirQuota, NoQuota, QuotaEstimate, QuotaEstimator};
pub use scheduler::MaintenanceScheduler;
pub use sqlite::SqliteStore;
pub use trait_def::{Partition, StorageError, StorageResult, Tier};
pub use transfer::{ExportMetadata, ExportPayload, ImportResult, EXPORT_VERSION};
