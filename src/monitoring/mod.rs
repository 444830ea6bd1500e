pub mod change_detector;
pub mod cycle;
pub mod database;
pub mod hot_products;
pub mod listing;
pub mod notifier;
pub mod reporter;
pub mod store;

pub use change_detector::{detect_changes, ChangeCounts, DiffSummary, PercentChange};
pub use cycle::{CollaboratorFailure, CycleReport, CycleStage, MonitoringCycle};
pub use database::SnapshotDatabase;
pub use hot_products::{HotProduct, HotProductsDigest, HotProductsReport};
pub use listing::{ListingRecord, Snapshot, StoredSnapshot};
pub use notifier::{DeliveryReceipt, EmailRelayNotifier, LogNotifier, Notifier};
pub use reporter::{HistoricalStats, MonitorReporter, MonitoringStats};
pub use store::{HistoryEntry, MonitorMeta, SnapshotStore};
