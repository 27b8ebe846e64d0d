//! Pricing catalog: spreadsheet source, durable store, in-memory snapshot
//! cache and the scheduler that keeps them in step.

pub mod cache;
pub mod models;
pub mod parse;
pub mod source;
pub mod store;
pub mod sync;

pub use cache::{CatalogCache, CatalogStats};
pub use models::{
    Branch, CatalogSnapshot, DeliveryTier, ExtraItem, MonthDay, PricingMode, ProductRate,
    SeasonalRule, SyncReport, TableReport, TierError,
};
pub use source::{CatalogSource, CatalogTable, SheetTable, SheetsCatalogSource, SourceError};
pub use store::{CatalogStore, MemoryCatalogStore, PgCatalogStore, StoreError};
pub use sync::{CatalogSheets, CatalogSync, SyncError, SyncPolicy, SyncStatus};
