//! Offline-first data layer for a row/column tracking tool.
//!
//! The crate persists four entity kinds — [`Sheet`], [`Attribute`] (typed
//! column), [`Entity`] (row), and [`CellValue`] — in a local SQLite database
//! and exposes the operation surface the surrounding UI calls into:
//!
//! - [`TrackerDb`]: cascading CRUD with per-sheet `updated_at` tracking
//! - [`live`]: table-scoped observers that re-deliver query results after
//!   every committed write ([`TrackerDb::watch`])
//! - [`CellEditor`]: per-row optimistic edit overlay with rollback
//! - [`summary`]: per-column aggregation recomputed from scratch on demand
//! - [`backup`]: versioned whole-database backup and atomic restore
//! - [`export`]: CSV rendering of a single sheet
//!
//! All fallible operations return [`TrackerError`]; no operation leaves the
//! store partially written.

pub mod backup;
pub mod db;
pub mod editor;
pub mod error;
pub mod export;
pub mod live;
pub mod summary;
pub mod validate;

pub use backup::{BackupDocument, BACKUP_VERSION};
pub use db::{
    Attribute, AttributeType, AttributeUpdate, CellData, CellValue, Entity, Sheet, TrackerDb,
};
pub use editor::CellEditor;
pub use error::TrackerError;
pub use live::{LiveQuery, Subscription, Table};
pub use summary::{summarize, SheetSummary, SummaryItem};
