//! Whole-database backup and restore.
//!
//! A backup is a portable JSON document carrying every row of all four
//! tables plus a format version. Restore validates the document against the
//! same refinement rules as live writes, then replaces the entire store in
//! one transaction — a malformed document leaves the database untouched.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::attributes::{attribute_from_row, insert_attribute_row};
use crate::db::cells::{cell_from_row, insert_cell_row};
use crate::db::entities::{entity_from_row, insert_entity_row};
use crate::db::sheets::{insert_sheet_row, sheet_from_row};
use crate::db::{with_txn, Attribute, CellValue, Entity, Sheet, TrackerDb};
use crate::error::TrackerError;
use crate::live::Table;
use crate::validate;

/// Current backup format version.
pub const BACKUP_VERSION: u32 = 1;

/// The backup envelope. Field names are the stable on-disk layout; every
/// top-level key is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub sheets: Vec<Sheet>,
    pub attributes: Vec<Attribute>,
    pub entities: Vec<Entity>,
    pub cell_values: Vec<CellValue>,
}

impl TrackerDb {
    /// Snapshot the entire store into a backup document.
    pub fn create_backup(&self) -> Result<BackupDocument, TrackerError> {
        let doc = {
            let conn = self.shared.conn.lock();
            BackupDocument {
                version: BACKUP_VERSION,
                timestamp: Utc::now(),
                sheets: all_sheets(&conn)?,
                attributes: all_attributes(&conn)?,
                entities: all_entities(&conn)?,
                cell_values: all_cell_values(&conn)?,
            }
        };
        log::info!(
            "created backup: {} sheets, {} attributes, {} entities, {} cell values",
            doc.sheets.len(),
            doc.attributes.len(),
            doc.entities.len(),
            doc.cell_values.len(),
        );
        Ok(doc)
    }

    /// Snapshot the store as pretty-printed JSON — the body of the
    /// downloadable backup file.
    pub fn backup_to_json(&self) -> Result<String, TrackerError> {
        Ok(serde_json::to_string_pretty(&self.create_backup()?)?)
    }

    /// Replace the entire store with the contents of a backup document.
    ///
    /// The document is validated up front; any violation rejects with
    /// `Validation` before a single row is touched. The replace itself —
    /// clear all four tables, bulk-insert all four arrays — is one
    /// transaction, so a failure partway through restores nothing.
    pub fn restore_backup(&self, doc: &BackupDocument) -> Result<(), TrackerError> {
        validate::backup(doc)?;

        {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                conn.execute("DELETE FROM cell_values", [])?;
                conn.execute("DELETE FROM entities", [])?;
                conn.execute("DELETE FROM attributes", [])?;
                conn.execute("DELETE FROM sheets", [])?;

                for sheet in &doc.sheets {
                    insert_sheet_row(conn, sheet)?;
                }
                for attribute in &doc.attributes {
                    insert_attribute_row(conn, attribute)?;
                }
                for entity in &doc.entities {
                    insert_entity_row(conn, entity)?;
                }
                for cell in &doc.cell_values {
                    insert_cell_row(conn, cell)?;
                }
                Ok(())
            })?;
        }

        log::info!(
            "restored backup from {}: {} sheets, {} cell values",
            doc.timestamp.to_rfc3339(),
            doc.sheets.len(),
            doc.cell_values.len(),
        );
        self.publish(&[
            Table::Sheets,
            Table::Attributes,
            Table::Entities,
            Table::CellValues,
        ]);
        Ok(())
    }

    /// Parse and restore a backup file body. A document that fails to parse
    /// (missing keys, wrong discriminants) rejects with `Validation` and
    /// leaves the store untouched.
    pub fn restore_backup_json(&self, json: &str) -> Result<(), TrackerError> {
        let doc: BackupDocument = serde_json::from_str(json)
            .map_err(|e| TrackerError::Validation(format!("invalid backup document: {e}")))?;
        self.restore_backup(&doc)
    }
}

fn all_sheets(conn: &Connection) -> Result<Vec<Sheet>, TrackerError> {
    let mut stmt = conn.prepare("SELECT id, name, created_at, updated_at FROM sheets")?;
    let rows = stmt.query_map([], sheet_from_row)?;
    let mut sheets = Vec::new();
    for row in rows {
        sheets.push(row?);
    }
    Ok(sheets)
}

fn all_attributes(conn: &Connection) -> Result<Vec<Attribute>, TrackerError> {
    let mut stmt = conn.prepare(
        "SELECT id, sheet_id, name, attr_type, currency_value, options, position FROM attributes",
    )?;
    let rows = stmt.query_map([], attribute_from_row)?;
    let mut attributes = Vec::new();
    for row in rows {
        attributes.push(row?);
    }
    Ok(attributes)
}

fn all_entities(conn: &Connection) -> Result<Vec<Entity>, TrackerError> {
    let mut stmt = conn.prepare("SELECT id, sheet_id, name, position FROM entities")?;
    let rows = stmt.query_map([], entity_from_row)?;
    let mut entities = Vec::new();
    for row in rows {
        entities.push(row?);
    }
    Ok(entities)
}

fn all_cell_values(conn: &Connection) -> Result<Vec<CellValue>, TrackerError> {
    let mut stmt = conn.prepare("SELECT id, entity_id, attribute_id, value FROM cell_values")?;
    let rows = stmt.query_map([], cell_from_row)?;
    let mut cells = Vec::new();
    for row in rows {
        cells.push(row?);
    }
    Ok(cells)
}

// =============================================================================
// Tests
// =============================================================================
