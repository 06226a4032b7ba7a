use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{datetime_col, touch_sheet, uuid_col, with_txn, Sheet, TrackerDb};
use crate::db::attributes::insert_attribute_row;
use crate::db::{Attribute, AttributeType};
use crate::error::TrackerError;
use crate::live::Table;
use crate::validate;

/// Name of the boolean attribute every new sheet starts with.
pub const DEFAULT_ATTRIBUTE_NAME: &str = "Attendance";

impl TrackerDb {
    // =========================================================================
    // Sheets
    // =========================================================================

    /// Create a new tracking sheet with its default attendance attribute.
    /// Sheet and attribute are written as one atomic unit.
    pub fn create_sheet(&self, name: &str) -> Result<Sheet, TrackerError> {
        validate::sheet_name(name)?;

        let now = Utc::now();
        let sheet = Sheet {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        let default_attribute = Attribute {
            id: Uuid::new_v4(),
            sheet_id: sheet.id,
            name: DEFAULT_ATTRIBUTE_NAME.to_string(),
            kind: AttributeType::Boolean,
            currency_value: None,
            options: None,
            position: 0,
        };

        {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                insert_sheet_row(conn, &sheet)?;
                insert_attribute_row(conn, &default_attribute)?;
                Ok(())
            })?;
        }

        log::info!("created sheet {} ({})", sheet.name, sheet.id);
        self.publish(&[Table::Sheets, Table::Attributes]);
        Ok(sheet)
    }

    /// Fetch a single sheet by id.
    pub fn get_sheet(&self, sheet_id: Uuid) -> Result<Option<Sheet>, TrackerError> {
        let conn = self.shared.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, updated_at FROM sheets WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![sheet_id.to_string()], sheet_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// List all sheets, most recently modified first.
    pub fn list_sheets(&self) -> Result<Vec<Sheet>, TrackerError> {
        let conn = self.shared.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, updated_at FROM sheets ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], sheet_from_row)?;

        let mut sheets = Vec::new();
        for row in rows {
            sheets.push(row?);
        }
        Ok(sheets)
    }

    /// Rename a sheet.
    pub fn update_sheet(&self, sheet_id: Uuid, name: &str) -> Result<(), TrackerError> {
        validate::sheet_name(name)?;

        let now = Utc::now();
        {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                let rows = conn.execute(
                    "UPDATE sheets SET name = ?1 WHERE id = ?2",
                    params![name, sheet_id.to_string()],
                )?;
                if rows == 0 {
                    return Err(TrackerError::not_found("sheet", sheet_id));
                }
                touch_sheet(conn, sheet_id, now)
            })?;
        }

        self.publish(&[Table::Sheets]);
        Ok(())
    }

    /// Delete a sheet and everything it owns: attributes, entities, and the
    /// cell values under them, in one transaction.
    pub fn delete_sheet(&self, sheet_id: Uuid) -> Result<(), TrackerError> {
        {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                let id = sheet_id.to_string();
                conn.execute(
                    "DELETE FROM cell_values
                     WHERE entity_id IN (SELECT id FROM entities WHERE sheet_id = ?1)
                        OR attribute_id IN (SELECT id FROM attributes WHERE sheet_id = ?1)",
                    params![id],
                )?;
                conn.execute("DELETE FROM entities WHERE sheet_id = ?1", params![id])?;
                conn.execute("DELETE FROM attributes WHERE sheet_id = ?1", params![id])?;
                let rows = conn.execute("DELETE FROM sheets WHERE id = ?1", params![id])?;
                if rows == 0 {
                    return Err(TrackerError::not_found("sheet", sheet_id));
                }
                Ok(())
            })?;
        }

        log::info!("deleted sheet {sheet_id} and its contents");
        self.publish(&[
            Table::Sheets,
            Table::Attributes,
            Table::Entities,
            Table::CellValues,
        ]);
        Ok(())
    }
}

pub(crate) fn sheet_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sheet> {
    Ok(Sheet {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        created_at: datetime_col(row, 2)?,
        updated_at: datetime_col(row, 3)?,
    })
}

pub(crate) fn insert_sheet_row(conn: &Connection, sheet: &Sheet) -> Result<(), TrackerError> {
    conn.execute(
        "INSERT INTO sheets (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            sheet.id.to_string(),
            sheet.name,
            sheet.created_at.to_rfc3339(),
            sheet.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;
    use crate::db::CellData;

    #[test]
    fn test_create_sheet_adds_default_attribute() {
        let db = test_db();
        let sheet = db.create_sheet("Class 10A").expect("create sheet");

        let attributes = db.list_attributes(sheet.id).expect("list attributes");
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes[0].name, DEFAULT_ATTRIBUTE_NAME);
        assert_eq!(attributes[0].kind, AttributeType::Boolean);
        assert_eq!(attributes[0].position, 0);
        assert_eq!(sheet.created_at, sheet.updated_at);
    }

    #[test]
    fn test_create_sheet_rejects_empty_name() {
        let db = test_db();
        let err = db.create_sheet("").unwrap_err();
        assert!(err.is_validation());
        assert!(db.list_sheets().expect("list").is_empty());
    }

    #[test]
    fn test_list_sheets_orders_by_updated_at_desc() {
        let db = test_db();
        let older = db.create_sheet("Older").expect("create");
        let newer = db.create_sheet("Newer").expect("create");

        let sheets = db.list_sheets().expect("list");
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].id, newer.id);

        // Mutating the older sheet moves it to the front.
        db.add_entity(older.id, "Alice").expect("add entity");
        let sheets = db.list_sheets().expect("list");
        assert_eq!(sheets[0].id, older.id);
    }

    #[test]
    fn test_update_sheet_renames_and_touches() {
        let db = test_db();
        let sheet = db.create_sheet("Draft").expect("create");

        db.update_sheet(sheet.id, "Final").expect("rename");
        let stored = db.get_sheet(sheet.id).expect("get").expect("exists");
        assert_eq!(stored.name, "Final");
        assert!(stored.updated_at >= sheet.updated_at);
        assert_eq!(stored.created_at, sheet.created_at);
    }

    #[test]
    fn test_update_sheet_missing_is_not_found() {
        let db = test_db();
        let err = db.update_sheet(Uuid::new_v4(), "Name").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_sheet_cascades_everything() {
        let db = test_db();
        let sheet = db.create_sheet("Doomed").expect("create");
        let survivor = db.create_sheet("Survivor").expect("create");

        let entity = db.add_entity(sheet.id, "Alice").expect("add entity");
        let attributes = db.list_attributes(sheet.id).expect("attributes");
        db.update_cell_value(entity.id, attributes[0].id, CellData::Bool(true))
            .expect("set cell");

        let kept = db.add_entity(survivor.id, "Bob").expect("add entity");

        db.delete_sheet(sheet.id).expect("delete");

        assert!(db.get_sheet(sheet.id).expect("get").is_none());
        assert!(db.list_attributes(sheet.id).expect("attrs").is_empty());
        assert!(db.list_entities(sheet.id).expect("entities").is_empty());
        assert!(db
            .get_cell_values_for_entity(entity.id)
            .expect("cells")
            .is_empty());

        // The other sheet is untouched.
        assert!(db.get_sheet(survivor.id).expect("get").is_some());
        assert_eq!(db.list_entities(survivor.id).expect("entities").len(), 1);
        assert_eq!(
            db.list_entities(survivor.id).expect("entities")[0].id,
            kept.id
        );
    }

    #[test]
    fn test_delete_sheet_missing_is_not_found() {
        let db = test_db();
        let err = db.delete_sheet(Uuid::new_v4()).unwrap_err();
        assert!(err.is_not_found());
    }
}
