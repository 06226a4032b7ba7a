use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::entities::entity_sheet_id;
use super::{touch_sheet, uuid_col, with_txn, CellData, CellValue, TrackerDb};
use crate::error::TrackerError;
use crate::live::Table;

impl TrackerDb {
    // =========================================================================
    // Cell values
    // =========================================================================

    /// Write the value at one (entity, attribute) intersection.
    ///
    /// Fails `NotFound` if the entity does not exist. The write is an upsert
    /// against the unique pair index, run in the same transaction as the
    /// entity lookup and the sheet timestamp bump, so interleaved calls for
    /// one pair can never produce two rows.
    pub fn update_cell_value(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
        value: CellData,
    ) -> Result<(), TrackerError> {
        let now = Utc::now();
        {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                let sheet_id = entity_sheet_id(conn, entity_id)?
                    .ok_or_else(|| TrackerError::not_found("entity", entity_id))?;
                conn.execute(
                    "INSERT INTO cell_values (id, entity_id, attribute_id, value)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(entity_id, attribute_id) DO UPDATE SET
                        value = excluded.value",
                    params![
                        Uuid::new_v4().to_string(),
                        entity_id.to_string(),
                        attribute_id.to_string(),
                        value,
                    ],
                )?;
                touch_sheet(conn, sheet_id, now)
            })?;
        }

        self.publish(&[Table::CellValues, Table::Sheets]);
        Ok(())
    }

    /// Read the value at one intersection; `Null` when nothing was written.
    pub fn get_cell_value(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
    ) -> Result<CellData, TrackerError> {
        let conn = self.shared.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT value FROM cell_values WHERE entity_id = ?1 AND attribute_id = ?2",
        )?;
        let mut rows = stmt.query_map(
            params![entity_id.to_string(), attribute_id.to_string()],
            |row| row.get::<_, CellData>(0),
        )?;
        match rows.next() {
            Some(row) => Ok(row?),
            None => Ok(CellData::Null),
        }
    }

    /// All stored cell values for one entity.
    pub fn get_cell_values_for_entity(
        &self,
        entity_id: Uuid,
    ) -> Result<Vec<CellValue>, TrackerError> {
        let conn = self.shared.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, entity_id, attribute_id, value FROM cell_values
             WHERE entity_id = ?1",
        )?;
        let rows = stmt.query_map(params![entity_id.to_string()], cell_from_row)?;

        let mut cells = Vec::new();
        for row in rows {
            cells.push(row?);
        }
        Ok(cells)
    }

    /// All stored cell values for the entities of one sheet.
    pub fn get_cell_values_for_sheet(
        &self,
        sheet_id: Uuid,
    ) -> Result<Vec<CellValue>, TrackerError> {
        let conn = self.shared.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT cv.id, cv.entity_id, cv.attribute_id, cv.value
             FROM cell_values cv
             JOIN entities e ON e.id = cv.entity_id
             WHERE e.sheet_id = ?1",
        )?;
        let rows = stmt.query_map(params![sheet_id.to_string()], cell_from_row)?;

        let mut cells = Vec::new();
        for row in rows {
            cells.push(row?);
        }
        Ok(cells)
    }
}

pub(crate) fn cell_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CellValue> {
    Ok(CellValue {
        id: uuid_col(row, 0)?,
        entity_id: uuid_col(row, 1)?,
        attribute_id: uuid_col(row, 2)?,
        value: row.get(3)?,
    })
}

pub(crate) fn insert_cell_row(conn: &Connection, cell: &CellValue) -> Result<(), TrackerError> {
    conn.execute(
        "INSERT INTO cell_values (id, entity_id, attribute_id, value)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            cell.id.to_string(),
            cell.entity_id.to_string(),
            cell.attribute_id.to_string(),
            cell.value,
        ],
    )?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
