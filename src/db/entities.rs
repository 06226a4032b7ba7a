use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{touch_sheet, uuid_col, with_txn, Entity, TrackerDb};
use crate::error::TrackerError;
use crate::live::Table;
use crate::validate;

impl TrackerDb {
    // =========================================================================
    // Entities (rows)
    // =========================================================================

    /// Add a single entity to a sheet. Position continues the sheet's
    /// sequence (count of existing entities).
    pub fn add_entity(&self, sheet_id: Uuid, name: &str) -> Result<Entity, TrackerError> {
        validate::entity_name(name)?;

        let now = Utc::now();
        let entity = {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                let entity = Entity {
                    id: Uuid::new_v4(),
                    sheet_id,
                    name: name.to_string(),
                    position: entity_count(conn, sheet_id)?,
                };
                insert_entity_row(conn, &entity)?;
                touch_sheet(conn, sheet_id, now)?;
                Ok(entity)
            })?
        };

        self.publish(&[Table::Entities, Table::Sheets]);
        Ok(entity)
    }

    /// Bulk-append entities, preserving input order. The whole batch is one
    /// atomic unit: observers never see it half-applied.
    pub fn bulk_add_entities(
        &self,
        sheet_id: Uuid,
        names: &[String],
    ) -> Result<Vec<Entity>, TrackerError> {
        if names.is_empty() {
            return Err(TrackerError::validation("no entity names given"));
        }
        for name in names {
            validate::entity_name(name)?;
        }

        let now = Utc::now();
        let entities = {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                let start = entity_count(conn, sheet_id)?;
                let mut entities = Vec::with_capacity(names.len());
                for (index, name) in names.iter().enumerate() {
                    let entity = Entity {
                        id: Uuid::new_v4(),
                        sheet_id,
                        name: name.clone(),
                        position: start + index as u32,
                    };
                    insert_entity_row(conn, &entity)?;
                    entities.push(entity);
                }
                touch_sheet(conn, sheet_id, now)?;
                Ok(entities)
            })?
        };

        self.publish(&[Table::Entities, Table::Sheets]);
        Ok(entities)
    }

    /// Rename an entity.
    pub fn update_entity(&self, entity_id: Uuid, name: &str) -> Result<(), TrackerError> {
        validate::entity_name(name)?;

        let now = Utc::now();
        {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                let sheet_id = entity_sheet_id(conn, entity_id)?
                    .ok_or_else(|| TrackerError::not_found("entity", entity_id))?;
                conn.execute(
                    "UPDATE entities SET name = ?1 WHERE id = ?2",
                    params![name, entity_id.to_string()],
                )?;
                touch_sheet(conn, sheet_id, now)
            })?;
        }

        self.publish(&[Table::Entities, Table::Sheets]);
        Ok(())
    }

    /// Delete an entity and every cell value referencing it.
    pub fn delete_entity(&self, entity_id: Uuid) -> Result<(), TrackerError> {
        let now = Utc::now();
        {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                let sheet_id = entity_sheet_id(conn, entity_id)?
                    .ok_or_else(|| TrackerError::not_found("entity", entity_id))?;
                conn.execute(
                    "DELETE FROM cell_values WHERE entity_id = ?1",
                    params![entity_id.to_string()],
                )?;
                conn.execute(
                    "DELETE FROM entities WHERE id = ?1",
                    params![entity_id.to_string()],
                )?;
                touch_sheet(conn, sheet_id, now)
            })?;
        }

        self.publish(&[Table::Entities, Table::CellValues, Table::Sheets]);
        Ok(())
    }

    /// Rewrite positions from a permutation of the sheet's entity ids:
    /// `position = index in ordered_ids`. Callers must pass the complete
    /// set — ids omitted from the permutation keep their old positions.
    pub fn reorder_entities(
        &self,
        sheet_id: Uuid,
        ordered_ids: &[Uuid],
    ) -> Result<(), TrackerError> {
        let now = Utc::now();
        {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                let mut stmt =
                    conn.prepare("UPDATE entities SET position = ?1 WHERE id = ?2")?;
                for (index, id) in ordered_ids.iter().enumerate() {
                    stmt.execute(params![index as u32, id.to_string()])?;
                }
                touch_sheet(conn, sheet_id, now)
            })?;
        }

        self.publish(&[Table::Entities, Table::Sheets]);
        Ok(())
    }

    /// List a sheet's entities in display order.
    pub fn list_entities(&self, sheet_id: Uuid) -> Result<Vec<Entity>, TrackerError> {
        let conn = self.shared.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, sheet_id, name, position FROM entities
             WHERE sheet_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![sheet_id.to_string()], entity_from_row)?;

        let mut entities = Vec::new();
        for row in rows {
            entities.push(row?);
        }
        Ok(entities)
    }
}

pub(crate) fn entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: uuid_col(row, 0)?,
        sheet_id: uuid_col(row, 1)?,
        name: row.get(2)?,
        position: row.get(3)?,
    })
}

fn entity_count(conn: &Connection, sheet_id: Uuid) -> Result<u32, TrackerError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM entities WHERE sheet_id = ?1",
        params![sheet_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub(crate) fn entity_sheet_id(
    conn: &Connection,
    entity_id: Uuid,
) -> Result<Option<Uuid>, TrackerError> {
    let id: Option<String> = conn
        .query_row(
            "SELECT sheet_id FROM entities WHERE id = ?1",
            params![entity_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match id {
        Some(s) => Ok(Some(Uuid::parse_str(&s).map_err(|_| {
            TrackerError::validation("malformed sheet id in entities table")
        })?)),
        None => Ok(None),
    }
}

pub(crate) fn insert_entity_row(conn: &Connection, entity: &Entity) -> Result<(), TrackerError> {
    conn.execute(
        "INSERT INTO entities (id, sheet_id, name, position) VALUES (?1, ?2, ?3, ?4)",
        params![
            entity.id.to_string(),
            entity.sheet_id.to_string(),
            entity.name,
            entity.position,
        ],
    )?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
