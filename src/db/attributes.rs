use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{touch_sheet, uuid_col, with_txn, Attribute, AttributeUpdate, TrackerDb};
use crate::db::AttributeType;
use crate::error::TrackerError;
use crate::live::Table;
use crate::validate;

impl TrackerDb {
    // =========================================================================
    // Attributes (columns)
    // =========================================================================

    /// Add a column to a sheet. `currency_value` applies to boolean-currency
    /// columns, `options` to dropdowns; the record is validated before the
    /// write. Position continues the sheet's attribute sequence.
    pub fn add_attribute(
        &self,
        sheet_id: Uuid,
        name: &str,
        kind: AttributeType,
        currency_value: Option<f64>,
        options: Option<Vec<String>>,
    ) -> Result<Attribute, TrackerError> {
        let now = Utc::now();
        let attribute = {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                let attribute = Attribute {
                    id: Uuid::new_v4(),
                    sheet_id,
                    name: name.to_string(),
                    kind,
                    currency_value,
                    options: options.clone(),
                    position: attribute_count(conn, sheet_id)?,
                };
                validate::attribute(&attribute)?;
                insert_attribute_row(conn, &attribute)?;
                touch_sheet(conn, sheet_id, now)?;
                Ok(attribute)
            })?
        };

        self.publish(&[Table::Attributes, Table::Sheets]);
        Ok(attribute)
    }

    /// Apply a partial update to an attribute. The merged record is
    /// re-validated, so an update cannot leave e.g. a dropdown without
    /// options.
    pub fn update_attribute(
        &self,
        attribute_id: Uuid,
        update: AttributeUpdate,
    ) -> Result<(), TrackerError> {
        let now = Utc::now();
        {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                let mut attribute = get_attribute_row(conn, attribute_id)?
                    .ok_or_else(|| TrackerError::not_found("attribute", attribute_id))?;

                if let Some(name) = update.name {
                    attribute.name = name;
                }
                if let Some(currency_value) = update.currency_value {
                    attribute.currency_value = Some(currency_value);
                }
                if let Some(options) = update.options {
                    attribute.options = Some(options);
                }
                validate::attribute(&attribute)?;

                let options_json = options_to_json(&attribute.options)?;
                conn.execute(
                    "UPDATE attributes SET name = ?1, currency_value = ?2, options = ?3
                     WHERE id = ?4",
                    params![
                        attribute.name,
                        attribute.currency_value,
                        options_json,
                        attribute_id.to_string(),
                    ],
                )?;
                touch_sheet(conn, attribute.sheet_id, now)
            })?;
        }

        self.publish(&[Table::Attributes, Table::Sheets]);
        Ok(())
    }

    /// Delete a column and every cell value referencing it.
    pub fn delete_attribute(&self, attribute_id: Uuid) -> Result<(), TrackerError> {
        let now = Utc::now();
        {
            let conn = self.shared.conn.lock();
            with_txn(&conn, |conn| {
                let attribute = get_attribute_row(conn, attribute_id)?
                    .ok_or_else(|| TrackerError::not_found("attribute", attribute_id))?;
                conn.execute(
                    "DELETE FROM cell_values WHERE attribute_id = ?1",
                    params![attribute_id.to_string()],
                )?;
                conn.execute(
                    "DELETE FROM attributes WHERE id = ?1",
                    params![attribute_id.to_string()],
                )?;
                touch_sheet(conn, attribute.sheet_id, now)
            })?;
        }

        self.publish(&[Table::Attributes, Table::CellValues, Table::Sheets]);
        Ok(())
    }

    /// List a sheet's columns in display order.
    pub fn list_attributes(&self, sheet_id: Uuid) -> Result<Vec<Attribute>, TrackerError> {
        let conn = self.shared.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, sheet_id, name, attr_type, currency_value, options, position
             FROM attributes WHERE sheet_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![sheet_id.to_string()], attribute_from_row)?;

        let mut attributes = Vec::new();
        for row in rows {
            attributes.push(row?);
        }
        Ok(attributes)
    }
}

pub(crate) fn attribute_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Attribute> {
    let options: Option<String> = row.get(5)?;
    let options = match options {
        Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(Attribute {
        id: uuid_col(row, 0)?,
        sheet_id: uuid_col(row, 1)?,
        name: row.get(2)?,
        kind: row.get(3)?,
        currency_value: row.get(4)?,
        options,
        position: row.get(6)?,
    })
}

fn attribute_count(conn: &Connection, sheet_id: Uuid) -> Result<u32, TrackerError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM attributes WHERE sheet_id = ?1",
        params![sheet_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn get_attribute_row(
    conn: &Connection,
    attribute_id: Uuid,
) -> Result<Option<Attribute>, TrackerError> {
    let mut stmt = conn.prepare(
        "SELECT id, sheet_id, name, attr_type, currency_value, options, position
         FROM attributes WHERE id = ?1",
    )?;
    Ok(stmt
        .query_row(params![attribute_id.to_string()], attribute_from_row)
        .optional()?)
}

fn options_to_json(options: &Option<Vec<String>>) -> Result<Option<String>, TrackerError> {
    match options {
        Some(options) => Ok(Some(serde_json::to_string(options)?)),
        None => Ok(None),
    }
}

pub(crate) fn insert_attribute_row(
    conn: &Connection,
    attribute: &Attribute,
) -> Result<(), TrackerError> {
    let options_json = options_to_json(&attribute.options)?;
    conn.execute(
        "INSERT INTO attributes (id, sheet_id, name, attr_type, currency_value, options, position)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            attribute.id.to_string(),
            attribute.sheet_id.to_string(),
            attribute.name,
            attribute.kind,
            attribute.currency_value,
            options_json,
            attribute.position,
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
    fn test_add_attribute_continues_position_sequence() {
        let db = test_db();
        let sheet = db.create_sheet("Fees").expect("create");

        let fee = db
            .add_attribute(
                sheet.id,
                "Lunch fee",
                AttributeType::BooleanCurrency,
                Some(150_000.0),
                None,
            )
            .expect("add attribute");
        // Position 0 is the default attendance attribute.
        assert_eq!(fee.position, 1);

        let level = db
            .add_attribute(
                sheet.id,
                "Level",
                AttributeType::Dropdown,
                None,
                Some(vec!["Level 1".into(), "Level 2".into()]),
            )
            .expect("add attribute");
        assert_eq!(level.position, 2);

        let attributes = db.list_attributes(sheet.id).expect("list");
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes[1].id, fee.id);
        assert_eq!(attributes[2].options.as_deref(), Some(&["Level 1".to_string(), "Level 2".to_string()][..]));
    }

    #[test]
    fn test_add_attribute_rejects_invalid_config() {
        let db = test_db();
        let sheet = db.create_sheet("Fees").expect("create");

        let err = db
            .add_attribute(sheet.id, "Fee", AttributeType::BooleanCurrency, None, None)
            .unwrap_err();
        assert!(err.is_validation());

        let err = db
            .add_attribute(sheet.id, "Level", AttributeType::Dropdown, None, Some(vec![]))
            .unwrap_err();
        assert!(err.is_validation());

        // Nothing was written.
        assert_eq!(db.list_attributes(sheet.id).expect("list").len(), 1);
    }

    #[test]
    fn test_add_attribute_missing_sheet_is_not_found() {
        let db = test_db();
        let err = db
            .add_attribute(Uuid::new_v4(), "X", AttributeType::Text, None, None)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_update_attribute_merges_and_revalidates() {
        let db = test_db();
        let sheet = db.create_sheet("Fees").expect("create");
        let fee = db
            .add_attribute(
                sheet.id,
                "Lunch fee",
                AttributeType::BooleanCurrency,
                Some(150_000.0),
                None,
            )
            .expect("add");

        db.update_attribute(
            fee.id,
            AttributeUpdate {
                name: Some("Dinner fee".into()),
                ..Default::default()
            },
        )
        .expect("rename");

        let stored = db.list_attributes(sheet.id).expect("list")[1].clone();
        assert_eq!(stored.name, "Dinner fee");
        // Untouched fields survive the merge.
        assert_eq!(stored.currency_value, Some(150_000.0));

        // A merge that breaks a refinement rule is rejected.
        let err = db
            .update_attribute(
                fee.id,
                AttributeUpdate {
                    currency_value: Some(-1.0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.is_validation());
        let stored = db.list_attributes(sheet.id).expect("list")[1].clone();
        assert_eq!(stored.currency_value, Some(150_000.0));
    }

    #[test]
    fn test_update_attribute_missing_is_not_found() {
        let db = test_db();
        let err = db
            .update_attribute(Uuid::new_v4(), AttributeUpdate::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_attribute_cascades_cell_values() {
        let db = test_db();
        let sheet = db.create_sheet("Fees").expect("create");
        let attendance = db.list_attributes(sheet.id).expect("list")[0].clone();
        let note = db
            .add_attribute(sheet.id, "Note", AttributeType::Text, None, None)
            .expect("add");
        let alice = db.add_entity(sheet.id, "Alice").expect("add entity");

        db.update_cell_value(alice.id, attendance.id, CellData::Bool(true))
            .expect("set");
        db.update_cell_value(alice.id, note.id, CellData::Text("late".into()))
            .expect("set");

        db.delete_attribute(note.id).expect("delete");

        let remaining = db.get_cell_values_for_entity(alice.id).expect("cells");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].attribute_id, attendance.id);
        assert_eq!(db.list_attributes(sheet.id).expect("list").len(), 1);
    }

    #[test]
    fn test_delete_attribute_missing_is_not_found() {
        let db = test_db();
        let err = db.delete_attribute(Uuid::new_v4()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_options_round_trip_through_storage() {
        let db = test_db();
        let sheet = db.create_sheet("Levels").expect("create");
        let options = vec!["Mức 1".to_string(), "Mức 2".to_string()];
        let dropdown = db
            .add_attribute(
                sheet.id,
                "Level",
                AttributeType::Dropdown,
                None,
                Some(options.clone()),
            )
            .expect("add");

        let stored = db
            .list_attributes(sheet.id)
            .expect("list")
            .into_iter()
            .find(|a| a.id == dropdown.id)
            .expect("present");
        assert_eq!(stored.options, Some(options));
        assert_eq!(stored.kind, AttributeType::Dropdown);
    }
}
