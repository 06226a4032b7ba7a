//! CSV rendering of a single sheet.
//!
//! Produces the file body only; writing it somewhere is the caller's job.

use std::collections::HashMap;

use uuid::Uuid;

use crate::db::{CellData, TrackerDb};
use crate::error::TrackerError;

impl TrackerDb {
    /// Render one sheet as CSV: a header row (`Name` plus attribute names in
    /// column order) and one row per entity in display order.
    pub fn export_sheet_to_csv(&self, sheet_id: Uuid) -> Result<String, TrackerError> {
        self.get_sheet(sheet_id)?
            .ok_or_else(|| TrackerError::not_found("sheet", sheet_id))?;

        let attributes = self.list_attributes(sheet_id)?;
        let entities = self.list_entities(sheet_id)?;
        let cells: HashMap<(Uuid, Uuid), CellData> = self
            .get_cell_values_for_sheet(sheet_id)?
            .into_iter()
            .map(|cell| ((cell.entity_id, cell.attribute_id), cell.value))
            .collect();

        let mut rows = Vec::with_capacity(entities.len() + 1);

        let mut header = vec!["Name".to_string()];
        header.extend(attributes.iter().map(|a| a.name.clone()));
        rows.push(header);

        for entity in &entities {
            let mut row = vec![entity.name.clone()];
            for attribute in &attributes {
                let value = cells.get(&(entity.id, attribute.id));
                row.push(format_cell_value(value));
            }
            rows.push(row);
        }

        Ok(rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|field| quote(field))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

fn format_cell_value(value: Option<&CellData>) -> String {
    match value {
        None | Some(CellData::Null) => String::new(),
        Some(CellData::Bool(true)) => "Yes".to_string(),
        Some(CellData::Bool(false)) => "No".to_string(),
        Some(CellData::Number(n)) => n.to_string(),
        Some(CellData::Text(s)) => s.clone(),
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::AttributeType;

    #[test]
    fn test_export_orders_columns_and_rows_by_position() {
        let db = test_db();
        let sheet = db.create_sheet("Class").expect("create");
        let attendance = db.list_attributes(sheet.id).expect("attrs")[0].clone();
        let score = db
            .add_attribute(sheet.id, "Score", AttributeType::Number, None, None)
            .expect("add attribute");

        let names: Vec<String> = ["Alice", "Bob"].iter().map(|s| s.to_string()).collect();
        let entities = db.bulk_add_entities(sheet.id, &names).expect("bulk add");

        db.update_cell_value(entities[0].id, attendance.id, CellData::Bool(true))
            .expect("write");
        db.update_cell_value(entities[1].id, attendance.id, CellData::Bool(false))
            .expect("write");
        db.update_cell_value(entities[0].id, score.id, CellData::Number(8.5))
            .expect("write");

        let csv = db.export_sheet_to_csv(sheet.id).expect("export");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "\"Name\",\"Attendance\",\"Score\"");
        assert_eq!(lines[1], "\"Alice\",\"Yes\",\"8.5\"");
        assert_eq!(lines[2], "\"Bob\",\"No\",\"\"");
    }

    #[test]
    fn test_export_respects_reordering() {
        let db = test_db();
        let sheet = db.create_sheet("Class").expect("create");
        let names: Vec<String> = ["Alice", "Bob"].iter().map(|s| s.to_string()).collect();
        let entities = db.bulk_add_entities(sheet.id, &names).expect("bulk add");

        let reversed: Vec<Uuid> = entities.iter().rev().map(|e| e.id).collect();
        db.reorder_entities(sheet.id, &reversed).expect("reorder");

        let csv = db.export_sheet_to_csv(sheet.id).expect("export");
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[1].starts_with("\"Bob\""));
        assert!(lines[2].starts_with("\"Alice\""));
    }

    #[test]
    fn test_export_escapes_embedded_quotes() {
        let db = test_db();
        let sheet = db.create_sheet("Class").expect("create");
        db.add_entity(sheet.id, "Nguyen \"Bin\" Van").expect("add");

        let csv = db.export_sheet_to_csv(sheet.id).expect("export");
        assert!(csv.contains("\"Nguyen \"\"Bin\"\" Van\""));
    }

    #[test]
    fn test_export_missing_sheet_is_not_found() {
        let db = test_db();
        let err = db.export_sheet_to_csv(Uuid::new_v4()).unwrap_err();
        assert!(err.is_not_found());
    }
}
