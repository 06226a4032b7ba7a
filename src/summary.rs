//! Per-attribute aggregation over a sheet's cell values.
//!
//! [`summarize`] is pure and recomputed from scratch on every call — cell
//! values change between calls, and incremental state would be silently
//! stale. [`TrackerDb::sheet_summary`] loads a sheet's rows and delegates.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::db::{Attribute, AttributeType, CellData, CellValue, Entity, TrackerDb};
use crate::error::TrackerError;

/// Summary of a boolean or boolean-currency column. `total` counts the
/// sheet's entities, not its cells: a row nobody marked still counts toward
/// the denominator. `subtotal`/`currency_value` are present for
/// boolean-currency columns only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanSummary {
    pub attribute_id: Uuid,
    pub attribute_name: String,
    pub attribute_type: AttributeType,
    pub checked: usize,
    pub total: usize,
    pub percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency_value: Option<f64>,
}

/// Summary of a number column over the cells that coerce to a finite number.
/// With no such cells, `min` is `+∞` and `max` is `-∞` — the identity values,
/// not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberSummary {
    pub attribute_id: Uuid,
    pub attribute_name: String,
    pub attribute_type: AttributeType,
    pub sum: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Histogram of a dropdown column's non-null values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropdownSummary {
    pub attribute_id: Uuid,
    pub attribute_name: String,
    pub attribute_type: AttributeType,
    pub counts: BTreeMap<String, usize>,
    pub total: usize,
}

/// Fill rate of a text column. Blank-after-trim values count as empty even
/// though a cell row exists for them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSummary {
    pub attribute_id: Uuid,
    pub attribute_name: String,
    pub attribute_type: AttributeType,
    pub filled: usize,
    pub empty: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SummaryItem {
    Boolean(BooleanSummary),
    Number(NumberSummary),
    Dropdown(DropdownSummary),
    Text(TextSummary),
}

impl SummaryItem {
    pub fn attribute_id(&self) -> Uuid {
        match self {
            SummaryItem::Boolean(s) => s.attribute_id,
            SummaryItem::Number(s) => s.attribute_id,
            SummaryItem::Dropdown(s) => s.attribute_id,
            SummaryItem::Text(s) => s.attribute_id,
        }
    }
}

/// Complete summary for one sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSummary {
    pub attribute_summaries: Vec<SummaryItem>,
    /// Sum of every boolean-currency subtotal; other column types contribute 0.
    pub grand_total: f64,
    pub total_entities: usize,
}

/// Reduce all cell values of a sheet into one summary per attribute.
pub fn summarize(
    attributes: &[Attribute],
    entities: &[Entity],
    cells: &[CellValue],
) -> SheetSummary {
    let attribute_summaries: Vec<SummaryItem> = attributes
        .iter()
        .map(|attribute| {
            let cells: Vec<&CellValue> = cells
                .iter()
                .filter(|c| c.attribute_id == attribute.id)
                .collect();
            summarize_attribute(attribute, entities.len(), &cells)
        })
        .collect();

    let grand_total = attribute_summaries
        .iter()
        .filter_map(|item| match item {
            SummaryItem::Boolean(s) => s.subtotal,
            _ => None,
        })
        .sum();

    SheetSummary {
        attribute_summaries,
        grand_total,
        total_entities: entities.len(),
    }
}

fn summarize_attribute(
    attribute: &Attribute,
    entity_count: usize,
    cells: &[&CellValue],
) -> SummaryItem {
    match attribute.kind {
        AttributeType::Boolean | AttributeType::BooleanCurrency => {
            let checked = cells
                .iter()
                .filter(|c| c.value == CellData::Bool(true))
                .count();
            let total = entity_count;
            let percentage = if total > 0 {
                checked as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            let (subtotal, currency_value) = if attribute.kind == AttributeType::BooleanCurrency {
                let rate = attribute.currency_value.unwrap_or(0.0);
                (Some(checked as f64 * rate), attribute.currency_value)
            } else {
                (None, None)
            };
            SummaryItem::Boolean(BooleanSummary {
                attribute_id: attribute.id,
                attribute_name: attribute.name.clone(),
                attribute_type: attribute.kind,
                checked,
                total,
                percentage,
                subtotal,
                currency_value,
            })
        }

        AttributeType::Number => {
            let values: Vec<f64> = cells
                .iter()
                .filter_map(|c| coerce_number(&c.value))
                .collect();
            let sum: f64 = values.iter().sum();
            let average = if values.is_empty() {
                0.0
            } else {
                sum / values.len() as f64
            };
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            SummaryItem::Number(NumberSummary {
                attribute_id: attribute.id,
                attribute_name: attribute.name.clone(),
                attribute_type: attribute.kind,
                sum,
                average,
                min,
                max,
                count: values.len(),
            })
        }

        AttributeType::Dropdown => {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for cell in cells {
                if let Some(key) = display_string(&cell.value) {
                    *counts.entry(key).or_insert(0) += 1;
                }
            }
            let total = cells.iter().filter(|c| !c.value.is_null()).count();
            SummaryItem::Dropdown(DropdownSummary {
                attribute_id: attribute.id,
                attribute_name: attribute.name.clone(),
                attribute_type: attribute.kind,
                counts,
                total,
            })
        }

        AttributeType::Text => {
            let filled = cells
                .iter()
                .filter(|c| match &c.value {
                    CellData::Null => false,
                    CellData::Text(s) => !s.trim().is_empty(),
                    _ => true,
                })
                .count();
            let total = entity_count;
            SummaryItem::Text(TextSummary {
                attribute_id: attribute.id,
                attribute_name: attribute.name.clone(),
                attribute_type: attribute.kind,
                filled,
                empty: total.saturating_sub(filled),
                total,
            })
        }
    }
}

/// A cell value as a number, when it coerces to a finite one. Null means
/// "no value entered" and never coerces; booleans count as 1/0 and numeric
/// strings parse after trimming.
fn coerce_number(value: &CellData) -> Option<f64> {
    match value {
        CellData::Number(n) if n.is_finite() => Some(*n),
        CellData::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        CellData::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Non-null cell value as a histogram key.
fn display_string(value: &CellData) -> Option<String> {
    match value {
        CellData::Null => None,
        CellData::Bool(b) => Some(b.to_string()),
        CellData::Number(n) => Some(n.to_string()),
        CellData::Text(s) => Some(s.clone()),
    }
}

impl TrackerDb {
    /// Summarize one sheet from its current stored state.
    pub fn sheet_summary(&self, sheet_id: Uuid) -> Result<SheetSummary, TrackerError> {
        self.get_sheet(sheet_id)?
            .ok_or_else(|| TrackerError::not_found("sheet", sheet_id))?;
        let attributes = self.list_attributes(sheet_id)?;
        let entities = self.list_entities(sheet_id)?;
        let cells = self.get_cell_values_for_sheet(sheet_id)?;
        Ok(summarize(&attributes, &entities, &cells))
    }

    /// Summary for a single attribute, or `None` if the attribute is not
    /// part of the sheet.
    pub fn summary_for_attribute(
        &self,
        sheet_id: Uuid,
        attribute_id: Uuid,
    ) -> Result<Option<SummaryItem>, TrackerError> {
        Ok(self
            .sheet_summary(sheet_id)?
            .attribute_summaries
            .into_iter()
            .find(|item| item.attribute_id() == attribute_id))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    fn attribute(kind: AttributeType) -> Attribute {
        Attribute {
            id: Uuid::new_v4(),
            sheet_id: Uuid::new_v4(),
            name: "attr".into(),
            kind,
            currency_value: None,
            options: None,
            position: 0,
        }
    }

    fn entity(sheet_id: Uuid, position: u32) -> Entity {
        Entity {
            id: Uuid::new_v4(),
            sheet_id,
            name: format!("entity {position}"),
            position,
        }
    }

    fn cell(entity_id: Uuid, attribute_id: Uuid, value: CellData) -> CellValue {
        CellValue {
            id: Uuid::new_v4(),
            entity_id,
            attribute_id,
            value,
        }
    }

    #[test]
    fn test_boolean_percentage_counts_entities_not_cells() {
        let attr = attribute(AttributeType::Boolean);
        let entities: Vec<Entity> = (0..3).map(|i| entity(attr.sheet_id, i)).collect();
        // Two checked, one false, none for the third entity.
        let cells = vec![
            cell(entities[0].id, attr.id, CellData::Bool(true)),
            cell(entities[1].id, attr.id, CellData::Bool(true)),
            cell(entities[2].id, attr.id, CellData::Bool(false)),
        ];

        let summary = summarize(&[attr], &entities, &cells);
        let SummaryItem::Boolean(b) = &summary.attribute_summaries[0] else {
            panic!("expected boolean summary");
        };
        assert_eq!(b.checked, 2);
        assert_eq!(b.total, 3);
        assert!((b.percentage - 66.67).abs() < 0.01);
        assert_eq!(b.subtotal, None);
    }

    #[test]
    fn test_boolean_with_no_entities_is_zero_percent() {
        let attr = attribute(AttributeType::Boolean);
        let summary = summarize(&[attr], &[], &[]);
        let SummaryItem::Boolean(b) = &summary.attribute_summaries[0] else {
            panic!("expected boolean summary");
        };
        assert_eq!(b.percentage, 0.0);
        assert_eq!(b.total, 0);
    }

    #[test]
    fn test_boolean_currency_subtotal_and_grand_total() {
        let mut lunch = attribute(AttributeType::BooleanCurrency);
        lunch.currency_value = Some(150_000.0);
        let mut trip = attribute(AttributeType::BooleanCurrency);
        trip.sheet_id = lunch.sheet_id;
        trip.currency_value = Some(50_000.0);

        let entities: Vec<Entity> = (0..3).map(|i| entity(lunch.sheet_id, i)).collect();
        let cells = vec![
            cell(entities[0].id, lunch.id, CellData::Bool(true)),
            cell(entities[1].id, lunch.id, CellData::Bool(true)),
            cell(entities[0].id, trip.id, CellData::Bool(true)),
        ];

        let summary = summarize(&[lunch.clone(), trip], &entities, &cells);
        let SummaryItem::Boolean(b) = &summary.attribute_summaries[0] else {
            panic!("expected boolean summary");
        };
        assert_eq!(b.subtotal, Some(300_000.0));
        assert_eq!(b.currency_value, Some(150_000.0));
        assert_eq!(summary.grand_total, 350_000.0);
    }

    #[test]
    fn test_boolean_currency_missing_rate_counts_as_zero() {
        // Not constructible through the validated write path, but a restore
        // of an older hand-edited file might carry it; the engine treats the
        // missing rate as 0 rather than failing.
        let attr = attribute(AttributeType::BooleanCurrency);
        let entities = vec![entity(attr.sheet_id, 0)];
        let cells = vec![cell(entities[0].id, attr.id, CellData::Bool(true))];

        let summary = summarize(&[attr], &entities, &cells);
        let SummaryItem::Boolean(b) = &summary.attribute_summaries[0] else {
            panic!("expected boolean summary");
        };
        assert_eq!(b.subtotal, Some(0.0));
        assert_eq!(summary.grand_total, 0.0);
    }

    #[test]
    fn test_number_summary_over_mixed_values() {
        let attr = attribute(AttributeType::Number);
        let entities: Vec<Entity> = (0..5).map(|i| entity(attr.sheet_id, i)).collect();
        let cells = vec![
            cell(entities[0].id, attr.id, CellData::Number(8.0)),
            cell(entities[1].id, attr.id, CellData::Number(2.0)),
            // Numeric string coerces after trimming, JS-style.
            cell(entities[2].id, attr.id, CellData::Text(" 5 ".into())),
            // Non-numeric text and null are excluded.
            cell(entities[3].id, attr.id, CellData::Text("absent".into())),
            cell(entities[4].id, attr.id, CellData::Null),
        ];

        let summary = summarize(&[attr], &entities, &cells);
        let SummaryItem::Number(n) = &summary.attribute_summaries[0] else {
            panic!("expected number summary");
        };
        assert_eq!(n.count, 3);
        assert_eq!(n.sum, 15.0);
        assert_eq!(n.average, 5.0);
        assert_eq!(n.min, 2.0);
        assert_eq!(n.max, 8.0);
    }

    #[test]
    fn test_number_summary_empty_edge_case() {
        let attr = attribute(AttributeType::Number);
        let summary = summarize(&[attr], &[], &[]);
        let SummaryItem::Number(n) = &summary.attribute_summaries[0] else {
            panic!("expected number summary");
        };
        assert_eq!(n.sum, 0.0);
        assert_eq!(n.average, 0.0);
        assert_eq!(n.min, f64::INFINITY);
        assert_eq!(n.max, f64::NEG_INFINITY);
        assert_eq!(n.count, 0);
    }

    #[test]
    fn test_dropdown_histogram_skips_nulls() {
        let attr = attribute(AttributeType::Dropdown);
        let entities: Vec<Entity> = (0..4).map(|i| entity(attr.sheet_id, i)).collect();
        let cells = vec![
            cell(entities[0].id, attr.id, CellData::Text("Level 1".into())),
            cell(entities[1].id, attr.id, CellData::Text("Level 2".into())),
            cell(entities[2].id, attr.id, CellData::Text("Level 1".into())),
            cell(entities[3].id, attr.id, CellData::Null),
        ];

        let summary = summarize(&[attr], &entities, &cells);
        let SummaryItem::Dropdown(d) = &summary.attribute_summaries[0] else {
            panic!("expected dropdown summary");
        };
        assert_eq!(d.counts.get("Level 1"), Some(&2));
        assert_eq!(d.counts.get("Level 2"), Some(&1));
        assert_eq!(d.counts.len(), 2);
        assert_eq!(d.total, 3);
    }

    #[test]
    fn test_dropdown_with_no_values_is_empty_histogram() {
        let attr = attribute(AttributeType::Dropdown);
        let entities = vec![entity(attr.sheet_id, 0)];
        let summary = summarize(&[attr], &entities, &[]);
        let SummaryItem::Dropdown(d) = &summary.attribute_summaries[0] else {
            panic!("expected dropdown summary");
        };
        assert!(d.counts.is_empty());
        assert_eq!(d.total, 0);
    }

    #[test]
    fn test_text_blank_after_trim_counts_as_empty() {
        let attr = attribute(AttributeType::Text);
        let entities: Vec<Entity> = (0..4).map(|i| entity(attr.sheet_id, i)).collect();
        let cells = vec![
            cell(entities[0].id, attr.id, CellData::Text("note".into())),
            cell(entities[1].id, attr.id, CellData::Text("   ".into())),
            cell(entities[2].id, attr.id, CellData::Null),
            // Entity 3 has no cell at all.
        ];

        let summary = summarize(&[attr], &entities, &cells);
        let SummaryItem::Text(t) = &summary.attribute_summaries[0] else {
            panic!("expected text summary");
        };
        assert_eq!(t.filled, 1);
        assert_eq!(t.empty, 3);
        assert_eq!(t.total, 4);
    }

    #[test]
    fn test_sheet_summary_reads_store_state() {
        let db = test_db();
        let sheet = db.create_sheet("Class").expect("create");
        let attendance = db.list_attributes(sheet.id).expect("attrs")[0].clone();
        let fee = db
            .add_attribute(
                sheet.id,
                "Lunch fee",
                AttributeType::BooleanCurrency,
                Some(150_000.0),
                None,
            )
            .expect("add attribute");

        let names: Vec<String> = ["Alice", "Bob", "Carol"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let entities = db.bulk_add_entities(sheet.id, &names).expect("bulk add");

        db.update_cell_value(entities[0].id, attendance.id, CellData::Bool(true))
            .expect("write");
        db.update_cell_value(entities[1].id, attendance.id, CellData::Bool(true))
            .expect("write");
        db.update_cell_value(entities[0].id, fee.id, CellData::Bool(true))
            .expect("write");
        db.update_cell_value(entities[1].id, fee.id, CellData::Bool(true))
            .expect("write");

        let summary = db.sheet_summary(sheet.id).expect("summary");
        assert_eq!(summary.total_entities, 3);
        assert_eq!(summary.grand_total, 300_000.0);
        assert_eq!(summary.attribute_summaries.len(), 2);

        let item = db
            .summary_for_attribute(sheet.id, fee.id)
            .expect("lookup")
            .expect("present");
        let SummaryItem::Boolean(b) = item else {
            panic!("expected boolean summary");
        };
        assert_eq!(b.subtotal, Some(300_000.0));

        assert!(db
            .summary_for_attribute(sheet.id, Uuid::new_v4())
            .expect("lookup")
            .is_none());
    }

    #[test]
    fn test_sheet_summary_missing_sheet_is_not_found() {
        let db = test_db();
        let err = db.sheet_summary(Uuid::new_v4()).unwrap_err();
        assert!(err.is_not_found());
    }
}
