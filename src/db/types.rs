//! Shared type definitions for the database layer.
//!
//! Every struct serializes with camelCase keys so the backup document matches
//! the persisted layout consumed by the UI (`sheetId`, `createdAt`, …).

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tracking sheet: the root aggregate owning attributes, entities, and
/// cell values. `updated_at` advances (non-decreasing) on any mutation to
/// the sheet's content; `created_at` never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The value kind a column accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeType {
    Boolean,
    BooleanCurrency,
    Number,
    Text,
    Dropdown,
}

impl AttributeType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeType::Boolean => "boolean",
            AttributeType::BooleanCurrency => "boolean-currency",
            AttributeType::Number => "number",
            AttributeType::Text => "text",
            AttributeType::Dropdown => "dropdown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "boolean" => Some(AttributeType::Boolean),
            "boolean-currency" => Some(AttributeType::BooleanCurrency),
            "number" => Some(AttributeType::Number),
            "text" => Some(AttributeType::Text),
            "dropdown" => Some(AttributeType::Dropdown),
            _ => None,
        }
    }
}

impl ToSql for AttributeType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AttributeType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        AttributeType::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

/// A column definition within a sheet.
///
/// `currency_value` is only meaningful for [`AttributeType::BooleanCurrency`]
/// and `options` only for [`AttributeType::Dropdown`]; the refinement rules
/// in [`crate::validate`] enforce both. `position` is a zero-based rank among
/// the sheet's attributes, not required to stay contiguous after deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub id: Uuid,
    pub sheet_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttributeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub position: u32,
}

/// Field subset accepted by `update_attribute`. `None` leaves the stored
/// field unchanged; the merged record is re-validated before the write.
#[derive(Debug, Clone, Default)]
pub struct AttributeUpdate {
    pub name: Option<String>,
    pub currency_value: Option<f64>,
    pub options: Option<Vec<String>>,
}

/// A tracked row within a sheet. `position` drives display order and
/// sequential marking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: Uuid,
    pub sheet_id: Uuid,
    pub name: String,
    pub position: u32,
}

/// The value stored at one (entity, attribute) intersection.
///
/// `Null` means "no value entered" — the implicit state of every pair that
/// was never written. Serializes untagged (`null | true | 1.5 | "s"`), which
/// is also the JSON form stored in the `value` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellData {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellData {
    pub fn is_null(&self) -> bool {
        matches!(self, CellData::Null)
    }
}

impl ToSql for CellData {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let json = serde_json::to_string(self)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(json))
    }
}

impl FromSql for CellData {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        serde_json::from_str(value.as_str()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// A cell value row. At most one exists per `(entity_id, attribute_id)` pair,
/// enforced by a unique compound index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellValue {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub attribute_id: Uuid,
    pub value: CellData,
}
