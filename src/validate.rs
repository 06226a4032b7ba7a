//! Refinement rules for entity records.
//!
//! Plain predicate functions shared by live writes and backup restore. Each
//! returns `Err(TrackerError::Validation)` with a message naming the rule
//! that failed; callers reject before touching the store.

use std::collections::HashSet;

use crate::backup::BackupDocument;
use crate::db::{Attribute, AttributeType, Entity, Sheet};
use crate::error::TrackerError;

const SHEET_NAME_MAX: usize = 100;
const ATTRIBUTE_NAME_MAX: usize = 50;
const ENTITY_NAME_MAX: usize = 100;

fn name_in_range(
    what: &str,
    name: &str,
    max: usize,
) -> Result<(), TrackerError> {
    if name.is_empty() {
        return Err(TrackerError::validation(format!("{what} name must not be empty")));
    }
    if name.chars().count() > max {
        return Err(TrackerError::validation(format!(
            "{what} name exceeds {max} characters"
        )));
    }
    Ok(())
}

pub fn sheet_name(name: &str) -> Result<(), TrackerError> {
    name_in_range("sheet", name, SHEET_NAME_MAX)
}

pub fn attribute_name(name: &str) -> Result<(), TrackerError> {
    name_in_range("attribute", name, ATTRIBUTE_NAME_MAX)
}

pub fn entity_name(name: &str) -> Result<(), TrackerError> {
    name_in_range("entity", name, ENTITY_NAME_MAX)
}

pub fn sheet(sheet: &Sheet) -> Result<(), TrackerError> {
    sheet_name(&sheet.name)
}

pub fn entity(entity: &Entity) -> Result<(), TrackerError> {
    entity_name(&entity.name)
}

/// Structural rules plus the per-type refinements: a boolean-currency column
/// carries a positive finite currency value, a dropdown carries a non-empty
/// option list of non-empty strings.
pub fn attribute(attribute: &Attribute) -> Result<(), TrackerError> {
    attribute_name(&attribute.name)?;

    if attribute.kind == AttributeType::BooleanCurrency {
        match attribute.currency_value {
            Some(v) if v.is_finite() && v > 0.0 => {}
            Some(_) => {
                return Err(TrackerError::validation(
                    "boolean-currency attribute requires a positive currency value",
                ))
            }
            None => {
                return Err(TrackerError::validation(
                    "boolean-currency attribute requires a currency value",
                ))
            }
        }
    }

    if attribute.kind == AttributeType::Dropdown {
        match &attribute.options {
            Some(options) if !options.is_empty() => {
                if options.iter().any(|o| o.is_empty()) {
                    return Err(TrackerError::validation(
                        "dropdown options must not contain empty strings",
                    ));
                }
            }
            _ => {
                return Err(TrackerError::validation(
                    "dropdown attribute requires at least one option",
                ))
            }
        }
    }

    Ok(())
}

/// Validate an entire backup document before restore touches the store.
///
/// Checks the envelope (positive version), every record against the live
/// write rules, and the at-most-one-cell-per-pair invariant.
pub fn backup(doc: &BackupDocument) -> Result<(), TrackerError> {
    if doc.version == 0 {
        return Err(TrackerError::validation("backup version must be positive"));
    }

    for s in &doc.sheets {
        sheet(s)?;
    }
    for a in &doc.attributes {
        attribute(a)?;
    }
    for e in &doc.entities {
        entity(e)?;
    }

    let mut pairs = HashSet::new();
    for cell in &doc.cell_values {
        if !pairs.insert((cell.entity_id, cell.attribute_id)) {
            return Err(TrackerError::validation(format!(
                "duplicate cell value for entity {} attribute {}",
                cell.entity_id, cell.attribute_id
            )));
        }
    }

    Ok(())
}
