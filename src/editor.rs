//! Optimistic cell editing for one entity (row).
//!
//! The editor answers "what is this cell's current value" for a grid row
//! while writes are in flight: a pending overlay is consulted first, then the
//! last observed persisted values. The overlay is written synchronously by
//! [`CellEditor::update_cell`] before the store write is issued, rolled back
//! to the last persisted value if the write fails, and cleared wholesale
//! whenever the reactive layer delivers fresh persisted cell values.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::db::{CellData, TrackerDb};
use crate::error::TrackerError;
use crate::live::{Subscription, Table};

#[derive(Default)]
struct EditorState {
    /// Cell values as last observed in the store, keyed by attribute.
    persisted: HashMap<Uuid, CellData>,
    /// Pending values from writes that have not been observed back yet.
    overlay: HashMap<Uuid, CellData>,
}

/// Editing session for one entity's cells.
pub struct CellEditor {
    db: TrackerDb,
    entity_id: Uuid,
    state: Arc<Mutex<EditorState>>,
    _subscription: Subscription,
}

impl CellEditor {
    /// Open an editor for `entity_id`, loading its persisted cell values and
    /// subscribing to cell-value changes for the lifetime of the editor.
    pub fn new(db: &TrackerDb, entity_id: Uuid) -> Result<Self, TrackerError> {
        let state = Arc::new(Mutex::new(EditorState {
            persisted: load_persisted(db, entity_id)?,
            overlay: HashMap::new(),
        }));

        let slot = Arc::clone(&state);
        let weak = db.downgrade();
        let subscription = db.subscribe(&[Table::CellValues], move |_| {
            let Some(db) = weak.upgrade() else { return };
            match load_persisted(&db, entity_id) {
                Ok(fresh) => {
                    let mut state = slot.lock();
                    state.persisted = fresh;
                    // Persisted truth observed: the overlay has served its purpose.
                    state.overlay.clear();
                }
                Err(e) => log::warn!("cell editor refresh failed for entity {entity_id}: {e}"),
            }
        });

        Ok(Self {
            db: db.clone(),
            entity_id,
            state,
            _subscription: subscription,
        })
    }

    pub fn entity_id(&self) -> Uuid {
        self.entity_id
    }

    /// Current value for a cell: the most recently requested pending value,
    /// or the last persisted value, or `Null`.
    pub fn value(&self, attribute_id: Uuid) -> CellData {
        let state = self.state.lock();
        state
            .overlay
            .get(&attribute_id)
            .or_else(|| state.persisted.get(&attribute_id))
            .cloned()
            .unwrap_or(CellData::Null)
    }

    /// True while at least one write has not been confirmed back.
    pub fn is_pending(&self) -> bool {
        !self.state.lock().overlay.is_empty()
    }

    /// Write a cell value, optimistically.
    ///
    /// The pending value is visible to [`CellEditor::value`] before the store
    /// write settles. On success, convergence is left to the cell-value
    /// delivery that the committed write triggers. On failure, the pending
    /// entry rolls back to the last persisted value and the error propagates —
    /// the editor never retains a value the store rejected.
    pub fn update_cell(&self, attribute_id: Uuid, value: CellData) -> Result<(), TrackerError> {
        self.state.lock().overlay.insert(attribute_id, value.clone());

        match self.db.update_cell_value(self.entity_id, attribute_id, value) {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut state = self.state.lock();
                let previous = state
                    .persisted
                    .get(&attribute_id)
                    .cloned()
                    .unwrap_or(CellData::Null);
                state.overlay.insert(attribute_id, previous);
                Err(err)
            }
        }
    }
}

fn load_persisted(
    db: &TrackerDb,
    entity_id: Uuid,
) -> Result<HashMap<Uuid, CellData>, TrackerError> {
    Ok(db
        .get_cell_values_for_entity(entity_id)?
        .into_iter()
        .map(|cell| (cell.attribute_id, cell.value))
        .collect())
}

// =============================================================================
// Tests
// =============================================================================
