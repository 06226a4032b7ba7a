//! Reactive query layer: an observer registry keyed by table.
//!
//! A query is a pure read over the store. Subscribing installs a listener
//! for the tables the query touches; every committed write to one of those
//! tables re-runs the read and delivers the fresh result. Writes to other
//! tables never fire the listener. Delivery is synchronous after the write's
//! transaction commits and the connection lock is released, so a listener
//! re-reading the store always observes post-write state. All matching
//! listeners are notified; the order is unspecified.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::db::{Shared, TrackerDb};
use crate::error::TrackerError;

/// The four persistent tables observers can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Sheets,
    Attributes,
    Entities,
    CellValues,
}

impl Table {
    fn bit(self) -> u8 {
        match self {
            Table::Sheets => 1,
            Table::Attributes => 1 << 1,
            Table::Entities => 1 << 2,
            Table::CellValues => 1 << 3,
        }
    }
}

fn mask(tables: &[Table]) -> u8 {
    tables.iter().fold(0, |acc, t| acc | t.bit())
}

type Callback = Arc<dyn Fn(&[Table]) + Send + Sync>;

struct Listener {
    id: u64,
    mask: u8,
    callback: Callback,
}

/// Registry of table observers. Owned by the store; one per database handle.
#[derive(Default)]
pub(crate) struct ChangeBus {
    listeners: Mutex<Vec<Listener>>,
    next_id: AtomicU64,
}

impl ChangeBus {
    pub(crate) fn subscribe(&self, tables: &[Table], callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(Listener {
            id,
            mask: mask(tables),
            callback,
        });
        id
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.listeners.lock().retain(|l| l.id != id);
    }

    /// Notify every listener whose table set intersects `tables`.
    ///
    /// Callbacks are cloned out of the registry before invocation so a
    /// callback may subscribe, unsubscribe, or mutate the store without
    /// deadlocking the bus.
    pub(crate) fn publish(&self, tables: &[Table]) {
        let mask = mask(tables);
        let matching: Vec<Callback> = self
            .listeners
            .lock()
            .iter()
            .filter(|l| l.mask & mask != 0)
            .map(|l| Arc::clone(&l.callback))
            .collect();
        for callback in matching {
            callback(tables);
        }
    }
}

/// Handle for an installed observer. Dropping it removes the observer.
pub struct Subscription {
    shared: Weak<Shared>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.bus.unsubscribe(self.id);
        }
    }
}

/// A query result kept current by the observer registry.
/// `get` returns the most recently delivered value.
pub struct LiveQuery<T> {
    value: Arc<Mutex<T>>,
    _subscription: Subscription,
}

impl<T: Clone> LiveQuery<T> {
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }
}

impl TrackerDb {
    /// Install an observer for the given tables. The callback runs after
    /// every committed write touching at least one of them, with the set of
    /// changed tables as its argument.
    pub fn subscribe<F>(&self, tables: &[Table], callback: F) -> Subscription
    where
        F: Fn(&[Table]) + Send + Sync + 'static,
    {
        let id = self.shared.bus.subscribe(tables, Arc::new(callback));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Run `read` now and again after every committed write to `tables`,
    /// keeping the latest result available through [`LiveQuery::get`].
    ///
    /// A re-read that fails keeps the previous value and logs a warning;
    /// transient read errors must not masquerade as empty results.
    pub fn watch<T, F>(&self, tables: &[Table], read: F) -> Result<LiveQuery<T>, TrackerError>
    where
        T: Send + 'static,
        F: Fn(&TrackerDb) -> Result<T, TrackerError> + Send + Sync + 'static,
    {
        let value = Arc::new(Mutex::new(read(self)?));
        let slot = Arc::clone(&value);
        let weak = self.downgrade();
        let subscription = self.subscribe(tables, move |_changed| {
            let Some(db) = weak.upgrade() else { return };
            match read(&db) {
                Ok(fresh) => *slot.lock() = fresh,
                Err(e) => log::warn!("live query re-read failed, keeping previous value: {e}"),
            }
        });
        Ok(LiveQuery {
            value,
            _subscription: subscription,
        })
    }

    /// Notify observers of committed writes. Callers must have released the
    /// connection lock first.
    pub(crate) fn publish(&self, tables: &[Table]) {
        self.shared.bus.publish(tables);
    }
}

// =============================================================================
// Tests
// =============================================================================
