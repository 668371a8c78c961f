//! Shared, atomically replaced response attributes.

use apmkit_protocol::{AttributeUpdate, ResponseAttributes};
use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the attribute set currently in effect.
///
/// Readers get a whole `Arc` snapshot; writers publish a complete new set,
/// so a partially updated set is never observable.
#[derive(Debug)]
pub struct AttributeCell {
    current: RwLock<Arc<ResponseAttributes>>,
}

impl AttributeCell {
    /// Creates a cell holding `initial`.
    pub fn new(initial: ResponseAttributes) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Returns the current snapshot.
    pub fn load(&self) -> Arc<ResponseAttributes> {
        Arc::clone(&self.current.read())
    }

    /// Replaces the current set.
    pub fn publish(&self, attributes: ResponseAttributes) {
        *self.current.write() = Arc::new(attributes);
    }

    /// Merges `update` into the current set and publishes the result.
    pub fn apply(&self, update: &AttributeUpdate) -> Arc<ResponseAttributes> {
        let mut current = self.current.write();
        let merged = Arc::new(current.merged(update));
        *current = Arc::clone(&merged);
        merged
    }

    /// Publishes a copy of the current set with capture switched off.
    pub fn disable_capture(&self) {
        let mut current = self.current.write();
        *current = Arc::new(current.with_capture_disabled());
    }

    /// Whether capturing is currently enabled.
    pub fn is_capture_on(&self) -> bool {
        self.current.read().is_capture_on()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_are_not_affected_by_publish() {
        let cell = AttributeCell::new(ResponseAttributes::with_defaults(1));
        let before = cell.load();
        cell.apply(&AttributeUpdate::new().with_capture(false).with_multiplicity(5));

        assert!(before.is_capture_on());
        assert_eq!(before.multiplicity(), 1);
        assert!(!cell.is_capture_on());
        assert_eq!(cell.load().multiplicity(), 5);
    }

    #[test]
    fn disable_capture_keeps_other_fields() {
        let cell = AttributeCell::new(ResponseAttributes::with_defaults(4));
        cell.disable_capture();
        let attrs = cell.load();
        assert!(!attrs.is_capture_on());
        assert_eq!(attrs.server_id(), 4);
    }
}
