//! Client-side reconciliation store
//!
//! A normalized cache of one entity kind keyed by id. Snapshots (pull) replace
//! the whole map; change notifications (push) upsert or remove single keys.
//! Arrival order decides: the last write for a key wins, and a push for a key
//! that was never pulled is accepted as-is.
//!
//! The store does no I/O. Callers feed it snapshots and envelopes.

use crate::envelope::Change;
use fishlog_core::models::Entity;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationStore<E: Entity> {
    items: HashMap<String, E>,
    /// May point at an id that is no longer in `items`
    selected_id: Option<String>,
    loading: bool,
    error: Option<String>,
}

impl<E: Entity> Default for ReconciliationStore<E> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            selected_id: None,
            loading: false,
            error: None,
        }
    }
}

impl<E: Entity> ReconciliationStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every item with a freshly pulled snapshot
    ///
    /// The selection is left alone.
    pub fn set_items(&mut self, entities: impl IntoIterator<Item = E>) {
        self.items = entities
            .into_iter()
            .map(|entity| (entity.id().to_string(), entity))
            .collect();
    }

    /// Insert or replace one item
    pub fn upsert(&mut self, entity: E) {
        self.items.insert(entity.id().to_string(), entity);
    }

    /// Remove one item, clearing the selection if it pointed at it
    pub fn remove(&mut self, id: &str) -> Option<E> {
        if self.selected_id.as_deref() == Some(id) {
            self.selected_id = None;
        }
        self.items.remove(id)
    }

    pub fn set_selected_id(&mut self, id: Option<String>) {
        self.selected_id = id;
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Merge one pushed change
    pub fn apply(&mut self, change: Change<E>) {
        match change {
            Change::Created(entity) | Change::Updated(entity) => self.upsert(entity),
            Change::Deleted(entity_ref) => {
                self.remove(&entity_ref.id);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &HashMap<String, E> {
        &self.items
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected_id.as_deref()
    }

    /// The selected entity, if it is still present
    pub fn selected(&self) -> Option<&E> {
        self.selected_id.as_deref().and_then(|id| self.items.get(id))
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// All items in the entity's display order
    pub fn sorted(&self) -> Vec<&E> {
        self.sorted_by(E::display_order)
    }

    /// All items ordered by `compare`, ties broken by id
    pub fn sorted_by<F>(&self, compare: F) -> Vec<&E>
    where
        F: Fn(&E, &E) -> Ordering,
    {
        let mut items: Vec<&E> = self.items.values().collect();
        items.sort_by(|a, b| compare(a, b).then_with(|| a.id().cmp(b.id())));
        items
    }
}
