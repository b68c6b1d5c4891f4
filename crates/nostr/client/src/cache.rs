//! In-memory store of every event the pool has delivered.

use nostr::{Event, Filter, sort_events};
use std::collections::{HashMap, HashSet};

/// Append-only event store, indexed by kind, author and tag.
///
/// Events are keyed by id, so inserting an event twice keeps the first copy.
#[derive(Debug, Default, Clone)]
pub struct EventStore {
    /// Events by ID
    events: HashMap<String, Event>,
    /// Index by kind
    by_kind: HashMap<u16, HashSet<String>>,
    /// Index by author (pubkey)
    by_author: HashMap<String, HashSet<String>>,
    /// Index by tag name -> tag value -> event IDs
    by_tag: HashMap<String, HashMap<String, HashSet<String>>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event. Returns `false` if the id was already stored.
    pub fn insert(&mut self, event: Event) -> bool {
        if self.events.contains_key(&event.id) {
            return false;
        }

        let event_id = event.id.clone();

        self.by_kind
            .entry(event.kind)
            .or_default()
            .insert(event_id.clone());

        self.by_author
            .entry(event.pubkey.clone())
            .or_default()
            .insert(event_id.clone());

        for tag in &event.tags {
            if let [name, value, ..] = tag.as_slice() {
                self.by_tag
                    .entry(name.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_default()
                    .insert(event_id.clone());
            }
        }

        self.events.insert(event_id, event);
        true
    }

    pub fn get(&self, event_id: &str) -> Option<&Event> {
        self.events.get(event_id)
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.events.contains_key(event_id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drop every event and index entry.
    pub fn clear(&mut self) {
        self.events.clear();
        self.by_kind.clear();
        self.by_author.clear();
        self.by_tag.clear();
    }

    /// Events of a kind, newest first.
    pub fn by_kind(&self, kind: u16) -> Vec<Event> {
        self.collect(self.by_kind.get(&kind))
    }

    /// Events by an author, newest first.
    pub fn by_author(&self, pubkey: &str) -> Vec<Event> {
        self.collect(self.by_author.get(pubkey))
    }

    /// Events carrying a `[name, value, ..]` tag, newest first.
    pub fn filter_by_tag(&self, tag_name: &str, tag_value: &str) -> Vec<Event> {
        self.collect(
            self.by_tag
                .get(tag_name)
                .and_then(|values| values.get(tag_value)),
        )
    }

    /// Events with `created_at >= since`, newest first.
    pub fn filter_since(&self, since: u64) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .events
            .values()
            .filter(|e| e.created_at >= since)
            .cloned()
            .collect();
        sort_events(&mut events);
        events
    }

    /// Every stored event, newest first (ties broken by id).
    pub fn sort_by_recency(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.values().cloned().collect();
        sort_events(&mut events);
        events
    }

    /// Events matching a protocol filter, newest first. `limit` is honored.
    pub fn matching(&self, filter: &Filter) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        sort_events(&mut events);
        if let Some(limit) = filter.limit {
            events.truncate(limit as usize);
        }
        events
    }

    fn collect(&self, ids: Option<&HashSet<String>>) -> Vec<Event> {
        let mut events: Vec<Event> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.events.get(id).cloned())
            .collect();
        sort_events(&mut events);
        events
    }
}
