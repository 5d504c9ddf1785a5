//! Spaced-repetition scheduling of missed concept terms.
//!
//! Missed terms are stored with a due time. Each later review that covers the
//! term pushes the due time further out; three successful reviews retire it.
//! Missing it again shortens the interval.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::traits::KeyValueStore;

/// Store key holding the serialized item list.
pub const REVIEW_STORE_KEY: &str = "concept_spaced_repetition_v1";

/// Successful reviews after which a term is retired.
pub const RETIRE_AFTER: u32 = 3;

const BASE_INTERVAL_HOURS: i64 = 12;
const GROWTH: f64 = 1.8;

/// A term scheduled for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpacedItem {
    pub term: String,
    pub last_seen: DateTime<Utc>,
    pub reviews: u32,
    pub next_due: DateTime<Utc>,
}

/// Delay before the next review: 12h x max(1, 1.8^reviews).
pub fn review_interval(reviews: u32) -> Duration {
    let base_ms = (BASE_INTERVAL_HOURS * 60 * 60 * 1000) as f64;
    let factor = GROWTH.powi(reviews as i32).max(1.0);
    Duration::milliseconds((base_ms * factor).round() as i64)
}

/// Schedules review of concept terms, persisted through a [`KeyValueStore`].
pub struct ReviewScheduler<S> {
    store: S,
}

impl<S: KeyValueStore> ReviewScheduler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// All scheduled items. Unreadable stored content reads as empty.
    pub fn items(&self) -> Vec<SpacedItem> {
        let raw = match self.store.get(REVIEW_STORE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read review store");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "ignoring malformed review data");
            Vec::new()
        })
    }

    fn save(&self, items: &[SpacedItem]) {
        let result = serde_json::to_string(items)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.store.set(REVIEW_STORE_KEY, &raw));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist review schedule");
        }
    }

    /// Schedule newly missed terms and shorten the interval of known ones.
    pub fn record_missed(&self, terms: &[String], now: DateTime<Utc>) {
        if terms.is_empty() {
            return;
        }
        let mut items = self.items();
        for term in terms {
            match items.iter_mut().find(|i| &i.term == term) {
                Some(item) => {
                    item.reviews = item.reviews.saturating_sub(1);
                    item.last_seen = now;
                    item.next_due = now + review_interval(item.reviews);
                }
                None => items.push(SpacedItem {
                    term: term.clone(),
                    last_seen: now,
                    reviews: 0,
                    next_due: now + review_interval(0),
                }),
            }
        }
        self.save(&items);
    }

    /// Reinforce known terms that were covered. Unknown terms are ignored.
    pub fn record_covered(&self, terms: &[String], now: DateTime<Utc>) {
        if terms.is_empty() {
            return;
        }
        let mut items = self.items();
        for term in terms {
            if let Some(item) = items.iter_mut().find(|i| &i.term == term) {
                item.reviews += 1;
                item.last_seen = now;
                item.next_due = now + review_interval(item.reviews);
            }
        }
        items.retain(|i| i.reviews < RETIRE_AFTER);
        self.save(&items);
    }

    /// Items due at `now`, earliest first.
    pub fn due_terms(&self, now: DateTime<Utc>) -> Vec<SpacedItem> {
        let mut due: Vec<SpacedItem> = self
            .items()
            .into_iter()
            .filter(|i| i.next_due <= now)
            .collect();
        due.sort_by_key(|i| i.next_due);
        due
    }

    pub fn clear(&self) {
        self.save(&[]);
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }

    fn write(&self, entries: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.get(key).and_then(|v| v.as_str()).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.read()?;
        entries.insert(key.to_string(), Value::String(value.to_string()));
        self.write(&entries)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.read()?;
        if entries.remove(key).is_some() {
            self.write(&entries)?;
        }
        Ok(())
    }
}
