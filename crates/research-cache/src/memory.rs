use async_trait::async_trait;
use dashmap::DashMap;
use research_core::ResearchError;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::{CacheStore, WindowState};

const DEFAULT_MAX_ENTRIES: usize = 10_000;

enum Value {
    Str(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
    Window(VecDeque<i64>),
}

struct Entry {
    value: Value,
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            expires_at: Some(now + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| Instant::now() >= t)
    }
}

fn wrong_type(key: &str) -> ResearchError {
    ResearchError::Cache(format!("WRONGTYPE operation against key {}", key))
}

/// In-process stand-in for Redis with per-key expiry and a size cap.
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    max_entries: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        before - self.entries.len()
    }

    /// Make room for one more key, dropping expired entries first and then the oldest.
    fn ensure_capacity(&self, key: &str) {
        if self.entries.contains_key(key) || self.entries.len() < self.max_entries {
            return;
        }
        self.purge_expired();
        if self.entries.len() < self.max_entries {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.inserted_at)
            .map(|e| e.key().clone());
        if let Some(oldest) = oldest {
            self.entries.remove(&oldest);
        }
    }

    fn drop_if_expired(&self, key: &str) {
        self.entries.remove_if(key, |_, e| e.is_expired());
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ResearchError> {
        self.drop_if_expired(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Str(s) => Ok(Some(s.clone())),
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ResearchError> {
        self.ensure_capacity(key);
        self.entries
            .insert(key.to_string(), Entry::new(Value::Str(value.to_string()), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ResearchError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn push_list(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ResearchError> {
        self.drop_if_expired(key);
        self.ensure_capacity(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::List(VecDeque::new()), ttl));
        match &mut entry.value {
            Value::List(items) => items.push_front(value.to_string()),
            _ => return Err(wrong_type(key)),
        }
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>, ResearchError> {
        self.drop_if_expired(key);
        match self.entries.get(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                Value::List(items) => Ok(items.iter().take(limit).cloned().collect()),
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn incr_float(&self, key: &str, by: f64, ttl: Duration) -> Result<f64, ResearchError> {
        self.drop_if_expired(key);
        self.ensure_capacity(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Str("0".to_string()), ttl));
        let next = match &entry.value {
            Value::Str(s) => {
                s.parse::<f64>()
                    .map_err(|_| ResearchError::Cache(format!("value at {} is not a float", key)))?
                    + by
            }
            _ => return Err(wrong_type(key)),
        };
        entry.value = Value::Str(next.to_string());
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(next)
    }

    async fn hash_incr(
        &self,
        key: &str,
        increments: &[(&str, f64)],
        ttl: Duration,
    ) -> Result<(), ResearchError> {
        self.drop_if_expired(key);
        self.ensure_capacity(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), ttl));
        match &mut entry.value {
            Value::Hash(fields) => {
                for (field, by) in increments {
                    let current = fields
                        .get(*field)
                        .and_then(|v| v.parse::<f64>().ok())
                        .unwrap_or(0.0);
                    fields.insert(field.to_string(), (current + by).to_string());
                }
            }
            _ => return Err(wrong_type(key)),
        }
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, ResearchError> {
        self.drop_if_expired(key);
        match self.entries.get(key) {
            None => Ok(HashMap::new()),
            Some(entry) => match &entry.value {
                Value::Hash(fields) => Ok(fields.clone()),
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn window_acquire(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        limit: usize,
    ) -> Result<WindowState, ResearchError> {
        self.drop_if_expired(key);
        self.ensure_capacity(key);
        let window_ms = window.as_millis() as i64;
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Window(VecDeque::new()), window));
        let Value::Window(hits) = &mut entry.value else {
            return Err(wrong_type(key));
        };

        while hits.front().is_some_and(|&t| t <= now_ms - window_ms) {
            hits.pop_front();
        }

        let allowed = hits.len() < limit;
        if allowed {
            hits.push_back(now_ms);
        }
        let state = WindowState {
            allowed,
            count: hits.len(),
            oldest_ms: hits.front().copied(),
        };
        entry.expires_at = Some(Instant::now() + window);
        Ok(state)
    }

    async fn ping(&self) -> Result<(), ResearchError> {
        Ok(())
    }
}
