//! Ticker symbol normalization and validation.
//!
//! Symbols are checked against per-exchange formats and a blacklist, and
//! symbols that keep failing upstream lookups are demoted to `Failed` so
//! callers stop hammering the data provider with them.

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::ResearchError;

const MAX_SYMBOL_LEN: usize = 10;
const DEFAULT_MAX_ERRORS: u32 = 5;
const FAILED_RECHECK_HOURS: i64 = 24;
const DEFAULT_MAX_ENTRIES: usize = 10_000;

const DEFAULT_BLACKLIST: &[&str] = &[
    "", "NULL", "NONE", "N/A", "TEST", "DUMMY", "FAKE", "GMEQ", "BBBYQ",
];

static ALLOWED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9.\-]+$").expect("valid regex"));

static EXCHANGE_PATTERNS: LazyLock<Vec<(Exchange, Regex)>> = LazyLock::new(|| {
    [
        (Exchange::Us, r"^[A-Z]{1,5}$"),
        // Share classes as Yahoo spells them (BRK-B)
        (Exchange::Us, r"^[A-Z]{1,4}-[A-Z]$"),
        (Exchange::Lse, r"^[A-Z]{1,4}\.L$"),
        (Exchange::Tse, r"^[A-Z0-9]{4}\.T$"),
        (Exchange::Hkex, r"^[0-9]{4}\.HK$"),
        (Exchange::Sse, r"^[0-9]{6}\.SS$"),
        (Exchange::Szse, r"^[0-9]{6}\.SZ$"),
    ]
    .into_iter()
    .map(|(exchange, pattern)| (exchange, Regex::new(pattern).expect("valid regex")))
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Us,
    Lse,
    Tse,
    Hkex,
    Sse,
    Szse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    Valid,
    Invalid,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: SymbolStatus,
    pub exchange: Option<Exchange>,
    pub last_checked: DateTime<Utc>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SymbolStats {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub failed: usize,
    pub blacklisted: usize,
}

pub struct SymbolValidator {
    cache: DashMap<String, SymbolInfo>,
    blacklist: DashSet<String>,
    max_error_count: u32,
    max_entries: usize,
}

impl Default for SymbolValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolValidator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    /// Validator remembering at most `max_entries` symbols.
    pub fn with_capacity(max_entries: usize) -> Self {
        let blacklist = DashSet::new();
        for s in DEFAULT_BLACKLIST {
            blacklist.insert(s.to_string());
        }
        Self {
            cache: DashMap::new(),
            blacklist,
            max_error_count: DEFAULT_MAX_ERRORS,
            max_entries: max_entries.max(1),
        }
    }

    /// Make room for `symbol`, dropping format rejections first and then the oldest verdict.
    fn ensure_capacity(&self, symbol: &str) {
        if self.cache.contains_key(symbol) || self.cache.len() < self.max_entries {
            return;
        }
        self.cache.retain(|_, info| info.status != SymbolStatus::Invalid);
        if self.cache.len() < self.max_entries {
            return;
        }
        let oldest = self
            .cache
            .iter()
            .min_by_key(|e| e.last_checked)
            .map(|e| e.key().clone());
        if let Some(oldest) = oldest {
            self.cache.remove(&oldest);
        }
    }

    /// Trim, uppercase and drop redundant US suffixes.
    pub fn normalize(raw: &str) -> String {
        let mut symbol = raw.trim().to_uppercase();
        for suffix in [".USA", ".US", " US"] {
            if let Some(stripped) = symbol.strip_suffix(suffix) {
                symbol = stripped.trim_end().to_string();
                break;
            }
        }
        symbol
    }

    pub fn detect_exchange(symbol: &str) -> Option<Exchange> {
        EXCHANGE_PATTERNS
            .iter()
            .find(|(_, re)| re.is_match(symbol))
            .map(|(exchange, _)| *exchange)
    }

    /// Format checks only, no upstream knowledge. Expects a normalized symbol.
    pub fn check_format(&self, symbol: &str) -> Result<Exchange, String> {
        if symbol.is_empty() {
            return Err("Empty symbol".to_string());
        }
        if self.blacklist.contains(symbol) {
            return Err(format!("Symbol {} is blacklisted", symbol));
        }
        if symbol.len() > MAX_SYMBOL_LEN {
            return Err(format!("Symbol longer than {} characters", MAX_SYMBOL_LEN));
        }
        if !ALLOWED_CHARS.is_match(symbol) {
            return Err("Symbol contains invalid characters".to_string());
        }
        Self::detect_exchange(symbol).ok_or_else(|| "Unrecognized symbol format".to_string())
    }

    /// Normalize and validate, returning the canonical symbol.
    pub fn validate(&self, raw: &str) -> Result<String, ResearchError> {
        let symbol = Self::normalize(raw);
        let info = self.info(&symbol);
        match info.status {
            SymbolStatus::Valid => Ok(symbol),
            SymbolStatus::Invalid | SymbolStatus::Failed => Err(ResearchError::InvalidSymbol(
                info.last_error
                    .map(|e| format!("{}: {}", symbol, e))
                    .unwrap_or(symbol),
            )),
        }
    }

    /// Current knowledge about a symbol, running the format check when the
    /// cached entry is missing or a failed entry is due for a recheck.
    pub fn info(&self, raw: &str) -> SymbolInfo {
        let symbol = Self::normalize(raw);
        let now = Utc::now();

        if let Some(cached) = self.cache.get(&symbol) {
            let recheck = cached.status == SymbolStatus::Failed
                && now - cached.last_checked > Duration::hours(FAILED_RECHECK_HOURS);
            // Blacklist changes invalidate cached verdicts
            let blacklisted = self.blacklist.contains(&symbol);
            if !recheck && (cached.status != SymbolStatus::Valid || !blacklisted) {
                return cached.clone();
            }
        }

        let info = match self.check_format(&symbol) {
            Ok(exchange) => SymbolInfo {
                symbol: symbol.clone(),
                status: SymbolStatus::Valid,
                exchange: Some(exchange),
                last_checked: now,
                error_count: 0,
                last_error: None,
            },
            Err(reason) => SymbolInfo {
                symbol: symbol.clone(),
                status: SymbolStatus::Invalid,
                exchange: None,
                last_checked: now,
                error_count: 0,
                last_error: Some(reason),
            },
        };
        // Arbitrary request strings must not pile up in the map
        if symbol.len() <= MAX_SYMBOL_LEN {
            self.ensure_capacity(&symbol);
            self.cache.insert(symbol, info.clone());
        }
        info
    }

    pub fn record_fetch_error(&self, raw: &str, error: &str) {
        let symbol = Self::normalize(raw);
        let now = Utc::now();
        self.ensure_capacity(&symbol);
        let mut entry = self.cache.entry(symbol.clone()).or_insert_with(|| SymbolInfo {
            symbol: symbol.clone(),
            status: SymbolStatus::Valid,
            exchange: Self::detect_exchange(&symbol),
            last_checked: now,
            error_count: 0,
            last_error: None,
        });
        entry.error_count += 1;
        entry.last_error = Some(error.to_string());
        entry.last_checked = now;
        if entry.error_count >= self.max_error_count && entry.status != SymbolStatus::Failed {
            entry.status = SymbolStatus::Failed;
            tracing::warn!(
                "Symbol {} marked as failed after {} errors: {}",
                symbol,
                entry.error_count,
                error
            );
        }
    }

    pub fn record_fetch_success(&self, raw: &str) {
        let symbol = Self::normalize(raw);
        if let Some(mut entry) = self.cache.get_mut(&symbol) {
            entry.status = SymbolStatus::Valid;
            entry.error_count = 0;
            entry.last_error = None;
            entry.last_checked = Utc::now();
        }
    }

    pub fn add_to_blacklist(&self, raw: &str) {
        let symbol = Self::normalize(raw);
        tracing::info!("Blacklisting symbol {}", symbol);
        self.cache.remove(&symbol);
        self.blacklist.insert(symbol);
    }

    pub fn remove_from_blacklist(&self, raw: &str) {
        let symbol = Self::normalize(raw);
        self.cache.remove(&symbol);
        self.blacklist.remove(&symbol);
    }

    pub fn stats(&self) -> SymbolStats {
        let mut stats = SymbolStats {
            total: self.cache.len(),
            blacklisted: self.blacklist.len(),
            ..Default::default()
        };
        for entry in self.cache.iter() {
            match entry.status {
                SymbolStatus::Valid => stats.valid += 1,
                SymbolStatus::Invalid => stats.invalid += 1,
                SymbolStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Forget failed symbols last checked more than `max_age` ago.
    pub fn cleanup_failed(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.cache.len();
        self.cache
            .retain(|_, info| !(info.status == SymbolStatus::Failed && info.last_checked < cutoff));
        before - self.cache.len()
    }
}
