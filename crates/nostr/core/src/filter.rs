//! Subscription filters (NIP-01) and the tag-normalizing [`FilterBuilder`].
//!
//! Relays disagree on how tag filters are spelled: some want `#t`, some
//! index hashtags with the leading `#` kept in the value. The builder emits
//! one canonical shape for every relay:
//! - tag keys are always `#name`
//! - values are stripped of a leading `#`, and the `#`-prefixed variant is
//!   added alongside when the input was ambiguous (a `#` was present, or the
//!   tag is the hashtag tag `t`)
//! - `since` defaults to thirty days before now

use crate::nip01::{Event, unix_timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Default look-back window applied when no `since` is given.
pub const DEFAULT_LOOKBACK_SECS: u64 = 30 * 24 * 60 * 60;

/// Tag name used for hashtags.
pub const HASHTAG_TAG: &str = "t";

/// Errors that can occur while building a filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Filter for subscription requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Event IDs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Authors (pubkeys)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    /// Event kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Events since timestamp (inclusive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Events until timestamp (inclusive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    /// Maximum number of events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Generic tag queries keyed by `#name`
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    /// Create a new empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a raw tag filter. `key` may be given with or without `#`.
    pub fn tag(mut self, key: impl AsRef<str>, values: Vec<String>) -> Self {
        let key = key.as_ref();
        let key = key.strip_prefix('#').unwrap_or(key);
        self.tags.insert(format!("#{}", key), values);
        self
    }

    /// Filter by #p (pubkey reference) tags.
    pub fn pubkey_refs(self, pubkeys: Vec<String>) -> Self {
        self.tag("p", pubkeys)
    }

    /// Values requested for tag `name` (without `#`).
    pub fn tag_values(&self, name: &str) -> Option<&[String]> {
        self.tags.get(&format!("#{}", name)).map(Vec::as_slice)
    }

    /// Check whether an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&event.id)
        {
            return false;
        }

        if let Some(authors) = &self.authors
            && !authors.contains(&event.pubkey)
        {
            return false;
        }

        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }

        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }

        if let Some(until) = self.until
            && event.created_at > until
        {
            return false;
        }

        for (key, values) in &self.tags {
            let Some(name) = key.strip_prefix('#') else {
                continue;
            };
            let found = event.tags.iter().any(|tag| {
                tag.first().map(String::as_str) == Some(name)
                    && tag.get(1).is_some_and(|value| values.contains(value))
            });
            if !found {
                return false;
            }
        }

        true
    }

    /// OR semantics across a filter set.
    pub fn matches_any(filters: &[Filter], event: &Event) -> bool {
        filters.iter().any(|f| f.matches(event))
    }
}

/// Non-tag options for [`FilterBuilder`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u16>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<u64>,
}

/// Builds relay-agnostic filters from loosely formatted tag pairs.
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    pairs: Vec<(String, String)>,
    options: FilterOptions,
    now: Option<u64>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: FilterOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Add one `(key, value)` tag pair. Pairs with the same key are merged.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.options.kinds = Some(kinds);
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.options.authors = Some(authors);
        self
    }

    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.options.ids = Some(ids);
        self
    }

    /// Explicit lower bound; `since(0)` asks for the full history.
    pub fn since(mut self, timestamp: u64) -> Self {
        self.options.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.options.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.options.limit = Some(n);
        self
    }

    /// Override the clock used for the default `since`.
    pub fn now(mut self, timestamp: u64) -> Self {
        self.now = Some(timestamp);
        self
    }

    /// Normalize the collected pairs into a [`Filter`].
    pub fn build(self) -> Result<Filter, FilterError> {
        let mut tags: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (key, value) in &self.pairs {
            let name = canonical_tag_name(key)?;
            let variants = value_variants(name, value)?;

            let entry = tags.entry(format!("#{}", name)).or_default();
            for variant in variants {
                if !entry.contains(&variant) {
                    entry.push(variant);
                }
            }
        }

        let since = match self.options.since {
            Some(since) => since,
            None => self
                .now
                .unwrap_or_else(unix_timestamp)
                .saturating_sub(DEFAULT_LOOKBACK_SECS),
        };

        Ok(Filter {
            ids: self.options.ids,
            authors: self.options.authors,
            kinds: self.options.kinds,
            since: Some(since),
            until: self.options.until,
            limit: self.options.limit,
            tags,
        })
    }
}

/// Build a filter from `(key, value)` pairs and options in one call.
pub fn build_filter<K, V>(tag_pairs: &[(K, V)], options: FilterOptions) -> Result<Filter, FilterError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    tag_pairs
        .iter()
        .fold(FilterBuilder::with_options(options), |builder, (k, v)| {
            builder.tag(k.as_ref(), v.as_ref())
        })
        .build()
}

fn canonical_tag_name(key: &str) -> Result<&str, FilterError> {
    let name = key.strip_prefix('#').unwrap_or(key);
    if name.is_empty() {
        return Err(FilterError::InvalidFilter(format!(
            "tag key {:?} is empty",
            key
        )));
    }
    Ok(name)
}

fn value_variants(name: &str, value: &str) -> Result<Vec<String>, FilterError> {
    let (stripped, had_hash) = match value.strip_prefix('#') {
        Some(rest) => (rest, true),
        None => (value, false),
    };

    if stripped.is_empty() {
        return Err(FilterError::InvalidFilter(format!(
            "empty value for tag #{}",
            name
        )));
    }

    let mut variants = vec![stripped.to_string()];
    if had_hash || name == HASHTAG_TAG {
        variants.push(format!("#{}", stripped));
    }
    Ok(variants)
}
