// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parsed configuration: the immutable entry graph plus the interned
//! value table and precalc slots that make snapshot lookups O(1).
//!
//! A [`ParsedConfig`] is cheap to clone (the heavy state sits behind an
//! `Arc`); only the fetch timestamp lives outside it so a 304 revalidation
//! can refresh the timestamp without rebuilding entries or dropping the
//! compiled evaluator cache.

use crate::eval::EvalSet;
use crate::keys::{self, KeyId};
use crate::overrides::{FlagOverrides, OverrideBehavior};
use crate::wire::{
    Comparator, EntryNode, PercentageRuleNode, RedirectKind, RolloutRuleNode, RootNode, SettingType,
    Value,
};
use chrono::{DateTime, Utc};
use fdk_error::{ErrorKind, FlagError};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One flag definition after parse fixups.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Process-wide identifier of the flag key.
    pub key_id: KeyId,
    /// Declared (or inferred) type of the flag.
    pub setting_type: SettingType,
    /// Default value.
    pub value: Value,
    /// Interned identifier of the default value.
    pub value_id: u32,
    /// Variation identifier of the default value.
    pub variation_id: String,
    /// Attribute-gated rules in declaration order.
    pub rollout_rules: Vec<RolloutRule>,
    /// Percentage-bucketing rules in declaration order.
    pub percentage_rules: Vec<PercentageRule>,
}

impl Entry {
    /// Whether any targeting rule applies to this entry.
    #[must_use]
    pub fn has_rules(&self) -> bool {
        !self.rollout_rules.is_empty() || !self.percentage_rules.is_empty()
    }
}

/// One attribute-gated rule after fixups.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutRule {
    /// User attribute the rule compares against.
    pub attribute: String,
    /// Comparison operator.
    pub comparator: Comparator,
    /// Raw comparison value from the wire.
    pub comparison: String,
    /// Value served on match.
    pub value: Value,
    /// Interned identifier of the served value.
    pub value_id: u32,
    /// Variation identifier of the served value.
    pub variation_id: String,
}

/// One percentage rule after fixups.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentageRule {
    /// Percentage share, 0–100.
    pub percentage: i64,
    /// Value served when the bucket lands in this rule.
    pub value: Value,
    /// Interned identifier of the served value.
    pub value_id: u32,
    /// Variation identifier of the served value.
    pub variation_id: String,
}

/// Decoded preferences block.
#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    /// Preferred CDN base URL.
    pub url: String,
    /// Redirect directive.
    pub redirect: RedirectKind,
}

// ---------------------------------------------------------------------------
// Interner
// ---------------------------------------------------------------------------

/// Hashable identity of a flag value (floats by bit pattern).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

impl ValueKey {
    fn of(value: &Value) -> Self {
        match value {
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(n) => Self::Int(*n),
            Value::Float(f) => Self::Float(f.to_bits()),
            Value::String(s) => Self::Str(s.clone()),
        }
    }
}

#[derive(Default)]
struct ValueInterner {
    ids: HashMap<ValueKey, u32>,
    values: Vec<Value>,
}

impl ValueInterner {
    /// Intern `value`, returning its dense identifier (>= 1).
    fn intern(&mut self, value: &Value) -> u32 {
        let key = ValueKey::of(value);
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        self.values.push(value.clone());
        let id = u32::try_from(self.values.len()).expect("value table exhausted");
        self.ids.insert(key, id);
        id
    }
}

// ---------------------------------------------------------------------------
// ParsedConfig
// ---------------------------------------------------------------------------

pub(crate) type EvalSlot = Result<Arc<EvalSet>, Arc<FlagError>>;

pub(crate) struct ConfigInner {
    pub(crate) entries: HashMap<String, Entry>,
    pub(crate) body: Vec<u8>,
    pub(crate) etag: Option<String>,
    pub(crate) values: Vec<Value>,
    /// Indexed by [`KeyId`]: `0` = key absent from this config, positive =
    /// direct value id (entry has no rules), negative = memo slot `-(n)`.
    pub(crate) precalc: Vec<i32>,
    pub(crate) keys_with_rules: usize,
    pub(crate) preferences: Option<Preferences>,
    pub(crate) evaluators: RwLock<HashMap<TypeId, EvalSlot>>,
}

impl std::fmt::Debug for ConfigInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigInner")
            .field("entries", &self.entries.len())
            .field("etag", &self.etag)
            .field("values", &self.values.len())
            .field("keys_with_rules", &self.keys_with_rules)
            .field("preferences", &self.preferences)
            .finish_non_exhaustive()
    }
}

/// An immutable parsed configuration.
#[derive(Debug, Clone)]
pub struct ParsedConfig {
    inner: Arc<ConfigInner>,
    fetch_time: DateTime<Utc>,
}

impl ParsedConfig {
    /// Decode and fix up a raw configuration body.
    ///
    /// Overrides (when supplied) mutate the decoded entry set before
    /// interning and precalculation, so evaluators only ever see the
    /// merged view.
    pub fn parse(
        body: &[u8],
        etag: Option<String>,
        fetch_time: DateTime<Utc>,
        overrides: Option<&FlagOverrides>,
    ) -> Result<Self, FlagError> {
        let root: RootNode = serde_json::from_slice(body).map_err(|e| {
            FlagError::new(ErrorKind::MalformedConfig, "failed to decode configuration")
                .with_source(e)
        })?;

        let mut entries = root.entries;
        if let Some(ov) = overrides {
            ov.apply(&mut entries);
        }

        let preferences = match root.preferences {
            None => None,
            Some(node) => {
                let redirect = node.redirect;
                let url = node.url.unwrap_or_default();
                match redirect {
                    None => None,
                    Some(_) if url.is_empty() => {
                        // A redirect directive without a target is unusable.
                        return Err(FlagError::new(
                            ErrorKind::MalformedConfig,
                            "preferences carry a redirect directive but no URL",
                        ));
                    }
                    Some(kind) => Some(Preferences { url, redirect: kind }),
                }
            }
        };

        Self::build(entries, body.to_vec(), etag, fetch_time, preferences)
    }

    /// An entry-less configuration, used when no fetch has succeeded
    /// yet but a snapshot is still needed.
    #[must_use]
    pub fn empty(fetch_time: DateTime<Utc>) -> Self {
        Self::build(HashMap::new(), b"{}".to_vec(), None, fetch_time, None)
            .expect("an empty configuration always builds")
    }

    /// Construct a configuration purely from a local override set.
    pub fn from_overrides(
        overrides: &FlagOverrides,
        fetch_time: DateTime<Utc>,
    ) -> Result<Self, FlagError> {
        debug_assert_eq!(overrides.behavior(), OverrideBehavior::LocalOnly);
        let entries = overrides.entry_nodes().clone();
        let body = canonical_body(&entries);
        Self::build(entries, body, None, fetch_time, None)
    }

    fn build(
        nodes: HashMap<String, EntryNode>,
        body: Vec<u8>,
        etag: Option<String>,
        fetch_time: DateTime<Utc>,
        preferences: Option<Preferences>,
    ) -> Result<Self, FlagError> {
        let mut interner = ValueInterner::default();
        let mut entries = HashMap::with_capacity(nodes.len());

        // Walk keys in sorted order so value and slot assignment is
        // deterministic for a given body.
        let mut names: Vec<&str> = nodes.keys().map(String::as_str).collect();
        names.sort_unstable();

        for name in &names {
            let node = &nodes[*name];
            let entry = build_entry(name, node, &mut interner)?;
            entries.insert((*name).to_string(), entry);
        }

        let mut precalc = vec![0i32; keys::count()];
        let mut keys_with_rules = 0usize;
        for name in &names {
            let entry: &Entry = &entries[*name];
            let idx = entry.key_id.index();
            if entry.has_rules() {
                keys_with_rules += 1;
                precalc[idx] = -i32::try_from(keys_with_rules).expect("slot overflow");
            } else {
                precalc[idx] = i32::try_from(entry.value_id).expect("value id overflow");
            }
        }

        Ok(Self {
            inner: Arc::new(ConfigInner {
                entries,
                body,
                etag,
                values: interner.values,
                precalc,
                keys_with_rules,
                preferences,
                evaluators: RwLock::new(HashMap::new()),
            }),
            fetch_time,
        })
    }

    /// The decoded entry map.
    #[must_use]
    pub fn entries(&self) -> &HashMap<String, Entry> {
        &self.inner.entries
    }

    /// Look up one entry by key.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.inner.entries.get(key)
    }

    /// The raw JSON body this configuration was parsed from.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.inner.body
    }

    /// The opaque HTTP validator captured with the body.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.inner.etag.as_deref()
    }

    /// When this configuration was fetched (or loaded from cache).
    #[must_use]
    pub fn fetch_time(&self) -> DateTime<Utc> {
        self.fetch_time
    }

    /// The decoded preferences block, if the document carried one.
    #[must_use]
    pub fn preferences(&self) -> Option<&Preferences> {
        self.inner.preferences.as_ref()
    }

    /// A view of the same configuration with a newer fetch timestamp.
    ///
    /// Shares entries, the value table, and compiled evaluators.
    #[must_use]
    pub fn with_fetch_time(&self, fetch_time: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            fetch_time,
        }
    }

    /// Two configurations are content-equal iff their bodies are
    /// byte-equal.
    #[must_use]
    pub fn content_equals(&self, other: &Self) -> bool {
        self.inner.body == other.inner.body
    }

    /// Number of keys that carry targeting rules (memo slab size).
    #[must_use]
    pub fn keys_with_rules(&self) -> usize {
        self.inner.keys_with_rules
    }

    pub(crate) fn inner(&self) -> &ConfigInner {
        &self.inner
    }

    /// Precalc slot for `key`: `0` when the key is absent here.
    pub(crate) fn precalc(&self, key: KeyId) -> i32 {
        self.inner.precalc.get(key.index()).copied().unwrap_or(0)
    }

    /// Resolve an interned value identifier.
    pub(crate) fn value_by_id(&self, id: u32) -> Option<&Value> {
        if id == 0 {
            return None;
        }
        self.inner.values.get(id as usize - 1)
    }
}

fn build_entry(
    key: &str,
    node: &EntryNode,
    interner: &mut ValueInterner,
) -> Result<Entry, FlagError> {
    let declared = node.setting_type;
    let value = Value::from_json(&node.value, declared).ok_or_else(|| {
        FlagError::new(
            ErrorKind::MalformedConfig,
            format!("flag {key:?} has an unsupported value shape"),
        )
    })?;
    let setting_type = declared.unwrap_or_else(|| value.setting_type());
    let value_id = interner.intern(&value);

    let mut rollout_rules = Vec::with_capacity(node.rollout_rules.len());
    for rule in &node.rollout_rules {
        rollout_rules.push(build_rollout_rule(key, rule, setting_type, interner)?);
    }

    let mut percentage_rules = Vec::with_capacity(node.percentage_rules.len());
    for rule in &node.percentage_rules {
        percentage_rules.push(build_percentage_rule(key, rule, setting_type, interner)?);
    }

    Ok(Entry {
        key_id: keys::intern(key),
        setting_type,
        value,
        value_id,
        variation_id: node.variation_id.clone(),
        rollout_rules,
        percentage_rules,
    })
}

fn build_rollout_rule(
    key: &str,
    node: &RolloutRuleNode,
    setting_type: SettingType,
    interner: &mut ValueInterner,
) -> Result<RolloutRule, FlagError> {
    let value = Value::from_json(&node.value, Some(setting_type)).ok_or_else(|| {
        FlagError::new(
            ErrorKind::MalformedConfig,
            format!("flag {key:?} has a rule with an unsupported value shape"),
        )
    })?;
    let value_id = interner.intern(&value);
    Ok(RolloutRule {
        attribute: node.attribute.clone(),
        comparator: node.comparator,
        comparison: node.comparison.clone(),
        value,
        value_id,
        variation_id: node.variation_id.clone(),
    })
}

fn build_percentage_rule(
    key: &str,
    node: &PercentageRuleNode,
    setting_type: SettingType,
    interner: &mut ValueInterner,
) -> Result<PercentageRule, FlagError> {
    let value = Value::from_json(&node.value, Some(setting_type)).ok_or_else(|| {
        FlagError::new(
            ErrorKind::MalformedConfig,
            format!("flag {key:?} has a percentage rule with an unsupported value shape"),
        )
    })?;
    let value_id = interner.intern(&value);
    Ok(PercentageRule {
        percentage: node.percentage,
        value,
        value_id,
        variation_id: node.variation_id.clone(),
    })
}

/// Serialize an entry map with sorted keys so repeated construction
/// from the same overrides yields a byte-identical body.
fn canonical_body(entries: &HashMap<String, EntryNode>) -> Vec<u8> {
    let mut names: Vec<&String> = entries.keys().collect();
    names.sort();
    let mut map = serde_json::Map::new();
    for name in names {
        if let Ok(node) = serde_json::to_value(&entries[name]) {
            map.insert(name.clone(), node);
        }
    }
    let root = serde_json::json!({ "f": serde_json::Value::Object(map) });
    serde_json::to_vec(&root).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
