// SPDX-License-Identifier: MIT OR Apache-2.0
//! Immutable per-user views over a parsed configuration.
//!
//! A snapshot pins one configuration and one user; its observable
//! outputs never change after construction. Keys with targeting rules
//! memoize their first computed value identifier in a lazily allocated
//! slab of atomic slots (any racing writer publishes the same value,
//! because both inputs are frozen). Memoization is skipped while info
//! logging is enabled so every evaluation is logged.

use crate::config::{Entry, ParsedConfig, PercentageRule, RolloutRule};
use crate::eval::{self, EvalOutcome, EvalSet};
use crate::keys::{self, KeyId};
use crate::log::{ClientLogger, LogLevel};
use crate::user::UserHandle;
use crate::wire::Value;
use chrono::{DateTime, Utc};
use fdk_error::{ErrorKind, FlagError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

// ---------------------------------------------------------------------------
// EvaluationDetails
// ---------------------------------------------------------------------------

/// Everything known about one flag evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationDetails {
    /// The queried flag key.
    pub key: String,
    /// The evaluated value; `None` when evaluation failed or the value
    /// did not match the requested type.
    pub value: Option<Value>,
    /// Variation identifier of the served branch ("" when unknown).
    pub variation_id: String,
    /// Whether the caller's default was served instead of an evaluated
    /// value.
    pub is_default_value: bool,
    /// Short description of the bound user, when one was supplied.
    pub user: Option<String>,
    /// Rendered error, when evaluation failed.
    pub error: Option<String>,
    /// The rollout rule that matched, if any.
    pub matched_rollout_rule: Option<RolloutRule>,
    /// The percentage rule that matched, if any.
    pub matched_percentage_rule: Option<PercentageRule>,
    /// When the underlying configuration was fetched.
    pub fetch_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable view binding a configuration to a user.
pub struct Snapshot {
    config: ParsedConfig,
    user: Option<UserHandle>,
    logger: ClientLogger,
    evals: Result<Arc<EvalSet>, Arc<FlagError>>,
    memo: OnceLock<Box<[AtomicU32]>>,
}

impl Snapshot {
    /// Bind `config` to `user`.
    ///
    /// Building the evaluator set for a user type that declares
    /// conflicting attribute fields fails here; the error is logged
    /// once and every lookup through this snapshot serves defaults.
    #[must_use]
    pub fn new(config: ParsedConfig, user: Option<UserHandle>, logger: ClientLogger) -> Self {
        let evals = eval::eval_set_for(&config, user.as_ref());
        if let Err(err) = &evals {
            logger.error(err);
        }
        Self {
            config,
            user,
            logger,
            evals,
            memo: OnceLock::new(),
        }
    }

    /// The configuration this snapshot reads from.
    #[must_use]
    pub fn config(&self) -> &ParsedConfig {
        &self.config
    }

    /// A new snapshot over the same configuration, bound to `user`.
    #[must_use]
    pub fn with_user(&self, user: Option<UserHandle>) -> Self {
        Self::new(self.config.clone(), user, self.logger.clone())
    }

    // -- generic lookups -------------------------------------------------

    /// The evaluated value for `key`, or `None` when the key is
    /// unknown or evaluation failed.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<Value> {
        match self.evaluate_value_id(key) {
            Ok((id, _)) => self.config.value_by_id(id).cloned(),
            Err(err) => {
                self.logger.error(&err);
                None
            }
        }
    }

    /// Variation identifier of the branch `key` evaluates to, or ""
    /// when the key is unknown.
    #[must_use]
    pub fn variation_id(&self, key: &str) -> String {
        match self.evaluate_outcome(key) {
            Ok((outcome, entry)) => branch_variation(entry, &outcome),
            Err(err) => {
                self.logger.error(&err);
                String::new()
            }
        }
    }

    /// All flag keys of the underlying configuration, sorted.
    #[must_use]
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.config.entries().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Evaluate every key for the bound user.
    #[must_use]
    pub fn all_values(&self) -> HashMap<String, Value> {
        self.all_keys()
            .into_iter()
            .filter_map(|key| {
                let value = self.value(&key)?;
                Some((key, value))
            })
            .collect()
    }

    /// Full evaluation details for every key, sorted by key.
    #[must_use]
    pub fn all_details(&self) -> Vec<EvaluationDetails> {
        self.all_keys()
            .into_iter()
            .map(|key| self.details(&key))
            .collect()
    }

    /// Reverse lookup by variation identifier; the first matching
    /// branch in sorted key order wins.
    #[must_use]
    pub fn key_value_for_variation_id(&self, variation_id: &str) -> Option<(String, Value)> {
        if variation_id.is_empty() {
            return None;
        }
        for key in self.all_keys() {
            let entry = self.config.entry(&key)?;
            if entry.variation_id == variation_id {
                return Some((key, entry.value.clone()));
            }
            for rule in &entry.rollout_rules {
                if rule.variation_id == variation_id {
                    return Some((key, rule.value.clone()));
                }
            }
            for rule in &entry.percentage_rules {
                if rule.variation_id == variation_id {
                    return Some((key, rule.value.clone()));
                }
            }
        }
        None
    }

    /// Full evaluation details for one key.
    #[must_use]
    pub fn details(&self, key: &str) -> EvaluationDetails {
        let mut details = EvaluationDetails {
            key: key.to_string(),
            value: None,
            variation_id: String::new(),
            is_default_value: false,
            user: self.user.as_ref().map(UserHandle::describe),
            error: None,
            matched_rollout_rule: None,
            matched_percentage_rule: None,
            fetch_time: self.config.fetch_time(),
        };
        match self.evaluate_outcome(key) {
            Ok((outcome, entry)) => {
                details.value = self.config.value_by_id(outcome.value_id).cloned();
                details.variation_id = branch_variation(entry, &outcome);
                details.matched_rollout_rule = outcome
                    .rollout
                    .and_then(|i| entry.rollout_rules.get(i).cloned());
                details.matched_percentage_rule = outcome
                    .percentage
                    .and_then(|i| entry.percentage_rules.get(i).cloned());
            }
            Err(err) => {
                self.logger.error(&err);
                details.error = Some(err.to_string());
                details.is_default_value = true;
            }
        }
        details
    }

    // -- typed getters ---------------------------------------------------

    /// Boolean flag value; `default` on unknown key or kind mismatch.
    #[must_use]
    pub fn bool_value(&self, key: &str, default: bool) -> bool {
        self.bool_value_details(key, default).0
    }

    /// Boolean flag value plus its evaluation details.
    #[must_use]
    pub fn bool_value_details(&self, key: &str, default: bool) -> (bool, EvaluationDetails) {
        self.typed(key, default, Value::as_bool)
    }

    /// Integer flag value; `default` on unknown key or kind mismatch.
    #[must_use]
    pub fn int_value(&self, key: &str, default: i64) -> i64 {
        self.int_value_details(key, default).0
    }

    /// Integer flag value plus its evaluation details.
    #[must_use]
    pub fn int_value_details(&self, key: &str, default: i64) -> (i64, EvaluationDetails) {
        self.typed(key, default, Value::as_int)
    }

    /// Float flag value; integer values widen losslessly.
    #[must_use]
    pub fn float_value(&self, key: &str, default: f64) -> f64 {
        self.float_value_details(key, default).0
    }

    /// Float flag value plus its evaluation details.
    #[must_use]
    pub fn float_value_details(&self, key: &str, default: f64) -> (f64, EvaluationDetails) {
        self.typed(key, default, Value::as_float)
    }

    /// String flag value; `default` on unknown key or kind mismatch.
    #[must_use]
    pub fn string_value(&self, key: &str, default: &str) -> String {
        self.string_value_details(key, default).0
    }

    /// String flag value plus its evaluation details.
    #[must_use]
    pub fn string_value_details(&self, key: &str, default: &str) -> (String, EvaluationDetails) {
        self.typed(key, default.to_string(), |v| {
            v.as_str().map(str::to_string)
        })
    }

    fn typed<T>(
        &self,
        key: &str,
        default: T,
        cast: impl Fn(&Value) -> Option<T>,
    ) -> (T, EvaluationDetails) {
        let mut details = self.details(key);
        let result = match details.value.take() {
            Some(value) => match cast(&value) {
                Some(typed) => {
                    details.value = Some(value);
                    typed
                }
                None => {
                    let err = FlagError::new(
                        ErrorKind::ValueTypeMismatch,
                        format!(
                            "flag {key:?} evaluated to {value}, which does not match the requested type"
                        ),
                    );
                    self.logger.error(&err);
                    details.error = Some(err.to_string());
                    details.is_default_value = true;
                    default
                }
            },
            None => {
                details.is_default_value = true;
                default
            }
        };
        self.logger.hooks().notify_flag_evaluated(&details);
        (result, details)
    }

    // -- evaluation core -------------------------------------------------

    fn entry_of(&self, key: &str) -> Result<(KeyId, &Entry), FlagError> {
        let not_found = || {
            FlagError::new(
                ErrorKind::KeyNotFound,
                format!("value not found for key {key:?}"),
            )
        };
        let key_id = keys::lookup(key).ok_or_else(not_found)?;
        let entry = self.config.entry(key).ok_or_else(not_found)?;
        Ok((key_id, entry))
    }

    /// Value-id path: consults the memo slab where possible.
    fn evaluate_value_id(&self, key: &str) -> Result<(u32, &Entry), FlagError> {
        let (key_id, entry) = self.entry_of(key)?;
        let precalc = self.config.precalc(key_id);
        if precalc > 0 {
            // No rules; the parse already fixed the answer.
            return Ok((precalc as u32, entry));
        }
        let slot = slot_of(precalc)?;

        // With info logging enabled every evaluation is re-run so each
        // one is logged.
        let memoizable = !self.logger.enabled(LogLevel::Info);
        if memoizable
            && let Some(slab) = self.memo.get()
        {
            let cached = slab[slot].load(Ordering::Acquire);
            if cached != 0 {
                return Ok((cached, entry));
            }
        }

        let outcome = self.run_eval(key_id)?;
        if memoizable {
            self.slab()[slot].store(outcome.value_id, Ordering::Release);
        }
        Ok((outcome.value_id, entry))
    }

    /// Outcome path: always evaluates so matched rules are available.
    fn evaluate_outcome(&self, key: &str) -> Result<(EvalOutcome, &Entry), FlagError> {
        let (key_id, entry) = self.entry_of(key)?;
        let precalc = self.config.precalc(key_id);
        if precalc > 0 {
            return Ok((
                EvalOutcome {
                    value_id: precalc as u32,
                    rollout: None,
                    percentage: None,
                },
                entry,
            ));
        }
        let slot = slot_of(precalc)?;
        let outcome = self.run_eval(key_id)?;
        if !self.logger.enabled(LogLevel::Info) {
            self.slab()[slot].store(outcome.value_id, Ordering::Release);
        }
        Ok((outcome, entry))
    }

    fn run_eval(&self, key_id: KeyId) -> Result<EvalOutcome, FlagError> {
        let set = match &self.evals {
            Ok(set) => set,
            Err(err) => return Err(FlagError::new(err.kind, err.message.clone())),
        };
        let view = match &self.user {
            None => None,
            Some(handle) => Some(handle.view()?),
        };
        set.eval(key_id, &self.logger, view.as_ref()).ok_or_else(|| {
            FlagError::new(
                ErrorKind::KeyNotFound,
                "configuration has no evaluator for this key",
            )
        })
    }

    fn slab(&self) -> &[AtomicU32] {
        self.memo.get_or_init(|| {
            (0..self.config.keys_with_rules())
                .map(|_| AtomicU32::new(0))
                .collect::<Vec<_>>()
                .into_boxed_slice()
        })
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("config", &self.config)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

fn branch_variation(entry: &Entry, outcome: &EvalOutcome) -> String {
    if let Some(i) = outcome.rollout
        && let Some(rule) = entry.rollout_rules.get(i)
    {
        return rule.variation_id.clone();
    }
    if let Some(i) = outcome.percentage
        && let Some(rule) = entry.percentage_rules.get(i)
    {
        return rule.variation_id.clone();
    }
    entry.variation_id.clone()
}

fn slot_of(precalc: i32) -> Result<usize, FlagError> {
    if precalc < 0 {
        let slot = (-precalc - 1) as usize;
        Ok(slot)
    } else {
        // precalc == 0 is filtered by entry_of; this is a corrupted table.
        Err(FlagError::new(
            ErrorKind::KeyNotFound,
            "configuration has no precalc slot for this key",
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
