// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-key rule evaluator compilation.
//!
//! For every flag key the evaluator produces a function mapping
//! `(logger, user view)` to an interned value identifier plus the
//! matched rule, if any. Comparison values are precompiled (lists
//! split, semvers and numbers parsed, digests normalised) and record
//! attribute accessors are bound per rule, so the per-evaluation work
//! is a plain walk over compiled matchers. Compiled sets are cached in
//! the configuration, keyed by the user's concrete type.

use crate::config::{Entry, ParsedConfig};
use crate::log::{ClientLogger, LogLevel};
use crate::user::{AttrValue, BoundAttr, EvalKind, UserHandle, UserSchema, UserView};
use crate::wire::Comparator;
use sha1::{Digest, Sha1};
use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of evaluating one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EvalOutcome {
    /// Interned identifier of the served value (always >= 1).
    pub(crate) value_id: u32,
    /// Index of the matched rollout rule, if any.
    pub(crate) rollout: Option<usize>,
    /// Index of the matched percentage rule, if any.
    pub(crate) percentage: Option<usize>,
}

impl EvalOutcome {
    fn default_of(value_id: u32) -> Self {
        Self {
            value_id,
            rollout: None,
            percentage: None,
        }
    }
}

type EntryEval = Box<dyn Fn(&ClientLogger, Option<&UserView<'_>>) -> EvalOutcome + Send + Sync>;

/// Compiled evaluators for one (configuration, user type) pair,
/// indexed by [`crate::keys::KeyId`].
pub(crate) struct EvalSet {
    evals: Vec<Option<EntryEval>>,
}

impl EvalSet {
    /// Evaluate the entry behind `key`, if this config has one.
    pub(crate) fn eval(
        &self,
        key: crate::keys::KeyId,
        logger: &ClientLogger,
        view: Option<&UserView<'_>>,
    ) -> Option<EvalOutcome> {
        let eval = self.evals.get(key.index())?.as_ref()?;
        Some(eval(logger, view))
    }
}

// ---------------------------------------------------------------------------
// Bucketing
// ---------------------------------------------------------------------------

/// Deterministic percentage bucket for `(key, identifier)`.
///
/// The first four digest bytes are read as a signed big-endian integer
/// and arithmetically shifted. The sign is part of the contract: a
/// negative bucket lands in the first non-empty rule.
pub(crate) fn bucket_of(key: &str, identifier: &str) -> i32 {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(identifier.as_bytes());
    let digest = hasher.finalize();
    let head = i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (head >> 4) % 100
}

// ---------------------------------------------------------------------------
// Matchers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl CmpOp {
    fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Eq => ord == Equal,
            Self::NotEq => ord != Equal,
            Self::Less => ord == Less,
            Self::LessEq => ord != Greater,
            Self::Greater => ord == Greater,
            Self::GreaterEq => ord != Less,
        }
    }
}

/// Precompiled comparison value. Negation is carried separately and
/// applied after the base match.
enum Matcher {
    /// Comma-separated tokens; a token matches when it *contains* the
    /// user value (legacy containment semantics of the wire protocol).
    OneOf(Vec<String>),
    /// Whole comparison value as a substring of the user value.
    Contains(String),
    /// Semver equality against any parsed token.
    SemverOneOf(Vec<semver::Version>),
    /// Semver ordering against a single bound.
    SemverCmp { bound: semver::Version, op: CmpOp },
    /// Numeric comparison; `rhs_int` enables the exact integer path.
    Num {
        rhs: f64,
        rhs_int: Option<i64>,
        op: CmpOp,
    },
    /// Membership among lowercase hex SHA-1 digests.
    Sha1(Vec<String>),
    /// The comparison value itself failed to parse; always skips.
    Invalid(String),
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|item| item.trim().to_string()).collect()
}

fn parse_num(raw: &str) -> Result<f64, String> {
    let normalised = raw.trim().replace(',', ".");
    let value: f64 = normalised
        .parse()
        .map_err(|_| format!("{raw:?} is not a number"))?;
    if value.is_nan() {
        return Err(format!("{raw:?} is not a comparable number"));
    }
    Ok(value)
}

fn parse_semver_list(raw: &str) -> Result<Vec<semver::Version>, String> {
    let mut items = Vec::new();
    for item in raw.split(',') {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        let version = semver::Version::parse(trimmed)
            .map_err(|e| format!("{trimmed:?} is not a semver: {e}"))?;
        items.push(version);
    }
    Ok(items)
}

/// Compile `(comparator, comparison)` into a matcher plus its negation
/// flag: negated and greater-style operators reduce to the base form
/// and invert at the end.
fn compile_matcher(comparator: Comparator, comparison: &str) -> (Matcher, bool) {
    use Comparator::*;
    match comparator {
        OneOf => (Matcher::OneOf(split_list(comparison)), false),
        NotOneOf => (Matcher::OneOf(split_list(comparison)), true),
        Contains => (Matcher::Contains(comparison.to_string()), false),
        NotContains => (Matcher::Contains(comparison.to_string()), true),
        OneOfSemver | NotOneOfSemver => {
            let negate = comparator == NotOneOfSemver;
            match parse_semver_list(comparison) {
                Ok(items) => (Matcher::SemverOneOf(items), negate),
                Err(reason) => (Matcher::Invalid(reason), false),
            }
        }
        LessSemver | LessEqSemver | GreaterSemver | GreaterEqSemver => {
            let op = match comparator {
                LessSemver => CmpOp::Less,
                LessEqSemver => CmpOp::LessEq,
                GreaterSemver => CmpOp::Greater,
                _ => CmpOp::GreaterEq,
            };
            match semver::Version::parse(comparison.trim()) {
                Ok(bound) => (Matcher::SemverCmp { bound, op }, false),
                Err(e) => (
                    Matcher::Invalid(format!("{comparison:?} is not a semver: {e}")),
                    false,
                ),
            }
        }
        EqNum | NotEqNum | LessNum | LessEqNum | GreaterNum | GreaterEqNum => {
            let op = match comparator {
                EqNum => CmpOp::Eq,
                NotEqNum => CmpOp::NotEq,
                LessNum => CmpOp::Less,
                LessEqNum => CmpOp::LessEq,
                GreaterNum => CmpOp::Greater,
                _ => CmpOp::GreaterEq,
            };
            match parse_num(comparison) {
                Ok(rhs) => (
                    Matcher::Num {
                        rhs,
                        rhs_int: comparison.trim().parse::<i64>().ok(),
                        op,
                    },
                    false,
                ),
                Err(reason) => (Matcher::Invalid(reason), false),
            }
        }
        OneOfSha1 => (Matcher::Sha1(hash_list(comparison)), false),
        NotOneOfSha1 => (Matcher::Sha1(hash_list(comparison)), true),
    }
}

fn hash_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .collect()
}

fn user_semver(attr: &AttrValue) -> Result<semver::Version, String> {
    match attr.parse_semver() {
        None => Err("attribute is not a semver-capable string".to_string()),
        Some(Err(e)) => Err(format!("attribute is not a semver: {e}")),
        Some(Ok(v)) => Ok(v),
    }
}

enum NumAttr {
    Int(i64),
    UInt(u64),
    Float(f64),
}

fn user_num(attr: &AttrValue) -> Result<NumAttr, String> {
    match attr {
        AttrValue::Int(n) => Ok(NumAttr::Int(*n)),
        AttrValue::UInt(n) => Ok(NumAttr::UInt(*n)),
        AttrValue::Float(f) => {
            if f.is_nan() {
                Err("attribute is not a comparable number".to_string())
            } else {
                Ok(NumAttr::Float(*f))
            }
        }
        AttrValue::Str(s) => parse_num(s).map(NumAttr::Float),
        AttrValue::Bytes(_) => Err("attribute is not numeric".to_string()),
    }
}

impl Matcher {
    /// Base match against one attribute value. `Err` means the pair
    /// could not be compared; the caller logs and moves on.
    fn matches(&self, attr: &AttrValue) -> Result<bool, String> {
        match self {
            Self::OneOf(items) => {
                let text = attr.text();
                Ok(items.iter().any(|item| item.contains(text.as_ref())))
            }
            Self::Contains(needle) => Ok(attr.text().contains(needle.as_str())),
            Self::SemverOneOf(items) => {
                let version = user_semver(attr)?;
                Ok(items.iter().any(|item| *item == version))
            }
            Self::SemverCmp { bound, op } => {
                let version = user_semver(attr)?;
                Ok(op.holds(version.cmp(bound)))
            }
            Self::Num { rhs, rhs_int, op } => {
                let lhs = user_num(attr)?;
                // Exact integer comparison when both sides carry exact
                // integers; the float fallback covers the rest.
                let ord = match (lhs, rhs_int) {
                    (NumAttr::Int(i), Some(r)) => i128::from(i).cmp(&i128::from(*r)),
                    (NumAttr::UInt(u), Some(r)) => i128::from(u).cmp(&i128::from(*r)),
                    (NumAttr::Int(i), None) => match (i as f64).partial_cmp(rhs) {
                        Some(ord) => ord,
                        None => return Err("incomparable numbers".to_string()),
                    },
                    (NumAttr::UInt(u), None) => match (u as f64).partial_cmp(rhs) {
                        Some(ord) => ord,
                        None => return Err("incomparable numbers".to_string()),
                    },
                    (NumAttr::Float(f), _) => match f.partial_cmp(rhs) {
                        Some(ord) => ord,
                        None => return Err("incomparable numbers".to_string()),
                    },
                };
                Ok(op.holds(ord))
            }
            Self::Sha1(items) => {
                let digest = hex::encode(Sha1::digest(attr.bytes().as_ref()));
                Ok(items.iter().any(|item| *item == digest))
            }
            Self::Invalid(reason) => Err(reason.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry compilation
// ---------------------------------------------------------------------------

enum AttrBinding {
    /// Resolve through the dynamic lookup capability at call time.
    Dynamic(String),
    /// Pre-bound record accessor.
    Bound(BoundAttr),
}

impl AttrBinding {
    fn get(&self, view: &UserView<'_>) -> Option<AttrValue> {
        match (self, view) {
            (Self::Dynamic(name), UserView::Lookup(user)) => user.attribute(name),
            (Self::Bound(bound), UserView::Record { user, .. }) => bound.get(*user),
            _ => None,
        }
    }
}

struct CompiledRule {
    attribute: String,
    comparator: Comparator,
    comparison: String,
    binding: AttrBinding,
    matcher: Matcher,
    negate: bool,
    value_id: u32,
}

struct CompiledPercentage {
    percentage: i64,
    value_id: u32,
}

enum BuildKind {
    Absent,
    Lookup,
    Record(&'static UserSchema),
}

fn compile_entry(key: &str, entry: &Entry, kind: &BuildKind) -> EntryEval {
    let default_id = entry.value_id;

    if matches!(kind, BuildKind::Absent) {
        unreachable!("absent user sets use absent_entry_eval");
    }

    let rules: Vec<CompiledRule> = entry
        .rollout_rules
        .iter()
        .map(|rule| {
            let (matcher, negate) = compile_matcher(rule.comparator, &rule.comparison);
            let binding = match kind {
                BuildKind::Lookup => AttrBinding::Dynamic(rule.attribute.clone()),
                BuildKind::Record(schema) => AttrBinding::Bound(schema.bind(&rule.attribute)),
                BuildKind::Absent => unreachable!(),
            };
            CompiledRule {
                attribute: rule.attribute.clone(),
                comparator: rule.comparator,
                comparison: rule.comparison.clone(),
                binding,
                matcher,
                negate,
                value_id: rule.value_id,
            }
        })
        .collect();

    let percentages: Vec<CompiledPercentage> = entry
        .percentage_rules
        .iter()
        .map(|rule| CompiledPercentage {
            percentage: rule.percentage,
            value_id: rule.value_id,
        })
        .collect();

    let key = key.to_string();
    Box::new(move |logger, view| {
        let Some(view) = view else {
            return EvalOutcome::default_of(default_id);
        };

        for (idx, rule) in rules.iter().enumerate() {
            let Some(attr) = rule.binding.get(view) else {
                if logger.enabled(LogLevel::Info) {
                    logger.info(&format!(
                        "evaluating rule: [{}] [{}] [{}] => no match, attribute missing",
                        rule.attribute, rule.comparator, rule.comparison
                    ));
                }
                continue;
            };
            if attr.is_empty_text() {
                continue;
            }
            match rule.matcher.matches(&attr) {
                Ok(base) => {
                    let hit = base != rule.negate;
                    if logger.enabled(LogLevel::Info) {
                        logger.info(&format!(
                            "evaluating rule: [{}:{}] [{}] [{}] => {}",
                            rule.attribute,
                            attr.text(),
                            rule.comparator,
                            rule.comparison,
                            if hit { "match" } else { "no match" }
                        ));
                    }
                    if hit {
                        return EvalOutcome {
                            value_id: rule.value_id,
                            rollout: Some(idx),
                            percentage: None,
                        };
                    }
                }
                Err(reason) => {
                    logger.warn(&format!(
                        "error evaluating rule [{}] [{}] [{}] for flag {key:?}: {reason}",
                        rule.attribute, rule.comparator, rule.comparison
                    ));
                    continue;
                }
            }
        }

        if !percentages.is_empty() {
            let identifier = view.identifier();
            let bucket = i64::from(bucket_of(&key, &identifier));
            let mut accumulated = 0i64;
            for (idx, rule) in percentages.iter().enumerate() {
                accumulated += rule.percentage;
                if bucket < accumulated {
                    if logger.enabled(LogLevel::Info) {
                        logger.info(&format!(
                            "evaluating percentage rules: bucket {bucket} of {key:?} lands in rule {idx}"
                        ));
                    }
                    return EvalOutcome {
                        value_id: rule.value_id,
                        rollout: None,
                        percentage: Some(idx),
                    };
                }
            }
        }

        EvalOutcome::default_of(default_id)
    })
}

fn absent_entry_eval(key: &str, entry: &Entry, warned: &Arc<AtomicBool>) -> EntryEval {
    let default_id = entry.value_id;
    let has_rules = entry.has_rules();
    let key = key.to_string();
    let warned = Arc::clone(warned);
    Box::new(move |logger, _| {
        if has_rules && !warned.swap(true, Ordering::Relaxed) {
            logger.warn(&format!(
                "flag {key:?} has targeting rules, but no user was provided; \
                 every ruled flag evaluates to its default value"
            ));
        }
        EvalOutcome::default_of(default_id)
    })
}

// ---------------------------------------------------------------------------
// Set construction & caching
// ---------------------------------------------------------------------------

/// Cache key for evaluations without a bound user.
struct AbsentUser;

/// Fetch (or build and cache) the evaluator set for `user`'s type.
///
/// An ambiguous user type fails here, on the first call that builds
/// evaluators for that type, and the failure itself is cached.
pub(crate) fn eval_set_for(
    config: &ParsedConfig,
    user: Option<&UserHandle>,
) -> Result<Arc<EvalSet>, Arc<fdk_error::FlagError>> {
    let type_id = user.map_or_else(|| TypeId::of::<AbsentUser>(), UserHandle::type_id);

    if let Some(slot) = config
        .inner()
        .evaluators
        .read()
        .expect("evaluator cache poisoned")
        .get(&type_id)
    {
        return slot.clone();
    }

    let kind = match user {
        None => BuildKind::Absent,
        Some(handle) => match handle.eval_kind() {
            Ok(EvalKind::Lookup) => BuildKind::Lookup,
            Ok(EvalKind::Record(schema)) => BuildKind::Record(schema),
            Err(err) => {
                let slot = Err(Arc::new(err));
                config
                    .inner()
                    .evaluators
                    .write()
                    .expect("evaluator cache poisoned")
                    .entry(type_id)
                    .or_insert_with(|| slot.clone());
                return slot;
            }
        },
    };

    let set = Arc::new(build_set(config, &kind));
    let mut cache = config
        .inner()
        .evaluators
        .write()
        .expect("evaluator cache poisoned");
    cache.entry(type_id).or_insert(Ok(set)).clone()
}

fn build_set(config: &ParsedConfig, kind: &BuildKind) -> EvalSet {
    let mut evals: Vec<Option<EntryEval>> = std::iter::repeat_with(|| None)
        .take(crate::keys::count())
        .collect();

    let warned = Arc::new(AtomicBool::new(false));
    for (key, entry) in config.entries() {
        let eval = match kind {
            BuildKind::Absent => absent_entry_eval(key, entry, &warned),
            other => compile_entry(key, entry, other),
        };
        evals[entry.key_id.index()] = Some(eval);
    }

    EvalSet { evals }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
