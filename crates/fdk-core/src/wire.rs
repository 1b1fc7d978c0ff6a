// SPDX-License-Identifier: MIT OR Apache-2.0
//! Serde model of the compact `config_v5` wire document.
//!
//! The document root carries the entry map under `f` and the optional
//! preferences block under `p`. Field names on the wire are single
//! letters; everything here renames them to something readable and
//! keeps unknown fields tolerated so newer server documents still
//! decode.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A typed flag value as returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean flag value.
    Bool(bool),
    /// Whole-number flag value.
    Int(i64),
    /// Floating-point flag value.
    Float(f64),
    /// Textual flag value.
    String(String),
}

impl Value {
    /// The [`SettingType`] matching this value's kind.
    #[must_use]
    pub fn setting_type(&self) -> SettingType {
        match self {
            Self::Bool(_) => SettingType::Bool,
            Self::Int(_) => SettingType::Int,
            Self::Float(_) => SettingType::Float,
            Self::String(_) => SettingType::String,
        }
    }

    /// Returns the boolean payload, if this is a boolean value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer value.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the float payload, if this is a float value.
    ///
    /// Integer values widen losslessly; booleans and strings do not
    /// convert.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a decoded JSON scalar into a flag value.
    ///
    /// `declared` is the entry's declared type when present. JSON
    /// numbers arrive as floats; when the entry is integer-typed and
    /// the number is exactly integral it is narrowed to [`Value::Int`].
    /// A non-integral number on an integer-typed entry is kept as a
    /// float so the typed getter falls back to the caller default.
    pub(crate) fn from_json(
        raw: &serde_json::Value,
        declared: Option<SettingType>,
    ) -> Option<Self> {
        match raw {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Number(n) => {
                let wants_int = matches!(declared, Some(SettingType::Int) | None);
                if wants_int && let Some(i) = n.as_i64() {
                    return Some(Self::Int(i));
                }
                let f = n.as_f64()?;
                if matches!(declared, Some(SettingType::Int))
                    && f.fract() == 0.0
                    && f >= i64::MIN as f64
                    && f <= i64::MAX as f64
                {
                    return Some(Self::Int(f as i64));
                }
                Some(Self::Float(f))
            }
            _ => None,
        }
    }

    /// Serialize back into a JSON scalar.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::json!(n),
            Self::Float(f) => serde_json::json!(f),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

// ---------------------------------------------------------------------------
// SettingType
// ---------------------------------------------------------------------------

/// Declared type of a flag entry (`t` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingType {
    /// `t = 0`
    Bool,
    /// `t = 1`
    String,
    /// `t = 2`
    Int,
    /// `t = 3`
    Float,
}

impl SettingType {
    /// Wire discriminant.
    #[must_use]
    pub fn discriminant(&self) -> u8 {
        match self {
            Self::Bool => 0,
            Self::String => 1,
            Self::Int => 2,
            Self::Float => 3,
        }
    }
}

impl TryFrom<u8> for SettingType {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, u8> {
        match raw {
            0 => Ok(Self::Bool),
            1 => Ok(Self::String),
            2 => Ok(Self::Int),
            3 => Ok(Self::Float),
            other => Err(other),
        }
    }
}

impl Serialize for SettingType {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u8(self.discriminant())
    }
}

impl<'de> Deserialize<'de> for SettingType {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(de)?;
        Self::try_from(raw).map_err(|v| serde::de::Error::custom(format!("unknown setting type {v}")))
    }
}

// ---------------------------------------------------------------------------
// Comparator
// ---------------------------------------------------------------------------

/// Rollout-rule comparison operator (`t` on a rule, 0–17).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    /// User value is contained in the comma-separated list.
    OneOf,
    /// Negation of [`Comparator::OneOf`].
    NotOneOf,
    /// User value contains the comparison value as a substring.
    Contains,
    /// Negation of [`Comparator::Contains`].
    NotContains,
    /// User semver equals any of the comma-separated semvers.
    OneOfSemver,
    /// Negation of [`Comparator::OneOfSemver`].
    NotOneOfSemver,
    /// User semver is strictly lower.
    LessSemver,
    /// User semver is lower or equal.
    LessEqSemver,
    /// User semver is strictly greater.
    GreaterSemver,
    /// User semver is greater or equal.
    GreaterEqSemver,
    /// Numeric equality.
    EqNum,
    /// Numeric inequality.
    NotEqNum,
    /// Numeric strictly-lower.
    LessNum,
    /// Numeric lower-or-equal.
    LessEqNum,
    /// Numeric strictly-greater.
    GreaterNum,
    /// Numeric greater-or-equal.
    GreaterEqNum,
    /// SHA-1 of the user value is one of the listed hex digests.
    OneOfSha1,
    /// Negation of [`Comparator::OneOfSha1`].
    NotOneOfSha1,
}

impl Comparator {
    /// Wire discriminant.
    #[must_use]
    pub fn discriminant(&self) -> u8 {
        *self as u8
    }

    /// Human-readable operator name used in evaluation logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneOf => "IS ONE OF",
            Self::NotOneOf => "IS NOT ONE OF",
            Self::Contains => "CONTAINS",
            Self::NotContains => "DOES NOT CONTAIN",
            Self::OneOfSemver => "IS ONE OF (semver)",
            Self::NotOneOfSemver => "IS NOT ONE OF (semver)",
            Self::LessSemver => "< (semver)",
            Self::LessEqSemver => "<= (semver)",
            Self::GreaterSemver => "> (semver)",
            Self::GreaterEqSemver => ">= (semver)",
            Self::EqNum => "= (number)",
            Self::NotEqNum => "!= (number)",
            Self::LessNum => "< (number)",
            Self::LessEqNum => "<= (number)",
            Self::GreaterNum => "> (number)",
            Self::GreaterEqNum => ">= (number)",
            Self::OneOfSha1 => "IS ONE OF (hashed)",
            Self::NotOneOfSha1 => "IS NOT ONE OF (hashed)",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for Comparator {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, u8> {
        Ok(match raw {
            0 => Self::OneOf,
            1 => Self::NotOneOf,
            2 => Self::Contains,
            3 => Self::NotContains,
            4 => Self::OneOfSemver,
            5 => Self::NotOneOfSemver,
            6 => Self::LessSemver,
            7 => Self::LessEqSemver,
            8 => Self::GreaterSemver,
            9 => Self::GreaterEqSemver,
            10 => Self::EqNum,
            11 => Self::NotEqNum,
            12 => Self::LessNum,
            13 => Self::LessEqNum,
            14 => Self::GreaterNum,
            15 => Self::GreaterEqNum,
            16 => Self::OneOfSha1,
            17 => Self::NotOneOfSha1,
            other => return Err(other),
        })
    }
}

impl Serialize for Comparator {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u8(self.discriminant())
    }
}

impl<'de> Deserialize<'de> for Comparator {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(de)?;
        Self::try_from(raw).map_err(|v| serde::de::Error::custom(format!("unknown comparator {v}")))
    }
}

// ---------------------------------------------------------------------------
// RedirectKind
// ---------------------------------------------------------------------------

/// Server redirect directive (`r` in the preferences block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectKind {
    /// The data is valid here; record the preferred URL for later.
    NoRedirect,
    /// The client should move to the preferred URL (data governance).
    ShouldRedirect,
    /// The client must refetch from the preferred URL.
    ForceRedirect,
}

impl RedirectKind {
    /// Wire discriminant.
    #[must_use]
    pub fn discriminant(&self) -> u8 {
        match self {
            Self::NoRedirect => 0,
            Self::ShouldRedirect => 1,
            Self::ForceRedirect => 2,
        }
    }
}

impl TryFrom<u8> for RedirectKind {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, u8> {
        match raw {
            0 => Ok(Self::NoRedirect),
            1 => Ok(Self::ShouldRedirect),
            2 => Ok(Self::ForceRedirect),
            other => Err(other),
        }
    }
}

impl Serialize for RedirectKind {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u8(self.discriminant())
    }
}

impl<'de> Deserialize<'de> for RedirectKind {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(de)?;
        Self::try_from(raw)
            .map_err(|v| serde::de::Error::custom(format!("unknown redirect kind {v}")))
    }
}

// ---------------------------------------------------------------------------
// Document nodes
// ---------------------------------------------------------------------------

/// Root of the configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootNode {
    /// Entry map keyed by flag name.
    #[serde(rename = "f", default)]
    pub entries: HashMap<String, EntryNode>,
    /// Optional preferences block.
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<PreferencesNode>,
}

/// One flag's definition as decoded from the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryNode {
    /// Default value of the flag.
    #[serde(rename = "v", default)]
    pub value: serde_json::Value,
    /// Declared type of the flag. Inferred from the value when absent.
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub setting_type: Option<SettingType>,
    /// Variation identifier of the default value.
    #[serde(rename = "i", default, skip_serializing_if = "String::is_empty")]
    pub variation_id: String,
    /// Attribute-gated rules, evaluated in order before bucketing.
    #[serde(rename = "r", default, skip_serializing_if = "Vec::is_empty")]
    pub rollout_rules: Vec<RolloutRuleNode>,
    /// Identifier-hashed bucketing rules.
    #[serde(rename = "p", default, skip_serializing_if = "Vec::is_empty")]
    pub percentage_rules: Vec<PercentageRuleNode>,
}

impl EntryNode {
    /// Build a rule-less entry from a typed value (override sources).
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        Self {
            value: value.to_json(),
            setting_type: Some(value.setting_type()),
            variation_id: String::new(),
            rollout_rules: Vec::new(),
            percentage_rules: Vec::new(),
        }
    }
}

/// One attribute-gated rollout rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutRuleNode {
    /// Value served when the rule matches.
    #[serde(rename = "v", default)]
    pub value: serde_json::Value,
    /// Variation identifier of the served value.
    #[serde(rename = "i", default, skip_serializing_if = "String::is_empty")]
    pub variation_id: String,
    /// User attribute the rule compares against.
    #[serde(rename = "a", default)]
    pub attribute: String,
    /// Comparison value (single value or comma-separated list).
    #[serde(rename = "c", default)]
    pub comparison: String,
    /// Comparison operator.
    #[serde(rename = "t")]
    pub comparator: Comparator,
}

/// One percentage-bucketing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentageRuleNode {
    /// Value served when the bucket falls into this rule.
    #[serde(rename = "v", default)]
    pub value: serde_json::Value,
    /// Variation identifier of the served value.
    #[serde(rename = "i", default, skip_serializing_if = "String::is_empty")]
    pub variation_id: String,
    /// Percentage share, 0–100. Shares in an entry sum to at most 100.
    #[serde(rename = "p", default)]
    pub percentage: i64,
}

/// Preferences block controlling the base URL and redirect behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferencesNode {
    /// Preferred CDN base URL.
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Redirect directive.
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RedirectKind>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_document() {
        let body = r#"{"f":{"key":{"v":"value","t":1,"p":[],"r":[]}}}"#;
        let root: RootNode = serde_json::from_str(body).unwrap();
        assert_eq!(root.entries.len(), 1);
        let entry = &root.entries["key"];
        assert_eq!(entry.setting_type, Some(SettingType::String));
        assert_eq!(entry.value, serde_json::json!("value"));
        assert!(root.preferences.is_none());
    }

    #[test]
    fn decodes_preferences() {
        let body = r#"{"p":{"u":"https://other.example.com","r":2}}"#;
        let root: RootNode = serde_json::from_str(body).unwrap();
        let prefs = root.preferences.unwrap();
        assert_eq!(prefs.url.as_deref(), Some("https://other.example.com"));
        assert_eq!(prefs.redirect, Some(RedirectKind::ForceRedirect));
        assert!(root.entries.is_empty());
    }

    #[test]
    fn decodes_rules() {
        let body = r#"{"f":{"flag":{
            "v":false,"t":0,"i":"def",
            "r":[{"v":true,"i":"r1","a":"Identifier","c":"a,b","t":0}],
            "p":[{"v":true,"i":"p1","p":30},{"v":false,"i":"p2","p":70}]
        }}}"#;
        let root: RootNode = serde_json::from_str(body).unwrap();
        let entry = &root.entries["flag"];
        assert_eq!(entry.rollout_rules.len(), 1);
        assert_eq!(entry.rollout_rules[0].comparator, Comparator::OneOf);
        assert_eq!(entry.rollout_rules[0].attribute, "Identifier");
        assert_eq!(entry.percentage_rules.len(), 2);
        assert_eq!(entry.percentage_rules[0].percentage, 30);
    }

    #[test]
    fn rejects_unknown_comparator() {
        let body = r#"{"f":{"flag":{"v":false,"r":[{"v":true,"a":"x","c":"y","t":42}]}}}"#;
        let res: Result<RootNode, _> = serde_json::from_str(body);
        assert!(res.is_err());
    }

    #[test]
    fn rejects_unknown_setting_type() {
        let body = r#"{"f":{"flag":{"v":false,"t":9}}}"#;
        let res: Result<RootNode, _> = serde_json::from_str(body);
        assert!(res.is_err());
    }

    #[test]
    fn comparator_roundtrip_all() {
        for raw in 0u8..=17 {
            let cmp = Comparator::try_from(raw).unwrap();
            assert_eq!(cmp.discriminant(), raw);
            let json = serde_json::to_string(&cmp).unwrap();
            let back: Comparator = serde_json::from_str(&json).unwrap();
            assert_eq!(back, cmp);
        }
        assert!(Comparator::try_from(18).is_err());
    }

    #[test]
    fn value_narrows_integral_float_for_int_entries() {
        let v = Value::from_json(&serde_json::json!(42.0), Some(SettingType::Int)).unwrap();
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn value_keeps_fractional_float_for_int_entries() {
        let v = Value::from_json(&serde_json::json!(1.5), Some(SettingType::Int)).unwrap();
        assert_eq!(v, Value::Float(1.5));
    }

    #[test]
    fn value_infers_kind_without_declared_type() {
        assert_eq!(
            Value::from_json(&serde_json::json!(true), None),
            Some(Value::Bool(true))
        );
        assert_eq!(
            Value::from_json(&serde_json::json!(7), None),
            Some(Value::Int(7))
        );
        assert_eq!(
            Value::from_json(&serde_json::json!(1.25), None),
            Some(Value::Float(1.25))
        );
        assert_eq!(
            Value::from_json(&serde_json::json!("s"), None),
            Some(Value::String("s".into()))
        );
    }

    #[test]
    fn value_rejects_compound_shapes() {
        assert_eq!(Value::from_json(&serde_json::json!([1]), None), None);
        assert_eq!(Value::from_json(&serde_json::json!({"a":1}), None), None);
        assert_eq!(Value::from_json(&serde_json::Value::Null, None), None);
    }

    #[test]
    fn float_declared_entries_keep_floats() {
        let v = Value::from_json(&serde_json::json!(3.0), Some(SettingType::Float)).unwrap();
        assert_eq!(v, Value::Float(3.0));
    }

    #[test]
    fn value_accessors() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(3).as_int(), Some(3));
        assert_eq!(Value::Int(3).as_float(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_float(), Some(2.5));
        assert_eq!(Value::String("x".into()).as_str(), Some("x"));
        assert_eq!(Value::Bool(true).as_int(), None);
        assert_eq!(Value::String("x".into()).as_float(), None);
    }
}
