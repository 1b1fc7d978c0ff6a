// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire-document fixtures through the public parse surface.

use chrono::Utc;
use fdk_core::{ClientLogger, Comparator, ParsedConfig, SettingType, Snapshot, Value};
use fdk_error::ErrorKind;

fn parse(body: &str) -> ParsedConfig {
    ParsedConfig::parse(body.as_bytes(), None, Utc::now(), None).expect("fixture parses")
}

#[test]
fn empty_document_parses_to_no_entries() {
    let config = parse("{}");
    assert!(config.entries().is_empty());
    assert_eq!(config.keys_with_rules(), 0);
    let config = parse(r#"{"f":{}}"#);
    assert!(config.entries().is_empty());
}

#[test]
fn unknown_root_fields_are_tolerated() {
    // Newer servers may add fields; decoding must not break.
    let config = parse(r#"{"f":{"k":{"v":1,"t":2}},"x":{"future":true}}"#);
    assert_eq!(config.entry("k").unwrap().value, Value::Int(1));
}

#[test]
fn missing_rule_arrays_default_to_empty() {
    let config = parse(r#"{"f":{"k":{"v":"x","t":1}}}"#);
    let entry = config.entry("k").unwrap();
    assert!(entry.rollout_rules.is_empty());
    assert!(entry.percentage_rules.is_empty());
    assert!(!entry.has_rules());
}

#[test]
fn missing_type_is_inferred_from_the_value() {
    let config = parse(r#"{"f":{"b":{"v":true},"s":{"v":"x"},"i":{"v":3},"x":{"v":0.5}}}"#);
    assert_eq!(config.entry("b").unwrap().setting_type, SettingType::Bool);
    assert_eq!(config.entry("s").unwrap().setting_type, SettingType::String);
    assert_eq!(config.entry("i").unwrap().setting_type, SettingType::Int);
    assert_eq!(config.entry("x").unwrap().setting_type, SettingType::Float);
}

#[test]
fn variation_ids_flow_through_every_branch() {
    let config = parse(
        r#"{"f":{"flag":{
            "v":false,"t":0,"i":"base",
            "r":[{"v":true,"i":"rule-var","a":"Identifier","c":"x","t":0}],
            "p":[{"v":true,"i":"pct-var","p":100}]
        }}}"#,
    );
    let entry = config.entry("flag").unwrap();
    assert_eq!(entry.variation_id, "base");
    assert_eq!(entry.rollout_rules[0].variation_id, "rule-var");
    assert_eq!(entry.percentage_rules[0].variation_id, "pct-var");
    assert_eq!(entry.rollout_rules[0].comparator, Comparator::OneOf);
}

#[test]
fn all_operator_discriminants_decode() {
    for op in 0..=17u8 {
        let body = format!(
            r#"{{"f":{{"flag":{{
                "v":false,"t":0,
                "r":[{{"v":true,"a":"Identifier","c":"1.0.0","t":{op}}}]
            }}}}}}"#
        );
        let config = ParsedConfig::parse(body.as_bytes(), None, Utc::now(), None)
            .unwrap_or_else(|e| panic!("operator {op} failed to decode: {e}"));
        assert_eq!(
            config.entry("flag").unwrap().rollout_rules[0]
                .comparator
                .discriminant(),
            op
        );
    }
}

#[test]
fn operator_out_of_range_is_malformed() {
    let body = r#"{"f":{"flag":{"v":false,"r":[{"v":true,"a":"x","c":"y","t":18}]}}}"#;
    let err = ParsedConfig::parse(body.as_bytes(), None, Utc::now(), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::MalformedConfig);
}

#[test]
fn rule_value_inherits_the_entry_type_coercion() {
    // Integer-typed entry narrows the rule's 7.0 to 7.
    let config = parse(
        r#"{"f":{"n":{
            "v":1,"t":2,
            "r":[{"v":7.0,"a":"Identifier","c":"x","t":0}]
        }}}"#,
    );
    assert_eq!(config.entry("n").unwrap().rollout_rules[0].value, Value::Int(7));
}

#[test]
fn duplicate_bodies_share_interned_values_per_config() {
    let config = parse(
        r#"{"f":{
            "a":{"v":true,"t":0,"r":[{"v":false,"a":"Identifier","c":"x","t":0}]},
            "b":{"v":true,"t":0}
        }}"#,
    );
    let a = config.entry("a").unwrap();
    let b = config.entry("b").unwrap();
    assert_eq!(a.value_id, b.value_id);
    assert_ne!(a.rollout_rules[0].value_id, a.value_id);
}

#[test]
fn snapshot_over_reparsed_body_yields_identical_results() {
    let body = r#"{"f":{
        "flag":{"v":"base","t":1,"p":[{"v":"a","p":60},{"v":"b","p":40}]}
    }}"#;
    let first = Snapshot::new(
        parse(body),
        Some(fdk_core::UserHandle::record(fdk_core::User::new("u-7"))),
        ClientLogger::disabled(),
    );
    let second = Snapshot::new(
        parse(body),
        Some(fdk_core::UserHandle::record(fdk_core::User::new("u-7"))),
        ClientLogger::disabled(),
    );
    assert_eq!(first.string_value("flag", ""), second.string_value("flag", ""));
}
