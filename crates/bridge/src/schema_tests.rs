// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::{json, Value};
use yare::parameterized;

use super::Schema;

fn ok_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "ok": { "type": "boolean" },
            "score": { "type": "integer", "minimum": 0, "maximum": 100 },
            "tags": { "type": "array", "items": { "type": "string", "max_length": 16 }, "max_items": 4 },
            "verdict": { "enum": ["yes", "no"] }
        },
        "required": ["ok"]
    })
}

#[parameterized(
    minimal = { json!({ "ok": true }) },
    full = { json!({ "ok": false, "score": 100, "tags": ["a", "b"], "verdict": "no" }) },
    empty_array = { json!({ "ok": true, "tags": [] }) },
)]
fn accepts(data: Value) {
    let schema = Schema::parse(&ok_schema()).expect("test schema parses");
    assert_eq!(schema.validate(&data), Ok(()));
}

#[parameterized(
    missing_required = { json!({ "score": 3 }) },
    undeclared_field = { json!({ "ok": true, "extra": 1 }) },
    wrong_type = { json!({ "ok": "yes" }) },
    integer_below_minimum = { json!({ "ok": true, "score": -1 }) },
    integer_above_maximum = { json!({ "ok": true, "score": 101 }) },
    too_many_items = { json!({ "ok": true, "tags": ["a", "b", "c", "d", "e"] }) },
    item_too_long = { json!({ "ok": true, "tags": ["aaaaaaaaaaaaaaaaaaaaaaaa"] }) },
    not_in_enum = { json!({ "ok": true, "verdict": "maybe" }) },
    not_an_object = { json!([1, 2, 3]) },
)]
fn rejects(data: Value) {
    let schema = Schema::parse(&ok_schema()).expect("test schema parses");
    assert!(schema.validate(&data).is_err(), "expected rejection of {data}");
}

#[parameterized(
    unknown_keyword = { json!({ "type": "object", "additional": true }) },
    unknown_type = { json!({ "type": "tuple" }) },
    missing_type = { json!({ "properties": {} }) },
    bad_required_entry = { json!({ "type": "object", "properties": { "a": { "type": "null" } }, "required": [1] }) },
    required_not_declared = { json!({ "type": "object", "required": ["ghost"] }) },
    empty_enum = { json!({ "enum": [] }) },
    bad_bound = { json!({ "type": "string", "min_length": -2 }) },
    not_an_object = { json!("string") },
)]
fn parse_rejects(raw: Value) {
    assert!(Schema::parse(&raw).is_err(), "expected parse failure for {raw}");
}

#[test]
fn primitives_validate() -> anyhow::Result<()> {
    for (schema, good, bad) in [
        (json!({ "type": "string" }), json!("s"), json!(1)),
        (json!({ "type": "number" }), json!(1.5), json!("1.5")),
        (json!({ "type": "integer" }), json!(7), json!(7.5)),
        (json!({ "type": "boolean" }), json!(true), json!(0)),
        (json!({ "type": "null" }), json!(null), json!(false)),
    ] {
        let parsed = Schema::parse(&schema).map_err(anyhow::Error::msg)?;
        anyhow::ensure!(parsed.validate(&good).is_ok(), "{schema} rejected {good}");
        anyhow::ensure!(parsed.validate(&bad).is_err(), "{schema} accepted {bad}");
    }
    Ok(())
}

#[test]
fn validation_is_total_on_hostile_input() -> anyhow::Result<()> {
    let schema = Schema::parse(&ok_schema()).map_err(anyhow::Error::msg)?;
    // Deeply nested garbage must terminate with an error, not a panic.
    let mut hostile = json!(null);
    for _ in 0..256 {
        hostile = json!({ "ok": hostile });
    }
    anyhow::ensure!(schema.validate(&hostile).is_err());
    Ok(())
}
