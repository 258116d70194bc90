use schemars::schema::RootSchema;
use schemars::schema_for;
use silverline_core::RuleSetDocument;

/// Emit the JSON Schema for rule-set documents.
pub fn rule_set_json_schema() -> RootSchema {
    schema_for!(RuleSetDocument)
}

/// The rule-set schema as a JSON value, ready to compile.
pub fn rule_set_json_schema_value() -> serde_json::Value {
    serde_json::to_value(rule_set_json_schema()).unwrap_or(serde_json::Value::Null)
}
