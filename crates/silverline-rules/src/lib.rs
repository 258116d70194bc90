//! Rule generation, validation and the consistency expression language.

pub mod errors;
pub mod expression;
pub mod fallback;
pub mod oracle;
pub mod schema;
pub mod validate;

pub use errors::{IssueSeverity, OracleError, RuleSetError, ValidationIssue, ValidationReport};
pub use expression::{Expression, ExpressionError};
pub use fallback::{derive_pii_rules, fallback_rules};
pub use oracle::{FileOracle, NullOracle, RuleOracle, generate_with_timeout};
pub use schema::{rule_set_json_schema, rule_set_json_schema_value};
pub use validate::{
    ValidatedRuleSet, normalize_rule, validate_rule_set, validate_rule_set_document,
    validate_rule_set_json,
};
