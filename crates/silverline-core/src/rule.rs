use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::profile::EntityType;
use crate::types::ColumnType;

/// Identifier of a rule, stable across revisions.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct RuleId(pub String);

impl RuleId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RuleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum RuleCategory {
    PiiTransform,
    NullCheck,
    TypeCheck,
    Range,
    Pattern,
    Consistency,
    Uniqueness,
    Domain,
    Outlier,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::PiiTransform => "pii-transform",
            RuleCategory::NullCheck => "null-check",
            RuleCategory::TypeCheck => "type-check",
            RuleCategory::Range => "range",
            RuleCategory::Pattern => "pattern",
            RuleCategory::Consistency => "consistency",
            RuleCategory::Uniqueness => "uniqueness",
            RuleCategory::Domain => "domain",
            RuleCategory::Outlier => "outlier",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Proposed,
    Approved,
    Edited,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrigin {
    Oracle,
    Fallback,
    Reviewer,
}

impl RuleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOrigin::Oracle => "oracle",
            RuleOrigin::Fallback => "fallback",
            RuleOrigin::Reviewer => "reviewer",
        }
    }
}

/// Structured predicate or transformation a rule applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    PiiTransform {
        column: String,
        #[schemars(with = "String")]
        entity: EntityType,
    },
    NotNull {
        column: String,
    },
    TypeCheck {
        column: String,
        expected: ColumnType,
    },
    /// Inclusive numeric bounds.
    Range {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// The regex must match the whole value.
    Pattern {
        column: String,
        regex: String,
    },
    Consistency {
        expression: String,
    },
    Uniqueness {
        columns: Vec<String>,
    },
    Domain {
        column: String,
        allowed: Vec<String>,
    },
    /// Quantile bounds; unset bounds fall back to the configured defaults.
    Outlier {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        low: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        high: Option<f64>,
    },
}

impl RuleCheck {
    pub fn category(&self) -> RuleCategory {
        match self {
            RuleCheck::PiiTransform { .. } => RuleCategory::PiiTransform,
            RuleCheck::NotNull { .. } => RuleCategory::NullCheck,
            RuleCheck::TypeCheck { .. } => RuleCategory::TypeCheck,
            RuleCheck::Range { .. } => RuleCategory::Range,
            RuleCheck::Pattern { .. } => RuleCategory::Pattern,
            RuleCheck::Consistency { .. } => RuleCategory::Consistency,
            RuleCheck::Uniqueness { .. } => RuleCategory::Uniqueness,
            RuleCheck::Domain { .. } => RuleCategory::Domain,
            RuleCheck::Outlier { .. } => RuleCategory::Outlier,
        }
    }

    /// Columns named directly by the check.
    ///
    /// Consistency checks return `None`; their columns live in the expression.
    pub fn columns(&self) -> Option<Vec<String>> {
        match self {
            RuleCheck::PiiTransform { column, .. }
            | RuleCheck::NotNull { column }
            | RuleCheck::TypeCheck { column, .. }
            | RuleCheck::Range { column, .. }
            | RuleCheck::Pattern { column, .. }
            | RuleCheck::Domain { column, .. }
            | RuleCheck::Outlier { column, .. } => Some(vec![column.clone()]),
            RuleCheck::Uniqueness { columns } => Some(columns.clone()),
            RuleCheck::Consistency { .. } => None,
        }
    }
}

/// A single data-quality or PII-transformation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rule {
    pub id: RuleId,
    #[serde(default = "first_revision")]
    pub revision: u32,
    pub text: String,
    pub category: RuleCategory,
    pub target_columns: Vec<String>,
    pub status: RuleStatus,
    pub origin: RuleOrigin,
    pub check: RuleCheck,
}

fn first_revision() -> u32 {
    1
}

impl Rule {
    /// Build a proposed rule whose category and targets follow the check.
    pub fn new(
        id: impl Into<RuleId>,
        text: impl Into<String>,
        origin: RuleOrigin,
        check: RuleCheck,
    ) -> Self {
        Self {
            id: id.into(),
            revision: first_revision(),
            text: text.into(),
            category: check.category(),
            target_columns: check.columns().unwrap_or_default(),
            status: RuleStatus::Proposed,
            origin,
            check,
        }
    }

    pub fn with_targets(mut self, columns: Vec<String>) -> Self {
        self.target_columns = columns;
        self
    }

    pub fn is_pii_transform(&self) -> bool {
        self.category == RuleCategory::PiiTransform
    }

    /// Approved or edited rules are the only ones Apply sees.
    pub fn is_active(&self) -> bool {
        matches!(self.status, RuleStatus::Approved | RuleStatus::Edited)
    }

    /// Mark a proposed rule approved. Edited rules keep their status.
    pub fn approved(mut self) -> Self {
        if self.status == RuleStatus::Proposed {
            self.status = RuleStatus::Approved;
        }
        self
    }

    pub fn rejected(mut self) -> Self {
        self.status = RuleStatus::Rejected;
        self
    }

    /// Whether two rules differ in anything a reviewer can change.
    pub fn same_content(&self, other: &Rule) -> bool {
        self.text == other.text
            && self.category == other.category
            && self.target_columns == other.target_columns
            && self.check == other.check
    }

    /// Produce the next revision of this rule carrying `edited`'s content.
    pub fn revise(&self, edited: &Rule) -> Result<Rule> {
        if edited.id != self.id {
            return Err(Error::InvalidRule(format!(
                "cannot revise rule {} with content of rule {}",
                self.id, edited.id
            )));
        }
        Ok(Rule {
            id: self.id.clone(),
            revision: self.revision + 1,
            text: edited.text.clone(),
            category: edited.category,
            target_columns: edited.target_columns.clone(),
            status: RuleStatus::Edited,
            origin: self.origin,
            check: edited.check.clone(),
        })
    }
}

/// On-disk rule set, as produced by the oracle or edited by a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuleSetDocument {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    pub rules: Vec<Rule>,
}

impl RuleSetDocument {
    pub fn new(dataset_id: Option<String>, rules: Vec<Rule>) -> Self {
        Self {
            version: crate::ARTIFACT_VERSION.to_string(),
            dataset_id,
            rules,
        }
    }
}
