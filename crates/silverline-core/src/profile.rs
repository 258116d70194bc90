use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::ColumnType;

/// PII entity classes the transformation engine knows how to mask.
///
/// Labels outside the known set are carried as `Other` so they can be
/// surfaced as warnings instead of being dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    EmailAddress,
    PhoneNumber,
    Person,
    UsSsn,
    CreditCard,
    IbanCode,
    IpAddress,
    Location,
    Other(String),
}

impl EntityType {
    pub const KNOWN: [EntityType; 8] = [
        EntityType::EmailAddress,
        EntityType::PhoneNumber,
        EntityType::Person,
        EntityType::UsSsn,
        EntityType::CreditCard,
        EntityType::IbanCode,
        EntityType::IpAddress,
        EntityType::Location,
    ];

    pub fn label(&self) -> &str {
        match self {
            EntityType::EmailAddress => "EMAIL_ADDRESS",
            EntityType::PhoneNumber => "PHONE_NUMBER",
            EntityType::Person => "PERSON",
            EntityType::UsSsn => "US_SSN",
            EntityType::CreditCard => "CREDIT_CARD",
            EntityType::IbanCode => "IBAN_CODE",
            EntityType::IpAddress => "IP_ADDRESS",
            EntityType::Location => "LOCATION",
            EntityType::Other(label) => label,
        }
    }

    pub fn parse(label: &str) -> Self {
        let normalized = label.trim().to_ascii_uppercase();
        Self::KNOWN
            .into_iter()
            .find(|known| known.label() == normalized)
            .unwrap_or_else(|| EntityType::Other(label.trim().to_string()))
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, EntityType::Other(_))
    }
}

impl From<String> for EntityType {
    fn from(value: String) -> Self {
        EntityType::parse(&value)
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.label().to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Coarse cardinality bucket for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CardinalityHint {
    Constant,
    Low,
    High,
    Unique,
}

impl CardinalityHint {
    /// Bucket a distinct count relative to the non-null count.
    pub fn classify(distinct: u64, non_null: u64) -> Self {
        if distinct <= 1 {
            CardinalityHint::Constant
        } else if distinct == non_null {
            CardinalityHint::Unique
        } else if distinct * 10 <= non_null || distinct <= 20 {
            CardinalityHint::Low
        } else {
            CardinalityHint::High
        }
    }
}

/// Statistics for one column over the profiled sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnProfile {
    pub name: String,
    pub inferred_type: Option<ColumnType>,
    pub null_rate: f64,
    pub distinct_count: u64,
    pub cardinality: CardinalityHint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// A column flagged as carrying a PII entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PiiFinding {
    pub column: String,
    #[schemars(with = "String")]
    pub entity_type: EntityType,
    pub confidence: f64,
}

/// Profile of one dataset. Lives only for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct DataProfile {
    pub dataset_id: String,
    pub sampled_rows: u64,
    pub total_rows: u64,
    pub columns: Vec<ColumnProfile>,
    pub pii_findings: Vec<PiiFinding>,
}

impl DataProfile {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn finding(&self, column: &str) -> Option<&PiiFinding> {
        self.pii_findings
            .iter()
            .find(|finding| finding.column == column)
    }

    /// Strip the profile down to what a reviewer is shown.
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            sampled_rows: self.sampled_rows,
            total_rows: self.total_rows,
            columns: self.columns.clone(),
            pii_findings: self.pii_findings.clone(),
        }
    }
}

/// Reviewer-facing profile: statistics and findings, no raw values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProfileSummary {
    pub sampled_rows: u64,
    pub total_rows: u64,
    pub columns: Vec<ColumnProfile>,
    pub pii_findings: Vec<PiiFinding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_labels_round_trip() {
        for entity in EntityType::KNOWN {
            assert_eq!(EntityType::parse(entity.label()), entity);
        }
        assert_eq!(EntityType::parse("email_address"), EntityType::EmailAddress);
        let other = EntityType::parse("MEDICAL_LICENSE");
        assert_eq!(other, EntityType::Other("MEDICAL_LICENSE".to_string()));
        assert!(!other.is_known());
    }

    #[test]
    fn entity_serializes_as_label() {
        let json = serde_json::to_string(&EntityType::UsSsn).expect("serialize");
        assert_eq!(json, "\"US_SSN\"");
        let parsed: EntityType = serde_json::from_str("\"NRP\"").expect("parse");
        assert_eq!(parsed, EntityType::Other("NRP".to_string()));
    }

    #[test]
    fn cardinality_buckets() {
        assert_eq!(CardinalityHint::classify(1, 50), CardinalityHint::Constant);
        assert_eq!(CardinalityHint::classify(50, 50), CardinalityHint::Unique);
        assert_eq!(CardinalityHint::classify(3, 50), CardinalityHint::Low);
        assert_eq!(CardinalityHint::classify(400, 1000), CardinalityHint::High);
    }
}
