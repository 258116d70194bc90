use std::collections::BTreeSet;

use sha2::{Digest, Sha256};
use silverline_core::{EntityType, RecordBatch, Rule, RuleCheck};

/// Prefix marking a value that has already been hashed.
pub const HASH_MARKER: &str = "h:";
pub const FULL_MASK: &str = "**********";
pub const REMOVED_MARKER: &str = "[REMOVED]";

/// Result of running the PII transformation rules over a batch.
#[derive(Debug, Clone)]
pub struct MaskOutcome {
    pub batch: RecordBatch,
    pub masked_columns: Vec<String>,
    /// Non-null cells rewritten.
    pub fields_masked: u64,
    pub warnings: Vec<String>,
}

/// Mask one raw value for `entity`. Returns `None` for unknown entities.
///
/// Every strategy is idempotent: masking its own output returns it unchanged.
pub fn mask_value(entity: &EntityType, value: &str) -> Option<String> {
    let masked = match entity {
        EntityType::EmailAddress => match value.rsplit_once('@') {
            Some((_, domain)) => format!("***@{domain}"),
            None => "***".to_string(),
        },
        EntityType::PhoneNumber => {
            let digits: Vec<char> = value.chars().filter(char::is_ascii_digit).collect();
            if digits.len() >= 4 {
                let last4: String = digits[digits.len() - 4..].iter().collect();
                format!("XXX-XXX-{last4}")
            } else {
                "XXX-XXX-XXXX".to_string()
            }
        }
        EntityType::Person => {
            if is_person_hash(value) {
                value.to_string()
            } else {
                let digest = hex::encode(Sha256::digest(value.as_bytes()));
                format!("{HASH_MARKER}{}", &digest[..PERSON_HASH_HEX])
            }
        }
        EntityType::UsSsn | EntityType::CreditCard | EntityType::IbanCode => FULL_MASK.to_string(),
        EntityType::IpAddress | EntityType::Location => REMOVED_MARKER.to_string(),
        EntityType::Other(_) => return None,
    };
    Some(masked)
}

const PERSON_HASH_HEX: usize = 16;

/// True only for our own PERSON output: the marker plus 16 lowercase hex digits.
fn is_person_hash(value: &str) -> bool {
    value.strip_prefix(HASH_MARKER).is_some_and(|digest| {
        digest.len() == PERSON_HASH_HEX
            && digest
                .bytes()
                .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
    })
}

/// Apply every active PII-transform rule to a copy of `batch`.
pub fn apply_pii_rules(batch: &RecordBatch, rules: &[Rule]) -> MaskOutcome {
    let mut masked = batch.clone();
    let mut masked_columns = BTreeSet::new();
    let mut fields_masked = 0u64;
    let mut warnings = Vec::new();

    for rule in rules.iter().filter(|rule| rule.is_active()) {
        let RuleCheck::PiiTransform { column, entity } = &rule.check else {
            continue;
        };
        if !entity.is_known() {
            tracing::warn!(
                event = "pii_entity_unknown",
                rule_id = %rule.id,
                column = %column,
                entity = %entity
            );
            warnings.push(format!(
                "rule {}: entity {entity} has no masking strategy; column {column} left unmasked",
                rule.id
            ));
            continue;
        }
        let mut count = 0u64;
        let present = masked.map_column(column, |value| {
            count += 1;
            mask_value(entity, value).unwrap_or_else(|| value.to_string())
        });
        if !present {
            tracing::warn!(event = "pii_column_missing", rule_id = %rule.id, column = %column);
            warnings.push(format!("rule {}: column {column} not in batch", rule.id));
            continue;
        }
        fields_masked += count;
        masked_columns.insert(column.clone());
    }

    MaskOutcome {
        batch: masked,
        masked_columns: masked_columns.into_iter().collect(),
        fields_masked,
        warnings,
    }
}
