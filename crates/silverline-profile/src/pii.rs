use std::net::IpAddr;

use regex::Regex;
use silverline_core::{EntityType, PiiFinding};

/// Classifies a column as carrying a PII entity.
///
/// Implementations see the column name and a sample of its non-null raw
/// values; only the returned finding shape is relied upon downstream.
pub trait PiiDetector: Send + Sync {
    fn detect(&self, column: &str, samples: &[&str]) -> Option<PiiFinding>;
}

/// Regex and column-name heuristics.
#[derive(Debug, Clone)]
pub struct HeuristicPiiDetector {
    email: Option<Regex>,
    ssn: Option<Regex>,
    phone: Option<Regex>,
    iban: Option<Regex>,
    date: Option<Regex>,
}

const NAME_HINT_CONFIDENCE: f64 = 0.8;
const LOCATION_HINT_CONFIDENCE: f64 = 0.7;
const PATTERN_PREFERRED_SHARE: f64 = 0.5;

impl HeuristicPiiDetector {
    pub fn new() -> Self {
        Self {
            email: Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").ok(),
            ssn: Regex::new(r"^\d{3}-\d{2}-\d{4}$").ok(),
            phone: Regex::new(r"^\+?[0-9(][0-9 ().\-]{5,}[0-9]$").ok(),
            iban: Regex::new(r"^[A-Z]{2}[0-9]{2}[A-Z0-9]{11,30}$").ok(),
            date: Regex::new(r"^\d{4}-\d{2}-\d{2}$").ok(),
        }
    }

    fn matches(&self, entity: &EntityType, value: &str) -> bool {
        let value = value.trim();
        match entity {
            EntityType::EmailAddress => is_match(&self.email, value),
            EntityType::UsSsn => is_match(&self.ssn, value),
            EntityType::PhoneNumber => {
                let digits = value.chars().filter(char::is_ascii_digit).count();
                let separated = value.starts_with('+')
                    || (value.contains([' ', '-', '.', '(', ')']) && !is_match(&self.date, value));
                is_match(&self.phone, value) && separated && (10..=15).contains(&digits)
            }
            EntityType::CreditCard => is_card_number(value),
            EntityType::IbanCode => {
                let compact: String = value.chars().filter(|ch| !ch.is_whitespace()).collect();
                is_match(&self.iban, &compact.to_ascii_uppercase())
            }
            EntityType::IpAddress => value.parse::<IpAddr>().is_ok(),
            EntityType::Person | EntityType::Location | EntityType::Other(_) => false,
        }
    }
}

impl Default for HeuristicPiiDetector {
    fn default() -> Self {
        Self::new()
    }
}

// Ties between patterns resolve to the earlier entry.
const PATTERN_ENTITIES: [EntityType; 6] = [
    EntityType::UsSsn,
    EntityType::CreditCard,
    EntityType::IbanCode,
    EntityType::EmailAddress,
    EntityType::IpAddress,
    EntityType::PhoneNumber,
];

impl PiiDetector for HeuristicPiiDetector {
    fn detect(&self, column: &str, samples: &[&str]) -> Option<PiiFinding> {
        let mut best: Option<(EntityType, f64)> = None;
        if !samples.is_empty() {
            for entity in PATTERN_ENTITIES {
                let hits = samples
                    .iter()
                    .filter(|value| self.matches(&entity, value))
                    .count();
                let share = hits as f64 / samples.len() as f64;
                if share > 0.0 && best.as_ref().is_none_or(|(_, score)| share > *score) {
                    best = Some((entity, share));
                }
            }
        }

        let hinted = name_hint(column);
        let chosen = match (best, hinted) {
            (Some(pattern), _) if pattern.1 >= PATTERN_PREFERRED_SHARE => Some(pattern),
            (_, Some(hint)) => Some(hint),
            (pattern, None) => pattern,
        }?;

        Some(PiiFinding {
            column: column.to_string(),
            entity_type: chosen.0,
            confidence: chosen.1,
        })
    }
}

fn name_hint(column: &str) -> Option<(EntityType, f64)> {
    let lowered = column.to_ascii_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();
    let has = |candidates: &[&str]| tokens.iter().any(|token| candidates.contains(token));

    if has(&["name", "firstname", "lastname", "fullname", "surname"])
        && !has(&["file", "user", "company", "product", "table", "column", "host"])
    {
        return Some((EntityType::Person, NAME_HINT_CONFIDENCE));
    }
    if has(&["address", "street", "city", "zip", "zipcode", "postcode", "postal"])
        && !has(&["email", "ip", "mac"])
    {
        return Some((EntityType::Location, LOCATION_HINT_CONFIDENCE));
    }
    None
}

fn is_card_number(value: &str) -> bool {
    if !value
        .chars()
        .all(|ch| ch.is_ascii_digit() || ch == ' ' || ch == '-')
    {
        return false;
    }
    let digits: Vec<u32> = value.chars().filter_map(|ch| ch.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    luhn_valid(&digits)
}

fn luhn_valid(digits: &[u32]) -> bool {
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(idx, digit)| {
            if idx % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                *digit
            }
        })
        .sum();
    sum % 10 == 0
}

fn is_match(pattern: &Option<Regex>, value: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(column: &str, samples: &[&str]) -> Option<PiiFinding> {
        HeuristicPiiDetector::new().detect(column, samples)
    }

    #[test]
    fn detects_emails_by_value() {
        let finding = detect("contact", &["a@b.io", "c.d@example.com", "bogus"]).expect("finding");
        assert_eq!(finding.entity_type, EntityType::EmailAddress);
        assert!((finding.confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn ssn_wins_over_phone() {
        let finding = detect("tax_id", &["123-45-6789", "987-65-4321"]).expect("finding");
        assert_eq!(finding.entity_type, EntityType::UsSsn);
    }

    #[test]
    fn phones_and_cards() {
        let phone = detect("phone", &["555-123-4567", "(555) 987 6543"]).expect("phone");
        assert_eq!(phone.entity_type, EntityType::PhoneNumber);
        assert_eq!(phone.confidence, 1.0);

        let card = detect("cc", &["4111 1111 1111 1111", "5500-0000-0000-0004"]).expect("card");
        assert_eq!(card.entity_type, EntityType::CreditCard);
        assert!(!is_card_number("4111 1111 1111 1112"));
    }

    #[test]
    fn column_name_hints() {
        let person = detect("full_name", &["Jane Doe", "John Roe"]).expect("person");
        assert_eq!(person.entity_type, EntityType::Person);
        let location = detect("street_address", &["1 Main St"]).expect("location");
        assert_eq!(location.entity_type, EntityType::Location);
        assert!(detect("username", &["jdoe"]).is_none());
        assert!(detect("amount", &["12.5", "3"]).is_none());
        assert!(detect("signup", &["2024-01-02", "2023-12-31"]).is_none());
        assert!(detect("account", &["5551234567", "5559876543"]).is_none());
    }
}
