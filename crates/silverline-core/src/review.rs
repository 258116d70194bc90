use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::profile::ProfileSummary;
use crate::rule::Rule;

/// Reviewer verdict on a proposed rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
    Edited,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
            Decision::Edited => "edited",
        }
    }
}

/// Durable handoff between a run and its human approver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReview {
    pub run_id: String,
    pub dataset_id: String,
    pub profile_summary: ProfileSummary,
    pub rule_set: Vec<Rule>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub decision: Option<Decision>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviewer_note: Option<String>,
    #[serde(default)]
    pub revised_rules: Option<Vec<Rule>>,
}

impl PendingReview {
    pub fn new(
        run_id: impl Into<String>,
        dataset_id: impl Into<String>,
        profile_summary: ProfileSummary,
        rule_set: Vec<Rule>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            dataset_id: dataset_id.into(),
            profile_summary,
            rule_set,
            created_at: Utc::now(),
            decision: None,
            decided_at: None,
            reviewer_note: None,
            revised_rules: None,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.decision.is_some()
    }

    /// Record a decision. A review can only be decided once.
    pub fn decide(
        &mut self,
        decision: Decision,
        note: Option<String>,
        revised_rules: Option<Vec<Rule>>,
    ) -> Result<()> {
        if let Some(existing) = self.decision {
            return Err(Error::InvalidRule(format!(
                "review for run {} already {}",
                self.run_id,
                existing.as_str()
            )));
        }
        if decision == Decision::Edited && revised_rules.is_none() {
            return Err(Error::InvalidRule(
                "edited decision requires revised rules".to_string(),
            ));
        }
        self.decision = Some(decision);
        self.decided_at = Some(Utc::now());
        self.reviewer_note = note;
        self.revised_rules = revised_rules;
        Ok(())
    }

    /// Rules Apply runs with once the review is approved or edited.
    ///
    /// Returns `None` while undecided or after a rejection.
    pub fn active_rules(&self) -> Option<Vec<Rule>> {
        match self.decision? {
            Decision::Approved => Some(
                self.rule_set
                    .iter()
                    .cloned()
                    .map(Rule::approved)
                    .filter(Rule::is_active)
                    .collect(),
            ),
            Decision::Edited => Some(
                self.revised_rules
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .filter(|rule| rule.is_active())
                    .cloned()
                    .collect(),
            ),
            Decision::Rejected => None,
        }
    }

    /// History entry for a decided review, `None` while undecided.
    pub fn decision_record(&self) -> Option<DecisionRecord> {
        let decision = self.decision?;
        let rules = match decision {
            Decision::Approved => self.active_rules().unwrap_or_default(),
            Decision::Edited => self.revised_rules.clone().unwrap_or_default(),
            Decision::Rejected => self.rule_set.iter().cloned().map(Rule::rejected).collect(),
        };
        Some(DecisionRecord {
            run_id: self.run_id.clone(),
            dataset_id: self.dataset_id.clone(),
            decision,
            decided_at: self.decided_at.unwrap_or(self.created_at),
            reviewer_note: self.reviewer_note.clone(),
            rules,
        })
    }
}

/// One decided review in a dataset's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub run_id: String,
    pub dataset_id: String,
    pub decision: Decision,
    pub decided_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewer_note: Option<String>,
    /// The decided rule set with each rule's final status.
    pub rules: Vec<Rule>,
}

impl DecisionRecord {
    pub fn active_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|rule| rule.is_active())
    }
}

/// Active rules of the most recent approved or edited decision.
pub fn prior_rules(history: &[DecisionRecord]) -> Vec<Rule> {
    history
        .iter()
        .rev()
        .find(|record| record.decision != Decision::Rejected)
        .map(|record| record.active_rules().cloned().collect())
        .unwrap_or_default()
}
