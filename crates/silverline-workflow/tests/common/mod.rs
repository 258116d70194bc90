#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use silverline_core::{DataProfile, EntityType, Rule, RuleCheck, RuleOrigin};
use silverline_rules::{OracleError, RuleOracle};
use silverline_workflow::{Orchestrator, PipelineConfig, StateStore};

/// Oracle answering with a fixed rule list and counting its calls.
pub struct ScriptedOracle {
    rules: Vec<Rule>,
    fail_first: usize,
    calls: AtomicUsize,
    priors: Mutex<Vec<Vec<Rule>>>,
}

impl ScriptedOracle {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            fail_first: 0,
            calls: AtomicUsize::new(0),
            priors: Mutex::new(Vec::new()),
        }
    }

    /// Report `Unavailable` for the first `n` calls.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prior rules handed to each call, in call order.
    pub fn priors(&self) -> Vec<Vec<Rule>> {
        self.priors.lock().expect("priors").clone()
    }
}

#[async_trait]
impl RuleOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _profile: &DataProfile, prior: &[Rule]) -> Result<Vec<Rule>, OracleError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.priors.lock().expect("priors").push(prior.to_vec());
        if call < self.fail_first {
            return Err(OracleError::Unavailable("scripted outage".to_string()));
        }
        Ok(self.rules.clone())
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: PipelineConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig {
            data_root: dir.path().join("data"),
            oracle_retry_backoff_ms: 10,
            approval_poll_interval_secs: 1,
            ..PipelineConfig::default()
        };
        Self { dir, config }
    }

    pub fn open_store(&self) -> Arc<StateStore> {
        Arc::new(StateStore::open(self.config.state_root()).expect("open store"))
    }

    pub fn orchestrator(&self, store: Arc<StateStore>, oracle: Arc<dyn RuleOracle>) -> Orchestrator {
        Orchestrator::new(store, self.config.clone(), oracle)
    }

    pub fn write_source(&self, name: &str, rows: usize) -> PathBuf {
        let path = self.dir.path().join("input").join(name);
        write_customers(&path, rows);
        path
    }
}

/// Customers CSV with email, phone and name PII plus a few defects:
/// every 17th email is empty, every 50th age is 150, every 23rd status is unknown.
pub fn write_customers(path: &Path, rows: usize) {
    let mut out = String::from("id,email,phone,name,age,status\n");
    for i in 1..=rows {
        let email = if i % 17 == 0 {
            String::new()
        } else {
            format!("user{i}@example{}.com", i % 3)
        };
        let age = if i % 50 == 0 { 150 } else { 18 + i % 60 };
        let status = if i % 23 == 0 {
            "unknown"
        } else if i % 2 == 0 {
            "active"
        } else {
            "inactive"
        };
        out.push_str(&format!(
            "{i},{email},555-{:03}-{:04},Person {i},{age},{status}\n",
            i % 1000,
            i
        ));
    }
    fs::create_dir_all(path.parent().expect("parent")).expect("input dir");
    fs::write(path, out).expect("write source");
}

fn pii(column: &str, entity: EntityType) -> Rule {
    Rule::new(
        format!("pii-{column}"),
        format!("mask {column}"),
        RuleOrigin::Oracle,
        RuleCheck::PiiTransform {
            column: column.to_string(),
            entity,
        },
    )
}

/// Eight candidate rules: three PII transforms and five quality checks.
pub fn customer_rules() -> Vec<Rule> {
    vec![
        pii("email", EntityType::EmailAddress),
        pii("phone", EntityType::PhoneNumber),
        pii("name", EntityType::Person),
        Rule::new(
            "email-not-null",
            "email is required",
            RuleOrigin::Oracle,
            RuleCheck::NotNull {
                column: "email".to_string(),
            },
        ),
        Rule::new(
            "email-masked-shape",
            "emails reach validation masked",
            RuleOrigin::Oracle,
            RuleCheck::Pattern {
                column: "email".to_string(),
                regex: r"\*\*\*@[a-z0-9.]+".to_string(),
            },
        ),
        Rule::new(
            "age-range",
            "age between 0 and 120",
            RuleOrigin::Oracle,
            RuleCheck::Range {
                column: "age".to_string(),
                min: Some(0.0),
                max: Some(120.0),
            },
        ),
        Rule::new(
            "status-domain",
            "status is known",
            RuleOrigin::Oracle,
            RuleCheck::Domain {
                column: "status".to_string(),
                allowed: vec!["active".to_string(), "inactive".to_string()],
            },
        ),
        Rule::new(
            "adult-or-inactive",
            "active customers are adults",
            RuleOrigin::Oracle,
            RuleCheck::Consistency {
                expression: "age >= 18 or status = 'inactive'".to_string(),
            },
        ),
    ]
}

pub fn data_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("read output")
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}
