//! Gates a callback outcome must pass before it is persisted or accepted on
//! replay: a structural check over record fields, then user rules.

use crate::config::ResolvedConfig;
use crate::errors::CrawltapeError;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

pub type RuleFn = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

#[derive(Clone)]
pub struct Rule {
    pub name: String,
    check: RuleFn,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        check: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn check(&self, value: &Value) -> Result<(), String> {
        (self.check)(value)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    Record,
    Job,
}

impl RuleTarget {
    fn noun(self) -> &'static str {
        match self {
            Self::Record => "a record",
            Self::Job => "a job",
        }
    }
}

/// Named predicates. Project-wide rules always run; callback configs pick
/// additional rules from the registered ones by name.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    global_records: Vec<Rule>,
    global_jobs: Vec<Rule>,
    registered_records: BTreeMap<String, Rule>,
    registered_jobs: BTreeMap<String, Rule>,
}

impl RuleBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_record_rule(mut self, rule: Rule) -> Self {
        self.global_records.push(rule);
        self
    }

    pub fn global_job_rule(mut self, rule: Rule) -> Self {
        self.global_jobs.push(rule);
        self
    }

    pub fn register_record_rule(mut self, rule: Rule) -> Self {
        self.registered_records.insert(rule.name.clone(), rule);
        self
    }

    pub fn register_job_rule(mut self, rule: Rule) -> Self {
        self.registered_jobs.insert(rule.name.clone(), rule);
        self
    }

    fn lookup(&self, target: RuleTarget, names: &[String]) -> Result<Vec<Rule>, CrawltapeError> {
        let registry = match target {
            RuleTarget::Record => &self.registered_records,
            RuleTarget::Job => &self.registered_jobs,
        };
        names
            .iter()
            .map(|name| {
                registry.get(name).cloned().ok_or_else(|| {
                    CrawltapeError::Configuration(format!(
                        "config names unknown {} rule '{name}'",
                        match target {
                            RuleTarget::Record => "record",
                            RuleTarget::Job => "job",
                        }
                    ))
                })
            })
            .collect()
    }

    /// Local rules first, then global ones.
    pub fn rules_for(
        &self,
        target: RuleTarget,
        cfg: &ResolvedConfig,
    ) -> Result<Vec<Rule>, CrawltapeError> {
        let (local_names, global) = match target {
            RuleTarget::Record => (&cfg.record_rules, &self.global_records),
            RuleTarget::Job => (&cfg.job_rules, &self.global_jobs),
        };
        let mut rules = self.lookup(target, local_names)?;
        rules.extend(global.iter().cloned());
        Ok(rules)
    }
}

/// Falsy JSON counts as empty, zero and `false` included.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Obligate fields must exist; primary fields must exist and be non-empty.
pub fn check_structure(
    records: &[Value],
    obligate: &BTreeSet<String>,
    primary: &BTreeSet<String>,
    url: &str,
) -> Result<(), CrawltapeError> {
    for record in records {
        let fields = record.as_object();
        let missing: Vec<&str> = obligate
            .iter()
            .filter(|field| !fields.is_some_and(|map| map.contains_key(field.as_str())))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(CrawltapeError::validation(
                url,
                format!(
                    "obligate fields check failed, missing fields: {}",
                    missing.join(", ")
                ),
            ));
        }
        for field in primary {
            let empty = fields
                .and_then(|map| map.get(field))
                .map_or(true, is_empty_value);
            if empty {
                return Err(CrawltapeError::validation(
                    url,
                    format!("primary fields check failed, empty field: {field}"),
                ));
            }
        }
    }
    Ok(())
}

pub fn check_rules(
    target: RuleTarget,
    rules: &[Rule],
    items: &[Value],
    url: &str,
) -> Result<(), CrawltapeError> {
    for item in items {
        for rule in rules {
            if let Err(reason) = rule.check(item) {
                return Err(CrawltapeError::validation(
                    url,
                    format!(
                        "{} produced by the job failed the rule '{}': {reason}",
                        target.noun(),
                        rule.name
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Run both gates over cleaned records and jobs produced for `url`.
pub fn validate_outcome(
    cfg: &ResolvedConfig,
    rules: &RuleBook,
    records: &[Value],
    jobs: &[Value],
    url: &str,
) -> Result<(), CrawltapeError> {
    let obligate: BTreeSet<String> = cfg.obligate_item_fields.iter().cloned().collect();
    let primary: BTreeSet<String> = cfg.primary_item_fields.iter().cloned().collect();
    check_structure(records, &obligate, &primary, url)?;

    let record_rules = rules.rules_for(RuleTarget::Record, cfg)?;
    check_rules(RuleTarget::Record, &record_rules, records, url)?;
    let job_rules = rules.rules_for(RuleTarget::Job, cfg)?;
    check_rules(RuleTarget::Job, &job_rules, jobs, url)
}

#[cfg(test)]
mod tests {
    use super::{validate_outcome, Rule, RuleBook};
    use crate::config::{resolve, CallbackConfig, ProjectConfig};
    use crate::errors::CrawltapeError;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn cfg_with(local: CallbackConfig) -> crate::config::ResolvedConfig {
        resolve(&ProjectConfig::default(), Some(&local))
    }

    #[test]
    fn missing_obligate_fields_are_listed() {
        let cfg = cfg_with(CallbackConfig {
            obligate_item_fields: vec!["name".to_string(), "id".to_string()],
            ..CallbackConfig::default()
        });
        let err = validate_outcome(&cfg, &RuleBook::new(), &[json!({"id": 3})], &[], "https://x/1")
            .expect_err("missing name");
        match err {
            CrawltapeError::Validation { url, cause } => {
                assert_eq!(url, "https://x/1");
                assert!(cause.ends_with("missing fields: name"), "{cause}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn falsy_primary_fields_fail() {
        let cfg = cfg_with(CallbackConfig {
            primary_item_fields: vec!["title".to_string(), "stock".to_string()],
            ..CallbackConfig::default()
        });
        let ok = json!({"title": "lamp", "stock": 3});
        validate_outcome(&cfg, &RuleBook::new(), &[ok], &[], "u").expect("filled fields");

        for (record, field) in [
            (json!({"title": "", "stock": 1}), "title"),
            (json!({"title": "lamp", "stock": 0}), "stock"),
            (json!({"title": "lamp", "stock": 0.0}), "stock"),
            (json!({"title": false, "stock": 1}), "title"),
            (json!({"title": [], "stock": 1}), "title"),
            (json!({"title": {}, "stock": 1}), "title"),
            (json!({"title": null, "stock": 1}), "title"),
            (json!({"stock": 1}), "title"),
        ] {
            let err = validate_outcome(&cfg, &RuleBook::new(), &[record.clone()], &[], "u")
                .expect_err("falsy field");
            assert!(
                err.to_string().contains(&format!("empty field: {field}")),
                "{record}: {err}"
            );
        }

        let truthy = json!({"title": true, "stock": -1});
        validate_outcome(&cfg, &RuleBook::new(), &[truthy], &[], "u").expect("truthy fields");
    }

    #[test]
    fn local_rules_run_before_global_rules() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let local_order = Arc::clone(&order);
        let global_order = Arc::clone(&order);
        let rules = RuleBook::new()
            .register_record_rule(Rule::new("local_check", move |_| {
                local_order.lock().expect("order lock").push("local");
                Ok(())
            }))
            .global_record_rule(Rule::new("global_check", move |_| {
                global_order.lock().expect("order lock").push("global");
                Ok(())
            }));
        let cfg = cfg_with(CallbackConfig {
            record_rules: vec!["local_check".to_string()],
            ..CallbackConfig::default()
        });
        validate_outcome(&cfg, &rules, &[json!({"id": 1})], &[], "u").expect("rules pass");
        assert_eq!(*order.lock().expect("order lock"), vec!["local", "global"]);
    }

    #[test]
    fn failing_rule_is_named_with_the_job_url() {
        let rules = RuleBook::new().global_job_rule(Rule::new("has_category", |job| {
            if job["meta"].get("category").is_some() {
                Ok(())
            } else {
                Err("category missing".to_string())
            }
        }));
        let cfg = cfg_with(CallbackConfig::default());
        let err = validate_outcome(&cfg, &rules, &[], &[json!({"meta": {}})], "https://x/list")
            .expect_err("rule fails");
        let text = err.to_string();
        assert!(text.contains("https://x/list"));
        assert!(text.contains("'has_category'"));
    }

    #[test]
    fn unknown_rule_names_are_configuration_errors() {
        let cfg = cfg_with(CallbackConfig {
            job_rules: vec!["nope".to_string()],
            ..CallbackConfig::default()
        });
        let err = validate_outcome(&cfg, &RuleBook::new(), &[], &[], "u").expect_err("unknown");
        assert!(err.is_fatal());
    }
}
