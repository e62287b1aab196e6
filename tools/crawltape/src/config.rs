use crate::errors::CrawltapeError;
use crate::types::{FetchJob, Settings};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const PROJECT_CONFIG_FILE: &str = "crawltape.toml";
pub const CALLBACK_CONFIG_FILE: &str = "config.toml";
pub const MIN_MAX_FIXTURES: usize = 10;
pub const AUTH_HEADERS: [&str; 2] = ["Authorization", "Proxy-Authorization"];

// ── Project (global) configuration ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub capture: CaptureConfig,
    pub fields: FieldConfig,
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub base_path: PathBuf,
    pub extra_path: Option<String>,
    pub max_fixtures_per_callback: usize,
    pub concurrency: u32,
    pub ignore_worker_attributes: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldConfig {
    pub obligate_item_fields: Vec<String>,
    pub primary_item_fields: Vec<String>,
    pub skipped_fields: Vec<String>,
    pub request_skipped_fields: Vec<String>,
    pub excluded_headers: Vec<String>,
    pub included_auth_headers: Vec<String>,
    pub included_settings: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                enabled: true,
                base_path: PathBuf::from("crawltape"),
                extra_path: None,
                max_fixtures_per_callback: MIN_MAX_FIXTURES,
                concurrency: 1,
                ignore_worker_attributes: false,
            },
            fields: FieldConfig::default(),
            settings: Settings::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialProjectConfig {
    capture: Option<PartialCaptureConfig>,
    fields: Option<PartialFieldConfig>,
    settings: Option<Settings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCaptureConfig {
    enabled: Option<bool>,
    base_path: Option<PathBuf>,
    extra_path: Option<String>,
    max_fixtures_per_callback: Option<usize>,
    concurrency: Option<u32>,
    ignore_worker_attributes: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialFieldConfig {
    obligate_item_fields: Option<Vec<String>>,
    primary_item_fields: Option<Vec<String>>,
    skipped_fields: Option<Vec<String>>,
    request_skipped_fields: Option<Vec<String>>,
    excluded_headers: Option<Vec<String>>,
    included_auth_headers: Option<Vec<String>>,
    included_settings: Option<Vec<String>>,
}

impl ProjectConfig {
    /// Parse `crawltape.toml` contents over the defaults.
    pub fn from_toml(contents: &str) -> Result<Self, CrawltapeError> {
        let partial: PartialProjectConfig =
            toml::from_str(contents).map_err(|e| CrawltapeError::ConfigParse(e.to_string()))?;
        let mut cfg = Self::default();
        merge_partial_config(&mut cfg, partial);
        Ok(cfg)
    }

    pub fn load(project_root: &Path) -> Result<Self, CrawltapeError> {
        let path = project_root.join(PROJECT_CONFIG_FILE);
        let contents =
            std::fs::read_to_string(&path).map_err(|e| CrawltapeError::Io(e.to_string()))?;
        Self::from_toml(&contents)
    }

    /// Global cap, never below [`MIN_MAX_FIXTURES`].
    pub fn max_fixtures(&self) -> usize {
        self.capture
            .max_fixtures_per_callback
            .max(MIN_MAX_FIXTURES)
    }

    pub fn extra_path(&self) -> Option<&str> {
        self.capture
            .extra_path
            .as_deref()
            .filter(|extra| !extra.trim().is_empty())
    }

    pub fn base_dir(&self, project_root: &Path) -> PathBuf {
        if self.capture.base_path.is_absolute() {
            self.capture.base_path.clone()
        } else {
            project_root.join(&self.capture.base_path)
        }
    }
}

fn merge_partial_config(cfg: &mut ProjectConfig, partial: PartialProjectConfig) {
    if let Some(capture) = partial.capture {
        if let Some(value) = capture.enabled {
            cfg.capture.enabled = value;
        }
        if let Some(value) = capture.base_path {
            cfg.capture.base_path = value;
        }
        if let Some(value) = capture.extra_path {
            cfg.capture.extra_path = Some(value);
        }
        if let Some(value) = capture.max_fixtures_per_callback {
            cfg.capture.max_fixtures_per_callback = value;
        }
        if let Some(value) = capture.concurrency {
            cfg.capture.concurrency = value;
        }
        if let Some(value) = capture.ignore_worker_attributes {
            cfg.capture.ignore_worker_attributes = value;
        }
    }

    if let Some(fields) = partial.fields {
        if let Some(value) = fields.obligate_item_fields {
            cfg.fields.obligate_item_fields = value;
        }
        if let Some(value) = fields.primary_item_fields {
            cfg.fields.primary_item_fields = value;
        }
        if let Some(value) = fields.skipped_fields {
            cfg.fields.skipped_fields = value;
        }
        if let Some(value) = fields.request_skipped_fields {
            cfg.fields.request_skipped_fields = value;
        }
        if let Some(value) = fields.excluded_headers {
            cfg.fields.excluded_headers = value;
        }
        if let Some(value) = fields.included_auth_headers {
            cfg.fields.included_auth_headers = value;
        }
        if let Some(value) = fields.included_settings {
            cfg.fields.included_settings = value;
        }
    }

    if let Some(settings) = partial.settings {
        cfg.settings = settings;
    }
}

// ── Per-callback configuration ────────────────────────────────────────────────

/// Overrides stored as `config.toml` in a callback directory. Empty collections
/// and a missing `max_fixtures` mean "use the project value".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallbackConfig {
    pub max_fixtures: Option<usize>,
    pub obligate_item_fields: Vec<String>,
    pub primary_item_fields: Vec<String>,
    pub skipped_fields: Vec<String>,
    pub request_skipped_fields: Vec<String>,
    pub excluded_headers: Vec<String>,
    pub included_auth_headers: Vec<String>,
    pub included_settings: Vec<String>,
    pub record_rules: Vec<String>,
    pub job_rules: Vec<String>,
    pub requests_to_add: Vec<JobTemplate>,
}

impl CallbackConfig {
    pub fn from_toml(contents: &str) -> Result<Self, CrawltapeError> {
        toml::from_str(contents).map_err(|e| CrawltapeError::ConfigParse(e.to_string()))
    }

    /// Load the config of `dir`, or `None` when the directory has no config file.
    pub fn load(dir: &Path) -> Result<Option<Self>, CrawltapeError> {
        let path = dir.join(CALLBACK_CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&path).map_err(|e| CrawltapeError::Io(e.to_string()))?;
        Self::from_toml(&contents)
            .map(Some)
            .map_err(|e| match e {
                CrawltapeError::ConfigParse(cause) => {
                    CrawltapeError::ConfigParse(format!("{}: {cause}", path.display()))
                }
                other => other,
            })
    }
}

/// Extra job seeded into a callback by `update --new`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobTemplate {
    pub url: String,
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub cookies: BTreeMap<String, String>,
    pub meta: Map<String, Value>,
    pub priority: i32,
    pub dont_filter: bool,
    pub encoding: Option<String>,
}

impl JobTemplate {
    pub fn to_job(&self, callback: &str) -> FetchJob {
        let mut job = FetchJob::new(self.url.clone()).with_callback(callback);
        if let Some(encoding) = &self.encoding {
            job.encoding = encoding.clone();
        }
        if let Some(method) = &self.method {
            job.method = method.to_ascii_uppercase();
        }
        for (name, value) in &self.headers {
            job = job.with_header(name.clone(), value.as_bytes());
        }
        if let Some(body) = &self.body {
            job.body = crate::encoding::encode_text(body, &job.encoding);
        }
        job.cookies = self.cookies.clone();
        job.meta = self.meta.clone();
        job.priority = self.priority;
        job.dont_filter = self.dont_filter;
        job
    }
}

pub const DEFAULT_CALLBACK_CONFIG: &str = r#"# Settings in this file apply only to the callback directory it lives in.
# Each option mirrors a project-wide option in crawltape.toml. A value set
# here replaces the project value; an empty list or a missing key keeps it.
# Record and job rules named here run before the project-wide rules.

# max_fixtures = 10

# Record fields left out of comparisons.
skipped_fields = []

# Job fields left out of comparisons.
request_skipped_fields = []

excluded_headers = []
included_auth_headers = []

# Project settings copied into each fixture.
included_settings = []

# Fields every record must contain.
obligate_item_fields = []

# Fields every record must contain with a non-empty value.
primary_item_fields = []

# Names of registered predicates.
record_rules = []
job_rules = []

# Jobs fetched into new fixtures by `crawltape update --new`.
# [[requests_to_add]]
# url = "https://example.com/page"
# method = "POST"
# headers = { Referer = "https://example.com/" }
# meta = { category = "lamps" }
"#;

// ── Resolution ────────────────────────────────────────────────────────────────

/// Effective settings for one callback directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub max_fixtures: usize,
    pub obligate_item_fields: Vec<String>,
    pub primary_item_fields: Vec<String>,
    pub skipped_fields: Vec<String>,
    pub request_skipped_fields: Vec<String>,
    pub excluded_headers: Vec<String>,
    pub included_auth_headers: Vec<String>,
    pub included_settings: Vec<String>,
    pub record_rules: Vec<String>,
    pub job_rules: Vec<String>,
    pub ignore_worker_attributes: bool,
}

fn pick(local: Option<&Vec<String>>, global: &[String]) -> Vec<String> {
    match local {
        Some(values) if !values.is_empty() => values.clone(),
        _ => global.to_vec(),
    }
}

pub fn resolve(project: &ProjectConfig, local: Option<&CallbackConfig>) -> ResolvedConfig {
    let fields = &project.fields;
    ResolvedConfig {
        max_fixtures: local
            .and_then(|cfg| cfg.max_fixtures)
            .unwrap_or_else(|| project.max_fixtures()),
        obligate_item_fields: pick(
            local.map(|cfg| &cfg.obligate_item_fields),
            &fields.obligate_item_fields,
        ),
        primary_item_fields: pick(
            local.map(|cfg| &cfg.primary_item_fields),
            &fields.primary_item_fields,
        ),
        skipped_fields: pick(local.map(|cfg| &cfg.skipped_fields), &fields.skipped_fields),
        request_skipped_fields: pick(
            local.map(|cfg| &cfg.request_skipped_fields),
            &fields.request_skipped_fields,
        ),
        excluded_headers: pick(
            local.map(|cfg| &cfg.excluded_headers),
            &fields.excluded_headers,
        ),
        included_auth_headers: pick(
            local.map(|cfg| &cfg.included_auth_headers),
            &fields.included_auth_headers,
        ),
        included_settings: pick(
            local.map(|cfg| &cfg.included_settings),
            &fields.included_settings,
        ),
        record_rules: local.map(|cfg| cfg.record_rules.clone()).unwrap_or_default(),
        job_rules: local.map(|cfg| cfg.job_rules.clone()).unwrap_or_default(),
        ignore_worker_attributes: project.capture.ignore_worker_attributes,
    }
}

impl ResolvedConfig {
    /// Header names removed from captured jobs: the excluded list plus every
    /// auth header that is not explicitly allowed.
    pub fn dropped_headers(&self) -> Vec<String> {
        let mut dropped = self.excluded_headers.clone();
        for header in AUTH_HEADERS {
            let allowed = self
                .included_auth_headers
                .iter()
                .any(|h| h.eq_ignore_ascii_case(header));
            if !allowed && !dropped.iter().any(|h| h.eq_ignore_ascii_case(header)) {
                dropped.push(header.to_string());
            }
        }
        dropped
    }

    /// The project settings named in `included_settings`.
    pub fn settings_snapshot(&self, settings: &Settings) -> BTreeMap<String, Value> {
        self.included_settings
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    settings.get(name).cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve, CallbackConfig, ProjectConfig, DEFAULT_CALLBACK_CONFIG};
    use serde_json::json;

    #[test]
    fn project_config_merges_partial_toml_over_defaults() {
        let cfg = ProjectConfig::from_toml(
            r#"
[capture]
max_fixtures_per_callback = 25
extra_path = "nightly"

[fields]
skipped_fields = ["scraped_at"]

[settings]
USER_AGENT = "crawltape-test"
"#,
        )
        .expect("parse project config");
        assert_eq!(cfg.max_fixtures(), 25);
        assert_eq!(cfg.extra_path(), Some("nightly"));
        assert!(cfg.capture.enabled);
        assert_eq!(cfg.fields.skipped_fields, vec!["scraped_at".to_string()]);
        assert_eq!(cfg.settings["USER_AGENT"], json!("crawltape-test"));
    }

    #[test]
    fn global_cap_is_floored_at_ten() {
        let cfg = ProjectConfig::from_toml("[capture]\nmax_fixtures_per_callback = 3\n")
            .expect("parse");
        assert_eq!(cfg.max_fixtures(), 10);
        assert_eq!(resolve(&cfg, None).max_fixtures, 10);
    }

    #[test]
    fn explicit_local_values_win_and_defaults_fall_back() {
        let mut project = ProjectConfig::default();
        project.fields.obligate_item_fields = vec!["id".to_string()];
        project.fields.skipped_fields = vec!["ts".to_string()];

        let local = CallbackConfig {
            max_fixtures: Some(4),
            obligate_item_fields: vec!["name".to_string()],
            ..CallbackConfig::default()
        };
        let resolved = resolve(&project, Some(&local));
        assert_eq!(resolved.max_fixtures, 4);
        assert_eq!(resolved.obligate_item_fields, vec!["name".to_string()]);
        // Left at its default locally, so the project value applies.
        assert_eq!(resolved.skipped_fields, vec!["ts".to_string()]);

        let resolved = resolve(&project, Some(&CallbackConfig::default()));
        assert_eq!(resolved.max_fixtures, 10);
        assert_eq!(resolved.obligate_item_fields, vec!["id".to_string()]);
    }

    #[test]
    fn collections_are_replaced_not_merged() {
        let mut project = ProjectConfig::default();
        project.fields.excluded_headers = vec!["Cookie".to_string(), "X-Trace".to_string()];
        let local = CallbackConfig {
            excluded_headers: vec!["X-Session".to_string()],
            ..CallbackConfig::default()
        };
        let resolved = resolve(&project, Some(&local));
        assert_eq!(resolved.excluded_headers, vec!["X-Session".to_string()]);
    }

    #[test]
    fn auth_headers_drop_unless_allowed() {
        let mut project = ProjectConfig::default();
        project.fields.included_auth_headers = vec!["authorization".to_string()];
        let dropped = resolve(&project, None).dropped_headers();
        assert_eq!(dropped, vec!["Proxy-Authorization".to_string()]);
    }

    #[test]
    fn default_callback_config_parses_to_empty_overrides() {
        let cfg = CallbackConfig::from_toml(DEFAULT_CALLBACK_CONFIG).expect("parse default");
        assert_eq!(cfg, CallbackConfig::default());
    }

    #[test]
    fn job_templates_become_jobs_for_the_callback() {
        let cfg = CallbackConfig::from_toml(
            r#"
[[requests_to_add]]
url = "https://shop.test/extra"
method = "post"
headers = { Referer = "https://shop.test/" }
meta = { category = "lamps" }
"#,
        )
        .expect("parse");
        let job = cfg.requests_to_add[0].to_job("parse_item");
        assert_eq!(job.method, "POST");
        assert_eq!(job.callback_name(), "parse_item");
        assert_eq!(job.headers["Referer"], vec![b"https://shop.test/".to_vec()]);
        assert_eq!(job.meta["category"], json!("lamps"));
    }
}
