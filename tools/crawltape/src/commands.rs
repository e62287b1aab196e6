//! The `inspect`, `update`, `parse`, `crawl`, `establish` and `replay` commands.

use crate::capture::CaptureOrchestrator;
use crate::catalog::{Catalog, WorkerKind};
use crate::clean::{clean_job, headers_to_json, parse_entry, parse_job, split_outcome};
use crate::codec::load_fixture;
use crate::config::{resolve, ProjectConfig, PROJECT_CONFIG_FILE};
use crate::encoding::decode_text;
use crate::errors::CrawltapeError;
use crate::fixture::{Fixture, FIXTURE_VERSION};
use crate::pipeline::{PipelineStage, StageRegistry};
use crate::replay::{ReplayContext, Rerun};
use crate::session::{Fetcher, JobSource, OutcomeAccumulator, ScheduledJob};
use crate::store::{
    callback_dirs, fixture_number, parse_fixture_arg, worker_dir, CallbackDirectory, IndexEntry,
};
use crate::types::{ExtractionOutcome, FetchJob, OutcomeEntry};
use crate::validation::{validate_outcome, RuleBook};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ── Project ───────────────────────────────────────────────────────────────────

/// A crawltape project: its root, config and the application's registries.
pub struct Project {
    pub root: PathBuf,
    pub config: ProjectConfig,
    pub catalog: Catalog,
    pub rules: RuleBook,
    pub stages: StageRegistry,
    pub fetcher: Option<Box<dyn Fetcher>>,
}

impl Project {
    /// Nearest ancestor of `start` holding a `crawltape.toml`.
    pub fn discover(start: &Path) -> Result<PathBuf, CrawltapeError> {
        start
            .ancestors()
            .find(|dir| dir.join(PROJECT_CONFIG_FILE).is_file())
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                CrawltapeError::Configuration(format!(
                    "No active crawltape project ({PROJECT_CONFIG_FILE} not found)"
                ))
            })
    }

    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CrawltapeError> {
        let root = root.into();
        let config = ProjectConfig::load(&root)?;
        Ok(Self {
            root,
            config,
            catalog: Catalog::new(),
            rules: RuleBook::new(),
            stages: StageRegistry::new(),
            fetcher: None,
        })
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_rules(mut self, rules: RuleBook) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_stages(mut self, stages: StageRegistry) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn base_dir(&self) -> PathBuf {
        self.config.base_dir(&self.root)
    }

    pub fn callback_dir(&self, worker: &str, callback: &str) -> CallbackDirectory {
        CallbackDirectory::locate(&self.base_dir(), worker, self.config.extra_path(), callback)
    }

    pub fn replay_context(&self) -> ReplayContext<'_> {
        ReplayContext {
            project: &self.config,
            rules: &self.rules,
            stages: &self.stages,
        }
    }

    pub fn orchestrator(&self) -> CaptureOrchestrator {
        CaptureOrchestrator::new(self.config.clone(), self.base_dir(), self.rules.clone())
    }
}

// ── Target selection ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub worker: String,
    pub callback: Option<String>,
    pub fixture: Option<String>,
}

impl Selection {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            ..Self::default()
        }
    }

    pub fn callback(mut self, callback: Option<String>) -> Self {
        self.callback = callback;
        self
    }

    pub fn fixture(mut self, fixture: Option<String>) -> Self {
        self.fixture = fixture;
        self
    }
}

/// Fixture files a command acts on.
pub fn resolve_targets(project: &Project, selection: &Selection) -> Result<Vec<PathBuf>, CrawltapeError> {
    if selection.fixture.is_some() && selection.callback.is_none() {
        return Err(CrawltapeError::Cli(
            "Can't specify a fixture without a callback".to_string(),
        ));
    }
    let base = project.base_dir();
    if !worker_dir(&base, &selection.worker).is_dir() {
        return Err(CrawltapeError::Configuration(format!(
            "No recorded data found for worker '{}'",
            selection.worker
        )));
    }

    let Some(callback) = &selection.callback else {
        let mut paths = Vec::new();
        for dir in callback_dirs(&base, &selection.worker, project.config.extra_path())? {
            paths.extend(dir.fixture_paths()?);
        }
        return Ok(paths);
    };

    let dir = project.callback_dir(&selection.worker, callback);
    if !dir.exists() {
        return Err(CrawltapeError::Configuration(format!(
            "No recorded data found for callback '{callback}' of worker '{}'",
            selection.worker
        )));
    }
    match &selection.fixture {
        Some(fixture) => {
            let path = dir.path.join(parse_fixture_arg(fixture));
            if !path.is_file() {
                return Err(CrawltapeError::Configuration(format!(
                    "Fixture '{}' not found",
                    path.display()
                )));
            }
            Ok(vec![path])
        }
        None => dir.fixture_paths(),
    }
}

fn emit(out: &mut dyn Write, line: impl AsRef<str>) -> Result<(), CrawltapeError> {
    writeln!(out, "{}", line.as_ref()).map_err(|e| CrawltapeError::Io(e.to_string()))
}

fn directory_of(path: &Path) -> Result<(CallbackDirectory, usize), CrawltapeError> {
    let dir = CallbackDirectory::containing(path).ok_or_else(|| {
        CrawltapeError::Configuration(format!(
            "{} is not inside a callback directory",
            path.display()
        ))
    })?;
    let number = path
        .file_name()
        .and_then(|name| fixture_number(&name.to_string_lossy()))
        .ok_or_else(|| {
            CrawltapeError::Configuration(format!("{} is not a fixture file", path.display()))
        })?;
    Ok((dir, number))
}

// ── inspect ───────────────────────────────────────────────────────────────────

fn job_view(job: &FetchJob, encoding: &str) -> Value {
    json!({
        "url": job.url,
        "method": job.method,
        "headers": headers_to_json(&job.headers, encoding),
        "body": decode_text(&job.body, encoding),
        "cookies": job.cookies,
        "meta": job.meta,
        "callback": job.callback_name(),
        "priority": job.priority,
        "dont_filter": job.dont_filter,
        "encoding": job.encoding,
    })
}

/// JSON view of a fixture with every byte field decoded as text.
pub fn fixture_view(fixture: &Fixture) -> Value {
    let encoding = fixture.encoding.as_str();
    let outcome: Vec<Value> = fixture
        .outcome
        .entries()
        .iter()
        .map(|entry| match entry {
            OutcomeEntry::Record(data) => json!({"type": "record", "data": data}),
            OutcomeEntry::Job(job) => json!({"type": "job", "data": job_view(job, encoding)}),
        })
        .collect();
    json!({
        "version": fixture.version,
        "encoding": encoding,
        "worker_id": fixture.worker_id,
        "job": job_view(&fixture.job, encoding),
        "result": {
            "url": fixture.result.url,
            "status": fixture.result.status,
            "headers": headers_to_json(&fixture.result.headers, encoding),
            "body": decode_text(&fixture.result.body, encoding),
            "encoding": fixture.result.encoding,
            "flags": fixture.result.flags,
        },
        "attributes_before": fixture.attributes_before,
        "attributes_after": fixture.attributes_after,
        "outcome": outcome,
        "stages": fixture.stages,
        "settings": fixture.settings,
    })
}

pub fn inspect(project: &Project, selection: &Selection, out: &mut dyn Write) -> Result<i32, CrawltapeError> {
    let Some(path) = resolve_targets(project, selection)?.into_iter().next() else {
        return Err(CrawltapeError::Cli("inspect needs a fixture".to_string()));
    };
    let fixture = load_fixture(&path)?;
    let rendered = serde_json::to_string_pretty(&fixture_view(&fixture))
        .map_err(|e| CrawltapeError::Serialization(e.to_string()))?;
    emit(out, rendered)?;
    Ok(0)
}

// ── update ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub dynamic: bool,
    pub new: bool,
    /// Send the worker's homepage cookies with every fetched job.
    pub homepage: bool,
}

/// Rewrite fixture `number` of `dir` from a fresh run of its callback,
/// in the current format.
pub fn refresh_fixture(
    project: &Project,
    dir: &CallbackDirectory,
    number: usize,
    mut fixture: Fixture,
    rerun: Rerun,
) -> Result<PathBuf, CrawltapeError> {
    let local = dir.load_config()?;
    let cfg = resolve(&project.config, local.as_ref());
    let parsed: Vec<OutcomeEntry> = rerun.entries.iter().map(|e| parse_entry(e, &cfg)).collect();
    let (records, jobs) = split_outcome(&parsed, &cfg, &fixture.encoding);
    validate_outcome(&cfg, &project.rules, &records, &jobs, &fixture.job.url)?;

    fixture.version = FIXTURE_VERSION;
    fixture.job = parse_job(&fixture.job, &cfg);
    fixture.outcome = ExtractionOutcome(parsed);
    fixture.attributes_after = rerun.attributes_after;
    if fixture.worker_id.is_empty() {
        fixture.worker_id = dir.worker_id.clone();
    }
    let path = dir.write_fixture(number, &fixture)?;
    dir.write_index_entry(
        number,
        IndexEntry {
            request: clean_job(&fixture.job, &cfg, &fixture.encoding),
            num_items: records.len(),
            num_requests: jobs.len(),
        },
    )?;
    Ok(path)
}

/// Jobs from `requests_to_add`. Each one takes the next free slot when it
/// is persisted, so a failed fetch or a rejected capture leaves no gap; the
/// directory cap is enforced there too.
fn jobs_to_add(project: &Project, dir: &CallbackDirectory) -> Result<Vec<ScheduledJob>, CrawltapeError> {
    let Some(local) = dir.load_config()? else {
        return Ok(Vec::new());
    };
    Ok(local
        .requests_to_add
        .iter()
        .map(|template| ScheduledJob::update(template.to_job(&dir.callback), None))
        .collect())
}

pub fn update(
    project: &Project,
    selection: &Selection,
    options: UpdateOptions,
    out: &mut dyn Write,
) -> Result<i32, CrawltapeError> {
    let fetcher = match (project.fetcher.as_deref(), options.dynamic || options.new) {
        (Some(fetcher), true) => Some(fetcher),
        (None, true) => {
            return Err(CrawltapeError::Configuration(
                "update --dynamic and --new need a fetcher registered with the project".to_string(),
            ))
        }
        (_, false) => None,
    };
    if options.homepage && fetcher.is_none() {
        return Err(CrawltapeError::Cli(
            "--homepage only applies to update --dynamic or --new".to_string(),
        ));
    }
    let paths = resolve_targets(project, selection)?;
    let kind = project.catalog.get(&selection.worker)?;

    let mut scheduled = Vec::new();
    for path in &paths {
        let (dir, number) = directory_of(path)?;
        let fixture = load_fixture(path)?;
        if options.dynamic {
            scheduled.push(ScheduledJob::update(fixture.job.clone(), Some(number)));
            continue;
        }
        let rerun = kind.rerun(project.replay_context(), &fixture)?;
        let written = refresh_fixture(project, &dir, number, fixture, rerun)?;
        emit(out, format!("Fixture '{}' successfully updated.", written.display()))?;
    }

    if options.new {
        let dirs = match &selection.callback {
            Some(callback) => vec![project.callback_dir(&selection.worker, callback)],
            None => callback_dirs(
                &project.base_dir(),
                &selection.worker,
                project.config.extra_path(),
            )?,
        };
        for dir in &dirs {
            scheduled.extend(jobs_to_add(project, dir)?);
        }
    }

    if let Some(fetcher) = fetcher {
        if scheduled.is_empty() {
            emit(out, "Nothing to fetch.")?;
            return Ok(0);
        }
        if options.homepage {
            let cookies = homepage_cookies(project, kind, fetcher, false, out)?;
            if !cookies.is_empty() {
                for pending in &mut scheduled {
                    pending.job.cookies = cookies.clone();
                }
            }
        }
        let stages: Vec<Arc<dyn PipelineStage>> = project.stages.pipeline();
        let mut orchestrator = project.orchestrator();
        let mut accumulator = OutcomeAccumulator::new();
        let summary = kind.crawl(
            &mut orchestrator,
            fetcher,
            stages,
            JobSource::Predetermined(scheduled),
            0,
            &mut accumulator,
        )?;
        emit(
            out,
            format!(
                "Fetched {} job(s): {} fixture(s) written, {} discarded, {} rejected, {} fetch failure(s).",
                summary.fetched, summary.written, summary.discarded, summary.rejected, summary.fetch_failures
            ),
        )?;
    }
    Ok(0)
}

/// Cookies set by the worker's homepage, its only start job.
///
/// When the homepage can't be determined, `required` makes that an error;
/// otherwise a notice is printed and no cookies are returned.
fn homepage_cookies(
    project: &Project,
    kind: &dyn WorkerKind,
    fetcher: &dyn Fetcher,
    required: bool,
    out: &mut dyn Write,
) -> Result<BTreeMap<String, String>, CrawltapeError> {
    let start_jobs = kind.start_jobs(&project.config.settings)?;
    let [homepage] = start_jobs.as_slice() else {
        if required {
            return Err(CrawltapeError::Cli(format!(
                "Homepage option selected but can't determine homepage from the start jobs of worker '{}'",
                kind.id()
            )));
        }
        emit(out, "Couldn't determine homepage to collect cookies from")?;
        return Ok(BTreeMap::new());
    };
    let result = fetcher.fetch(homepage)?;
    emit(out, format!("HOMEPAGE STATUS CODE: {}", result.status))?;
    Ok(result.cookies())
}

fn require_fetcher<'p>(project: &'p Project, command: &str) -> Result<&'p dyn Fetcher, CrawltapeError> {
    project.fetcher.as_deref().ok_or_else(|| {
        CrawltapeError::Configuration(format!(
            "{command} needs a fetcher registered with the project"
        ))
    })
}

// ── parse ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOptions {
    pub urls: Vec<String>,
    pub callback: Option<String>,
    /// Levels to fetch; 1 fetches only the given urls.
    pub depth: usize,
    /// Raw JSON objects merged into every job.
    pub meta: Option<String>,
    pub headers: Option<String>,
    pub cookies: Option<String>,
    pub method: Option<String>,
    pub pipelines: bool,
    pub rules: bool,
    pub homepage: bool,
    pub noitems: bool,
    pub nolinks: bool,
    pub verbose: bool,
}

fn json_object(raw: Option<&str>, flag: &str) -> Result<Option<Map<String, Value>>, CrawltapeError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        _ => Err(CrawltapeError::Cli(format!(
            "Invalid {flag} value, pass a valid json string to {flag}."
        ))),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn parse_jobs(
    project: &Project,
    kind: &dyn WorkerKind,
    fetcher: &dyn Fetcher,
    options: &ParseOptions,
    out: &mut dyn Write,
) -> Result<Vec<ScheduledJob>, CrawltapeError> {
    let meta = json_object(options.meta.as_deref(), "--meta")?;
    let headers = json_object(options.headers.as_deref(), "--headers")?;
    let cookies = json_object(options.cookies.as_deref(), "--cookies")?;
    let homepage = if options.homepage {
        Some(homepage_cookies(project, kind, fetcher, true, out)?)
    } else {
        None
    };

    let mut jobs = Vec::new();
    for url in &options.urls {
        let mut job = FetchJob::new(url.as_str());
        for (name, value) in headers.iter().flatten() {
            job.headers.insert(name.clone(), vec![value_text(value).into_bytes()]);
        }
        if let Some(meta) = &meta {
            job.meta.extend(meta.clone());
        }
        if let Some(homepage) = &homepage {
            job.cookies = homepage.clone();
        }
        if let Some(cookies) = &cookies {
            job.cookies = cookies
                .iter()
                .map(|(name, value)| (name.clone(), value_text(value)))
                .collect();
        }
        if options
            .method
            .as_deref()
            .is_some_and(|method| method.eq_ignore_ascii_case("post"))
        {
            job.method = "POST".to_string();
        }

        let callback = match (&options.callback, options.rules) {
            (Some(callback), _) => Some(callback.clone()),
            (None, true) => match kind.route(&project.config.settings, &job)? {
                Some(callback) => Some(callback),
                None => {
                    tracing::error!(url = %job.url, worker = kind.id(), "no rule matches the url");
                    emit(
                        out,
                        format!("Cannot find a rule that matches '{}' in worker '{}'", job.url, kind.id()),
                    )?;
                    continue;
                }
            },
            (None, false) => None,
        };
        if let Some(callback) = callback {
            job = job.with_callback(callback);
        }
        jobs.push(ScheduledJob::parse(job));
    }
    Ok(jobs)
}

fn print_records(out: &mut dyn Write, records: &[Value]) -> Result<(), CrawltapeError> {
    emit(out, format!("# Scraped Items {}", "-".repeat(60)))?;
    let rendered = serde_json::to_string_pretty(records)
        .map_err(|e| CrawltapeError::Serialization(e.to_string()))?;
    emit(out, rendered)
}

fn print_jobs(out: &mut dyn Write, jobs: &[FetchJob]) -> Result<(), CrawltapeError> {
    emit(out, format!("# Requests {}", "-".repeat(65)))?;
    let views: Vec<Value> = jobs.iter().map(|job| job_view(job, &job.encoding)).collect();
    let rendered = serde_json::to_string_pretty(&views)
        .map_err(|e| CrawltapeError::Serialization(e.to_string()))?;
    emit(out, rendered)
}

/// Print what a parse run extracted. Levels count from 1.
pub fn print_parse_results(
    accumulator: &OutcomeAccumulator,
    options: &ParseOptions,
    out: &mut dyn Write,
) -> Result<(), CrawltapeError> {
    let max_level = accumulator.deepest().map_or(0, |depth| depth + 1);
    if options.verbose {
        for level in 1..=max_level {
            emit(out, format!("\n>>> DEPTH LEVEL: {level} <<<"))?;
            let outcome = accumulator.at_depth(level - 1);
            if !options.noitems {
                print_records(out, outcome.map_or(&[][..], |o| o.records.as_slice()))?;
            }
            if !options.nolinks {
                print_jobs(out, outcome.map_or(&[][..], |o| o.jobs.as_slice()))?;
            }
        }
        return Ok(());
    }

    emit(out, format!("\n>>> STATUS DEPTH LEVEL {max_level} <<<"))?;
    if !options.noitems {
        let records: Vec<Value> = accumulator.records().cloned().collect();
        print_records(out, &records)?;
    }
    if !options.nolinks {
        let last = accumulator.deepest().and_then(|depth| accumulator.at_depth(depth));
        print_jobs(out, last.map_or(&[][..], |o| o.jobs.as_slice()))?;
    }
    Ok(())
}

/// Fetch `options.urls` with the worker, follow yielded jobs up to the
/// requested depth, and print the records and jobs per level. Captures fill
/// free slots only; nothing is sampled away or overwritten.
pub fn parse(
    project: &Project,
    worker: &str,
    options: &ParseOptions,
    out: &mut dyn Write,
) -> Result<i32, CrawltapeError> {
    let fetcher = require_fetcher(project, "parse")?;
    let kind = project.catalog.get(worker)?;
    if options.urls.is_empty() {
        return Err(CrawltapeError::Cli("parse needs at least one url".to_string()));
    }
    let jobs = parse_jobs(project, kind, fetcher, options, out)?;
    let stages = if options.pipelines {
        project.stages.pipeline()
    } else {
        Vec::new()
    };

    let mut orchestrator = project.orchestrator();
    let mut accumulator = OutcomeAccumulator::new();
    let summary = kind.crawl(
        &mut orchestrator,
        fetcher,
        stages,
        JobSource::Predetermined(jobs),
        options.depth.saturating_sub(1),
        &mut accumulator,
    )?;
    if summary.fetched == 0 {
        tracing::error!(url = %options.urls[0], "no response downloaded");
    }
    print_parse_results(&accumulator, options, out)?;
    Ok(0)
}

// ── crawl ─────────────────────────────────────────────────────────────────────

/// Run the worker from its own start jobs, capturing in crawl mode.
pub fn crawl(
    project: &Project,
    worker: &str,
    depth: usize,
    out: &mut dyn Write,
) -> Result<i32, CrawltapeError> {
    let fetcher = require_fetcher(project, "crawl")?;
    let kind = project.catalog.get(worker)?;
    let mut orchestrator = project.orchestrator();
    let mut accumulator = OutcomeAccumulator::new();
    let summary = kind.crawl(
        &mut orchestrator,
        fetcher,
        project.stages.pipeline(),
        JobSource::WorkerDefault,
        depth.saturating_sub(1),
        &mut accumulator,
    )?;
    emit(
        out,
        format!(
            "Fetched {} job(s): {} fixture(s) written, {} discarded, {} rejected, {} fetch failure(s).",
            summary.fetched, summary.written, summary.discarded, summary.rejected, summary.fetch_failures
        ),
    )?;
    Ok(0)
}

// ── establish ─────────────────────────────────────────────────────────────────

pub fn establish(
    project: &Project,
    worker: &str,
    callback: Option<&str>,
    out: &mut dyn Write,
) -> Result<i32, CrawltapeError> {
    let kind = project.catalog.get(worker)?;
    let names = kind.callback_names();

    let mut did_something = false;
    match callback {
        Some(callback) => {
            if !names.iter().any(|name| name == callback) {
                return Err(CrawltapeError::Configuration(format!(
                    "worker '{worker}' has no callback named '{callback}'"
                )));
            }
            let dir = project.callback_dir(worker, callback);
            if dir.exists() {
                return Err(CrawltapeError::Configuration(format!(
                    "Can't use 'establish' with a callback if the callback directory for worker '{worker}' exists already"
                )));
            }
            dir.establish()?;
            did_something = true;
        }
        None => {
            for name in &names {
                let dir = project.callback_dir(worker, name);
                let existed = dir.exists();
                let wrote_config = dir.establish()?;
                did_something |= !existed && wrote_config;
            }
        }
    }

    if did_something {
        emit(
            out,
            "Command successful! Callback-specific settings can now be tweaked in the generated config.toml file(s).",
        )?;
    } else {
        emit(
            out,
            "Command did nothing because a directory already exists for the callback(s) indicated.",
        )?;
    }
    Ok(0)
}

// ── replay ────────────────────────────────────────────────────────────────────

pub fn replay(project: &Project, selection: &Selection, out: &mut dyn Write) -> Result<i32, CrawltapeError> {
    let paths = resolve_targets(project, selection)?;
    let kind: &dyn WorkerKind = project.catalog.get(&selection.worker)?;
    if paths.is_empty() {
        emit(out, "No fixtures to replay.")?;
        return Ok(0);
    }

    let mut failed = 0usize;
    for path in &paths {
        let report = kind.replay(project.replay_context(), path);
        match &report.outcome {
            Ok(()) => emit(out, format!("PASS {}", path.display()))?,
            Err(error) => {
                failed += 1;
                emit(out, format!("FAIL {} (after {})", path.display(), report.reached))?;
                for line in error.to_string().lines() {
                    emit(out, format!("    {line}"))?;
                }
            }
        }
    }
    emit(
        out,
        format!("{} passed, {failed} failed", paths.len() - failed),
    )?;
    Ok(if failed > 0 { 1 } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::{fixture_view, resolve_targets, Project, Selection};
    use crate::config::PROJECT_CONFIG_FILE;
    use crate::fixture::sample;
    use crate::store::CallbackDirectory;

    fn project_in(root: &std::path::Path) -> Project {
        std::fs::write(root.join(PROJECT_CONFIG_FILE), "[capture]\nbase_path = \"tape\"\n")
            .expect("write project config");
        Project::open(root).expect("open project")
    }

    #[test]
    fn discover_walks_up_to_the_project_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let _ = project_in(temp.path());
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        assert_eq!(Project::discover(&nested).expect("discover"), temp.path());
    }

    #[test]
    fn fixture_without_callback_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = project_in(temp.path());
        let selection = Selection::new("shop").fixture(Some("1".to_string()));
        let err = resolve_targets(&project, &selection).expect_err("misuse");
        assert!(err.to_string().contains("without a callback"));
    }

    #[test]
    fn targets_cover_every_callback_of_a_worker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = project_in(temp.path());
        let fixture = sample::fixture();
        for cb in ["parse", "parse_item"] {
            CallbackDirectory::locate(&project.base_dir(), "shop", None, cb)
                .write_fixture(1, &fixture)
                .expect("write");
        }
        let all = resolve_targets(&project, &Selection::new("shop")).expect("targets");
        assert_eq!(all.len(), 2);
        let one = resolve_targets(
            &project,
            &Selection::new("shop")
                .callback(Some("parse".to_string()))
                .fixture(Some("fixture1".to_string())),
        )
        .expect("single target");
        assert!(one[0].ends_with("tape/tests/shop/parse/fixture1.bin"));
    }

    #[test]
    fn view_renders_bytes_as_text() {
        let view = fixture_view(&sample::fixture());
        assert_eq!(view["result"]["body"], "<html>ok</html>");
        assert_eq!(view["job"]["headers"]["Accept"], "text/html");
        assert_eq!(view["outcome"][1]["type"], "job");
        assert_eq!(view["outcome"][1]["data"]["callback"], "parse_item");
    }
}
