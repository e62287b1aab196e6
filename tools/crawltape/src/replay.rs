//! Re-running stored fixtures and checking the callback still behaves the
//! same way.

use crate::clean::{clean_job, clean_record, parse_entry};
use crate::codec::load_fixture;
use crate::config::{resolve, ProjectConfig, ResolvedConfig};
use crate::errors::CrawltapeError;
use crate::fixture::Fixture;
use crate::pipeline::{run_with_stages, StageRegistry};
use crate::store::CallbackDirectory;
use crate::types::{Attributes, FetchResult, OutcomeEntry};
use crate::validation::{validate_outcome, RuleBook};
use crate::worker::{Worker, WorkerType};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReplayPhase {
    Loaded,
    WorkerRestored,
    JobRestored,
    CallbackInvoked,
    PipelineApplied,
    Compared,
    Passed,
    Failed,
}

impl fmt::Display for ReplayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "loaded",
            Self::WorkerRestored => "worker_restored",
            Self::JobRestored => "job_restored",
            Self::CallbackInvoked => "callback_invoked",
            Self::PipelineApplied => "pipeline_applied",
            Self::Compared => "compared",
            Self::Passed => "passed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a replay needs beyond the fixture and the worker type.
#[derive(Clone, Copy)]
pub struct ReplayContext<'a> {
    pub project: &'a ProjectConfig,
    pub rules: &'a RuleBook,
    pub stages: &'a StageRegistry,
}

#[derive(Debug)]
pub struct ReplayReport {
    pub fixture: PathBuf,
    /// Last phase completed before the outcome was decided.
    pub reached: ReplayPhase,
    pub outcome: Result<(), CrawltapeError>,
}

impl ReplayReport {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn phase(&self) -> ReplayPhase {
        if self.passed() {
            ReplayPhase::Passed
        } else {
            ReplayPhase::Failed
        }
    }
}

/// Path, expected and actual value at the first point two JSON values differ.
pub fn first_difference(expected: &Value, actual: &Value) -> Option<(String, Value, Value)> {
    fn walk(path: String, expected: &Value, actual: &Value) -> Option<(String, Value, Value)> {
        match (expected, actual) {
            (Value::Object(e), Value::Object(a)) => {
                let mut keys: Vec<&String> = e.keys().chain(a.keys()).collect();
                keys.sort();
                keys.dedup();
                keys.into_iter().find_map(|key| {
                    walk(
                        format!("{path}.{key}"),
                        e.get(key).unwrap_or(&Value::Null),
                        a.get(key).unwrap_or(&Value::Null),
                    )
                    .or_else(|| {
                        (e.contains_key(key) != a.contains_key(key)).then(|| {
                            (
                                format!("{path}.{key}"),
                                e.get(key).cloned().unwrap_or(Value::Null),
                                a.get(key).cloned().unwrap_or(Value::Null),
                            )
                        })
                    })
                })
            }
            (Value::Array(e), Value::Array(a)) if e.len() == a.len() => e
                .iter()
                .zip(a)
                .enumerate()
                .find_map(|(i, (e, a))| walk(format!("{path}[{i}]"), e, a)),
            _ if expected == actual => None,
            _ => Some((path, expected.clone(), actual.clone())),
        }
    }
    walk("$".to_string(), expected, actual)
}

fn attribute_check(
    fixture: &Path,
    stage: &str,
    expected: &Attributes,
    actual: &Attributes,
) -> Result<(), CrawltapeError> {
    if expected == actual {
        return Ok(());
    }
    let expected = serde_json::to_value(expected).unwrap_or_default();
    let actual = serde_json::to_value(actual).unwrap_or_default();
    let detail = match first_difference(&expected, &actual) {
        Some((path, e, a)) => format!("{path}: expected {e}, found {a}"),
        None => "attributes differ".to_string(),
    };
    Err(CrawltapeError::AttributeMismatch {
        fixture: fixture.to_path_buf(),
        stage: stage.to_string(),
        detail,
    })
}

/// Compare fresh callback entries against the recorded ones, position by
/// position, with the cleaning and validation applied at capture time.
pub fn compare_outcomes(
    fixture_path: &Path,
    expected: &[OutcomeEntry],
    actual: &[OutcomeEntry],
    cfg: &ResolvedConfig,
    rules: &RuleBook,
    encoding: &str,
    url: &str,
) -> Result<(), CrawltapeError> {
    let mismatch = |index: usize, kind: &str, detail: String| CrawltapeError::ReplayMismatch {
        fixture: fixture_path.to_path_buf(),
        index,
        kind: kind.to_string(),
        detail,
    };

    let longest = expected.len().max(actual.len());
    for index in 0..longest {
        let (recorded, fresh) = match (expected.get(index), actual.get(index)) {
            (Some(recorded), Some(fresh)) => (recorded, fresh),
            (recorded, fresh) => {
                let kind = recorded.or(fresh).map(|e| e.kind().as_str()).unwrap_or("record");
                return Err(mismatch(
                    index,
                    kind,
                    format!(
                        "expected {} elements, found {}",
                        expected.len(),
                        actual.len()
                    ),
                ));
            }
        };
        let kind = recorded.kind().as_str();
        let (recorded, fresh) = match (recorded, parse_entry(fresh, cfg)) {
            (OutcomeEntry::Record(recorded), OutcomeEntry::Record(fresh)) => {
                let fresh = clean_record(&fresh, cfg);
                validate_outcome(cfg, rules, std::slice::from_ref(&fresh), &[], url)?;
                (clean_record(recorded, cfg), fresh)
            }
            (OutcomeEntry::Job(recorded), OutcomeEntry::Job(fresh)) => {
                let fresh = clean_job(&fresh, cfg, encoding);
                validate_outcome(cfg, rules, &[], std::slice::from_ref(&fresh), url)?;
                (clean_job(recorded, cfg, encoding), fresh)
            }
            (_, fresh) => {
                return Err(mismatch(
                    index,
                    kind,
                    format!("expected a {kind}, found a {}", fresh.kind().as_str()),
                ));
            }
        };
        if let Some((path, e, a)) = first_difference(&recorded, &fresh) {
            return Err(mismatch(
                index,
                kind,
                format!("{path}: expected {e}, found {a}"),
            ));
        }
    }
    Ok(())
}

/// Project settings overlaid with the settings stored in the fixture.
pub fn replay_settings(project: &ProjectConfig, fixture: &Fixture) -> crate::types::Settings {
    let mut settings = project.settings.clone();
    settings.extend(fixture.settings.clone());
    settings
}

pub fn replay_fixture<W: Worker>(
    ctx: ReplayContext<'_>,
    worker_type: &WorkerType<W>,
    path: &Path,
) -> ReplayReport {
    let mut reached = ReplayPhase::Loaded;
    let outcome = run_replay(ctx, worker_type, path, &mut reached);
    match &outcome {
        Ok(()) => tracing::debug!(fixture = %path.display(), "replay passed"),
        Err(error) => {
            tracing::debug!(fixture = %path.display(), phase = %reached, %error, "replay failed")
        }
    }
    ReplayReport {
        fixture: path.to_path_buf(),
        reached,
        outcome,
    }
}

fn run_replay<W: Worker>(
    ctx: ReplayContext<'_>,
    worker_type: &WorkerType<W>,
    path: &Path,
    reached: &mut ReplayPhase,
) -> Result<(), CrawltapeError> {
    let fixture = load_fixture(path)?;
    let local = match path.parent() {
        Some(dir) => crate::config::CallbackConfig::load(dir)?,
        None => None,
    };
    let cfg = resolve(ctx.project, local.as_ref());
    *reached = ReplayPhase::Loaded;

    let mut worker = worker_type.build(&replay_settings(ctx.project, &fixture))?;
    worker.restore_attributes(&fixture.attributes_before);
    if !cfg.ignore_worker_attributes {
        attribute_check(path, "before", &fixture.attributes_before, &worker.attributes())?;
    }
    *reached = ReplayPhase::WorkerRestored;

    let result = FetchResult::from_snapshot(fixture.job.clone(), &fixture.result);
    let callback = worker_type.callback(fixture.callback_name())?;
    let stages = ctx.stages.resolve(&fixture.stages)?;
    *reached = ReplayPhase::JobRestored;

    for stage in &stages {
        stage.before_callback(&result)?;
    }
    let mut entries = worker_type.callbacks.invoke(callback, &mut worker, &result)?;
    *reached = ReplayPhase::CallbackInvoked;
    for stage in stages.iter().rev() {
        entries = stage.after_callback(&result, entries)?;
    }
    *reached = ReplayPhase::PipelineApplied;

    compare_outcomes(
        path,
        fixture.outcome.entries(),
        &entries,
        &cfg,
        ctx.rules,
        &fixture.encoding,
        &fixture.job.url,
    )?;
    *reached = ReplayPhase::Compared;

    if !cfg.ignore_worker_attributes {
        attribute_check(path, "after", &fixture.attributes_after, &worker.attributes())?;
    }
    Ok(())
}

/// Fresh output of a stored invocation, used to refresh a fixture in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Rerun {
    pub entries: Vec<OutcomeEntry>,
    pub attributes_after: Attributes,
}

/// Run the fixture's callback on its stored result through its recorded
/// stages, without comparing anything.
pub fn rerun_fixture<W: Worker>(
    ctx: ReplayContext<'_>,
    worker_type: &WorkerType<W>,
    fixture: &Fixture,
) -> Result<Rerun, CrawltapeError> {
    let mut worker = worker_type.build(&replay_settings(ctx.project, fixture))?;
    worker.restore_attributes(&fixture.attributes_before);
    let result = FetchResult::from_snapshot(fixture.job.clone(), &fixture.result);
    let callback = worker_type.callback(fixture.callback_name())?;
    let stages = ctx.stages.resolve(&fixture.stages)?;
    let entries = run_with_stages(&stages, &result, |r| {
        worker_type.callbacks.invoke(callback, &mut worker, r)
    })?;
    Ok(Rerun {
        entries,
        attributes_after: worker.attributes(),
    })
}

/// Replay every fixture in `dir`, in fixture order, continuing past failures.
pub fn replay_directory<W: Worker>(
    ctx: ReplayContext<'_>,
    worker_type: &WorkerType<W>,
    dir: &CallbackDirectory,
) -> Result<Vec<ReplayReport>, CrawltapeError> {
    Ok(dir
        .fixture_paths()?
        .iter()
        .map(|path| replay_fixture(ctx, worker_type, path))
        .collect())
}
