//! Turns live callback invocations into fixtures.
//!
//! A capture is split in two halves around the callback: `begin` snapshots
//! the job, result and worker attributes; `finish` snapshots the attributes
//! again, runs the validation gate, asks the sampler for a slot and writes
//! the fixture with its `view.json` entry.

use crate::clean::{clean_job, parse_entry, parse_job, split_outcome};
use crate::config::{resolve, ProjectConfig, ResolvedConfig};
use crate::errors::CrawltapeError;
use crate::fixture::{Fixture, FIXTURE_VERSION};
use crate::logging::JsonlLogger;
use crate::pipeline::{run_with_stages, stage_ids, PipelineStage};
use crate::sampling::{CaptureMode, SamplingController, SlotDecision};
use crate::store::{CallbackDirectory, IndexEntry};
use crate::types::{Attributes, ExtractionOutcome, FetchJob, FetchResult, OutcomeEntry, ResultSnapshot};
use crate::validation::{validate_outcome, RuleBook};
use crate::worker::{CallbackRegistry, Worker};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// State held between `begin` and `finish`.
#[derive(Debug, Clone)]
pub struct PendingCapture {
    pub dir: CallbackDirectory,
    pub cfg: ResolvedConfig,
    pub job: FetchJob,
    pub result: ResultSnapshot,
    pub encoding: String,
    pub attributes_before: Attributes,
}

#[derive(Debug)]
pub enum CaptureStatus {
    Written {
        slot: usize,
        path: PathBuf,
        overwrote: bool,
    },
    Discarded,
    /// The outcome failed validation; nothing was written.
    Rejected(CrawltapeError),
    /// Capture is switched off in the project config.
    Disabled,
}

impl CaptureStatus {
    pub fn slot(&self) -> Option<usize> {
        match self {
            Self::Written { slot, .. } => Some(*slot),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Captured {
    pub entries: Vec<OutcomeEntry>,
    pub status: CaptureStatus,
}

pub struct CaptureOrchestrator {
    project: ProjectConfig,
    base_dir: PathBuf,
    rules: RuleBook,
    sampler: SamplingController,
    journal: JsonlLogger,
    in_flight: usize,
}

impl CaptureOrchestrator {
    pub fn new(project: ProjectConfig, base_dir: impl Into<PathBuf>, rules: RuleBook) -> Self {
        let base_dir = base_dir.into();
        if project.capture.concurrency > 1 {
            tracing::warn!(
                concurrency = project.capture.concurrency,
                "fixture capture assumes one request at a time; concurrent captures may interleave"
            );
        }
        Self {
            journal: JsonlLogger::in_base_dir(&base_dir),
            project,
            base_dir,
            rules,
            sampler: SamplingController::new(),
            in_flight: 0,
        }
    }

    pub fn with_sampler(mut self, sampler: SamplingController) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    pub fn directory_for(&self, worker_id: &str, callback: &str) -> CallbackDirectory {
        CallbackDirectory::locate(&self.base_dir, worker_id, self.project.extra_path(), callback)
    }

    pub fn begin<W: Worker>(
        &mut self,
        worker: &W,
        result: &FetchResult,
    ) -> Result<PendingCapture, CrawltapeError> {
        let dir = self.directory_for(worker.worker_id(), result.job.callback_name());
        let local = dir.load_config()?;
        let cfg = resolve(&self.project, local.as_ref());
        let pending = PendingCapture {
            job: parse_job(&result.job, &cfg),
            result: result.snapshot(),
            encoding: result.encoding.clone(),
            attributes_before: worker.attributes(),
            dir,
            cfg,
        };
        self.in_flight += 1;
        if self.in_flight > 1 {
            tracing::warn!(
                in_flight = self.in_flight,
                "overlapping captures; fixture attributes may be inconsistent"
            );
        }
        Ok(pending)
    }

    /// Drop a pending capture whose callback failed.
    pub fn abandon(&mut self, pending: PendingCapture) {
        self.in_flight = self.in_flight.saturating_sub(1);
        tracing::debug!(url = %pending.job.url, "capture abandoned");
    }

    pub fn finish<W: Worker>(
        &mut self,
        worker: &W,
        pending: PendingCapture,
        entries: &[OutcomeEntry],
        stages: Vec<String>,
        mode: CaptureMode,
    ) -> Result<CaptureStatus, CrawltapeError> {
        self.in_flight = self.in_flight.saturating_sub(1);
        let PendingCapture {
            dir,
            cfg,
            job,
            result,
            encoding,
            attributes_before,
        } = pending;

        let parsed: Vec<OutcomeEntry> = entries.iter().map(|e| parse_entry(e, &cfg)).collect();
        let attributes_after = worker.attributes();
        let (records, jobs) = split_outcome(&parsed, &cfg, &encoding);
        if let Err(error) = validate_outcome(&cfg, &self.rules, &records, &jobs, &job.url) {
            if error.is_fatal() {
                return Err(error);
            }
            self.journal.note(
                "warn",
                "validation_failed",
                json!({
                    "worker": dir.worker_id,
                    "callback": dir.callback,
                    "url": job.url,
                    "cause": error.to_string(),
                }),
            );
            return Err(error);
        }

        let on_disk = dir.fixture_count()?;
        self.sampler.seed(&dir.path, on_disk);
        let decision = self.sampler.decide(&dir.path, on_disk, cfg.max_fixtures, mode);
        self.sampler.record_arrival(&dir.path);

        let slot = match decision {
            SlotDecision::Discard => {
                tracing::debug!(
                    worker = %dir.worker_id,
                    callback = %dir.callback,
                    seen = self.sampler.seen(&dir.path),
                    "capture discarded by sampling"
                );
                self.journal.note(
                    "info",
                    "fixture_discarded",
                    json!({
                        "worker": dir.worker_id,
                        "callback": dir.callback,
                        "url": job.url,
                        "seen": self.sampler.seen(&dir.path),
                    }),
                );
                return Ok(CaptureStatus::Discarded);
            }
            SlotDecision::Append(slot) | SlotDecision::Overwrite(slot) => slot,
        };

        if dir.establish()? {
            tracing::info!(path = %dir.path.display(), "created callback directory");
        }
        let index_entry = IndexEntry {
            request: clean_job(&job, &cfg, &encoding),
            num_items: records.len(),
            num_requests: jobs.len(),
        };
        let fixture = Fixture {
            version: FIXTURE_VERSION,
            settings: cfg.settings_snapshot(&self.project.settings),
            encoding,
            worker_id: dir.worker_id.clone(),
            job,
            result,
            attributes_before,
            attributes_after,
            outcome: ExtractionOutcome(parsed),
            stages,
        };
        let overwrote = dir.fixture_path(slot).exists();
        let path = dir.write_fixture(slot, &fixture)?;
        dir.write_index_entry(slot, index_entry)?;

        tracing::info!(path = %path.display(), overwrote, "fixture written");
        self.journal.note(
            "info",
            "fixture_written",
            json!({
                "worker": dir.worker_id,
                "callback": dir.callback,
                "url": fixture.job.url,
                "slot": slot,
                "overwrote": overwrote,
            }),
        );
        Ok(CaptureStatus::Written {
            slot,
            path,
            overwrote,
        })
    }

    /// Invoke the job's callback through `stages` and capture the result.
    ///
    /// Validation failures are reported through [`CaptureStatus::Rejected`];
    /// the callback's entries are returned either way.
    pub fn capture<W: Worker>(
        &mut self,
        worker: &mut W,
        callbacks: &CallbackRegistry<W>,
        stages: &[Arc<dyn PipelineStage>],
        result: &FetchResult,
        mode: CaptureMode,
    ) -> Result<Captured, CrawltapeError> {
        let name = result.job.callback_name();
        let callback = callbacks.lookup(name).ok_or_else(|| {
            CrawltapeError::Configuration(format!(
                "worker '{}' has no callback named '{name}'",
                worker.worker_id()
            ))
        })?;

        if !self.project.capture.enabled {
            let entries =
                run_with_stages(stages, result, |r| callbacks.invoke(callback, &mut *worker, r))?;
            return Ok(Captured {
                entries,
                status: CaptureStatus::Disabled,
            });
        }

        let pending = self.begin(worker, result)?;
        let entries = match run_with_stages(stages, result, |r| callbacks.invoke(callback, &mut *worker, r)) {
            Ok(entries) => entries,
            Err(error) => {
                self.abandon(pending);
                return Err(error);
            }
        };
        let status = match self.finish(worker, pending, &entries, stage_ids(stages), mode) {
            Ok(status) => status,
            Err(error @ CrawltapeError::Validation { .. }) => CaptureStatus::Rejected(error),
            Err(error) => return Err(error),
        };
        Ok(Captured { entries, status })
    }
}
