use crate::capture::{CaptureOrchestrator, CaptureStatus};
use crate::errors::CrawltapeError;
use crate::pipeline::PipelineStage;
use crate::sampling::CaptureMode;
use crate::types::{FetchJob, FetchResult, OutcomeEntry};
use crate::worker::{CallbackRegistry, Worker};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Network layer supplied by the embedding application.
pub trait Fetcher {
    fn fetch(&self, job: &FetchJob) -> Result<FetchResult, CrawltapeError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    pub job: FetchJob,
    pub depth: usize,
    pub mode: CaptureMode,
}

impl ScheduledJob {
    pub fn crawl(job: FetchJob) -> Self {
        Self {
            job,
            depth: 0,
            mode: CaptureMode::Crawl,
        }
    }

    pub fn parse(job: FetchJob) -> Self {
        Self {
            job,
            depth: 0,
            mode: CaptureMode::Parse,
        }
    }

    pub fn update(job: FetchJob, slot: Option<usize>) -> Self {
        Self {
            job,
            depth: 0,
            mode: CaptureMode::Update { slot },
        }
    }
}

/// Where a session's first jobs come from.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSource {
    /// The worker's own `start_jobs`, captured in crawl mode.
    WorkerDefault,
    Predetermined(Vec<ScheduledJob>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthOutcome {
    pub records: Vec<Value>,
    pub jobs: Vec<FetchJob>,
}

/// Records and jobs gathered during one top-level run, keyed by crawl depth.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeAccumulator {
    by_depth: BTreeMap<usize, DepthOutcome>,
}

impl OutcomeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, depth: usize, entries: &[OutcomeEntry]) {
        let slot = self.by_depth.entry(depth).or_default();
        for entry in entries {
            match entry {
                OutcomeEntry::Record(data) => slot.records.push(data.clone()),
                OutcomeEntry::Job(job) => slot.jobs.push(job.clone()),
            }
        }
    }

    pub fn at_depth(&self, depth: usize) -> Option<&DepthOutcome> {
        self.by_depth.get(&depth)
    }

    pub fn depths(&self) -> impl Iterator<Item = usize> + '_ {
        self.by_depth.keys().copied()
    }

    pub fn deepest(&self) -> Option<usize> {
        self.by_depth.keys().next_back().copied()
    }

    /// Every record, shallowest depth first.
    pub fn records(&self) -> impl Iterator<Item = &Value> + '_ {
        self.by_depth.values().flat_map(|d| d.records.iter())
    }

    pub fn total_records(&self) -> usize {
        self.by_depth.values().map(|d| d.records.len()).sum()
    }

    pub fn total_jobs(&self) -> usize {
        self.by_depth.values().map(|d| d.jobs.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub fetched: usize,
    pub fetch_failures: usize,
    pub written: usize,
    pub discarded: usize,
    pub rejected: usize,
}

pub struct CrawlSession<'a, W> {
    orchestrator: &'a mut CaptureOrchestrator,
    fetcher: &'a dyn Fetcher,
    callbacks: &'a CallbackRegistry<W>,
    stages: Vec<Arc<dyn PipelineStage>>,
    max_depth: usize,
}

impl<'a, W: Worker> CrawlSession<'a, W> {
    pub fn new(
        orchestrator: &'a mut CaptureOrchestrator,
        fetcher: &'a dyn Fetcher,
        callbacks: &'a CallbackRegistry<W>,
    ) -> Self {
        Self {
            orchestrator,
            fetcher,
            callbacks,
            stages: Vec::new(),
            max_depth: 0,
        }
    }

    pub fn with_stages(mut self, stages: Vec<Arc<dyn PipelineStage>>) -> Self {
        self.stages = stages;
        self
    }

    /// Follow yielded jobs until this depth. Zero captures only the initial
    /// jobs. Update jobs are never followed.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn run(
        &mut self,
        worker: &mut W,
        source: JobSource,
        accumulator: &mut OutcomeAccumulator,
    ) -> Result<SessionSummary, CrawltapeError> {
        let mut queue: VecDeque<ScheduledJob> = match source {
            JobSource::WorkerDefault => worker
                .start_jobs()
                .into_iter()
                .map(ScheduledJob::crawl)
                .collect(),
            JobSource::Predetermined(jobs) => jobs.into(),
        };
        let mut summary = SessionSummary::default();

        while let Some(scheduled) = queue.pop_front() {
            let result = match self.fetcher.fetch(&scheduled.job) {
                Ok(result) => result,
                Err(error) => {
                    tracing::warn!(url = %scheduled.job.url, %error, "fetch failed");
                    summary.fetch_failures += 1;
                    continue;
                }
            };
            summary.fetched += 1;

            let captured = self.orchestrator.capture(
                worker,
                self.callbacks,
                &self.stages,
                &result,
                scheduled.mode,
            )?;
            match captured.status {
                CaptureStatus::Written { .. } => summary.written += 1,
                CaptureStatus::Discarded => summary.discarded += 1,
                CaptureStatus::Disabled => {}
                CaptureStatus::Rejected(error) => {
                    tracing::warn!(url = %result.url, %error, "capture rejected");
                    summary.rejected += 1;
                    continue;
                }
            }
            accumulator.add(scheduled.depth, &captured.entries);

            if matches!(scheduled.mode, CaptureMode::Update { .. })
                || scheduled.depth >= self.max_depth
            {
                continue;
            }
            for entry in captured.entries {
                if let OutcomeEntry::Job(job) = entry {
                    queue.push_back(ScheduledJob {
                        job,
                        depth: scheduled.depth + 1,
                        mode: scheduled.mode,
                    });
                }
            }
        }
        Ok(summary)
    }
}
