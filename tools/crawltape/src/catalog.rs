//! Type-erased registry of the workers an application makes available to the
//! command line.

use crate::capture::CaptureOrchestrator;
use crate::errors::CrawltapeError;
use crate::fixture::Fixture;
use crate::pipeline::PipelineStage;
use crate::replay::{replay_fixture, rerun_fixture, ReplayContext, ReplayReport, Rerun};
use crate::session::{CrawlSession, Fetcher, JobSource, OutcomeAccumulator, SessionSummary};
use crate::types::{FetchJob, Settings};
use crate::worker::{Worker, WorkerType};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Operations the commands need from a worker type, independent of the
/// concrete worker.
pub trait WorkerKind {
    fn id(&self) -> &str;

    fn callback_names(&self) -> Vec<String>;

    fn replay(&self, ctx: ReplayContext<'_>, fixture: &Path) -> ReplayReport;

    fn rerun(&self, ctx: ReplayContext<'_>, fixture: &Fixture) -> Result<Rerun, CrawltapeError>;

    fn start_jobs(&self, settings: &Settings) -> Result<Vec<FetchJob>, CrawltapeError>;

    /// Callback the worker's URL rules pick for `job`.
    fn route(&self, settings: &Settings, job: &FetchJob) -> Result<Option<String>, CrawltapeError>;

    fn crawl(
        &self,
        orchestrator: &mut CaptureOrchestrator,
        fetcher: &dyn Fetcher,
        stages: Vec<Arc<dyn PipelineStage>>,
        source: JobSource,
        max_depth: usize,
        accumulator: &mut OutcomeAccumulator,
    ) -> Result<SessionSummary, CrawltapeError>;
}

impl<W: Worker> WorkerKind for WorkerType<W> {
    fn id(&self) -> &str {
        &self.id
    }

    fn callback_names(&self) -> Vec<String> {
        self.callbacks.names().to_vec()
    }

    fn replay(&self, ctx: ReplayContext<'_>, fixture: &Path) -> ReplayReport {
        replay_fixture(ctx, self, fixture)
    }

    fn rerun(&self, ctx: ReplayContext<'_>, fixture: &Fixture) -> Result<Rerun, CrawltapeError> {
        rerun_fixture(ctx, self, fixture)
    }

    fn start_jobs(&self, settings: &Settings) -> Result<Vec<FetchJob>, CrawltapeError> {
        Ok(self.build(settings)?.start_jobs())
    }

    fn route(&self, settings: &Settings, job: &FetchJob) -> Result<Option<String>, CrawltapeError> {
        Ok(self.build(settings)?.route(job))
    }

    fn crawl(
        &self,
        orchestrator: &mut CaptureOrchestrator,
        fetcher: &dyn Fetcher,
        stages: Vec<Arc<dyn PipelineStage>>,
        source: JobSource,
        max_depth: usize,
        accumulator: &mut OutcomeAccumulator,
    ) -> Result<SessionSummary, CrawltapeError> {
        let mut worker = self.build(&orchestrator.project().settings)?;
        CrawlSession::new(orchestrator, fetcher, &self.callbacks)
            .with_stages(stages)
            .with_max_depth(max_depth)
            .run(&mut worker, source, accumulator)
    }
}

#[derive(Default)]
pub struct Catalog {
    workers: BTreeMap<String, Box<dyn WorkerKind>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<W: Worker + 'static>(&mut self, worker_type: WorkerType<W>) {
        self.workers
            .insert(worker_type.id.clone(), Box::new(worker_type));
    }

    pub fn with_worker<W: Worker + 'static>(mut self, worker_type: WorkerType<W>) -> Self {
        self.register(worker_type);
        self
    }

    pub fn get(&self, id: &str) -> Result<&dyn WorkerKind, CrawltapeError> {
        self.workers
            .get(id)
            .map(|kind| kind.as_ref())
            .ok_or_else(|| CrawltapeError::Configuration(format!("Unknown worker '{id}'")))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.workers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Catalog;
    use crate::errors::CrawltapeError;
    use crate::types::{Attributes, FetchJob, FetchResult, OutcomeEntry};
    use crate::worker::{Worker, WorkerType};

    struct Blank;

    impl Worker for Blank {
        fn worker_id(&self) -> &str {
            "blank"
        }

        fn attributes(&self) -> Attributes {
            Attributes::new()
        }

        fn restore_attributes(&mut self, _attributes: &Attributes) {}

        fn start_jobs(&self) -> Vec<FetchJob> {
            vec![FetchJob::new("https://blank.test/")]
        }

        fn route(&self, job: &FetchJob) -> Option<String> {
            job.url.contains("/item/").then(|| "parse_item".to_string())
        }
    }

    fn parse(_w: &mut Blank, _r: &FetchResult) -> Result<Vec<OutcomeEntry>, CrawltapeError> {
        Ok(Vec::new())
    }

    #[test]
    fn catalog_erases_worker_types() {
        let catalog =
            Catalog::new().with_worker(WorkerType::new("blank", |_| Ok(Blank)).with_callback("parse", parse));
        let kind = catalog.get("blank").expect("registered worker");
        assert_eq!(kind.id(), "blank");
        assert_eq!(kind.callback_names(), vec!["parse".to_string()]);
        assert_eq!(catalog.ids(), vec!["blank"]);
        let err = catalog.get("other").err().expect("unknown worker");
        assert!(err.is_fatal());
    }

    #[test]
    fn start_jobs_and_routes_come_from_a_built_worker() {
        let catalog =
            Catalog::new().with_worker(WorkerType::new("blank", |_| Ok(Blank)).with_callback("parse", parse));
        let kind = catalog.get("blank").expect("registered worker");
        let settings = Default::default();
        let jobs = kind.start_jobs(&settings).expect("start jobs");
        assert_eq!(jobs, vec![FetchJob::new("https://blank.test/")]);
        let item = FetchJob::new("https://blank.test/item/7");
        assert_eq!(kind.route(&settings, &item).expect("route"), Some("parse_item".to_string()));
        assert_eq!(kind.route(&settings, &jobs[0]).expect("route"), None);
    }
}
