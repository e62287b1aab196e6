use crawltape::capture::{CaptureOrchestrator, CaptureStatus};
use crawltape::config::ProjectConfig;
use crawltape::errors::CrawltapeError;
use crawltape::pipeline::StageRegistry;
use crawltape::replay::{replay_directory, replay_fixture, ReplayContext, ReplayPhase};
use crawltape::sampling::{CaptureMode, SamplingController};
use crawltape::types::{Attributes, FetchJob, FetchResult, OutcomeEntry};
use crawltape::validation::RuleBook;
use crawltape::worker::{CallbackRegistry, Worker, WorkerType};
use serde_json::json;

struct Shop {
    pages: u64,
}

impl Worker for Shop {
    fn worker_id(&self) -> &str {
        "shop"
    }

    fn attributes(&self) -> Attributes {
        Attributes::from([("pages".to_string(), json!(self.pages))])
    }

    fn restore_attributes(&mut self, attributes: &Attributes) {
        self.pages = attributes.get("pages").and_then(|v| v.as_u64()).unwrap_or(0);
    }
}

fn parse(worker: &mut Shop, _result: &FetchResult) -> Result<Vec<OutcomeEntry>, CrawltapeError> {
    worker.pages += 1;
    Ok(vec![
        OutcomeEntry::Record(json!({"id": 1})),
        OutcomeEntry::Job(FetchJob::new("https://x/2")),
    ])
}

fn parse_without_record(
    worker: &mut Shop,
    _result: &FetchResult,
) -> Result<Vec<OutcomeEntry>, CrawltapeError> {
    worker.pages += 1;
    Ok(vec![OutcomeEntry::Job(FetchJob::new("https://x/2"))])
}

fn parse_twice(worker: &mut Shop, result: &FetchResult) -> Result<Vec<OutcomeEntry>, CrawltapeError> {
    worker.pages += 1;
    parse(worker, result)
}

fn shop_type(callback: crawltape::worker::CallbackFn<Shop>) -> WorkerType<Shop> {
    WorkerType::new("shop", |_| Ok(Shop { pages: 0 })).with_callback("parse", callback)
}

fn capture_one(base: &std::path::Path, project: ProjectConfig) -> CaptureStatus {
    let mut orchestrator = CaptureOrchestrator::new(project, base, RuleBook::new())
        .with_sampler(SamplingController::seeded(11));
    let mut callbacks = CallbackRegistry::new();
    callbacks.register("parse", parse);
    let result = FetchResult::new(FetchJob::new("https://x/1"), 200, b"<html></html>".to_vec());
    orchestrator
        .capture(&mut Shop { pages: 0 }, &callbacks, &[], &result, CaptureMode::Crawl)
        .expect("capture")
        .status
}

#[test]
fn captured_fixture_replays_and_detects_a_dropped_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    let project = ProjectConfig::default();
    let status = capture_one(temp.path(), project.clone());
    assert_eq!(status.slot(), Some(1));

    let dir = crawltape::store::CallbackDirectory::locate(temp.path(), "shop", None, "parse");
    let index = dir.load_index().expect("view.json");
    let entry = index.get(1).expect("index entry 1");
    assert_eq!(entry.num_items, 1);
    assert_eq!(entry.num_requests, 1);
    assert_eq!(entry.request["url"], "https://x/1");

    let rules = RuleBook::new();
    let stages = StageRegistry::new();
    let ctx = ReplayContext {
        project: &project,
        rules: &rules,
        stages: &stages,
    };

    let report = replay_fixture(ctx, &shop_type(parse), &dir.fixture_path(1));
    assert!(report.passed(), "{:?}", report.outcome);
    assert_eq!(report.phase(), ReplayPhase::Passed);

    let report = replay_fixture(ctx, &shop_type(parse_without_record), &dir.fixture_path(1));
    match report.outcome {
        Err(CrawltapeError::ReplayMismatch { index, kind, .. }) => {
            assert_eq!(index, 0);
            assert_eq!(kind, "record");
        }
        other => panic!("expected a mismatch, got {other:?}"),
    }
    assert_eq!(report.reached, ReplayPhase::PipelineApplied);
}

#[test]
fn changed_worker_state_fails_the_attribute_check() {
    let temp = tempfile::tempdir().expect("tempdir");
    let project = ProjectConfig::default();
    capture_one(temp.path(), project.clone());
    let dir = crawltape::store::CallbackDirectory::locate(temp.path(), "shop", None, "parse");

    let rules = RuleBook::new();
    let stages = StageRegistry::new();
    let ctx = ReplayContext {
        project: &project,
        rules: &rules,
        stages: &stages,
    };
    let report = replay_fixture(ctx, &shop_type(parse_twice), &dir.fixture_path(1));
    assert!(matches!(
        report.outcome,
        Err(CrawltapeError::AttributeMismatch { .. })
    ));

    let mut lenient = project.clone();
    lenient.capture.ignore_worker_attributes = true;
    let ctx = ReplayContext {
        project: &lenient,
        rules: &rules,
        stages: &stages,
    };
    let reports = replay_directory(ctx, &shop_type(parse_twice), &dir).expect("replay dir");
    assert_eq!(reports.len(), 1);
    assert!(reports[0].passed());
}

#[test]
fn missing_obligate_field_blocks_the_fixture() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut project = ProjectConfig::default();
    project.fields.obligate_item_fields = vec!["name".to_string()];

    match capture_one(temp.path(), project) {
        CaptureStatus::Rejected(CrawltapeError::Validation { url, cause }) => {
            assert_eq!(url, "https://x/1");
            assert!(cause.contains("missing fields: name"), "{cause}");
        }
        other => panic!("expected a rejected capture, got {other:?}"),
    }
    let dir = crawltape::store::CallbackDirectory::locate(temp.path(), "shop", None, "parse");
    assert_eq!(dir.fixture_count().expect("count"), 0);
    assert!(!dir.fixture_path(1).exists());
}
