use crate::errors::CrawltapeError;
use crate::types::{FetchResult, OutcomeEntry};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A processing step wrapped around every callback invocation.
///
/// Pre-hooks run in list order before the callback; post-hooks run in
/// reverse list order over the callback's entries.
pub trait PipelineStage: Send + Sync {
    fn id(&self) -> &str;

    fn before_callback(&self, _result: &FetchResult) -> Result<(), CrawltapeError> {
        Ok(())
    }

    fn after_callback(
        &self,
        _result: &FetchResult,
        entries: Vec<OutcomeEntry>,
    ) -> Result<Vec<OutcomeEntry>, CrawltapeError> {
        Ok(entries)
    }
}

/// Stages by id, remembering registration order as the live pipeline order.
#[derive(Default, Clone)]
pub struct StageRegistry {
    stages: BTreeMap<String, Arc<dyn PipelineStage>>,
    order: Vec<String>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: Arc<dyn PipelineStage>) {
        let id = stage.id().to_string();
        if !self.order.contains(&id) {
            self.order.push(id.clone());
        }
        self.stages.insert(id, stage);
    }

    pub fn with_stage(mut self, stage: Arc<dyn PipelineStage>) -> Self {
        self.register(stage);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn PipelineStage>> {
        self.stages.get(id).cloned()
    }

    /// Every registered stage, in registration order.
    pub fn pipeline(&self) -> Vec<Arc<dyn PipelineStage>> {
        self.order
            .iter()
            .filter_map(|id| self.stages.get(id).cloned())
            .collect()
    }

    /// Look up every id, failing on the first one that is not registered.
    pub fn resolve(&self, ids: &[String]) -> Result<Vec<Arc<dyn PipelineStage>>, CrawltapeError> {
        ids.iter()
            .map(|id| {
                self.get(id).ok_or_else(|| {
                    CrawltapeError::Configuration(format!("unknown pipeline stage '{id}'"))
                })
            })
            .collect()
    }
}

pub fn stage_ids(stages: &[Arc<dyn PipelineStage>]) -> Vec<String> {
    stages.iter().map(|stage| stage.id().to_string()).collect()
}

/// Run `invoke` between the pre-hooks and post-hooks of `stages`.
pub fn run_with_stages(
    stages: &[Arc<dyn PipelineStage>],
    result: &FetchResult,
    invoke: impl FnOnce(&FetchResult) -> Result<Vec<OutcomeEntry>, CrawltapeError>,
) -> Result<Vec<OutcomeEntry>, CrawltapeError> {
    for stage in stages {
        stage.before_callback(result)?;
    }
    let mut entries = invoke(result)?;
    for stage in stages.iter().rev() {
        entries = stage.after_callback(result, entries)?;
    }
    Ok(entries)
}
