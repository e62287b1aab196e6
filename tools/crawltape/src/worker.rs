//! Workers and their callbacks, addressed by name through explicit registries.

use crate::errors::CrawltapeError;
use crate::types::{Attributes, FetchJob, FetchResult, OutcomeEntry, Settings};
use std::sync::Arc;

/// A callback-driven extraction worker.
pub trait Worker {
    fn worker_id(&self) -> &str;

    /// Public state captured before and after each callback.
    fn attributes(&self) -> Attributes;

    fn restore_attributes(&mut self, attributes: &Attributes);

    /// Jobs a crawl begins with when no explicit job list is given.
    fn start_jobs(&self) -> Vec<FetchJob> {
        Vec::new()
    }

    /// Callback chosen by the worker's own URL rules, if it has any.
    fn route(&self, _job: &FetchJob) -> Option<String> {
        None
    }
}

pub type CallbackFn<W> = fn(&mut W, &FetchResult) -> Result<Vec<OutcomeEntry>, CrawltapeError>;

/// Handle to a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackRef(usize);

pub struct CallbackRegistry<W> {
    names: Vec<String>,
    callbacks: Vec<CallbackFn<W>>,
}

impl<W> Default for CallbackRegistry<W> {
    fn default() -> Self {
        Self {
            names: Vec::new(),
            callbacks: Vec::new(),
        }
    }
}

impl<W> Clone for CallbackRegistry<W> {
    fn clone(&self) -> Self {
        Self {
            names: self.names.clone(),
            callbacks: self.callbacks.clone(),
        }
    }
}

impl<W> CallbackRegistry<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `name`, replacing any earlier registration.
    pub fn register(&mut self, name: impl Into<String>, callback: CallbackFn<W>) -> CallbackRef {
        let name = name.into();
        if let Some(existing) = self.lookup(&name) {
            self.callbacks[existing.0] = callback;
            return existing;
        }
        self.names.push(name);
        self.callbacks.push(callback);
        CallbackRef(self.callbacks.len() - 1)
    }

    pub fn lookup(&self, name: &str) -> Option<CallbackRef> {
        self.names.iter().position(|n| n == name).map(CallbackRef)
    }

    pub fn name_of(&self, callback: CallbackRef) -> Option<&str> {
        self.names.get(callback.0).map(String::as_str)
    }

    pub fn get(&self, callback: CallbackRef) -> Option<CallbackFn<W>> {
        self.callbacks.get(callback.0).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn invoke(
        &self,
        callback: CallbackRef,
        worker: &mut W,
        result: &FetchResult,
    ) -> Result<Vec<OutcomeEntry>, CrawltapeError> {
        let f = self.get(callback).ok_or_else(|| {
            CrawltapeError::Callback(format!("callback handle {} is not registered", callback.0))
        })?;
        f(worker, result)
    }
}

pub type WorkerBuilder<W> = Arc<dyn Fn(&Settings) -> Result<W, CrawltapeError> + Send + Sync>;

/// Everything needed to build a worker and call into it by name.
pub struct WorkerType<W> {
    pub id: String,
    pub build: WorkerBuilder<W>,
    pub callbacks: CallbackRegistry<W>,
}

impl<W> WorkerType<W> {
    pub fn new(
        id: impl Into<String>,
        build: impl Fn(&Settings) -> Result<W, CrawltapeError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            build: Arc::new(build),
            callbacks: CallbackRegistry::new(),
        }
    }

    pub fn with_callback(mut self, name: impl Into<String>, callback: CallbackFn<W>) -> Self {
        self.callbacks.register(name, callback);
        self
    }

    pub fn build(&self, settings: &Settings) -> Result<W, CrawltapeError> {
        (self.build)(settings)
    }

    pub fn callback(&self, name: &str) -> Result<CallbackRef, CrawltapeError> {
        self.callbacks.lookup(name).ok_or_else(|| {
            CrawltapeError::Configuration(format!(
                "worker '{}' has no callback named '{name}'",
                self.id
            ))
        })
    }
}
