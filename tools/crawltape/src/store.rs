//! On-disk callback directories:
//! `<base>/tests/<worker>/[<extra>/]<callback>/fixture<N>.bin` plus `view.json`
//! and `config.toml`.

use crate::codec::{load_fixture, write_fixture};
use crate::config::{CallbackConfig, CALLBACK_CONFIG_FILE, DEFAULT_CALLBACK_CONFIG};
use crate::errors::CrawltapeError;
use crate::fixture::Fixture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "view.json";
pub const TESTS_DIR: &str = "tests";

fn io_err(e: std::io::Error) -> CrawltapeError {
    CrawltapeError::Io(e.to_string())
}

/// Parse `fixture12.bin` into `12`.
pub fn fixture_number(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix("fixture")?
        .strip_suffix(".bin")?
        .parse()
        .ok()
}

pub fn fixture_file_name(number: usize) -> String {
    format!("fixture{number}.bin")
}

/// Accepts `3`, `fixture3` and `fixture3.bin`.
pub fn parse_fixture_arg(arg: &str) -> String {
    if let Ok(number) = arg.parse::<usize>() {
        return fixture_file_name(number);
    }
    if arg.ends_with(".bin") {
        arg.to_string()
    } else {
        format!("{arg}.bin")
    }
}

pub fn worker_dir(base: &Path, worker_id: &str) -> PathBuf {
    base.join(TESTS_DIR).join(worker_id)
}

// ── view.json ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub request: Value,
    pub num_items: usize,
    pub num_requests: usize,
}

/// Fixture number (as a string key) → summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixtureIndex(pub BTreeMap<String, IndexEntry>);

impl FixtureIndex {
    pub fn get(&self, number: usize) -> Option<&IndexEntry> {
        self.0.get(&number.to_string())
    }

    pub fn insert(&mut self, number: usize, entry: IndexEntry) {
        self.0.insert(number.to_string(), entry);
    }

    pub fn remove(&mut self, number: usize) -> Option<IndexEntry> {
        self.0.remove(&number.to_string())
    }

    pub fn numbers(&self) -> Vec<usize> {
        let mut numbers: Vec<usize> = self.0.keys().filter_map(|k| k.parse().ok()).collect();
        numbers.sort_unstable();
        numbers
    }
}

// ── CallbackDirectory ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackDirectory {
    pub worker_id: String,
    pub callback: String,
    pub path: PathBuf,
}

impl CallbackDirectory {
    pub fn locate(base: &Path, worker_id: &str, extra: Option<&str>, callback: &str) -> Self {
        let mut path = worker_dir(base, worker_id);
        if let Some(extra) = extra {
            path = path.join(extra);
        }
        Self {
            worker_id: worker_id.to_string(),
            callback: callback.to_string(),
            path: path.join(callback),
        }
    }

    /// The directory holding `fixture_path`, inferring the worker from the layout.
    pub fn containing(fixture_path: &Path) -> Option<Self> {
        let path = fixture_path.parent()?.to_path_buf();
        let callback = path.file_name()?.to_string_lossy().into_owned();
        let components: Vec<String> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let tests_at = components.iter().rposition(|c| c == TESTS_DIR)?;
        let worker_id = components.get(tests_at + 1)?.clone();
        Some(Self {
            worker_id,
            callback,
            path,
        })
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Create the directory tree and a default `config.toml` if missing.
    /// Returns true when the config file was written.
    pub fn establish(&self) -> Result<bool, CrawltapeError> {
        fs::create_dir_all(&self.path).map_err(io_err)?;
        let config_path = self.path.join(CALLBACK_CONFIG_FILE);
        if config_path.exists() {
            return Ok(false);
        }
        fs::write(&config_path, DEFAULT_CALLBACK_CONFIG).map_err(io_err)?;
        Ok(true)
    }

    pub fn load_config(&self) -> Result<Option<CallbackConfig>, CrawltapeError> {
        CallbackConfig::load(&self.path)
    }

    pub fn fixture_path(&self, number: usize) -> PathBuf {
        self.path.join(fixture_file_name(number))
    }

    /// Fixture numbers present on disk, ascending.
    pub fn fixture_numbers(&self) -> Result<Vec<usize>, CrawltapeError> {
        if !self.path.is_dir() {
            return Ok(Vec::new());
        }
        let mut numbers = fs::read_dir(&self.path)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| fixture_number(&entry.file_name().to_string_lossy()))
            .collect::<Vec<_>>();
        numbers.sort_unstable();
        Ok(numbers)
    }

    pub fn fixture_count(&self) -> Result<usize, CrawltapeError> {
        Ok(self.fixture_numbers()?.len())
    }

    pub fn fixture_paths(&self) -> Result<Vec<PathBuf>, CrawltapeError> {
        Ok(self
            .fixture_numbers()?
            .into_iter()
            .map(|n| self.fixture_path(n))
            .collect())
    }

    pub fn read_fixture(&self, number: usize) -> Result<Fixture, CrawltapeError> {
        load_fixture(&self.fixture_path(number))
    }

    pub fn write_fixture(&self, number: usize, fixture: &Fixture) -> Result<PathBuf, CrawltapeError> {
        fs::create_dir_all(&self.path).map_err(io_err)?;
        let path = self.fixture_path(number);
        write_fixture(&path, fixture)?;
        Ok(path)
    }

    pub fn load_index(&self) -> Result<FixtureIndex, CrawltapeError> {
        let path = self.path.join(INDEX_FILE);
        if !path.exists() {
            return Ok(FixtureIndex::default());
        }
        let raw = fs::read_to_string(&path).map_err(io_err)?;
        serde_json::from_str(&raw)
            .map_err(|e| CrawltapeError::Serialization(format!("{}: {e}", path.display())))
    }

    pub fn save_index(&self, index: &FixtureIndex) -> Result<(), CrawltapeError> {
        let raw = serde_json::to_string_pretty(index)
            .map_err(|e| CrawltapeError::Serialization(e.to_string()))?;
        fs::write(self.path.join(INDEX_FILE), raw).map_err(io_err)
    }

    pub fn write_index_entry(&self, number: usize, entry: IndexEntry) -> Result<(), CrawltapeError> {
        let mut index = self.load_index()?;
        index.insert(number, entry);
        self.save_index(&index)
    }

    /// Shift every fixture numbered above `min_cleared` down so numbering
    /// stays contiguous from 1, moving `view.json` entries along. The slot
    /// `min_cleared` must already be empty.
    fn cascade(&self, min_cleared: usize) -> Result<(), CrawltapeError> {
        if self.fixture_path(min_cleared).exists() {
            return Err(CrawltapeError::Configuration(format!(
                "cannot renumber into {}: the fixture still exists",
                self.fixture_path(min_cleared).display()
            )));
        }
        let to_move: Vec<usize> = self
            .fixture_numbers()?
            .into_iter()
            .filter(|n| *n > min_cleared)
            .collect();
        let mut index = self.load_index()?;
        let mut next = min_cleared;
        for number in to_move {
            if number != next {
                fs::rename(self.fixture_path(number), self.fixture_path(next)).map_err(io_err)?;
                index.remove(next);
                if let Some(entry) = index.remove(number) {
                    index.insert(next, entry);
                }
            }
            next += 1;
        }
        self.save_index(&index)
    }

    /// Delete fixture `number` and close the gap it leaves.
    pub fn remove_fixture(&self, number: usize) -> Result<(), CrawltapeError> {
        fs::remove_file(self.fixture_path(number)).map_err(io_err)?;
        let mut index = self.load_index()?;
        index.remove(number);
        self.save_index(&index)?;
        self.cascade(number)
    }
}

/// Callback directories under a worker, looking inside `extra` when the
/// worker directory holds a namespace instead of callbacks.
pub fn callback_dirs(
    base: &Path,
    worker_id: &str,
    extra: Option<&str>,
) -> Result<Vec<CallbackDirectory>, CrawltapeError> {
    let mut root = worker_dir(base, worker_id);
    if let Some(extra) = extra {
        let namespaced = root.join(extra);
        if namespaced.is_dir() {
            root = namespaced;
        }
    }
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = fs::read_dir(&root)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| Some(name.as_str()) != extra && !name.contains('.'))
        .collect::<Vec<_>>();
    names.sort();
    Ok(names
        .into_iter()
        .map(|callback| CallbackDirectory {
            worker_id: worker_id.to_string(),
            path: root.join(&callback),
            callback,
        })
        .collect())
}
