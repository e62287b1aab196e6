use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Multi-valued headers with raw byte values, keyed by header name.
pub type Headers = BTreeMap<String, Vec<Vec<u8>>>;

/// Snapshot of a worker's public attributes.
pub type Attributes = BTreeMap<String, Value>;

/// Free-form project settings a worker is built from.
pub type Settings = BTreeMap<String, Value>;

pub const DEFAULT_CALLBACK: &str = "parse";
pub const DEFAULT_ENCODING: &str = "utf-8";

fn default_method() -> String {
    "GET".to_string()
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchJob {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub callback: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub dont_filter: bool,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

impl FetchJob {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: Headers::new(),
            body: Vec::new(),
            cookies: BTreeMap::new(),
            meta: Map::new(),
            callback: None,
            priority: 0,
            dont_filter: false,
            encoding: default_encoding(),
        }
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.as_ref().to_vec());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn callback_name(&self) -> &str {
        self.callback.as_deref().unwrap_or(DEFAULT_CALLBACK)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub job: FetchJob,
    pub url: String,
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub encoding: String,
    pub flags: Vec<String>,
}

impl FetchResult {
    pub fn new(job: FetchJob, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: job.url.clone(),
            encoding: job.encoding.clone(),
            job,
            status,
            headers: Headers::new(),
            body: body.into(),
            flags: Vec::new(),
        }
    }

    pub fn from_snapshot(job: FetchJob, snapshot: &ResultSnapshot) -> Self {
        Self {
            job,
            url: snapshot.url.clone(),
            status: snapshot.status,
            headers: snapshot.headers.clone(),
            body: snapshot.body.clone(),
            encoding: snapshot.encoding.clone(),
            flags: snapshot.flags.clone(),
        }
    }

    pub fn snapshot(&self) -> ResultSnapshot {
        ResultSnapshot {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            encoding: self.encoding.clone(),
            flags: self.flags.clone(),
        }
    }

    pub fn text(&self) -> String {
        crate::encoding::decode_text(&self.body, &self.encoding)
    }

    /// Cookies set by the response, one `name=value` pair per `Set-Cookie`
    /// header; attributes after the first `;` are ignored.
    pub fn cookies(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("set-cookie"))
            .flat_map(|(_, values)| values.iter())
            .filter_map(|value| {
                let text = String::from_utf8_lossy(value);
                let pair = text.split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

/// The persisted part of a [`FetchResult`]; the originating job is stored
/// separately in the fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSnapshot {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Record,
    Job,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Job => "job",
        }
    }
}

/// One element yielded by a callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutcomeEntry {
    #[serde(alias = "item")]
    Record(Value),
    #[serde(alias = "request")]
    Job(FetchJob),
}

impl OutcomeEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Record(_) => EntryKind::Record,
            Self::Job(_) => EntryKind::Job,
        }
    }
}

/// Ordered records and follow-up jobs produced by one callback invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionOutcome(pub Vec<OutcomeEntry>);

impl ExtractionOutcome {
    pub fn entries(&self) -> &[OutcomeEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &Value> {
        self.0.iter().filter_map(|entry| match entry {
            OutcomeEntry::Record(data) => Some(data),
            OutcomeEntry::Job(_) => None,
        })
    }

    pub fn jobs(&self) -> impl Iterator<Item = &FetchJob> {
        self.0.iter().filter_map(|entry| match entry {
            OutcomeEntry::Job(job) => Some(job),
            OutcomeEntry::Record(_) => None,
        })
    }

    pub fn num_records(&self) -> usize {
        self.records().count()
    }

    pub fn num_jobs(&self) -> usize {
        self.jobs().count()
    }
}

impl From<Vec<OutcomeEntry>> for ExtractionOutcome {
    fn from(entries: Vec<OutcomeEntry>) -> Self {
        Self(entries)
    }
}
