//! Fixture blob format.
//!
//! A current fixture file is a zlib stream holding a JSON envelope:
//!
//! ```text
//! {"fixture_version": 1, "encoding": "utf-8", "digest": "<sha256 of data>", "data": "<fixture json>"}
//! ```
//!
//! Files written before versioning hold the fixture object directly, in the
//! older request/response layout. `decode` tells the two apart by the presence
//! of `fixture_version` and never writes the legacy layout back out.

use crate::encoding::encode_text;
use crate::errors::CrawltapeError;
use crate::fixture::{Fixture, FIXTURE_VERSION, LEGACY_VERSION};
use crate::types::{
    Attributes, ExtractionOutcome, FetchJob, Headers, OutcomeEntry, ResultSnapshot,
    DEFAULT_ENCODING,
};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    fixture_version: u32,
    encoding: String,
    digest: String,
    data: String,
}

pub fn encode(fixture: &Fixture) -> Result<Vec<u8>, CrawltapeError> {
    let fixture = if fixture.version == FIXTURE_VERSION {
        Cow::Borrowed(fixture)
    } else {
        tracing::debug!(
            from = fixture.version,
            to = FIXTURE_VERSION,
            "upgrading fixture format on write"
        );
        let mut upgraded = fixture.clone();
        upgraded.version = FIXTURE_VERSION;
        Cow::Owned(upgraded)
    };

    let data = serde_json::to_string(fixture.as_ref())
        .map_err(|e| CrawltapeError::Serialization(e.to_string()))?;
    let envelope = Envelope {
        fixture_version: FIXTURE_VERSION,
        encoding: fixture.encoding.clone(),
        digest: digest_hex(data.as_bytes()),
        data,
    };
    let raw = serde_json::to_vec(&envelope)
        .map_err(|e| CrawltapeError::Serialization(e.to_string()))?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|e| CrawltapeError::Io(e.to_string()))?;
    encoder.finish().map_err(|e| CrawltapeError::Io(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Fixture, CrawltapeError> {
    let mut raw = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut raw)
        .map_err(|e| CrawltapeError::Serialization(format!("decompression failed: {e}")))?;
    let value: Value = serde_json::from_slice(&raw)
        .map_err(|e| CrawltapeError::Serialization(format!("malformed payload: {e}")))?;

    if value.get("fixture_version").is_some() {
        decode_versioned(value)
    } else {
        decode_legacy(value)
    }
}

/// Read and decode a fixture file, filling in the worker id of legacy files
/// from the directory layout.
pub fn load_fixture(path: &Path) -> Result<Fixture, CrawltapeError> {
    let bytes = std::fs::read(path).map_err(|e| CrawltapeError::Io(e.to_string()))?;
    let mut fixture = decode(&bytes).map_err(|e| match e {
        CrawltapeError::Serialization(cause) => {
            CrawltapeError::Serialization(format!("{}: {cause}", path.display()))
        }
        other => other,
    })?;
    if fixture.worker_id.is_empty() {
        if let Some(worker_id) = worker_id_from_path(path) {
            fixture.worker_id = worker_id;
        }
    }
    Ok(fixture)
}

pub fn write_fixture(path: &Path, fixture: &Fixture) -> Result<(), CrawltapeError> {
    let bytes = encode(fixture)?;
    std::fs::write(path, bytes).map_err(|e| CrawltapeError::Io(e.to_string()))
}

fn worker_id_from_path(path: &Path) -> Option<String> {
    let components: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let tests_at = components.iter().rposition(|c| c == "tests")?;
    components.get(tests_at + 1).cloned()
}

fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn decode_versioned(value: Value) -> Result<Fixture, CrawltapeError> {
    let envelope: Envelope = serde_json::from_value(value)
        .map_err(|e| CrawltapeError::Serialization(format!("malformed envelope: {e}")))?;
    if envelope.fixture_version > FIXTURE_VERSION {
        return Err(CrawltapeError::Serialization(format!(
            "fixture version {} is newer than supported version {FIXTURE_VERSION}",
            envelope.fixture_version
        )));
    }
    if digest_hex(envelope.data.as_bytes()) != envelope.digest {
        return Err(CrawltapeError::Serialization(
            "digest does not match fixture data".to_string(),
        ));
    }
    let mut fixture: Fixture = serde_json::from_str(&envelope.data)
        .map_err(|e| CrawltapeError::Serialization(format!("malformed fixture data: {e}")))?;
    fixture.version = envelope.fixture_version;
    fixture.encoding = envelope.encoding;
    Ok(fixture)
}

// ── Legacy layout ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextOrBytes {
    Text(String),
    Bytes(Vec<u8>),
}

impl TextOrBytes {
    fn into_bytes(self, encoding: &str) -> Vec<u8> {
        match self {
            Self::Text(text) => encode_text(&text, encoding),
            Self::Bytes(bytes) => bytes,
        }
    }
}

impl Default for TextOrBytes {
    fn default() -> Self {
        Self::Bytes(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyHeaderValue {
    Many(Vec<TextOrBytes>),
    One(TextOrBytes),
}

fn legacy_headers(raw: BTreeMap<String, LegacyHeaderValue>, encoding: &str) -> Headers {
    raw.into_iter()
        .map(|(name, value)| {
            let values = match value {
                LegacyHeaderValue::Many(values) => values,
                LegacyHeaderValue::One(value) => vec![value],
            };
            let values = values
                .into_iter()
                .map(|v| v.into_bytes(encoding))
                .collect();
            (name, values)
        })
        .collect()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Deserialize)]
struct LegacyJob {
    url: String,
    #[serde(default)]
    callback: Option<String>,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, LegacyHeaderValue>,
    #[serde(default)]
    body: TextOrBytes,
    #[serde(default)]
    cookies: BTreeMap<String, String>,
    #[serde(default)]
    meta: Map<String, Value>,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    dont_filter: bool,
    #[serde(default, rename = "_encoding")]
    encoding: Option<String>,
}

impl LegacyJob {
    fn upgrade(self, fallback_encoding: &str) -> FetchJob {
        let encoding = self
            .encoding
            .unwrap_or_else(|| fallback_encoding.to_string());
        FetchJob {
            headers: legacy_headers(self.headers, &encoding),
            body: self.body.into_bytes(&encoding),
            url: self.url,
            method: self.method,
            cookies: self.cookies,
            meta: self.meta,
            callback: self.callback,
            priority: self.priority,
            dont_filter: self.dont_filter,
            encoding,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LegacyResponse {
    url: String,
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, LegacyHeaderValue>,
    #[serde(default)]
    body: TextOrBytes,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data")]
enum LegacyEntry {
    #[serde(rename = "item", alias = "record")]
    Item(Value),
    #[serde(rename = "request", alias = "job")]
    Request(LegacyJob),
}

#[derive(Debug, Deserialize)]
struct LegacyFixture {
    #[serde(default)]
    spider_name: Option<String>,
    request: LegacyJob,
    response: LegacyResponse,
    #[serde(default)]
    result: Vec<LegacyEntry>,
    #[serde(default, alias = "spider_args")]
    spider_args_in: Attributes,
    #[serde(default)]
    spider_args_out: Attributes,
    #[serde(default)]
    settings: BTreeMap<String, Value>,
    #[serde(default)]
    middlewares: Vec<String>,
}

fn decode_legacy(value: Value) -> Result<Fixture, CrawltapeError> {
    let legacy: LegacyFixture = serde_json::from_value(value)
        .map_err(|e| CrawltapeError::Serialization(format!("malformed legacy fixture: {e}")))?;
    let encoding = legacy
        .response
        .encoding
        .clone()
        .unwrap_or_else(|| DEFAULT_ENCODING.to_string());

    let outcome = legacy
        .result
        .into_iter()
        .map(|entry| match entry {
            LegacyEntry::Item(data) => OutcomeEntry::Record(data),
            LegacyEntry::Request(job) => OutcomeEntry::Job(job.upgrade(&encoding)),
        })
        .collect::<Vec<_>>();
    let response = legacy.response;

    Ok(Fixture {
        version: LEGACY_VERSION,
        worker_id: legacy.spider_name.unwrap_or_default(),
        job: legacy.request.upgrade(&encoding),
        result: ResultSnapshot {
            url: response.url,
            status: response.status,
            headers: legacy_headers(response.headers, &encoding),
            body: response.body.into_bytes(&encoding),
            encoding: encoding.clone(),
            flags: response.flags,
        },
        attributes_before: legacy.spider_args_in,
        attributes_after: legacy.spider_args_out,
        outcome: ExtractionOutcome(outcome),
        stages: legacy.middlewares,
        settings: legacy.settings,
        encoding,
    })
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, load_fixture, write_fixture};
    use crate::errors::CrawltapeError;
    use crate::fixture::{sample, FIXTURE_VERSION, LEGACY_VERSION};
    use crate::types::OutcomeEntry;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    fn compress(value: &serde_json::Value) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&serde_json::to_vec(value).expect("serialize"))
            .expect("compress");
        encoder.finish().expect("finish")
    }

    #[test]
    fn current_fixtures_round_trip_field_for_field() {
        let fixture = sample::fixture();
        let bytes = encode(&fixture).expect("encode");
        let back = decode(&bytes).expect("decode");
        assert_eq!(back, fixture);
    }

    #[test]
    fn extreme_floats_survive_a_round_trip() {
        let mut fixture = sample::fixture();
        let prices = [
            1.0715660391465826e-75,
            f64::MIN_POSITIVE,
            5e-324,
            f64::MAX,
            -2.2250738585072014e-308,
            0.1 + 0.2,
            123456789.98765433,
        ];
        fixture.outcome = prices
            .iter()
            .map(|price| OutcomeEntry::Record(json!({"price": price})))
            .collect::<Vec<_>>()
            .into();
        fixture.attributes_after.insert("ratio".to_string(), json!(1.0 / 3.0));

        let back = decode(&encode(&fixture).expect("encode")).expect("decode");
        assert_eq!(back, fixture);
        let decoded: Vec<f64> = back
            .outcome
            .records()
            .map(|record| record["price"].as_f64().expect("float"))
            .collect();
        assert_eq!(decoded, prices.to_vec());
    }

    #[test]
    fn legacy_fixture_decodes_and_coerces_text_with_recorded_encoding() {
        let legacy = json!({
            "request": {
                "url": "https://shop.test/a",
                "callback": "parse",
                "method": "GET",
                "headers": {"Referer": ["https://shop.test/"]},
                "body": "",
                "meta": {"page": 1}
            },
            "response": {
                "url": "https://shop.test/a",
                "status": 200,
                "body": "caf\u{e9}",
                "headers": {"Content-Type": ["text/html"]},
                "encoding": "latin1"
            },
            "result": [
                {"type": "item", "data": {"id": 1}},
                {"type": "request", "data": {"url": "https://shop.test/b", "headers": {}}}
            ],
            "spider_args": {"pages": 0},
            "spider_args_out": {"pages": 1},
            "middlewares": ["dedupe"]
        });
        let fixture = decode(&compress(&legacy)).expect("decode legacy");
        assert_eq!(fixture.version, LEGACY_VERSION);
        assert!(fixture.is_legacy());
        assert_eq!(fixture.result.body, vec![0x63, 0x61, 0x66, 0xe9]);
        assert_eq!(fixture.job.headers["Referer"], vec![b"https://shop.test/".to_vec()]);
        assert_eq!(fixture.attributes_before["pages"], json!(0));
        assert_eq!(fixture.stages, vec!["dedupe".to_string()]);
        assert!(matches!(fixture.outcome.0[1], OutcomeEntry::Job(_)));

        // Rewriting always produces the current format.
        let rewritten = decode(&encode(&fixture).expect("encode")).expect("decode");
        assert_eq!(rewritten.version, FIXTURE_VERSION);
        assert_eq!(rewritten.result.body, fixture.result.body);
    }

    #[test]
    fn corrupt_blobs_fail_with_cannot_decode() {
        let err = decode(b"definitely not zlib").expect_err("corrupt blob");
        assert!(matches!(err, CrawltapeError::Serialization(_)));
        assert!(err.to_string().starts_with("cannot decode fixture"));
    }

    #[test]
    fn tampered_data_fails_digest_check() {
        let envelope = json!({
            "fixture_version": 1,
            "encoding": "utf-8",
            "digest": "00",
            "data": "{}"
        });
        let err = decode(&compress(&envelope)).expect_err("digest mismatch");
        assert!(err.to_string().contains("digest"));
    }

    #[test]
    fn newer_versions_are_rejected() {
        let envelope = json!({
            "fixture_version": FIXTURE_VERSION + 1,
            "encoding": "utf-8",
            "digest": "",
            "data": ""
        });
        let err = decode(&compress(&envelope)).expect_err("future version");
        assert!(err.to_string().contains("newer than supported"));
    }

    #[test]
    fn load_fills_legacy_worker_id_from_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("tests").join("shop").join("parse");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let mut fixture = sample::fixture();
        fixture.worker_id = String::new();
        let path = dir.join("fixture1.bin");
        write_fixture(&path, &fixture).expect("write");
        let loaded = load_fixture(&path).expect("load");
        assert_eq!(loaded.worker_id, "shop");
    }
}
