//! Capture-time and comparison-time cleaning of records and jobs.

use crate::config::ResolvedConfig;
use crate::encoding::decode_text;
use crate::types::{FetchJob, Headers, OutcomeEntry, DEFAULT_CALLBACK};
use serde_json::{Map, Value};

/// Prepare a job for storage: drop excluded and non-allowed auth headers and
/// make the callback name explicit.
pub fn parse_job(job: &FetchJob, cfg: &ResolvedConfig) -> FetchJob {
    let mut parsed = job.clone();
    let dropped = cfg.dropped_headers();
    parsed
        .headers
        .retain(|name, _| !dropped.iter().any(|d| d.eq_ignore_ascii_case(name)));
    if parsed.callback.is_none() {
        parsed.callback = Some(DEFAULT_CALLBACK.to_string());
    }
    parsed
}

pub fn parse_entry(entry: &OutcomeEntry, cfg: &ResolvedConfig) -> OutcomeEntry {
    match entry {
        OutcomeEntry::Record(data) => OutcomeEntry::Record(data.clone()),
        OutcomeEntry::Job(job) => OutcomeEntry::Job(parse_job(job, cfg)),
    }
}

pub(crate) fn headers_to_json(headers: &Headers, encoding: &str) -> Value {
    let mut out = Map::new();
    for (name, values) in headers {
        let mut decoded: Vec<Value> = values
            .iter()
            .map(|v| Value::String(decode_text(v, encoding)))
            .collect();
        let value = if decoded.len() == 1 {
            decoded.remove(0)
        } else {
            Value::Array(decoded)
        };
        out.insert(name.clone(), value);
    }
    Value::Object(out)
}

/// JSON view of a job used for comparison, validation and `view.json`.
/// Byte fields are decoded with `encoding`, which is always the encoding the
/// fixture was captured with.
pub fn clean_job(job: &FetchJob, cfg: &ResolvedConfig, encoding: &str) -> Value {
    let parsed = parse_job(job, cfg);
    let mut out = Map::new();
    out.insert("url".to_string(), Value::String(parsed.url.clone()));
    out.insert("method".to_string(), Value::String(parsed.method.clone()));
    out.insert("headers".to_string(), headers_to_json(&parsed.headers, encoding));
    out.insert(
        "body".to_string(),
        Value::String(decode_text(&parsed.body, encoding)),
    );
    out.insert(
        "cookies".to_string(),
        Value::Object(
            parsed
                .cookies
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        ),
    );
    out.insert("meta".to_string(), Value::Object(parsed.meta.clone()));
    out.insert(
        "callback".to_string(),
        Value::String(parsed.callback_name().to_string()),
    );
    out.insert("priority".to_string(), Value::from(parsed.priority));
    out.insert("dont_filter".to_string(), Value::Bool(parsed.dont_filter));
    for field in &cfg.request_skipped_fields {
        out.remove(field);
    }
    Value::Object(out)
}

pub fn clean_record(record: &Value, cfg: &ResolvedConfig) -> Value {
    let mut cleaned = record.clone();
    if let Value::Object(map) = &mut cleaned {
        for field in &cfg.skipped_fields {
            map.remove(field);
        }
    }
    cleaned
}

/// Cleaned records and jobs of an outcome, split by kind.
pub fn split_outcome(
    entries: &[OutcomeEntry],
    cfg: &ResolvedConfig,
    encoding: &str,
) -> (Vec<Value>, Vec<Value>) {
    let mut records = Vec::new();
    let mut jobs = Vec::new();
    for entry in entries {
        match entry {
            OutcomeEntry::Record(data) => records.push(clean_record(data, cfg)),
            OutcomeEntry::Job(job) => jobs.push(clean_job(job, cfg, encoding)),
        }
    }
    (records, jobs)
}

#[cfg(test)]
mod tests {
    use super::{clean_job, clean_record, parse_job};
    use crate::config::{resolve, CallbackConfig, ProjectConfig};
    use crate::types::FetchJob;
    use serde_json::json;

    #[test]
    fn parse_job_strips_auth_and_excluded_headers() {
        let mut project = ProjectConfig::default();
        project.fields.excluded_headers = vec!["X-Trace".to_string()];
        let cfg = resolve(&project, None);
        let job = FetchJob::new("https://x/1")
            .with_header("Authorization", b"Bearer secret")
            .with_header("x-trace", b"abc")
            .with_header("Accept", b"*/*");
        let parsed = parse_job(&job, &cfg);
        assert_eq!(parsed.headers.keys().collect::<Vec<_>>(), vec!["Accept"]);
        assert_eq!(parsed.callback.as_deref(), Some("parse"));
    }

    #[test]
    fn clean_job_decodes_bytes_and_skips_fields() {
        let project = ProjectConfig::default();
        let local = CallbackConfig {
            request_skipped_fields: vec!["priority".to_string()],
            ..CallbackConfig::default()
        };
        let cfg = resolve(&project, Some(&local));
        let mut job = FetchJob::new("https://x/1").with_header("Referer", [0x63u8, 0x61, 0x66, 0xe9]);
        job.body = vec![0xe9];
        let cleaned = clean_job(&job, &cfg, "latin1");
        assert_eq!(cleaned["headers"]["Referer"], json!("café"));
        assert_eq!(cleaned["body"], json!("é"));
        assert!(cleaned.get("priority").is_none());
        assert_eq!(cleaned["callback"], json!("parse"));
    }

    #[test]
    fn clean_record_drops_skipped_fields() {
        let mut project = ProjectConfig::default();
        project.fields.skipped_fields = vec!["scraped_at".to_string()];
        let cfg = resolve(&project, None);
        let cleaned = clean_record(&json!({"id": 1, "scraped_at": "now"}), &cfg);
        assert_eq!(cleaned, json!({"id": 1}));
    }
}
